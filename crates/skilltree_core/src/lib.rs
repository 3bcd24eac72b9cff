//! Core domain logic for the skill-tree progression engine.
//! This crate is the single source of truth for structural and aggregation
//! invariants: the skill forest, the achievement prerequisite graph,
//! weighted time aggregation, and the layout projection.

pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use error::{ConflictReason, EngineError, EngineResult, ErrorKind};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::achievement::{Achievement, AchievementId, AchievementSortMode};
pub use model::activity::{Activity, ActivityId, WeightedSkill};
pub use model::layout::{LayoutNodeKind, OrientationPatch, TreeLayout};
pub use model::recent::{RecentActivity, DEFAULT_RECENT_DAYS, MAX_RECENT_DAYS};
pub use model::skill::{Skill, SkillFilter, SkillId, SkillSortMode};
pub use model::tree::{FavoriteTree, Tree, TreeId, TreeStats, Visibility, MAX_USER_NODES};
pub use model::user::{User, UserId};
pub use model::validation::ValidationError;
pub use repo::achievement_repo::{AchievementRepository, SqliteAchievementRepository};
pub use repo::activity_repo::{ActivityRepository, SqliteActivityRepository};
pub use repo::layout_repo::{LayoutRepository, SqliteLayoutRepository};
pub use repo::skill_repo::{SkillRepository, SqliteSkillRepository};
pub use repo::tree_repo::{SqliteTreeRepository, TreeRepository};
pub use repo::user_repo::{SqliteUserRepository, UserRepository};
pub use repo::{RepoError, RepoResult};
pub use service::achievement_service::AchievementGraph;
pub use service::activity_service::ActivityAggregator;
pub use service::layout_service::LayoutProjector;
pub use service::skill_service::SkillHierarchy;
pub use service::tree_service::{TreeStore, MAX_PAGE_SIZE};
pub use service::user_service::UserService;
pub use service::EntityRef;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
