//! Achievement graph use-case service.
//!
//! # Responsibility
//! - Create, read, patch, list and delete achievements of owned trees.
//! - Normalize prerequisite lists and resolve completion transitions.
//! - Serve graph queries: next achievable milestones and direct dependants.
//!
//! # Invariants
//! - Prerequisite ids are deduplicated, first appearance wins.
//! - Completion is set by the caller; the engine only stamps or clears
//!   `completedAt` on a transition the caller left it out of.

use super::{record, EntityRef};
use crate::error::{EngineError, EngineResult};
use crate::model::achievement::{
    next_achievements, resolve_completion, sort_achievements, Achievement, AchievementSortMode,
};
use crate::model::patch::{decode_patch, AchievementPatch};
use crate::model::user::UserId;
use crate::model::validation::{
    optional_text, optional_url, required_text, MAX_DESCRIPTION_CHARS, MAX_LABEL_CHARS,
};
use crate::repo::achievement_repo::AchievementRepository;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

pub struct AchievementGraph<R: AchievementRepository> {
    repo: R,
}

impl<R: AchievementRepository> AchievementGraph<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates an incomplete achievement with a default layout entry.
    ///
    /// Every prerequisite must be a skill or achievement of the same tree.
    pub fn create_achievement(
        &self,
        owner: UserId,
        tree_id: impl EntityRef,
        title: &str,
        description: Option<&str>,
        background_url: Option<&str>,
        prerequisites: &[Uuid],
    ) -> EngineResult<Achievement> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Achievement> {
            let tree_id = tree_id.resolve("tree")?;
            let mut achievement =
                Achievement::new(tree_id, owner, required_text("title", title, MAX_LABEL_CHARS)?);
            achievement.description =
                optional_text("description", description, MAX_DESCRIPTION_CHARS)?;
            achievement.background_url = optional_url("backgroundUrl", background_url)?;
            achievement.prerequisites = dedup_in_order(prerequisites.iter().copied());
            self.repo.create_achievement(owner, &achievement)?;
            Ok(achievement)
        })();
        record("achievement_create", "achievement_graph", started_at, result)
    }

    pub fn get_achievement(
        &self,
        owner: UserId,
        achievement_id: impl EntityRef,
    ) -> EngineResult<Achievement> {
        let achievement_id = achievement_id.resolve("achievement")?;
        self.repo
            .get_achievement(owner, achievement_id)?
            .ok_or_else(|| EngineError::not_found("achievement", achievement_id))
    }

    pub fn list_achievements(
        &self,
        owner: UserId,
        tree_id: impl EntityRef,
        sort: AchievementSortMode,
    ) -> EngineResult<Vec<Achievement>> {
        let tree_id = tree_id.resolve("tree")?;
        let mut achievements = self.repo.list_achievements(owner, tree_id)?;
        sort_achievements(&mut achievements, sort);
        Ok(achievements)
    }

    /// Incomplete achievements whose achievement prerequisites are complete,
    /// newest first.
    pub fn next_achievements(
        &self,
        owner: UserId,
        tree_id: impl EntityRef,
    ) -> EngineResult<Vec<Achievement>> {
        let tree_id = tree_id.resolve("tree")?;
        let mut next = next_achievements(&self.repo.list_achievements(owner, tree_id)?);
        sort_achievements(&mut next, AchievementSortMode::CreatedAt);
        Ok(next)
    }

    /// Achievements listing `entity_id` (a skill or an achievement) as a
    /// direct prerequisite.
    pub fn achievement_children(
        &self,
        owner: UserId,
        entity_id: impl EntityRef,
    ) -> EngineResult<Vec<Achievement>> {
        let entity_id = entity_id.resolve("prerequisite")?;
        let mut children = self.repo.list_dependants(owner, entity_id)?;
        sort_achievements(&mut children, AchievementSortMode::Title);
        Ok(children)
    }

    /// Applies a merge patch of `title`, `description`, `backgroundUrl`,
    /// `prerequisites`, `complete` and `completedAt` to the stored
    /// achievement inside one write transaction.
    pub fn patch_achievement(
        &self,
        owner: UserId,
        achievement_id: impl EntityRef,
        patch: Value,
    ) -> EngineResult<Achievement> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Achievement> {
            let patch: AchievementPatch = decode_patch(patch)?;
            let achievement_id = achievement_id.resolve("achievement")?;
            let prerequisites = patch
                .prerequisites
                .map(|raw_ids| {
                    raw_ids
                        .iter()
                        .map(|raw| raw.resolve("prerequisite"))
                        .collect::<EngineResult<Vec<_>>>()
                })
                .transpose()?;

            let achievement = self.repo.update_achievement(owner, achievement_id, |achievement| {
                if let Some(title) = patch.title {
                    achievement.title = required_text("title", &title, MAX_LABEL_CHARS)?;
                }
                if let Some(description) = patch.description {
                    achievement.description = optional_text(
                        "description",
                        description.as_deref(),
                        MAX_DESCRIPTION_CHARS,
                    )?;
                }
                if let Some(url) = patch.background_url {
                    achievement.background_url = optional_url("backgroundUrl", url.as_deref())?;
                }
                if let Some(ids) = prerequisites {
                    achievement.prerequisites = dedup_in_order(ids);
                }

                let now = crate::model::now_epoch_ms();
                let (complete, completed_at) = resolve_completion(
                    achievement.complete,
                    achievement.completed_at,
                    patch.complete,
                    patch.completed_at,
                    now,
                );
                achievement.complete = complete;
                achievement.completed_at = completed_at;
                achievement.updated_at = now;
                Ok(())
            })?;
            Ok(achievement)
        })();
        record("achievement_patch", "achievement_graph", started_at, result)
    }

    /// Deletes an achievement; its dependants inherit its prerequisites.
    pub fn delete_achievement(
        &self,
        owner: UserId,
        achievement_id: impl EntityRef,
    ) -> EngineResult<()> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<()> {
            let achievement_id = achievement_id.resolve("achievement")?;
            self.repo.delete_achievement(owner, achievement_id)?;
            Ok(())
        })();
        record("achievement_delete", "achievement_graph", started_at, result)
    }
}

fn dedup_in_order(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::dedup_in_order;
    use uuid::Uuid;

    #[test]
    fn dedup_keeps_first_appearance() {
        let [a, b] = [Uuid::new_v4(), Uuid::new_v4()];
        assert_eq!(dedup_in_order([b, a, b, a]), vec![b, a]);
    }
}
