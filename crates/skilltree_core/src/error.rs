//! Public error taxonomy of the engine.
//!
//! # Responsibility
//! - Collapse repository and validation failures into the five kinds a
//!   transport maps to status codes.
//!
//! # Invariants
//! - Every failed operation returns exactly one `EngineError`.
//! - Absent ids, malformed ids, and ids owned by another user all surface as
//!   `NotFound` with the same shape.

use crate::model::validation::ValidationError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error class, stable for status-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthenticated,
    /// Infrastructure fault that is not the caller's mistake.
    Storage,
}

/// Why a structurally valid request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Reparenting would put the skill under its own descendant.
    SkillCycle { skill_id: Uuid, parent_id: Uuid },
    /// Prerequisites would make the achievement its own transitive prerequisite.
    PrerequisiteCycle { achievement_id: Uuid },
    /// Skill is still listed in at least one activity's weights.
    SkillReferenced { skill_id: Uuid },
    /// Some skill of the tree is still listed in an activity's weights.
    TreeSkillsReferenced { tree_id: Uuid },
    /// Another user already holds the display name.
    DisplayNameTaken,
}

impl Display for ConflictReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SkillCycle {
                skill_id,
                parent_id,
            } => write!(
                f,
                "reparenting skill {skill_id} under {parent_id} would create a cycle"
            ),
            Self::PrerequisiteCycle { achievement_id } => write!(
                f,
                "prerequisites would make achievement {achievement_id} depend on itself"
            ),
            Self::SkillReferenced { skill_id } => {
                write!(f, "skill {skill_id} is referenced by activities")
            }
            Self::TreeSkillsReferenced { tree_id } => {
                write!(f, "skills of tree {tree_id} are referenced by activities")
            }
            Self::DisplayNameTaken => write!(f, "display name is already taken"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    NotFound { entity: &'static str, id: String },
    Conflict(ConflictReason),
    Unauthenticated,
    Storage(RepoError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Short machine-readable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthenticated => "unauthenticated",
            Self::Storage(_) => "storage",
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict(reason) => write!(f, "conflict: {reason}"),
            Self::Unauthenticated => write!(f, "missing or invalid identity"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::Conflict(_) => None,
            Self::Unauthenticated => None,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::not_found(entity, id),
            RepoError::Conflict(reason) => Self::Conflict(reason),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_semantic_errors_keep_their_kind() {
        let id = Uuid::new_v4();
        let not_found: EngineError = RepoError::NotFound { entity: "skill", id }.into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let conflict: EngineError =
            RepoError::Conflict(ConflictReason::SkillReferenced { skill_id: id }).into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let storage: EngineError = RepoError::InvalidData("bad row".to_string()).into();
        assert_eq!(storage.kind(), ErrorKind::Storage);
        assert_eq!(storage.code(), "storage");
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = EngineError::not_found("tree", "not-a-uuid");
        assert_eq!(err.to_string(), "tree not found: not-a-uuid");
    }
}
