//! Layout projection shapes.
//!
//! The layout of a tree is never stored as a document. Coordinates live in
//! per-entity rows that are created and removed in the same transaction as
//! the entity; labels are joined in at read time.

use super::achievement::AchievementId;
use super::skill::SkillId;
use super::tree::TreeId;
use super::validation::{finite, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillLayoutEntry {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementLayoutEntry {
    pub title: String,
    pub x: f64,
    pub y: f64,
}

/// Read-time projection of one tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeLayout {
    pub tree_id: TreeId,
    pub skill_layout: BTreeMap<SkillId, SkillLayoutEntry>,
    pub achievement_layout: BTreeMap<AchievementId, AchievementLayoutEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutNodeKind {
    Skill,
    Achievement,
}

/// One coordinate overwrite.
///
/// Any finite value is accepted; clamping to a display range is left to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrientationPatch {
    #[serde(rename = "type")]
    pub kind: LayoutNodeKind,
    pub id: Uuid,
    pub x: f64,
    pub y: f64,
}

impl OrientationPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        finite("x", self.x)?;
        finite("y", self.y)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_patch_reads_type_field() {
        let id = Uuid::new_v4();
        let patch: OrientationPatch = serde_json::from_value(serde_json::json!({
            "type": "ACHIEVEMENT",
            "id": id,
            "x": -3.5,
            "y": 1200.0,
        }))
        .unwrap();
        assert_eq!(patch.kind, LayoutNodeKind::Achievement);
        assert_eq!(patch.id, id);
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn orientation_patch_rejects_non_finite_coordinates() {
        let patch = OrientationPatch {
            kind: LayoutNodeKind::Skill,
            id: Uuid::new_v4(),
            x: f64::INFINITY,
            y: 0.0,
        };
        assert_eq!(patch.validate(), Err(ValidationError::NonFinite("x")));
    }
}
