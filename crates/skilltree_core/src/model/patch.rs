//! Merge-patch documents for partial updates.
//!
//! # Invariants
//! - Unknown field names are rejected, never ignored.
//! - An absent field leaves the stored value unchanged.
//! - `null` clears a nullable field and is rejected for required fields.
//! - Entity ids stay strings here; the services resolve them so that a
//!   malformed id behaves like an unknown one.

use super::activity::WeightedSkill;
use super::tree::Visibility;
use super::validation::ValidationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Decodes a JSON object into a typed patch.
pub fn decode_patch<T: DeserializeOwned>(document: Value) -> Result<T, ValidationError> {
    if !document.is_object() {
        return Err(ValidationError::MalformedPatch(
            "patch document must be a JSON object".to_string(),
        ));
    }
    serde_json::from_value(document)
        .map_err(|err| ValidationError::MalformedPatch(err.to_string()))
}

/// Present-and-null becomes `Some(None)`; absence stays `None` via `default`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Present values must be non-null.
fn required<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserPatch {
    #[serde(default, deserialize_with = "required")]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub profile_picture_url: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TreePatch {
    #[serde(default, deserialize_with = "required")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub background_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "required")]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkillPatch {
    #[serde(default, deserialize_with = "required")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub background_url: Option<Option<String>>,
    /// `Some(None)` detaches the skill to the tree root.
    #[serde(default, deserialize_with = "nullable")]
    pub parent_skill_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AchievementPatch {
    #[serde(default, deserialize_with = "required")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub background_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "required")]
    pub prerequisites: Option<Vec<String>>,
    #[serde(default, deserialize_with = "required")]
    pub complete: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub completed_at: Option<Option<i64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActivityPatch {
    #[serde(default, deserialize_with = "required")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "required")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "required")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "required")]
    pub weighted_skills: Option<Vec<WeightedSkill>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_null_and_value_are_distinguished() {
        let patch: TreePatch = decode_patch(json!({ "description": null })).unwrap();
        assert_eq!(patch.description, Some(None));
        assert_eq!(patch.background_url, None);
        assert_eq!(patch.name, None);

        let patch: TreePatch =
            decode_patch(json!({ "backgroundUrl": "https://x.example/bg.png" })).unwrap();
        assert_eq!(
            patch.background_url,
            Some(Some("https://x.example/bg.png".to_string()))
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = decode_patch::<ActivityPatch>(json!({ "invalid_field": "dnm" })).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPatch(message) if message.contains("invalid_field")));
    }

    #[test]
    fn null_for_required_field_is_rejected() {
        assert!(decode_patch::<SkillPatch>(json!({ "name": null })).is_err());
        assert!(decode_patch::<AchievementPatch>(json!({ "complete": null })).is_err());
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(decode_patch::<TreePatch>(json!(["name"])).is_err());
        assert!(decode_patch::<TreePatch>(json!("name")).is_err());
    }

    #[test]
    fn activity_patch_accepts_integer_durations() {
        let longer: ActivityPatch = decode_patch(json!({ "duration": 4 })).unwrap();
        assert_eq!(longer.duration, Some(4.0));
        assert_eq!(longer.weighted_skills, None);
    }

    #[test]
    fn parent_skill_id_can_be_cleared() {
        let patch: SkillPatch = decode_patch(json!({ "parentSkillId": null })).unwrap();
        assert_eq!(patch.parent_skill_id, Some(None));
    }
}
