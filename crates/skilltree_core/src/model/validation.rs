//! Field-level validation shared by every domain record.
//!
//! # Responsibility
//! - Own the format rules for user-entered text and URLs.
//! - Describe every rejected input with a typed, displayable reason.
//!
//! # Invariants
//! - Validators return the normalized (trimmed) value they accepted.
//! - Validators never touch storage.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static DISPLAY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._]{3,30}$").expect("valid display name regex"));
static TREE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._ ]{3,50}$").expect("valid tree name regex"));
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://\S+$").expect("valid url regex"));

/// Upper bound for short labels (skill names, titles, activity names).
pub const MAX_LABEL_CHARS: usize = 50;
/// Upper bound for free-form descriptions.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Reason an input was rejected before any state changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Required text is blank after trim.
    Blank(&'static str),
    /// Text exceeds its character budget.
    TooLong { field: &'static str, max_chars: usize },
    /// Text does not match the field's format rule.
    InvalidFormat(&'static str),
    /// Numeric value outside its accepted range.
    OutOfRange { field: &'static str, value: f64 },
    /// Coordinate is NaN or infinite.
    NonFinite(&'static str),
    /// Activity lists no weighted skills.
    NoWeightedSkills,
    /// Activity weights do not sum to one within tolerance.
    WeightSum(f64),
    /// Same skill listed twice in one activity.
    DuplicateSkill(Uuid),
    /// Achievement lists itself as a prerequisite.
    SelfPrerequisite(Uuid),
    /// Referenced entity exists but belongs to another tree.
    CrossTreeReference { field: &'static str, id: Uuid },
    /// Layout patch names an id of the other entity type.
    LayoutTypeMismatch(Uuid),
    /// Patch document is not an object, has unknown fields, or wrong types.
    MalformedPatch(String),
    /// Copying would push the owner past the node budget.
    NodeLimit { limit: usize, requested: usize },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank(field) => write!(f, "{field} must not be blank"),
            Self::TooLong { field, max_chars } => {
                write!(f, "{field} must be at most {max_chars} characters")
            }
            Self::InvalidFormat(field) => write!(f, "{field} has an invalid format"),
            Self::OutOfRange { field, value } => write!(f, "{field} out of range: {value}"),
            Self::NonFinite(field) => write!(f, "{field} must be a finite number"),
            Self::NoWeightedSkills => write!(f, "weightedSkills must list at least one skill"),
            Self::WeightSum(sum) => write!(f, "weights must sum to 1, got {sum}"),
            Self::DuplicateSkill(id) => write!(f, "skill listed more than once: {id}"),
            Self::SelfPrerequisite(id) => {
                write!(f, "achievement cannot be its own prerequisite: {id}")
            }
            Self::CrossTreeReference { field, id } => {
                write!(f, "{field} references an entity in another tree: {id}")
            }
            Self::LayoutTypeMismatch(id) => {
                write!(f, "layout entry type does not match entity: {id}")
            }
            Self::MalformedPatch(message) => write!(f, "malformed patch: {message}"),
            Self::NodeLimit { limit, requested } => write!(
                f,
                "at most {limit} skills and achievements allowed, copy would need {requested}"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Trims `value` and enforces `1..=max_chars` characters.
pub fn required_text(
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Blank(field));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ValidationError::TooLong { field, max_chars });
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`], but blank input collapses to `None`.
pub fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max_chars: usize,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => required_text(field, value, max_chars).map(Some),
        None => Ok(None),
    }
}

/// Validates an optional `http(s)://` URL; blank collapses to `None`.
pub fn optional_url(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) if URL_RE.is_match(value) => Ok(Some(value.to_string())),
        Some(_) => Err(ValidationError::InvalidFormat(field)),
        None => Ok(None),
    }
}

pub fn display_name(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if !DISPLAY_NAME_RE.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("displayName"));
    }
    Ok(trimmed.to_string())
}

pub fn tree_name(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if !TREE_NAME_RE.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("name"));
    }
    Ok(trimmed.to_string())
}

/// Rejects NaN and infinities.
pub fn finite(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonFinite(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_bounds() {
        assert_eq!(required_text("name", "  Guitar ", 50).unwrap(), "Guitar");
        assert_eq!(
            required_text("name", "   ", 50).unwrap_err(),
            ValidationError::Blank("name")
        );
        let long = "x".repeat(51);
        assert!(matches!(
            required_text("name", &long, 50),
            Err(ValidationError::TooLong { max_chars: 50, .. })
        ));
    }

    #[test]
    fn optional_url_accepts_http_and_collapses_blank() {
        assert_eq!(
            optional_url("backgroundUrl", Some("https://img.example/a.png")).unwrap(),
            Some("https://img.example/a.png".to_string())
        );
        assert_eq!(optional_url("backgroundUrl", Some("  ")).unwrap(), None);
        assert_eq!(
            optional_url("backgroundUrl", Some("ftp://nope")).unwrap_err(),
            ValidationError::InvalidFormat("backgroundUrl")
        );
    }

    #[test]
    fn display_name_and_tree_name_follow_their_patterns() {
        assert!(display_name("ada.l_99").is_ok());
        assert!(display_name("ab").is_err());
        assert!(display_name("has space").is_err());
        assert!(tree_name("Music Theory").is_ok());
        assert!(tree_name("no!").is_err());
    }

    #[test]
    fn finite_rejects_nan_and_infinity() {
        assert!(finite("x", 0.25).is_ok());
        assert!(finite("x", f64::NAN).is_err());
        assert!(finite("y", f64::NEG_INFINITY).is_err());
    }
}
