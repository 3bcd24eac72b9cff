//! User identity record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable user identifier; the root every other entity resolves to.
pub type UserId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// Unique across all users.
    pub display_name: String,
    pub profile_picture_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    /// Creates an unsaved user with a fresh id.
    pub fn new(display_name: impl Into<String>, profile_picture_url: Option<String>) -> Self {
        let now = super::now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            profile_picture_url,
            created_at: now,
            updated_at: now,
        }
    }
}
