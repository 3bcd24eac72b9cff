//! Tree container record.
//!
//! A tree is owned by exactly one user and scopes one skill forest, one
//! achievement graph, and one layout.

use super::user::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TreeId = Uuid;

/// Who may see a tree. Sharing itself is handled outside the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[default]
    Private,
    Friends,
    Public,
}

impl Visibility {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Friends => "friends",
            Self::Public => "public",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "private" => Some(Self::Private),
            "friends" => Some(Self::Friends),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: TreeId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub background_url: Option<String>,
    pub visibility: Visibility,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Tree {
    pub fn new(user_id: UserId, name: impl Into<String>, visibility: Visibility) -> Self {
        let now = super::now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: None,
            background_url: None,
            visibility,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Most skills plus achievements one user may hold after copying a tree.
pub const MAX_USER_NODES: usize = 50;

/// Aggregate counters for one tree, or for every tree of one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    pub total_time_logged: f64,
    pub total_skills: u32,
    pub total_achievements: u32,
    pub achievements_completed: u32,
}

/// The owned tree with the most logged time, with its counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteTree {
    pub tree_id: TreeId,
    pub name: String,
    pub background_url: Option<String>,
    #[serde(flatten)]
    pub stats: TreeStats,
}

#[cfg(test)]
mod tests {
    use super::Visibility;

    #[test]
    fn visibility_db_mapping_is_bijective() {
        for value in [Visibility::Private, Visibility::Friends, Visibility::Public] {
            assert_eq!(Visibility::from_db(value.as_db()), Some(value));
        }
        assert_eq!(Visibility::from_db("preset"), None);
    }

    #[test]
    fn visibility_uses_upper_case_on_the_wire() {
        let json = serde_json::to_string(&Visibility::Friends).unwrap();
        assert_eq!(json, "\"FRIENDS\"");
    }
}
