//! Layout projection repository.
//!
//! # Responsibility
//! - Serve the per-tree layout as a read-time join of coordinates with live
//!   skill names and achievement titles.
//! - Own the coordinate rows that other repositories insert and remove inside
//!   their own transactions.
//!
//! # Invariants
//! - The returned key sets equal the live skill/achievement ids of the tree.
//!   Entities without a coordinate row project at `(0, 0)`.
//! - An orientation batch is applied entirely or not at all.

use super::error::{RepoError, RepoResult};
use super::schema::{
    begin_read, begin_write, ensure_connection_ready, ensure_owned_tree, owned_achievement_tree,
    owned_skill_tree, parse_uuid, RequiredTable,
};
use crate::model::layout::{
    AchievementLayoutEntry, LayoutNodeKind, OrientationPatch, SkillLayoutEntry, TreeLayout,
};
use crate::model::tree::TreeId;
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use uuid::Uuid;

const REQUIRED: &[RequiredTable] = &[
    ("tree_layouts", &["tree_uuid", "created_at"]),
    ("skill_layout", &["skill_uuid", "x", "y"]),
    ("achievement_layout", &["achievement_uuid", "x", "y"]),
];

pub trait LayoutRepository {
    /// Loads the projection of one owned tree.
    fn get_layout(&self, owner: UserId, tree_id: TreeId) -> RepoResult<TreeLayout>;
    /// Overwrites coordinates for every patch, atomically.
    fn apply_orientation(
        &self,
        owner: UserId,
        tree_id: TreeId,
        patches: &[OrientationPatch],
    ) -> RepoResult<()>;
}

pub struct SqliteLayoutRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLayoutRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED)?;
        Ok(Self { conn })
    }
}

impl LayoutRepository for SqliteLayoutRepository<'_> {
    fn get_layout(&self, owner: UserId, tree_id: TreeId) -> RepoResult<TreeLayout> {
        let tx = begin_read(self.conn)?;
        ensure_owned_tree(&tx, owner, tree_id)?;
        let layout = load_layout(&tx, tree_id)?;
        tx.commit()?;
        Ok(layout)
    }

    fn apply_orientation(
        &self,
        owner: UserId,
        tree_id: TreeId,
        patches: &[OrientationPatch],
    ) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        ensure_owned_tree(&tx, owner, tree_id)?;

        for patch in patches {
            patch.validate()?;
            ensure_patch_target(&tx, owner, tree_id, patch)?;
            match patch.kind {
                LayoutNodeKind::Skill => {
                    upsert_skill_entry(&tx, patch.id, patch.x, patch.y)?;
                }
                LayoutNodeKind::Achievement => {
                    upsert_achievement_entry(&tx, patch.id, patch.x, patch.y)?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }
}

fn ensure_patch_target(
    conn: &Connection,
    owner: UserId,
    tree_id: TreeId,
    patch: &OrientationPatch,
) -> RepoResult<()> {
    let skill_tree = owned_skill_tree(conn, owner, patch.id)?;
    let achievement_tree = owned_achievement_tree(conn, owner, patch.id)?;
    let (matching, other) = match patch.kind {
        LayoutNodeKind::Skill => (skill_tree, achievement_tree),
        LayoutNodeKind::Achievement => (achievement_tree, skill_tree),
    };

    if matching == Some(tree_id) {
        return Ok(());
    }
    if other == Some(tree_id) {
        return Err(ValidationError::LayoutTypeMismatch(patch.id).into());
    }
    Err(RepoError::NotFound {
        entity: match patch.kind {
            LayoutNodeKind::Skill => "skill",
            LayoutNodeKind::Achievement => "achievement",
        },
        id: patch.id,
    })
}

fn load_layout(conn: &Connection, tree_id: TreeId) -> RepoResult<TreeLayout> {
    let mut skill_layout = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT s.skill_uuid, s.name, COALESCE(l.x, 0.0), COALESCE(l.y, 0.0)
         FROM skills s
         LEFT JOIN skill_layout l ON l.skill_uuid = s.skill_uuid
         WHERE s.tree_uuid = ?1;",
    )?;
    let mut rows = stmt.query([tree_id.to_string()])?;
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        skill_layout.insert(
            parse_uuid(&id_text, "skills.skill_uuid")?,
            SkillLayoutEntry {
                name: row.get(1)?,
                x: row.get(2)?,
                y: row.get(3)?,
            },
        );
    }

    let mut achievement_layout = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT a.achievement_uuid, a.title, COALESCE(l.x, 0.0), COALESCE(l.y, 0.0)
         FROM achievements a
         LEFT JOIN achievement_layout l ON l.achievement_uuid = a.achievement_uuid
         WHERE a.tree_uuid = ?1;",
    )?;
    let mut rows = stmt.query([tree_id.to_string()])?;
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        achievement_layout.insert(
            parse_uuid(&id_text, "achievements.achievement_uuid")?,
            AchievementLayoutEntry {
                title: row.get(1)?,
                x: row.get(2)?,
                y: row.get(3)?,
            },
        );
    }

    Ok(TreeLayout {
        tree_id,
        skill_layout,
        achievement_layout,
    })
}

pub(crate) fn insert_tree_layout(
    conn: &Connection,
    tree_id: TreeId,
    created_at: i64,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO tree_layouts (tree_uuid, created_at) VALUES (?1, ?2);",
        params![tree_id.to_string(), created_at],
    )?;
    Ok(())
}

/// Default-position entry for a freshly created skill.
pub(crate) fn insert_skill_entry(conn: &Connection, skill_id: Uuid) -> RepoResult<()> {
    upsert_skill_entry(conn, skill_id, 0.0, 0.0)
}

pub(crate) fn insert_achievement_entry(conn: &Connection, achievement_id: Uuid) -> RepoResult<()> {
    upsert_achievement_entry(conn, achievement_id, 0.0, 0.0)
}

pub(crate) fn remove_skill_entry(conn: &Connection, skill_id: Uuid) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM skill_layout WHERE skill_uuid = ?1;",
        [skill_id.to_string()],
    )?;
    Ok(())
}

pub(crate) fn remove_achievement_entry(conn: &Connection, achievement_id: Uuid) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM achievement_layout WHERE achievement_uuid = ?1;",
        [achievement_id.to_string()],
    )?;
    Ok(())
}

pub(crate) fn upsert_skill_entry(conn: &Connection, skill_id: Uuid, x: f64, y: f64) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO skill_layout (skill_uuid, x, y) VALUES (?1, ?2, ?3)
         ON CONFLICT(skill_uuid) DO UPDATE SET x = excluded.x, y = excluded.y;",
        params![skill_id.to_string(), x, y],
    )?;
    Ok(())
}

pub(crate) fn upsert_achievement_entry(
    conn: &Connection,
    achievement_id: Uuid,
    x: f64,
    y: f64,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO achievement_layout (achievement_uuid, x, y) VALUES (?1, ?2, ?3)
         ON CONFLICT(achievement_uuid) DO UPDATE SET x = excluded.x, y = excluded.y;",
        params![achievement_id.to_string(), x, y],
    )?;
    Ok(())
}
