//! Tree repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist trees and scope every lookup to the owning user.
//! - Act as the cascade-delete root for skills, achievements and layout rows.
//! - Clone a readable tree into a caller's account with fresh ids.
//!
//! # Invariants
//! - A tree and its layout header are created in one transaction.
//! - A tree whose skills are referenced by any activity is never deleted;
//!   activities are not silently detached.
//! - Listing is deterministic: `created_at DESC, tree_uuid ASC`.
//! - A copy remaps every internal reference, so the copied skill forest and
//!   prerequisite graph are isomorphic to the source and stay acyclic.

use super::error::{RepoError, RepoResult};
use super::layout_repo::{insert_tree_layout, upsert_achievement_entry, upsert_skill_entry};
use super::schema::{
    begin_read, begin_write, ensure_connection_ready, ensure_owned_tree, parse_optional_uuid,
    parse_uuid, RequiredTable,
};
use crate::error::ConflictReason;
use crate::model::activity::units_to_hours;
use crate::model::tree::{FavoriteTree, Tree, TreeId, TreeStats, Visibility, MAX_USER_NODES};
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use uuid::Uuid;

const REQUIRED: &[RequiredTable] = &[(
    "trees",
    &[
        "tree_uuid",
        "user_uuid",
        "name",
        "description",
        "background_url",
        "visibility",
        "created_at",
        "updated_at",
    ],
)];

const TREE_COLUMNS: &str = "tree_uuid, user_uuid, name, description, background_url, \
                            visibility, created_at, updated_at";

pub trait TreeRepository {
    /// Inserts a tree together with its empty layout.
    fn create_tree(&self, tree: &Tree) -> RepoResult<()>;
    fn get_tree(&self, owner: UserId, tree_id: TreeId) -> RepoResult<Option<Tree>>;
    fn list_trees(&self, owner: UserId) -> RepoResult<Vec<Tree>>;
    /// `PUBLIC` trees of every user, newest first, one page at a time.
    fn list_public_trees(&self, offset: u32, limit: u32) -> RepoResult<Vec<Tree>>;
    /// Loads an owned tree inside the write transaction, lets `edit` change
    /// it and stores its display fields.
    fn update_tree<F>(&self, owner: UserId, tree_id: TreeId, edit: F) -> RepoResult<Tree>
    where
        F: FnOnce(&mut Tree) -> RepoResult<()>;
    /// Deletes an owned tree with everything it scopes.
    fn delete_tree(&self, owner: UserId, tree_id: TreeId) -> RepoResult<()>;
    /// Deletes every tree of `owner` in one transaction; returns how many.
    fn delete_all_trees(&self, owner: UserId) -> RepoResult<usize>;
    fn tree_stats(&self, owner: UserId, tree_id: TreeId) -> RepoResult<TreeStats>;
    /// Counters summed over every tree of `owner`.
    fn user_stats(&self, owner: UserId) -> RepoResult<TreeStats>;
    /// Owned tree with the most logged time; `None` when the user has no tree.
    fn favorite_tree(&self, owner: UserId) -> RepoResult<Option<FavoriteTree>>;
    /// Clones an owned or `PUBLIC` tree into `owner`'s account.
    ///
    /// Skills restart at zero time, achievements restart incomplete, and
    /// layout coordinates carry over.
    fn copy_tree(&self, owner: UserId, source_tree_id: TreeId) -> RepoResult<Tree>;
}

pub struct SqliteTreeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTreeRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED)?;
        Ok(Self { conn })
    }
}

impl TreeRepository for SqliteTreeRepository<'_> {
    fn create_tree(&self, tree: &Tree) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        tx.execute(
            "INSERT INTO trees (
                tree_uuid,
                user_uuid,
                name,
                description,
                background_url,
                visibility,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                tree.id.to_string(),
                tree.user_id.to_string(),
                tree.name,
                tree.description,
                tree.background_url,
                tree.visibility.as_db(),
                tree.created_at,
                tree.updated_at,
            ],
        )?;
        insert_tree_layout(&tx, tree.id, tree.created_at)?;
        tx.commit()?;
        Ok(())
    }

    fn get_tree(&self, owner: UserId, tree_id: TreeId) -> RepoResult<Option<Tree>> {
        load_tree(self.conn, owner, tree_id)
    }

    fn list_trees(&self, owner: UserId) -> RepoResult<Vec<Tree>> {
        let sql = format!(
            "SELECT {TREE_COLUMNS}
             FROM trees
             WHERE user_uuid = ?1
             ORDER BY created_at DESC, tree_uuid ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([owner.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(read_tree_row(row)?);
        }
        Ok(items)
    }

    fn list_public_trees(&self, offset: u32, limit: u32) -> RepoResult<Vec<Tree>> {
        let sql = format!(
            "SELECT {TREE_COLUMNS}
             FROM trees
             WHERE visibility = ?1
             ORDER BY created_at DESC, tree_uuid ASC
             LIMIT ?2 OFFSET ?3;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![Visibility::Public.as_db(), limit, offset])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(read_tree_row(row)?);
        }
        Ok(items)
    }

    fn update_tree<F>(&self, owner: UserId, tree_id: TreeId, edit: F) -> RepoResult<Tree>
    where
        F: FnOnce(&mut Tree) -> RepoResult<()>,
    {
        let tx = begin_write(self.conn)?;
        let mut tree = load_tree(&tx, owner, tree_id)?.ok_or(RepoError::NotFound {
            entity: "tree",
            id: tree_id,
        })?;
        edit(&mut tree)?;

        tx.execute(
            "UPDATE trees
             SET name = ?2,
                 description = ?3,
                 background_url = ?4,
                 visibility = ?5,
                 updated_at = ?6
             WHERE tree_uuid = ?1;",
            params![
                tree_id.to_string(),
                tree.name,
                tree.description,
                tree.background_url,
                tree.visibility.as_db(),
                tree.updated_at,
            ],
        )?;

        tx.commit()?;
        Ok(tree)
    }

    fn delete_tree(&self, owner: UserId, tree_id: TreeId) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        ensure_owned_tree(&tx, owner, tree_id)?;
        ensure_tree_unreferenced(&tx, tree_id)?;
        delete_tree_rows(&tx, tree_id)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_all_trees(&self, owner: UserId) -> RepoResult<usize> {
        let tx = begin_write(self.conn)?;
        let tree_ids = owned_tree_ids(&tx, owner)?;
        for &tree_id in &tree_ids {
            ensure_tree_unreferenced(&tx, tree_id)?;
        }
        for &tree_id in &tree_ids {
            delete_tree_rows(&tx, tree_id)?;
        }
        tx.commit()?;
        Ok(tree_ids.len())
    }

    fn tree_stats(&self, owner: UserId, tree_id: TreeId) -> RepoResult<TreeStats> {
        let tx = begin_read(self.conn)?;
        ensure_owned_tree(&tx, owner, tree_id)?;
        let stats = load_stats(&tx, "tree_uuid", tree_id)?;
        tx.commit()?;
        Ok(stats)
    }

    fn user_stats(&self, owner: UserId) -> RepoResult<TreeStats> {
        let tx = begin_read(self.conn)?;
        let stats = load_stats(&tx, "user_uuid", owner)?;
        tx.commit()?;
        Ok(stats)
    }

    fn favorite_tree(&self, owner: UserId) -> RepoResult<Option<FavoriteTree>> {
        let tx = begin_read(self.conn)?;
        let favorite: Option<String> = tx
            .query_row(
                "SELECT t.tree_uuid
                 FROM trees t
                 LEFT JOIN skills s ON s.tree_uuid = t.tree_uuid
                 WHERE t.user_uuid = ?1
                 GROUP BY t.tree_uuid
                 ORDER BY COALESCE(SUM(s.time_spent_units), 0) DESC,
                          t.created_at DESC,
                          t.tree_uuid ASC
                 LIMIT 1;",
                [owner.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(tree_id) = parse_optional_uuid(favorite, "trees.tree_uuid")? else {
            return Ok(None);
        };

        let tree = load_tree(&tx, owner, tree_id)?.ok_or(RepoError::NotFound {
            entity: "tree",
            id: tree_id,
        })?;
        let stats = load_stats(&tx, "tree_uuid", tree_id)?;
        tx.commit()?;

        Ok(Some(FavoriteTree {
            tree_id,
            name: tree.name,
            background_url: tree.background_url,
            stats,
        }))
    }

    fn copy_tree(&self, owner: UserId, source_tree_id: TreeId) -> RepoResult<Tree> {
        let tx = begin_write(self.conn)?;
        let source = load_readable_tree(&tx, owner, source_tree_id)?.ok_or(
            RepoError::NotFound {
                entity: "tree",
                id: source_tree_id,
            },
        )?;

        let skills = load_source_skills(&tx, source_tree_id)?;
        let achievements = load_source_achievements(&tx, source_tree_id)?;
        let held = count_owned_nodes(&tx, owner)?;
        let requested = held + skills.len() + achievements.len();
        if requested > MAX_USER_NODES {
            return Err(ValidationError::NodeLimit {
                limit: MAX_USER_NODES,
                requested,
            }
            .into());
        }

        let mut copy = Tree::new(owner, source.name.clone(), Visibility::Friends);
        copy.description = source.description.clone();
        copy.background_url = source.background_url.clone();
        tx.execute(
            "INSERT INTO trees (
                tree_uuid,
                user_uuid,
                name,
                description,
                background_url,
                visibility,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                copy.id.to_string(),
                owner.to_string(),
                copy.name,
                copy.description,
                copy.background_url,
                copy.visibility.as_db(),
                copy.created_at,
                copy.updated_at,
            ],
        )?;
        insert_tree_layout(&tx, copy.id, copy.created_at)?;

        let ids: HashMap<Uuid, Uuid> = skills
            .iter()
            .map(|skill| skill.id)
            .chain(achievements.iter().map(|achievement| achievement.id))
            .map(|old| (old, Uuid::new_v4()))
            .collect();
        let remap = |old: Uuid| {
            ids.get(&old).copied().ok_or_else(|| {
                RepoError::InvalidData(format!("reference {old} points outside its tree"))
            })
        };

        // Parents are linked in a second pass so every referenced row exists.
        for skill in &skills {
            tx.execute(
                "INSERT INTO skills (
                    skill_uuid,
                    tree_uuid,
                    user_uuid,
                    name,
                    background_url,
                    time_spent_units,
                    parent_skill_uuid,
                    created_at,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, ?6, ?6);",
                params![
                    remap(skill.id)?.to_string(),
                    copy.id.to_string(),
                    owner.to_string(),
                    skill.name,
                    skill.background_url,
                    copy.created_at,
                ],
            )?;
            upsert_skill_entry(&tx, remap(skill.id)?, skill.x, skill.y)?;
        }
        for skill in &skills {
            if let Some(parent_id) = skill.parent_id {
                tx.execute(
                    "UPDATE skills SET parent_skill_uuid = ?2 WHERE skill_uuid = ?1;",
                    params![remap(skill.id)?.to_string(), remap(parent_id)?.to_string()],
                )?;
            }
        }

        for achievement in &achievements {
            tx.execute(
                "INSERT INTO achievements (
                    achievement_uuid,
                    tree_uuid,
                    user_uuid,
                    title,
                    description,
                    background_url,
                    is_complete,
                    completed_at,
                    created_at,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7, ?7);",
                params![
                    remap(achievement.id)?.to_string(),
                    copy.id.to_string(),
                    owner.to_string(),
                    achievement.title,
                    achievement.description,
                    achievement.background_url,
                    copy.created_at,
                ],
            )?;
            upsert_achievement_entry(&tx, remap(achievement.id)?, achievement.x, achievement.y)?;
        }
        for row in load_source_prerequisites(&tx, source_tree_id)? {
            tx.execute(
                "INSERT INTO achievement_prerequisites (
                    achievement_uuid,
                    position,
                    skill_uuid,
                    required_achievement_uuid
                ) VALUES (?1, ?2, ?3, ?4);",
                params![
                    remap(row.achievement_id)?.to_string(),
                    row.position,
                    row.skill_id.map(remap).transpose()?.map(|id| id.to_string()),
                    row.required_achievement_id
                        .map(remap)
                        .transpose()?
                        .map(|id| id.to_string()),
                ],
            )?;
        }

        tx.commit()?;
        Ok(copy)
    }
}

/// Rejects deleting a tree while an activity weights one of its skills.
fn ensure_tree_unreferenced(conn: &Connection, tree_id: TreeId) -> RepoResult<()> {
    let referenced: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM activity_skill_weights w
            INNER JOIN skills s ON s.skill_uuid = w.skill_uuid
            WHERE s.tree_uuid = ?1
        );",
        [tree_id.to_string()],
        |row| row.get(0),
    )?;
    if referenced == 1 {
        return Err(ConflictReason::TreeSkillsReferenced { tree_id }.into());
    }
    Ok(())
}

fn delete_tree_rows(conn: &Connection, tree_id: TreeId) -> RepoResult<()> {
    let tree_key = tree_id.to_string();
    conn.execute(
        "DELETE FROM achievement_prerequisites
         WHERE achievement_uuid IN (
            SELECT achievement_uuid FROM achievements WHERE tree_uuid = ?1
         );",
        [&tree_key],
    )?;
    conn.execute(
        "DELETE FROM achievement_layout
         WHERE achievement_uuid IN (
            SELECT achievement_uuid FROM achievements WHERE tree_uuid = ?1
         );",
        [&tree_key],
    )?;
    conn.execute(
        "DELETE FROM skill_layout
         WHERE skill_uuid IN (SELECT skill_uuid FROM skills WHERE tree_uuid = ?1);",
        [&tree_key],
    )?;
    conn.execute("DELETE FROM achievements WHERE tree_uuid = ?1;", [&tree_key])?;
    // Parent links point inside the tree; clear them before the bulk delete.
    conn.execute(
        "UPDATE skills SET parent_skill_uuid = NULL WHERE tree_uuid = ?1;",
        [&tree_key],
    )?;
    conn.execute("DELETE FROM skills WHERE tree_uuid = ?1;", [&tree_key])?;
    conn.execute("DELETE FROM tree_layouts WHERE tree_uuid = ?1;", [&tree_key])?;
    conn.execute("DELETE FROM trees WHERE tree_uuid = ?1;", [&tree_key])?;
    Ok(())
}

fn owned_tree_ids(conn: &Connection, owner: UserId) -> RepoResult<Vec<TreeId>> {
    let mut stmt = conn.prepare(
        "SELECT tree_uuid FROM trees WHERE user_uuid = ?1 ORDER BY created_at DESC, tree_uuid ASC;",
    )?;
    let mut rows = stmt.query([owner.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        items.push(parse_uuid(&id_text, "trees.tree_uuid")?);
    }
    Ok(items)
}

/// Counters over every skill and achievement whose `scope` column equals `id`.
fn load_stats(conn: &Connection, scope: &'static str, id: Uuid) -> RepoResult<TreeStats> {
    let (total_units, total_skills): (i64, i64) = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(time_spent_units), 0), COUNT(*)
             FROM skills
             WHERE {scope} = ?1;"
        ),
        [id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let (total_achievements, achievements_completed): (i64, i64) = conn.query_row(
        &format!(
            "SELECT COUNT(*), COALESCE(SUM(is_complete), 0)
             FROM achievements
             WHERE {scope} = ?1;"
        ),
        [id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(TreeStats {
        total_time_logged: units_to_hours(total_units),
        total_skills: total_skills as u32,
        total_achievements: total_achievements as u32,
        achievements_completed: achievements_completed as u32,
    })
}

fn count_owned_nodes(conn: &Connection, owner: UserId) -> RepoResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM skills WHERE user_uuid = ?1)
              + (SELECT COUNT(*) FROM achievements WHERE user_uuid = ?1);",
        [owner.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn load_tree(conn: &Connection, owner: UserId, tree_id: TreeId) -> RepoResult<Option<Tree>> {
    let sql = format!("SELECT {TREE_COLUMNS} FROM trees WHERE tree_uuid = ?1 AND user_uuid = ?2;");
    conn.query_row(&sql, [tree_id.to_string(), owner.to_string()], |row| {
        Ok(read_tree_row(row))
    })
    .optional()?
    .transpose()
}

/// A tree `owner` may copy: their own, or anyone's `PUBLIC` one.
fn load_readable_tree(
    conn: &Connection,
    owner: UserId,
    tree_id: TreeId,
) -> RepoResult<Option<Tree>> {
    let sql = format!(
        "SELECT {TREE_COLUMNS}
         FROM trees
         WHERE tree_uuid = ?1
           AND (user_uuid = ?2 OR visibility = ?3);"
    );
    conn.query_row(
        &sql,
        params![
            tree_id.to_string(),
            owner.to_string(),
            Visibility::Public.as_db()
        ],
        |row| Ok(read_tree_row(row)),
    )
    .optional()?
    .transpose()
}

struct SourceSkill {
    id: Uuid,
    name: String,
    background_url: Option<String>,
    parent_id: Option<Uuid>,
    x: f64,
    y: f64,
}

struct SourceAchievement {
    id: Uuid,
    title: String,
    description: Option<String>,
    background_url: Option<String>,
    x: f64,
    y: f64,
}

struct SourcePrerequisite {
    achievement_id: Uuid,
    position: i64,
    skill_id: Option<Uuid>,
    required_achievement_id: Option<Uuid>,
}

fn load_source_skills(conn: &Connection, tree_id: TreeId) -> RepoResult<Vec<SourceSkill>> {
    let mut stmt = conn.prepare(
        "SELECT s.skill_uuid, s.name, s.background_url, s.parent_skill_uuid,
                COALESCE(l.x, 0.0), COALESCE(l.y, 0.0)
         FROM skills s
         LEFT JOIN skill_layout l ON l.skill_uuid = s.skill_uuid
         WHERE s.tree_uuid = ?1
         ORDER BY s.created_at ASC, s.skill_uuid ASC;",
    )?;
    let mut rows = stmt.query([tree_id.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        items.push(SourceSkill {
            id: parse_uuid(&id_text, "skills.skill_uuid")?,
            name: row.get(1)?,
            background_url: row.get(2)?,
            parent_id: parse_optional_uuid(row.get(3)?, "skills.parent_skill_uuid")?,
            x: row.get(4)?,
            y: row.get(5)?,
        });
    }
    Ok(items)
}

fn load_source_achievements(
    conn: &Connection,
    tree_id: TreeId,
) -> RepoResult<Vec<SourceAchievement>> {
    let mut stmt = conn.prepare(
        "SELECT a.achievement_uuid, a.title, a.description, a.background_url,
                COALESCE(l.x, 0.0), COALESCE(l.y, 0.0)
         FROM achievements a
         LEFT JOIN achievement_layout l ON l.achievement_uuid = a.achievement_uuid
         WHERE a.tree_uuid = ?1
         ORDER BY a.created_at ASC, a.achievement_uuid ASC;",
    )?;
    let mut rows = stmt.query([tree_id.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        items.push(SourceAchievement {
            id: parse_uuid(&id_text, "achievements.achievement_uuid")?,
            title: row.get(1)?,
            description: row.get(2)?,
            background_url: row.get(3)?,
            x: row.get(4)?,
            y: row.get(5)?,
        });
    }
    Ok(items)
}

fn load_source_prerequisites(
    conn: &Connection,
    tree_id: TreeId,
) -> RepoResult<Vec<SourcePrerequisite>> {
    let mut stmt = conn.prepare(
        "SELECT p.achievement_uuid, p.position, p.skill_uuid, p.required_achievement_uuid
         FROM achievement_prerequisites p
         INNER JOIN achievements a ON a.achievement_uuid = p.achievement_uuid
         WHERE a.tree_uuid = ?1;",
    )?;
    let mut rows = stmt.query([tree_id.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        items.push(SourcePrerequisite {
            achievement_id: parse_uuid(&id_text, "achievement_prerequisites.achievement_uuid")?,
            position: row.get(1)?,
            skill_id: parse_optional_uuid(row.get(2)?, "achievement_prerequisites.skill_uuid")?,
            required_achievement_id: parse_optional_uuid(
                row.get(3)?,
                "achievement_prerequisites.required_achievement_uuid",
            )?,
        });
    }
    Ok(items)
}

fn read_tree_row(row: &Row<'_>) -> RepoResult<Tree> {
    let id_text: String = row.get("tree_uuid")?;
    let user_text: String = row.get("user_uuid")?;
    let visibility_text: String = row.get("visibility")?;
    let visibility = Visibility::from_db(&visibility_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid visibility `{visibility_text}` in trees.visibility"
        ))
    })?;

    Ok(Tree {
        id: parse_uuid(&id_text, "trees.tree_uuid")?,
        user_id: parse_uuid(&user_text, "trees.user_uuid")?,
        name: row.get("name")?,
        description: row.get("description")?,
        background_url: row.get("background_url")?,
        visibility,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
