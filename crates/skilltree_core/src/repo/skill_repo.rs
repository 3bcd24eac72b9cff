//! Skill repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist skills and their parent links.
//! - Enforce the forest property against stored state inside the write
//!   transaction that changes a parent link.
//!
//! # Invariants
//! - A parent link always names a skill of the same tree and never closes a
//!   loop.
//! - Creating a skill inserts its layout entry; deleting one removes it.
//! - A skill referenced by any activity weight is never deleted.
//! - Deleting a skill moves its direct children to its own parent.

use super::error::{RepoError, RepoResult};
use super::layout_repo::{insert_skill_entry, remove_skill_entry};
use super::schema::{
    begin_write, ensure_connection_ready, ensure_owned_tree, owned_skill_tree,
    parse_optional_uuid, parse_uuid, skill_has_activity_refs, RequiredTable,
};
use crate::error::ConflictReason;
use crate::model::skill::{Skill, SkillForest, SkillId};
use crate::model::tree::TreeId;
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use rusqlite::{params, Connection, OptionalExtension, Row};

const REQUIRED: &[RequiredTable] = &[(
    "skills",
    &[
        "skill_uuid",
        "tree_uuid",
        "user_uuid",
        "name",
        "background_url",
        "time_spent_units",
        "parent_skill_uuid",
        "created_at",
        "updated_at",
    ],
)];

const SKILL_COLUMNS: &str = "skill_uuid, tree_uuid, user_uuid, name, background_url, \
                             time_spent_units, parent_skill_uuid, created_at, updated_at";

pub trait SkillRepository {
    /// Inserts a skill and its default layout entry.
    fn create_skill(&self, owner: UserId, skill: &Skill) -> RepoResult<()>;
    fn get_skill(&self, owner: UserId, skill_id: SkillId) -> RepoResult<Option<Skill>>;
    /// Every skill of one owned tree, unordered.
    fn list_skills(&self, owner: UserId, tree_id: TreeId) -> RepoResult<Vec<Skill>>;
    /// Loads an owned skill inside the write transaction, lets `edit` change
    /// it and stores name, background and parent link.
    ///
    /// A parent change is checked for cycles against the stored forest.
    fn update_skill<F>(&self, owner: UserId, skill_id: SkillId, edit: F) -> RepoResult<Skill>
    where
        F: FnOnce(&mut Skill) -> RepoResult<()>;
    fn delete_skill(&self, owner: UserId, skill_id: SkillId) -> RepoResult<()>;
}

pub struct SqliteSkillRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSkillRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED)?;
        Ok(Self { conn })
    }
}

impl SkillRepository for SqliteSkillRepository<'_> {
    fn create_skill(&self, owner: UserId, skill: &Skill) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        ensure_owned_tree(&tx, owner, skill.tree_id)?;
        if let Some(parent_id) = skill.parent_skill_id {
            ensure_parent_in_tree(&tx, owner, skill.tree_id, parent_id)?;
        }

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
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8);",
            params![
                skill.id.to_string(),
                skill.tree_id.to_string(),
                owner.to_string(),
                skill.name,
                skill.background_url,
                skill.parent_skill_id.map(|value| value.to_string()),
                skill.created_at,
                skill.updated_at,
            ],
        )?;
        insert_skill_entry(&tx, skill.id)?;

        tx.commit()?;
        Ok(())
    }

    fn get_skill(&self, owner: UserId, skill_id: SkillId) -> RepoResult<Option<Skill>> {
        load_skill(self.conn, owner, skill_id)
    }

    fn list_skills(&self, owner: UserId, tree_id: TreeId) -> RepoResult<Vec<Skill>> {
        ensure_owned_tree(self.conn, owner, tree_id)?;
        let sql = format!("SELECT {SKILL_COLUMNS} FROM skills WHERE tree_uuid = ?1;");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([tree_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(read_skill_row(row)?);
        }
        Ok(items)
    }

    fn update_skill<F>(&self, owner: UserId, skill_id: SkillId, edit: F) -> RepoResult<Skill>
    where
        F: FnOnce(&mut Skill) -> RepoResult<()>,
    {
        let tx = begin_write(self.conn)?;
        let current = load_skill(&tx, owner, skill_id)?.ok_or(RepoError::NotFound {
            entity: "skill",
            id: skill_id,
        })?;
        let mut skill = current.clone();
        edit(&mut skill)?;

        if skill.parent_skill_id != current.parent_skill_id {
            if let Some(parent_id) = skill.parent_skill_id {
                ensure_parent_in_tree(&tx, owner, current.tree_id, parent_id)?;
                let forest = load_forest(&tx, current.tree_id)?;
                if forest.would_create_cycle(skill_id, parent_id) {
                    return Err(ConflictReason::SkillCycle {
                        skill_id,
                        parent_id,
                    }
                    .into());
                }
            }
        }

        tx.execute(
            "UPDATE skills
             SET name = ?2,
                 background_url = ?3,
                 parent_skill_uuid = ?4,
                 updated_at = ?5
             WHERE skill_uuid = ?1;",
            params![
                skill_id.to_string(),
                skill.name,
                skill.background_url,
                skill.parent_skill_id.map(|value| value.to_string()),
                skill.updated_at,
            ],
        )?;

        tx.commit()?;
        Ok(skill)
    }

    fn delete_skill(&self, owner: UserId, skill_id: SkillId) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        let skill = load_skill(&tx, owner, skill_id)?.ok_or(RepoError::NotFound {
            entity: "skill",
            id: skill_id,
        })?;
        if skill_has_activity_refs(&tx, skill_id)? {
            return Err(ConflictReason::SkillReferenced { skill_id }.into());
        }

        let now = crate::model::now_epoch_ms();
        tx.execute(
            "UPDATE skills
             SET parent_skill_uuid = ?2,
                 updated_at = ?3
             WHERE parent_skill_uuid = ?1;",
            params![
                skill_id.to_string(),
                skill.parent_skill_id.map(|value| value.to_string()),
                now,
            ],
        )?;
        tx.execute(
            "DELETE FROM achievement_prerequisites WHERE skill_uuid = ?1;",
            [skill_id.to_string()],
        )?;
        remove_skill_entry(&tx, skill_id)?;
        tx.execute(
            "DELETE FROM skills WHERE skill_uuid = ?1;",
            [skill_id.to_string()],
        )?;

        tx.commit()?;
        Ok(())
    }
}

/// Parent must be an owned skill of `tree_id`.
fn ensure_parent_in_tree(
    conn: &Connection,
    owner: UserId,
    tree_id: TreeId,
    parent_id: SkillId,
) -> RepoResult<()> {
    match owned_skill_tree(conn, owner, parent_id)? {
        None => Err(RepoError::NotFound {
            entity: "skill",
            id: parent_id,
        }),
        Some(parent_tree) if parent_tree != tree_id => Err(ValidationError::CrossTreeReference {
            field: "parentSkillId",
            id: parent_id,
        }
        .into()),
        Some(_) => Ok(()),
    }
}

fn load_forest(conn: &Connection, tree_id: TreeId) -> RepoResult<SkillForest> {
    let mut stmt =
        conn.prepare("SELECT skill_uuid, parent_skill_uuid FROM skills WHERE tree_uuid = ?1;")?;
    let mut rows = stmt.query([tree_id.to_string()])?;
    let mut links = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        links.push((
            parse_uuid(&id_text, "skills.skill_uuid")?,
            parse_optional_uuid(row.get(1)?, "skills.parent_skill_uuid")?,
        ));
    }
    Ok(SkillForest::from_links(links))
}

fn load_skill(
    conn: &Connection,
    owner: UserId,
    skill_id: SkillId,
) -> RepoResult<Option<Skill>> {
    let sql = format!(
        "SELECT {SKILL_COLUMNS} FROM skills WHERE skill_uuid = ?1 AND user_uuid = ?2;"
    );
    conn.query_row(&sql, [skill_id.to_string(), owner.to_string()], |row| {
        Ok(read_skill_row(row))
    })
    .optional()?
    .transpose()
}

fn read_skill_row(row: &Row<'_>) -> RepoResult<Skill> {
    let id_text: String = row.get("skill_uuid")?;
    let tree_text: String = row.get("tree_uuid")?;
    let user_text: String = row.get("user_uuid")?;
    let units: i64 = row.get("time_spent_units")?;

    let skill = Skill {
        id: parse_uuid(&id_text, "skills.skill_uuid")?,
        tree_id: parse_uuid(&tree_text, "skills.tree_uuid")?,
        user_id: parse_uuid(&user_text, "skills.user_uuid")?,
        name: row.get("name")?,
        background_url: row.get("background_url")?,
        time_spent_hours: 0.0,
        time_spent_units: 0,
        parent_skill_id: parse_optional_uuid(
            row.get("parent_skill_uuid")?,
            "skills.parent_skill_uuid",
        )?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    Ok(skill.with_units(units))
}
