//! Achievement repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist achievements and their ordered prerequisite lists.
//! - Resolve prerequisite ids to skills or achievements of the same tree and
//!   run the cycle check inside the write transaction.
//!
//! # Invariants
//! - Each prerequisite row names exactly one skill or one achievement.
//! - The achievement-to-achievement edge set of a tree stays acyclic.
//! - Deleting an achievement splices it out of its dependants, which inherit
//!   its prerequisites.

use super::error::{RepoError, RepoResult};
use super::layout_repo::{insert_achievement_entry, remove_achievement_entry};
use super::schema::{
    begin_write, ensure_connection_ready, ensure_owned_tree, owned_achievement_tree,
    owned_skill_tree, parse_flag, parse_uuid, RequiredTable,
};
use crate::error::ConflictReason;
use crate::model::achievement::{Achievement, AchievementId, PrerequisiteGraph, PrerequisiteKind};
use crate::model::tree::TreeId;
use crate::model::user::UserId;
use crate::model::validation::ValidationError;
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use uuid::Uuid;

const REQUIRED: &[RequiredTable] = &[
    (
        "achievements",
        &[
            "achievement_uuid",
            "tree_uuid",
            "user_uuid",
            "title",
            "description",
            "background_url",
            "is_complete",
            "completed_at",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "achievement_prerequisites",
        &[
            "achievement_uuid",
            "position",
            "skill_uuid",
            "required_achievement_uuid",
        ],
    ),
];

const ACHIEVEMENT_COLUMNS: &str = "achievement_uuid, tree_uuid, user_uuid, title, description, \
                                   background_url, is_complete, completed_at, created_at, \
                                   updated_at";

pub trait AchievementRepository {
    /// Inserts an achievement, its prerequisite rows and its layout entry.
    fn create_achievement(&self, owner: UserId, achievement: &Achievement) -> RepoResult<()>;
    fn get_achievement(
        &self,
        owner: UserId,
        achievement_id: AchievementId,
    ) -> RepoResult<Option<Achievement>>;
    /// Every achievement of one owned tree, unordered.
    fn list_achievements(&self, owner: UserId, tree_id: TreeId) -> RepoResult<Vec<Achievement>>;
    /// Achievements listing `entity_id` (skill or achievement) as a direct
    /// prerequisite.
    fn list_dependants(&self, owner: UserId, entity_id: Uuid) -> RepoResult<Vec<Achievement>>;
    /// Loads an owned achievement inside the write transaction, lets `edit`
    /// change it and stores every mutable field. A changed prerequisite list
    /// is re-resolved and re-checked for cycles.
    fn update_achievement<F>(
        &self,
        owner: UserId,
        achievement_id: AchievementId,
        edit: F,
    ) -> RepoResult<Achievement>
    where
        F: FnOnce(&mut Achievement) -> RepoResult<()>;
    fn delete_achievement(&self, owner: UserId, achievement_id: AchievementId) -> RepoResult<()>;
}

pub struct SqliteAchievementRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAchievementRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED)?;
        Ok(Self { conn })
    }
}

impl AchievementRepository for SqliteAchievementRepository<'_> {
    fn create_achievement(&self, owner: UserId, achievement: &Achievement) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        ensure_owned_tree(&tx, owner, achievement.tree_id)?;
        let resolved = resolve_prerequisites(
            &tx,
            owner,
            achievement.tree_id,
            achievement.id,
            &achievement.prerequisites,
        )?;
        ensure_acyclic(&tx, achievement.tree_id, achievement.id, &resolved)?;

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
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                achievement.id.to_string(),
                achievement.tree_id.to_string(),
                owner.to_string(),
                achievement.title,
                achievement.description,
                achievement.background_url,
                achievement.complete as i64,
                achievement.completed_at,
                achievement.created_at,
                achievement.updated_at,
            ],
        )?;
        write_prerequisites(&tx, achievement.id, &resolved)?;
        insert_achievement_entry(&tx, achievement.id)?;

        tx.commit()?;
        Ok(())
    }

    fn get_achievement(
        &self,
        owner: UserId,
        achievement_id: AchievementId,
    ) -> RepoResult<Option<Achievement>> {
        load_achievement(self.conn, owner, achievement_id)
    }

    fn list_achievements(&self, owner: UserId, tree_id: TreeId) -> RepoResult<Vec<Achievement>> {
        ensure_owned_tree(self.conn, owner, tree_id)?;
        let sql = format!("SELECT {ACHIEVEMENT_COLUMNS} FROM achievements WHERE tree_uuid = ?1;");
        query_achievements(self.conn, &sql, [tree_id.to_string()])
    }

    fn list_dependants(&self, owner: UserId, entity_id: Uuid) -> RepoResult<Vec<Achievement>> {
        let owned = owned_skill_tree(self.conn, owner, entity_id)?.is_some()
            || owned_achievement_tree(self.conn, owner, entity_id)?.is_some();
        if !owned {
            return Err(RepoError::NotFound {
                entity: "prerequisite",
                id: entity_id,
            });
        }

        let sql = format!(
            "SELECT {ACHIEVEMENT_COLUMNS}
             FROM achievements
             WHERE achievement_uuid IN (
                SELECT achievement_uuid
                FROM achievement_prerequisites
                WHERE skill_uuid = ?1 OR required_achievement_uuid = ?1
             );"
        );
        query_achievements(self.conn, &sql, [entity_id.to_string()])
    }

    fn update_achievement<F>(
        &self,
        owner: UserId,
        achievement_id: AchievementId,
        edit: F,
    ) -> RepoResult<Achievement>
    where
        F: FnOnce(&mut Achievement) -> RepoResult<()>,
    {
        let tx = begin_write(self.conn)?;
        let current = load_achievement(&tx, owner, achievement_id)?.ok_or(RepoError::NotFound {
            entity: "achievement",
            id: achievement_id,
        })?;
        let mut achievement = current.clone();
        edit(&mut achievement)?;

        if achievement.prerequisites != current.prerequisites {
            let resolved = resolve_prerequisites(
                &tx,
                owner,
                current.tree_id,
                achievement_id,
                &achievement.prerequisites,
            )?;
            ensure_acyclic(&tx, current.tree_id, achievement_id, &resolved)?;
            write_prerequisites(&tx, achievement_id, &resolved)?;
        }

        tx.execute(
            "UPDATE achievements
             SET title = ?2,
                 description = ?3,
                 background_url = ?4,
                 is_complete = ?5,
                 completed_at = ?6,
                 updated_at = ?7
             WHERE achievement_uuid = ?1;",
            params![
                achievement_id.to_string(),
                achievement.title,
                achievement.description,
                achievement.background_url,
                achievement.complete as i64,
                achievement.completed_at,
                achievement.updated_at,
            ],
        )?;

        tx.commit()?;
        Ok(achievement)
    }

    fn delete_achievement(&self, owner: UserId, achievement_id: AchievementId) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        load_achievement(&tx, owner, achievement_id)?.ok_or(RepoError::NotFound {
            entity: "achievement",
            id: achievement_id,
        })?;

        let inherited = load_prerequisite_rows(&tx, achievement_id)?;
        let now = crate::model::now_epoch_ms();
        for dependant in load_achievement_dependants(&tx, achievement_id)? {
            let current = load_prerequisite_rows(&tx, dependant)?;
            let spliced = splice_prerequisites(&current, achievement_id, &inherited);
            write_prerequisites(&tx, dependant, &spliced)?;
            tx.execute(
                "UPDATE achievements SET updated_at = ?2 WHERE achievement_uuid = ?1;",
                params![dependant.to_string(), now],
            )?;
        }

        tx.execute(
            "DELETE FROM achievement_prerequisites WHERE achievement_uuid = ?1;",
            [achievement_id.to_string()],
        )?;
        remove_achievement_entry(&tx, achievement_id)?;
        tx.execute(
            "DELETE FROM achievements WHERE achievement_uuid = ?1;",
            [achievement_id.to_string()],
        )?;

        tx.commit()?;
        Ok(())
    }
}

/// Replaces `removed` in `current` with `inherited`, keeping first
/// appearances only.
fn splice_prerequisites(
    current: &[(Uuid, PrerequisiteKind)],
    removed: AchievementId,
    inherited: &[(Uuid, PrerequisiteKind)],
) -> Vec<(Uuid, PrerequisiteKind)> {
    let mut seen = HashSet::new();
    let mut spliced = Vec::with_capacity(current.len() + inherited.len());
    for entry in current {
        if entry.0 == removed {
            for inherited_entry in inherited {
                if seen.insert(inherited_entry.0) {
                    spliced.push(*inherited_entry);
                }
            }
        } else if seen.insert(entry.0) {
            spliced.push(*entry);
        }
    }
    spliced
}

fn resolve_prerequisites(
    conn: &Connection,
    owner: UserId,
    tree_id: TreeId,
    achievement_id: AchievementId,
    prerequisites: &[Uuid],
) -> RepoResult<Vec<(Uuid, PrerequisiteKind)>> {
    let mut resolved = Vec::with_capacity(prerequisites.len());
    for id in prerequisites.iter().copied() {
        if id == achievement_id {
            return Err(ValidationError::SelfPrerequisite(id).into());
        }
        let (kind, found_tree) = match owned_skill_tree(conn, owner, id)? {
            Some(found_tree) => (PrerequisiteKind::Skill, found_tree),
            None => match owned_achievement_tree(conn, owner, id)? {
                Some(found_tree) => (PrerequisiteKind::Achievement, found_tree),
                None => {
                    return Err(RepoError::NotFound {
                        entity: "prerequisite",
                        id,
                    })
                }
            },
        };
        if found_tree != tree_id {
            return Err(ValidationError::CrossTreeReference {
                field: "prerequisites",
                id,
            }
            .into());
        }
        resolved.push((id, kind));
    }
    Ok(resolved)
}

fn ensure_acyclic(
    conn: &Connection,
    tree_id: TreeId,
    achievement_id: AchievementId,
    resolved: &[(Uuid, PrerequisiteKind)],
) -> RepoResult<()> {
    let proposed: Vec<AchievementId> = resolved
        .iter()
        .filter(|(_, kind)| *kind == PrerequisiteKind::Achievement)
        .map(|(id, _)| *id)
        .collect();
    if proposed.is_empty() {
        return Ok(());
    }

    let graph = load_graph(conn, tree_id)?;
    if graph.would_create_cycle(achievement_id, &proposed) {
        return Err(ConflictReason::PrerequisiteCycle { achievement_id }.into());
    }
    Ok(())
}

fn load_graph(conn: &Connection, tree_id: TreeId) -> RepoResult<PrerequisiteGraph> {
    let mut stmt = conn.prepare(
        "SELECT p.achievement_uuid, p.required_achievement_uuid
         FROM achievement_prerequisites p
         INNER JOIN achievements a ON a.achievement_uuid = p.achievement_uuid
         WHERE a.tree_uuid = ?1
           AND p.required_achievement_uuid IS NOT NULL;",
    )?;
    let mut rows = stmt.query([tree_id.to_string()])?;
    let mut edges = Vec::new();
    while let Some(row) = rows.next()? {
        let from: String = row.get(0)?;
        let to: String = row.get(1)?;
        edges.push((
            parse_uuid(&from, "achievement_prerequisites.achievement_uuid")?,
            parse_uuid(&to, "achievement_prerequisites.required_achievement_uuid")?,
        ));
    }
    Ok(PrerequisiteGraph::from_edges(edges))
}

fn write_prerequisites(
    conn: &Connection,
    achievement_id: AchievementId,
    resolved: &[(Uuid, PrerequisiteKind)],
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM achievement_prerequisites WHERE achievement_uuid = ?1;",
        [achievement_id.to_string()],
    )?;
    for (position, (id, kind)) in resolved.iter().enumerate() {
        let (skill_uuid, required_uuid) = match kind {
            PrerequisiteKind::Skill => (Some(id.to_string()), None),
            PrerequisiteKind::Achievement => (None, Some(id.to_string())),
        };
        conn.execute(
            "INSERT INTO achievement_prerequisites (
                achievement_uuid,
                position,
                skill_uuid,
                required_achievement_uuid
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                achievement_id.to_string(),
                position as i64,
                skill_uuid,
                required_uuid,
            ],
        )?;
    }
    Ok(())
}

fn load_prerequisite_rows(
    conn: &Connection,
    achievement_id: AchievementId,
) -> RepoResult<Vec<(Uuid, PrerequisiteKind)>> {
    let mut stmt = conn.prepare(
        "SELECT skill_uuid, required_achievement_uuid
         FROM achievement_prerequisites
         WHERE achievement_uuid = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([achievement_id.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let skill: Option<String> = row.get(0)?;
        let required: Option<String> = row.get(1)?;
        let entry = match (skill, required) {
            (Some(skill), None) => (
                parse_uuid(&skill, "achievement_prerequisites.skill_uuid")?,
                PrerequisiteKind::Skill,
            ),
            (None, Some(required)) => (
                parse_uuid(
                    &required,
                    "achievement_prerequisites.required_achievement_uuid",
                )?,
                PrerequisiteKind::Achievement,
            ),
            _ => {
                return Err(RepoError::InvalidData(format!(
                    "prerequisite row of {achievement_id} must name exactly one entity"
                )))
            }
        };
        items.push(entry);
    }
    Ok(items)
}

fn load_achievement_dependants(
    conn: &Connection,
    achievement_id: AchievementId,
) -> RepoResult<Vec<AchievementId>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT achievement_uuid
         FROM achievement_prerequisites
         WHERE required_achievement_uuid = ?1
         ORDER BY achievement_uuid ASC;",
    )?;
    let mut rows = stmt.query([achievement_id.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, "achievement_prerequisites.achievement_uuid")?);
    }
    Ok(ids)
}

fn load_achievement(
    conn: &Connection,
    owner: UserId,
    achievement_id: AchievementId,
) -> RepoResult<Option<Achievement>> {
    let sql = format!(
        "SELECT {ACHIEVEMENT_COLUMNS}
         FROM achievements
         WHERE achievement_uuid = ?1
           AND user_uuid = ?2;"
    );
    let mut items = query_achievements(
        conn,
        &sql,
        [achievement_id.to_string(), owner.to_string()],
    )?;
    Ok(items.pop())
}

fn query_achievements<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> RepoResult<Vec<Achievement>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(read_achievement_row(row)?);
    }
    drop(rows);

    for achievement in &mut items {
        achievement.prerequisites = load_prerequisite_rows(conn, achievement.id)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
    }
    Ok(items)
}

fn read_achievement_row(row: &Row<'_>) -> RepoResult<Achievement> {
    let id_text: String = row.get("achievement_uuid")?;
    let tree_text: String = row.get("tree_uuid")?;
    let user_text: String = row.get("user_uuid")?;
    Ok(Achievement {
        id: parse_uuid(&id_text, "achievements.achievement_uuid")?,
        tree_id: parse_uuid(&tree_text, "achievements.tree_uuid")?,
        user_id: parse_uuid(&user_text, "achievements.user_uuid")?,
        title: row.get("title")?,
        description: row.get("description")?,
        background_url: row.get("background_url")?,
        prerequisites: Vec::new(),
        complete: parse_flag(row.get("is_complete")?, "achievements.is_complete")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
