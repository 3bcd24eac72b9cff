//! Activity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist activities with their ordered weighted-skill rows.
//! - Keep `skills.time_spent_units` equal to the sum of stored contributions.
//! - Merge edits into the stored activity inside the transaction that
//!   writes them, so concurrent patches never revert each other.
//!
//! # Invariants
//! - Each weight row stores the exact integer contribution it added; reversal
//!   subtracts that stored value, never a recomputed one.
//! - Record writes and aggregate updates commit together or not at all.
//! - Every weighted skill belongs to the activity owner.

use super::error::{RepoError, RepoResult};
use super::schema::{
    begin_write, ensure_connection_ready, owned_skill_tree, parse_uuid, RequiredTable,
};
use crate::model::activity::{Activity, ActivityId, WeightedSkill};
use crate::model::skill::SkillId;
use crate::model::user::UserId;
use rusqlite::{params, Connection, Row};

const REQUIRED: &[RequiredTable] = &[
    (
        "activities",
        &[
            "activity_uuid",
            "user_uuid",
            "name",
            "description",
            "duration_hours",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "activity_skill_weights",
        &[
            "activity_uuid",
            "position",
            "skill_uuid",
            "weight",
            "contribution_units",
        ],
    ),
];

const ACTIVITY_COLUMNS: &str =
    "activity_uuid, user_uuid, name, description, duration_hours, created_at, updated_at";

pub trait ActivityRepository {
    /// Inserts an activity and adds its contributions to every weighted skill.
    fn create_activity(&self, owner: UserId, activity: &Activity) -> RepoResult<()>;
    fn get_activity(&self, owner: UserId, activity_id: ActivityId)
        -> RepoResult<Option<Activity>>;
    /// Owned activities, newest first, optionally only those weighting `skill_id`.
    fn list_activities(
        &self,
        owner: UserId,
        skill_id: Option<SkillId>,
    ) -> RepoResult<Vec<Activity>>;
    /// Loads an owned activity inside the write transaction, lets `edit`
    /// change it and stores it. When duration or weights changed, the stored
    /// contributions are reversed and the new ones applied.
    ///
    /// Returns the stored activity and whether its contributions were redone.
    fn update_activity<F>(
        &self,
        owner: UserId,
        activity_id: ActivityId,
        edit: F,
    ) -> RepoResult<(Activity, bool)>
    where
        F: FnOnce(&mut Activity) -> RepoResult<()>;
    /// Reverses the stored contributions, then removes the activity.
    fn delete_activity(&self, owner: UserId, activity_id: ActivityId) -> RepoResult<()>;
    /// Reverses and removes every activity of `owner`; returns how many.
    fn delete_all_activities(&self, owner: UserId) -> RepoResult<usize>;
    /// Creation times of owned activities created at or after `since`.
    fn activity_times_since(&self, owner: UserId, since: i64) -> RepoResult<Vec<i64>>;
}

pub struct SqliteActivityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteActivityRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED)?;
        Ok(Self { conn })
    }
}

impl ActivityRepository for SqliteActivityRepository<'_> {
    fn create_activity(&self, owner: UserId, activity: &Activity) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        ensure_skills_owned(&tx, owner, &activity.weighted_skills)?;

        tx.execute(
            "INSERT INTO activities (
                activity_uuid,
                user_uuid,
                name,
                description,
                duration_hours,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                activity.id.to_string(),
                owner.to_string(),
                activity.name,
                activity.description,
                activity.duration,
                activity.created_at,
                activity.updated_at,
            ],
        )?;
        apply_contributions(&tx, activity)?;

        tx.commit()?;
        Ok(())
    }

    fn get_activity(
        &self,
        owner: UserId,
        activity_id: ActivityId,
    ) -> RepoResult<Option<Activity>> {
        load_activity(self.conn, owner, activity_id)
    }

    fn list_activities(
        &self,
        owner: UserId,
        skill_id: Option<SkillId>,
    ) -> RepoResult<Vec<Activity>> {
        let mut items = Vec::new();
        match skill_id {
            Some(skill_id) => {
                if owned_skill_tree(self.conn, owner, skill_id)?.is_none() {
                    return Err(RepoError::NotFound {
                        entity: "skill",
                        id: skill_id,
                    });
                }
                let sql = format!(
                    "SELECT {ACTIVITY_COLUMNS}
                     FROM activities
                     WHERE user_uuid = ?1
                       AND activity_uuid IN (
                         SELECT activity_uuid FROM activity_skill_weights WHERE skill_uuid = ?2
                       )
                     ORDER BY created_at DESC, activity_uuid ASC;"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let mut rows = stmt.query([owner.to_string(), skill_id.to_string()])?;
                while let Some(row) = rows.next()? {
                    items.push(read_activity_row(row)?);
                }
            }
            None => {
                let sql = format!(
                    "SELECT {ACTIVITY_COLUMNS}
                     FROM activities
                     WHERE user_uuid = ?1
                     ORDER BY created_at DESC, activity_uuid ASC;"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let mut rows = stmt.query([owner.to_string()])?;
                while let Some(row) = rows.next()? {
                    items.push(read_activity_row(row)?);
                }
            }
        }

        for activity in &mut items {
            activity.weighted_skills = load_weights(self.conn, activity.id)?
                .into_iter()
                .map(|(entry, _)| entry)
                .collect();
        }
        Ok(items)
    }

    fn update_activity<F>(
        &self,
        owner: UserId,
        activity_id: ActivityId,
        edit: F,
    ) -> RepoResult<(Activity, bool)>
    where
        F: FnOnce(&mut Activity) -> RepoResult<()>,
    {
        let tx = begin_write(self.conn)?;
        let current = load_activity(&tx, owner, activity_id)?.ok_or(RepoError::NotFound {
            entity: "activity",
            id: activity_id,
        })?;
        let mut activity = current.clone();
        edit(&mut activity)?;

        let aggregation_changed = current.duration != activity.duration
            || current.weighted_skills != activity.weighted_skills;
        if aggregation_changed {
            ensure_skills_owned(&tx, owner, &activity.weighted_skills)?;
            reverse_contributions(&tx, activity_id, activity.updated_at)?;
        }

        tx.execute(
            "UPDATE activities
             SET name = ?2,
                 description = ?3,
                 duration_hours = ?4,
                 updated_at = ?5
             WHERE activity_uuid = ?1;",
            params![
                activity_id.to_string(),
                activity.name,
                activity.description,
                activity.duration,
                activity.updated_at,
            ],
        )?;
        if aggregation_changed {
            apply_contributions(&tx, &activity)?;
        }

        tx.commit()?;
        Ok((activity, aggregation_changed))
    }

    fn delete_activity(&self, owner: UserId, activity_id: ActivityId) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        load_activity(&tx, owner, activity_id)?.ok_or(RepoError::NotFound {
            entity: "activity",
            id: activity_id,
        })?;

        reverse_contributions(&tx, activity_id, crate::model::now_epoch_ms())?;
        tx.execute(
            "DELETE FROM activities WHERE activity_uuid = ?1;",
            [activity_id.to_string()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_all_activities(&self, owner: UserId) -> RepoResult<usize> {
        let tx = begin_write(self.conn)?;
        let activity_ids = owned_activity_ids(&tx, owner)?;
        let now = crate::model::now_epoch_ms();
        for &activity_id in &activity_ids {
            reverse_contributions(&tx, activity_id, now)?;
        }
        tx.execute(
            "DELETE FROM activities WHERE user_uuid = ?1;",
            [owner.to_string()],
        )?;

        tx.commit()?;
        Ok(activity_ids.len())
    }

    fn activity_times_since(&self, owner: UserId, since: i64) -> RepoResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT created_at
             FROM activities
             WHERE user_uuid = ?1
               AND created_at >= ?2
             ORDER BY created_at ASC;",
        )?;
        let mut rows = stmt.query(params![owner.to_string(), since])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(row.get(0)?);
        }
        Ok(items)
    }
}

fn owned_activity_ids(conn: &Connection, owner: UserId) -> RepoResult<Vec<ActivityId>> {
    let mut stmt = conn.prepare("SELECT activity_uuid FROM activities WHERE user_uuid = ?1;")?;
    let mut rows = stmt.query([owner.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        items.push(parse_uuid(&id_text, "activities.activity_uuid")?);
    }
    Ok(items)
}

fn ensure_skills_owned(
    conn: &Connection,
    owner: UserId,
    weighted_skills: &[WeightedSkill],
) -> RepoResult<()> {
    for entry in weighted_skills {
        if owned_skill_tree(conn, owner, entry.skill_id)?.is_none() {
            return Err(RepoError::NotFound {
                entity: "skill",
                id: entry.skill_id,
            });
        }
    }
    Ok(())
}

/// Writes the weight rows of `activity` and adds each contribution to its skill.
fn apply_contributions(conn: &Connection, activity: &Activity) -> RepoResult<()> {
    for (position, (entry, units)) in activity
        .weighted_skills
        .iter()
        .zip(activity.contributions().into_iter().map(|(_, units)| units))
        .enumerate()
    {
        conn.execute(
            "INSERT INTO activity_skill_weights (
                activity_uuid,
                position,
                skill_uuid,
                weight,
                contribution_units
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                activity.id.to_string(),
                position as i64,
                entry.skill_id.to_string(),
                entry.weight,
                units,
            ],
        )?;
        conn.execute(
            "UPDATE skills
             SET time_spent_units = time_spent_units + ?2,
                 updated_at = ?3
             WHERE skill_uuid = ?1;",
            params![entry.skill_id.to_string(), units, activity.updated_at],
        )?;
    }
    Ok(())
}

/// Subtracts every stored contribution of `activity_id` and drops its weight rows.
fn reverse_contributions(conn: &Connection, activity_id: ActivityId, now: i64) -> RepoResult<()> {
    for (entry, units) in load_weights(conn, activity_id)? {
        conn.execute(
            "UPDATE skills
             SET time_spent_units = time_spent_units - ?2,
                 updated_at = ?3
             WHERE skill_uuid = ?1;",
            params![entry.skill_id.to_string(), units, now],
        )?;
    }
    conn.execute(
        "DELETE FROM activity_skill_weights WHERE activity_uuid = ?1;",
        [activity_id.to_string()],
    )?;
    Ok(())
}

/// Weight rows in list order, each with its stored contribution.
fn load_weights(
    conn: &Connection,
    activity_id: ActivityId,
) -> RepoResult<Vec<(WeightedSkill, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT skill_uuid, weight, contribution_units
         FROM activity_skill_weights
         WHERE activity_uuid = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([activity_id.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let skill_text: String = row.get(0)?;
        items.push((
            WeightedSkill {
                skill_id: parse_uuid(&skill_text, "activity_skill_weights.skill_uuid")?,
                weight: row.get(1)?,
            },
            row.get(2)?,
        ));
    }
    Ok(items)
}

fn load_activity(
    conn: &Connection,
    owner: UserId,
    activity_id: ActivityId,
) -> RepoResult<Option<Activity>> {
    let sql = format!(
        "SELECT {ACTIVITY_COLUMNS}
         FROM activities
         WHERE activity_uuid = ?1
           AND user_uuid = ?2;"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([activity_id.to_string(), owner.to_string()])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut activity = read_activity_row(row)?;
    activity.weighted_skills = load_weights(conn, activity_id)?
        .into_iter()
        .map(|(entry, _)| entry)
        .collect();
    Ok(Some(activity))
}

fn read_activity_row(row: &Row<'_>) -> RepoResult<Activity> {
    let id_text: String = row.get("activity_uuid")?;
    let user_text: String = row.get("user_uuid")?;
    Ok(Activity {
        id: parse_uuid(&id_text, "activities.activity_uuid")?,
        user_id: parse_uuid(&user_text, "activities.user_uuid")?,
        name: row.get("name")?,
        description: row.get("description")?,
        duration: row.get("duration_hours")?,
        weighted_skills: Vec::new(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
