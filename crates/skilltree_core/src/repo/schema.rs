//! Connection readiness checks and lookups shared by the repositories.
//!
//! # Invariants
//! - Repositories are only constructed over fully migrated connections.
//! - Ownership lookups filter by `user_uuid`, so a foreign row is reported
//!   exactly like a missing one.

use super::error::{RepoError, RepoResult};
use crate::db::migrations::latest_version;
use crate::model::user::UserId;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use uuid::Uuid;

/// Table name plus the columns a repository reads or writes.
pub(crate) type RequiredTable = (&'static str, &'static [&'static str]);

/// Starts a write transaction that holds the database write lock from
/// `BEGIN`, serializing every structural check with its write.
pub(crate) fn begin_write(conn: &Connection) -> RepoResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

/// Starts a read transaction so multi-query reads see one snapshot.
pub(crate) fn begin_read(conn: &Connection) -> RepoResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Deferred,
    )?)
}

pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    required: &[RequiredTable],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &(table, columns) in required {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_optional_uuid(
    value: Option<String>,
    column: &'static str,
) -> RepoResult<Option<Uuid>> {
    value.map(|value| parse_uuid(&value, column)).transpose()
}

pub(crate) fn parse_flag(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

/// Fails with `NotFound` unless `tree_id` exists and belongs to `owner`.
pub(crate) fn ensure_owned_tree(conn: &Connection, owner: UserId, tree_id: Uuid) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM trees WHERE tree_uuid = ?1 AND user_uuid = ?2
        );",
        [tree_id.to_string(), owner.to_string()],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(RepoError::NotFound {
            entity: "tree",
            id: tree_id,
        })
    }
}

/// Tree of an owned skill, or `None` when the skill is absent or foreign.
pub(crate) fn owned_skill_tree(
    conn: &Connection,
    owner: UserId,
    skill_id: Uuid,
) -> RepoResult<Option<Uuid>> {
    let tree: Option<String> = conn
        .query_row(
            "SELECT tree_uuid FROM skills WHERE skill_uuid = ?1 AND user_uuid = ?2;",
            [skill_id.to_string(), owner.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    parse_optional_uuid(tree, "skills.tree_uuid")
}

/// Tree of an owned achievement, or `None` when absent or foreign.
pub(crate) fn owned_achievement_tree(
    conn: &Connection,
    owner: UserId,
    achievement_id: Uuid,
) -> RepoResult<Option<Uuid>> {
    let tree: Option<String> = conn
        .query_row(
            "SELECT tree_uuid FROM achievements WHERE achievement_uuid = ?1 AND user_uuid = ?2;",
            [achievement_id.to_string(), owner.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    parse_optional_uuid(tree, "achievements.tree_uuid")
}

/// Whether any activity weight row references `skill_id`.
pub(crate) fn skill_has_activity_refs(conn: &Connection, skill_id: Uuid) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM activity_skill_weights WHERE skill_uuid = ?1
        );",
        [skill_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
