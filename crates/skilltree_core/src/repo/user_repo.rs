//! User repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Display names are unique across all users; a clash is a conflict, not a
//!   storage fault.

use super::error::{RepoError, RepoResult};
use super::schema::{begin_write, ensure_connection_ready, parse_uuid, RequiredTable};
use crate::error::ConflictReason;
use crate::model::user::{User, UserId};
use rusqlite::{params, Connection, OptionalExtension, Row};

const REQUIRED: &[RequiredTable] = &[(
    "users",
    &[
        "user_uuid",
        "display_name",
        "profile_picture_url",
        "created_at",
        "updated_at",
    ],
)];

const USER_COLUMNS: &str =
    "user_uuid, display_name, profile_picture_url, created_at, updated_at";

pub trait UserRepository {
    fn create_user(&self, user: &User) -> RepoResult<()>;
    fn get_user(&self, user_id: UserId) -> RepoResult<Option<User>>;
    fn find_by_display_name(&self, display_name: &str) -> RepoResult<Option<User>>;
    /// Loads a user inside the write transaction, lets `edit` change it and
    /// stores the mutable fields.
    fn update_user<F>(&self, user_id: UserId, edit: F) -> RepoResult<User>
    where
        F: FnOnce(&mut User) -> RepoResult<()>;
}

pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED)?;
        Ok(Self { conn })
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn create_user(&self, user: &User) -> RepoResult<()> {
        let tx = begin_write(self.conn)?;
        ensure_display_name_free(&tx, &user.display_name, None)?;
        tx.execute(
            "INSERT INTO users (
                user_uuid,
                display_name,
                profile_picture_url,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                user.id.to_string(),
                user.display_name,
                user.profile_picture_url,
                user.created_at,
                user.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_user(&self, user_id: UserId) -> RepoResult<Option<User>> {
        load_user(self.conn, user_id)
    }

    fn find_by_display_name(&self, display_name: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE display_name = ?1;");
        self.conn
            .query_row(&sql, [display_name], |row| Ok(read_user_row(row)))
            .optional()?
            .transpose()
    }

    fn update_user<F>(&self, user_id: UserId, edit: F) -> RepoResult<User>
    where
        F: FnOnce(&mut User) -> RepoResult<()>,
    {
        let tx = begin_write(self.conn)?;
        let mut user = load_user(&tx, user_id)?.ok_or(RepoError::NotFound {
            entity: "user",
            id: user_id,
        })?;
        edit(&mut user)?;
        ensure_display_name_free(&tx, &user.display_name, Some(user_id))?;

        tx.execute(
            "UPDATE users
             SET display_name = ?2,
                 profile_picture_url = ?3,
                 updated_at = ?4
             WHERE user_uuid = ?1;",
            params![
                user_id.to_string(),
                user.display_name,
                user.profile_picture_url,
                user.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(user)
    }
}

fn ensure_display_name_free(
    conn: &Connection,
    display_name: &str,
    except: Option<UserId>,
) -> RepoResult<()> {
    let holder: Option<String> = conn
        .query_row(
            "SELECT user_uuid FROM users WHERE display_name = ?1;",
            [display_name],
            |row| row.get(0),
        )
        .optional()?;
    match holder {
        Some(holder) if Some(parse_uuid(&holder, "users.user_uuid")?) != except => {
            Err(ConflictReason::DisplayNameTaken.into())
        }
        _ => Ok(()),
    }
}

fn load_user(conn: &Connection, user_id: UserId) -> RepoResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_uuid = ?1;");
    conn.query_row(&sql, [user_id.to_string()], |row| Ok(read_user_row(row)))
        .optional()?
        .transpose()
}

fn read_user_row(row: &Row<'_>) -> RepoResult<User> {
    let id_text: String = row.get("user_uuid")?;
    Ok(User {
        id: parse_uuid(&id_text, "users.user_uuid")?,
        display_name: row.get("display_name")?,
        profile_picture_url: row.get("profile_picture_url")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
