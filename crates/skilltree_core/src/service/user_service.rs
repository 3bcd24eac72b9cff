//! User identity use-case service.
//!
//! # Responsibility
//! - Register users and maintain their profile fields.
//! - Turn the identity supplied by the caller into a `UserId` every other
//!   service is scoped to.
//!
//! # Invariants
//! - Display names match `^[A-Za-z0-9._]{3,30}$` and are unique.
//! - `authenticate` never reveals whether a malformed or unknown id was sent.

use super::{record, EntityRef};
use crate::error::{EngineError, EngineResult};
use crate::model::patch::{decode_patch, UserPatch};
use crate::model::user::{User, UserId};
use crate::model::validation::{display_name, optional_url};
use crate::repo::user_repo::UserRepository;
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

pub struct UserService<R: UserRepository> {
    repo: R,
}

impl<R: UserRepository> UserService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn create_user(
        &self,
        name: &str,
        profile_picture_url: Option<&str>,
    ) -> EngineResult<User> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<User> {
            let user = User::new(
                display_name(name)?,
                optional_url("profilePictureUrl", profile_picture_url)?,
            );
            self.repo.create_user(&user)?;
            Ok(user)
        })();
        record("user_create", "user", started_at, result)
    }

    pub fn get_user(&self, user_id: impl EntityRef) -> EngineResult<User> {
        let user_id = user_id.resolve("user")?;
        self.repo
            .get_user(user_id)?
            .ok_or_else(|| EngineError::not_found("user", user_id))
    }

    pub fn find_by_display_name(&self, name: &str) -> EngineResult<User> {
        self.repo
            .find_by_display_name(name.trim())?
            .ok_or_else(|| EngineError::not_found("user", name.trim()))
    }

    /// Applies a merge patch to the caller's own profile inside one write
    /// transaction.
    pub fn patch_user(&self, user_id: UserId, patch: Value) -> EngineResult<User> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<User> {
            let patch: UserPatch = decode_patch(patch)?;
            let user = self.repo.update_user(user_id, |user| {
                if let Some(name) = patch.display_name {
                    user.display_name = display_name(&name)?;
                }
                if let Some(url) = patch.profile_picture_url {
                    user.profile_picture_url = optional_url("profilePictureUrl", url.as_deref())?;
                }
                user.updated_at = crate::model::now_epoch_ms();
                Ok(())
            })?;
            Ok(user)
        })();
        record("user_patch", "user", started_at, result)
    }

    /// Resolves the caller identity.
    ///
    /// Absent, malformed and unknown ids all yield `Unauthenticated`.
    pub fn authenticate(&self, raw_user_id: Option<&str>) -> EngineResult<UserId> {
        let user_id = raw_user_id
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or(EngineError::Unauthenticated)?;
        match self.repo.get_user(user_id)? {
            Some(user) => Ok(user.id),
            None => Err(EngineError::Unauthenticated),
        }
    }
}
