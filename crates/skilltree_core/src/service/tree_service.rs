//! Tree registry use-case service.
//!
//! # Responsibility
//! - Create, read, patch and delete trees for the authenticated owner.
//! - Serve per-tree and per-user statistics and the favorite tree.
//! - Page through public trees and copy one into the caller's account.
//!
//! # Invariants
//! - Another user's tree is indistinguishable from a missing one.
//! - Tree names match `^[A-Za-z0-9._ ]{3,50}$`.
//! - Deleting a tree cascades to its skills, achievements and layout, and is
//!   refused while any activity weights one of its skills.

use super::{record, EntityRef};
use crate::error::{EngineError, EngineResult};
use crate::model::patch::{decode_patch, TreePatch};
use crate::model::tree::{FavoriteTree, Tree, TreeStats, Visibility};
use crate::model::user::UserId;
use crate::model::validation::{
    optional_text, optional_url, tree_name, ValidationError, MAX_DESCRIPTION_CHARS,
};
use crate::repo::tree_repo::TreeRepository;
use serde_json::Value;
use std::time::Instant;

/// Largest page `list_public_trees` serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Ownership-scoped tree registry.
pub struct TreeStore<R: TreeRepository> {
    repo: R,
}

impl<R: TreeRepository> TreeStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates a tree and its empty layout.
    pub fn create_tree(
        &self,
        owner: UserId,
        name: &str,
        description: Option<&str>,
        background_url: Option<&str>,
        visibility: Option<Visibility>,
    ) -> EngineResult<Tree> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Tree> {
            let mut tree = Tree::new(owner, tree_name(name)?, visibility.unwrap_or_default());
            tree.description = optional_text("description", description, MAX_DESCRIPTION_CHARS)?;
            tree.background_url = optional_url("backgroundUrl", background_url)?;
            self.repo.create_tree(&tree)?;
            Ok(tree)
        })();
        record("tree_create", "tree_store", started_at, result)
    }

    pub fn get_tree(&self, owner: UserId, tree_id: impl EntityRef) -> EngineResult<Tree> {
        let tree_id = tree_id.resolve("tree")?;
        self.repo
            .get_tree(owner, tree_id)?
            .ok_or_else(|| EngineError::not_found("tree", tree_id))
    }

    /// Owned trees, newest first.
    pub fn list_trees(&self, owner: UserId) -> EngineResult<Vec<Tree>> {
        Ok(self.repo.list_trees(owner)?)
    }

    /// One zero-based page of `PUBLIC` trees across all users, newest first.
    pub fn list_public_trees(&self, page: u32, size: u32) -> EngineResult<Vec<Tree>> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "size",
                value: f64::from(size),
            }
            .into());
        }
        let offset = page.checked_mul(size).ok_or(ValidationError::OutOfRange {
            field: "page",
            value: f64::from(page),
        })?;
        Ok(self.repo.list_public_trees(offset, size)?)
    }

    /// Applies a merge patch of `name`, `description`, `backgroundUrl` and
    /// `visibility`; any other field is rejected.
    pub fn patch_tree(
        &self,
        owner: UserId,
        tree_id: impl EntityRef,
        patch: Value,
    ) -> EngineResult<Tree> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Tree> {
            let patch: TreePatch = decode_patch(patch)?;
            let tree_id = tree_id.resolve("tree")?;
            let tree = self.repo.update_tree(owner, tree_id, |tree| {
                if let Some(name) = patch.name {
                    tree.name = tree_name(&name)?;
                }
                if let Some(description) = patch.description {
                    tree.description = optional_text(
                        "description",
                        description.as_deref(),
                        MAX_DESCRIPTION_CHARS,
                    )?;
                }
                if let Some(url) = patch.background_url {
                    tree.background_url = optional_url("backgroundUrl", url.as_deref())?;
                }
                if let Some(visibility) = patch.visibility {
                    tree.visibility = visibility;
                }
                tree.updated_at = crate::model::now_epoch_ms();
                Ok(())
            })?;
            Ok(tree)
        })();
        record("tree_patch", "tree_store", started_at, result)
    }

    pub fn delete_tree(&self, owner: UserId, tree_id: impl EntityRef) -> EngineResult<()> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<()> {
            let tree_id = tree_id.resolve("tree")?;
            self.repo.delete_tree(owner, tree_id)?;
            Ok(())
        })();
        record("tree_delete", "tree_store", started_at, result)
    }

    pub fn tree_stats(&self, owner: UserId, tree_id: impl EntityRef) -> EngineResult<TreeStats> {
        let tree_id = tree_id.resolve("tree")?;
        Ok(self.repo.tree_stats(owner, tree_id)?)
    }

    /// Counters summed over every tree the caller owns.
    pub fn user_stats(&self, owner: UserId) -> EngineResult<TreeStats> {
        Ok(self.repo.user_stats(owner)?)
    }

    pub fn favorite_tree(&self, owner: UserId) -> EngineResult<Option<FavoriteTree>> {
        Ok(self.repo.favorite_tree(owner)?)
    }

    /// Copies one of the caller's trees, or any `PUBLIC` tree, into the
    /// caller's account. The copy starts with zero logged time and no
    /// completed achievements.
    pub fn copy_tree(&self, owner: UserId, source_tree_id: impl EntityRef) -> EngineResult<Tree> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Tree> {
            let source_tree_id = source_tree_id.resolve("tree")?;
            Ok(self.repo.copy_tree(owner, source_tree_id)?)
        })();
        record("tree_copy", "tree_store", started_at, result)
    }

    /// Deletes every tree the caller owns; returns how many were removed.
    pub fn delete_all_trees(&self, owner: UserId) -> EngineResult<usize> {
        let started_at = Instant::now();
        let result = self.repo.delete_all_trees(owner).map_err(Into::into);
        record("tree_delete_all", "tree_store", started_at, result)
    }
}
