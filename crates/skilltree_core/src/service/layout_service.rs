//! Layout projection use-case service.
//!
//! # Responsibility
//! - Serve the 2D projection of an owned tree.
//! - Apply batches of coordinate overwrites.
//!
//! # Invariants
//! - Projection keys always equal the tree's live skill and achievement ids.
//! - Coordinates are accepted as any finite number; display clamping is the
//!   caller's concern.

use super::{record, EntityRef};
use crate::error::EngineResult;
use crate::model::layout::{OrientationPatch, TreeLayout};
use crate::model::user::UserId;
use crate::repo::layout_repo::LayoutRepository;
use std::time::Instant;

pub struct LayoutProjector<R: LayoutRepository> {
    repo: R,
}

impl<R: LayoutRepository> LayoutProjector<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn get_layout(&self, owner: UserId, tree_id: impl EntityRef) -> EngineResult<TreeLayout> {
        let tree_id = tree_id.resolve("tree")?;
        Ok(self.repo.get_layout(owner, tree_id)?)
    }

    /// Overwrites coordinates and returns the refreshed projection.
    ///
    /// Every patch is checked before any is written: a non-finite coordinate
    /// or an id of the wrong type is a validation error, an id outside the
    /// tree is `NotFound`.
    pub fn apply_orientation(
        &self,
        owner: UserId,
        tree_id: impl EntityRef,
        patches: &[OrientationPatch],
    ) -> EngineResult<TreeLayout> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<TreeLayout> {
            let tree_id = tree_id.resolve("tree")?;
            for patch in patches {
                patch.validate()?;
            }
            self.repo.apply_orientation(owner, tree_id, patches)?;
            Ok(self.repo.get_layout(owner, tree_id)?)
        })();
        record("layout_orient", "layout_projector", started_at, result)
    }
}
