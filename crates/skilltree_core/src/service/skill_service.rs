//! Skill hierarchy use-case service.
//!
//! # Responsibility
//! - Create, read, patch, list and delete skills of owned trees.
//! - Apply merge patches, including parent changes, on top of the stored
//!   skill before handing it to the repository's structural checks.
//!
//! # Invariants
//! - A skill's parent lies in the same tree and never closes a loop.
//! - `timeSpentHours` is never writable through this service.
//! - Delete flattens: children move to the deleted skill's parent.

use super::{record, EntityRef};
use crate::error::{EngineError, EngineResult};
use crate::model::patch::{decode_patch, SkillPatch};
use crate::model::skill::{sort_skills, Skill, SkillFilter, SkillId, SkillSortMode};
use crate::model::user::UserId;
use crate::model::validation::{optional_url, required_text, MAX_LABEL_CHARS};
use crate::repo::skill_repo::SkillRepository;
use serde_json::Value;
use std::time::Instant;

pub struct SkillHierarchy<R: SkillRepository> {
    repo: R,
}

impl<R: SkillRepository> SkillHierarchy<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates a skill with zero logged time and a default layout entry.
    pub fn create_skill(
        &self,
        owner: UserId,
        tree_id: impl EntityRef,
        name: &str,
        background_url: Option<&str>,
        parent_skill_id: Option<SkillId>,
    ) -> EngineResult<Skill> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Skill> {
            let tree_id = tree_id.resolve("tree")?;
            let mut skill = Skill::new(
                tree_id,
                owner,
                required_text("name", name, MAX_LABEL_CHARS)?,
                parent_skill_id,
            );
            skill.background_url = optional_url("backgroundUrl", background_url)?;
            self.repo.create_skill(owner, &skill)?;
            Ok(skill)
        })();
        record("skill_create", "skill_hierarchy", started_at, result)
    }

    pub fn get_skill(&self, owner: UserId, skill_id: impl EntityRef) -> EngineResult<Skill> {
        let skill_id = skill_id.resolve("skill")?;
        self.repo
            .get_skill(owner, skill_id)?
            .ok_or_else(|| EngineError::not_found("skill", skill_id))
    }

    pub fn list_skills(
        &self,
        owner: UserId,
        tree_id: impl EntityRef,
        filter: SkillFilter,
        sort: SkillSortMode,
    ) -> EngineResult<Vec<Skill>> {
        let tree_id = tree_id.resolve("tree")?;
        let mut skills: Vec<Skill> = self
            .repo
            .list_skills(owner, tree_id)?
            .into_iter()
            .filter(|skill| filter.matches(skill))
            .collect();
        sort_skills(&mut skills, sort);
        Ok(skills)
    }

    /// Applies a merge patch of `name`, `backgroundUrl` and `parentSkillId`
    /// to the stored skill inside one write transaction.
    ///
    /// A `null` parent detaches the skill to the tree root.
    pub fn patch_skill(
        &self,
        owner: UserId,
        skill_id: impl EntityRef,
        patch: Value,
    ) -> EngineResult<Skill> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Skill> {
            let patch: SkillPatch = decode_patch(patch)?;
            let skill_id = skill_id.resolve("skill")?;
            let parent = patch
                .parent_skill_id
                .map(|parent| parent.map(|raw| raw.resolve("skill")).transpose())
                .transpose()?;
            let skill = self.repo.update_skill(owner, skill_id, |skill| {
                if let Some(name) = patch.name {
                    skill.name = required_text("name", &name, MAX_LABEL_CHARS)?;
                }
                if let Some(url) = patch.background_url {
                    skill.background_url = optional_url("backgroundUrl", url.as_deref())?;
                }
                if let Some(parent) = parent {
                    skill.parent_skill_id = parent;
                }
                skill.updated_at = crate::model::now_epoch_ms();
                Ok(())
            })?;
            Ok(skill)
        })();
        record("skill_patch", "skill_hierarchy", started_at, result)
    }

    pub fn delete_skill(&self, owner: UserId, skill_id: impl EntityRef) -> EngineResult<()> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<()> {
            let skill_id = skill_id.resolve("skill")?;
            self.repo.delete_skill(owner, skill_id)?;
            Ok(())
        })();
        record("skill_delete", "skill_hierarchy", started_at, result)
    }
}
