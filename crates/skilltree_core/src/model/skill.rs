//! Skill record and the per-tree skill forest.
//!
//! # Invariants
//! - `parent_skill_id`, when set, names a skill in the same tree.
//! - Following parent links from any skill terminates (forest property).
//! - `time_spent_units` is the exact integer sum of activity contributions;
//!   `time_spent_hours` is derived from it on read.

use super::activity::units_to_hours;
use super::tree::TreeId;
use super::user::UserId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type SkillId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: SkillId,
    pub tree_id: TreeId,
    pub user_id: UserId,
    pub name: String,
    pub background_url: Option<String>,
    pub time_spent_hours: f64,
    #[serde(skip)]
    pub time_spent_units: i64,
    pub parent_skill_id: Option<SkillId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Skill {
    /// Creates an unsaved skill with zero logged time.
    pub fn new(
        tree_id: TreeId,
        user_id: UserId,
        name: impl Into<String>,
        parent_skill_id: Option<SkillId>,
    ) -> Self {
        let now = super::now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            tree_id,
            user_id,
            name: name.into(),
            background_url: None,
            time_spent_hours: 0.0,
            time_spent_units: 0,
            parent_skill_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-derives `time_spent_hours` after `time_spent_units` changed.
    pub fn with_units(mut self, units: i64) -> Self {
        self.time_spent_units = units;
        self.time_spent_hours = units_to_hours(units);
        self
    }
}

/// Parent links of every skill in one tree, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SkillForest {
    parents: HashMap<SkillId, Option<SkillId>>,
}

impl SkillForest {
    pub fn from_links(links: impl IntoIterator<Item = (SkillId, Option<SkillId>)>) -> Self {
        Self {
            parents: links.into_iter().collect(),
        }
    }

    pub fn contains(&self, skill_id: SkillId) -> bool {
        self.parents.contains_key(&skill_id)
    }

    /// Returns whether making `candidate_parent` the parent of `skill_id`
    /// would close a loop.
    ///
    /// Walks the ancestor chain of `candidate_parent`; hitting `skill_id`, or
    /// revisiting any node, means a cycle. The walk is bounded by the number
    /// of skills in the tree.
    pub fn would_create_cycle(&self, skill_id: SkillId, candidate_parent: SkillId) -> bool {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent);
        while let Some(current) = cursor {
            if current == skill_id || !visited.insert(current) {
                return true;
            }
            cursor = self.parents.get(&current).copied().flatten();
        }
        false
    }

    /// Direct children of `skill_id`, sorted for deterministic writes.
    pub fn children_of(&self, skill_id: SkillId) -> Vec<SkillId> {
        let mut children: Vec<SkillId> = self
            .parents
            .iter()
            .filter(|(_, parent)| **parent == Some(skill_id))
            .map(|(child, _)| *child)
            .collect();
        children.sort();
        children
    }
}

/// Ordering for skill listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillSortMode {
    #[default]
    Name,
    /// Newest first.
    CreatedAt,
    /// Most practiced first.
    TimeSpent,
    /// Most recently updated first.
    RecentlyUsed,
}

/// Optional narrowing for skill listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkillFilter {
    #[default]
    All,
    /// Only skills without a parent.
    Roots,
    /// Only direct children of the given skill.
    ChildrenOf(SkillId),
}

impl SkillFilter {
    pub fn matches(&self, skill: &Skill) -> bool {
        match self {
            Self::All => true,
            Self::Roots => skill.parent_skill_id.is_none(),
            Self::ChildrenOf(parent) => skill.parent_skill_id == Some(*parent),
        }
    }
}

/// Sorts in place; ties fall back to id so output is deterministic.
pub fn sort_skills(skills: &mut [Skill], mode: SkillSortMode) {
    match mode {
        SkillSortMode::Name => skills.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        SkillSortMode::CreatedAt => {
            skills.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))
        }
        SkillSortMode::TimeSpent => skills.sort_by(|a, b| {
            b.time_spent_units
                .cmp(&a.time_spent_units)
                .then(a.id.cmp(&b.id))
        }),
        SkillSortMode::RecentlyUsed => {
            skills.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (SkillForest, [SkillId; 4]) {
        // root <- mid <- leaf, plus an unrelated root
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let forest = SkillForest::from_links([
            (ids[0], None),
            (ids[1], Some(ids[0])),
            (ids[2], Some(ids[1])),
            (ids[3], None),
        ]);
        (forest, ids)
    }

    #[test]
    fn reparenting_under_a_descendant_is_a_cycle() {
        let (forest, [root, mid, leaf, _]) = chain();
        assert!(forest.would_create_cycle(root, leaf));
        assert!(forest.would_create_cycle(root, mid));
        assert!(forest.would_create_cycle(mid, mid));
    }

    #[test]
    fn reparenting_under_a_non_descendant_is_allowed() {
        let (forest, [root, mid, leaf, other]) = chain();
        assert!(!forest.would_create_cycle(leaf, root));
        assert!(!forest.would_create_cycle(mid, other));
        assert!(!forest.would_create_cycle(root, other));
    }

    #[test]
    fn corrupt_loop_in_ancestors_is_reported_not_spun_on() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let forest = SkillForest::from_links([(a, Some(b)), (b, Some(a)), (outsider, None)]);
        assert!(forest.would_create_cycle(outsider, a));
    }

    #[test]
    fn children_of_lists_direct_children_only() {
        let (forest, [root, mid, _, _]) = chain();
        assert_eq!(forest.children_of(root), vec![mid]);
    }

    #[test]
    fn time_spent_sort_is_descending() {
        let tree = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut skills = vec![
            Skill::new(tree, user, "a", None).with_units(1),
            Skill::new(tree, user, "b", None).with_units(5),
        ];
        sort_skills(&mut skills, SkillSortMode::TimeSpent);
        assert_eq!(skills[0].name, "b");
        sort_skills(&mut skills, SkillSortMode::Name);
        assert_eq!(skills[0].name, "a");
    }
}
