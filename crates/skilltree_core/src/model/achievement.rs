//! Achievement record and the per-tree prerequisite graph.
//!
//! # Invariants
//! - Prerequisites name skills or achievements of the same tree.
//! - Restricted to achievement-to-achievement edges, the graph is acyclic.
//! - Skill prerequisites are leaves; they never lead back to an achievement.

use super::tree::TreeId;
use super::user::UserId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type AchievementId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: AchievementId,
    pub tree_id: TreeId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub background_url: Option<String>,
    /// Skill or achievement ids, in the order the caller gave them.
    pub prerequisites: Vec<Uuid>,
    pub complete: bool,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Achievement {
    pub fn new(tree_id: TreeId, user_id: UserId, title: impl Into<String>) -> Self {
        let now = super::now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            tree_id,
            user_id,
            title: title.into(),
            description: None,
            background_url: None,
            prerequisites: Vec::new(),
            complete: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What a prerequisite id resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerequisiteKind {
    Skill,
    Achievement,
}

/// Achievement-to-achievement prerequisite edges of one tree.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    edges: HashMap<AchievementId, Vec<AchievementId>>,
}

impl PrerequisiteGraph {
    pub fn from_edges(edges: impl IntoIterator<Item = (AchievementId, AchievementId)>) -> Self {
        let mut graph = Self::default();
        for (from, to) in edges {
            graph.edges.entry(from).or_default().push(to);
        }
        graph
    }

    /// Returns whether giving `node` the achievement prerequisites `proposed`
    /// (replacing its current ones) lets `node` reach itself.
    ///
    /// Depth-first search from every proposed prerequisite over the existing
    /// edges; `node`'s own outgoing edges are the ones being replaced, so
    /// reaching `node` at all is the cycle.
    pub fn would_create_cycle(&self, node: AchievementId, proposed: &[AchievementId]) -> bool {
        let mut visited = HashSet::new();
        let mut stack: Vec<AchievementId> = proposed.to_vec();
        while let Some(current) = stack.pop() {
            if current == node {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.edges.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }
}

/// Resolves the completion pair after a write.
///
/// - `requested_complete`: `None` keeps the current flag.
/// - `requested_completed_at`: `None` means the caller omitted it; `Some(v)`
///   is taken verbatim (including `Some(None)` to clear).
/// - Omitted on a false→true transition, the timestamp is stamped `now`.
/// - Omitted on a true→false transition, the timestamp is cleared.
pub fn resolve_completion(
    current_complete: bool,
    current_completed_at: Option<i64>,
    requested_complete: Option<bool>,
    requested_completed_at: Option<Option<i64>>,
    now: i64,
) -> (bool, Option<i64>) {
    let complete = requested_complete.unwrap_or(current_complete);
    let completed_at = match requested_completed_at {
        Some(explicit) => explicit,
        None if complete && !current_complete => Some(now),
        None if !complete && current_complete => None,
        None => current_completed_at,
    };
    (complete, completed_at)
}

/// Ordering for achievement listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AchievementSortMode {
    /// Newest first.
    #[default]
    CreatedAt,
    Title,
    /// Completed ones newest-completed first, then incomplete ones.
    CompletedAt,
}

pub fn sort_achievements(achievements: &mut [Achievement], mode: AchievementSortMode) {
    match mode {
        AchievementSortMode::CreatedAt => achievements
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id))),
        AchievementSortMode::Title => {
            achievements.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)))
        }
        AchievementSortMode::CompletedAt => achievements.sort_by(|a, b| {
            b.complete
                .cmp(&a.complete)
                .then(b.completed_at.cmp(&a.completed_at))
                .then(a.id.cmp(&b.id))
        }),
    }
}

/// Incomplete achievements whose achievement prerequisites are all complete.
///
/// Skill prerequisites carry no completion state and never block.
pub fn next_achievements(achievements: &[Achievement]) -> Vec<Achievement> {
    let completion: HashMap<AchievementId, bool> = achievements
        .iter()
        .map(|achievement| (achievement.id, achievement.complete))
        .collect();
    achievements
        .iter()
        .filter(|achievement| !achievement.complete)
        .filter(|achievement| {
            achievement
                .prerequisites
                .iter()
                .all(|id| completion.get(id).copied().unwrap_or(true))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_a_two_node_loop_is_detected() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let graph = PrerequisiteGraph::from_edges([(second, first)]);
        assert!(graph.would_create_cycle(first, &[second]));
        assert!(!graph.would_create_cycle(second, &[first]));
    }

    #[test]
    fn transitive_loops_are_detected() {
        let [a, b, c, d] = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        // c -> b -> a
        let graph = PrerequisiteGraph::from_edges([(b, a), (c, b)]);
        assert!(graph.would_create_cycle(a, &[d, c]));
        assert!(!graph.would_create_cycle(d, &[c]));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let node = Uuid::new_v4();
        assert!(PrerequisiteGraph::default().would_create_cycle(node, &[node]));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let [top, left, right, bottom] =
            [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let graph = PrerequisiteGraph::from_edges([(left, bottom), (right, bottom)]);
        assert!(!graph.would_create_cycle(top, &[left, right]));
    }

    #[test]
    fn completion_transitions_stamp_and_clear() {
        assert_eq!(resolve_completion(false, None, Some(true), None, 42), (true, Some(42)));
        assert_eq!(resolve_completion(true, Some(42), Some(false), None, 99), (false, None));
        assert_eq!(
            resolve_completion(false, None, Some(true), Some(Some(7)), 99),
            (true, Some(7))
        );
        assert_eq!(
            resolve_completion(true, Some(42), Some(false), Some(Some(42)), 99),
            (false, Some(42))
        );
        assert_eq!(resolve_completion(true, Some(42), None, None, 99), (true, Some(42)));
        assert_eq!(resolve_completion(true, Some(42), Some(true), None, 99), (true, Some(42)));
    }

    #[test]
    fn next_achievements_requires_complete_achievement_prerequisites() {
        let tree = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut done = Achievement::new(tree, user, "done");
        done.complete = true;
        let open = Achievement::new(tree, user, "open");
        let mut ready = Achievement::new(tree, user, "ready");
        ready.prerequisites = vec![done.id, Uuid::new_v4()];
        let mut blocked = Achievement::new(tree, user, "blocked");
        blocked.prerequisites = vec![open.id];

        let next = next_achievements(&[done, open.clone(), ready.clone(), blocked]);
        let ids: Vec<_> = next.iter().map(|achievement| achievement.id).collect();
        assert_eq!(ids, vec![open.id, ready.id]);
    }
}
