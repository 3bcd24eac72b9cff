use rusqlite::Connection;
use serde_json::json;
use skilltree_core::db::open_db_in_memory;
use skilltree_core::{
    AchievementGraph, AchievementSortMode, ActivityAggregator, ConflictReason, EngineError,
    ErrorKind, LayoutNodeKind, LayoutProjector, OrientationPatch, SkillFilter, SkillHierarchy,
    SkillId, SkillSortMode, SqliteAchievementRepository, SqliteActivityRepository,
    SqliteLayoutRepository, SqliteSkillRepository, SqliteTreeRepository, SqliteUserRepository,
    TreeId, TreeStore, UserId, UserService, ValidationError, Visibility, WeightedSkill,
    MAX_USER_NODES,
};
use std::collections::{BTreeSet, HashMap};

fn setup() -> (Connection, UserId) {
    let conn = open_db_in_memory().unwrap();
    let owner = create_user(&conn, "ada");
    (conn, owner)
}

fn create_user(conn: &Connection, name: &str) -> UserId {
    UserService::new(SqliteUserRepository::try_new(conn).unwrap())
        .create_user(name, None)
        .unwrap()
        .id
}

fn trees(conn: &Connection) -> TreeStore<SqliteTreeRepository<'_>> {
    TreeStore::new(SqliteTreeRepository::try_new(conn).unwrap())
}

fn skills(conn: &Connection) -> SkillHierarchy<SqliteSkillRepository<'_>> {
    SkillHierarchy::new(SqliteSkillRepository::try_new(conn).unwrap())
}

fn achievements(conn: &Connection) -> AchievementGraph<SqliteAchievementRepository<'_>> {
    AchievementGraph::new(SqliteAchievementRepository::try_new(conn).unwrap())
}

fn activities(conn: &Connection) -> ActivityAggregator<SqliteActivityRepository<'_>> {
    ActivityAggregator::new(SqliteActivityRepository::try_new(conn).unwrap())
}

fn layouts(conn: &Connection) -> LayoutProjector<SqliteLayoutRepository<'_>> {
    LayoutProjector::new(SqliteLayoutRepository::try_new(conn).unwrap())
}

fn log_time(conn: &Connection, owner: UserId, skill_id: SkillId, hours: f64) {
    activities(conn)
        .create_activity(
            owner,
            "Practice",
            "",
            hours,
            vec![WeightedSkill {
                skill_id,
                weight: 1.0,
            }],
        )
        .unwrap();
}

#[test]
fn create_get_and_list_trees() {
    let (conn, owner) = setup();
    let store = trees(&conn);

    let tree = store
        .create_tree(owner, "Guitar", Some("strings"), None, None)
        .unwrap();
    assert_eq!(tree.visibility, Visibility::Private);
    assert_eq!(tree.description.as_deref(), Some("strings"));

    let loaded = store.get_tree(owner, tree.id).unwrap();
    assert_eq!(loaded, tree);
    let by_text = store.get_tree(owner, tree.id.to_string()).unwrap();
    assert_eq!(by_text, tree);

    store
        .create_tree(owner, "Cooking", None, None, Some(Visibility::Public))
        .unwrap();
    let listed = store.list_trees(owner).unwrap();
    assert_eq!(listed.len(), 2);
}

#[test]
fn tree_names_are_validated() {
    let (conn, owner) = setup();
    let store = trees(&conn);

    let too_long = "x".repeat(51);
    for name in ["", "ab", "bad/name", too_long.as_str()] {
        let err = store.create_tree(owner, name, None, None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "name {name:?}");
    }
    assert!(store.list_trees(owner).unwrap().is_empty());
}

#[test]
fn other_users_cannot_see_or_touch_a_tree() {
    let (conn, owner) = setup();
    let intruder = create_user(&conn, "mallory");
    let store = trees(&conn);
    let tree = store.create_tree(owner, "Guitar", None, None, None).unwrap();

    assert!(matches!(
        store.get_tree(intruder, tree.id).unwrap_err(),
        EngineError::NotFound { entity: "tree", .. }
    ));
    assert_eq!(
        store
            .patch_tree(intruder, tree.id, json!({ "name": "Stolen" }))
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        store.delete_tree(intruder, tree.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(store.list_trees(intruder).unwrap().is_empty());
    assert_eq!(store.get_tree(owner, tree.id).unwrap().name, "Guitar");
}

#[test]
fn malformed_ids_read_as_not_found() {
    let (conn, owner) = setup();
    let err = trees(&conn).get_tree(owner, "not-a-uuid").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn patch_tree_applies_known_fields_and_rejects_unknown_ones() {
    let (conn, owner) = setup();
    let store = trees(&conn);
    let tree = store
        .create_tree(owner, "Guitar", Some("strings"), None, None)
        .unwrap();

    let patched = store
        .patch_tree(
            owner,
            tree.id,
            json!({ "name": "Bass Guitar", "description": null, "visibility": "FRIENDS" }),
        )
        .unwrap();
    assert_eq!(patched.name, "Bass Guitar");
    assert_eq!(patched.description, None);
    assert_eq!(patched.visibility, Visibility::Friends);
    assert_eq!(store.get_tree(owner, tree.id).unwrap(), patched);

    let err = store
        .patch_tree(owner, tree.id, json!({ "userId": owner }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = store
        .patch_tree(owner, tree.id, json!({ "name": null }))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.get_tree(owner, tree.id).unwrap(), patched);
}

#[test]
fn deleting_a_tree_removes_its_skills_and_achievements() {
    let (conn, owner) = setup();
    let store = trees(&conn);
    let skills = SkillHierarchy::new(SqliteSkillRepository::try_new(&conn).unwrap());
    let achievements =
        AchievementGraph::new(SqliteAchievementRepository::try_new(&conn).unwrap());

    let tree = store.create_tree(owner, "Guitar", None, None, None).unwrap();
    let root = skills
        .create_skill(owner, tree.id, "Chords", None, None)
        .unwrap();
    let child = skills
        .create_skill(owner, tree.id, "Barre", None, Some(root.id))
        .unwrap();
    let goal = achievements
        .create_achievement(owner, tree.id, "First song", None, None, &[child.id])
        .unwrap();

    store.delete_tree(owner, tree.id).unwrap();

    assert_eq!(store.get_tree(owner, tree.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(skills.get_skill(owner, root.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(skills.get_skill(owner, child.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        achievements.get_achievement(owner, goal.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        skills
            .list_skills(owner, tree.id, SkillFilter::All, SkillSortMode::Name)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn deleting_a_tree_with_logged_activity_is_a_conflict() {
    let (conn, owner) = setup();
    let store = trees(&conn);
    let skills = SkillHierarchy::new(SqliteSkillRepository::try_new(&conn).unwrap());
    let activities = ActivityAggregator::new(SqliteActivityRepository::try_new(&conn).unwrap());

    let tree = store.create_tree(owner, "Guitar", None, None, None).unwrap();
    let skill = skills
        .create_skill(owner, tree.id, "Chords", None, None)
        .unwrap();
    activities
        .create_activity(
            owner,
            "Practice",
            "",
            1.0,
            vec![WeightedSkill {
                skill_id: skill.id,
                weight: 1.0,
            }],
        )
        .unwrap();

    let err = store.delete_tree(owner, tree.id).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictReason::TreeSkillsReferenced { .. })
    ));
    assert!(store.get_tree(owner, tree.id).is_ok());
    assert!(skills.get_skill(owner, skill.id).is_ok());
}

#[test]
fn tree_stats_sum_time_and_count_completion() {
    let (conn, owner) = setup();
    let store = trees(&conn);
    let skills = SkillHierarchy::new(SqliteSkillRepository::try_new(&conn).unwrap());
    let achievements =
        AchievementGraph::new(SqliteAchievementRepository::try_new(&conn).unwrap());
    let activities = ActivityAggregator::new(SqliteActivityRepository::try_new(&conn).unwrap());

    let tree = store.create_tree(owner, "Guitar", None, None, None).unwrap();
    let empty = store.tree_stats(owner, tree.id).unwrap();
    assert_eq!(empty.total_skills, 0);
    assert_eq!(empty.total_time_logged, 0.0);

    let a = skills.create_skill(owner, tree.id, "Chords", None, None).unwrap();
    let b = skills.create_skill(owner, tree.id, "Scales", None, None).unwrap();
    activities
        .create_activity(
            owner,
            "Practice",
            "",
            3.0,
            vec![
                WeightedSkill { skill_id: a.id, weight: 0.5 },
                WeightedSkill { skill_id: b.id, weight: 0.5 },
            ],
        )
        .unwrap();
    let done = achievements
        .create_achievement(owner, tree.id, "Strum", None, None, &[])
        .unwrap();
    achievements
        .create_achievement(owner, tree.id, "Solo", None, None, &[])
        .unwrap();
    achievements
        .patch_achievement(owner, done.id, json!({ "complete": true }))
        .unwrap();

    let stats = store.tree_stats(owner, tree.id).unwrap();
    assert_eq!(stats.total_skills, 2);
    assert_eq!(stats.total_achievements, 2);
    assert_eq!(stats.achievements_completed, 1);
    assert_eq!(stats.total_time_logged, 3.0);
}

#[test]
fn user_stats_sum_every_owned_tree() {
    let (conn, owner) = setup();
    let other = create_user(&conn, "grace");
    let store = trees(&conn);
    assert_eq!(store.user_stats(owner).unwrap().total_skills, 0);

    let guitar = store.create_tree(owner, "Guitar", None, None, None).unwrap();
    let cooking = store.create_tree(owner, "Cooking", None, None, None).unwrap();
    let foreign = store.create_tree(other, "Chess", None, None, None).unwrap();
    let chords = skills(&conn)
        .create_skill(owner, guitar.id, "Chords", None, None)
        .unwrap();
    let knives = skills(&conn)
        .create_skill(owner, cooking.id, "Knife work", None, None)
        .unwrap();
    let openings = skills(&conn)
        .create_skill(other, foreign.id, "Openings", None, None)
        .unwrap();
    let goal = achievements(&conn)
        .create_achievement(owner, cooking.id, "Omelette", None, None, &[])
        .unwrap();
    achievements(&conn)
        .patch_achievement(owner, goal.id, json!({ "complete": true }))
        .unwrap();
    log_time(&conn, owner, chords.id, 1.5);
    log_time(&conn, owner, knives.id, 2.0);
    log_time(&conn, other, openings.id, 9.0);

    let stats = store.user_stats(owner).unwrap();
    assert_eq!(stats.total_skills, 2);
    assert_eq!(stats.total_achievements, 1);
    assert_eq!(stats.achievements_completed, 1);
    assert_eq!(stats.total_time_logged, 3.5);
}

#[test]
fn favorite_tree_is_the_one_with_most_logged_time() {
    let (conn, owner) = setup();
    let store = trees(&conn);
    assert_eq!(store.favorite_tree(owner).unwrap(), None);

    let guitar = store.create_tree(owner, "Guitar", None, None, None).unwrap();
    let cooking = store
        .create_tree(owner, "Cooking", None, Some("https://example.com/pan.png"), None)
        .unwrap();
    let chords = skills(&conn)
        .create_skill(owner, guitar.id, "Chords", None, None)
        .unwrap();
    let knives = skills(&conn)
        .create_skill(owner, cooking.id, "Knife work", None, None)
        .unwrap();
    let dicing = skills(&conn)
        .create_skill(owner, cooking.id, "Dicing", None, Some(knives.id))
        .unwrap();
    log_time(&conn, owner, chords.id, 3.0);
    log_time(&conn, owner, knives.id, 1.0);
    log_time(&conn, owner, dicing.id, 2.5);

    let favorite = store.favorite_tree(owner).unwrap().unwrap();
    assert_eq!(favorite.tree_id, cooking.id);
    assert_eq!(favorite.name, "Cooking");
    assert_eq!(favorite.background_url, cooking.background_url);
    assert_eq!(favorite.stats.total_time_logged, 3.5);
    assert_eq!(favorite.stats.total_skills, 2);

    let json = serde_json::to_value(&favorite).unwrap();
    assert_eq!(json["treeId"], json!(cooking.id));
    assert_eq!(json["totalTimeLogged"], json!(3.5));
}

#[test]
fn public_trees_page_across_users() {
    let (conn, owner) = setup();
    let other = create_user(&conn, "grace");
    let store = trees(&conn);
    let mut public = BTreeSet::new();
    for (user, name) in [(owner, "Guitar"), (other, "Chess"), (other, "Cooking")] {
        let tree = store
            .create_tree(user, name, None, None, Some(Visibility::Public))
            .unwrap();
        public.insert(tree.id);
    }
    store
        .create_tree(owner, "Diary", None, None, Some(Visibility::Private))
        .unwrap();
    store
        .create_tree(other, "Budget", None, None, Some(Visibility::Friends))
        .unwrap();

    let first = store.list_public_trees(0, 2).unwrap();
    let second = store.list_public_trees(1, 2).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert!(first[0].created_at >= first[1].created_at);
    let seen: BTreeSet<TreeId> = first.iter().chain(&second).map(|tree| tree.id).collect();
    assert_eq!(seen, public);
    assert!(store.list_public_trees(2, 2).unwrap().is_empty());

    for (page, size) in [(0, 0), (0, 101), (u32::MAX, 2)] {
        let err = store.list_public_trees(page, size).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::OutOfRange { .. })
        ));
    }
}

#[test]
fn delete_all_trees_clears_only_the_callers_trees() {
    let (conn, owner) = setup();
    let other = create_user(&conn, "grace");
    let store = trees(&conn);
    let guitar = store.create_tree(owner, "Guitar", None, None, None).unwrap();
    store.create_tree(owner, "Cooking", None, None, None).unwrap();
    let foreign = store.create_tree(other, "Chess", None, None, None).unwrap();
    let chords = skills(&conn)
        .create_skill(owner, guitar.id, "Chords", None, None)
        .unwrap();
    log_time(&conn, owner, chords.id, 1.0);

    let err = store.delete_all_trees(owner).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ConflictReason::TreeSkillsReferenced { tree_id }) if tree_id == guitar.id
    ));
    assert_eq!(store.list_trees(owner).unwrap().len(), 2);

    activities(&conn).delete_all_activities(owner).unwrap();
    assert_eq!(store.delete_all_trees(owner).unwrap(), 2);
    assert!(store.list_trees(owner).unwrap().is_empty());
    assert_eq!(
        skills(&conn).get_skill(owner, chords.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(store.get_tree(other, foreign.id).unwrap(), foreign);
    assert_eq!(store.delete_all_trees(owner).unwrap(), 0);
}

/// Follows parent links from every skill; panics on a loop.
fn assert_forest(parents: &HashMap<SkillId, Option<SkillId>>) {
    for &start in parents.keys() {
        let mut cursor = Some(start);
        let mut steps = 0;
        while let Some(id) = cursor {
            assert!(steps <= parents.len(), "parent loop through {start}");
            cursor = parents[&id];
            steps += 1;
        }
    }
}

#[test]
fn copying_a_public_tree_remaps_every_reference() {
    let (conn, author) = setup();
    let reader = create_user(&conn, "grace");
    let store = trees(&conn);
    let source = store
        .create_tree(author, "Guitar", Some("strings"), None, Some(Visibility::Public))
        .unwrap();
    let root = skills(&conn)
        .create_skill(author, source.id, "Chords", None, None)
        .unwrap();
    let child = skills(&conn)
        .create_skill(author, source.id, "Barre", None, Some(root.id))
        .unwrap();
    let grandchild = skills(&conn)
        .create_skill(author, source.id, "Jazz", None, Some(child.id))
        .unwrap();
    let first_song = achievements(&conn)
        .create_achievement(author, source.id, "First song", None, None, &[child.id])
        .unwrap();
    let gig = achievements(&conn)
        .create_achievement(
            author,
            source.id,
            "Gig",
            Some("play live"),
            None,
            &[first_song.id, grandchild.id, root.id],
        )
        .unwrap();
    achievements(&conn)
        .patch_achievement(author, first_song.id, json!({ "complete": true }))
        .unwrap();
    log_time(&conn, author, grandchild.id, 2.0);
    layouts(&conn)
        .apply_orientation(
            author,
            source.id,
            &[
                OrientationPatch { kind: LayoutNodeKind::Skill, id: root.id, x: 10.0, y: 20.0 },
                OrientationPatch { kind: LayoutNodeKind::Skill, id: child.id, x: -5.5, y: 7.0 },
                OrientationPatch {
                    kind: LayoutNodeKind::Achievement,
                    id: gig.id,
                    x: 300.0,
                    y: -40.0,
                },
            ],
        )
        .unwrap();

    let copy = store.copy_tree(reader, source.id.to_string()).unwrap();
    assert_ne!(copy.id, source.id);
    assert_eq!(copy.user_id, reader);
    assert_eq!(copy.name, "Guitar");
    assert_eq!(copy.description.as_deref(), Some("strings"));
    assert_eq!(copy.visibility, Visibility::Friends);
    assert_eq!(store.list_trees(reader).unwrap(), vec![copy.clone()]);

    let source_ids: BTreeSet<_> = [root.id, child.id, grandchild.id, first_song.id, gig.id].into();
    let copied_skills = skills(&conn)
        .list_skills(reader, copy.id, SkillFilter::All, SkillSortMode::Name)
        .unwrap();
    let skill_by_name: HashMap<&str, SkillId> = copied_skills
        .iter()
        .map(|skill| (skill.name.as_str(), skill.id))
        .collect();
    assert_eq!(copied_skills.len(), 3);
    for skill in &copied_skills {
        assert!(!source_ids.contains(&skill.id));
        assert_eq!(skill.time_spent_hours, 0.0);
        assert_eq!(skill.user_id, reader);
    }
    let parent_of = |name: &str| {
        copied_skills
            .iter()
            .find(|skill| skill.name == name)
            .unwrap()
            .parent_skill_id
    };
    assert_eq!(parent_of("Chords"), None);
    assert_eq!(parent_of("Barre"), Some(skill_by_name["Chords"]));
    assert_eq!(parent_of("Jazz"), Some(skill_by_name["Barre"]));
    assert_forest(
        &copied_skills
            .iter()
            .map(|skill| (skill.id, skill.parent_skill_id))
            .collect(),
    );

    let copied_goals = achievements(&conn)
        .list_achievements(reader, copy.id, AchievementSortMode::Title)
        .unwrap();
    let goal = |title: &str| copied_goals.iter().find(|goal| goal.title == title).unwrap();
    assert_eq!(copied_goals.len(), 2);
    assert!(copied_goals.iter().all(|goal| !goal.complete && goal.completed_at.is_none()));
    assert!(copied_goals.iter().all(|goal| !source_ids.contains(&goal.id)));
    assert_eq!(goal("First song").prerequisites, vec![skill_by_name["Barre"]]);
    assert_eq!(
        goal("Gig").prerequisites,
        vec![goal("First song").id, skill_by_name["Jazz"], skill_by_name["Chords"]]
    );
    assert_eq!(goal("Gig").description.as_deref(), Some("play live"));

    // The copied graph still refuses a loop.
    let err = achievements(&conn)
        .patch_achievement(
            reader,
            goal("First song").id,
            json!({ "prerequisites": [goal("Gig").id] }),
        )
        .unwrap_err();
    assert_ne!(err.kind(), ErrorKind::NotFound);
    let err = skills(&conn)
        .patch_skill(
            reader,
            skill_by_name["Chords"],
            json!({ "parentSkillId": skill_by_name["Jazz"] }),
        )
        .unwrap_err();
    assert_ne!(err.kind(), ErrorKind::NotFound);

    let layout = layouts(&conn).get_layout(reader, copy.id).unwrap();
    let skill_keys: BTreeSet<SkillId> = layout.skill_layout.keys().copied().collect();
    assert_eq!(skill_keys, skill_by_name.values().copied().collect::<BTreeSet<_>>());
    let goal_keys: BTreeSet<_> = layout.achievement_layout.keys().copied().collect();
    assert_eq!(
        goal_keys,
        copied_goals.iter().map(|goal| goal.id).collect::<BTreeSet<_>>()
    );
    let at = &layout.skill_layout[&skill_by_name["Chords"]];
    assert_eq!((at.x, at.y), (10.0, 20.0));
    let at = &layout.skill_layout[&skill_by_name["Barre"]];
    assert_eq!((at.x, at.y), (-5.5, 7.0));
    let at = &layout.achievement_layout[&goal("Gig").id];
    assert_eq!((at.x, at.y), (300.0, -40.0));

    // The source is untouched.
    assert_eq!(skills(&conn).get_skill(author, grandchild.id).unwrap().time_spent_hours, 2.0);
    assert!(achievements(&conn).get_achievement(author, first_song.id).unwrap().complete);
}

#[test]
fn only_own_or_public_trees_can_be_copied() {
    let (conn, owner) = setup();
    let other = create_user(&conn, "grace");
    let store = trees(&conn);
    let diary = store
        .create_tree(other, "Diary", None, None, Some(Visibility::Private))
        .unwrap();
    let budget = store
        .create_tree(other, "Budget", None, None, Some(Visibility::Friends))
        .unwrap();
    for source in [diary.id, budget.id] {
        let err = store.copy_tree(owner, source).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "tree", .. }));
    }
    assert_eq!(
        store.copy_tree(owner, "not-a-uuid").unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let own = store.create_tree(owner, "Guitar", None, None, None).unwrap();
    let copy = store.copy_tree(owner, own.id).unwrap();
    assert_ne!(copy.id, own.id);
    assert_eq!(store.list_trees(owner).unwrap().len(), 2);
    assert_eq!(store.list_trees(other).unwrap().len(), 2);
}

#[test]
fn copying_past_the_node_limit_is_rejected() {
    let (conn, author) = setup();
    let reader = create_user(&conn, "grace");
    let store = trees(&conn);
    let source = store
        .create_tree(author, "Big tree", None, None, Some(Visibility::Public))
        .unwrap();
    let half = MAX_USER_NODES / 2 + 1;
    for index in 0..half {
        skills(&conn)
            .create_skill(author, source.id, &format!("Skill {index}"), None, None)
            .unwrap();
    }

    store.copy_tree(reader, source.id).unwrap();
    let err = store.copy_tree(reader, source.id).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::NodeLimit { limit, requested })
            if limit == MAX_USER_NODES && requested == 2 * half
    ));
    assert_eq!(store.list_trees(reader).unwrap().len(), 1);
}
