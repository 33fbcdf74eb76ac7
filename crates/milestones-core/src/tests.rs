use crate::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::TempDir;

const COURSE_X: &str = "org/course_x/run";
const COURSE_Y: &str = "org/course_y/run";
const CONTENT_Z: &str = "i4x://org/course_x/problem/unit_1";
const CONTENT_W: &str = "i4x://org/course_x/problem/unit_2";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create_test_api() -> (Milestones, TempDir) {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let api = Milestones::open(temp_dir.path().join("scenario.redb")).unwrap();
    (api, temp_dir)
}

fn add(api: &Milestones, namespace: &str, name: &str) -> Milestone {
    api.add_milestone(&MilestoneSpec::new(namespace, name).with_description(format!("{} description", name)))
        .unwrap()
}

fn ids(records: &[CourseMilestoneRecord]) -> BTreeSet<MilestoneId> {
    records.iter().map(|r| r.milestone.id).collect()
}

fn content(ids: &[&str]) -> Option<Vec<ContentRef>> {
    Some(
        ids.iter()
            .map(|c| ContentRef {
                course_id: COURSE_X.to_string(),
                content_id: c.to_string(),
            })
            .collect(),
    )
}

#[test]
fn test_fulfillment_paths_shrink_as_user_progresses() {
    let (api, _temp) = create_test_api();
    let user = UserRef::new(1);

    // An unrelated milestone so the scenario ids start at 2
    add(&api, COURSE_X, "Setup Milestone");
    let a = add(&api, COURSE_X, "Milestone A");
    let b = add(&api, COURSE_X, "Milestone B");
    let c = add(&api, COURSE_X, "Milestone C");
    assert_eq!((a.id, b.id, c.id), (2, 3, 4));

    for m in [&a, &b, &c] {
        api.add_course_milestone(COURSE_X, "requires", m.id).unwrap();
    }
    api.add_course_milestone(COURSE_Y, "fulfills", a.id).unwrap();
    api.add_course_milestone(COURSE_Y, "fulfills", b.id).unwrap();
    api.add_course_content_milestone(COURSE_X, CONTENT_Z, "fulfills", b.id).unwrap();
    api.add_course_content_milestone(COURSE_X, CONTENT_Z, "fulfills", c.id).unwrap();
    api.add_course_content_milestone(COURSE_X, CONTENT_W, "fulfills", c.id).unwrap();

    let path_a = FulfillmentPath {
        courses: Some(vec![COURSE_Y.to_string()]),
        content: None,
    };
    let path_b = FulfillmentPath {
        courses: Some(vec![COURSE_Y.to_string()]),
        content: content(&[CONTENT_Z]),
    };
    let path_c = FulfillmentPath {
        courses: None,
        content: content(&[CONTENT_Z, CONTENT_W]),
    };

    let paths = api.get_course_milestones_fulfillment_paths(COURSE_X, &user).unwrap();
    assert_eq!(paths.len(), 3);
    assert_eq!(paths["milestone_2"], path_a);
    assert_eq!(paths["milestone_3"], path_b);
    assert_eq!(paths["milestone_4"], path_c);

    api.add_user_milestone(&user, a.id).unwrap();
    let paths = api.get_course_milestones_fulfillment_paths(COURSE_X, &user).unwrap();
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[&path_key(b.id)], path_b);
    assert_eq!(paths[&path_key(c.id)], path_c);

    api.add_user_milestone(&user, b.id).unwrap();
    let paths = api.get_course_milestones_fulfillment_paths(COURSE_X, &user).unwrap();
    assert_eq!(paths.keys().collect::<Vec<_>>(), vec!["milestone_4"]);

    api.add_user_milestone(&user, c.id).unwrap();
    assert!(api
        .get_course_milestones_fulfillment_paths(COURSE_X, &user)
        .unwrap()
        .is_empty());
}

#[test]
fn test_paths_serialize_without_empty_lists() {
    let (api, _temp) = create_test_api();
    let m = add(&api, COURSE_X, "Milestone A");
    api.add_course_milestone(COURSE_X, "requires", m.id).unwrap();
    api.add_course_milestone(COURSE_Y, "fulfills", m.id).unwrap();

    let paths = api
        .get_course_milestones_fulfillment_paths(COURSE_X, &UserRef::new(9))
        .unwrap();
    let json = serde_json::to_value(&paths).unwrap();
    assert_eq!(json.as_object().unwrap().len(), 1);
    assert_eq!(
        json[path_key(m.id).as_str()],
        serde_json::json!({ "courses": [COURSE_Y] })
    );
}

#[test]
fn test_required_milestones_progression() {
    let (api, _temp) = create_test_api();
    let user = UserRef::new(2);
    let m1 = add(&api, COURSE_X, "Local Milestone 1");
    let m2 = add(&api, COURSE_X, "Local Milestone 2");
    api.add_course_milestone(COURSE_X, "requires", m1.id).unwrap();
    api.add_course_milestone(COURSE_X, "requires", m2.id).unwrap();

    let required = api.get_course_required_milestones(COURSE_X, &user).unwrap();
    assert_eq!(ids(&required), BTreeSet::from([m1.id, m2.id]));

    api.add_user_milestone(&user, m1.id).unwrap();
    assert!(api.user_has_milestone(&user, m1.id).unwrap());
    assert!(!api.user_has_milestone(&user, m2.id).unwrap());
    let required = api.get_course_required_milestones(COURSE_X, &user).unwrap();
    assert_eq!(ids(&required), BTreeSet::from([m2.id]));

    api.add_user_milestone(&user, m2.id).unwrap();
    assert!(api.get_course_required_milestones(COURSE_X, &user).unwrap().is_empty());

    // Revoking brings the requirement back
    api.remove_user_milestone(&user, m1.id).unwrap();
    let required = api.get_course_required_milestones(COURSE_X, &user).unwrap();
    assert_eq!(ids(&required), BTreeSet::from([m1.id]));
}

#[test]
fn test_invalid_users_are_rejected() {
    let (api, _temp) = create_test_api();
    let m = add(&api, COURSE_X, "Local Milestone");
    for id in [0, -3] {
        let user = UserRef::new(id);
        assert!(matches!(
            api.add_user_milestone(&user, m.id),
            Err(MilestoneError::InvalidUser(_))
        ));
        assert!(matches!(
            api.get_course_required_milestones(COURSE_X, &user),
            Err(MilestoneError::InvalidUser(_))
        ));
    }
}

#[test]
fn test_invalid_keys_are_rejected_before_storage() {
    let (api, _temp) = create_test_api();
    let m = add(&api, COURSE_X, "Local Milestone");
    assert!(matches!(
        api.add_course_milestone("not a course", "requires", m.id),
        Err(MilestoneError::InvalidCourseKey(_))
    ));
    assert!(matches!(
        api.add_course_content_milestone(COURSE_X, "not/content", "requires", m.id),
        Err(MilestoneError::InvalidContentKey(_))
    ));
    assert!(matches!(
        api.get_courses_milestones(&[COURSE_X, "bad key"], None, None),
        Err(MilestoneError::InvalidCourseKey(_))
    ));
    assert_eq!(api.stats().unwrap().course_link_count, 0);
}

#[test]
fn test_courses_milestones_union() {
    let (api, _temp) = create_test_api();
    let m1 = add(&api, COURSE_X, "Local Milestone 1");
    let m2 = add(&api, COURSE_Y, "Local Milestone 2");
    let m3 = add(&api, COURSE_Y, "Local Milestone 3");
    api.add_course_milestone(COURSE_X, "requires", m1.id).unwrap();
    api.add_course_milestone(COURSE_Y, "requires", m2.id).unwrap();
    api.add_course_milestone(COURSE_Y, "fulfills", m3.id).unwrap();

    let union = api
        .get_courses_milestones(&[COURSE_X, COURSE_Y], None, None)
        .unwrap();
    assert_eq!(union.len(), 3);
    assert_eq!(ids(&union), BTreeSet::from([m1.id, m2.id, m3.id]));

    let only_x = api.get_course_milestones(COURSE_X, None).unwrap();
    assert_eq!(ids(&only_x), BTreeSet::from([m1.id]));
}

#[test]
fn test_link_unlink_round_trip() {
    let (api, _temp) = create_test_api();
    let m = add(&api, COURSE_X, "Local Milestone");

    api.remove_course_milestone(COURSE_X, m.id).unwrap();
    api.remove_course_content_milestone(COURSE_X, CONTENT_Z, m.id).unwrap();

    api.add_course_milestone(COURSE_X, "requires", m.id).unwrap();
    api.add_course_content_milestone(COURSE_X, CONTENT_Z, "requires", m.id).unwrap();
    assert_eq!(api.get_course_milestones(COURSE_X, Some("requires")).unwrap().len(), 1);
    assert_eq!(
        api.get_course_content_milestones(Some(COURSE_X), Some(CONTENT_Z), None)
            .unwrap()
            .len(),
        1
    );

    api.remove_course_milestone(COURSE_X, m.id).unwrap();
    api.remove_course_content_milestone(COURSE_X, CONTENT_Z, m.id).unwrap();
    assert!(api.get_course_milestones(COURSE_X, None).unwrap().is_empty());
    assert!(api
        .get_course_content_milestones(Some(COURSE_X), Some(CONTENT_Z), None)
        .unwrap()
        .is_empty());
}

#[test]
fn test_remove_milestone_clears_every_listing() {
    let (api, _temp) = create_test_api();
    let user = UserRef::new(1);
    let m = add(&api, COURSE_X, "Doomed Milestone");
    api.add_course_milestone(COURSE_X, "requires", m.id).unwrap();
    api.add_course_content_milestone(COURSE_X, CONTENT_Z, "fulfills", m.id).unwrap();
    api.add_user_milestone(&user, m.id).unwrap();

    api.remove_milestone(m.id).unwrap();

    assert!(matches!(
        api.get_milestone(m.id),
        Err(MilestoneError::InvalidMilestone(_))
    ));
    assert!(api.get_course_milestones(COURSE_X, None).unwrap().is_empty());
    assert!(api
        .get_course_content_milestones(Some(COURSE_X), None, None)
        .unwrap()
        .is_empty());
    assert!(api.get_user_milestones(&user, None).unwrap().is_empty());

    let stats = api.stats().unwrap();
    assert_eq!(stats.course_link_count, 0);
    assert_eq!(stats.content_link_count, 0);
    assert_eq!(stats.user_link_count, 0);

    // Deleting again is harmless
    api.remove_milestone(m.id).unwrap();
}

#[test]
fn test_remove_course_references_keeps_milestone_and_users() {
    let (api, _temp) = create_test_api();
    let user = UserRef::new(1);
    let m = add(&api, COURSE_X, "Kept Milestone");
    api.add_course_milestone(COURSE_X, "requires", m.id).unwrap();
    api.add_course_content_milestone(COURSE_X, CONTENT_Z, "fulfills", m.id).unwrap();
    api.add_course_milestone(COURSE_Y, "fulfills", m.id).unwrap();
    api.add_user_milestone(&user, m.id).unwrap();

    assert_eq!(api.remove_course_references(COURSE_X).unwrap(), 2);

    assert!(api.get_course_milestones(COURSE_X, None).unwrap().is_empty());
    assert!(api
        .get_course_content_milestones(Some(COURSE_X), None, None)
        .unwrap()
        .is_empty());
    assert_eq!(api.get_milestone(m.id).unwrap().id, m.id);
    assert!(api.user_has_milestone(&user, m.id).unwrap());
    assert_eq!(api.get_course_milestones(COURSE_Y, None).unwrap().len(), 1);
}

#[test]
fn test_course_deleted_event() {
    let (api, _temp) = create_test_api();
    let user = UserRef::new(1);
    let owned = add(&api, COURSE_X, "Owned Milestone");
    let foreign = add(&api, COURSE_Y, "Foreign Milestone");
    api.add_course_milestone(COURSE_X, "requires", owned.id).unwrap();
    api.add_course_milestone(COURSE_X, "requires", foreign.id).unwrap();
    api.add_course_milestone(COURSE_Y, "fulfills", foreign.id).unwrap();
    api.add_user_milestone(&user, owned.id).unwrap();

    let event: PlatformEvent = serde_json::from_value(serde_json::json!({
        "type": "course.deleted",
        "course_key": COURSE_X,
    }))
    .unwrap();
    let outcome = api.handle_event(&event).unwrap();
    assert_eq!(outcome.milestones_removed, 1);
    // The owned milestone's links went with it; the foreign one's X link remained
    assert_eq!(outcome.links_removed, 1);

    assert!(api.get_milestones(COURSE_X).unwrap().is_empty());
    assert!(api.get_user_milestones(&user, None).unwrap().is_empty());
    assert_eq!(api.get_milestone(foreign.id).unwrap().id, foreign.id);
    assert_eq!(api.get_course_milestones(COURSE_Y, None).unwrap().len(), 1);
    assert!(api.get_course_milestones(COURSE_X, None).unwrap().is_empty());
}

#[test]
fn test_content_deleted_event() {
    let (api, _temp) = create_test_api();
    let m = add(&api, COURSE_X, "Milestone");
    api.add_course_content_milestone(COURSE_X, CONTENT_Z, "requires", m.id).unwrap();
    api.add_course_content_milestone(COURSE_X, CONTENT_W, "requires", m.id).unwrap();

    let outcome = api
        .handle_event(&PlatformEvent::ContentDeleted {
            content_key: ContentKey::parse(CONTENT_Z).unwrap(),
        })
        .unwrap();
    assert_eq!(outcome, EventOutcome { milestones_removed: 0, links_removed: 1 });

    let left = api.get_course_content_milestones(Some(COURSE_X), None, None).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].content_id, CONTENT_W);
}

#[test]
fn test_edit_then_recreate_old_name() {
    let (api, _temp) = create_test_api();
    let original = add(&api, COURSE_X, "Old Name");

    let mut edit = MilestoneSpec::from(&original);
    edit.name = Some("New Name".into());
    api.edit_milestone(&edit).unwrap();

    // The old (namespace, name) is free again
    let fresh = add(&api, COURSE_X, "Old Name");
    assert_ne!(fresh.id, original.id);
    assert_eq!(api.get_milestones(COURSE_X).unwrap().len(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_outstanding_is_required_minus_held(held in proptest::collection::vec(any::<bool>(), 1..6)) {
        let (api, _temp) = create_test_api();
        let user = UserRef::new(11);

        let mut expected = BTreeSet::new();
        for (i, is_held) in held.iter().enumerate() {
            let m = add(&api, COURSE_X, &format!("Milestone {}", i));
            api.add_course_milestone(COURSE_X, "requires", m.id).unwrap();
            if *is_held {
                api.add_user_milestone(&user, m.id).unwrap();
            } else {
                expected.insert(m.id);
            }
        }

        let outstanding = api.get_course_required_milestones(COURSE_X, &user).unwrap();
        prop_assert_eq!(ids(&outstanding), expected);
    }
}
