use crate::error::{MilestoneError, Result};
use crate::relations::{defaults, RelationshipRegistry};
use crate::storage::{LinkFilter, Storage, Visibility};
use crate::types::{
    CourseContentMilestone, CourseContentMilestoneRecord, CourseMilestone, CourseMilestoneRecord,
    LinkId, Milestone, MilestoneId, RelationshipTypeId, UserId, UserMilestone, UserRef,
};
use std::collections::HashMap;
use std::sync::Arc;

/// The three typed link tables between milestones and courses, course
/// content and users.
///
/// Course and content ids are taken as canonical strings; validating them is
/// the caller's job.
pub struct AssociationStore<S: Storage> {
    storage: Arc<S>,
    registry: RelationshipRegistry<S>,
}

/// Per-call lookups shared by the records of one listing.
struct RecordCache<'a, S: Storage> {
    storage: &'a S,
    milestones: HashMap<MilestoneId, Option<Milestone>>,
    relationships: HashMap<RelationshipTypeId, Option<String>>,
}

impl<'a, S: Storage> RecordCache<'a, S> {
    fn new(storage: &'a S) -> Self {
        Self {
            storage,
            milestones: HashMap::new(),
            relationships: HashMap::new(),
        }
    }

    /// Active milestone behind a link; links to inactive milestones are hidden.
    fn milestone(&mut self, id: MilestoneId) -> Result<Option<Milestone>> {
        if let Some(cached) = self.milestones.get(&id) {
            return Ok(cached.clone());
        }
        let milestone = self.storage.get_milestone(id, Visibility::Active)?;
        self.milestones.insert(id, milestone.clone());
        Ok(milestone)
    }

    /// Name of the relationship type behind a link. A link pointing at a
    /// type that no longer exists is a corrupt store.
    fn relationship(&mut self, link_id: LinkId, id: RelationshipTypeId) -> Result<String> {
        let name = match self.relationships.get(&id) {
            Some(cached) => cached.clone(),
            None => {
                let name = self
                    .storage
                    .get_relationship_type(id, Visibility::All)?
                    .map(|rt| rt.name);
                self.relationships.insert(id, name.clone());
                name
            }
        };
        name.ok_or_else(|| {
            log::warn!("link {} references unknown relationship type {}", link_id, id);
            MilestoneError::Schema(format!(
                "link {} references unknown relationship type {}",
                link_id, id
            ))
        })
    }
}

impl<S: Storage> AssociationStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        let registry = RelationshipRegistry::new(storage.clone());
        Self { storage, registry }
    }

    pub fn registry(&self) -> &RelationshipRegistry<S> {
        &self.registry
    }

    // === Course links ===

    pub fn link_course(
        &self,
        course_id: &str,
        relationship: &str,
        milestone: MilestoneId,
    ) -> Result<CourseMilestone> {
        let rt = self.registry.resolve(relationship)?;
        self.storage
            .get_or_create_course_link(&CourseMilestone::new(course_id, milestone, rt.id))
    }

    /// Remove the active links between the course and the milestone, whatever
    /// their relationship. Returns how many rows went away.
    pub fn unlink_course(&self, course_id: &str, milestone: MilestoneId) -> Result<usize> {
        let removed = self.storage.delete_course_links(
            &LinkFilter::new(Visibility::Active)
                .with_course(course_id)
                .with_milestone(milestone),
        )?;
        if removed == 0 {
            log::debug!("no link between course {} and milestone {}", course_id, milestone);
        }
        Ok(removed)
    }

    /// Milestones linked to any of the courses, one record per link.
    ///
    /// With relationship `requires` and a user, milestones the user already
    /// holds are left out, which yields the still-outstanding requirements.
    pub fn list_courses(
        &self,
        course_ids: &[String],
        relationship: Option<&str>,
        user: Option<&UserRef>,
    ) -> Result<Vec<CourseMilestoneRecord>> {
        let mut filter = LinkFilter::new(Visibility::Active).with_courses(course_ids.to_vec());

        if let Some(rt) = self.registry.resolve_optional(relationship)? {
            filter = filter.with_relationship(rt.id);
        }

        if relationship == Some(defaults::REQUIRES) {
            if let Some(user) = user.filter(|u| u.id > 0) {
                filter = filter.excluding_user(user.id);
            }
        }

        let links = self.storage.list_course_links(&filter)?;
        self.course_records(links)
    }

    /// Courses linked to the milestone.
    pub fn milestone_courses(
        &self,
        milestone: MilestoneId,
        relationship: Option<&str>,
    ) -> Result<Vec<CourseMilestoneRecord>> {
        let mut filter = LinkFilter::new(Visibility::Active).with_milestone(milestone);
        if let Some(rt) = self.registry.resolve_optional(relationship)? {
            filter = filter.with_relationship(rt.id);
        }
        let links = self.storage.list_course_links(&filter)?;
        self.course_records(links)
    }

    fn course_records(&self, links: Vec<CourseMilestone>) -> Result<Vec<CourseMilestoneRecord>> {
        let mut cache = RecordCache::new(self.storage.as_ref());
        let mut records = Vec::with_capacity(links.len());
        for link in links {
            let Some(milestone) = cache.milestone(link.milestone_id)? else {
                continue;
            };
            let relationship = cache.relationship(link.id, link.relationship_type_id)?;
            records.push(CourseMilestoneRecord {
                milestone,
                course_id: link.course_id,
                relationship,
            });
        }
        Ok(records)
    }

    // === Course content links ===

    pub fn link_content(
        &self,
        course_id: &str,
        content_id: &str,
        relationship: &str,
        milestone: MilestoneId,
    ) -> Result<CourseContentMilestone> {
        let rt = self.registry.resolve(relationship)?;
        self.storage.get_or_create_content_link(&CourseContentMilestone::new(
            course_id, content_id, milestone, rt.id,
        ))
    }

    pub fn unlink_content(
        &self,
        course_id: &str,
        content_id: &str,
        milestone: MilestoneId,
    ) -> Result<usize> {
        let removed = self.storage.delete_content_links(
            &LinkFilter::new(Visibility::Active)
                .with_course(course_id)
                .with_content(content_id)
                .with_milestone(milestone),
        )?;
        if removed == 0 {
            log::debug!(
                "no link between content {} of course {} and milestone {}",
                content_id,
                course_id,
                milestone
            );
        }
        Ok(removed)
    }

    /// Milestones linked to course content.
    ///
    /// When a relationship is given the course and content conditions are
    /// dropped and every content link with that relationship is returned.
    /// Existing callers rely on this, so it is kept as is.
    pub fn list_content(
        &self,
        course_id: Option<&str>,
        content_id: Option<&str>,
        relationship: Option<&str>,
    ) -> Result<Vec<CourseContentMilestoneRecord>> {
        let mut filter = LinkFilter::new(Visibility::Active);

        if let Some(course_id) = course_id {
            filter = filter.with_course(course_id);
        }
        if let Some(content_id) = content_id {
            filter = filter.with_content(content_id);
        }
        if let Some(rt) = self.registry.resolve_optional(relationship)? {
            filter = LinkFilter::new(Visibility::Active).with_relationship(rt.id);
        }

        let links = self.storage.list_content_links(&filter)?;
        self.content_records(links)
    }

    /// Course content linked to the milestone.
    pub fn milestone_content(
        &self,
        milestone: MilestoneId,
        relationship: Option<&str>,
    ) -> Result<Vec<CourseContentMilestoneRecord>> {
        let mut filter = LinkFilter::new(Visibility::Active).with_milestone(milestone);
        if let Some(rt) = self.registry.resolve_optional(relationship)? {
            filter = filter.with_relationship(rt.id);
        }
        let links = self.storage.list_content_links(&filter)?;
        self.content_records(links)
    }

    fn content_records(
        &self,
        links: Vec<CourseContentMilestone>,
    ) -> Result<Vec<CourseContentMilestoneRecord>> {
        let mut cache = RecordCache::new(self.storage.as_ref());
        let mut records = Vec::with_capacity(links.len());
        for link in links {
            let Some(milestone) = cache.milestone(link.milestone_id)? else {
                continue;
            };
            let relationship = cache.relationship(link.id, link.relationship_type_id)?;
            records.push(CourseContentMilestoneRecord {
                milestone,
                course_id: link.course_id,
                content_id: link.content_id,
                relationship,
            });
        }
        Ok(records)
    }

    // === User links ===

    pub fn link_user(&self, user_id: UserId, milestone: MilestoneId) -> Result<UserMilestone> {
        self.storage
            .get_or_create_user_link(&UserMilestone::new(user_id, milestone))
    }

    pub fn unlink_user(&self, user_id: UserId, milestone: MilestoneId) -> Result<usize> {
        self.storage.delete_user_links(
            &LinkFilter::new(Visibility::Active)
                .with_user(user_id)
                .with_milestone(milestone),
        )
    }

    /// Active milestones the user holds, optionally only the given one.
    pub fn user_milestones(
        &self,
        user_id: UserId,
        milestone: Option<MilestoneId>,
    ) -> Result<Vec<Milestone>> {
        let mut filter = LinkFilter::new(Visibility::Active).with_user(user_id);
        if let Some(milestone) = milestone {
            filter = filter.with_milestone(milestone);
        }

        let mut cache = RecordCache::new(self.storage.as_ref());
        let mut milestones = Vec::new();
        for link in self.storage.list_user_links(&filter)? {
            if let Some(m) = cache.milestone(link.milestone_id)? {
                milestones.push(m);
            }
        }
        Ok(milestones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milestones::MilestoneStore;
    use crate::storage::RedbStorage;
    use crate::types::MilestoneSpec;
    use tempfile::TempDir;

    const COURSE: &str = "the/course/key";
    const PREREQ: &str = "prerequisite/course/key";
    const CONTENT: &str = "i4x://the/content/key/123456789";

    struct Fixture {
        links: AssociationStore<RedbStorage>,
        milestones: MilestoneStore<RedbStorage>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(temp.path().join("links.redb")).unwrap());
        Fixture {
            links: AssociationStore::new(storage.clone()),
            milestones: MilestoneStore::new(storage),
            _temp: temp,
        }
    }

    impl Fixture {
        fn milestone(&self, name: &str) -> Milestone {
            self.milestones
                .create(&MilestoneSpec::new(COURSE, name))
                .unwrap()
        }
    }

    fn courses(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_link_course_and_list_by_relationship() {
        let f = fixture();
        let m = f.milestone("Test Milestone");

        f.links.link_course(COURSE, "requires", m.id).unwrap();
        f.links.link_course(PREREQ, "fulfills", m.id).unwrap();

        let required = f
            .links
            .list_courses(&courses(&[COURSE]), Some("requires"), None)
            .unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0].milestone.id, m.id);
        assert_eq!(required[0].relationship, "requires");
        assert_eq!(required[0].course_id, COURSE);

        let fulfilled = f
            .links
            .list_courses(&courses(&[PREREQ]), Some("fulfills"), None)
            .unwrap();
        assert_eq!(fulfilled.len(), 1);
    }

    #[test]
    fn test_link_with_unknown_relationship_fails() {
        let f = fixture();
        let m = f.milestone("Test Milestone");
        assert!(matches!(
            f.links.link_course(COURSE, "whatever", m.id),
            Err(MilestoneError::InvalidRelationshipType(_))
        ));
        assert!(matches!(
            f.links.link_content(COURSE, CONTENT, "", m.id),
            Err(MilestoneError::InvalidRelationshipType(_))
        ));
    }

    #[test]
    fn test_link_twice_is_a_noop() {
        let f = fixture();
        let m = f.milestone("Test Milestone");
        let a = f.links.link_course(COURSE, "requires", m.id).unwrap();
        let b = f.links.link_course(COURSE, "requires", m.id).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(
            f.links.list_courses(&courses(&[COURSE]), None, None).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_unlink_course() {
        let f = fixture();
        let m = f.milestone("Test Milestone");

        // Unlinking something never linked is fine
        assert_eq!(f.links.unlink_course(COURSE, m.id).unwrap(), 0);

        f.links.link_course(COURSE, "requires", m.id).unwrap();
        assert_eq!(f.links.unlink_course(COURSE, m.id).unwrap(), 1);
        assert!(f
            .links
            .list_courses(&courses(&[COURSE]), None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_list_courses_across_courses() {
        let f = fixture();
        let shared = f.milestone("Test Milestone");
        let local = f.milestone("Local Milestone");

        f.links.link_course(COURSE, "requires", shared.id).unwrap();
        f.links.link_course(PREREQ, "requires", shared.id).unwrap();
        f.links.link_course(COURSE, "fulfills", local.id).unwrap();

        // Same milestone through two courses: two records
        let requires = f
            .links
            .list_courses(&courses(&[COURSE, PREREQ]), Some("requires"), None)
            .unwrap();
        assert_eq!(requires.len(), 2);
        assert!(requires.iter().all(|r| r.milestone.id == shared.id));

        let everything = f.links.list_courses(&courses(&[COURSE]), None, None).unwrap();
        assert_eq!(everything.len(), 2);

        let union = f
            .links
            .list_courses(&courses(&[COURSE, PREREQ]), None, None)
            .unwrap();
        assert_eq!(union.len(), 3);
    }

    #[test]
    fn test_user_exclusion_only_applies_to_requires() {
        let f = fixture();
        let m1 = f.milestone("Local Milestone 1");
        let m2 = f.milestone("Local Milestone 2");
        f.links.link_course(COURSE, "requires", m1.id).unwrap();
        f.links.link_course(COURSE, "requires", m2.id).unwrap();
        f.links.link_course(COURSE, "fulfills", m2.id).unwrap();

        let user = UserRef::new(1);
        f.links.link_user(user.id, m2.id).unwrap();

        let outstanding = f
            .links
            .list_courses(&courses(&[COURSE]), Some("requires"), Some(&user))
            .unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].milestone.id, m1.id);

        let fulfills = f
            .links
            .list_courses(&courses(&[COURSE]), Some("fulfills"), Some(&user))
            .unwrap();
        assert_eq!(fulfills.len(), 1);
    }

    #[test]
    fn test_content_link_listing() {
        let f = fixture();
        let m = f.milestone("Test Milestone");
        f.links.link_content(COURSE, CONTENT, "requires", m.id).unwrap();

        let listed = f
            .links
            .list_content(Some(COURSE), Some(CONTENT), Some("requires"))
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content_id, CONTENT);

        f.links.unlink_content(COURSE, CONTENT, m.id).unwrap();
        assert!(f
            .links
            .list_content(Some(COURSE), Some(CONTENT), None)
            .unwrap()
            .is_empty());
        assert_eq!(f.links.unlink_content(COURSE, CONTENT, m.id).unwrap(), 0);
    }

    #[test]
    fn test_content_relationship_filter_drops_course_and_content() {
        let f = fixture();
        let m = f.milestone("Test Milestone");
        f.links.link_content(COURSE, CONTENT, "fulfills", m.id).unwrap();
        f.links
            .link_content(PREREQ, "i4x://other/content/key/1", "fulfills", m.id)
            .unwrap();

        let scoped = f.links.list_content(Some(COURSE), Some(CONTENT), None).unwrap();
        assert_eq!(scoped.len(), 1);

        // The relationship filter wins over course and content
        let by_relationship = f
            .links
            .list_content(Some(COURSE), Some(CONTENT), Some("fulfills"))
            .unwrap();
        assert_eq!(by_relationship.len(), 2);
    }

    #[test]
    fn test_milestone_centric_listings() {
        let f = fixture();
        let m = f.milestone("Test Milestone");
        f.links.link_course(COURSE, "requires", m.id).unwrap();
        f.links.link_course(PREREQ, "fulfills", m.id).unwrap();
        f.links.link_content(COURSE, CONTENT, "fulfills", m.id).unwrap();

        let fulfilling = f.links.milestone_courses(m.id, Some("fulfills")).unwrap();
        assert_eq!(fulfilling.len(), 1);
        assert_eq!(fulfilling[0].course_id, PREREQ);
        assert_eq!(f.links.milestone_courses(m.id, None).unwrap().len(), 2);

        let content = f.links.milestone_content(m.id, Some("fulfills")).unwrap();
        assert_eq!(content.len(), 1);
        assert!(f.links.milestone_content(m.id, Some("requires")).unwrap().is_empty());
    }

    #[test]
    fn test_user_links() {
        let f = fixture();
        let m = f.milestone("Test Milestone");

        f.links.link_user(5, m.id).unwrap();
        f.links.link_user(5, m.id).unwrap();
        assert_eq!(f.links.user_milestones(5, None).unwrap().len(), 1);
        assert_eq!(f.links.user_milestones(5, Some(m.id)).unwrap().len(), 1);
        assert!(f.links.user_milestones(6, None).unwrap().is_empty());

        assert_eq!(f.links.unlink_user(5, m.id).unwrap(), 1);
        assert_eq!(f.links.unlink_user(5, m.id).unwrap(), 0);
        assert!(f.links.user_milestones(5, Some(m.id)).unwrap().is_empty());
    }

    #[test]
    fn test_links_to_inactive_milestones_are_hidden() {
        let f = fixture();
        let m = f.milestone("Test Milestone");
        f.links.link_course(COURSE, "requires", m.id).unwrap();

        let mut deactivate = MilestoneSpec::from(&m);
        deactivate.active = Some(false);
        f.milestones.update(&deactivate).unwrap();

        assert!(f
            .links
            .list_courses(&courses(&[COURSE]), None, None)
            .unwrap()
            .is_empty());
        assert!(matches!(
            f.links.link_course(PREREQ, "fulfills", m.id),
            Err(MilestoneError::InvalidMilestone(_))
        ));
    }

    #[test]
    fn test_link_with_missing_relationship_type_is_an_error() {
        let f = fixture();
        let m = f.milestone("Test Milestone");
        let linked = f.links.link_course(COURSE, "requires", m.id).unwrap();

        let dangling = CourseMilestone {
            relationship_type_id: 999,
            ..linked
        };
        assert!(matches!(
            f.links.course_records(vec![dangling]),
            Err(MilestoneError::Schema(_))
        ));

        let dangling_content = CourseContentMilestone::new(COURSE, CONTENT, m.id, 999);
        assert!(matches!(
            f.links.content_records(vec![dangling_content]),
            Err(MilestoneError::Schema(_))
        ));
    }
}
