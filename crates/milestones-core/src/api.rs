use crate::associations::AssociationStore;
use crate::cleanup::CascadeCleanup;
use crate::events::{EventOutcome, PlatformEvent};
use crate::keys::{ContentKey, CourseKey};
use crate::milestones::MilestoneStore;
use crate::paths::PathResolver;
use crate::relations::defaults;
use crate::storage::{MilestoneFilter, RedbStorage, Storage, StorageStats, Visibility};
use crate::{
    CourseContentMilestoneRecord, CourseMilestoneRecord, FulfillmentPaths, Milestone,
    MilestoneError, MilestoneId, MilestoneSpec, Result, UserRef,
};
use std::path::Path;
use std::sync::Arc;

/// Embedded milestones API. Every input is validated before the store is
/// touched.
///
/// # Example
/// ```rust,no_run
/// use milestones_core::{Milestones, MilestoneSpec, UserRef};
///
/// let milestones = Milestones::open("./milestones.redb").unwrap();
/// let m = milestones
///     .add_milestone(&MilestoneSpec::new("edX/DemoX/2024", "Pass the intro quiz"))
///     .unwrap();
/// milestones.add_course_milestone("edX/DemoX/2024", "requires", m.id).unwrap();
/// let missing = milestones
///     .get_course_required_milestones("edX/DemoX/2024", &UserRef::new(42))
///     .unwrap();
/// ```
pub struct Milestones<S: Storage = RedbStorage> {
    storage: Arc<S>,
    milestones: MilestoneStore<S>,
    links: Arc<AssociationStore<S>>,
    paths: PathResolver<S>,
    cleanup: CascadeCleanup<S>,
}

impl Milestones<RedbStorage> {
    /// Open (or create) a milestones database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let storage = Arc::new(RedbStorage::open(path.as_ref())?);
        Ok(Self::new(storage))
    }
}

impl<S: Storage> Milestones<S> {
    pub fn new(storage: Arc<S>) -> Self {
        let links = Arc::new(AssociationStore::new(storage.clone()));
        Self {
            milestones: MilestoneStore::new(storage.clone()),
            paths: PathResolver::new(links.clone()),
            cleanup: CascadeCleanup::new(storage.clone()),
            links,
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    // === Milestones ===

    pub fn add_milestone(&self, spec: &MilestoneSpec) -> Result<Milestone> {
        self.milestones.create(spec)
    }

    pub fn edit_milestone(&self, spec: &MilestoneSpec) -> Result<Milestone> {
        self.milestones.update(spec)
    }

    /// The active milestone with this id.
    pub fn get_milestone(&self, id: MilestoneId) -> Result<Milestone> {
        self.milestones
            .fetch(Some(&MilestoneSpec::with_id(id)))?
            .into_iter()
            .next()
            .ok_or_else(|| MilestoneError::InvalidMilestone(format!("milestone {} not found", id)))
    }

    /// Active milestones in the namespace.
    pub fn get_milestones(&self, namespace: &str) -> Result<Vec<Milestone>> {
        self.milestones.fetch(Some(&MilestoneSpec {
            namespace: Some(namespace.to_string()),
            ..MilestoneSpec::default()
        }))
    }

    pub fn remove_milestone(&self, id: MilestoneId) -> Result<()> {
        self.milestones.delete(&MilestoneSpec::with_id(id))
    }

    // === Course links ===

    pub fn add_course_milestone(
        &self,
        course_key: &str,
        relationship: &str,
        milestone: MilestoneId,
    ) -> Result<()> {
        let course = CourseKey::parse(course_key)?;
        self.links
            .link_course(course.as_str(), relationship, milestone)
            .map(|_| ())
    }

    pub fn get_course_milestones(
        &self,
        course_key: &str,
        relationship: Option<&str>,
    ) -> Result<Vec<CourseMilestoneRecord>> {
        self.get_courses_milestones(&[course_key], relationship, None)
    }

    /// Milestones linked to any of the courses. With `requires` and a user,
    /// milestones the user already holds are left out.
    pub fn get_courses_milestones(
        &self,
        course_keys: &[&str],
        relationship: Option<&str>,
        user: Option<&UserRef>,
    ) -> Result<Vec<CourseMilestoneRecord>> {
        let courses = course_keys
            .iter()
            .map(|k| CourseKey::parse(k).map(String::from))
            .collect::<Result<Vec<_>>>()?;
        self.links.list_courses(&courses, relationship, user)
    }

    /// The course's required milestones the user has not reached yet.
    pub fn get_course_required_milestones(
        &self,
        course_key: &str,
        user: &UserRef,
    ) -> Result<Vec<CourseMilestoneRecord>> {
        user.validate()?;
        self.get_courses_milestones(&[course_key], Some(defaults::REQUIRES), Some(user))
    }

    pub fn remove_course_milestone(&self, course_key: &str, milestone: MilestoneId) -> Result<()> {
        let course = CourseKey::parse(course_key)?;
        self.links.unlink_course(course.as_str(), milestone).map(|_| ())
    }

    // === Course content links ===

    pub fn add_course_content_milestone(
        &self,
        course_key: &str,
        content_key: &str,
        relationship: &str,
        milestone: MilestoneId,
    ) -> Result<()> {
        let course = CourseKey::parse(course_key)?;
        let content = ContentKey::parse(content_key)?;
        self.links
            .link_content(course.as_str(), content.as_str(), relationship, milestone)
            .map(|_| ())
    }

    pub fn get_course_content_milestones(
        &self,
        course_key: Option<&str>,
        content_key: Option<&str>,
        relationship: Option<&str>,
    ) -> Result<Vec<CourseContentMilestoneRecord>> {
        let course = course_key.map(CourseKey::parse).transpose()?;
        let content = content_key.map(ContentKey::parse).transpose()?;
        self.links.list_content(
            course.as_ref().map(CourseKey::as_str),
            content.as_ref().map(ContentKey::as_str),
            relationship,
        )
    }

    pub fn remove_course_content_milestone(
        &self,
        course_key: &str,
        content_key: &str,
        milestone: MilestoneId,
    ) -> Result<()> {
        let course = CourseKey::parse(course_key)?;
        let content = ContentKey::parse(content_key)?;
        self.links
            .unlink_content(course.as_str(), content.as_str(), milestone)
            .map(|_| ())
    }

    // === Milestone-centric listings ===

    pub fn get_milestone_courses(
        &self,
        milestone: MilestoneId,
        relationship: Option<&str>,
    ) -> Result<Vec<CourseMilestoneRecord>> {
        self.links.milestone_courses(milestone, relationship)
    }

    pub fn get_milestone_course_content(
        &self,
        milestone: MilestoneId,
        relationship: Option<&str>,
    ) -> Result<Vec<CourseContentMilestoneRecord>> {
        self.links.milestone_content(milestone, relationship)
    }

    // === User links ===

    pub fn add_user_milestone(&self, user: &UserRef, milestone: MilestoneId) -> Result<()> {
        let user_id = user.validate()?;
        self.links.link_user(user_id, milestone).map(|_| ())
    }

    pub fn remove_user_milestone(&self, user: &UserRef, milestone: MilestoneId) -> Result<()> {
        let user_id = user.validate()?;
        self.links.unlink_user(user_id, milestone).map(|_| ())
    }

    pub fn get_user_milestones(
        &self,
        user: &UserRef,
        milestone: Option<MilestoneId>,
    ) -> Result<Vec<Milestone>> {
        let user_id = user.validate()?;
        self.links.user_milestones(user_id, milestone)
    }

    pub fn user_has_milestone(&self, user: &UserRef, milestone: MilestoneId) -> Result<bool> {
        Ok(!self.get_user_milestones(user, Some(milestone))?.is_empty())
    }

    // === Fulfillment paths ===

    pub fn get_course_milestones_fulfillment_paths(
        &self,
        course_key: &str,
        user: &UserRef,
    ) -> Result<FulfillmentPaths> {
        let course = CourseKey::parse(course_key)?;
        let user_id = user.validate()?;
        self.paths.resolve(course.as_str(), user_id)
    }

    // === Cleanup ===

    pub fn remove_course_references(&self, course_key: &str) -> Result<usize> {
        let course = CourseKey::parse(course_key)?;
        self.cleanup.remove_course_references(course.as_str())
    }

    pub fn remove_content_references(&self, content_key: &str) -> Result<usize> {
        let content = ContentKey::parse(content_key)?;
        self.cleanup.remove_content_references(content.as_str())
    }

    /// Apply a platform removal notice.
    pub fn handle_event(&self, event: &PlatformEvent) -> Result<EventOutcome> {
        let outcome = match event {
            PlatformEvent::CourseDeleted { course_key } => {
                let owned = self.storage.list_milestones(
                    &MilestoneFilter::new(Visibility::All).with_namespace(course_key.as_str()),
                )?;
                let mut milestones_removed = 0;
                for milestone in owned {
                    if self.storage.purge_milestone(milestone.id)? {
                        milestones_removed += 1;
                    }
                }
                EventOutcome {
                    milestones_removed,
                    links_removed: self.cleanup.remove_course_references(course_key.as_str())?,
                }
            }
            PlatformEvent::ContentDeleted { content_key } => EventOutcome {
                milestones_removed: 0,
                links_removed: self.cleanup.remove_content_references(content_key.as_str())?,
            },
        };
        log::info!(
            "handled {} event: {} milestones, {} links removed",
            event.kind(),
            outcome.milestones_removed,
            outcome.links_removed
        );
        Ok(outcome)
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }
}
