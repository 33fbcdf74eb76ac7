use crate::types::{
    CourseContentMilestone, CourseMilestone, MilestoneId, RelationshipTypeId, UserId,
    UserMilestone,
};

/// Which rows a read may see. Every read states this explicitly; there is no
/// default, so an active-only filter can never be forgotten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Only rows whose `active` flag is set
    Active,
    /// Active and soft-deleted rows alike
    All,
}

impl Visibility {
    pub fn admits(self, active: bool) -> bool {
        match self {
            Visibility::Active => active,
            Visibility::All => true,
        }
    }
}

/// Filter criteria for querying milestones
#[derive(Debug, Clone)]
pub struct MilestoneFilter {
    pub visibility: Visibility,
    pub id: Option<MilestoneId>,
    pub namespace: Option<String>,
}

impl MilestoneFilter {
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            id: None,
            namespace: None,
        }
    }

    pub fn with_id(mut self, id: MilestoneId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Filter criteria for querying any of the three link tables.
///
/// Criteria that a link kind does not carry are ignored for that kind
/// (e.g. `relationship` for user links).
#[derive(Debug, Clone)]
pub struct LinkFilter {
    pub visibility: Visibility,
    /// Links whose course id is one of these
    pub course_ids: Option<Vec<String>>,
    pub content_id: Option<String>,
    pub user_id: Option<UserId>,
    pub milestone: Option<MilestoneId>,
    pub relationship: Option<RelationshipTypeId>,
    /// Course links only: drop links whose milestone the user already holds
    pub excluding_user: Option<UserId>,
}

impl LinkFilter {
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            course_ids: None,
            content_id: None,
            user_id: None,
            milestone: None,
            relationship: None,
            excluding_user: None,
        }
    }

    pub fn with_course(self, course_id: impl Into<String>) -> Self {
        self.with_courses(vec![course_id.into()])
    }

    pub fn with_courses(mut self, course_ids: Vec<String>) -> Self {
        self.course_ids = Some(course_ids);
        self
    }

    pub fn with_content(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_milestone(mut self, milestone: MilestoneId) -> Self {
        self.milestone = Some(milestone);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipTypeId) -> Self {
        self.relationship = Some(relationship);
        self
    }

    pub fn excluding_user(mut self, user_id: UserId) -> Self {
        self.excluding_user = Some(user_id);
        self
    }

    fn course_matches(&self, course_id: &str) -> bool {
        self.course_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|c| c == course_id))
    }

    fn milestone_matches(&self, milestone: MilestoneId) -> bool {
        self.milestone.map_or(true, |m| m == milestone)
    }

    fn relationship_matches(&self, relationship: RelationshipTypeId) -> bool {
        self.relationship.map_or(true, |r| r == relationship)
    }

    /// Check a course link against everything but `excluding_user`, which
    /// needs the user table and is applied by the store.
    pub fn matches_course(&self, link: &CourseMilestone) -> bool {
        self.visibility.admits(link.active)
            && self.course_matches(&link.course_id)
            && self.milestone_matches(link.milestone_id)
            && self.relationship_matches(link.relationship_type_id)
    }

    pub fn matches_content(&self, link: &CourseContentMilestone) -> bool {
        self.visibility.admits(link.active)
            && self.course_matches(&link.course_id)
            && self
                .content_id
                .as_ref()
                .map_or(true, |c| *c == link.content_id)
            && self.milestone_matches(link.milestone_id)
            && self.relationship_matches(link.relationship_type_id)
    }

    pub fn matches_user(&self, link: &UserMilestone) -> bool {
        self.visibility.admits(link.active)
            && self.user_id.map_or(true, |u| u == link.user_id)
            && self.milestone_matches(link.milestone_id)
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub relationship_type_count: u64,
    pub milestone_count: u64,
    pub active_milestone_count: u64,
    pub course_link_count: u64,
    pub content_link_count: u64,
    pub user_link_count: u64,
    pub db_size_bytes: u64,
}
