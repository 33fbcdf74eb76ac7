use crate::error::Result;
use crate::storage::filters::{LinkFilter, MilestoneFilter, StorageStats, Visibility};
use crate::types::{
    CourseContentMilestone, CourseMilestone, Milestone, MilestoneDraft, MilestoneId,
    RelationshipType, RelationshipTypeId, UserMilestone,
};

/// Storage trait for milestones and their links.
///
/// Every `get_or_create_*` method is an atomic upsert by unique key: the
/// lookup and the insert happen in one write transaction, so concurrent
/// callers asking for the same key observe a single row. Every `delete_*`
/// method is idempotent and reports how many rows it removed.
pub trait Storage: Send + Sync {
    // === Relationship types ===

    /// Find a relationship type by exact name
    fn find_relationship_type(
        &self,
        name: &str,
        visibility: Visibility,
    ) -> Result<Option<RelationshipType>>;

    /// Retrieve a relationship type by ID
    fn get_relationship_type(
        &self,
        id: RelationshipTypeId,
        visibility: Visibility,
    ) -> Result<Option<RelationshipType>>;

    /// Return the active type with this name, creating it if needed
    fn get_or_create_relationship_type(&self, name: &str) -> Result<RelationshipType>;

    // === Milestones ===

    /// Return the active milestone with the draft's (namespace, name), creating
    /// it if needed. The flag is true when a new row was written.
    fn get_or_create_milestone(&self, draft: &MilestoneDraft) -> Result<(Milestone, bool)>;

    /// Retrieve a milestone by ID
    fn get_milestone(&self, id: MilestoneId, visibility: Visibility) -> Result<Option<Milestone>>;

    /// Replace a stored milestone. Fails with `InvalidMilestone` when the ID is
    /// unknown or when the new (namespace, name) belongs to another active row.
    fn update_milestone(&self, milestone: &Milestone) -> Result<()>;

    /// List milestones matching the filter
    fn list_milestones(&self, filter: &MilestoneFilter) -> Result<Vec<Milestone>>;

    /// Hard delete a milestone together with every link that references it
    fn purge_milestone(&self, id: MilestoneId) -> Result<bool>;

    // === Course links ===

    fn get_or_create_course_link(&self, link: &CourseMilestone) -> Result<CourseMilestone>;

    /// List course links. Honors `excluding_user`.
    fn list_course_links(&self, filter: &LinkFilter) -> Result<Vec<CourseMilestone>>;

    fn delete_course_links(&self, filter: &LinkFilter) -> Result<usize>;

    // === Course content links ===

    fn get_or_create_content_link(
        &self,
        link: &CourseContentMilestone,
    ) -> Result<CourseContentMilestone>;

    fn list_content_links(&self, filter: &LinkFilter) -> Result<Vec<CourseContentMilestone>>;

    fn delete_content_links(&self, filter: &LinkFilter) -> Result<usize>;

    // === User links ===

    fn get_or_create_user_link(&self, link: &UserMilestone) -> Result<UserMilestone>;

    fn list_user_links(&self, filter: &LinkFilter) -> Result<Vec<UserMilestone>>;

    fn delete_user_links(&self, filter: &LinkFilter) -> Result<usize>;

    // === Maintenance ===

    /// Get database statistics
    fn stats(&self) -> Result<StorageStats>;
}
