use crate::error::Result;
use crate::storage::{LinkFilter, Storage, Visibility};
use std::sync::Arc;

/// Removes links that point at courses or content units which no longer exist.
pub struct CascadeCleanup<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> CascadeCleanup<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Delete every content link to `content_id`, active or not.
    pub fn remove_content_references(&self, content_id: &str) -> Result<usize> {
        let removed = self
            .storage
            .delete_content_links(&LinkFilter::new(Visibility::All).with_content(content_id))?;
        log::info!("removed {} milestone links for content {}", removed, content_id);
        Ok(removed)
    }

    /// Delete every course and content link within `course_id`. Milestones
    /// and user links stay.
    pub fn remove_course_references(&self, course_id: &str) -> Result<usize> {
        let filter = LinkFilter::new(Visibility::All).with_course(course_id);
        let courses = self.storage.delete_course_links(&filter)?;
        let content = self.storage.delete_content_links(&filter)?;
        log::info!(
            "removed {} course and {} content milestone links for course {}",
            courses,
            content,
            course_id
        );
        Ok(courses + content)
    }
}
