use crate::keys::{ContentKey, CourseKey};
use serde::{Deserialize, Serialize};

/// Removal notices published by the course platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlatformEvent {
    /// The course is gone: milestones namespaced to it and all of its links go too.
    #[serde(rename = "course.deleted")]
    CourseDeleted { course_key: CourseKey },

    /// The content unit is gone: its links go.
    #[serde(rename = "content.deleted")]
    ContentDeleted { content_key: ContentKey },
}

impl PlatformEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformEvent::CourseDeleted { .. } => "course.deleted",
            PlatformEvent::ContentDeleted { .. } => "content.deleted",
        }
    }
}

/// What handling an event removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub milestones_removed: usize,
    pub links_removed: usize,
}
