use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MilestoneError, Result};

/// Type alias for milestone identifiers. Assigned by the store, starting at 1.
pub type MilestoneId = u64;

/// Type alias for relationship type identifiers
pub type RelationshipTypeId = u64;

/// Type alias for link row identifiers (all three link tables)
pub type LinkId = u64;

/// Type alias for user identifiers
pub type UserId = i64;

/// The kind of link between a milestone and a course, content unit or user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipType {
    pub id: RelationshipTypeId,

    /// "requires", "fulfills", or any other registered name.
    pub name: String,

    pub active: bool,

    pub created_at: DateTime<Utc>,
}

/// A named prerequisite/achievement marker scoped to a namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub id: MilestoneId,

    /// Scoping domain, typically a course key string. Never empty.
    pub namespace: String,

    /// Never empty. Unique within the namespace among active milestones.
    pub name: String,

    pub description: String,

    /// Soft-delete flag. Inactive milestones are invisible to active reads.
    pub active: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Fields of a milestone that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneDraft {
    pub namespace: String,
    pub name: String,
    pub description: String,
}

/// Course ↔ milestone link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseMilestone {
    pub id: LinkId,
    pub course_id: String,
    pub milestone_id: MilestoneId,
    pub relationship_type_id: RelationshipTypeId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// (Course, content unit) ↔ milestone link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseContentMilestone {
    pub id: LinkId,
    pub course_id: String,
    pub content_id: String,
    pub milestone_id: MilestoneId,
    pub relationship_type_id: RelationshipTypeId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// User ↔ milestone link. Carries no relationship type: a user link always
/// means the user has collected the milestone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMilestone {
    pub id: LinkId,
    pub user_id: UserId,
    pub milestone_id: MilestoneId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl CourseMilestone {
    pub fn new(
        course_id: impl Into<String>,
        milestone_id: MilestoneId,
        relationship_type_id: RelationshipTypeId,
    ) -> Self {
        Self {
            id: 0,
            course_id: course_id.into(),
            milestone_id,
            relationship_type_id,
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl CourseContentMilestone {
    pub fn new(
        course_id: impl Into<String>,
        content_id: impl Into<String>,
        milestone_id: MilestoneId,
        relationship_type_id: RelationshipTypeId,
    ) -> Self {
        Self {
            id: 0,
            course_id: course_id.into(),
            content_id: content_id.into(),
            milestone_id,
            relationship_type_id,
            active: true,
            created_at: Utc::now(),
        }
    }
}

impl UserMilestone {
    pub fn new(user_id: UserId, milestone_id: MilestoneId) -> Self {
        Self {
            id: 0,
            user_id,
            milestone_id,
            active: true,
            created_at: Utc::now(),
        }
    }
}

// === Request shapes ===

/// Caller-supplied milestone fields. Which fields are required depends on the
/// operation: creation needs namespace and name, update needs all of id,
/// namespace and name, fetch needs id or namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MilestoneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MilestoneId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl MilestoneSpec {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_id(id: MilestoneId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the fields needed to create a milestone and turn them into a draft.
    pub fn to_draft(&self) -> Result<MilestoneDraft> {
        let namespace = required_field(&self.namespace, "namespace")?;
        let name = required_field(&self.name, "name")?;
        Ok(MilestoneDraft {
            namespace,
            name,
            description: self.description.clone().unwrap_or_default(),
        })
    }

    /// Check the fields needed for a full-replacement update.
    pub fn validate_for_update(&self) -> Result<MilestoneId> {
        let id = self
            .id
            .ok_or_else(|| MilestoneError::InvalidMilestone("missing id".into()))?;
        required_field(&self.namespace, "namespace")?;
        required_field(&self.name, "name")?;
        Ok(id)
    }
}

impl From<&Milestone> for MilestoneSpec {
    fn from(milestone: &Milestone) -> Self {
        Self {
            id: Some(milestone.id),
            namespace: Some(milestone.namespace.clone()),
            name: Some(milestone.name.clone()),
            description: Some(milestone.description.clone()),
            active: Some(milestone.active),
        }
    }
}

fn required_field(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(MilestoneError::InvalidMilestone(format!(
            "missing or empty {}",
            field
        ))),
    }
}

/// User identity as handed over by the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    pub id: UserId,
}

impl UserRef {
    pub fn new(id: UserId) -> Self {
        Self { id }
    }

    /// User ids are positive; anything else is not a real user.
    pub fn validate(&self) -> Result<UserId> {
        if self.id > 0 {
            Ok(self.id)
        } else {
            Err(MilestoneError::InvalidUser(format!("user id {}", self.id)))
        }
    }
}

// === Response shapes ===

/// A milestone seen through a course link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseMilestoneRecord {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub course_id: String,
    pub relationship: String,
}

/// A milestone seen through a course content link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseContentMilestoneRecord {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub course_id: String,
    pub content_id: String,
    pub relationship: String,
}

/// A content unit within a course.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContentRef {
    pub course_id: String,
    pub content_id: String,
}

/// Ways to satisfy one outstanding milestone. Empty lists are omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FulfillmentPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentRef>>,
}

impl FulfillmentPath {
    pub fn is_empty(&self) -> bool {
        self.courses.is_none() && self.content.is_none()
    }
}

/// Fulfillment paths keyed by `milestone_<id>`.
pub type FulfillmentPaths = BTreeMap<String, FulfillmentPath>;

/// Key under which a milestone appears in [`FulfillmentPaths`].
pub fn path_key(id: MilestoneId) -> String {
    format!("milestone_{}", id)
}
