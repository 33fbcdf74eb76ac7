pub mod types;
pub mod storage;
pub mod error;
pub mod relations;
pub mod milestones;
pub mod associations;
pub mod paths;
pub mod cleanup;
pub mod keys;
pub mod events;
pub mod api;

pub use error::{MilestoneError, Result};
pub use types::*;
pub use storage::{
    LinkFilter, MilestoneFilter, RedbStorage, Storage, StorageStats, Visibility,
    CURRENT_SCHEMA_VERSION,
};
pub use relations::{defaults, RelationshipRegistry};
pub use milestones::MilestoneStore;
pub use associations::AssociationStore;
pub use paths::PathResolver;
pub use cleanup::CascadeCleanup;
pub use keys::{ContentKey, CourseKey};
pub use events::{EventOutcome, PlatformEvent};
pub use api::Milestones;

#[cfg(test)]
mod tests;
