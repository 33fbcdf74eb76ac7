mod filters;
mod redb_storage;
mod traits;

pub use filters::{LinkFilter, MilestoneFilter, StorageStats, Visibility};
pub use redb_storage::{RedbStorage, CURRENT_SCHEMA_VERSION};
pub use traits::Storage;
