use crate::error::{MilestoneError, Result};
use crate::storage::{Storage, Visibility};
use crate::types::RelationshipType;
use std::sync::Arc;

/// The relationship names that exist without registration.
pub mod defaults {
    /// A course (or content unit) needs the milestone before it can be accessed.
    pub const REQUIRES: &str = "requires";

    /// Completing the course (or content unit) grants the milestone.
    pub const FULFILLS: &str = "fulfills";

    pub fn all() -> [&'static str; 2] {
        [REQUIRES, FULFILLS]
    }

    pub fn is_well_known(name: &str) -> bool {
        all().contains(&name)
    }
}

/// Resolves relationship names to canonical, active relationship types.
pub struct RelationshipRegistry<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> RelationshipRegistry<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Look up the active type named `name`. The well-known names are created
    /// on first use; any other unregistered name is rejected.
    pub fn resolve(&self, name: &str) -> Result<RelationshipType> {
        if let Some(rt) = self
            .storage
            .find_relationship_type(name, Visibility::Active)?
        {
            return Ok(rt);
        }

        if defaults::is_well_known(name) {
            log::debug!("registering relationship type '{}'", name);
            return self.storage.get_or_create_relationship_type(name);
        }

        Err(MilestoneError::InvalidRelationshipType(format!(
            "'{}' is not a registered relationship type",
            name
        )))
    }

    /// Resolve an optional relationship filter.
    pub fn resolve_optional(&self, name: Option<&str>) -> Result<Option<RelationshipType>> {
        name.map(|n| self.resolve(n)).transpose()
    }
}
