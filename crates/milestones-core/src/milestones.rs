use crate::error::{MilestoneError, Result};
use crate::storage::{MilestoneFilter, Storage, Visibility};
use crate::types::{Milestone, MilestoneSpec};
use std::sync::Arc;

/// Milestone lifecycle: idempotent creation, full-replacement update,
/// cascading delete and selector-based fetch.
pub struct MilestoneStore<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> MilestoneStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create the milestone, or return the active one with the same
    /// namespace and name. An existing milestone keeps its description.
    pub fn create(&self, spec: &MilestoneSpec) -> Result<Milestone> {
        let draft = spec.to_draft()?;
        let (milestone, created) = self.storage.get_or_create_milestone(&draft)?;
        if !created {
            log::debug!(
                "milestone '{}' already exists in '{}' as {}",
                milestone.name,
                milestone.namespace,
                milestone.id
            );
        }
        Ok(milestone)
    }

    /// Replace name, namespace, description and active flag of an active
    /// milestone. An omitted `active` means the milestone stays active.
    pub fn update(&self, spec: &MilestoneSpec) -> Result<Milestone> {
        let id = spec.validate_for_update()?;
        let draft = spec.to_draft()?;

        let current = self
            .storage
            .get_milestone(id, Visibility::Active)?
            .ok_or_else(|| MilestoneError::InvalidMilestone(format!("milestone {} not found", id)))?;

        let replacement = Milestone {
            namespace: draft.namespace,
            name: draft.name,
            description: draft.description,
            active: spec.active.unwrap_or(true),
            ..current
        };
        self.storage.update_milestone(&replacement)?;

        self.storage
            .get_milestone(id, Visibility::All)?
            .ok_or_else(|| MilestoneError::InvalidMilestone(format!("milestone {} vanished", id)))
    }

    /// Remove the milestone named by `spec.id` and every link to it.
    /// A missing id or an unknown milestone is not an error.
    pub fn delete(&self, spec: &MilestoneSpec) -> Result<()> {
        let Some(id) = spec.id else {
            log::debug!("milestone delete without id ignored");
            return Ok(());
        };
        if self.storage.purge_milestone(id)? {
            log::info!("deleted milestone {} and its links", id);
        }
        Ok(())
    }

    /// Active milestones selected by id, else by namespace. Without either
    /// selector nothing is returned; the table is never scanned wholesale.
    pub fn fetch(&self, spec: Option<&MilestoneSpec>) -> Result<Vec<Milestone>> {
        let spec = spec.ok_or_else(|| MilestoneError::InvalidMilestone("no milestone given".into()))?;

        if let Some(id) = spec.id {
            return self
                .storage
                .list_milestones(&MilestoneFilter::new(Visibility::Active).with_id(id));
        }
        if let Some(namespace) = &spec.namespace {
            return self.storage.list_milestones(
                &MilestoneFilter::new(Visibility::Active).with_namespace(namespace.clone()),
            );
        }
        Ok(Vec::new())
    }
}
