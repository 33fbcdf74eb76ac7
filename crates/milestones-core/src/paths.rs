use crate::associations::AssociationStore;
use crate::error::Result;
use crate::relations::defaults;
use crate::storage::Storage;
use crate::types::{path_key, ContentRef, FulfillmentPath, FulfillmentPaths, UserId, UserRef};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Works out, for each milestone a course still requires of a user, which
/// courses and content units would grant it.
pub struct PathResolver<S: Storage> {
    links: Arc<AssociationStore<S>>,
}

impl<S: Storage> PathResolver<S> {
    pub fn new(links: Arc<AssociationStore<S>>) -> Self {
        Self { links }
    }

    /// Paths for every milestone the course requires and the user lacks.
    /// Milestones nothing fulfills are left out of the map.
    pub fn resolve(&self, course_id: &str, user_id: UserId) -> Result<FulfillmentPaths> {
        let outstanding = self.links.list_courses(
            &[course_id.to_string()],
            Some(defaults::REQUIRES),
            Some(&UserRef::new(user_id)),
        )?;

        let mut paths = FulfillmentPaths::new();
        for record in outstanding {
            let key = path_key(record.milestone.id);
            if paths.contains_key(&key) {
                continue;
            }

            let courses: BTreeSet<String> = self
                .links
                .milestone_courses(record.milestone.id, Some(defaults::FULFILLS))?
                .into_iter()
                .map(|r| r.course_id)
                .collect();
            let content: BTreeSet<ContentRef> = self
                .links
                .milestone_content(record.milestone.id, Some(defaults::FULFILLS))?
                .into_iter()
                .map(|r| ContentRef {
                    course_id: r.course_id,
                    content_id: r.content_id,
                })
                .collect();

            let path = FulfillmentPath {
                courses: (!courses.is_empty()).then(|| courses.into_iter().collect()),
                content: (!content.is_empty()).then(|| content.into_iter().collect()),
            };
            if path.is_empty() {
                log::debug!("milestone {} has no fulfillment path", record.milestone.id);
                continue;
            }
            paths.insert(key, path);
        }
        Ok(paths)
    }
}
