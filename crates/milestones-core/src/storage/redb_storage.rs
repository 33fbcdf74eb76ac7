use crate::error::{MilestoneError, Result};
use crate::storage::filters::{LinkFilter, MilestoneFilter, StorageStats, Visibility};
use crate::storage::traits::Storage;
use crate::types::{
    CourseContentMilestone, CourseMilestone, LinkId, Milestone, MilestoneDraft, MilestoneId,
    RelationshipType, RelationshipTypeId, UserMilestone,
};
use chrono::Utc;
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
    WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Table definitions
const RELATIONSHIP_TYPES: TableDefinition<u64, &[u8]> = TableDefinition::new("relationship_types");
const MILESTONES: TableDefinition<u64, &[u8]> = TableDefinition::new("milestones");
const COURSE_LINKS: TableDefinition<u64, &[u8]> = TableDefinition::new("course_milestones");
const CONTENT_LINKS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("course_content_milestones");
const USER_LINKS: TableDefinition<u64, &[u8]> = TableDefinition::new("user_milestones");

// Unique indexes over active rows
const ACTIVE_RELATIONSHIP_TYPES: TableDefinition<&str, u64> =
    TableDefinition::new("active_relationship_types");
const ACTIVE_MILESTONE_KEYS: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("active_milestone_keys");

// Secondary indexes, keyed by "<field>:<value>"
const MILESTONES_BY_NAMESPACE: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("milestones_by_namespace");
const COURSE_LINK_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("course_milestones_index");
const CONTENT_LINK_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("course_content_milestones_index");
const USER_LINK_INDEX: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("user_milestones_index");

// Metadata table: schema version and id sequences
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";
const SEQ_RELATIONSHIP_TYPES: &str = "seq:relationship_types";
const SEQ_MILESTONES: &str = "seq:milestones";

fn course_key(course_id: &str) -> String {
    format!("course:{}", course_id)
}

fn content_key(content_id: &str) -> String {
    format!("content:{}", content_id)
}

fn user_key(user_id: i64) -> String {
    format!("user:{}", user_id)
}

fn milestone_key(milestone_id: MilestoneId) -> String {
    format!("milestone:{}", milestone_id)
}

/// Key of the (namespace, name) uniqueness index. A tuple key, so no pair of
/// strings can collide with another.
fn active_milestone_key<'a>(namespace: &'a str, name: &'a str) -> (&'a str, &'a str) {
    (namespace, name)
}

fn decode_counter(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_le_bytes)
        .unwrap_or(0)
}

/// A row of one of the three link tables.
trait LinkRow: Serialize + DeserializeOwned + Clone {
    const TABLE: TableDefinition<'static, u64, &'static [u8]>;
    const INDEX: MultimapTableDefinition<'static, &'static str, u64>;
    const SEQUENCE: &'static str;

    fn id(&self) -> LinkId;
    fn set_id(&mut self, id: LinkId);
    fn milestone_id(&self) -> MilestoneId;
    fn relationship_type_id(&self) -> Option<RelationshipTypeId>;

    /// Secondary index entries for this row
    fn index_keys(&self) -> Vec<String>;

    /// Index entries that narrow a lookup, or None for a full scan
    fn lookup_keys(filter: &LinkFilter) -> Option<Vec<String>>;

    fn matches(&self, filter: &LinkFilter) -> bool;

    /// Same unique key, ignoring id and timestamps
    fn same_key(&self, other: &Self) -> bool;
}

impl LinkRow for CourseMilestone {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = COURSE_LINKS;
    const INDEX: MultimapTableDefinition<'static, &'static str, u64> = COURSE_LINK_INDEX;
    const SEQUENCE: &'static str = "seq:course_milestones";

    fn id(&self) -> LinkId {
        self.id
    }

    fn set_id(&mut self, id: LinkId) {
        self.id = id;
    }

    fn milestone_id(&self) -> MilestoneId {
        self.milestone_id
    }

    fn relationship_type_id(&self) -> Option<RelationshipTypeId> {
        Some(self.relationship_type_id)
    }

    fn index_keys(&self) -> Vec<String> {
        vec![course_key(&self.course_id), milestone_key(self.milestone_id)]
    }

    fn lookup_keys(filter: &LinkFilter) -> Option<Vec<String>> {
        if let Some(milestone) = filter.milestone {
            return Some(vec![milestone_key(milestone)]);
        }
        filter
            .course_ids
            .as_ref()
            .map(|ids| ids.iter().map(|c| course_key(c)).collect())
    }

    fn matches(&self, filter: &LinkFilter) -> bool {
        filter.matches_course(self)
    }

    fn same_key(&self, other: &Self) -> bool {
        self.course_id == other.course_id
            && self.milestone_id == other.milestone_id
            && self.relationship_type_id == other.relationship_type_id
    }
}

impl LinkRow for CourseContentMilestone {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = CONTENT_LINKS;
    const INDEX: MultimapTableDefinition<'static, &'static str, u64> = CONTENT_LINK_INDEX;
    const SEQUENCE: &'static str = "seq:course_content_milestones";

    fn id(&self) -> LinkId {
        self.id
    }

    fn set_id(&mut self, id: LinkId) {
        self.id = id;
    }

    fn milestone_id(&self) -> MilestoneId {
        self.milestone_id
    }

    fn relationship_type_id(&self) -> Option<RelationshipTypeId> {
        Some(self.relationship_type_id)
    }

    fn index_keys(&self) -> Vec<String> {
        vec![
            course_key(&self.course_id),
            content_key(&self.content_id),
            milestone_key(self.milestone_id),
        ]
    }

    fn lookup_keys(filter: &LinkFilter) -> Option<Vec<String>> {
        if let Some(milestone) = filter.milestone {
            return Some(vec![milestone_key(milestone)]);
        }
        if let Some(content) = &filter.content_id {
            return Some(vec![content_key(content)]);
        }
        filter
            .course_ids
            .as_ref()
            .map(|ids| ids.iter().map(|c| course_key(c)).collect())
    }

    fn matches(&self, filter: &LinkFilter) -> bool {
        filter.matches_content(self)
    }

    fn same_key(&self, other: &Self) -> bool {
        self.course_id == other.course_id
            && self.content_id == other.content_id
            && self.milestone_id == other.milestone_id
            && self.relationship_type_id == other.relationship_type_id
    }
}

impl LinkRow for UserMilestone {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = USER_LINKS;
    const INDEX: MultimapTableDefinition<'static, &'static str, u64> = USER_LINK_INDEX;
    const SEQUENCE: &'static str = "seq:user_milestones";

    fn id(&self) -> LinkId {
        self.id
    }

    fn set_id(&mut self, id: LinkId) {
        self.id = id;
    }

    fn milestone_id(&self) -> MilestoneId {
        self.milestone_id
    }

    fn relationship_type_id(&self) -> Option<RelationshipTypeId> {
        None
    }

    fn index_keys(&self) -> Vec<String> {
        vec![user_key(self.user_id), milestone_key(self.milestone_id)]
    }

    fn lookup_keys(filter: &LinkFilter) -> Option<Vec<String>> {
        if let Some(milestone) = filter.milestone {
            return Some(vec![milestone_key(milestone)]);
        }
        filter.user_id.map(|u| vec![user_key(u)])
    }

    fn matches(&self, filter: &LinkFilter) -> bool {
        filter.matches_user(self)
    }

    fn same_key(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.milestone_id == other.milestone_id
    }
}

/// Redb-based storage implementation
pub struct RedbStorage {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbStorage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MilestoneError::Schema(format!("Failed to create directory: {}", e))
            })?;
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;

        if !is_new {
            Self::check_schema_version(&db)?;
        }

        // Ensure tables exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RELATIONSHIP_TYPES)?;
            let _ = write_txn.open_table(MILESTONES)?;
            let _ = write_txn.open_table(COURSE_LINKS)?;
            let _ = write_txn.open_table(CONTENT_LINKS)?;
            let _ = write_txn.open_table(USER_LINKS)?;
            let _ = write_txn.open_table(ACTIVE_RELATIONSHIP_TYPES)?;
            let _ = write_txn.open_table(ACTIVE_MILESTONE_KEYS)?;
            let _ = write_txn.open_multimap_table(MILESTONES_BY_NAMESPACE)?;
            let _ = write_txn.open_multimap_table(COURSE_LINK_INDEX)?;
            let _ = write_txn.open_multimap_table(CONTENT_LINK_INDEX)?;
            let _ = write_txn.open_multimap_table(USER_LINK_INDEX)?;
            let mut meta = write_txn.open_table(META)?;
            if is_new {
                meta.insert(
                    SCHEMA_VERSION_KEY,
                    CURRENT_SCHEMA_VERSION.to_string().as_bytes(),
                )?;
            }
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Check schema version. Returns error if the file was written by another version.
    fn check_schema_version(db: &Database) -> Result<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table
                .and_then(|t| {
                    t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                        std::str::from_utf8(v.value())
                            .ok()
                            .and_then(|s| s.parse::<u32>().ok())
                    })
                })
                .unwrap_or(CURRENT_SCHEMA_VERSION)
        };

        match version.cmp(&CURRENT_SCHEMA_VERSION) {
            std::cmp::Ordering::Equal => Ok(()),
            std::cmp::Ordering::Less => Err(MilestoneError::Schema(format!(
                "Database schema v{} is older than current v{}.",
                version, CURRENT_SCHEMA_VERSION
            ))),
            std::cmp::Ordering::Greater => Err(MilestoneError::Schema(format!(
                "Database schema v{} is newer than this binary v{}. Upgrade milestones.",
                version, CURRENT_SCHEMA_VERSION
            ))),
        }
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocate the next id of a sequence inside the caller's transaction
    fn next_id(txn: &WriteTransaction, sequence: &str) -> Result<u64> {
        let mut meta = txn.open_table(META)?;
        let current = meta
            .get(sequence)?
            .map(|v| decode_counter(v.value()))
            .unwrap_or(0);
        let next = current + 1;
        meta.insert(sequence, next.to_le_bytes().as_slice())?;
        Ok(next)
    }

    fn load_row<T, R>(table: &R, id: u64) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        R: ReadableTable<u64, &'static [u8]>,
    {
        match table.get(id)? {
            Some(bytes) => Ok(Some(bincode::deserialize(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn ids_for<I>(index: &I, key: &str) -> Result<Vec<u64>>
    where
        I: ReadableMultimapTable<&'static str, u64>,
    {
        let ids = index
            .get(key)?
            .map(|result| result.map(|guard| guard.value()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Rows of a link table matching the filter, in ascending id order.
    fn select_links<L, R, I>(table: &R, index: &I, filter: &LinkFilter) -> Result<Vec<L>>
    where
        L: LinkRow,
        R: ReadableTable<u64, &'static [u8]>,
        I: ReadableMultimapTable<&'static str, u64>,
    {
        let mut rows = Vec::new();
        match L::lookup_keys(filter) {
            Some(keys) => {
                let mut ids = BTreeSet::new();
                for key in keys {
                    ids.extend(Self::ids_for(index, &key)?);
                }
                for id in ids {
                    if let Some(row) = Self::load_row::<L, _>(table, id)? {
                        if row.matches(filter) {
                            rows.push(row);
                        }
                    }
                }
            }
            None => {
                for item in table.iter()? {
                    let (_, value) = item?;
                    let row: L = bincode::deserialize(value.value())?;
                    if row.matches(filter) {
                        rows.push(row);
                    }
                }
            }
        }
        Ok(rows)
    }

    fn insert_link<L: LinkRow>(txn: &WriteTransaction, link: &L) -> Result<()> {
        let bytes = bincode::serialize(link)?;
        {
            let mut table = txn.open_table(L::TABLE)?;
            table.insert(link.id(), bytes.as_slice())?;
        }
        {
            let mut index = txn.open_multimap_table(L::INDEX)?;
            for key in link.index_keys() {
                index.insert(key.as_str(), link.id())?;
            }
        }
        Ok(())
    }

    fn remove_links<L: LinkRow>(txn: &WriteTransaction, links: &[L]) -> Result<()> {
        {
            let mut table = txn.open_table(L::TABLE)?;
            for link in links {
                table.remove(link.id())?;
            }
        }
        {
            let mut index = txn.open_multimap_table(L::INDEX)?;
            for link in links {
                for key in link.index_keys() {
                    index.remove(key.as_str(), link.id())?;
                }
            }
        }
        Ok(())
    }

    fn select_links_for_write<L: LinkRow>(
        txn: &WriteTransaction,
        filter: &LinkFilter,
    ) -> Result<Vec<L>> {
        let table = txn.open_table(L::TABLE)?;
        let index = txn.open_multimap_table(L::INDEX)?;
        Self::select_links(&table, &index, filter)
    }

    fn require_active_milestone(txn: &WriteTransaction, id: MilestoneId) -> Result<()> {
        let table = txn.open_table(MILESTONES)?;
        match Self::load_row::<Milestone, _>(&table, id)? {
            Some(milestone) if milestone.active => Ok(()),
            _ => Err(MilestoneError::InvalidMilestone(format!(
                "milestone {} does not exist or is inactive",
                id
            ))),
        }
    }

    fn require_active_relationship_type(
        txn: &WriteTransaction,
        id: RelationshipTypeId,
    ) -> Result<()> {
        let table = txn.open_table(RELATIONSHIP_TYPES)?;
        match Self::load_row::<RelationshipType, _>(&table, id)? {
            Some(rt) if rt.active => Ok(()),
            _ => Err(MilestoneError::InvalidRelationshipType(format!(
                "relationship type {} does not exist or is inactive",
                id
            ))),
        }
    }

    fn get_or_create_link<L: LinkRow>(&self, link: &L) -> Result<L> {
        let write_txn = self.db.begin_write()?;

        Self::require_active_milestone(&write_txn, link.milestone_id())?;
        if let Some(rt) = link.relationship_type_id() {
            Self::require_active_relationship_type(&write_txn, rt)?;
        }

        let existing = {
            let filter = LinkFilter::new(Visibility::Active).with_milestone(link.milestone_id());
            Self::select_links_for_write::<L>(&write_txn, &filter)?
                .into_iter()
                .find(|row| row.same_key(link))
        };

        if let Some(row) = existing {
            write_txn.abort()?;
            return Ok(row);
        }

        let mut row = link.clone();
        row.set_id(Self::next_id(&write_txn, L::SEQUENCE)?);
        Self::insert_link(&write_txn, &row)?;
        write_txn.commit()?;
        Ok(row)
    }

    fn delete_links<L: LinkRow>(&self, filter: &LinkFilter) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let rows = Self::select_links_for_write::<L>(&write_txn, filter)?;
        if rows.is_empty() {
            write_txn.abort()?;
            return Ok(0);
        }
        Self::remove_links(&write_txn, &rows)?;
        write_txn.commit()?;
        Ok(rows.len())
    }

    fn count_rows(&self, definition: TableDefinition<'static, u64, &'static [u8]>) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(definition)?;
        let mut count = 0u64;
        for item in table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl Storage for RedbStorage {
    fn find_relationship_type(
        &self,
        name: &str,
        visibility: Visibility,
    ) -> Result<Option<RelationshipType>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RELATIONSHIP_TYPES)?;

        if visibility == Visibility::Active {
            let by_name = read_txn.open_table(ACTIVE_RELATIONSHIP_TYPES)?;
            let id = by_name.get(name)?.map(|guard| guard.value());
            return match id {
                Some(id) => Ok(Self::load_row::<RelationshipType, _>(&table, id)?
                    .filter(|rt| rt.active)),
                None => Ok(None),
            };
        }

        for item in table.iter()? {
            let (_, value) = item?;
            let rt: RelationshipType = bincode::deserialize(value.value())?;
            if rt.name == name {
                return Ok(Some(rt));
            }
        }
        Ok(None)
    }

    fn get_relationship_type(
        &self,
        id: RelationshipTypeId,
        visibility: Visibility,
    ) -> Result<Option<RelationshipType>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RELATIONSHIP_TYPES)?;
        Ok(Self::load_row::<RelationshipType, _>(&table, id)?
            .filter(|rt| visibility.admits(rt.active)))
    }

    fn get_or_create_relationship_type(&self, name: &str) -> Result<RelationshipType> {
        let write_txn = self.db.begin_write()?;

        let existing = {
            let by_name = write_txn.open_table(ACTIVE_RELATIONSHIP_TYPES)?;
            let id = by_name.get(name)?.map(|guard| guard.value());
            match id {
                Some(id) => {
                    let table = write_txn.open_table(RELATIONSHIP_TYPES)?;
                    Self::load_row::<RelationshipType, _>(&table, id)?
                }
                None => None,
            }
        };

        if let Some(rt) = existing {
            write_txn.abort()?;
            return Ok(rt);
        }

        let rt = RelationshipType {
            id: Self::next_id(&write_txn, SEQ_RELATIONSHIP_TYPES)?,
            name: name.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        let bytes = bincode::serialize(&rt)?;
        {
            let mut table = write_txn.open_table(RELATIONSHIP_TYPES)?;
            table.insert(rt.id, bytes.as_slice())?;
        }
        {
            let mut by_name = write_txn.open_table(ACTIVE_RELATIONSHIP_TYPES)?;
            by_name.insert(name, rt.id)?;
        }
        write_txn.commit()?;
        Ok(rt)
    }

    fn get_or_create_milestone(&self, draft: &MilestoneDraft) -> Result<(Milestone, bool)> {
        let key = active_milestone_key(&draft.namespace, &draft.name);
        let write_txn = self.db.begin_write()?;

        let existing = {
            let keys = write_txn.open_table(ACTIVE_MILESTONE_KEYS)?;
            let id = keys.get(key)?.map(|guard| guard.value());
            match id {
                Some(id) => {
                    let table = write_txn.open_table(MILESTONES)?;
                    Self::load_row::<Milestone, _>(&table, id)?
                }
                None => None,
            }
        };

        if let Some(milestone) = existing {
            write_txn.abort()?;
            return Ok((milestone, false));
        }

        let now = Utc::now();
        let milestone = Milestone {
            id: Self::next_id(&write_txn, SEQ_MILESTONES)?,
            namespace: draft.namespace.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        let bytes = bincode::serialize(&milestone)?;
        {
            let mut table = write_txn.open_table(MILESTONES)?;
            table.insert(milestone.id, bytes.as_slice())?;
        }
        {
            let mut keys = write_txn.open_table(ACTIVE_MILESTONE_KEYS)?;
            keys.insert(key, milestone.id)?;
        }
        {
            let mut by_namespace = write_txn.open_multimap_table(MILESTONES_BY_NAMESPACE)?;
            by_namespace.insert(milestone.namespace.as_str(), milestone.id)?;
        }
        write_txn.commit()?;
        Ok((milestone, true))
    }

    fn get_milestone(&self, id: MilestoneId, visibility: Visibility) -> Result<Option<Milestone>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MILESTONES)?;
        Ok(Self::load_row::<Milestone, _>(&table, id)?.filter(|m| visibility.admits(m.active)))
    }

    fn update_milestone(&self, milestone: &Milestone) -> Result<()> {
        let write_txn = self.db.begin_write()?;

        let old = {
            let table = write_txn.open_table(MILESTONES)?;
            Self::load_row::<Milestone, _>(&table, milestone.id)?
        }
        .ok_or_else(|| {
            MilestoneError::InvalidMilestone(format!("milestone {} not found", milestone.id))
        })?;

        let old_key = active_milestone_key(&old.namespace, &old.name);
        let new_key = active_milestone_key(&milestone.namespace, &milestone.name);

        {
            let mut keys = write_txn.open_table(ACTIVE_MILESTONE_KEYS)?;
            if milestone.active {
                let owner = keys.get(new_key)?.map(|guard| guard.value());
                if let Some(owner) = owner {
                    if owner != milestone.id {
                        return Err(MilestoneError::InvalidMilestone(format!(
                            "an active milestone named '{}' already exists in '{}'",
                            milestone.name, milestone.namespace
                        )));
                    }
                }
            }
            if old.active {
                let owner = keys.get(old_key)?.map(|guard| guard.value());
                if owner == Some(old.id) {
                    keys.remove(old_key)?;
                }
            }
            if milestone.active {
                keys.insert(new_key, milestone.id)?;
            }
        }

        if old.namespace != milestone.namespace {
            let mut by_namespace = write_txn.open_multimap_table(MILESTONES_BY_NAMESPACE)?;
            by_namespace.remove(old.namespace.as_str(), old.id)?;
            by_namespace.insert(milestone.namespace.as_str(), milestone.id)?;
        }

        let mut updated = milestone.clone();
        updated.created_at = old.created_at;
        updated.updated_at = Utc::now();
        let bytes = bincode::serialize(&updated)?;
        {
            let mut table = write_txn.open_table(MILESTONES)?;
            table.insert(updated.id, bytes.as_slice())?;
        }

        write_txn.commit()?;
        Ok(())
    }

    fn list_milestones(&self, filter: &MilestoneFilter) -> Result<Vec<Milestone>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MILESTONES)?;

        let candidates: Vec<Milestone> = if let Some(id) = filter.id {
            Self::load_row::<Milestone, _>(&table, id)?.into_iter().collect()
        } else if let Some(namespace) = &filter.namespace {
            let by_namespace = read_txn.open_multimap_table(MILESTONES_BY_NAMESPACE)?;
            let mut ids = Self::ids_for(&by_namespace, namespace)?;
            ids.sort_unstable();
            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(m) = Self::load_row::<Milestone, _>(&table, id)? {
                    rows.push(m);
                }
            }
            rows
        } else {
            let mut rows = Vec::new();
            for item in table.iter()? {
                let (_, value) = item?;
                rows.push(bincode::deserialize(value.value())?);
            }
            rows
        };

        Ok(candidates
            .into_iter()
            .filter(|m| filter.visibility.admits(m.active))
            .filter(|m| {
                filter
                    .namespace
                    .as_ref()
                    .map_or(true, |ns| *ns == m.namespace)
            })
            .collect())
    }

    fn purge_milestone(&self, id: MilestoneId) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let links = LinkFilter::new(Visibility::All).with_milestone(id);

        let course_links = Self::select_links_for_write::<CourseMilestone>(&write_txn, &links)?;
        Self::remove_links(&write_txn, &course_links)?;
        let content_links =
            Self::select_links_for_write::<CourseContentMilestone>(&write_txn, &links)?;
        Self::remove_links(&write_txn, &content_links)?;
        let user_links = Self::select_links_for_write::<UserMilestone>(&write_txn, &links)?;
        Self::remove_links(&write_txn, &user_links)?;

        let old = {
            let mut table = write_txn.open_table(MILESTONES)?;
            let old = Self::load_row::<Milestone, _>(&table, id)?;
            table.remove(id)?;
            old
        };

        if let Some(old) = &old {
            {
                let mut keys = write_txn.open_table(ACTIVE_MILESTONE_KEYS)?;
                let key = active_milestone_key(&old.namespace, &old.name);
                let owner = keys.get(key)?.map(|guard| guard.value());
                if owner == Some(id) {
                    keys.remove(key)?;
                }
            }
            let mut by_namespace = write_txn.open_multimap_table(MILESTONES_BY_NAMESPACE)?;
            by_namespace.remove(old.namespace.as_str(), id)?;
        }

        write_txn.commit()?;
        Ok(old.is_some())
    }

    fn get_or_create_course_link(&self, link: &CourseMilestone) -> Result<CourseMilestone> {
        self.get_or_create_link(link)
    }

    fn list_course_links(&self, filter: &LinkFilter) -> Result<Vec<CourseMilestone>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COURSE_LINKS)?;
        let index = read_txn.open_multimap_table(COURSE_LINK_INDEX)?;
        let mut rows: Vec<CourseMilestone> = Self::select_links(&table, &index, filter)?;

        // Same snapshot as the course rows, so the difference is consistent
        if let Some(user_id) = filter.excluding_user {
            let user_table = read_txn.open_table(USER_LINKS)?;
            let user_index = read_txn.open_multimap_table(USER_LINK_INDEX)?;
            let held: Vec<UserMilestone> = Self::select_links(
                &user_table,
                &user_index,
                &LinkFilter::new(Visibility::Active).with_user(user_id),
            )?;
            let held: HashSet<MilestoneId> = held.iter().map(|l| l.milestone_id).collect();
            rows.retain(|link| !held.contains(&link.milestone_id));
        }

        Ok(rows)
    }

    fn delete_course_links(&self, filter: &LinkFilter) -> Result<usize> {
        self.delete_links::<CourseMilestone>(filter)
    }

    fn get_or_create_content_link(
        &self,
        link: &CourseContentMilestone,
    ) -> Result<CourseContentMilestone> {
        self.get_or_create_link(link)
    }

    fn list_content_links(&self, filter: &LinkFilter) -> Result<Vec<CourseContentMilestone>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONTENT_LINKS)?;
        let index = read_txn.open_multimap_table(CONTENT_LINK_INDEX)?;
        Self::select_links(&table, &index, filter)
    }

    fn delete_content_links(&self, filter: &LinkFilter) -> Result<usize> {
        self.delete_links::<CourseContentMilestone>(filter)
    }

    fn get_or_create_user_link(&self, link: &UserMilestone) -> Result<UserMilestone> {
        self.get_or_create_link(link)
    }

    fn list_user_links(&self, filter: &LinkFilter) -> Result<Vec<UserMilestone>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USER_LINKS)?;
        let index = read_txn.open_multimap_table(USER_LINK_INDEX)?;
        Self::select_links(&table, &index, filter)
    }

    fn delete_user_links(&self, filter: &LinkFilter) -> Result<usize> {
        self.delete_links::<UserMilestone>(filter)
    }

    fn stats(&self) -> Result<StorageStats> {
        let active_milestone_count = {
            let read_txn = self.db.begin_read()?;
            let keys = read_txn.open_table(ACTIVE_MILESTONE_KEYS)?;
            let mut count = 0u64;
            for item in keys.iter()? {
                item?;
                count += 1;
            }
            count
        };

        let db_size_bytes = std::fs::metadata(&self.path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StorageStats {
            relationship_type_count: self.count_rows(RELATIONSHIP_TYPES)?,
            milestone_count: self.count_rows(MILESTONES)?,
            active_milestone_count,
            course_link_count: self.count_rows(COURSE_LINKS)?,
            content_link_count: self.count_rows(CONTENT_LINKS)?,
            user_link_count: self.count_rows(USER_LINKS)?,
            db_size_bytes,
        })
    }
}
