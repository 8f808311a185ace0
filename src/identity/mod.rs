// SPDX-License-Identifier: MPL-2.0

//! Caching of identity translations.
//!
//! One entry memoizes everything known about a single identity, keyed by its
//! UID or GID: the GUID, the NT security identifier, the textual name and
//! the group list, each with its own expiry. Entries come from resolver
//! answers and are evicted strict-LRU at a configurable capacity.

use hashbrown::HashMap;
use lru::LruCache;

use crate::{
    credentials::{Gid, Guid, NtSid, Uid},
    prelude::*,
};

mod translate;

/// The default number of entries an identity cache holds.
pub const DEFAULT_CAPACITY: usize = 100;

bitflags! {
    /// The identity facets an entry can hold or a caller can ask for.
    pub struct IdentityFields: u32 {
        const UID    = 1 << 0;
        const GID    = 1 << 1;
        const GUID   = 1 << 2;
        const SID    = 1 << 3;
        const NAME   = 1 << 4;
        const GROUPS = 1 << 5;
    }
}

/// The key of a cache entry: a UID or a GID, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Uid(Uid),
    Gid(Gid),
}

/// Which kind of identity a key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    User,
    Group,
}

impl IdentityKey {
    pub fn kind(&self) -> IdentityKind {
        match self {
            Self::Uid(_) => IdentityKind::User,
            Self::Gid(_) => IdentityKind::Group,
        }
    }

    pub fn uid(&self) -> Option<Uid> {
        match self {
            Self::Uid(uid) => Some(*uid),
            Self::Gid(_) => None,
        }
    }

    pub fn gid(&self) -> Option<Gid> {
        match self {
            Self::Gid(gid) => Some(*gid),
            Self::Uid(_) => None,
        }
    }
}

fn field_expired(expiry: Duration, now: Duration) -> bool {
    !expiry.is_zero() && now >= expiry
}

/// Everything known about one identity.
///
/// Expiries are absolute offsets on the service clock; the zero offset means
/// the field never expires. Expired fields are kept: whether a stale value
/// is still good enough is the caller's decision.
#[derive(Debug, Clone)]
pub struct IdentityEntry {
    key: IdentityKey,
    guid: Option<Guid>,
    guid_expiry: Duration,
    sid: Option<NtSid>,
    sid_expiry: Duration,
    name: Option<String>,
    name_expiry: Duration,
    groups: Option<Vec<Gid>>,
    groups_expiry: Duration,
}

impl IdentityEntry {
    /// Creates an empty entry for `key`.
    pub fn new(key: IdentityKey) -> Self {
        Self {
            key,
            guid: None,
            guid_expiry: Duration::ZERO,
            sid: None,
            sid_expiry: Duration::ZERO,
            name: None,
            name_expiry: Duration::ZERO,
            groups: None,
            groups_expiry: Duration::ZERO,
        }
    }

    pub fn key(&self) -> IdentityKey {
        self.key
    }

    pub fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }

    pub fn sid(&self) -> Option<&NtSid> {
        self.sid.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn groups(&self) -> Option<&[Gid]> {
        self.groups.as_deref()
    }

    pub fn set_guid(&mut self, guid: Guid, expiry: Duration) {
        self.guid = Some(guid);
        self.guid_expiry = expiry;
    }

    pub fn set_sid(&mut self, sid: NtSid, expiry: Duration) {
        self.sid = Some(sid);
        self.sid_expiry = expiry;
    }

    pub fn set_name(&mut self, name: String, expiry: Duration) {
        self.name = Some(name);
        self.name_expiry = expiry;
    }

    pub fn set_groups(&mut self, groups: Vec<Gid>, expiry: Duration) {
        self.groups = Some(groups);
        self.groups_expiry = expiry;
    }

    /// The facets this entry currently holds, expired or not.
    pub fn valid(&self) -> IdentityFields {
        let mut valid = match self.key {
            IdentityKey::Uid(_) => IdentityFields::UID,
            IdentityKey::Gid(_) => IdentityFields::GID,
        };
        if self.guid.is_some() {
            valid |= IdentityFields::GUID;
        }
        if self.sid.is_some() {
            valid |= IdentityFields::SID;
        }
        if self.name.is_some() {
            valid |= IdentityFields::NAME;
        }
        if self.groups.is_some() {
            valid |= IdentityFields::GROUPS;
        }
        valid
    }

    /// Whether `field` is absent or past its expiry at `now`.
    pub fn is_expired(&self, field: IdentityFields, now: Duration) -> bool {
        let (present, expiry) = match field {
            IdentityFields::GUID => (self.guid.is_some(), self.guid_expiry),
            IdentityFields::SID => (self.sid.is_some(), self.sid_expiry),
            IdentityFields::NAME => (self.name.is_some(), self.name_expiry),
            IdentityFields::GROUPS => (self.groups.is_some(), self.groups_expiry),
            // The key fields never expire.
            _ => return !self.valid().contains(field),
        };
        !present || field_expired(expiry, now)
    }

    /// Whether every facet in `wanted` is present and unexpired at `now`.
    pub fn is_fresh(&self, wanted: IdentityFields, now: Duration) -> bool {
        if !self.valid().contains(wanted) {
            return false;
        }
        for field in [
            IdentityFields::GUID,
            IdentityFields::SID,
            IdentityFields::NAME,
            IdentityFields::GROUPS,
        ] {
            if wanted.contains(field) && self.is_expired(field, now) {
                return false;
            }
        }
        true
    }

    /// Overwrites the facets present in `update`, leaving the rest alone.
    fn merge(&mut self, update: IdentityEntry) {
        debug_assert_eq!(self.key, update.key);
        if update.guid.is_some() {
            self.guid = update.guid;
            self.guid_expiry = update.guid_expiry;
        }
        if update.sid.is_some() {
            self.sid = update.sid;
            self.sid_expiry = update.sid_expiry;
        }
        if update.name.is_some() {
            self.name = update.name;
            self.name_expiry = update.name_expiry;
        }
        if update.groups.is_some() {
            self.groups = update.groups;
            self.groups_expiry = update.groups_expiry;
        }
    }
}

struct IdentityCacheInner {
    entries: LruCache<IdentityKey, IdentityEntry>,
    by_guid: HashMap<Guid, IdentityKey>,
    by_sid: HashMap<NtSid, IdentityKey>,
    // A name can belong to at most one user and one group entry at a time.
    by_name: HashMap<String, Vec<IdentityKey>>,
    capacity: usize,
}

impl IdentityCacheInner {
    fn index(&mut self, entry: &IdentityEntry) {
        if let Some(guid) = &entry.guid {
            self.by_guid.insert(*guid, entry.key);
        }
        if let Some(sid) = &entry.sid {
            self.by_sid.insert(sid.clone(), entry.key);
        }
        if let Some(name) = &entry.name {
            let keys = self.by_name.entry(name.clone()).or_default();
            if !keys.contains(&entry.key) {
                keys.push(entry.key);
            }
        }
    }

    fn unindex(&mut self, entry: &IdentityEntry) {
        if let Some(guid) = &entry.guid
            && self.by_guid.get(guid) == Some(&entry.key)
        {
            self.by_guid.remove(guid);
        }
        if let Some(sid) = &entry.sid
            && self.by_sid.get(sid) == Some(&entry.key)
        {
            self.by_sid.remove(sid);
        }
        if let Some(name) = &entry.name
            && let Some(keys) = self.by_name.get_mut(name)
        {
            keys.retain(|key| *key != entry.key);
            if keys.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let Some((_, victim)) = self.entries.pop_lru() else {
                break;
            };
            self.unindex(&victim);
        }
    }
}

/// The LRU+TTL cache of identity translations.
///
/// Reverse lookups by GUID, SID or name go through hash indexes kept in
/// lockstep with the entries, so no lookup ever scans the cache.
pub struct IdentityCache {
    inner: Mutex<IdentityCacheInner>,
}

impl IdentityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(IdentityCacheInner {
                entries: LruCache::unbounded(),
                by_guid: HashMap::new(),
                by_sid: HashMap::new(),
                by_name: HashMap::new(),
                capacity,
            }),
        }
    }

    /// Looks an entry up by key and promotes it.
    ///
    /// Returns the entry only if it holds every facet in `wanted`, expired
    /// or not; per-facet expiry is the caller's decision.
    pub fn find(&self, key: IdentityKey, wanted: IdentityFields) -> Option<IdentityEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get(&key)?;
        if !entry.valid().contains(wanted) {
            return None;
        }
        Some(entry.clone())
    }

    /// Looks an entry up by its GUID and promotes it.
    pub fn find_by_guid(&self, guid: &Guid) -> Option<IdentityEntry> {
        let mut inner = self.inner.lock();
        let key = *inner.by_guid.get(guid)?;
        inner.entries.get(&key).cloned()
    }

    /// Looks an entry up by its security identifier and promotes it.
    pub fn find_by_sid(&self, sid: &NtSid) -> Option<IdentityEntry> {
        let mut inner = self.inner.lock();
        let key = *inner.by_sid.get(sid)?;
        inner.entries.get(&key).cloned()
    }

    /// Looks an entry up by name and kind and promotes it.
    pub fn find_by_name(&self, name: &str, kind: IdentityKind) -> Option<IdentityEntry> {
        let mut inner = self.inner.lock();
        let key = *inner
            .by_name
            .get(name)?
            .iter()
            .find(|key| key.kind() == kind)?;
        inner.entries.get(&key).cloned()
    }

    /// Merges `update` into the entry with the same key, creating it if
    /// needed; a new entry past capacity evicts the least-recently-used one.
    pub fn upsert(&self, update: IdentityEntry) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&update.key) {
            let mut merged = entry.clone();
            merged.merge(update);
            let stale = core::mem::replace(entry, merged.clone());
            inner.unindex(&stale);
            inner.index(&merged);
            return;
        }

        inner.entries.put(update.key, update.clone());
        inner.index(&update);
        inner.evict_over_capacity();
    }

    /// Caps the cache at `capacity` entries, evicting LRU-first.
    pub fn trim(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.evict_over_capacity();
        debug!("identity cache capped at {} entries", capacity);
    }

    /// Drops every entry, keeping the capacity.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.by_guid.clear();
        inner.by_sid.clear();
        inner.by_name.clear();
        debug!("identity cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}
