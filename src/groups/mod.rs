// SPDX-License-Identifier: MPL-2.0

//! Caching of group membership verdicts.
//!
//! Membership questions that inline group lists cannot answer are expensive,
//! so both verdicts are memoized per `(UID, GID)` pair. Negative answers are
//! as valuable as positive ones and age out the same way.

use lru::LruCache;

use crate::{
    credentials::{Gid, Uid},
    prelude::*,
};

mod membership;

pub use self::membership::{Access, FileMode};

/// The default number of verdicts a membership cache holds.
pub const DEFAULT_CAPACITY: usize = 100;

/// One memoized membership verdict.
#[derive(Debug, Clone, Copy)]
pub struct MembershipEntry {
    is_member: bool,
    expiry: Duration,
}

impl MembershipEntry {
    pub fn new(is_member: bool, expiry: Duration) -> Self {
        Self { is_member, expiry }
    }

    pub fn is_member(&self) -> bool {
        self.is_member
    }

    /// Whether the verdict is past its expiry at `now`. A zero expiry never
    /// lapses.
    pub fn is_expired(&self, now: Duration) -> bool {
        !self.expiry.is_zero() && now >= self.expiry
    }
}

struct GroupsCacheInner {
    entries: LruCache<(Uid, Gid), MembershipEntry>,
    capacity: usize,
}

impl GroupsCacheInner {
    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            if self.entries.pop_lru().is_none() {
                break;
            }
        }
    }
}

/// The LRU+TTL cache of membership verdicts.
pub struct GroupsCache {
    inner: Mutex<GroupsCacheInner>,
}

impl GroupsCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(GroupsCacheInner {
                entries: LruCache::unbounded(),
                capacity,
            }),
        }
    }

    /// Looks a verdict up and promotes it. Expired verdicts are returned;
    /// whether to trust them is the caller's decision.
    pub fn find(&self, uid: Uid, gid: Gid) -> Option<MembershipEntry> {
        let mut inner = self.inner.lock();
        inner.entries.get(&(uid, gid)).copied()
    }

    /// Records a verdict, replacing any earlier one for the same pair; a new
    /// pair past capacity evicts the least-recently-used one.
    pub fn upsert(&self, uid: Uid, gid: Gid, entry: MembershipEntry) {
        let mut inner = self.inner.lock();
        inner.entries.put((uid, gid), entry);
        inner.evict_over_capacity();
    }

    /// Caps the cache at `capacity` verdicts, evicting LRU-first.
    pub fn trim(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.evict_over_capacity();
        debug!("membership cache capped at {} entries", capacity);
    }

    /// Drops every verdict, keeping the capacity.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        debug!("membership cache cleared");
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
