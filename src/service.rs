// SPDX-License-Identifier: MPL-2.0

//! The assembled identity service.
//!
//! [`Kauth`] owns the credential store, both caches and the resolver
//! gateway, and is the single place where resolver answers are folded into
//! the caches. Identity translations and membership checks hang off it as
//! methods; see the `identity` and `groups` modules.

use crate::{
    credentials::CredentialStore,
    groups::{self, GroupsCache, MembershipEntry},
    identity::{self, IdentityCache, IdentityEntry, IdentityKey},
    prelude::*,
    resolver::{
        self, LookupFlags, LookupRequest, LookupResult, ResolverGateway, ResolverId,
        ResolverOutcome,
    },
    time::MonotonicClock,
};

/// The hard upper bound either cache capacity can be raised to.
pub const MAX_CACHE_CAPACITY: usize = 10_000;

/// The identity service.
///
/// One instance serves a whole system. Everything on it takes `&self`; the
/// locks live inside the individual components, so a slow resolver round
/// trip never holds up unrelated cache hits.
pub struct Kauth {
    pub(crate) credentials: CredentialStore,
    pub(crate) identity_cache: IdentityCache,
    pub(crate) groups_cache: GroupsCache,
    pub(crate) resolver: ResolverGateway,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Options for assembling a [`Kauth`] service.
pub struct KauthOptions {
    identity_capacity: usize,
    groups_capacity: usize,
    resolver_timeout: Duration,
    clock: Option<Arc<dyn Clock>>,
}

impl KauthOptions {
    pub fn new() -> Self {
        Self {
            identity_capacity: identity::DEFAULT_CAPACITY,
            groups_capacity: groups::DEFAULT_CAPACITY,
            resolver_timeout: resolver::DEFAULT_TIMEOUT,
            clock: None,
        }
    }

    /// Sets the identity cache capacity, saturating at the hard cap.
    pub fn identity_capacity(mut self, capacity: usize) -> Self {
        self.identity_capacity = capacity.min(MAX_CACHE_CAPACITY);
        self
    }

    /// Sets the membership cache capacity, saturating at the hard cap.
    pub fn groups_capacity(mut self, capacity: usize) -> Self {
        self.groups_capacity = capacity.min(MAX_CACHE_CAPACITY);
        self
    }

    /// Sets the initial resolver timeout.
    ///
    /// Unlike the hint a registering daemon supplies, this value is not
    /// range-checked, so embedders and tests can run with short deadlines.
    pub fn resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout = timeout;
        self
    }

    /// Supplies the clock that drives cache expiry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Kauth {
        Kauth {
            credentials: CredentialStore::new(),
            identity_cache: IdentityCache::new(self.identity_capacity),
            groups_cache: GroupsCache::new(self.groups_capacity),
            resolver: ResolverGateway::new(self.resolver_timeout),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
        }
    }
}

impl Default for KauthOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl Kauth {
    /// Creates a service with default sizing.
    pub fn new() -> Self {
        KauthOptions::new().build()
    }

    /// The store of canonical credential objects.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    //  ******* Resolver daemon methods *******

    /// See [`ResolverGateway::register`].
    pub fn resolver_register(&self, id: ResolverId, timeout_hint: Option<Duration>) {
        self.resolver.register(id, timeout_hint);
    }

    /// See [`ResolverGateway::deregister`].
    pub fn resolver_deregister(&self, id: ResolverId) -> Result<()> {
        self.resolver.deregister(id)
    }

    /// See [`ResolverGateway::get_work`].
    pub fn resolver_get_work(&self, id: ResolverId) -> Result<(u64, LookupRequest)> {
        self.resolver.get_work(id)
    }

    /// Posts the daemon's answer and folds successful ones into the caches.
    ///
    /// This also covers answers whose submitter has already given up, so a
    /// slow answer still pays for itself the next time anyone asks.
    pub fn resolver_complete(
        &self,
        id: ResolverId,
        seq: u64,
        outcome: ResolverOutcome,
        result: LookupResult,
    ) -> Result<()> {
        if let Some((request, result)) = self.resolver.complete(id, seq, outcome, result)? {
            self.absorb_answer(&request, &result);
        }
        Ok(())
    }

    //  ******* Cache administration methods *******

    /// The configured capacities of the identity and membership caches.
    pub fn cache_sizes(&self) -> (usize, usize) {
        (self.identity_cache.capacity(), self.groups_cache.capacity())
    }

    /// Resizes both caches, evicting LRU-first where a cache shrinks.
    pub fn set_cache_sizes(&self, identity: usize, groups: usize) -> Result<()> {
        if identity > MAX_CACHE_CAPACITY || groups > MAX_CACHE_CAPACITY {
            return_errno_with_message!(
                Errno::EINVAL,
                "the requested cache capacity is over the hard cap"
            );
        }
        self.identity_cache.trim(identity);
        self.groups_cache.trim(groups);
        Ok(())
    }

    /// Flushes both caches.
    pub fn clear_caches(&self) {
        self.identity_cache.clear();
        self.groups_cache.clear();
    }

    //  ******* Cache update methods *******

    /// The absolute expiry for a TTL starting at `now`. A zero TTL stays the
    /// zero offset, which never lapses.
    pub(crate) fn expiry_at(now: Duration, ttl: Duration) -> Duration {
        if ttl.is_zero() {
            Duration::ZERO
        } else {
            now + ttl
        }
    }

    fn absorb_answer(&self, request: &LookupRequest, result: &LookupResult) {
        let now = self.clock.read_time();

        if request.flags().contains(LookupFlags::CHECK_MEMBERSHIP) {
            let (Some(uid), Some(gid), Some(is_member)) =
                (request.uid(), request.gid(), result.is_member())
            else {
                warn!("a membership answer was missing its verdict; nothing to cache");
                return;
            };
            let expiry = Self::expiry_at(now, result.membership_ttl());
            self.groups_cache
                .upsert(uid, gid, MembershipEntry::new(is_member, expiry));
            return;
        }

        let Some(entry) = Self::entry_from_answer(request, result, now) else {
            debug!("an identity answer named no UID or GID; nothing to cache");
            return;
        };
        self.identity_cache.upsert(entry);
    }

    /// Builds the cache entry a resolver answer describes.
    ///
    /// Tokens the request carried are echoed into the entry, so a reverse
    /// lookup also warms the forward direction.
    pub(crate) fn entry_from_answer(
        request: &LookupRequest,
        result: &LookupResult,
        now: Duration,
    ) -> Option<IdentityEntry> {
        let key = if let Some(uid) = result.uid().or(request.uid()) {
            IdentityKey::Uid(uid)
        } else if let Some(gid) = result.gid().or(request.gid()) {
            IdentityKey::Gid(gid)
        } else {
            return None;
        };

        let mut entry = IdentityEntry::new(key);
        if let Some(guid) = result.guid().or(request.guid()) {
            entry.set_guid(*guid, Self::expiry_at(now, result.guid_ttl()));
        }
        if let Some(sid) = result.sid().or(request.sid()) {
            entry.set_sid(sid.clone(), Self::expiry_at(now, result.sid_ttl()));
        }
        if let Some(name) = result.name().or(request.name()) {
            entry.set_name(name.to_string(), Self::expiry_at(now, result.name_ttl()));
        }
        if let Some(groups) = result.groups() {
            entry.set_groups(groups.to_vec(), Self::expiry_at(now, result.groups_ttl()));
        }
        Some(entry)
    }
}

impl Default for Kauth {
    fn default() -> Self {
        Self::new()
    }
}
