// SPDX-License-Identifier: MPL-2.0

//! Identity translations, as methods on [`Kauth`].
//!
//! Every translation follows the same plan: answer from the cache when the
//! wanted facet is present and fresh, otherwise make one resolver round trip
//! that asks for every cheap facet at once. Expired identity facts are never
//! served; staleness is tolerated only for membership verdicts, which live
//! in their own cache.

use super::{IdentityEntry, IdentityFields, IdentityKey, IdentityKind};
use crate::{
    credentials::{Gid, Guid, NtSid, Uid},
    prelude::*,
    resolver::{LookupFlags, LookupRequest},
    service::Kauth,
};

impl Kauth {
    //  ******* Forward translation methods *******

    /// The GUID of the user `uid`.
    pub fn uid_to_guid(&self, uid: Uid) -> Result<Guid> {
        let entry = self.resolve_key(IdentityKey::Uid(uid), IdentityFields::GUID)?;
        entry
            .guid()
            .copied()
            .ok_or_else(|| Error::with_message(Errno::ENOENT, "no GUID is known for the user"))
    }

    /// The GUID of the group `gid`.
    pub fn gid_to_guid(&self, gid: Gid) -> Result<Guid> {
        let entry = self.resolve_key(IdentityKey::Gid(gid), IdentityFields::GUID)?;
        entry
            .guid()
            .copied()
            .ok_or_else(|| Error::with_message(Errno::ENOENT, "no GUID is known for the group"))
    }

    /// The security identifier of the user `uid`.
    pub fn uid_to_sid(&self, uid: Uid) -> Result<NtSid> {
        let entry = self.resolve_key(IdentityKey::Uid(uid), IdentityFields::SID)?;
        entry.sid().cloned().ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "no identifier is known for the user")
        })
    }

    /// The security identifier of the group `gid`.
    pub fn gid_to_sid(&self, gid: Gid) -> Result<NtSid> {
        let entry = self.resolve_key(IdentityKey::Gid(gid), IdentityFields::SID)?;
        entry.sid().cloned().ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "no identifier is known for the group")
        })
    }

    /// The login name of the user `uid`.
    pub fn uid_to_name(&self, uid: Uid) -> Result<String> {
        let entry = self.resolve_key(IdentityKey::Uid(uid), IdentityFields::NAME)?;
        entry
            .name()
            .map(ToString::to_string)
            .ok_or_else(|| Error::with_message(Errno::ENOENT, "no name is known for the user"))
    }

    /// The name of the group `gid`.
    pub fn gid_to_name(&self, gid: Gid) -> Result<String> {
        let entry = self.resolve_key(IdentityKey::Gid(gid), IdentityFields::NAME)?;
        entry
            .name()
            .map(ToString::to_string)
            .ok_or_else(|| Error::with_message(Errno::ENOENT, "no name is known for the group"))
    }

    /// The supplementary groups of the user `uid`, as the resolver sees them.
    pub fn uid_to_groups(&self, uid: Uid) -> Result<Vec<Gid>> {
        let entry = self.resolve_key(IdentityKey::Uid(uid), IdentityFields::GROUPS)?;
        entry.groups().map(|groups| groups.to_vec()).ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "no group list is known for the user")
        })
    }

    //  ******* Reverse translation methods *******

    /// The user behind `guid`.
    pub fn guid_to_uid(&self, guid: &Guid) -> Result<Uid> {
        let entry = self.resolve_guid(guid, IdentityKind::User)?;
        entry
            .key()
            .uid()
            .ok_or_else(|| Error::with_message(Errno::ENOENT, "the GUID does not name a user"))
    }

    /// The group behind `guid`.
    pub fn guid_to_gid(&self, guid: &Guid) -> Result<Gid> {
        let entry = self.resolve_guid(guid, IdentityKind::Group)?;
        entry
            .key()
            .gid()
            .ok_or_else(|| Error::with_message(Errno::ENOENT, "the GUID does not name a group"))
    }

    /// The user behind the security identifier `sid`.
    pub fn sid_to_uid(&self, sid: &NtSid) -> Result<Uid> {
        let entry = self.resolve_sid(sid, IdentityKind::User)?;
        entry.key().uid().ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "the identifier does not name a user")
        })
    }

    /// The group behind the security identifier `sid`.
    pub fn sid_to_gid(&self, sid: &NtSid) -> Result<Gid> {
        let entry = self.resolve_sid(sid, IdentityKind::Group)?;
        entry.key().gid().ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "the identifier does not name a group")
        })
    }

    /// The user named `name`.
    pub fn name_to_uid(&self, name: &str) -> Result<Uid> {
        let entry = self.resolve_name(name, IdentityKind::User)?;
        entry
            .key()
            .uid()
            .ok_or_else(|| Error::with_message(Errno::ENOENT, "the name does not belong to a user"))
    }

    /// The group named `name`.
    pub fn name_to_gid(&self, name: &str) -> Result<Gid> {
        let entry = self.resolve_name(name, IdentityKind::Group)?;
        entry.key().gid().ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "the name does not belong to a group")
        })
    }

    //  ******* Resolution helper methods *******

    fn resolve_key(&self, key: IdentityKey, wanted: IdentityFields) -> Result<IdentityEntry> {
        let now = self.clock.read_time();
        if let Some(entry) = self.identity_cache.find(key, wanted)
            && entry.is_fresh(wanted, now)
        {
            return Ok(entry);
        }

        let wants = Self::wants_for(wanted);
        let request = match key {
            IdentityKey::Uid(uid) => LookupRequest::from_uid(uid, wants),
            IdentityKey::Gid(gid) => LookupRequest::from_gid(gid, wants),
        };
        let result = self.resolver.submit(request.clone())?;

        Self::entry_from_answer(&request, &result, now).ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "the resolver does not know the identity")
        })
    }

    fn resolve_guid(&self, guid: &Guid, kind: IdentityKind) -> Result<IdentityEntry> {
        let now = self.clock.read_time();
        if let Some(entry) = self.identity_cache.find_by_guid(guid) {
            // A GUID names a user or a group, never both, so a kind mismatch
            // is final and costs no round trip.
            if entry.key().kind() != kind {
                return_errno_with_message!(
                    Errno::ENOENT,
                    "the GUID names the other kind of identity"
                );
            }
            if !entry.is_expired(IdentityFields::GUID, now) {
                return Ok(entry);
            }
        }

        let request = LookupRequest::from_guid(
            *guid,
            LookupFlags::WANT_UID | LookupFlags::WANT_GID | LookupFlags::WANT_SID,
        );
        let result = self.resolver.submit(request.clone())?;

        let entry = Self::entry_from_answer(&request, &result, now).ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "the resolver does not know the GUID")
        })?;
        if entry.key().kind() != kind {
            return_errno_with_message!(Errno::ENOENT, "the GUID names the other kind of identity");
        }
        Ok(entry)
    }

    fn resolve_sid(&self, sid: &NtSid, kind: IdentityKind) -> Result<IdentityEntry> {
        let now = self.clock.read_time();
        if let Some(entry) = self.identity_cache.find_by_sid(sid) {
            if entry.key().kind() != kind {
                return_errno_with_message!(
                    Errno::ENOENT,
                    "the identifier names the other kind of identity"
                );
            }
            if !entry.is_expired(IdentityFields::SID, now) {
                return Ok(entry);
            }
        }

        let request = LookupRequest::from_sid(
            sid.clone(),
            LookupFlags::WANT_UID | LookupFlags::WANT_GID | LookupFlags::WANT_GUID,
        );
        let result = self.resolver.submit(request.clone())?;

        let entry = Self::entry_from_answer(&request, &result, now).ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "the resolver does not know the identifier")
        })?;
        if entry.key().kind() != kind {
            return_errno_with_message!(
                Errno::ENOENT,
                "the identifier names the other kind of identity"
            );
        }
        Ok(entry)
    }

    fn resolve_name(&self, name: &str, kind: IdentityKind) -> Result<IdentityEntry> {
        let now = self.clock.read_time();
        if let Some(entry) = self.identity_cache.find_by_name(name, kind)
            && !entry.is_expired(IdentityFields::NAME, now)
        {
            return Ok(entry);
        }

        let want_key = match kind {
            IdentityKind::User => LookupFlags::WANT_UID,
            IdentityKind::Group => LookupFlags::WANT_GID,
        };
        let request = LookupRequest::from_name(
            name.to_string(),
            want_key | LookupFlags::WANT_GUID | LookupFlags::WANT_SID,
        );
        let result = self.resolver.submit(request.clone())?;

        let entry = Self::entry_from_answer(&request, &result, now).ok_or_else(|| {
            Error::with_message(Errno::ENOENT, "the resolver does not know the name")
        })?;
        if entry.key().kind() != kind {
            return_errno_with_message!(
                Errno::ENOENT,
                "the name belongs to the other kind of identity"
            );
        }
        Ok(entry)
    }

    /// The facets one keyed round trip should ask for: GUIDs and security
    /// identifiers ride along for free, names and group lists only on demand.
    fn wants_for(wanted: IdentityFields) -> LookupFlags {
        let mut wants = LookupFlags::WANT_GUID | LookupFlags::WANT_SID;
        if wanted.contains(IdentityFields::NAME) {
            wants |= LookupFlags::WANT_NAME;
        }
        if wanted.contains(IdentityFields::GROUPS) {
            wants |= LookupFlags::WANT_GROUPS;
        }
        wants
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use crate::{
        credentials::{Guid, Uid},
        prelude::*,
        resolver::{LookupRequest, LookupResult, ResolverOutcome},
        service::{Kauth, KauthOptions},
        time::ManualClock,
    };

    fn test_service() -> (Arc<Kauth>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let kauth = Arc::new(
            KauthOptions::new()
                .clock(clock.clone())
                .resolver_timeout(Duration::from_secs(10))
                .build(),
        );
        (kauth, clock)
    }

    fn serve_one<F>(kauth: &Arc<Kauth>, answer: F) -> thread::JoinHandle<()>
    where
        F: FnOnce(&LookupRequest) -> LookupResult + Send + 'static,
    {
        let kauth = kauth.clone();
        thread::spawn(move || {
            let (seq, request) = kauth.resolver_get_work(1).unwrap();
            let result = answer(&request);
            kauth
                .resolver_complete(1, seq, ResolverOutcome::Success, result)
                .unwrap();
        })
    }

    #[test]
    fn a_translation_round_trips_and_then_hits_the_cache() {
        let (kauth, _) = test_service();
        kauth.resolver_register(1, None);

        let daemon = serve_one(&kauth, |request| {
            assert_eq!(request.uid(), Some(Uid::new(501)));
            let mut result = LookupResult::new();
            result.set_guid(Guid::new([7; 16]), Duration::from_secs(60));
            result
        });

        assert_eq!(kauth.uid_to_guid(Uid::new(501)).unwrap(), Guid::new([7; 16]));
        daemon.join().unwrap();

        // With the answer cached, the daemon is no longer needed.
        kauth.resolver_deregister(1).unwrap();
        assert_eq!(kauth.uid_to_guid(Uid::new(501)).unwrap(), Guid::new([7; 16]));
    }

    #[test]
    fn expired_identity_facts_are_re_resolved() {
        let (kauth, clock) = test_service();
        kauth.resolver_register(1, None);

        let daemon = serve_one(&kauth, |_| {
            let mut result = LookupResult::new();
            result.set_guid(Guid::new([1; 16]), Duration::from_secs(10));
            result
        });
        assert_eq!(kauth.uid_to_guid(Uid::new(5)).unwrap(), Guid::new([1; 16]));
        daemon.join().unwrap();

        // Past the TTL the stale GUID must not be served; a fresh round
        // trip supersedes it.
        clock.advance(Duration::from_secs(11));
        let daemon = serve_one(&kauth, |_| {
            let mut result = LookupResult::new();
            result.set_guid(Guid::new([2; 16]), Duration::from_secs(10));
            result
        });
        assert_eq!(kauth.uid_to_guid(Uid::new(5)).unwrap(), Guid::new([2; 16]));
        daemon.join().unwrap();
    }

    #[test]
    fn a_guid_known_as_a_user_cannot_become_a_group() {
        let (kauth, _) = test_service();
        kauth.resolver_register(1, None);

        let daemon = serve_one(&kauth, |_| {
            let mut result = LookupResult::new();
            result.set_uid(Uid::new(42));
            result
        });
        assert_eq!(kauth.guid_to_uid(&Guid::new([4; 16])).unwrap(), Uid::new(42));
        daemon.join().unwrap();

        // No resolver is left; only the short circuit can answer, and it
        // answers without a round trip.
        kauth.resolver_deregister(1).unwrap();
        let err = kauth.guid_to_gid(&Guid::new([4; 16])).unwrap_err();
        assert_eq!(err.error(), Errno::ENOENT);
    }

    #[test]
    fn reverse_answers_warm_the_forward_direction() {
        let (kauth, _) = test_service();
        kauth.resolver_register(1, None);

        let daemon = serve_one(&kauth, |request| {
            assert_eq!(request.name(), Some("alice"));
            let mut result = LookupResult::new();
            result.set_uid(Uid::new(700));
            result.set_name("alice".to_string(), Duration::from_secs(60));
            result
        });
        assert_eq!(kauth.name_to_uid("alice").unwrap(), Uid::new(700));
        daemon.join().unwrap();

        kauth.resolver_deregister(1).unwrap();
        assert_eq!(kauth.uid_to_name(Uid::new(700)).unwrap(), "alice");
    }

    #[test]
    fn an_authoritative_blank_answer_is_not_found() {
        let (kauth, _) = test_service();
        kauth.resolver_register(1, None);

        let daemon = serve_one(&kauth, |_| LookupResult::new());
        let err = kauth.uid_to_guid(Uid::new(13)).unwrap_err();
        assert_eq!(err.error(), Errno::ENOENT);
        daemon.join().unwrap();
    }
}
