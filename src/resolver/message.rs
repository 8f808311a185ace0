// SPDX-License-Identifier: MPL-2.0

//! The request and reply shapes exchanged with the resolver daemon.

use crate::{
    credentials::{Gid, Guid, NtSid, Uid},
    prelude::*,
};

bitflags! {
    /// What a lookup request carries and what it asks for.
    ///
    /// The `VALID_*` half names the inputs the request provides, the `WANT_*`
    /// half the outputs the daemon should produce. A membership check is its
    /// own question and bypasses the `WANT_*` half entirely.
    pub struct LookupFlags: u32 {
        const VALID_UID  = 1 << 0;
        const VALID_GID  = 1 << 1;
        const VALID_GUID = 1 << 2;
        const VALID_SID  = 1 << 3;
        const VALID_NAME = 1 << 4;

        const WANT_UID    = 1 << 8;
        const WANT_GID    = 1 << 9;
        const WANT_GUID   = 1 << 10;
        const WANT_SID    = 1 << 11;
        const WANT_NAME   = 1 << 12;
        const WANT_GROUPS = 1 << 13;

        const CHECK_MEMBERSHIP = 1 << 16;
    }
}

/// One question for the resolver daemon.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    flags: LookupFlags,
    uid: Option<Uid>,
    gid: Option<Gid>,
    guid: Option<Guid>,
    sid: Option<NtSid>,
    name: Option<String>,
}

impl LookupRequest {
    fn new(flags: LookupFlags) -> Self {
        Self {
            flags,
            uid: None,
            gid: None,
            guid: None,
            sid: None,
            name: None,
        }
    }

    /// Asks for the `wanted` facets of the user `uid`.
    pub fn from_uid(uid: Uid, wanted: LookupFlags) -> Self {
        let mut request = Self::new(LookupFlags::VALID_UID | wanted);
        request.uid = Some(uid);
        request
    }

    /// Asks for the `wanted` facets of the group `gid`.
    pub fn from_gid(gid: Gid, wanted: LookupFlags) -> Self {
        let mut request = Self::new(LookupFlags::VALID_GID | wanted);
        request.gid = Some(gid);
        request
    }

    /// Asks for the `wanted` facets of the identity behind `guid`.
    pub fn from_guid(guid: Guid, wanted: LookupFlags) -> Self {
        let mut request = Self::new(LookupFlags::VALID_GUID | wanted);
        request.guid = Some(guid);
        request
    }

    /// Asks for the `wanted` facets of the identity behind `sid`.
    pub fn from_sid(sid: NtSid, wanted: LookupFlags) -> Self {
        let mut request = Self::new(LookupFlags::VALID_SID | wanted);
        request.sid = Some(sid);
        request
    }

    /// Asks for the `wanted` facets of the identity named `name`. Whether a
    /// user or a group is meant follows from `wanted`.
    pub fn from_name(name: String, wanted: LookupFlags) -> Self {
        let mut request = Self::new(LookupFlags::VALID_NAME | wanted);
        request.name = Some(name);
        request
    }

    /// Asks whether the user `uid` is a member of the group `gid`.
    pub fn membership(uid: Uid, gid: Gid) -> Self {
        let mut request = Self::new(
            LookupFlags::VALID_UID | LookupFlags::VALID_GID | LookupFlags::CHECK_MEMBERSHIP,
        );
        request.uid = Some(uid);
        request.gid = Some(gid);
        request
    }

    pub fn flags(&self) -> LookupFlags {
        self.flags
    }

    pub fn uid(&self) -> Option<Uid> {
        self.uid
    }

    pub fn gid(&self) -> Option<Gid> {
        self.gid
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
}

/// One answer from the resolver daemon.
///
/// Only the facets the daemon filled in are present. Each carries its own
/// time-to-live; a zero TTL means the facet never goes stale.
#[derive(Debug, Clone, Default)]
pub struct LookupResult {
    uid: Option<Uid>,
    gid: Option<Gid>,
    guid: Option<Guid>,
    guid_ttl: Duration,
    sid: Option<NtSid>,
    sid_ttl: Duration,
    name: Option<String>,
    name_ttl: Duration,
    groups: Option<Vec<Gid>>,
    groups_ttl: Duration,
    is_member: Option<bool>,
    membership_ttl: Duration,
}

impl LookupResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_uid(&mut self, uid: Uid) {
        self.uid = Some(uid);
    }

    pub fn set_gid(&mut self, gid: Gid) {
        self.gid = Some(gid);
    }

    pub fn set_guid(&mut self, guid: Guid, ttl: Duration) {
        self.guid = Some(guid);
        self.guid_ttl = ttl;
    }

    pub fn set_sid(&mut self, sid: NtSid, ttl: Duration) {
        self.sid = Some(sid);
        self.sid_ttl = ttl;
    }

    pub fn set_name(&mut self, name: String, ttl: Duration) {
        self.name = Some(name);
        self.name_ttl = ttl;
    }

    pub fn set_groups(&mut self, groups: Vec<Gid>, ttl: Duration) {
        self.groups = Some(groups);
        self.groups_ttl = ttl;
    }

    pub fn set_membership(&mut self, is_member: bool, ttl: Duration) {
        self.is_member = Some(is_member);
        self.membership_ttl = ttl;
    }

    pub fn uid(&self) -> Option<Uid> {
        self.uid
    }

    pub fn gid(&self) -> Option<Gid> {
        self.gid
    }

    pub fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }

    pub fn guid_ttl(&self) -> Duration {
        self.guid_ttl
    }

    pub fn sid(&self) -> Option<&NtSid> {
        self.sid.as_ref()
    }

    pub fn sid_ttl(&self) -> Duration {
        self.sid_ttl
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn name_ttl(&self) -> Duration {
        self.name_ttl
    }

    pub fn groups(&self) -> Option<&[Gid]> {
        self.groups.as_deref()
    }

    pub fn groups_ttl(&self) -> Duration {
        self.groups_ttl
    }

    pub fn is_member(&self) -> Option<bool> {
        self.is_member
    }

    pub fn membership_ttl(&self) -> Duration {
        self.membership_ttl
    }
}

/// How the resolver daemon classifies a completed piece of work.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
pub enum ResolverOutcome {
    /// The answer is in the reply.
    Success = 0,
    /// The daemon could not answer this time; the caller may retry.
    Failure = 1,
    /// The daemon did not understand the request.
    BadRequest = 2,
    /// The daemon is giving up for good.
    Fatal = 3,
}
