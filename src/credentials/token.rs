// SPDX-License-Identifier: MPL-2.0

use core::hash::{Hash, Hasher};

use crate::prelude::*;

/// A 16-byte globally-unique identity token.
///
/// Unlike UIDs and GIDs, a GUID names either a user or a group; which one it
/// is can only be learned by translating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid([u8; 16]);

impl Guid {
    /// The number of bytes in a GUID.
    pub const LEN: usize = 16;

    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// The maximum number of sub-authorities a security identifier can carry.
pub const NTSID_MAX_AUTHORITIES: usize = 16;

/// A Windows NT security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NtSid {
    revision: u8,
    authority: [u8; 6],
    sub_authorities: Vec<u32>,
}

impl NtSid {
    /// Creates a security identifier, failing with `EINVAL` if there are
    /// more than [`NTSID_MAX_AUTHORITIES`] sub-authorities.
    pub fn new(revision: u8, authority: [u8; 6], sub_authorities: Vec<u32>) -> Result<Self> {
        if sub_authorities.len() > NTSID_MAX_AUTHORITIES {
            return_errno_with_message!(Errno::EINVAL, "too many SID sub-authorities");
        }

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn authority(&self) -> &[u8; 6] {
        &self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }
}

/// An audit session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Asid(u32);

impl Asid {
    pub const fn new(asid: u32) -> Self {
        Self(asid)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

/// A shared audit session.
///
/// Credentials hold sessions by reference; the session object is released
/// when the last credential referencing it is reclaimed. Two sessions are
/// the same session exactly when their identifiers match.
#[derive(Debug)]
pub struct AuditSession {
    asid: Asid,
}

impl AuditSession {
    pub fn new(asid: Asid) -> Arc<Self> {
        Arc::new(Self { asid })
    }

    pub fn asid(&self) -> Asid {
        self.asid
    }
}

impl PartialEq for AuditSession {
    fn eq(&self, other: &Self) -> bool {
        self.asid == other.asid
    }
}

impl Eq for AuditSession {}

impl Hash for AuditSession {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.asid.hash(state);
    }
}

/// An opaque policy label attached to a credential.
///
/// The slot value is owned by an external policy module; credentials only
/// share the label and drop it when they are reclaimed.
#[derive(Debug)]
pub struct SecurityLabel {
    slot: u64,
}

impl SecurityLabel {
    pub fn new(slot: u64) -> Arc<Self> {
        Arc::new(Self { slot })
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }
}

impl PartialEq for SecurityLabel {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl Eq for SecurityLabel {}

impl Hash for SecurityLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sid_rejects_excess_sub_authorities() {
        let subs = vec![7u32; NTSID_MAX_AUTHORITIES + 1];
        let err = NtSid::new(1, [0, 0, 0, 0, 0, 5], subs).unwrap_err();
        assert_eq!(err.error(), Errno::EINVAL);
    }

    #[test]
    fn audit_sessions_compare_by_asid() {
        let a = AuditSession::new(Asid::new(7));
        let b = AuditSession::new(Asid::new(7));
        let c = AuditSession::new(Asid::new(8));
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }
}
