// SPDX-License-Identifier: MPL-2.0

use core::hash::{Hash, Hasher};

use super::{
    Gid, Uid,
    token::{AuditSession, SecurityLabel},
};
use crate::prelude::*;

/// The maximum number of groups a credential can carry.
pub const NGROUPS: usize = 16;

/// The value of a credential.
///
/// A model is the mutable form that callers fill in before interning it in a
/// [`CredentialStore`]: two interned credentials are the same object exactly
/// when their models are equal. The group list is never empty, and the entry
/// at index 0 is the effective GID.
///
/// The label only takes part in equality when both sides enforce it; the
/// enforcement flag itself always does. This keeps credentials that merely
/// carry different advisory labels coalesced into one object.
///
/// [`CredentialStore`]: super::CredentialStore
#[derive(Debug, Clone)]
pub struct CredentialModel {
    ruid: Uid,
    euid: Uid,
    suid: Uid,
    rgid: Gid,
    sgid: Gid,
    groups: Vec<Gid>,
    /// The UID presented to the resolver for group-membership questions,
    /// or `None` if this credential opted out of external resolution.
    gmuid: Option<Uid>,
    audit: Option<Arc<AuditSession>>,
    label: Option<Arc<SecurityLabel>>,
    label_enforced: bool,
}

impl CredentialModel {
    /// Creates a model for the given user, with the effective GID as the
    /// only group.
    pub fn new(uid: Uid, gid: Gid) -> Self {
        Self {
            ruid: uid,
            euid: uid,
            suid: uid,
            rgid: gid,
            sgid: gid,
            groups: vec![gid],
            gmuid: Some(uid),
            audit: None,
            label: None,
            label_enforced: false,
        }
    }

    //  ******* Uid methods *******

    pub fn ruid(&self) -> Uid {
        self.ruid
    }

    pub fn euid(&self) -> Uid {
        self.euid
    }

    pub fn suid(&self) -> Uid {
        self.suid
    }

    /// Sets the real, effective and saved UIDs at once.
    ///
    /// The membership-resolution UID follows the new UID unless this
    /// credential has opted out of external resolution.
    pub fn set_uid(&mut self, uid: Uid) {
        self.ruid = uid;
        self.euid = uid;
        self.suid = uid;
        if self.gmuid.is_some() {
            self.gmuid = Some(uid);
        }
    }

    pub fn set_ruid(&mut self, ruid: Uid) {
        self.ruid = ruid;
    }

    pub fn set_euid(&mut self, euid: Uid) {
        self.euid = euid;
    }

    pub fn set_suid(&mut self, suid: Uid) {
        self.suid = suid;
    }

    //  ******* Gid methods *******

    pub fn rgid(&self) -> Gid {
        self.rgid
    }

    /// The effective GID, stored as the first entry of the group list.
    pub fn egid(&self) -> Gid {
        self.groups[0]
    }

    pub fn sgid(&self) -> Gid {
        self.sgid
    }

    pub fn groups(&self) -> &[Gid] {
        &self.groups
    }

    /// Sets the real, effective and saved GIDs at once.
    pub fn set_gid(&mut self, gid: Gid) {
        self.rgid = gid;
        self.sgid = gid;
        self.groups[0] = gid;
    }

    pub fn set_rgid(&mut self, rgid: Gid) {
        self.rgid = rgid;
    }

    pub fn set_egid(&mut self, egid: Gid) {
        self.groups[0] = egid;
    }

    pub fn set_sgid(&mut self, sgid: Gid) {
        self.sgid = sgid;
    }

    /// Replaces the whole group list, including the effective GID in the
    /// first slot.
    pub fn set_groups(&mut self, groups: &[Gid]) -> Result<()> {
        if groups.is_empty() {
            return_errno_with_message!(Errno::EINVAL, "the group list cannot be empty");
        }
        if groups.len() > NGROUPS {
            return_errno_with_message!(Errno::EINVAL, "too many groups");
        }

        self.groups.clear();
        self.groups.extend_from_slice(groups);
        Ok(())
    }

    //  ******* Membership resolution methods *******

    pub fn gmuid(&self) -> Option<Uid> {
        self.gmuid
    }

    /// Sets the UID presented to the resolver for membership questions;
    /// `None` opts this credential out of external resolution.
    pub fn set_gmuid(&mut self, gmuid: Option<Uid>) {
        self.gmuid = gmuid;
    }

    //  ******* Collaborator methods *******

    pub fn audit(&self) -> Option<&Arc<AuditSession>> {
        self.audit.as_ref()
    }

    pub fn set_audit(&mut self, audit: Option<Arc<AuditSession>>) {
        self.audit = audit;
    }

    pub fn label(&self) -> Option<&Arc<SecurityLabel>> {
        self.label.as_ref()
    }

    pub fn set_label(&mut self, label: Option<Arc<SecurityLabel>>) {
        self.label = label;
    }

    pub fn label_enforced(&self) -> bool {
        self.label_enforced
    }

    pub fn set_label_enforced(&mut self, enforced: bool) {
        self.label_enforced = enforced;
    }
}

impl PartialEq for CredentialModel {
    fn eq(&self, other: &Self) -> bool {
        if self.ruid != other.ruid
            || self.euid != other.euid
            || self.suid != other.suid
            || self.rgid != other.rgid
            || self.sgid != other.sgid
            || self.groups != other.groups
            || self.gmuid != other.gmuid
            || self.audit != other.audit
            || self.label_enforced != other.label_enforced
        {
            return false;
        }

        // The label value only distinguishes credentials that enforce it.
        !self.label_enforced || self.label == other.label
    }
}

impl Eq for CredentialModel {}

impl Hash for CredentialModel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ruid.hash(state);
        self.euid.hash(state);
        self.suid.hash(state);
        self.rgid.hash(state);
        self.sgid.hash(state);
        self.groups.hash(state);
        self.gmuid.hash(state);
        self.audit.hash(state);
        self.label_enforced.hash(state);
        // Keep consistent with `eq`: the label is mixed in only when it is
        // enforced, so two equal-but-unenforced models hash alike.
        if self.label_enforced {
            self.label.hash(state);
        }
    }
}
