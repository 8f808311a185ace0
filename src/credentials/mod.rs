// SPDX-License-Identifier: MPL-2.0

//! Interned, reference-counted credentials.
//!
//! Credentials are immutable once published. The [`CredentialStore`] interns
//! them by value, so every distinct credential value exists as exactly one
//! shared object and "same credential" is a pointer comparison. Changing a
//! credential means deriving a new value and interning that.

use std::sync::atomic::{AtomicU32, Ordering};

use hashbrown::HashMap;

use crate::prelude::*;

mod group;
mod model;
mod token;
mod user;

pub use self::{
    group::Gid,
    model::{CredentialModel, NGROUPS},
    token::{Asid, AuditSession, Guid, NTSID_MAX_AUTHORITIES, NtSid, SecurityLabel},
    user::Uid,
};

/// An interned credential.
///
/// The long-term reference count tracks the holders that named this
/// credential through [`CredentialStore::get_or_insert`], `derive`, or
/// `acquire_strong`. When the count drops to zero the credential loses its
/// table slot, while the `Arc` keeps the memory alive until the last
/// short-term reader lets go. A reader therefore never observes a freed
/// credential, only a dying one, and a dying credential is treated as absent
/// by every lookup.
#[derive(Debug)]
pub struct Credential {
    model: CredentialModel,
    refs: AtomicU32,
}

impl Credential {
    fn new(model: CredentialModel) -> Arc<Self> {
        Arc::new(Self {
            model,
            // The inserting caller owns the first long-term reference.
            refs: AtomicU32::new(1),
        })
    }

    /// The value of this credential.
    pub fn model(&self) -> &CredentialModel {
        &self.model
    }

    pub fn ruid(&self) -> Uid {
        self.model.ruid()
    }

    pub fn euid(&self) -> Uid {
        self.model.euid()
    }

    pub fn suid(&self) -> Uid {
        self.model.suid()
    }

    pub fn rgid(&self) -> Gid {
        self.model.rgid()
    }

    pub fn egid(&self) -> Gid {
        self.model.egid()
    }

    pub fn sgid(&self) -> Gid {
        self.model.sgid()
    }

    pub fn groups(&self) -> &[Gid] {
        self.model.groups()
    }

    pub fn gmuid(&self) -> Option<Uid> {
        self.model.gmuid()
    }

    pub fn label_enforced(&self) -> bool {
        self.model.label_enforced()
    }

    /// The current long-term reference count, for diagnostics.
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Relaxed)
    }

    /// Tries to take one more long-term reference.
    ///
    /// Fails if the count has already dropped to zero: such a credential
    /// lost (or is about to lose) its table slot and must be treated as
    /// absent.
    fn try_acquire(&self) -> bool {
        let mut refs = self.refs.load(Ordering::Relaxed);
        loop {
            if refs == 0 {
                return false;
            }
            if refs == u32::MAX {
                panic!("credential reference count overflow");
            }

            match self.refs.compare_exchange_weak(
                refs,
                refs + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => refs = current,
            }
        }
    }
}

/// The process-wide table of interned credentials.
pub struct CredentialStore {
    table: RwLock<HashMap<CredentialModel, Arc<Credential>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the canonical credential for `model`, with one long-term
    /// reference owned by the caller.
    ///
    /// If an equal credential is already interned, that object is returned
    /// and any collaborator handles held by `model` are simply dropped.
    /// A credential whose reference count has reached zero counts as absent
    /// and gets displaced by a fresh insertion.
    pub fn get_or_insert(&self, model: CredentialModel) -> Arc<Credential> {
        // Fast path: find the canonical instance under the read lock.
        {
            let table = self.table.read();
            if let Some(cred) = table.get(&model)
                && cred.try_acquire()
            {
                return cred.clone();
            }
        }

        let mut table = self.table.write();
        // Probe again: another thread may have inserted between the locks.
        if let Some(cred) = table.get(&model)
            && cred.try_acquire()
        {
            return cred.clone();
        }

        let cred = Credential::new(model.clone());
        table.insert(model, cred.clone());
        cred
    }

    /// Takes one more long-term reference on `cred`.
    ///
    /// # Panics
    ///
    /// Panics if the count is zero (the caller held no reference to begin
    /// with) or would overflow. Both are process-fatal accounting bugs.
    pub fn acquire_strong(&self, cred: &Arc<Credential>) {
        let old = cred.refs.fetch_add(1, Ordering::Relaxed);
        if old == 0 {
            panic!("acquiring a credential that has no references");
        }
        if old == u32::MAX {
            panic!("credential reference count overflow");
        }
    }

    /// Releases one long-term reference on `cred`.
    ///
    /// When the last reference goes away the credential is unhashed from
    /// the table; the memory itself is reclaimed once the last `Arc` clone
    /// drops, so concurrent readers stay safe.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero.
    pub fn release_strong(&self, cred: &Arc<Credential>) {
        let old = cred.refs.fetch_sub(1, Ordering::Release);
        if old == 0 {
            panic!("releasing a credential that has no references");
        }
        if old > 1 {
            return;
        }

        let mut table = self.table.write();
        // Only remove the slot if it still holds this very object. An equal
        // value may have been re-interned as a new object in the meantime.
        if let Some(current) = table.get(cred.model())
            && Arc::ptr_eq(current, cred)
        {
            table.remove(cred.model());
        }
    }

    /// Derives a credential from `base` by applying `mutate` to a copy of
    /// its value.
    ///
    /// Returns the canonical credential for the mutated value together with
    /// a flag telling whether it differs from `base`. The returned handle
    /// always owns one fresh long-term reference, so the caller releases it
    /// independently of `base`; a mutation that changes nothing hands back
    /// `base` itself.
    pub fn derive<F>(&self, base: &Arc<Credential>, mutate: F) -> Result<(Arc<Credential>, bool)>
    where
        F: FnOnce(&mut CredentialModel) -> Result<()>,
    {
        let mut model = base.model().clone();
        mutate(&mut model)?;

        if model == *base.model() {
            self.acquire_strong(base);
            return Ok((base.clone(), false));
        }

        Ok((self.get_or_insert(model), true))
    }

    //  ******* Derived update methods *******

    /// Derives a credential with new real, effective and saved UIDs.
    pub fn set_uid(&self, base: &Arc<Credential>, uid: Uid) -> Result<(Arc<Credential>, bool)> {
        self.derive(base, |model| {
            model.set_uid(uid);
            Ok(())
        })
    }

    /// Derives a credential with a new effective UID.
    pub fn set_euid(&self, base: &Arc<Credential>, euid: Uid) -> Result<(Arc<Credential>, bool)> {
        self.derive(base, |model| {
            model.set_euid(euid);
            Ok(())
        })
    }

    /// Derives a credential with new real, effective and saved GIDs.
    pub fn set_gid(&self, base: &Arc<Credential>, gid: Gid) -> Result<(Arc<Credential>, bool)> {
        self.derive(base, |model| {
            model.set_gid(gid);
            Ok(())
        })
    }

    /// Derives a credential with a new group list.
    pub fn set_groups(
        &self,
        base: &Arc<Credential>,
        groups: &[Gid],
    ) -> Result<(Arc<Credential>, bool)> {
        self.derive(base, |model| model.set_groups(groups))
    }

    /// Derives a credential with a new membership-resolution UID.
    pub fn set_gmuid(
        &self,
        base: &Arc<Credential>,
        gmuid: Option<Uid>,
    ) -> Result<(Arc<Credential>, bool)> {
        self.derive(base, |model| {
            model.set_gmuid(gmuid);
            Ok(())
        })
    }

    /// Derives a credential with a new audit session.
    pub fn set_audit(
        &self,
        base: &Arc<Credential>,
        audit: Option<Arc<AuditSession>>,
    ) -> Result<(Arc<Credential>, bool)> {
        self.derive(base, |model| {
            model.set_audit(audit);
            Ok(())
        })
    }

    /// Derives a credential with a new label and enforcement state.
    pub fn set_label(
        &self,
        base: &Arc<Credential>,
        label: Option<Arc<SecurityLabel>>,
        enforced: bool,
    ) -> Result<(Arc<Credential>, bool)> {
        self.derive(base, |model| {
            model.set_label(label);
            model.set_label_enforced(enforced);
            Ok(())
        })
    }

    /// The number of interned credentials.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
