// SPDX-License-Identifier: MPL-2.0

//! Group membership evaluation, as methods on [`Kauth`].

use crate::{
    credentials::{Credential, Gid, Uid},
    prelude::*,
    resolver::LookupRequest,
    service::Kauth,
};

bitflags! {
    /// The access kinds a permission check can ask about.
    pub struct Access: u16 {
        const MAY_EXEC  = 0x0001;
        const MAY_WRITE = 0x0002;
        const MAY_READ  = 0x0004;
    }
}

impl Access {
    pub fn may_read(&self) -> bool {
        self.contains(Self::MAY_READ)
    }

    pub fn may_write(&self) -> bool {
        self.contains(Self::MAY_WRITE)
    }

    pub fn may_exec(&self) -> bool {
        self.contains(Self::MAY_EXEC)
    }
}

bitflags! {
    /// POSIX permission bits of the object being checked.
    pub struct FileMode: u16 {
        /// read by owner
        const S_IRUSR = 0o0400;
        /// write by owner
        const S_IWUSR = 0o0200;
        /// execute/search by owner
        const S_IXUSR = 0o0100;
        /// read by group
        const S_IRGRP = 0o0040;
        /// write by group
        const S_IWGRP = 0o0020;
        /// execute/search by group
        const S_IXGRP = 0o0010;
        /// read by others
        const S_IROTH = 0o0004;
        /// write by others
        const S_IWOTH = 0o0002;
        /// execute/search by others
        const S_IXOTH = 0o0001;
    }
}

impl FileMode {
    pub fn is_owner_readable(&self) -> bool {
        self.contains(Self::S_IRUSR)
    }

    pub fn is_owner_writable(&self) -> bool {
        self.contains(Self::S_IWUSR)
    }

    pub fn is_owner_executable(&self) -> bool {
        self.contains(Self::S_IXUSR)
    }

    pub fn is_group_readable(&self) -> bool {
        self.contains(Self::S_IRGRP)
    }

    pub fn is_group_writable(&self) -> bool {
        self.contains(Self::S_IWGRP)
    }

    pub fn is_group_executable(&self) -> bool {
        self.contains(Self::S_IXGRP)
    }

    pub fn is_other_readable(&self) -> bool {
        self.contains(Self::S_IROTH)
    }

    pub fn is_other_writable(&self) -> bool {
        self.contains(Self::S_IWOTH)
    }

    pub fn is_other_executable(&self) -> bool {
        self.contains(Self::S_IXOTH)
    }
}

impl Kauth {
    /// Whether the credential `cred` carries the group `gid`.
    ///
    /// The inline group list answers most checks without any locking. Beyond
    /// it, the check runs on behalf of the credential's group-membership
    /// UID; a credential without one has opted out of external resolution
    /// and belongs to nothing outside its inline list.
    pub fn cred_ismember_gid(&self, cred: &Credential, gid: Gid) -> Result<bool> {
        if cred.groups().contains(&gid) {
            return Ok(true);
        }

        let Some(gmuid) = cred.gmuid() else {
            return Ok(false);
        };

        // Nothing has ever served lookups: fail closed rather than hold
        // early-boot permission checks behind the registration grace sleep.
        if !self.resolver.ever_registered() {
            return Ok(false);
        }

        let now = self.clock.read_time();
        let cached = self.groups_cache.find(gmuid, gid);
        if let Some(entry) = cached
            && !entry.is_expired(now)
        {
            return Ok(entry.is_member());
        }

        match self.resolver.submit(LookupRequest::membership(gmuid, gid)) {
            Ok(result) => result.is_member().ok_or_else(|| {
                Error::with_message(Errno::EIO, "the resolver answered without a verdict")
            }),
            Err(err) => {
                // A verdict that has merely gone stale still beats an
                // unavailable resolver, unless the request itself was at
                // fault.
                if let Some(entry) = cached
                    && err.error() != Errno::EINVAL
                {
                    warn!("answering a membership check from an expired verdict");
                    return Ok(entry.is_member());
                }
                Err(err)
            }
        }
    }

    /// Checks `access` for a credential against an object's POSIX bits.
    ///
    /// The owner, group and other classes are mutually exclusive. The group
    /// class is entered through [`Kauth::cred_ismember_gid`], so a
    /// membership question that cannot be answered fails the whole check
    /// instead of sliding the caller into the other class.
    pub fn check_posix_access(
        &self,
        cred: &Credential,
        owner: Uid,
        group: Gid,
        mode: FileMode,
        mut access: Access,
    ) -> Result<()> {
        // The superuser bypasses read/write checks; execute still wants at
        // least one execute bit somewhere.
        if cred.euid().is_root() {
            access -= Access::MAY_READ | Access::MAY_WRITE;

            if access.may_exec() {
                if mode.is_owner_executable()
                    || mode.is_group_executable()
                    || mode.is_other_executable()
                {
                    access -= Access::MAY_EXEC;
                } else {
                    return_errno_with_message!(
                        Errno::EACCES,
                        "root execute permission denied: no execute bits set"
                    );
                }
            }
        }

        if access.is_empty() {
            return Ok(());
        }

        if cred.euid() == owner {
            if (access.may_read() && !mode.is_owner_readable())
                || (access.may_write() && !mode.is_owner_writable())
                || (access.may_exec() && !mode.is_owner_executable())
            {
                return_errno_with_message!(Errno::EACCES, "owner permission check failed");
            }
        } else if self.cred_ismember_gid(cred, group)? {
            if (access.may_read() && !mode.is_group_readable())
                || (access.may_write() && !mode.is_group_writable())
                || (access.may_exec() && !mode.is_group_executable())
            {
                return_errno_with_message!(Errno::EACCES, "group permission check failed");
            }
        } else if (access.may_read() && !mode.is_other_readable())
            || (access.may_write() && !mode.is_other_writable())
            || (access.may_exec() && !mode.is_other_executable())
        {
            return_errno_with_message!(Errno::EACCES, "other permission check failed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use crate::{
        credentials::{Credential, CredentialModel, Gid, Uid},
        prelude::*,
        resolver::{LookupFlags, LookupResult, ResolverOutcome},
        service::{Kauth, KauthOptions},
        time::ManualClock,
    };

    use super::{Access, FileMode};

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

    fn cred_for(kauth: &Kauth, uid: u32, gid: u32) -> Arc<Credential> {
        kauth
            .credentials()
            .get_or_insert(CredentialModel::new(Uid::new(uid), Gid::new(gid)))
    }

    fn serve_membership(
        kauth: &Arc<Kauth>,
        is_member: bool,
        ttl: Duration,
    ) -> thread::JoinHandle<()> {
        let kauth = kauth.clone();
        thread::spawn(move || {
            let (seq, request) = kauth.resolver_get_work(1).unwrap();
            assert!(request.flags().contains(LookupFlags::CHECK_MEMBERSHIP));

            let mut result = LookupResult::new();
            result.set_membership(is_member, ttl);
            kauth
                .resolver_complete(1, seq, ResolverOutcome::Success, result)
                .unwrap();
        })
    }

    #[test]
    fn inline_groups_answer_without_any_resolver() {
        let (kauth, _) = test_service();
        let cred = cred_for(&kauth, 1000, 20);

        assert!(kauth.cred_ismember_gid(&cred, Gid::new(20)).unwrap());
        // Fail closed: nothing has ever registered.
        assert!(!kauth.cred_ismember_gid(&cred, Gid::new(21)).unwrap());
    }

    #[test]
    fn opting_out_stops_at_the_inline_list() {
        let (kauth, _) = test_service();
        kauth.resolver_register(1, None);

        let mut model = CredentialModel::new(Uid::new(1000), Gid::new(20));
        model.set_gmuid(None);
        let cred = kauth.credentials().get_or_insert(model);

        // No daemon is serving, so anything but an immediate "no" would
        // block or fail; the opt-out answers directly.
        assert!(!kauth.cred_ismember_gid(&cred, Gid::new(33)).unwrap());
    }

    #[test]
    fn verdicts_round_trip_and_then_hit_the_cache() {
        let (kauth, _) = test_service();
        kauth.resolver_register(1, None);
        let cred = cred_for(&kauth, 1000, 20);

        let daemon = serve_membership(&kauth, true, Duration::from_secs(30));
        assert!(kauth.cred_ismember_gid(&cred, Gid::new(80)).unwrap());
        daemon.join().unwrap();

        // The verdict is cached; the daemon is no longer needed.
        kauth.resolver_deregister(1).unwrap();
        assert!(kauth.cred_ismember_gid(&cred, Gid::new(80)).unwrap());
    }

    #[test]
    fn stale_verdicts_still_answer_when_the_resolver_is_gone() {
        let (kauth, clock) = test_service();
        kauth.resolver_register(1, None);
        let cred = cred_for(&kauth, 1000, 20);

        let daemon = serve_membership(&kauth, true, Duration::from_secs(30));
        assert!(kauth.cred_ismember_gid(&cred, Gid::new(80)).unwrap());
        daemon.join().unwrap();
        kauth.resolver_deregister(1).unwrap();

        // Expired entry, dead resolver: the stale verdict still serves.
        clock.advance(Duration::from_secs(31));
        assert!(kauth.cred_ismember_gid(&cred, Gid::new(80)).unwrap());

        // Without even a stale verdict, the failure propagates; it is
        // never mistaken for an answer.
        let err = kauth.cred_ismember_gid(&cred, Gid::new(81)).unwrap_err();
        assert_eq!(err.error(), Errno::EIO);
    }

    #[test]
    fn owner_class_uses_owner_bits_only() {
        let (kauth, _) = test_service();
        let cred = cred_for(&kauth, 1000, 20);
        let mode = FileMode::S_IRUSR | FileMode::S_IWUSR;

        kauth
            .check_posix_access(&cred, Uid::new(1000), Gid::new(55), mode, Access::MAY_READ)
            .unwrap();
        let err = kauth
            .check_posix_access(&cred, Uid::new(1000), Gid::new(55), mode, Access::MAY_EXEC)
            .unwrap_err();
        assert_eq!(err.error(), Errno::EACCES);
    }

    #[test]
    fn group_class_is_entered_through_membership() {
        let (kauth, _) = test_service();
        let cred = cred_for(&kauth, 1000, 20);
        let mode = FileMode::S_IRGRP;

        // The inline list admits the credential into the group class.
        kauth
            .check_posix_access(&cred, Uid::new(0), Gid::new(20), mode, Access::MAY_READ)
            .unwrap();

        // A non-member lands in the other class, which grants nothing here.
        let err = kauth
            .check_posix_access(&cred, Uid::new(0), Gid::new(44), mode, Access::MAY_READ)
            .unwrap_err();
        assert_eq!(err.error(), Errno::EACCES);
    }

    #[test]
    fn an_unanswerable_membership_check_denies_access() {
        let (kauth, _) = test_service();
        kauth.resolver_register(1, None);
        kauth.resolver_deregister(1).unwrap();
        let cred = cred_for(&kauth, 1000, 20);

        // Others would be allowed, but the group question cannot be
        // answered, and guessing "not a member" here would grant access on
        // an unproven claim.
        let mode = FileMode::S_IROTH | FileMode::S_IWOTH | FileMode::S_IXOTH;
        let err = kauth
            .check_posix_access(&cred, Uid::new(0), Gid::new(44), mode, Access::MAY_READ)
            .unwrap_err();
        assert_eq!(err.error(), Errno::EIO);
    }

    #[test]
    fn root_skips_read_write_but_not_exec() {
        let (kauth, _) = test_service();
        let cred = cred_for(&kauth, 0, 0);

        let mode = FileMode::empty();
        kauth
            .check_posix_access(
                &cred,
                Uid::new(1000),
                Gid::new(20),
                mode,
                Access::MAY_READ | Access::MAY_WRITE,
            )
            .unwrap();
        let err = kauth
            .check_posix_access(&cred, Uid::new(1000), Gid::new(20), mode, Access::MAY_EXEC)
            .unwrap_err();
        assert_eq!(err.error(), Errno::EACCES);

        // One execute bit anywhere satisfies the superuser.
        kauth
            .check_posix_access(
                &cred,
                Uid::new(1000),
                Gid::new(20),
                FileMode::S_IXOTH,
                Access::MAY_EXEC,
            )
            .unwrap();
    }
}
