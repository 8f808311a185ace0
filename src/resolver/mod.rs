// SPDX-License-Identifier: MPL-2.0

//! The gateway between identity questions and the user-space resolver daemon.
//!
//! Exactly one daemon serves lookups at a time. Submitters queue work and
//! block; the daemon pulls work with [`ResolverGateway::get_work`], answers
//! with [`ResolverGateway::complete`], and the gateway routes each answer
//! back to its sleeping submitter by sequence number.
//!
//! The daemon is never waited on forever. Work that sits unclaimed for a
//! whole timeout proves the daemon is gone, which fails every queued lookup
//! at once; work that was claimed but not answered in time fails only its
//! own submitter and the answer, if it ever arrives, is still offered to the
//! caches.

use hashbrown::HashMap;

use crate::{
    prelude::*,
    sync::{WaitQueue, Waiter},
};

mod message;
mod work;

pub use self::message::{LookupFlags, LookupRequest, LookupResult, ResolverOutcome};
use self::work::{WorkItem, WorkPhase};

/// How a daemon identifies itself to the gateway.
pub type ResolverId = u64;

/// How long a submitter waits for an answer unless the daemon asks otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// The shortest timeout a daemon may request.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(30);
/// The longest timeout a daemon may request.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(10_000);

struct GatewayInner {
    resolver: Option<ResolverId>,
    // Stays true forever after the first registration. It separates "no
    // daemon yet, give it a chance" from "the daemon died, fail fast".
    ever_registered: bool,
    next_seq: u64,
    timeout: Duration,
    unsubmitted: VecDeque<Arc<WorkItem>>,
    submitted: HashMap<u64, Arc<WorkItem>>,
}

/// The rendezvous point between submitters and the resolver daemon.
pub struct ResolverGateway {
    inner: Mutex<GatewayInner>,
    /// Woken when work lands in the unsubmitted queue or the daemon changes.
    work_available: WaitQueue,
    /// Woken when a daemon registers.
    registration: WaitQueue,
}

impl ResolverGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(GatewayInner {
                resolver: None,
                ever_registered: false,
                next_seq: 1,
                timeout,
                unsubmitted: VecDeque::new(),
                submitted: HashMap::new(),
            }),
            work_available: WaitQueue::new(),
            registration: WaitQueue::new(),
        }
    }

    /// The timeout currently applied to submitted lookups.
    pub fn timeout(&self) -> Duration {
        self.inner.lock().timeout
    }

    /// Whether any daemon has ever registered, dead or alive.
    pub fn ever_registered(&self) -> bool {
        self.inner.lock().ever_registered
    }

    /// Queues `request` and blocks until it is answered or times out.
    ///
    /// Before any daemon has ever registered, the submitter waits one whole
    /// timeout for a late starter and then fails with `EAGAIN`. Once a
    /// daemon has died, submitters fail immediately with `EIO` until a
    /// replacement registers.
    pub fn submit(&self, request: LookupRequest) -> Result<LookupResult> {
        let mut inner = self.inner.lock();

        if inner.resolver.is_none() {
            if inner.ever_registered {
                return_errno_with_message!(Errno::EIO, "the identity resolver has died");
            }

            let grace = inner.timeout;
            drop(inner);
            let _ = self.registration.wait_until_or_timeout(
                || {
                    let inner = self.inner.lock();
                    (inner.resolver.is_some() || inner.ever_registered).then_some(())
                },
                &grace,
            );

            inner = self.inner.lock();
            if inner.resolver.is_none() {
                if inner.ever_registered {
                    return_errno_with_message!(Errno::EIO, "the identity resolver has died");
                }
                return_errno_with_message!(Errno::EAGAIN, "no identity resolver came up in time");
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let timeout = inner.timeout;

        let (waiter, waker) = Waiter::new_pair();
        let item = WorkItem::new(seq, request, waker);
        inner.unsubmitted.push_back(item.clone());
        drop(inner);

        debug!("submitting identity lookup #{}", seq);
        self.work_available.wake_one();

        match waiter.wait_until_or_timeout(|| item.take_result(), &timeout) {
            Ok(result) => result,
            Err(_) => self.give_up(&item),
        }
    }

    /// Settles a lookup whose submitter ran out of patience.
    fn give_up(&self, item: &Arc<WorkItem>) -> Result<LookupResult> {
        let mut inner = self.inner.lock();

        match item.take_result_or_phase() {
            Ok(result) => result,
            Err(WorkPhase::Unsubmitted) => {
                // Unclaimed for a whole timeout: nobody is serving the queue.
                let seq = item.seq();
                inner.unsubmitted.retain(|queued| queued.seq() != seq);
                warn!(
                    "identity lookup #{} sat unclaimed past its timeout; the resolver is gone",
                    seq
                );
                self.declare_dead(inner);
                return_errno_with_message!(Errno::EIO, "the identity resolver has died")
            }
            Err(WorkPhase::Submitted) => {
                // The daemon holds it and may still answer for the caches,
                // but this caller is done waiting.
                drop(inner);
                warn!("identity lookup #{} timed out while submitted", item.seq());
                return_errno_with_message!(Errno::ETIME, "the identity lookup timed out")
            }
            Err(WorkPhase::Done) => {
                // `finish` stores the result before flipping the phase, and
                // only the submitter takes it.
                unreachable!("a finished lookup lost its result");
            }
        }
    }

    /// Blocks until a queued lookup can be handed to the daemon `id`.
    ///
    /// Fails with `ENOENT` when no daemon is registered and `EPERM` when a
    /// different daemon is. Both also apply retroactively to a daemon that
    /// is blocked here when its registration ends.
    pub fn get_work(&self, id: ResolverId) -> Result<(u64, LookupRequest)> {
        self.work_available.wait_until(|| {
            let mut inner = self.inner.lock();
            if let Err(err) = Self::check_identity(&inner, id) {
                return Some(Err(err));
            }

            let item = inner.unsubmitted.pop_front()?;
            item.set_submitted();
            let seq = item.seq();
            let request = item.request().clone();
            inner.submitted.insert(seq, item);

            debug!("handing identity lookup #{} to the resolver", seq);
            Some(Ok((seq, request)))
        })
    }

    /// Delivers the daemon's answer for the lookup `seq`.
    ///
    /// A successful answer is returned to the caller as well, paired with
    /// its request, so it can be folded into the caches even when the
    /// submitter has already given up. Answers for unknown sequence numbers
    /// are dropped without complaint.
    pub fn complete(
        &self,
        id: ResolverId,
        seq: u64,
        outcome: ResolverOutcome,
        result: LookupResult,
    ) -> Result<Option<(LookupRequest, LookupResult)>> {
        let mut inner = self.inner.lock();
        Self::check_identity(&inner, id)?;

        let completion = match outcome {
            ResolverOutcome::Success => Ok(result),
            ResolverOutcome::Failure => Err(Error::with_message(
                Errno::EIO,
                "the identity resolver could not answer",
            )),
            ResolverOutcome::BadRequest => Err(Error::with_message(
                Errno::EINVAL,
                "the identity resolver rejected the request",
            )),
            ResolverOutcome::Fatal => {
                warn!("the identity resolver gave up for good");
                self.declare_dead(inner);
                return Ok(None);
            }
        };

        let Some(item) = inner.submitted.remove(&seq) else {
            drop(inner);
            debug!("dropping an answer for unknown identity lookup #{}", seq);
            return Ok(None);
        };
        drop(inner);

        let payload = completion
            .as_ref()
            .ok()
            .map(|result| (item.request().clone(), result.clone()));
        item.finish(completion);
        Ok(payload)
    }

    /// Installs the daemon `id` as the resolver, replacing any predecessor.
    ///
    /// A timeout hint outside [`MIN_TIMEOUT`, `MAX_TIMEOUT`] leaves the
    /// current timeout untouched. When the daemon actually changes, work the
    /// predecessor held goes back to the head of the queue, oldest first,
    /// so the newcomer sees it before anything fresh.
    pub fn register(&self, id: ResolverId, timeout_hint: Option<Duration>) {
        let mut inner = self.inner.lock();

        if let Some(hint) = timeout_hint {
            if (MIN_TIMEOUT..=MAX_TIMEOUT).contains(&hint) {
                inner.timeout = hint;
            } else {
                warn!("ignoring an out-of-range resolver timeout of {:?}", hint);
            }
        }

        let previous = inner.resolver.replace(id);
        inner.ever_registered = true;

        if let Some(previous) = previous
            && previous != id
        {
            let mut inflight: Vec<_> = inner.submitted.drain().map(|(_, item)| item).collect();
            inflight.sort_unstable_by_key(|item| item.seq());
            for item in inflight.into_iter().rev() {
                item.set_unsubmitted();
                inner.unsubmitted.push_front(item);
            }
            info!("identity resolver {} takes over from {}", id, previous);
        } else {
            info!("identity resolver {} registered", id);
        }
        drop(inner);

        self.registration.wake_all();
        self.work_available.wake_all();
    }

    /// Withdraws the daemon `id`, failing everything in flight.
    pub fn deregister(&self, id: ResolverId) -> Result<()> {
        let inner = self.inner.lock();
        Self::check_identity(&inner, id)?;

        info!("identity resolver {} deregistered", id);
        self.declare_dead(inner);
        Ok(())
    }

    /// Clears the registration and fails every queued and in-flight lookup.
    fn declare_dead(&self, mut inner: MutexGuard<'_, GatewayInner>) {
        inner.resolver = None;
        let mut stranded: Vec<_> = inner.unsubmitted.drain(..).collect();
        stranded.extend(inner.submitted.drain().map(|(_, item)| item));
        drop(inner);

        // Waking happens outside the lock.
        for item in stranded {
            item.finish(Err(Error::with_message(
                Errno::EIO,
                "the identity resolver has died",
            )));
        }
        self.work_available.wake_all();
    }

    fn check_identity(inner: &GatewayInner, id: ResolverId) -> Result<()> {
        match inner.resolver {
            None => return_errno_with_message!(Errno::ENOENT, "no identity resolver is registered"),
            Some(current) if current != id => {
                return_errno_with_message!(Errno::EPERM, "another resolver serves lookups")
            }
            Some(_) => Ok(()),
        }
    }
}

impl Default for ResolverGateway {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Instant};

    use super::*;
    use crate::credentials::{Guid, Uid};

    fn uid_request(uid: u32) -> LookupRequest {
        LookupRequest::from_uid(Uid::new(uid), LookupFlags::WANT_GUID)
    }

    #[test]
    fn a_lookup_round_trips_through_the_daemon() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_secs(10)));
        gateway.register(1, None);

        let daemon = {
            let gateway = gateway.clone();
            thread::spawn(move || {
                let (seq, request) = gateway.get_work(1).unwrap();
                assert_eq!(request.uid(), Some(Uid::new(501)));
                assert!(request.flags().contains(LookupFlags::WANT_GUID));

                let mut result = LookupResult::new();
                result.set_guid(Guid::new([7; 16]), Duration::from_secs(60));
                gateway
                    .complete(1, seq, ResolverOutcome::Success, result)
                    .unwrap()
            })
        };

        let result = gateway.submit(uid_request(501)).unwrap();
        assert_eq!(result.guid(), Some(&Guid::new([7; 16])));

        // The answer also comes back for the caches, paired with its request.
        let (request, result) = daemon.join().unwrap().unwrap();
        assert_eq!(request.uid(), Some(Uid::new(501)));
        assert_eq!(result.guid(), Some(&Guid::new([7; 16])));
    }

    #[test]
    fn submitting_before_any_registration_waits_then_fails() {
        let gateway = ResolverGateway::new(Duration::from_millis(50));
        let err = gateway.submit(uid_request(1)).unwrap_err();
        assert_eq!(err.error(), Errno::EAGAIN);
    }

    #[test]
    fn a_late_daemon_catches_a_waiting_submitter() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_secs(10)));

        let daemon = {
            let gateway = gateway.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                gateway.register(1, None);

                let (seq, _) = gateway.get_work(1).unwrap();
                let mut result = LookupResult::new();
                result.set_uid(Uid::new(9));
                gateway
                    .complete(1, seq, ResolverOutcome::Success, result)
                    .unwrap();
            })
        };

        let request = LookupRequest::from_guid(Guid::new([1; 16]), LookupFlags::WANT_UID);
        let result = gateway.submit(request).unwrap();
        assert_eq!(result.uid(), Some(Uid::new(9)));
        daemon.join().unwrap();
    }

    #[test]
    fn death_fails_later_submitters_without_waiting() {
        let gateway = ResolverGateway::new(Duration::from_secs(30));
        gateway.register(1, None);
        gateway.deregister(1).unwrap();

        let begin = Instant::now();
        let err = gateway.submit(uid_request(1)).unwrap_err();
        assert_eq!(err.error(), Errno::EIO);
        assert!(begin.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn death_fails_every_waiting_submitter() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_secs(30)));
        gateway.register(1, None);

        let submitters: Vec<_> = (0..4)
            .map(|uid| {
                let gateway = gateway.clone();
                thread::spawn(move || gateway.submit(uid_request(uid)))
            })
            .collect();

        // Pull every lookup into the submitted phase, then walk away.
        for _ in 0..4 {
            gateway.get_work(1).unwrap();
        }
        gateway.deregister(1).unwrap();

        for submitter in submitters {
            let err = submitter.join().unwrap().unwrap_err();
            assert_eq!(err.error(), Errno::EIO);
        }
    }

    #[test]
    fn an_unclaimed_lookup_declares_the_resolver_dead() {
        let gateway = ResolverGateway::new(Duration::from_millis(50));
        gateway.register(1, None);

        let err = gateway.submit(uid_request(1)).unwrap_err();
        assert_eq!(err.error(), Errno::EIO);

        // The daemon is now considered gone.
        let err = gateway.get_work(1).unwrap_err();
        assert_eq!(err.error(), Errno::ENOENT);
    }

    #[test]
    fn a_slow_answer_is_etime_for_the_caller_but_kept_for_the_caches() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_millis(200)));
        gateway.register(1, None);

        let daemon = {
            let gateway = gateway.clone();
            thread::spawn(move || {
                let (seq, _) = gateway.get_work(1).unwrap();
                thread::sleep(Duration::from_millis(600));

                let mut result = LookupResult::new();
                result.set_guid(Guid::new([3; 16]), Duration::ZERO);
                gateway
                    .complete(1, seq, ResolverOutcome::Success, result)
                    .unwrap()
            })
        };

        let err = gateway.submit(uid_request(2)).unwrap_err();
        assert_eq!(err.error(), Errno::ETIME);

        // The abandoned answer still comes back for the caches.
        assert!(daemon.join().unwrap().is_some());

        // And the daemon is still trusted with new work.
        let ignored = gateway
            .complete(1, 9999, ResolverOutcome::Success, LookupResult::new())
            .unwrap();
        assert!(ignored.is_none());
    }

    #[test]
    fn a_new_daemon_inherits_work_the_old_one_held() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_secs(10)));
        gateway.register(1, None);

        let submitter = {
            let gateway = gateway.clone();
            thread::spawn(move || {
                let request = LookupRequest::from_uid(Uid::new(77), LookupFlags::WANT_NAME);
                gateway.submit(request)
            })
        };

        let (seq, _) = gateway.get_work(1).unwrap();

        // Daemon 1 vanishes without answering; daemon 2 takes over and is
        // offered the same lookup again.
        gateway.register(2, None);
        let (seq_again, request) = gateway.get_work(2).unwrap();
        assert_eq!(seq_again, seq);
        assert_eq!(request.uid(), Some(Uid::new(77)));

        let mut result = LookupResult::new();
        result.set_name("mole".to_string(), Duration::ZERO);
        gateway
            .complete(2, seq, ResolverOutcome::Success, result)
            .unwrap();

        let result = submitter.join().unwrap().unwrap();
        assert_eq!(result.name(), Some("mole"));
    }

    #[test]
    fn inherited_work_comes_back_oldest_first() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_secs(10)));
        gateway.register(1, None);

        let submit = |uid: u32| {
            let gateway = gateway.clone();
            thread::spawn(move || gateway.submit(uid_request(uid)))
        };

        let first = submit(1);
        let (seq_a, _) = gateway.get_work(1).unwrap();
        let second = submit(2);
        let (seq_b, _) = gateway.get_work(1).unwrap();
        assert!(seq_a < seq_b);

        gateway.register(2, None);
        let (first_offered, _) = gateway.get_work(2).unwrap();
        let (second_offered, _) = gateway.get_work(2).unwrap();
        assert_eq!(first_offered, seq_a);
        assert_eq!(second_offered, seq_b);

        for (seq, submitter) in [(seq_a, first), (seq_b, second)] {
            gateway
                .complete(2, seq, ResolverOutcome::Success, LookupResult::new())
                .unwrap();
            submitter.join().unwrap().unwrap();
        }
    }

    #[test]
    fn a_fatal_completion_kills_the_resolver() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_secs(30)));
        gateway.register(1, None);

        let submitter = {
            let gateway = gateway.clone();
            thread::spawn(move || gateway.submit(uid_request(1)))
        };

        let (seq, _) = gateway.get_work(1).unwrap();
        let payload = gateway
            .complete(1, seq, ResolverOutcome::Fatal, LookupResult::new())
            .unwrap();
        assert!(payload.is_none());

        assert_eq!(submitter.join().unwrap().unwrap_err().error(), Errno::EIO);
        assert_eq!(gateway.get_work(1).unwrap_err().error(), Errno::ENOENT);
    }

    #[test]
    fn transient_and_malformed_failures_map_to_errnos() {
        let gateway = Arc::new(ResolverGateway::new(Duration::from_secs(30)));
        gateway.register(1, None);

        for (outcome, errno) in [
            (ResolverOutcome::Failure, Errno::EIO),
            (ResolverOutcome::BadRequest, Errno::EINVAL),
        ] {
            let submitter = {
                let gateway = gateway.clone();
                thread::spawn(move || gateway.submit(uid_request(1)))
            };

            let (seq, _) = gateway.get_work(1).unwrap();
            let payload = gateway
                .complete(1, seq, outcome, LookupResult::new())
                .unwrap();
            assert!(payload.is_none());
            assert_eq!(submitter.join().unwrap().unwrap_err().error(), errno);
        }
    }

    #[test]
    fn out_of_range_timeout_hints_are_ignored() {
        let gateway = ResolverGateway::new(DEFAULT_TIMEOUT);

        gateway.register(1, Some(Duration::from_secs(31)));
        assert_eq!(gateway.timeout(), Duration::from_secs(31));

        gateway.register(1, Some(Duration::from_secs(5)));
        assert_eq!(gateway.timeout(), Duration::from_secs(31));

        gateway.register(1, Some(Duration::from_secs(20_000)));
        assert_eq!(gateway.timeout(), Duration::from_secs(31));

        gateway.register(1, None);
        assert_eq!(gateway.timeout(), Duration::from_secs(31));
    }

    #[test]
    fn only_the_current_daemon_may_serve() {
        let gateway = ResolverGateway::new(DEFAULT_TIMEOUT);
        assert_eq!(gateway.get_work(1).unwrap_err().error(), Errno::ENOENT);

        gateway.register(1, None);
        assert_eq!(gateway.get_work(2).unwrap_err().error(), Errno::EPERM);
        assert_eq!(gateway.deregister(2).unwrap_err().error(), Errno::EPERM);
        let err = gateway
            .complete(2, 1, ResolverOutcome::Success, LookupResult::new())
            .unwrap_err();
        assert_eq!(err.error(), Errno::EPERM);
    }
}
