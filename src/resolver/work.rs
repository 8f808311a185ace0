// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    resolver::message::{LookupRequest, LookupResult},
    sync::Waker,
};

/// Where a piece of work stands in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WorkPhase {
    /// Queued, not yet handed to the daemon.
    Unsubmitted,
    /// Handed to the daemon, answer pending.
    Submitted,
    /// Answered or failed; the result is ready for the submitter.
    Done,
}

struct WorkState {
    phase: WorkPhase,
    result: Option<Result<LookupResult>>,
}

/// One lookup in flight between a submitter and the daemon.
///
/// The submitter parks on the waker until [`WorkItem::finish`] stores the
/// result. A submitter that gives up closes its waker, so a late `finish`
/// quietly wakes nobody.
pub(super) struct WorkItem {
    seq: u64,
    request: LookupRequest,
    waker: Arc<Waker>,
    state: Mutex<WorkState>,
}

impl WorkItem {
    pub(super) fn new(seq: u64, request: LookupRequest, waker: Arc<Waker>) -> Arc<Self> {
        Arc::new(Self {
            seq,
            request,
            waker,
            state: Mutex::new(WorkState {
                phase: WorkPhase::Unsubmitted,
                result: None,
            }),
        })
    }

    pub(super) fn seq(&self) -> u64 {
        self.seq
    }

    pub(super) fn request(&self) -> &LookupRequest {
        &self.request
    }

    pub(super) fn set_submitted(&self) {
        self.state.lock().phase = WorkPhase::Submitted;
    }

    pub(super) fn set_unsubmitted(&self) {
        self.state.lock().phase = WorkPhase::Unsubmitted;
    }

    /// Stores the result and wakes the submitter, if it is still there.
    pub(super) fn finish(&self, result: Result<LookupResult>) {
        let mut state = self.state.lock();
        state.phase = WorkPhase::Done;
        state.result = Some(result);
        drop(state);

        self.waker.wake_up();
    }

    /// Takes the result if one has been stored.
    pub(super) fn take_result(&self) -> Option<Result<LookupResult>> {
        self.state.lock().result.take()
    }

    /// Takes the result, or reports the phase the work is stuck in.
    ///
    /// The two reads share one lock acquisition, so the reported phase cannot
    /// be stale with respect to the missing result.
    pub(super) fn take_result_or_phase(
        &self,
    ) -> core::result::Result<Result<LookupResult>, WorkPhase> {
        let mut state = self.state.lock();
        match state.result.take() {
            Some(result) => Ok(result),
            None => Err(state.phase),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{credentials::Uid, resolver::message::LookupFlags, sync::Waiter};

    #[test]
    fn finish_stores_once_and_take_consumes() {
        let (_waiter, waker) = Waiter::new_pair();
        let request = LookupRequest::from_uid(Uid::new(1), LookupFlags::WANT_GUID);
        let item = WorkItem::new(7, request, waker);

        assert!(item.take_result().is_none());
        assert_eq!(item.take_result_or_phase().unwrap_err(), WorkPhase::Unsubmitted);

        item.set_submitted();
        assert_eq!(item.take_result_or_phase().unwrap_err(), WorkPhase::Submitted);

        item.finish(Ok(LookupResult::new()));
        assert!(item.take_result().unwrap().is_ok());
        assert!(item.take_result().is_none());
    }

    #[test]
    fn finish_wakes_the_submitter() {
        let (waiter, waker) = Waiter::new_pair();
        let request = LookupRequest::from_uid(Uid::new(1), LookupFlags::WANT_GUID);
        let item = WorkItem::new(8, request, waker);

        item.finish(Ok(LookupResult::new()));
        // The wake event is pending, so this returns without blocking.
        waiter.wait();
        assert!(item.take_result().is_some());
    }
}
