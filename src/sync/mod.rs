// SPDX-License-Identifier: MPL-2.0

//! Blocking and waking of threads.

mod wait;

pub use self::wait::{WaitQueue, Waiter, Waker};
