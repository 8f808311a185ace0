// SPDX-License-Identifier: MPL-2.0

//! Credential management and identity resolution.
//!
//! This crate keeps per-subject credentials in a hash-consed store, so the
//! many tasks sharing one security identity also share one allocation, and
//! answers the identity questions those credentials raise: translating
//! between UIDs, GIDs, GUIDs, NT-style SIDs and names, and deciding group
//! membership. Questions the inline credential state cannot answer go
//! through a gateway to a single user-space resolver daemon; its answers
//! are cached with per-fact time-to-live so that most checks never reach
//! the daemon at all.
//!
//! [`Kauth`] ties the pieces together. Embedders construct one through
//! [`KauthOptions`] and drive the daemon side with its `resolver_*`
//! methods.

#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod groups;
pub mod identity;
mod prelude;
pub mod resolver;
pub mod service;
pub mod sync;
pub mod time;

pub use self::{
    error::{Errno, Error},
    service::{Kauth, KauthOptions},
};

/// The crate-wide result type.
pub type Result<T> = core::result::Result<T, Error>;
