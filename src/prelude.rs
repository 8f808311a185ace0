// SPDX-License-Identifier: MPL-2.0

#![allow(unused)]

pub(crate) use std::{
    collections::VecDeque,
    fmt::Debug,
    string::{String, ToString},
    sync::{Arc, Weak},
    time::Duration,
    vec::Vec,
};

pub(crate) use bitflags::bitflags;
pub(crate) use int_to_c_enum::TryFromInt;
pub(crate) use log::{debug, info, warn};
pub(crate) use spin::{Mutex, MutexGuard, RwLock};

pub(crate) use crate::{
    Result,
    error::{Errno, Error},
    return_errno, return_errno_with_message,
    time::Clock,
};
