// SPDX-License-Identifier: MPL-2.0

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct Uid(u32);

const ROOT_UID: u32 = 0;

impl Uid {
    pub const fn new_root() -> Self {
        Self(ROOT_UID)
    }

    pub const fn new(uid: u32) -> Self {
        Self(uid)
    }

    pub const fn is_root(&self) -> bool {
        self.0 == ROOT_UID
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Uid {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Uid> for u32 {
    fn from(value: Uid) -> Self {
        value.0
    }
}
