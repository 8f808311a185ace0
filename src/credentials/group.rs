// SPDX-License-Identifier: MPL-2.0

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct Gid(u32);

impl Gid {
    pub const fn new(gid: u32) -> Self {
        Self(gid)
    }

    pub const fn new_root() -> Self {
        Self(ROOT_GID)
    }

    pub const fn is_root(&self) -> bool {
        self.0 == ROOT_GID
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

const ROOT_GID: u32 = 0;

impl From<u32> for Gid {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Gid> for u32 {
    fn from(value: Gid) -> Self {
        value.0
    }
}
