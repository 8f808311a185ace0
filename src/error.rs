// SPDX-License-Identifier: MPL-2.0

#![allow(dead_code)]

/// Error number.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    EPERM = 1,   /* Operation not permitted */
    ENOENT = 2,  /* No such file or directory */
    ESRCH = 3,   /* No such process */
    EINTR = 4,   /* Interrupted system call */
    EIO = 5,     /* I/O error */
    E2BIG = 7,   /* Argument list too long */
    EAGAIN = 11, /* Try again */
    ENOMEM = 12, /* Out of memory */
    EACCES = 13, /* Permission denied */
    EFAULT = 14, /* Bad address */
    EBUSY = 16,  /* Device or resource busy */
    EEXIST = 17, /* File exists */
    EINVAL = 22, /* Invalid argument */
    ERANGE = 34, /* Math result not representable */
    // EWOULDBLOCK	EAGAIN	/* Operation would block */
    ENAMETOOLONG = 36, /* File name too long */
    ENOSYS = 38,       /* Invalid system call number */
    ETIME = 62,        /* Timer expired */
    EPROTO = 71,       /* Protocol error */
    EOVERFLOW = 75,    /* Value too large for defined data type */
    ETIMEDOUT = 110,   /* Connection timed out */
}

/// error used in this crate
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl AsRef<Error> for Error {
    fn as_ref(&self) -> &Error {
        self
    }
}

impl From<int_to_c_enum::TryFromIntError> for Error {
    fn from(_: int_to_c_enum::TryFromIntError) -> Self {
        Error::with_message(Errno::EINVAL, "Invalid enum value")
    }
}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return Err($crate::error::Error::with_message($errno, $message))
    };
}
