use core::fmt;

/// Kernel error codes. A syscall that fails returns `-(code)` in `v0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Error {
    Unspecified = 1,
    /// id does not resolve, or fails the permission check.
    BadEnv = 2,
    /// malformed permission, out of range address, bad status value.
    Inval = 3,
    /// out of physical frames.
    NoMem = 4,
    NoSys = 5,
    /// environment pool exhausted.
    NoFreeEnv = 6,
    /// target of a send is not blocked in receive.
    IpcNotRecv = 7,
    /// page table walk hit an invalid entry. Never crosses the syscall boundary.
    NotMapped = 8,
}

impl Error {
    /// decode a raw negative syscall result.
    pub fn from_code(code: isize) -> Option<Self> {
        match -code {
            1 => Some(Error::Unspecified),
            2 => Some(Error::BadEnv),
            3 => Some(Error::Inval),
            4 => Some(Error::NoMem),
            5 => Some(Error::NoSys),
            6 => Some(Error::NoFreeEnv),
            7 => Some(Error::IpcNotRecv),
            8 => Some(Error::NotMapped),
            _ => None,
        }
    }
}

impl From<Error> for i32 {
    fn from(value: Error) -> Self {
        -(value as i32)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::Unspecified => "unspecified error",
            Error::BadEnv => "bad environment",
            Error::Inval => "invalid parameter",
            Error::NoMem => "out of memory",
            Error::NoSys => "no such syscall",
            Error::NoFreeEnv => "out of environments",
            Error::IpcNotRecv => "env is not receiving",
            Error::NotMapped => "page not mapped",
        };
        f.write_str(s)
    }
}
