//! IPC error type and the errno values it maps to.

use core::fmt;

use halcyon_core::error::WaitError;

// ── Error numbers ────────────────────────────────────────────────────

/// `ENOENT`: no such file or directory.
pub const ENOENT: isize = 2;
/// `EINTR`: interrupted by a signal.
pub const EINTR: isize = 4;
/// `ENXIO`: no reader on the other end.
pub const ENXIO: isize = 6;
/// `EBADF`: bad file descriptor.
pub const EBADF: isize = 9;
/// `EAGAIN`: resource temporarily unavailable.
pub const EAGAIN: isize = 11;
/// `EEXIST`: file exists.
pub const EEXIST: isize = 17;
/// `EINVAL`: invalid argument.
pub const EINVAL: isize = 22;
/// `EMFILE`: too many open files.
pub const EMFILE: isize = 24;
/// `EPIPE`: broken pipe.
pub const EPIPE: isize = 32;
/// `ENOSYS`: operation not supported by this object.
pub const ENOSYS: isize = 38;
/// `ETIMEDOUT`: timed out.
pub const ETIMEDOUT: isize = 110;

/// Errors reported by IPC objects and their syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// The descriptor is not open, or not open for this operation.
    BadFd,
    /// Malformed argument or flag combination.
    InvalidArgument,
    /// Write to a pipe whose read side has closed.
    BrokenPipe,
    /// Nothing could be transferred without blocking.
    WouldBlock,
    /// A signal arrived while waiting.
    Interrupted,
    /// The wait's deadline passed.
    TimedOut,
    /// A named pipe already exists at that path.
    Exists,
    /// No named pipe at that path.
    NotFound,
    /// Non-blocking writer open of a named pipe with no reader.
    NoReader,
    /// The descriptor table is full.
    TooManyFiles,
    /// The object does not implement this operation.
    NotSupported,
}

impl IpcError {
    /// Positive errno value; syscalls return its negation.
    pub const fn to_errno(self) -> isize {
        match self {
            Self::BadFd => EBADF,
            Self::InvalidArgument => EINVAL,
            Self::BrokenPipe => EPIPE,
            Self::WouldBlock => EAGAIN,
            Self::Interrupted => EINTR,
            Self::TimedOut => ETIMEDOUT,
            Self::Exists => EEXIST,
            Self::NotFound => ENOENT,
            Self::NoReader => ENXIO,
            Self::TooManyFiles => EMFILE,
            Self::NotSupported => ENOSYS,
        }
    }
}

impl From<WaitError> for IpcError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::TimedOut => Self::TimedOut,
            WaitError::Interrupted => Self::Interrupted,
            WaitError::WouldBlock => Self::WouldBlock,
        }
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::BadFd => "bad file descriptor",
            Self::InvalidArgument => "invalid argument",
            Self::BrokenPipe => "broken pipe",
            Self::WouldBlock => "operation would block",
            Self::Interrupted => "interrupted",
            Self::TimedOut => "timed out",
            Self::Exists => "already exists",
            Self::NotFound => "not found",
            Self::NoReader => "no reader",
            Self::TooManyFiles => "too many open files",
            Self::NotSupported => "not supported",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for IpcError {}
