//! Leveled kernel log.
//!
//! Primitives report through [`kerror!`], [`kwarn!`], [`kinfo!`],
//! [`kdebug!`] and [`ktrace!`]. Each record carries a short target naming
//! the subsystem (`"sem"`, `"pipe"`, ...). Records are routed to the sink
//! registered with [`set_log_fn`]; before registration they are silently
//! discarded. Levels above [`MAX_LOG_LEVEL`](crate::config::MAX_LOG_LEVEL)
//! are filtered before formatting.

use core::fmt;
use core::sync::atomic::{AtomicPtr, Ordering};

// ---------------------------------------------------------------------------
// Log levels (lower is more severe)
// ---------------------------------------------------------------------------

/// Kernel log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Fatal: unrecoverable error, system will halt.
    Fatal = 0,
    /// Error: something failed but the system may continue.
    Error = 1,
    /// Warning: unexpected condition, not necessarily an error.
    Warn = 2,
    /// Informational: high-level progress messages.
    Info = 3,
    /// Debug: detailed diagnostic information.
    Debug = 4,
    /// Trace: very verbose, low-level tracing.
    Trace = 5,
}

impl LogLevel {
    /// Returns the human-readable name (fixed-width for aligned output).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warn => "WARN ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    /// Returns `true` if records at this level reach the sink.
    #[inline]
    pub const fn enabled(self) -> bool {
        self as u8 <= crate::config::MAX_LOG_LEVEL as u8
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// One log record as handed to the sink.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Severity.
    pub level: LogLevel,
    /// Subsystem that emitted the record.
    pub target: &'static str,
    /// Formatted message.
    pub args: fmt::Arguments<'a>,
}

/// The signature of the global log sink.
pub type LogFn = fn(&Record<'_>);

fn null_log(_record: &Record<'_>) {}

static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());

/// Registers the global log sink.
///
/// # Safety
///
/// The provided function must be safe to call from any context, including
/// with interrupts disabled and while primitive spin locks are held.
pub unsafe fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

#[inline]
fn load_log_fn() -> LogFn {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: Only valid `LogFn` pointers (or the initial `null_log`) are
    // ever stored into LOG_FN.
    unsafe { core::mem::transmute::<*mut (), LogFn>(ptr) }
}

/// Implementation detail for [`klog!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: LogLevel, target: &'static str, args: fmt::Arguments<'_>) {
    if level.enabled() {
        load_log_fn()(&Record {
            level,
            target,
            args,
        });
    }
}

/// Logs a message at the given level for the given target.
#[macro_export]
macro_rules! klog {
    ($level:expr, $target:literal, $($arg:tt)*) => {
        $crate::log::_log($level, $target, format_args!($($arg)*))
    };
}

/// Logs an error-level message.
#[macro_export]
macro_rules! kerror {
    ($target:literal, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Error, $target, $($arg)*)
    };
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! kwarn {
    ($target:literal, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Warn, $target, $($arg)*)
    };
}

/// Logs an info-level message.
#[macro_export]
macro_rules! kinfo {
    ($target:literal, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Info, $target, $($arg)*)
    };
}

/// Logs a debug-level message.
#[macro_export]
macro_rules! kdebug {
    ($target:literal, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Debug, $target, $($arg)*)
    };
}

/// Logs a trace-level message.
#[macro_export]
macro_rules! ktrace {
    ($target:literal, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Trace, $target, $($arg)*)
    };
}
