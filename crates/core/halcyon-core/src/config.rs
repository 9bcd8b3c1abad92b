//! Compile-time configuration.
//!
//! Everything here is a constant so the primitives stay allocation-free on
//! their fast paths. The log level is picked up from `HALCYON_LOG_LEVEL` at
//! build time.

use crate::log::LogLevel;

/// Capacity of a pipe's ring buffer, in bytes.
pub const PIPE_BUFFER_SIZE: usize = 1024;

/// Maximum number of timed events fired per dispatch-lock hold in
/// [`Dispatcher::on_tick`](crate::sched::Dispatcher::on_tick).
pub const WAKE_BATCH_SIZE: usize = 32;

/// Default wait-array capacity of a [`RingMutex`](crate::sync::RingMutex).
pub const RING_MUTEX_SLOTS: usize = 8;

/// Most verbose level that reaches the log sink.
pub const MAX_LOG_LEVEL: LogLevel = match option_env!("HALCYON_LOG_LEVEL") {
    Some(level) => match level.as_bytes() {
        b"fatal" => LogLevel::Fatal,
        b"error" => LogLevel::Error,
        b"warn" => LogLevel::Warn,
        b"info" => LogLevel::Info,
        b"trace" => LogLevel::Trace,
        _ => LogLevel::Debug,
    },
    None => LogLevel::Debug,
};
