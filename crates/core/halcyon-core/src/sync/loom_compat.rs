//! Loom compatibility shim.
//!
//! Under `cfg(loom)` the lock-free semaphore is built on loom's atomics so
//! its state machine can be model-checked; otherwise these are the plain
//! `core::sync::atomic` types.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicI32, Ordering};

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicI32, Ordering};
