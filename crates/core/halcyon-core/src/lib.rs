//! Blocking synchronization core for the Halcyon kernel.
//!
//! This crate holds everything a context needs to suspend itself until
//! another context signals it: spin locks, the scheduler boundary and its
//! dispatch lock, the deadline-sorted timer queue, counting semaphores,
//! recursive mutexes, the one-shot condition variable and the wait counter.
//!
//! Nothing here talks to hardware directly. The scheduler is consumed through
//! the [`sched::Scheduler`] trait, so the whole crate runs under `cargo test`
//! on the host using the std-backed scheduler in [`host`].

#![cfg_attr(not(any(test, feature = "host")), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod error;
#[cfg(any(test, feature = "host"))]
pub mod host;
pub mod id;
pub mod log;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod time;
