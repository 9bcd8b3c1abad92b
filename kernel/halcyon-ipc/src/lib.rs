//! Inter-process communication objects for the Halcyon kernel.
//!
//! Everything user space reaches through a file descriptor and that is built
//! out of the blocking primitives in `halcyon-core`:
//!
//! - [`pipe`]: bounded byte pipes made of semaphores.
//! - [`fifo`]: the named-pipe namespace.
//! - [`sync_object`]: kernel mutexes and semaphores exposed as descriptors.
//! - [`file`]: reference-counted open file descriptions and the per-process
//!   descriptor table.
//! - [`syscall`]: the entry points that validate raw arguments and dispatch
//!   to the above.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod fifo;
pub mod file;
pub mod pipe;
pub mod sync_object;
pub mod syscall;

pub use error::IpcError;
