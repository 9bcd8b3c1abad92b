//! Kernel mutexes and semaphores reachable through file descriptors.
//!
//! User space creates one with `sys_sync_create` and drives it with
//! `sys_sync_control`: [`SyncOp::Lock`] locks a mutex or waits on a
//! semaphore, [`SyncOp::Unlock`] unlocks or signals.

use halcyon_core::sched::Dispatcher;
use halcyon_core::sync::{
    CountingSemaphore, QueueMutex, RecursiveMutex, WaitFlags, WaitQueueSemaphore,
};

use crate::error::IpcError;
use crate::file::{FileObject, PollEvents, PollSources};

/// Operation requested through `sys_sync_control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    /// Lock the mutex or take a semaphore unit. Semaphore waits give up
    /// after `timeout` nanoseconds when one is set, and on signals.
    Lock {
        /// Relative timeout; `None` waits forever.
        timeout: Option<u64>,
    },
    /// Unlock the mutex or release a semaphore unit.
    Unlock,
}

/// Kind selector for `sys_sync_create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Recursive mutex.
    Mutex,
    /// Counting semaphore with an initial count.
    Semaphore(u32),
}

/// A synchronization object behind a descriptor.
pub enum SyncObject {
    /// Recursive FIFO mutex. Locking ignores the timeout and signals.
    Mutex {
        /// The lock itself.
        mutex: QueueMutex,
        /// Used to identify the caller on unlock.
        dispatcher: &'static Dispatcher,
    },
    /// Counting semaphore.
    Semaphore(WaitQueueSemaphore),
}

impl SyncObject {
    /// Creates an object of the given kind.
    pub fn new(dispatcher: &'static Dispatcher, kind: SyncKind) -> Self {
        match kind {
            SyncKind::Mutex => Self::Mutex {
                mutex: QueueMutex::new(dispatcher),
                dispatcher,
            },
            SyncKind::Semaphore(count) => {
                Self::Semaphore(WaitQueueSemaphore::new(dispatcher, count))
            }
        }
    }
}

impl FileObject for SyncObject {
    fn control(&self, op: SyncOp) -> Result<(), IpcError> {
        match (self, op) {
            (Self::Mutex { mutex, .. }, SyncOp::Lock { .. }) => {
                mutex.lock();
                Ok(())
            }
            (Self::Mutex { mutex, dispatcher }, SyncOp::Unlock) => {
                // User space can ask for anything; keep the mutex's own
                // non-owner assertion out of reach.
                if mutex.owner() != Some(dispatcher.current()) {
                    return Err(IpcError::InvalidArgument);
                }
                mutex.unlock();
                Ok(())
            }
            (Self::Semaphore(sem), SyncOp::Lock { timeout }) => sem
                .acquire_many(1, WaitFlags::INTERRUPTIBLE, timeout)
                .map(|_| ())
                .map_err(IpcError::from),
            (Self::Semaphore(sem), SyncOp::Unlock) => {
                sem.release(1);
                Ok(())
            }
        }
    }

    fn poll(&self) -> PollEvents {
        let ready = match self {
            Self::Mutex { mutex, .. } => !mutex.is_locked(),
            Self::Semaphore(sem) => sem.available() > 0,
        };
        if ready {
            PollEvents::READABLE
        } else {
            PollEvents::empty()
        }
    }

    /// Only semaphores can be slept on; a mutex is reported but not watched.
    fn poll_sources(&self) -> PollSources<'_> {
        match self {
            Self::Mutex { .. } => PollSources::default(),
            Self::Semaphore(sem) => PollSources {
                readable: Some(sem),
                ..PollSources::default()
            },
        }
    }
}
