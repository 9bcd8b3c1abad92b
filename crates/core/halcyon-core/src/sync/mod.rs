//! Synchronization primitives.
//!
//! - **Spin locks**: [`SpinLock`] and [`IrqSpinLock`], for short critical
//!   sections that never sleep.
//! - **Sleeping primitives**: [`WaitQueueSemaphore`], [`AtomicSemaphore`],
//!   [`QueueMutex`], [`RingMutex`], [`CondVar`], [`WaitCounter`] and
//!   [`SemLock`], which park the caller through the
//!   [`Dispatcher`](crate::sched::Dispatcher). Their internal state sits
//!   behind [`IrqSpinLock`], since the timer tick and interrupt handlers
//!   release and wake through the same paths.
//! - **Word wait**: [`WordWaitTable`], the in-kernel side of the calls the
//!   lock-free semaphore sleeps on.
//!
//! [`Semaphore`] names the semaphore for the current build: the wait-queue
//! one by default, the lock-free one with the `userspace` feature.

mod atomic_semaphore;
mod condvar;
mod irq_spinlock;
mod loom_compat;
mod mutex;
mod ring_mutex;
mod sem_lock;
mod semaphore;
mod spinlock;
mod wait_counter;
mod word_wait;

pub use atomic_semaphore::{AtomicSemaphore, WordWait};
pub use condvar::CondVar;
pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use mutex::{Acquisition, QueueMutex, RecursiveMutex};
pub use ring_mutex::RingMutex;
pub use sem_lock::{SemLock, SemLockGuard};
pub use semaphore::{CountingSemaphore, WaitFlags, WaitQueueSemaphore};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use wait_counter::WaitCounter;
pub use word_wait::WordWaitTable;

/// The semaphore for this build.
#[cfg(not(feature = "userspace"))]
pub type Semaphore = WaitQueueSemaphore;

/// The semaphore for this build.
#[cfg(feature = "userspace")]
pub type Semaphore = AtomicSemaphore;
