//! Sleeping lock built on a binary [`WaitQueueSemaphore`].
//!
//! For data that is held across long copies, where spinning would waste the
//! CPU. Contenders sleep in FIFO order.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use super::semaphore::{CountingSemaphore, WaitQueueSemaphore};
use crate::sched::Dispatcher;

/// Data guarded by a semaphore initialised to one unit.
pub struct SemLock<T> {
    sem: WaitQueueSemaphore,
    data: UnsafeCell<T>,
}

// SAFETY: The single semaphore unit gives exclusive access to `T`.
unsafe impl<T: Send> Send for SemLock<T> {}
unsafe impl<T: Send> Sync for SemLock<T> {}

impl<T> SemLock<T> {
    /// Creates an unlocked `SemLock`.
    pub fn new(dispatcher: &'static Dispatcher, value: T) -> Self {
        Self {
            sem: WaitQueueSemaphore::new(dispatcher, 1),
            data: UnsafeCell::new(value),
        }
    }

    /// Sleeps until the lock is free, then takes it.
    pub fn lock(&self) -> SemLockGuard<'_, T> {
        self.sem.acquire();
        SemLockGuard { lock: self }
    }

    /// Takes the lock if it is free right now.
    pub fn try_lock(&self) -> Option<SemLockGuard<'_, T>> {
        if self.sem.try_acquire() {
            Some(SemLockGuard { lock: self })
        } else {
            None
        }
    }
}

/// RAII guard that hands the lock on when dropped.
pub struct SemLockGuard<'a, T> {
    lock: &'a SemLock<T>,
}

impl<T> Deref for SemLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard owns the semaphore's only unit.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SemLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard owns the semaphore's only unit.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SemLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.sem.release(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host;
    use std::sync::Arc;
    use std::vec::Vec;

    #[test]
    fn try_lock_fails_while_held() {
        let env = host::boot();
        let lock = SemLock::new(env.dispatcher, 5);
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert_eq!(*lock.try_lock().unwrap(), 5);
    }

    #[test]
    fn contenders_sleep_and_serialize() {
        let env = host::boot();
        let lock = Arc::new(SemLock::new(env.dispatcher, 0u32));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                env.spawn(move || {
                    for _ in 0..250 {
                        *lock.lock() += 1;
                    }
                })
                .1
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 1000);
    }
}
