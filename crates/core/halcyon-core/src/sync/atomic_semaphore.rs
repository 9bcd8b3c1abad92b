//! Lock-free semaphore for code without scheduler access.
//!
//! The whole semaphore is one `i32`:
//!
//! | value | meaning |
//! |-------|---------|
//! | `n > 0` | `n` units available |
//! | `0` | empty, nobody asleep |
//! | `-1` | empty, a context may be asleep on the word |
//!
//! Only the transitions into and out of `-1` need the kernel, through the
//! [`WordWait`] calls. A waiter that gives up (timeout or signal) leaves the
//! word at `-1`; the next release then issues one unblock nobody needed.

use super::loom_compat::{AtomicI32, Ordering};
use super::semaphore::CountingSemaphore;
use crate::error::WaitError;

/// Value of the word while a context may be sleeping on it.
const CONTENDED: i32 = -1;

/// The "block while equal" / "unblock" system call pair.
pub trait WordWait: Send + Sync {
    /// Sleeps while `word` still holds `expected`.
    ///
    /// Returns `Ok(())` when woken by [`unblock`](Self::unblock) or
    /// immediately if `word` no longer holds `expected`; the caller
    /// re-validates either way. `deadline` is absolute (see
    /// [`now`](Self::now)); `0` means none.
    ///
    /// # Errors
    ///
    /// [`WaitError::TimedOut`] once `deadline` passes, or
    /// [`WaitError::Interrupted`] when `interruptible` and a signal is pending.
    fn block_while_eq(
        &self,
        word: &AtomicI32,
        expected: i32,
        deadline: u64,
        interruptible: bool,
    ) -> Result<(), WaitError>;

    /// Wakes every context sleeping on `word`.
    fn unblock(&self, word: &AtomicI32);

    /// The clock `deadline` is measured against, in nanoseconds.
    fn now(&self) -> u64;
}

/// Semaphore encoded in a single atomic word.
pub struct AtomicSemaphore {
    word: AtomicI32,
    calls: &'static dyn WordWait,
}

impl AtomicSemaphore {
    /// Creates a semaphore holding `count` units.
    ///
    /// # Panics
    ///
    /// Panics if `count` does not fit in an `i32`.
    pub fn new(calls: &'static dyn WordWait, count: u32) -> Self {
        let Ok(count) = i32::try_from(count) else {
            panic!("semaphore count {count} out of range");
        };
        Self {
            word: AtomicI32::new(count),
            calls,
        }
    }

    /// Raw state word, for diagnostics.
    pub fn raw(&self) -> i32 {
        self.word.load(Ordering::Relaxed)
    }

    fn acquire_until(&self, deadline: u64, interruptible: bool) -> Result<(), WaitError> {
        loop {
            let current = self.word.load(Ordering::Acquire);
            if current > 0 {
                if self
                    .word
                    .compare_exchange_weak(current, current - 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }

            // Announce the sleeper before sleeping, so a release that lands
            // in between sees -1 and unblocks.
            if current == 0
                && self
                    .word
                    .compare_exchange(0, CONTENDED, Ordering::Acquire, Ordering::Relaxed)
                    .is_err()
            {
                continue;
            }

            if deadline != 0 && self.calls.now() >= deadline {
                return Err(WaitError::TimedOut);
            }
            self.calls
                .block_while_eq(&self.word, CONTENDED, deadline, interruptible)?;
        }
    }
}

impl CountingSemaphore for AtomicSemaphore {
    fn acquire(&self) {
        // No deadline and not interruptible: cannot fail.
        let _ = self.acquire_until(0, false);
    }

    fn acquire_timed(&self, timeout_ns: u64, interruptible: bool) -> Result<(), WaitError> {
        if self.try_acquire() {
            return Ok(());
        }
        let deadline = self.calls.now().saturating_add(timeout_ns).max(1);
        self.acquire_until(deadline, interruptible)
    }

    fn try_acquire(&self) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        while current > 0 {
            match self.word.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    fn release(&self, n: u32) {
        let n = i32::try_from(n).unwrap_or(i32::MAX);
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            let next = if current == CONTENDED { n } else { current + n };
            match self
                .word
                .compare_exchange_weak(current, next, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == CONTENDED {
            self.calls.unblock(&self.word);
        }
    }

    fn available(&self) -> u32 {
        u32::try_from(self.word.load(Ordering::Relaxed)).unwrap_or(0)
    }
}


#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    /// Never blocks: the models below only use the non-sleeping paths.
    struct NoWait;

    impl WordWait for NoWait {
        fn block_while_eq(&self, _: &AtomicI32, _: i32, _: u64, _: bool) -> Result<(), WaitError> {
            Err(WaitError::WouldBlock)
        }
        fn unblock(&self, _: &AtomicI32) {}
        fn now(&self) -> u64 {
            0
        }
    }

    static NO_WAIT: NoWait = NoWait;

    #[test]
    fn concurrent_try_acquire_never_oversubscribes() {
        loom::model(|| {
            let s = Arc::new(AtomicSemaphore::new(&NO_WAIT, 1));
            let s2 = Arc::clone(&s);
            let t = thread::spawn(move || s2.try_acquire());
            let mine = s.try_acquire();
            let theirs = t.join().unwrap();
            assert!(mine ^ theirs);
            assert_eq!(s.raw(), 0);
        });
    }

    #[test]
    fn release_races_with_try_acquire() {
        loom::model(|| {
            let s = Arc::new(AtomicSemaphore::new(&NO_WAIT, 0));
            let s2 = Arc::clone(&s);
            let t = thread::spawn(move || s2.release(1));
            let got = s.try_acquire();
            t.join().unwrap();
            assert_eq!(s.raw(), if got { 0 } else { 1 });
        });
    }
}
