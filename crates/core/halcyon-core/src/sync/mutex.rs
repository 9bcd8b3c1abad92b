//! Recursive sleeping mutexes.
//!
//! A mutex is owned by one context at a time; the owner may lock it again
//! and must unlock it as many times as it locked it. When the hold count
//! drops to zero, ownership passes directly to the longest-waiting context,
//! which wakes up already owning the lock.
//!
//! Two structures implement [`RecursiveMutex`]:
//!
//! - [`QueueMutex`] keeps waiters in an unbounded queue.
//! - [`RingMutex`](super::RingMutex) keeps them in a fixed array and makes
//!   overflow callers poll; see [`Acquisition::Polling`].
//!
//! The hold count is a `u32`. Locking past `u32::MAX` recursive holds,
//! unlocking a mutex the caller does not own, and unlocking more often than
//! locking are caller errors, caught by debug assertions only.

use alloc::collections::VecDeque;

use super::IrqSpinLock;
use crate::id::ThreadId;
use crate::sched::Dispatcher;

/// How a [`RecursiveMutex::lock`] call obtained ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The mutex was free.
    Uncontended,
    /// The caller already owned it; the hold count went up.
    Recursive,
    /// The caller slept in the wait queue and was handed ownership.
    Queued,
    /// Degraded mode: the wait array was full, so the caller polled instead
    /// of sleeping until it could take the lock or a slot.
    Polling,
}

/// A recursive, FIFO-fair sleeping lock.
pub trait RecursiveMutex {
    /// Takes the lock, sleeping while another context owns it.
    fn lock(&self) -> Acquisition;

    /// Takes the lock if it is free or already owned by the caller.
    fn try_lock(&self) -> bool;

    /// Drops one hold; the last one hands the lock to the next waiter.
    fn unlock(&self);

    /// Current owner.
    fn owner(&self) -> Option<ThreadId>;

    /// Number of outstanding holds by the owner.
    fn hold_count(&self) -> u32;

    /// Returns `true` if some context owns the lock.
    fn is_locked(&self) -> bool {
        self.owner().is_some()
    }
}

// ---------------------------------------------------------------------------
// Ownership bookkeeping shared by both structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(super) struct Ownership {
    pub(super) owner: Option<ThreadId>,
    pub(super) holds: u32,
}

impl Ownership {
    /// Fast path: free or recursive. `None` means the caller has to wait.
    pub(super) fn try_take(&mut self, me: ThreadId) -> Option<Acquisition> {
        match self.owner {
            None => {
                self.owner = Some(me);
                self.holds = 1;
                Some(Acquisition::Uncontended)
            }
            Some(owner) if owner == me => {
                debug_assert!(self.holds < u32::MAX, "mutex hold count overflow");
                self.holds += 1;
                Some(Acquisition::Recursive)
            }
            Some(_) => None,
        }
    }

    /// Drops one hold. Returns `true` when the lock must be passed on.
    pub(super) fn release(&mut self, me: ThreadId) -> bool {
        debug_assert_eq!(self.owner, Some(me), "mutex unlocked by non-owner");
        if self.owner != Some(me) || self.holds == 0 {
            return false;
        }
        self.holds -= 1;
        if self.holds > 0 {
            return false;
        }
        self.owner = None;
        true
    }

    pub(super) fn hand_to(&mut self, next: ThreadId) {
        self.owner = Some(next);
        self.holds = 1;
    }
}

// ---------------------------------------------------------------------------
// QueueMutex
// ---------------------------------------------------------------------------

struct QueueState {
    own: Ownership,
    queue: VecDeque<ThreadId>,
}

/// Recursive mutex with an unbounded FIFO wait queue.
pub struct QueueMutex {
    dispatcher: &'static Dispatcher,
    state: IrqSpinLock<QueueState>,
}

impl QueueMutex {
    /// Creates an unlocked mutex.
    pub fn new(dispatcher: &'static Dispatcher) -> Self {
        Self {
            dispatcher,
            state: IrqSpinLock::new(QueueState {
                own: Ownership::default(),
                queue: VecDeque::new(),
            }),
        }
    }

    /// Contexts waiting for ownership.
    pub fn waiters(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl RecursiveMutex for QueueMutex {
    fn lock(&self) -> Acquisition {
        let me = self.dispatcher.current();
        let mut state = self.state.lock();
        if let Some(how) = state.own.try_take(me) {
            return how;
        }

        state.queue.push_back(me);
        while state.own.owner != Some(me) {
            self.dispatcher.scheduler().mark_blocked(me);
            drop(state);
            self.dispatcher.yield_now();
            state = self.state.lock();
        }
        Acquisition::Queued
    }

    fn try_lock(&self) -> bool {
        let me = self.dispatcher.current();
        self.state.lock().own.try_take(me).is_some()
    }

    fn unlock(&self) {
        let me = self.dispatcher.current();
        let mut state = self.state.lock();
        if !state.own.release(me) {
            return;
        }
        if let Some(next) = state.queue.pop_front() {
            state.own.hand_to(next);
            self.dispatcher.scheduler().wake(next);
        }
    }

    fn owner(&self) -> Option<ThreadId> {
        self.state.lock().own.owner
    }

    fn hold_count(&self) -> u32 {
        self.state.lock().own.holds
    }
}

// ---------------------------------------------------------------------------
// Tests shared by both structures
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(super) mod conformance {
    use super::*;
    use crate::host::HostEnv;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    pub fn recursion_balances<M: RecursiveMutex>(env: HostEnv, m: &M) {
        let me = env.dispatcher.current();
        assert_eq!(m.lock(), Acquisition::Uncontended);
        assert_eq!(m.lock(), Acquisition::Recursive);
        assert_eq!(m.lock(), Acquisition::Recursive);
        assert_eq!(m.hold_count(), 3);

        m.unlock();
        m.unlock();
        assert_eq!(m.owner(), Some(me));
        assert_eq!(m.hold_count(), 1);

        m.unlock();
        assert!(!m.is_locked());
        assert_eq!(m.hold_count(), 0);
    }

    pub fn try_lock_respects_owner<M: RecursiveMutex + Send + Sync + 'static>(
        env: HostEnv,
        m: Arc<M>,
    ) {
        assert!(m.try_lock());
        assert!(m.try_lock());
        let m2 = Arc::clone(&m);
        let (_, handle) = env.spawn(move || m2.try_lock());
        assert!(!handle.join().unwrap());
        m.unlock();
        m.unlock();
        assert!(!m.is_locked());
    }

    pub fn ownership_passes_fifo<M: RecursiveMutex + Send + Sync + 'static>(
        env: HostEnv,
        m: Arc<M>,
    ) {
        let order = Arc::new(Mutex::new(Vec::new()));
        assert_eq!(m.lock(), Acquisition::Uncontended);

        let mut handles = Vec::new();
        for name in ['A', 'B', 'C'] {
            let (m2, order2) = (Arc::clone(&m), Arc::clone(&order));
            let (id, handle) = env.spawn(move || {
                let how = m2.lock();
                order2.lock().unwrap().push(name);
                m2.unlock();
                how
            });
            assert!(env.wait_blocked(id));
            handles.push(handle);
        }

        m.unlock();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Acquisition::Queued);
        }
        assert_eq!(*order.lock().unwrap(), ['A', 'B', 'C']);
        assert!(!m.is_locked());
    }

    pub fn waiter_wakes_as_owner<M: RecursiveMutex + Send + Sync + 'static>(
        env: HostEnv,
        m: Arc<M>,
    ) {
        m.lock();
        let m2 = Arc::clone(&m);
        let (id, handle) = env.spawn(move || {
            m2.lock();
            let held = m2.hold_count();
            m2.unlock();
            held
        });
        assert!(env.wait_blocked(id));
        m.unlock();
        assert_ne!(m.owner(), Some(env.dispatcher.current()));
        assert_eq!(handle.join().unwrap(), 1);
    }
}
