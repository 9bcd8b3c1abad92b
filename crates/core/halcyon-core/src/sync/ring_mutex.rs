//! Recursive mutex with a fixed-capacity wait array.
//!
//! Waiters occupy slots of a circular array indexed by two sequence
//! counters: a waiter enters at `enter % N`, the next owner leaves from
//! `exit % N`, and `enter - exit` is the queue length. The footprint is fixed
//! at `N` slots. When all of them are taken, further callers do not sleep:
//! they yield and retry until the lock is free or a slot opens up, and report
//! [`Acquisition::Polling`].

use super::IrqSpinLock;
use super::mutex::{Acquisition, Ownership, RecursiveMutex};
use crate::config::RING_MUTEX_SLOTS;
use crate::id::ThreadId;
use crate::sched::Dispatcher;

struct RingState<const N: usize> {
    own: Ownership,
    slots: [Option<ThreadId>; N],
    enter: u64,
    exit: u64,
    /// Callers currently in the polling fallback.
    pollers: usize,
}

impl<const N: usize> RingState<N> {
    fn queued(&self) -> usize {
        // Never exceeds N.
        (self.enter - self.exit) as usize
    }

    fn slot(seq: u64) -> usize {
        (seq % N as u64) as usize
    }
}

/// Recursive FIFO mutex whose wait queue holds at most `N` contexts.
pub struct RingMutex<const N: usize = RING_MUTEX_SLOTS> {
    dispatcher: &'static Dispatcher,
    state: IrqSpinLock<RingState<N>>,
}

impl<const N: usize> RingMutex<N> {
    /// Creates an unlocked mutex.
    pub fn new(dispatcher: &'static Dispatcher) -> Self {
        const { assert!(N > 0, "RingMutex needs at least one slot") };
        Self {
            dispatcher,
            state: IrqSpinLock::new(RingState {
                own: Ownership::default(),
                slots: [None; N],
                enter: 0,
                exit: 0,
                pollers: 0,
            }),
        }
    }

    /// Contexts sleeping in the wait array.
    pub fn waiters(&self) -> usize {
        self.state.lock().queued()
    }

    /// Contexts polling because the wait array is full.
    pub fn pollers(&self) -> usize {
        self.state.lock().pollers
    }
}

impl<const N: usize> RecursiveMutex for RingMutex<N> {
    fn lock(&self) -> Acquisition {
        let me = self.dispatcher.current();
        let mut polling = false;

        let mut state = loop {
            let mut state = self.state.lock();
            if let Some(how) = state.own.try_take(me) {
                if polling {
                    state.pollers -= 1;
                    return Acquisition::Polling;
                }
                return how;
            }

            if state.queued() < N {
                let idx = RingState::<N>::slot(state.enter);
                state.slots[idx] = Some(me);
                state.enter += 1;
                if polling {
                    state.pollers -= 1;
                }
                break state;
            }

            if !polling {
                polling = true;
                state.pollers += 1;
                crate::kwarn!("mutex", "wait array full ({} slots), thread {} polling", N, me);
            }
            drop(state);
            self.dispatcher.yield_now();
        };

        while state.own.owner != Some(me) {
            self.dispatcher.scheduler().mark_blocked(me);
            drop(state);
            self.dispatcher.yield_now();
            state = self.state.lock();
        }
        if polling {
            Acquisition::Polling
        } else {
            Acquisition::Queued
        }
    }

    fn try_lock(&self) -> bool {
        let me = self.dispatcher.current();
        self.state.lock().own.try_take(me).is_some()
    }

    fn unlock(&self) {
        let me = self.dispatcher.current();
        let mut state = self.state.lock();
        if !state.own.release(me) || state.queued() == 0 {
            return;
        }

        let idx = RingState::<N>::slot(state.exit);
        state.exit += 1;
        if let Some(next) = state.slots[idx].take() {
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

#[cfg(test)]
mod tests {
    use super::super::mutex::conformance;
    use super::*;
    use crate::host;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn recursion_balances() {
        let env = host::boot();
        conformance::recursion_balances(env, &RingMutex::<4>::new(env.dispatcher));
    }

    #[test]
    fn try_lock_respects_owner() {
        let env = host::boot();
        conformance::try_lock_respects_owner(env, Arc::new(RingMutex::<4>::new(env.dispatcher)));
    }

    #[test]
    fn ownership_passes_fifo() {
        let env = host::boot();
        conformance::ownership_passes_fifo(env, Arc::new(RingMutex::<3>::new(env.dispatcher)));
    }

    #[test]
    fn waiter_wakes_as_owner() {
        let env = host::boot();
        conformance::waiter_wakes_as_owner(env, Arc::<RingMutex>::new(RingMutex::new(env.dispatcher)));
    }

    #[test]
    fn full_array_falls_back_to_polling() {
        let env = host::boot();
        let m = Arc::new(RingMutex::<1>::new(env.dispatcher));
        m.lock();

        let m2 = Arc::clone(&m);
        let (a, queued) = env.spawn(move || {
            let how = m2.lock();
            m2.unlock();
            how
        });
        assert!(env.wait_blocked(a));
        assert_eq!(m.waiters(), 1);

        let m3 = Arc::clone(&m);
        let (_, polled) = env.spawn(move || {
            let how = m3.lock();
            m3.unlock();
            how
        });
        while m.pollers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        m.unlock();
        assert_eq!(queued.join().unwrap(), Acquisition::Queued);
        assert_eq!(polled.join().unwrap(), Acquisition::Polling);
        assert_eq!(m.pollers(), 0);
        assert!(!m.is_locked());
    }

    #[test]
    fn sequence_counters_wrap_the_array() {
        let env = host::boot();
        let m = Arc::new(RingMutex::<2>::new(env.dispatcher));
        for _ in 0..5 {
            m.lock();
            let m2 = Arc::clone(&m);
            let (id, handle) = env.spawn(move || {
                m2.lock();
                m2.unlock();
            });
            assert!(env.wait_blocked(id));
            m.unlock();
            handle.join().unwrap();
        }
        assert_eq!(m.waiters(), 0);
    }
}
