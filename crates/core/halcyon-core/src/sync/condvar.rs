//! One-shot condition variable with a deadline.
//!
//! A [`CondVar`] is an event that happens once: after [`signal`](CondVar::signal)
//! every current and future [`wait`](CondVar::wait) returns at once. Use a
//! fresh one per wait episode.

use alloc::vec::Vec;

use super::IrqSpinLock;
use crate::error::WaitError;
use crate::id::ThreadId;
use crate::sched::Dispatcher;

struct CondState {
    signalled: bool,
    waiters: Vec<ThreadId>,
}

/// Deadline-bound one-shot event.
pub struct CondVar {
    dispatcher: &'static Dispatcher,
    state: IrqSpinLock<CondState>,
}

impl CondVar {
    /// Creates an unsignalled condition variable.
    pub fn new(dispatcher: &'static Dispatcher) -> Self {
        Self {
            dispatcher,
            state: IrqSpinLock::new(CondState {
                signalled: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Waits until signalled or until `timeout_ns` has elapsed
    /// (`0` waits without a deadline).
    ///
    /// # Errors
    ///
    /// [`WaitError::TimedOut`] if the deadline passed first. The caller is
    /// deregistered and its timed event withdrawn either way.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), WaitError> {
        let me = self.dispatcher.current();
        let mut state = self.state.lock();
        if state.signalled {
            return Ok(());
        }

        let deadline = if timeout_ns == 0 {
            0
        } else {
            self.dispatcher.deadline_after(timeout_ns)
        };
        let mut dispatch = self.dispatcher.lock();
        let event = dispatch.post(me, deadline);
        state.waiters.push(me);

        let result = loop {
            if state.signalled {
                break Ok(());
            }
            if event.has_elapsed(dispatch.now()) {
                break Err(WaitError::TimedOut);
            }
            dispatch.mark_blocked(me);
            drop(dispatch);
            drop(state);
            self.dispatcher.yield_now();
            state = self.state.lock();
            dispatch = self.dispatcher.lock();
        };

        if let Some(idx) = state.waiters.iter().position(|&w| w == me) {
            state.waiters.swap_remove(idx);
        }
        dispatch.cancel(&event);
        result
    }

    /// Fires the event and wakes every waiter. Later calls do nothing.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        if state.signalled {
            return;
        }
        state.signalled = true;
        for waiter in state.waiters.drain(..) {
            self.dispatcher.scheduler().wake(waiter);
        }
    }

    /// Returns `true` once signalled.
    pub fn is_signalled(&self) -> bool {
        self.state.lock().signalled
    }

    /// Contexts currently waiting.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use std::vec::Vec;

    #[test]
    fn wait_after_signal_returns_at_once() {
        let env = host::boot();
        let cv = CondVar::new(env.dispatcher);
        cv.signal();
        cv.signal();
        assert!(cv.is_signalled());
        assert_eq!(cv.wait(0), Ok(()));
        assert_eq!(cv.wait(1), Ok(()));
    }

    #[test]
    fn signal_wakes_every_waiter() {
        let env = host::boot();
        let cv = Arc::new(CondVar::new(env.dispatcher));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let cv2 = Arc::clone(&cv);
            let (id, handle) = env.spawn(move || cv2.wait(0));
            assert!(env.wait_blocked(id));
            handles.push(handle);
        }
        assert_eq!(cv.waiters(), 3);
        cv.signal();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(()));
        }
        assert_eq!(cv.waiters(), 0);
    }

    #[test]
    fn deadline_expires_and_cleans_up() {
        let env = host::boot();
        let _ticker = env.ticker();
        let cv = CondVar::new(env.dispatcher);
        let start = Instant::now();
        assert_eq!(cv.wait(3_000_000), Err(WaitError::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(3));
        assert_eq!(cv.waiters(), 0);
        assert_eq!(env.dispatcher.pending_timers(), 0);
        assert!(!cv.is_signalled());
    }

    #[test]
    fn signal_before_deadline_withdraws_event() {
        let env = host::boot();
        let cv = Arc::new(CondVar::new(env.dispatcher));
        let cv2 = Arc::clone(&cv);
        let (id, handle) = env.spawn(move || cv2.wait(60_000_000_000));
        assert!(env.wait_blocked(id));
        assert_eq!(env.dispatcher.pending_timers(), 1);
        cv.signal();
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(env.dispatcher.pending_timers(), 0);
    }
}
