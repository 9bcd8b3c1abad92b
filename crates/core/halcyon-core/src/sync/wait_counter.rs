//! Single-server wait counter.
//!
//! The lightest rendezvous in the kernel: an interrupt handler (or any other
//! producer) calls [`up`](WaitCounter::up) for each event, and one server
//! thread consumes them with [`down`](WaitCounter::down). Only one context may
//! sit in `down` at a time; a second one is reported, not queued.

use super::IrqSpinLock;
use crate::id::ThreadId;
use crate::sched::Dispatcher;

struct CounterState {
    count: u64,
    server: Option<ThreadId>,
}

/// Event counter with at most one sleeping consumer.
pub struct WaitCounter {
    dispatcher: &'static Dispatcher,
    state: IrqSpinLock<CounterState>,
}

impl WaitCounter {
    /// Creates a counter at zero with no server.
    pub fn new(dispatcher: &'static Dispatcher) -> Self {
        Self {
            dispatcher,
            state: IrqSpinLock::new(CounterState {
                count: 0,
                server: None,
            }),
        }
    }

    /// Records one event and wakes the server, if any. Safe from interrupt
    /// context.
    pub fn up(&self) {
        let mut state = self.state.lock();
        state.count += 1;
        if let Some(server) = state.server {
            self.dispatcher.scheduler().wake(server);
        }
    }

    /// Sleeps until an event is pending, then consumes it.
    pub fn down(&self) {
        let me = self.dispatcher.current();
        let mut state = self.state.lock();
        match state.server {
            Some(server) if server != me => {
                crate::kwarn!(
                    "waitcounter",
                    "thread {} entered down() while {} is serving",
                    me,
                    server
                );
                debug_assert!(false, "concurrent WaitCounter::down");
            }
            _ => {}
        }

        state.server = Some(me);
        while state.count == 0 {
            self.dispatcher.scheduler().mark_blocked(me);
            drop(state);
            self.dispatcher.yield_now();
            state = self.state.lock();
        }
        state.count -= 1;
        state.server = None;
    }

    /// Consumes a pending event without sleeping.
    pub fn try_down(&self) -> bool {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Events not yet consumed.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host;
    use std::sync::Arc;

    #[test]
    fn pending_events_are_consumed_without_sleeping() {
        let env = host::boot();
        let wc = WaitCounter::new(env.dispatcher);
        wc.up();
        wc.up();
        wc.down();
        assert_eq!(wc.count(), 1);
        assert!(wc.try_down());
        assert!(!wc.try_down());
    }

    #[test]
    fn up_wakes_sleeping_server() {
        let env = host::boot();
        let wc = Arc::new(WaitCounter::new(env.dispatcher));
        let wc2 = Arc::clone(&wc);
        let (id, handle) = env.spawn(move || {
            for _ in 0..3 {
                wc2.down();
            }
        });
        for _ in 0..3 {
            assert!(env.wait_blocked(id));
            wc.up();
        }
        handle.join().unwrap();
        assert_eq!(wc.count(), 0);
    }

    #[test]
    fn burst_of_ups_is_not_lost() {
        let env = host::boot();
        let wc = Arc::new(WaitCounter::new(env.dispatcher));
        let wc2 = Arc::clone(&wc);
        let (_, handle) = env.spawn(move || {
            for _ in 0..100 {
                wc2.down();
            }
        });
        for _ in 0..100 {
            wc.up();
        }
        handle.join().unwrap();
        assert_eq!(wc.count(), 0);
    }
}
