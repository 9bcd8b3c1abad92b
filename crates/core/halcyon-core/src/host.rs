//! std-backed scheduler for running the primitives on the host.
//!
//! Each OS thread is one execution context. Blocking parks the thread on a
//! per-context condition variable; [`Ticker`] plays the timer interrupt by
//! calling [`Dispatcher::on_tick`] from a background thread.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::id::ThreadId;
use crate::sched::{Dispatcher, Scheduler};
use crate::signal::Signal;

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static CURRENT: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// Identity of the calling OS thread, assigned on first use.
pub fn current_thread() -> ThreadId {
    CURRENT.with(|current| {
        if let Some(id) = current.get() {
            return id;
        }
        let id = ThreadId::new(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
        current.set(Some(id));
        id
    })
}

#[derive(Default)]
struct SlotState {
    blocked: bool,
    /// Wakes delivered while not blocked.
    credits: u32,
    /// Pending signal mask, bit N for signal N.
    signals: u64,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    wakeup: Condvar,
}

/// [`Scheduler`] over std threads.
pub struct HostScheduler {
    epoch: Instant,
    slots: Mutex<BTreeMap<ThreadId, Arc<Slot>>>,
}

impl Default for HostScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostScheduler {
    /// Creates a scheduler whose clock starts now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    fn slot(&self, thread: ThreadId) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(thread).or_default())
    }

    /// Delivers [`Signal::INT`] to `thread`.
    pub fn raise_signal(&self, thread: ThreadId) {
        self.send_signal(thread, Signal::INT);
    }

    /// Returns `true` if `signal` is pending for `thread`.
    pub fn is_pending(&self, thread: ThreadId, signal: Signal) -> bool {
        self.slot(thread)
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .signals
            & signal.mask()
            != 0
    }

    /// Discards pending signals for `thread`.
    pub fn clear_signals(&self, thread: ThreadId) {
        self.slot(thread)
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .signals = 0;
    }

    /// Polls until `thread` is marked blocked or `timeout` passes.
    pub fn wait_blocked(&self, thread: ThreadId, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.is_blocked(thread) {
                return true;
            }
            thread::sleep(Duration::from_micros(200));
        }
        false
    }
}

impl Scheduler for HostScheduler {
    fn current(&self) -> ThreadId {
        current_thread()
    }

    fn mark_blocked(&self, thread: ThreadId) {
        let slot = self.slot(thread);
        let mut state = slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.credits > 0 {
            state.credits -= 1;
        } else {
            state.blocked = true;
        }
    }

    fn wake(&self, thread: ThreadId) -> bool {
        let slot = self.slot(thread);
        let mut state = slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.blocked {
            state.blocked = false;
            slot.wakeup.notify_all();
            true
        } else {
            state.credits = state.credits.saturating_add(1);
            false
        }
    }

    fn is_blocked(&self, thread: ThreadId) -> bool {
        self.slot(thread)
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .blocked
    }

    fn yield_now(&self) {
        let slot = self.slot(current_thread());
        let mut state = slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.blocked {
            drop(state);
            thread::yield_now();
            return;
        }
        while state.blocked {
            state = slot
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn has_pending_signals(&self, thread: ThreadId) -> bool {
        self.slot(thread)
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .signals
            != 0
    }

    fn send_signal(&self, thread: ThreadId, signal: Signal) {
        self.slot(thread)
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .signals |= signal.mask();
        self.wake(thread);
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

// ---------------------------------------------------------------------------
// Test environment
// ---------------------------------------------------------------------------

/// A leaked scheduler and dispatcher pair, as a kernel would hold in statics.
#[derive(Clone, Copy)]
pub struct HostEnv {
    /// The dispatcher every primitive is built on.
    pub dispatcher: &'static Dispatcher,
    /// The scheduler behind it, for signal delivery and inspection.
    pub scheduler: &'static HostScheduler,
}

/// Builds a fresh [`HostEnv`]. Both halves are leaked.
pub fn boot() -> HostEnv {
    let scheduler: &'static HostScheduler = Box::leak(Box::new(HostScheduler::new()));
    let dispatcher: &'static Dispatcher = Box::leak(Box::new(Dispatcher::new(scheduler)));
    HostEnv {
        dispatcher,
        scheduler,
    }
}

impl HostEnv {
    /// Starts a 1 ms tick driver for this environment.
    pub fn ticker(&self) -> Ticker {
        Ticker::start(self.dispatcher, Duration::from_millis(1))
    }

    /// Spawns a context and returns the id it will run under.
    pub fn spawn<F, T>(&self, f: F) -> (ThreadId, JoinHandle<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = ThreadId::new(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
        let handle = thread::spawn(move || {
            CURRENT.with(|current| current.set(Some(id)));
            f()
        });
        (id, handle)
    }

    /// Polls until `thread` is blocked; see [`HostScheduler::wait_blocked`].
    pub fn wait_blocked(&self, thread: ThreadId) -> bool {
        self.scheduler.wait_blocked(thread, Duration::from_secs(5))
    }
}

/// Background timer tick. Stops when dropped.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Calls `dispatcher.on_tick(now)` every `period`.
    pub fn start(dispatcher: &'static Dispatcher, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                dispatcher.on_tick(dispatcher.now());
                thread::sleep(period);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
