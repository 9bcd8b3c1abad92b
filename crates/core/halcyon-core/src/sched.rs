//! Scheduler boundary and the dispatch lock.
//!
//! The scheduler itself lives outside this crate. Primitives only need it to
//! name the running context, park it, wake it and tell the time; that is the
//! [`Scheduler`] trait.
//!
//! [`Dispatcher`] pairs the scheduler with the global dispatch lock and the
//! [`TimerQueue`] it protects. There is one per kernel, constructed
//! explicitly at startup and passed by reference to every primitive.
//!
//! # Blocking protocol
//!
//! Every suspension point in the crate follows the same shape:
//!
//! 1. take the primitive's own lock, then the dispatch lock if the wait has
//!    a deadline or can be interrupted;
//! 2. re-check the wake condition (and the deadline or pending signals);
//! 3. [`mark_blocked`](Scheduler::mark_blocked) the current context;
//! 4. drop the locks and [`yield_now`](Scheduler::yield_now);
//! 5. go back to 1.
//!
//! A [`wake`](Scheduler::wake) that lands between steps 2 and 4 is not lost:
//! the scheduler remembers it and the next `mark_blocked` is cancelled.

use crate::config::WAKE_BATCH_SIZE;
use crate::id::ThreadId;
use crate::signal::Signal;
use crate::sync::{IrqSpinLock, IrqSpinLockGuard};
use crate::time::{TimedEvent, TimerQueue};

use planck_noalloc::vec::ArrayVec;

/// Run/block/wake operations consumed from the thread scheduler.
pub trait Scheduler: Send + Sync {
    /// The context making the call.
    fn current(&self) -> ThreadId;

    /// Marks `thread` blocked. It keeps running until it yields.
    ///
    /// If a wake for `thread` is pending, consumes it instead and leaves the
    /// context runnable.
    fn mark_blocked(&self, thread: ThreadId);

    /// Makes `thread` runnable again.
    ///
    /// Returns `true` if it was blocked. A wake for a context that is not
    /// blocked is remembered and cancels its next `mark_blocked`.
    fn wake(&self, thread: ThreadId) -> bool;

    /// Returns `true` if `thread` is marked blocked.
    fn is_blocked(&self, thread: ThreadId) -> bool;

    /// Gives up the CPU. Does not return while the caller is marked blocked.
    fn yield_now(&self);

    /// Returns `true` if an asynchronous signal is pending for `thread`.
    fn has_pending_signals(&self, thread: ThreadId) -> bool;

    /// Marks `signal` pending for `thread` and wakes it, so an interruptible
    /// wait it is sleeping in gives up.
    fn send_signal(&self, thread: ThreadId, signal: Signal);

    /// Monotonic clock in nanoseconds.
    fn now(&self) -> u64;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// The scheduler together with the dispatch lock and the timer queue.
pub struct Dispatcher {
    scheduler: &'static dyn Scheduler,
    timers: IrqSpinLock<TimerQueue>,
}

impl Dispatcher {
    /// Creates the dispatcher for `scheduler`.
    pub const fn new(scheduler: &'static dyn Scheduler) -> Self {
        Self {
            scheduler,
            timers: IrqSpinLock::new(TimerQueue::new()),
        }
    }

    /// The underlying scheduler.
    pub fn scheduler(&self) -> &'static dyn Scheduler {
        self.scheduler
    }

    /// The calling context.
    #[inline]
    pub fn current(&self) -> ThreadId {
        self.scheduler.current()
    }

    /// Monotonic clock in nanoseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Absolute deadline `timeout_ns` from now.
    ///
    /// Never returns `0`, which the timer queue reads as "no deadline".
    pub fn deadline_after(&self, timeout_ns: u64) -> u64 {
        self.now().saturating_add(timeout_ns).max(1)
    }

    /// Takes the dispatch lock (`lock_scheduler`). Dropping the guard
    /// releases it (`unlock_scheduler`).
    pub fn lock(&self) -> DispatchGuard<'_> {
        DispatchGuard {
            dispatcher: self,
            timers: self.timers.lock(),
        }
    }

    /// Gives up the CPU; see [`Scheduler::yield_now`].
    #[inline]
    pub fn yield_now(&self) {
        self.scheduler.yield_now();
    }

    /// Timer tick: fires every event whose deadline has passed at `now`.
    ///
    /// Expired entries are drained in batches of [`WAKE_BATCH_SIZE`]. Each
    /// batch is woken before the dispatch lock is released, so once a
    /// [`cancel`](DispatchGuard::cancel) returns no wake for that event is
    /// still in flight. Returns the number fired.
    pub fn on_tick(&self, now: u64) -> usize {
        let mut fired = 0;
        loop {
            let mut batch = ArrayVec::<ThreadId, WAKE_BATCH_SIZE>::new();
            let mut timers = self.timers.lock();
            while batch.len() < WAKE_BATCH_SIZE {
                match timers.pop_expired(now) {
                    Some(owner) => batch.push(owner),
                    None => break,
                }
            }

            let drained = batch.len();
            while let Some(owner) = batch.pop() {
                self.scheduler.wake(owner);
            }
            drop(timers);
            fired += drained;

            if drained < WAKE_BATCH_SIZE {
                return fired;
            }
        }
    }

    /// Blocks the caller until the clock reaches `deadline`.
    pub fn sleep_until(&self, deadline: u64) {
        if deadline == 0 {
            return;
        }
        let me = self.current();
        let mut dispatch = self.lock();
        let event = dispatch.post(me, deadline);
        while !event.has_elapsed(self.now()) {
            dispatch.mark_blocked(me);
            drop(dispatch);
            self.yield_now();
            dispatch = self.lock();
        }
        dispatch.cancel(&event);
    }

    /// Blocks the caller for at least `nanos`.
    pub fn sleep(&self, nanos: u64) {
        self.sleep_until(self.deadline_after(nanos));
    }

    /// Number of events waiting in the timer queue.
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }
}

/// Held dispatch lock. Timed events can only be posted through it.
pub struct DispatchGuard<'a> {
    dispatcher: &'a Dispatcher,
    timers: IrqSpinLockGuard<'a, TimerQueue>,
}

impl DispatchGuard<'_> {
    /// Queues a wake-up of `owner` at `deadline` (`0` = never).
    pub fn post(&mut self, owner: ThreadId, deadline: u64) -> TimedEvent {
        self.timers.post(owner, deadline)
    }

    /// Withdraws `event`; a no-op if it already fired or was cancelled.
    pub fn cancel(&mut self, event: &TimedEvent) -> bool {
        self.timers.cancel(event)
    }

    /// Marks `thread` blocked while the dispatch lock is held.
    pub fn mark_blocked(&self, thread: ThreadId) {
        self.dispatcher.scheduler.mark_blocked(thread);
    }

    /// Returns `true` if a signal is pending for `thread`.
    pub fn has_pending_signals(&self, thread: ThreadId) -> bool {
        self.dispatcher.scheduler.has_pending_signals(thread)
    }

    /// Monotonic clock in nanoseconds.
    pub fn now(&self) -> u64 {
        self.dispatcher.now()
    }
}
