//! Counting semaphores.
//!
//! [`CountingSemaphore`] is the interface; two algorithms implement it.
//! [`WaitQueueSemaphore`] is the kernel one: a spin-locked count plus a FIFO
//! of waiter records, parking contexts through the [`Dispatcher`].
//! [`AtomicSemaphore`](super::AtomicSemaphore) is the unprivileged one: a
//! single atomic word and a narrow block/unblock call.
//!
//! # Hand-off
//!
//! `release` gives units straight to the oldest waiters that have not been
//! served yet; only the surplus lands in `count`. A context arriving late
//! therefore never overtakes one that is already queued, and a woken waiter
//! never finds its unit gone.
//!
//! # Polling
//!
//! [`WaitQueueSemaphore::poll`] waits on several semaphores at once without
//! consuming anything. A poller sits in a separate list on each semaphore and
//! is woken whenever units land in `count` or the semaphore is terminated.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use bitflags::bitflags;

use super::IrqSpinLock;
use crate::error::WaitError;
use crate::id::ThreadId;
use crate::sched::Dispatcher;

bitflags! {
    /// Modifiers for [`WaitQueueSemaphore::acquire_many`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u32 {
        /// Give up with [`WaitError::Interrupted`] when a signal is pending.
        const INTERRUPTIBLE = 1 << 0;
        /// Give up with [`WaitError::WouldBlock`] instead of sleeping.
        const NONBLOCK = 1 << 1;
    }
}

/// A counting semaphore, whichever algorithm backs it.
pub trait CountingSemaphore {
    /// Blocks until a unit is available, then consumes it.
    fn acquire(&self);

    /// Like [`acquire`](Self::acquire), but gives up once `timeout_ns` has
    /// elapsed, or when `interruptible` and a signal is pending.
    ///
    /// A `timeout_ns` of `0` only takes a unit that is already available.
    ///
    /// # Errors
    ///
    /// [`WaitError::TimedOut`] or [`WaitError::Interrupted`]. On either, the
    /// semaphore is left as if the call had never waited.
    fn acquire_timed(&self, timeout_ns: u64, interruptible: bool) -> Result<(), WaitError>;

    /// Consumes a unit if one is available right now.
    fn try_acquire(&self) -> bool;

    /// Adds `n` units, waking waiters in arrival order.
    fn release(&self, n: u32);

    /// Units available right now.
    fn available(&self) -> u32;
}

struct Waiter {
    ticket: u64,
    thread: ThreadId,
    granted: bool,
}

struct SemState {
    count: u32,
    terminated: bool,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
    pollers: Vec<ThreadId>,
}

impl SemState {
    fn position(&self, ticket: u64) -> Option<usize> {
        self.waiters.iter().position(|w| w.ticket == ticket)
    }

    /// Takes up to `max` units out of `count`.
    fn take(&mut self, max: usize) -> usize {
        let n = self.count.min(u32::try_from(max).unwrap_or(u32::MAX));
        self.count -= n;
        n as usize
    }

    fn is_ready(&self) -> bool {
        self.count > 0 || self.terminated
    }

    fn wake_pollers(&self, dispatcher: &Dispatcher) {
        for &thread in &self.pollers {
            dispatcher.scheduler().wake(thread);
        }
    }
}

/// Kernel semaphore: spin-locked count and FIFO wait queue.
pub struct WaitQueueSemaphore {
    dispatcher: &'static Dispatcher,
    state: IrqSpinLock<SemState>,
}

impl WaitQueueSemaphore {
    /// Creates a semaphore holding `count` units.
    pub fn new(dispatcher: &'static Dispatcher, count: u32) -> Self {
        Self {
            dispatcher,
            state: IrqSpinLock::new(SemState {
                count,
                terminated: false,
                waiters: VecDeque::new(),
                next_ticket: 0,
                pollers: Vec::new(),
            }),
        }
    }

    /// Acquires between 1 and `max` units: everything available up to `max`,
    /// waiting for the first one if necessary.
    ///
    /// `timeout` is relative, in nanoseconds; `None` waits forever.
    ///
    /// Returns the number of units taken. `Ok(0)` means the semaphore has
    /// been [terminated](Self::terminate) and is drained, or `max` was 0.
    ///
    /// # Errors
    ///
    /// - [`WaitError::WouldBlock`] with [`WaitFlags::NONBLOCK`] and nothing
    ///   available.
    /// - [`WaitError::TimedOut`] once `timeout` has elapsed.
    /// - [`WaitError::Interrupted`] with [`WaitFlags::INTERRUPTIBLE`] and a
    ///   signal pending.
    pub fn acquire_many(
        &self,
        max: usize,
        flags: WaitFlags,
        timeout: Option<u64>,
    ) -> Result<usize, WaitError> {
        if max == 0 {
            return Ok(0);
        }

        let mut state = self.state.lock();
        if state.count > 0 {
            return Ok(state.take(max));
        }
        if state.terminated {
            return Ok(0);
        }
        if flags.contains(WaitFlags::NONBLOCK) {
            return Err(WaitError::WouldBlock);
        }

        let me = self.dispatcher.current();
        let deadline = timeout.map_or(0, |t| self.dispatcher.deadline_after(t));
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(Waiter {
            ticket,
            thread: me,
            granted: false,
        });

        let mut dispatch = self.dispatcher.lock();
        let event = dispatch.post(me, deadline);
        let result = loop {
            // Only this context removes its own record.
            let Some(idx) = state.position(ticket) else {
                unreachable!("semaphore waiter record vanished");
            };

            if state.waiters[idx].granted {
                state.waiters.remove(idx);
                break Ok(1 + state.take(max - 1));
            }
            if state.terminated {
                state.waiters.remove(idx);
                break Ok(0);
            }
            if event.has_elapsed(dispatch.now()) {
                state.waiters.remove(idx);
                crate::ktrace!("sem", "thread {} timed out", me);
                break Err(WaitError::TimedOut);
            }
            if flags.contains(WaitFlags::INTERRUPTIBLE) && dispatch.has_pending_signals(me) {
                state.waiters.remove(idx);
                crate::ktrace!("sem", "thread {} interrupted", me);
                break Err(WaitError::Interrupted);
            }

            dispatch.mark_blocked(me);
            drop(dispatch);
            drop(state);
            self.dispatcher.yield_now();
            state = self.state.lock();
            dispatch = self.dispatcher.lock();
        };
        dispatch.cancel(&event);
        result
    }

    /// Marks the semaphore as finished.
    ///
    /// Waiters and future acquirers get `Ok(0)` once the remaining units are
    /// gone; later [`release`](CountingSemaphore::release) calls are ignored.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        debug_assert!(!state.terminated, "semaphore terminated twice");
        state.terminated = true;
        for waiter in state.waiters.iter().filter(|w| !w.granted) {
            self.dispatcher.scheduler().wake(waiter.thread);
        }
        state.wake_pollers(self.dispatcher);
        crate::kdebug!("sem", "terminated with {} waiter(s)", state.waiters.len());
    }

    /// Returns `true` once [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Contexts currently queued.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Contexts currently polling this semaphore.
    pub fn pollers(&self) -> usize {
        self.state.lock().pollers.len()
    }

    /// Waits until at least one of `sems` is ready, without consuming units.
    ///
    /// A semaphore is ready when it holds units or has been terminated.
    /// `ready[i]` is set for each ready `sems[i]`, and the number of ready
    /// semaphores is returned. `Ok(0)` means `timeout` (relative, in
    /// nanoseconds) elapsed first, or [`WaitFlags::NONBLOCK`] was given and
    /// nothing was ready. An empty `sems` returns `Ok(0)` at once.
    ///
    /// All of `sems` must share one [`Dispatcher`]. The semaphore locks are
    /// taken one at a time, never together.
    ///
    /// # Errors
    ///
    /// [`WaitError::Interrupted`] with [`WaitFlags::INTERRUPTIBLE`] and a
    /// signal pending.
    ///
    /// # Panics
    ///
    /// If `ready` is shorter than `sems`.
    pub fn poll(
        sems: &[&WaitQueueSemaphore],
        ready: &mut [bool],
        flags: WaitFlags,
        timeout: Option<u64>,
    ) -> Result<usize, WaitError> {
        assert!(ready.len() >= sems.len(), "poll result slice too short");
        let Some(first) = sems.first() else {
            return Ok(0);
        };
        let dispatcher = first.dispatcher;
        debug_assert!(sems.iter().all(|s| core::ptr::eq(s.dispatcher, dispatcher)));

        let found = Self::scan(sems, ready);
        if found > 0 || flags.contains(WaitFlags::NONBLOCK) {
            return Ok(found);
        }

        let me = dispatcher.current();
        for sem in sems {
            sem.state.lock().pollers.push(me);
        }
        let deadline = timeout.map_or(0, |t| dispatcher.deadline_after(t));
        let event = dispatcher.lock().post(me, deadline);

        // Registered before scanning: a release between the scan and the
        // block leaves a wake credit behind.
        let result = loop {
            let found = Self::scan(sems, ready);
            if found > 0 {
                break Ok(found);
            }
            let dispatch = dispatcher.lock();
            if event.has_elapsed(dispatch.now()) {
                break Ok(0);
            }
            if flags.contains(WaitFlags::INTERRUPTIBLE) && dispatch.has_pending_signals(me) {
                crate::ktrace!("sem", "thread {} interrupted in poll", me);
                break Err(WaitError::Interrupted);
            }
            dispatch.mark_blocked(me);
            drop(dispatch);
            dispatcher.yield_now();
        };

        dispatcher.lock().cancel(&event);
        for sem in sems {
            let mut state = sem.state.lock();
            if let Some(idx) = state.pollers.iter().position(|&t| t == me) {
                state.pollers.swap_remove(idx);
            }
        }
        result
    }

    fn scan(sems: &[&WaitQueueSemaphore], ready: &mut [bool]) -> usize {
        let mut found = 0;
        for (sem, slot) in sems.iter().zip(ready.iter_mut()) {
            *slot = sem.state.lock().is_ready();
            found += usize::from(*slot);
        }
        found
    }
}

impl CountingSemaphore for WaitQueueSemaphore {
    /// On a terminated, drained semaphore this returns without consuming.
    fn acquire(&self) {
        // Cannot fail without a deadline, NONBLOCK or INTERRUPTIBLE.
        let _ = self.acquire_many(1, WaitFlags::empty(), None);
    }

    fn acquire_timed(&self, timeout_ns: u64, interruptible: bool) -> Result<(), WaitError> {
        let flags = if interruptible {
            WaitFlags::INTERRUPTIBLE
        } else {
            WaitFlags::empty()
        };
        self.acquire_many(1, flags, Some(timeout_ns)).map(|_| ())
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    fn release(&self, n: u32) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }

        let mut left = n;
        for waiter in state.waiters.iter_mut().filter(|w| !w.granted) {
            if left == 0 {
                break;
            }
            waiter.granted = true;
            left -= 1;
            self.dispatcher.scheduler().wake(waiter.thread);
        }
        if left > 0 {
            state.count += left;
            state.wake_pollers(self.dispatcher);
        }
    }

    fn available(&self) -> u32 {
        self.state.lock().count
    }
}
