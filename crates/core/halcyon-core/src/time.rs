//! Deadline-sorted timer queue.
//!
//! Blocking primitives with a deadline post a [`TimedEvent`] here before they
//! sleep. The timer tick pops every entry whose deadline has passed and wakes
//! its owner through [`Dispatcher::on_tick`](crate::sched::Dispatcher::on_tick).
//!
//! The queue stores its own `(deadline, id, owner)` entries and hands the
//! caller an opaque [`TimedEvent`] handle; firing removes the queue entry but
//! never touches the handle. The owner always calls
//! [`cancel`](TimerQueue::cancel) on its way out, fired or not.
//!
//! Deadlines are absolute nanoseconds on the scheduler's monotonic clock.
//! A deadline of `0` means "no deadline": the event is never queued.

use alloc::collections::VecDeque;

use crate::id::ThreadId;

/// Handle to a posted deadline.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a posted event must be cancelled by its owner"]
pub struct TimedEvent {
    id: u64,
    owner: ThreadId,
    deadline: u64,
}

impl TimedEvent {
    /// Absolute deadline in nanoseconds, `0` if none.
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    /// Context woken when the deadline passes.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Returns `true` if the deadline has passed at `now`.
    pub fn has_elapsed(&self, now: u64) -> bool {
        self.deadline != 0 && now >= self.deadline
    }
}

#[derive(Debug)]
struct Entry {
    deadline: u64,
    id: u64,
    owner: ThreadId,
}

/// Pending deadlines in ascending order. Equal deadlines keep posting order.
pub struct TimerQueue {
    entries: VecDeque<Entry>,
    next_id: u64,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Queues a wake-up of `owner` at `deadline`.
    ///
    /// A `deadline` of `0` returns an inert handle that never fires.
    pub fn post(&mut self, owner: ThreadId, deadline: u64) -> TimedEvent {
        let id = self.next_id;
        self.next_id += 1;

        if deadline != 0 {
            let pos = self.entries.partition_point(|e| e.deadline <= deadline);
            self.entries.insert(
                pos,
                Entry {
                    deadline,
                    id,
                    owner,
                },
            );
        }

        TimedEvent {
            id,
            owner,
            deadline,
        }
    }

    /// Withdraws `event` if it is still queued.
    ///
    /// Returns `true` if it was removed, `false` if it had already fired,
    /// had already been cancelled, or never had a deadline.
    pub fn cancel(&mut self, event: &TimedEvent) -> bool {
        if event.deadline == 0 {
            return false;
        }
        let start = self.entries.partition_point(|e| e.deadline < event.deadline);
        let found = self
            .entries
            .range(start..)
            .take_while(|e| e.deadline == event.deadline)
            .position(|e| e.id == event.id);
        match found {
            Some(offset) => {
                self.entries.remove(start + offset);
                true
            }
            None => false,
        }
    }

    /// Removes the earliest entry if its deadline has passed at `now`,
    /// returning its owner.
    pub fn pop_expired(&mut self, now: u64) -> Option<ThreadId> {
        match self.entries.front() {
            Some(entry) if entry.deadline <= now => self.entries.pop_front().map(|e| e.owner),
            _ => None,
        }
    }

    /// Earliest queued deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.front().map(|e| e.deadline)
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
