//! Kernel side of the block/unblock calls behind
//! [`AtomicSemaphore`](super::AtomicSemaphore).
//!
//! Sleepers are keyed by the address of the word they sleep on. The value
//! check and the enqueue happen under the table lock, and `unblock` takes the
//! same lock, so a release that changes the word after the check still finds
//! the sleeper queued.

use alloc::vec::Vec;

use super::IrqSpinLock;
use super::atomic_semaphore::WordWait;
use super::loom_compat::{AtomicI32, Ordering};
use crate::error::WaitError;
use crate::id::ThreadId;
use crate::sched::Dispatcher;

struct Sleeper {
    ticket: u64,
    addr: usize,
    thread: ThreadId,
    woken: bool,
}

#[derive(Default)]
struct Table {
    sleepers: Vec<Sleeper>,
    next_ticket: u64,
}

/// Address-keyed sleep table.
pub struct WordWaitTable {
    dispatcher: &'static Dispatcher,
    table: IrqSpinLock<Table>,
}

impl WordWaitTable {
    /// Creates an empty table parking contexts through `dispatcher`.
    pub fn new(dispatcher: &'static Dispatcher) -> Self {
        Self {
            dispatcher,
            table: IrqSpinLock::new(Table::default()),
        }
    }

    /// Contexts currently asleep on any word.
    pub fn sleepers(&self) -> usize {
        self.table.lock().sleepers.len()
    }
}

fn addr_of(word: &AtomicI32) -> usize {
    core::ptr::from_ref(word) as usize
}

impl WordWait for WordWaitTable {
    fn block_while_eq(
        &self,
        word: &AtomicI32,
        expected: i32,
        deadline: u64,
        interruptible: bool,
    ) -> Result<(), WaitError> {
        let mut table = self.table.lock();
        if word.load(Ordering::Acquire) != expected {
            return Ok(());
        }

        let me = self.dispatcher.current();
        let ticket = table.next_ticket;
        table.next_ticket += 1;
        table.sleepers.push(Sleeper {
            ticket,
            addr: addr_of(word),
            thread: me,
            woken: false,
        });

        let mut dispatch = self.dispatcher.lock();
        let event = dispatch.post(me, deadline);
        let result = loop {
            let Some(idx) = table.sleepers.iter().position(|s| s.ticket == ticket) else {
                unreachable!("word-wait sleeper vanished");
            };

            let outcome = if table.sleepers[idx].woken {
                Some(Ok(()))
            } else if event.has_elapsed(dispatch.now()) {
                Some(Err(WaitError::TimedOut))
            } else if interruptible && dispatch.has_pending_signals(me) {
                Some(Err(WaitError::Interrupted))
            } else {
                None
            };
            if let Some(outcome) = outcome {
                table.sleepers.swap_remove(idx);
                break outcome;
            }

            dispatch.mark_blocked(me);
            drop(dispatch);
            drop(table);
            self.dispatcher.yield_now();
            table = self.table.lock();
            dispatch = self.dispatcher.lock();
        };
        dispatch.cancel(&event);
        result
    }

    fn unblock(&self, word: &AtomicI32) {
        let addr = addr_of(word);
        let mut table = self.table.lock();
        for sleeper in table
            .sleepers
            .iter_mut()
            .filter(|s| s.addr == addr && !s.woken)
        {
            sleeper.woken = true;
            self.dispatcher.scheduler().wake(sleeper.thread);
        }
    }

    fn now(&self) -> u64 {
        self.dispatcher.now()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::host;
    use std::sync::Arc;

    fn table() -> (host::HostEnv, Arc<WordWaitTable>) {
        let env = host::boot();
        (env, Arc::new(WordWaitTable::new(env.dispatcher)))
    }

    #[test]
    fn mismatch_returns_immediately() {
        let (_env, t) = table();
        let word = AtomicI32::new(3);
        assert_eq!(t.block_while_eq(&word, -1, 0, false), Ok(()));
        assert_eq!(t.sleepers(), 0);
    }

    #[test]
    fn unblock_only_wakes_matching_word() {
        let (env, t) = table();
        let words: &'static [AtomicI32; 2] = Box::leak(Box::new([AtomicI32::new(-1), AtomicI32::new(-1)]));
        let t2 = Arc::clone(&t);
        let (id, handle) = env.spawn(move || t2.block_while_eq(&words[0], -1, 0, false));
        assert!(env.wait_blocked(id));

        t.unblock(&words[1]);
        assert_eq!(t.sleepers(), 1);

        t.unblock(&words[0]);
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(t.sleepers(), 0);
    }

    #[test]
    fn deadline_in_the_past_times_out() {
        let (env, t) = table();
        let word = AtomicI32::new(-1);
        let deadline = env.dispatcher.deadline_after(0);
        assert_eq!(t.block_while_eq(&word, -1, deadline, false), Err(WaitError::TimedOut));
        assert_eq!(t.sleepers(), 0);
        assert_eq!(env.dispatcher.pending_timers(), 0);
    }
}
