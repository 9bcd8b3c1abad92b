//! Signal numbers passed across the scheduler boundary.
//!
//! Delivery and dispositions belong to the process layer. Primitives only
//! raise signals through [`Scheduler::send_signal`](crate::sched::Scheduler::send_signal)
//! and observe them through
//! [`Scheduler::has_pending_signals`](crate::sched::Scheduler::has_pending_signals).

/// Highest signal number that fits in a pending bitmask.
pub const MAX_SIGNAL: usize = 63;

/// A Unix-style signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Signal(pub usize);

impl Signal {
    /// Interrupt from the terminal.
    pub const INT: Self = Self(2);
    /// Write to a pipe with no readers.
    pub const PIPE: Self = Self(13);
    /// Termination request.
    pub const TERM: Self = Self(15);

    /// Returns `true` if `signum` is in `1..=MAX_SIGNAL`.
    pub const fn is_valid(signum: usize) -> bool {
        signum >= 1 && signum <= MAX_SIGNAL
    }

    /// This signal's bit in a pending mask, or `0` if it is out of range.
    pub const fn mask(self) -> u64 {
        if Self::is_valid(self.0) {
            1 << self.0
        } else {
            0
        }
    }
}

impl core::fmt::Display for Signal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "signal {}", self.0)
    }
}
