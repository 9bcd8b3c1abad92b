//! Outcomes of a bounded or non-blocking wait.

use core::fmt;

/// Why a wait returned without acquiring anything.
///
/// None of these are failures of the primitive: the caller asked for a
/// bounded wait and has to branch on the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed first.
    TimedOut,
    /// A signal is pending for the waiting context.
    Interrupted,
    /// Nothing was available and the caller asked not to block.
    WouldBlock,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => f.write_str("wait timed out"),
            Self::Interrupted => f.write_str("wait interrupted by a signal"),
            Self::WouldBlock => f.write_str("wait would block"),
        }
    }
}

impl core::error::Error for WaitError {}
