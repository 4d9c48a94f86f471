//! Kernel time: ticks and deadlines.
//!
//! The kernel has no wall clock. Time is a monotonic tick counter advanced
//! by the host; everything deadline-shaped is expressed in absolute ticks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An absolute point on the kernel's monotonic tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticks(pub u64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    /// The tick `n` ticks after `self`, saturating.
    pub fn plus(&self, n: u64) -> Ticks {
        Ticks(self.0.saturating_add(n))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A deadline for a blocking operation.
///
/// `NEVER` means "block indefinitely"; any other value is an absolute tick
/// at which the operation times out if still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deadline(u64);

impl Deadline {
    /// Block indefinitely.
    pub const NEVER: Deadline = Deadline(u64::MAX);

    /// A deadline at an absolute tick.
    pub fn at(tick: Ticks) -> Self {
        Deadline(tick.0)
    }

    /// A deadline `n` ticks after `now`.
    pub fn after(now: Ticks, n: u64) -> Self {
        Deadline(now.0.saturating_add(n))
    }

    /// Decodes a deadline from a raw syscall argument word.
    pub fn from_word(word: u64) -> Self {
        Deadline(word)
    }

    /// The raw word for the syscall ABI.
    pub fn to_word(self) -> u64 {
        self.0
    }

    /// True if the deadline has passed at `now`. `NEVER` never expires.
    pub fn is_expired(&self, now: Ticks) -> bool {
        self.0 != u64::MAX && now.0 >= self.0
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Deadline::NEVER {
            write!(f, "deadline:never")
        } else {
            write!(f, "deadline:t{}", self.0)
        }
    }
}
