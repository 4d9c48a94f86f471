//! Object signal masks.
//!
//! Every kernel object carries a word of signal bits plus a value word. The
//! kernel raises and clears bits as the object's state changes; the wait
//! engine intersects a caller's interest mask with the object's current
//! signals to decide readiness.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A word-sized mask of object signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signals(u32);

impl Signals {
    pub const NONE: Signals = Signals(0);

    /// The object has data ready to read (channel non-empty).
    pub const READABLE: Signals = Signals(1 << 0);
    /// The object can accept more data (channel not full).
    pub const WRITABLE: Signals = Signals(1 << 1);
    /// The peer end was torn down.
    pub const PEER_CLOSED: Signals = Signals(1 << 2);
    /// A listener has at least one pending incoming connection.
    pub const ACCEPTABLE: Signals = Signals(1 << 3);
    /// A connection handshake completed on this object.
    pub const CONNECTED: Signals = Signals(1 << 4);
    /// The task has terminated and its exit value is available.
    pub const EXITED: Signals = Signals(1 << 5);
    /// The interrupt line bound to this object is asserted.
    pub const IRQ_PENDING: Signals = Signals(1 << 6);

    /// First of eight user-defined signal bits.
    pub const USER0: Signals = Signals(1 << 24);

    /// Builds a mask from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Signals(bits)
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns the n-th user signal bit (n < 8).
    pub fn user(n: u32) -> Self {
        debug_assert!(n < 8);
        Signals(Self::USER0.0 << n)
    }

    /// Returns true if no bits are set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    pub fn contains(&self, other: Signals) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns true if any bit of `other` is set in `self`.
    pub fn intersects(&self, other: Signals) -> bool {
        (self.0 & other.0) != 0
    }

    /// Bits present in both masks.
    pub fn intersection(&self, other: Signals) -> Signals {
        Signals(self.0 & other.0)
    }

    /// Union of two masks.
    pub fn union(&self, other: Signals) -> Signals {
        Signals(self.0 | other.0)
    }

    /// Bits of `self` not present in `other`.
    pub fn difference(&self, other: Signals) -> Signals {
        Signals(self.0 & !other.0)
    }
}

impl fmt::Display for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signals:{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_set_operations() {
        let mask = Signals::READABLE.union(Signals::PEER_CLOSED);
        assert!(mask.contains(Signals::READABLE));
        assert!(mask.intersects(Signals::PEER_CLOSED));
        assert!(!mask.intersects(Signals::WRITABLE));
        assert_eq!(
            mask.intersection(Signals::READABLE.union(Signals::WRITABLE)),
            Signals::READABLE
        );
    }

    #[test]
    fn test_signal_difference() {
        let mask = Signals::READABLE.union(Signals::WRITABLE);
        assert_eq!(mask.difference(Signals::WRITABLE), Signals::READABLE);
    }

    #[test]
    fn test_user_signals_distinct() {
        for n in 0..8 {
            for m in 0..8 {
                if n != m {
                    assert!(!Signals::user(n).intersects(Signals::user(m)));
                }
            }
        }
        assert!(!Signals::user(0).intersects(Signals::IRQ_PENDING));
    }

    #[test]
    fn test_empty_mask() {
        assert!(Signals::NONE.is_empty());
        assert!(!Signals::EXITED.is_empty());
    }
}
