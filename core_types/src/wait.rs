//! Wait-engine input and output records.

use serde::{Deserialize, Serialize};

use crate::handle::CapHandle;
use crate::signal::Signals;

/// One condition a caller is waiting on: a capability and the signal bits
/// of interest on the object behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Capability naming the watched object. Must carry the wait right.
    pub handle: CapHandle,
    /// Signal bits whose assertion satisfies this condition.
    pub interest: Signals,
}

impl Condition {
    pub fn new(handle: CapHandle, interest: Signals) -> Self {
        Self { handle, interest }
    }
}

/// One satisfied condition reported back to a waiter.
///
/// `index` is the position of the condition in the caller's input slice;
/// events for a single wakeup are reported in ascending input order.
/// `observed` is the full signal word at observation time, not just the
/// intersection with the interest mask. `value` is the object's value word
/// (a task's exit value once EXITED is raised, zero for most objects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitEvent {
    pub index: usize,
    pub observed: Signals,
    pub value: u64,
}

impl WaitEvent {
    pub fn new(index: usize, observed: Signals, value: u64) -> Self {
        Self {
            index,
            observed,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_construction() {
        let cond = Condition::new(CapHandle::new(1, 0), Signals::READABLE);
        assert_eq!(cond.interest, Signals::READABLE);
    }

    #[test]
    fn test_event_reports_full_word() {
        let observed = Signals::READABLE.union(Signals::PEER_CLOSED);
        let event = WaitEvent::new(3, observed, 0);
        assert!(event.observed.contains(Signals::PEER_CLOSED));
        assert_eq!(event.index, 3);
    }
}
