//! # Timer Device
//!
//! Hardware abstraction for monotonic time measurement.
//!
//! ## Philosophy
//!
//! **Time is a service, not a global variable.**
//!
//! This trait provides access to a monotonic tick counter. It does NOT:
//! - Provide wall-clock time (no UTC, no timezones)
//! - Block or sleep (polling only)
//! - Implement scheduling (that's for the kernel)

/// Hardware timer device trait
///
/// Provides access to a monotonic tick counter. Ticks are cumulative
/// and never decrease.
///
/// # Implementation Notes
///
/// - Must be monotonic (never return a smaller value)
/// - Must not block
/// - Tick frequency is implementation-defined
pub trait TimerDevice {
    /// Returns the current cumulative tick count.
    fn poll_ticks(&mut self) -> u64;
}

/// Deterministic simulated timer.
///
/// Ticks advance only when the host calls [`advance`](SimTimerDevice::advance),
/// so tests control time exactly.
#[derive(Debug, Default)]
pub struct SimTimerDevice {
    ticks: u64,
}

impl SimTimerDevice {
    pub fn new() -> Self {
        Self { ticks: 0 }
    }

    /// Advances the counter by `delta` ticks.
    pub fn advance(&mut self, delta: u64) {
        self.ticks = self.ticks.saturating_add(delta);
    }
}

impl TimerDevice for SimTimerDevice {
    fn poll_ticks(&mut self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_move_only_on_advance() {
        let mut timer = SimTimerDevice::new();
        assert_eq!(timer.poll_ticks(), 0);
        // Polling is passive; repeated polls see the same instant.
        assert_eq!(timer.poll_ticks(), 0);

        timer.advance(7);
        assert_eq!(timer.poll_ticks(), 7);
        timer.advance(0);
        assert_eq!(timer.poll_ticks(), 7);
    }

    #[test]
    fn test_advance_accumulates_and_saturates() {
        let mut timer = SimTimerDevice::new();
        timer.advance(3);
        timer.advance(4);
        assert_eq!(timer.poll_ticks(), 7);

        // The counter pins at the top instead of wrapping.
        timer.advance(u64::MAX);
        assert_eq!(timer.poll_ticks(), u64::MAX);
        timer.advance(1);
        assert_eq!(timer.poll_ticks(), u64::MAX);
    }
}
