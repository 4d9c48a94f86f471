//! Interrupt line abstraction.
//!
//! The kernel never programs an interrupt controller directly. It observes
//! numbered lines through this trait; the simulated implementation lets
//! tests assert and acknowledge lines by hand.

/// One hardware interrupt line.
pub trait IrqLine {
    /// The line number this source is wired to.
    fn line(&self) -> u32;

    /// Returns true while the line is asserted and unacknowledged.
    fn pending(&self) -> bool;

    /// Acknowledges the line, clearing the pending state.
    fn ack(&mut self);
}

/// Deterministic simulated interrupt line.
#[derive(Debug)]
pub struct SimIrqLine {
    line: u32,
    pending: bool,
}

impl SimIrqLine {
    pub fn new(line: u32) -> Self {
        Self {
            line,
            pending: false,
        }
    }

    /// Asserts the line, as the wired device would.
    pub fn assert_line(&mut self) {
        self.pending = true;
    }
}

impl IrqLine for SimIrqLine {
    fn line(&self) -> u32 {
        self.line
    }

    fn pending(&self) -> bool {
        self.pending
    }

    fn ack(&mut self) {
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_assert_then_ack() {
        let mut irq = SimIrqLine::new(3);
        assert_eq!(irq.line(), 3);
        assert!(!irq.pending());

        irq.assert_line();
        assert!(irq.pending());

        irq.ack();
        assert!(!irq.pending());
    }

    #[test]
    fn test_irq_ack_idempotent() {
        let mut irq = SimIrqLine::new(0);
        irq.ack();
        assert!(!irq.pending());
    }
}
