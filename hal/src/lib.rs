//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the hardware traits the kernel consumes.
//!
//! ## Philosophy
//!
//! **Hardware must be fully abstracted and swappable.**
//!
//! No device-specific assumptions leak into kernel logic. The kernel only
//! ever sees a monotonic tick source and interrupt lines; the simulated
//! implementations here make both fully deterministic for tests.
//!
//! ## Design Principles
//!
//! 1. **Trait-based**: all hardware access goes through traits
//! 2. **Non-blocking**: polling only, no sleeps
//! 3. **Deterministic by default**: the simulated devices advance only when
//!    told to

pub mod irq;
pub mod timer;

pub use irq::{IrqLine, SimIrqLine};
pub use timer::{SimTimerDevice, TimerDevice};
