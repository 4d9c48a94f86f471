//! # Kernel API
//!
//! The syscall ABI of the Opal kernel: the error taxonomy, the tick-based
//! time model, the opcode set and six-word frame, and the typed syscall
//! surface user code marshals through a [`SyscallPort`].
//!
//! ## Philosophy
//!
//! - **One boundary**: everything userspace can ask of the kernel passes
//!   through a single opcode-plus-six-words convention.
//! - **Errors are the contract**: every failure maps to exactly one
//!   [`SysError`] variant with a stable wire code.
//! - **Time is ticks**: deadlines are absolute positions on a monotonic
//!   counter the host advances; there is no wall clock.

pub mod error;
pub mod frame;
pub mod syscall;
pub mod time;

pub use error::SysError;
pub use frame::{error_code, result_code, Opcode, SyscallFrame, FRAME_ARGS};
pub use syscall::{IoWidth, Syscall, SyscallPort, SyscallReturn};
pub use time::{Deadline, Ticks};
