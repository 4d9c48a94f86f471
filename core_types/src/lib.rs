//! # Core Types
//!
//! This crate defines the fundamental types shared by the Opal kernel and
//! everything that talks to it.
//!
//! ## Philosophy
//!
//! - **Handles are opaque**: a capability is a (slot, generation) word whose
//!   bits mean nothing to the holder.
//! - **No ambient authority**: every kernel object is reached through a
//!   capability carrying explicit rights.
//! - **Stale never aliases**: a dropped handle's slot may be reused, but the
//!   generation changes, so the old word can never reach the new object.
//!
//! ## Key Types
//!
//! - [`CapHandle`]: opaque per-domain capability handle
//! - [`Rights`] / [`Signals`]: word-sized permission and event masks
//! - [`ObjectKind`]: the closed set of kernel object variants
//! - [`Message`]: fixed-size channel message with out-of-band capabilities
//! - [`Condition`] / [`WaitEvent`]: wait-engine input and output records

pub mod handle;
pub mod message;
pub mod object;
pub mod signal;
pub mod wait;

pub use handle::{CapHandle, Rights};
pub use message::{Message, MessageError, MAX_MESSAGE_CAPS, MAX_MESSAGE_DATA};
pub use object::{ObjectId, ObjectKind, TaskId};
pub use signal::Signals;
pub use wait::{Condition, WaitEvent};
