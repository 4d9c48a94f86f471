//! The wait engine: readiness evaluation over watched objects.
//!
//! A watch list is the kernel-side form of a caller's condition list:
//! object identities (already resolved through the caller's table) paired
//! with interest masks. Evaluation is pure — it reads signal words and
//! never mutates anything — so the scheduler can re-run it on every tick
//! advance and object mutation.

use core_types::{ObjectId, Signals, WaitEvent};

use crate::registry::ObjectRegistry;

/// A resolved condition: watched object plus interest mask.
pub type Watch = (ObjectId, Signals);

/// All satisfied watches, in input order.
///
/// Each event reports the object's full signal word and value word at
/// observation time.
pub fn ready_events(watches: &[Watch], registry: &ObjectRegistry) -> Vec<WaitEvent> {
    let mut events = Vec::new();
    for (index, (object, interest)) in watches.iter().enumerate() {
        if let Some(entry) = registry.get(*object) {
            if entry.signals().intersects(*interest) {
                events.push(WaitEvent::new(index, entry.signals(), entry.value()));
            }
        }
    }
    events
}

/// The lowest-index satisfied watch, if any.
pub fn first_ready(watches: &[Watch], registry: &ObjectRegistry) -> Option<WaitEvent> {
    for (index, (object, interest)) in watches.iter().enumerate() {
        if let Some(entry) = registry.get(*object) {
            if entry.signals().intersects(*interest) {
                return Some(WaitEvent::new(index, entry.signals(), entry.value()));
            }
        }
    }
    None
}

/// True if any watch is satisfied.
pub fn any_ready(watches: &[Watch], registry: &ObjectRegistry) -> bool {
    first_ready(watches, registry).is_some()
}
