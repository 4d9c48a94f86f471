//! The blocker state machine.
//!
//! A task that cannot complete a syscall gets exactly one [`Blocker`]
//! describing what it is waiting for and until when. The lifecycle is
//! strict: a blocker is attached once, then resolved exactly once, either
//! unblocked (its predicate held, or its object was torn down) or timed
//! out (its deadline passed first). The predicate is pure; all effects of
//! waking run on the kernel after the state transition is decided.

use core_types::{Message, ObjectId, Signals};
use kernel_api::{Deadline, Ticks};

use crate::registry::ObjectRegistry;
use crate::wait::{self, Watch};

/// What a blocked task is waiting for.
#[derive(Debug)]
pub enum BlockerKind {
    /// A connection offer to arrive on a listening channel.
    Accept { listener: ObjectId },
    /// The handshake on an offered channel to complete.
    Connect { listener: ObjectId, channel: ObjectId },
    /// A channel to become readable (or its peer to close).
    Read { channel: ObjectId },
    /// A channel's delivery target to have queue room. The message rides
    /// along and is committed by the wake effect.
    Write { channel: ObjectId, message: Message },
    /// Any watched object to become ready; resolves to the lowest ready
    /// input index and does not re-arm within the call.
    Select { watches: Vec<Watch> },
    /// An absolute tick to be reached. Reaching it is success, not a
    /// timeout.
    Timer { wake: Ticks },
    /// A task object to raise EXITED; the wake effect claims the exit
    /// value.
    WaitChild { task: ObjectId },
    /// The general wait engine: any watched condition to become ready;
    /// resolves to every ready condition in input order.
    Conditions { watches: Vec<Watch> },
}

/// Lifecycle of a blocker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockerState {
    /// Installed on a blocked task.
    Attached,
    /// Resolved because the predicate held or the object went away.
    Unblocked,
    /// Resolved because the deadline passed first.
    TimedOut,
}

/// One task's reason for being blocked.
#[derive(Debug)]
pub struct Blocker {
    kind: BlockerKind,
    deadline: Deadline,
    state: BlockerState,
}

impl Blocker {
    pub fn new(kind: BlockerKind, deadline: Deadline) -> Self {
        Self {
            kind,
            deadline,
            state: BlockerState::Attached,
        }
    }

    pub fn kind(&self) -> &BlockerKind {
        &self.kind
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn state(&self) -> BlockerState {
        self.state
    }

    pub fn is_resolved(&self) -> bool {
        self.state != BlockerState::Attached
    }

    /// Pure readiness predicate. Reads kernel state, never mutates it.
    pub fn can_unblock(&self, registry: &ObjectRegistry, now: Ticks) -> bool {
        match &self.kind {
            BlockerKind::Accept { listener } => registry
                .channel(*listener)
                .map(|channel| channel.has_pending_connects())
                .unwrap_or(false),
            BlockerKind::Connect { channel, .. } => {
                registry.signals(*channel).contains(Signals::CONNECTED)
            }
            BlockerKind::Read { channel } => {
                let Ok(queue) = registry.channel(*channel) else {
                    return false;
                };
                !queue.is_empty() || registry.signals(*channel).contains(Signals::PEER_CLOSED)
            }
            BlockerKind::Write { channel, .. } => {
                let Ok(queue) = registry.channel(*channel) else {
                    return false;
                };
                let target = queue.peer().unwrap_or(*channel);
                let target_full = registry
                    .channel(target)
                    .map(|queue| queue.is_full())
                    .unwrap_or(true);
                !target_full || registry.signals(*channel).contains(Signals::PEER_CLOSED)
            }
            BlockerKind::Select { watches } | BlockerKind::Conditions { watches } => {
                wait::any_ready(watches, registry)
            }
            BlockerKind::Timer { wake } => now >= *wake,
            BlockerKind::WaitChild { task } => {
                registry.signals(*task).contains(Signals::EXITED)
            }
        }
    }

    /// True if the blocker is waiting on `object` in any role. Teardown of
    /// that object must resolve the blocker.
    pub fn references(&self, object: ObjectId) -> bool {
        match &self.kind {
            BlockerKind::Accept { listener } => *listener == object,
            BlockerKind::Connect { listener, channel } => {
                *listener == object || *channel == object
            }
            BlockerKind::Read { channel } | BlockerKind::Write { channel, .. } => {
                *channel == object
            }
            BlockerKind::Select { watches } | BlockerKind::Conditions { watches } => {
                watches.iter().any(|(watched, _)| *watched == object)
            }
            BlockerKind::Timer { .. } => false,
            BlockerKind::WaitChild { task } => *task == object,
        }
    }

    /// Resolves the blocker as unblocked. Must be Attached; a blocker
    /// never resolves twice.
    pub fn mark_unblocked(&mut self) {
        debug_assert_eq!(self.state, BlockerState::Attached);
        self.state = BlockerState::Unblocked;
    }

    /// Resolves the blocker as timed out. Must be Attached.
    pub fn mark_timed_out(&mut self) {
        debug_assert_eq!(self.state, BlockerState::Attached);
        self.state = BlockerState::TimedOut;
    }

    /// Consumes the blocker into its kind, for running the wake effect.
    pub fn into_kind(self) -> BlockerKind {
        self.kind
    }

    /// Deadline check against the current tick.
    pub fn is_expired(&self, now: Ticks) -> bool {
        self.deadline.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::object::KObject;
    use core_types::TaskId;

    #[test]
    fn test_timer_predicate() {
        let registry = ObjectRegistry::new();
        let blocker = Blocker::new(BlockerKind::Timer { wake: Ticks(10) }, Deadline::NEVER);
        assert!(!blocker.can_unblock(&registry, Ticks(9)));
        assert!(blocker.can_unblock(&registry, Ticks(10)));
    }

    #[test]
    fn test_read_predicate_follows_queue() {
        let mut registry = ObjectRegistry::new();
        let channel = registry.insert(KObject::Channel(Channel::new(4)));
        let blocker = Blocker::new(BlockerKind::Read { channel }, Deadline::NEVER);

        assert!(!blocker.can_unblock(&registry, Ticks::ZERO));

        registry
            .channel_mut(channel)
            .unwrap()
            .push(crate::channel::QueuedMessage {
                data: vec![1],
                caps: Vec::new(),
            })
            .unwrap();
        assert!(blocker.can_unblock(&registry, Ticks::ZERO));
    }

    #[test]
    fn test_read_predicate_fires_on_peer_close() {
        let mut registry = ObjectRegistry::new();
        let channel = registry.insert(KObject::Channel(Channel::new(4)));
        let blocker = Blocker::new(BlockerKind::Read { channel }, Deadline::NEVER);

        registry.assert_signals(channel, Signals::PEER_CLOSED);
        assert!(blocker.can_unblock(&registry, Ticks::ZERO));
    }

    #[test]
    fn test_resolution_is_exactly_once() {
        let mut blocker = Blocker::new(BlockerKind::Timer { wake: Ticks(1) }, Deadline::NEVER);
        assert_eq!(blocker.state(), BlockerState::Attached);
        assert!(!blocker.is_resolved());

        blocker.mark_unblocked();
        assert_eq!(blocker.state(), BlockerState::Unblocked);
        assert!(blocker.is_resolved());
    }

    #[test]
    fn test_timeout_resolution() {
        let mut blocker = Blocker::new(
            BlockerKind::Timer { wake: Ticks(100) },
            Deadline::at(Ticks(5)),
        );
        assert!(blocker.is_expired(Ticks(5)));
        blocker.mark_timed_out();
        assert_eq!(blocker.state(), BlockerState::TimedOut);
    }

    #[test]
    fn test_references_watches() {
        let object = ObjectId::new();
        let other = ObjectId::new();
        let blocker = Blocker::new(
            BlockerKind::Select {
                watches: vec![(object, Signals::READABLE)],
            },
            Deadline::NEVER,
        );
        assert!(blocker.references(object));
        assert!(!blocker.references(other));
    }

    #[test]
    fn test_waitchild_predicate() {
        let mut registry = ObjectRegistry::new();
        let task = registry.insert(KObject::Task(TaskId::new()));
        let blocker = Blocker::new(BlockerKind::WaitChild { task }, Deadline::NEVER);

        assert!(!blocker.can_unblock(&registry, Ticks::ZERO));
        registry.assert_signals(task, Signals::EXITED);
        assert!(blocker.can_unblock(&registry, Ticks::ZERO));
    }
}
