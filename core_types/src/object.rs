//! Kernel object identities and kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identity of a kernel object.
///
/// Object identities are kernel-internal: userspace only ever sees
/// capability handles. The identity outlives any single handle and names
/// the shared object all referencing capabilities point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Creates a new unique object identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Unique identifier for a task.
///
/// Tasks live in the kernel's task arena; parent/child links between tasks
/// are stored as these identifiers, never as owning pointers, so destroying
/// one task never requires fixing up another beyond clearing a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// The closed set of kernel object variants.
///
/// Each variant defines which capability operations are legal; an operation
/// applied to the wrong kind fails, it never silently no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Isolation boundary owning a capability table and a set of tasks.
    Domain,
    /// A schedulable unit of execution.
    Task,
    /// An address space holding page mappings.
    Space,
    /// A physical-memory-backed region mappable into address spaces.
    Vmo,
    /// A port/MMIO window.
    IoRange,
    /// Bounded, ordered message queue with capability transfer.
    Channel,
    /// An interrupt source.
    Irq,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Domain => "domain",
            ObjectKind::Task => "task",
            ObjectKind::Space => "space",
            ObjectKind::Vmo => "vmo",
            ObjectKind::IoRange => "io",
            ObjectKind::Channel => "channel",
            ObjectKind::Irq => "irq",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_uniqueness() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }

    #[test]
    fn test_task_id_uniqueness() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(format!("{}", ObjectKind::Channel), "channel");
        assert_eq!(format!("{}", ObjectKind::IoRange), "io");
    }
}
