//! Capability handles and rights masks.
//!
//! A capability handle is the only name userspace ever holds for a kernel
//! object. It packs a slot index and a generation counter into one machine
//! word; the kernel checks the generation on every dereference, so a handle
//! that outlives its slot fails cleanly instead of aliasing whatever object
//! reused the slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque per-domain capability handle.
///
/// The packed representation is `generation << 32 | index`. Userspace treats
/// the word as opaque; only the owning domain's capability table can resolve
/// it, and only while the generation still matches the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapHandle {
    index: u32,
    generation: u32,
}

impl CapHandle {
    /// Sentinel meaning "no capability" in argument positions.
    pub const NONE: CapHandle = CapHandle {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Creates a handle from a slot index and generation.
    ///
    /// Only capability tables construct handles; everything else receives
    /// them fully formed.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the generation the handle was minted with.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns true if this is the "no capability" sentinel.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Packs the handle into a single machine word for the syscall ABI.
    pub fn to_word(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpacks a handle from a syscall argument word.
    pub fn from_word(word: u64) -> Self {
        Self {
            index: (word & 0xFFFF_FFFF) as u32,
            generation: (word >> 32) as u32,
        }
    }
}

impl fmt::Display for CapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "cap:none")
        } else {
            write!(f, "cap:{}@{}", self.index, self.generation)
        }
    }
}

/// Rights carried by a capability.
///
/// Rights are checked at dereference time; an operation the rights do not
/// cover fails with a permission error, never a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rights(u32);

impl Rights {
    pub const NONE: Rights = Rights(0);
    pub const DUPLICATE: Rights = Rights(1 << 0);
    pub const TRANSFER: Rights = Rights(1 << 1);
    pub const READ: Rights = Rights(1 << 2);
    pub const WRITE: Rights = Rights(1 << 3);
    pub const MAP: Rights = Rights(1 << 4);
    pub const EXECUTE: Rights = Rights(1 << 5);
    pub const SIGNAL: Rights = Rights(1 << 6);
    pub const WAIT: Rights = Rights(1 << 7);
    pub const MANAGE: Rights = Rights(1 << 8);

    /// Every right. Granted to the creator of an object.
    pub fn all() -> Self {
        Rights(
            Self::DUPLICATE.0
                | Self::TRANSFER.0
                | Self::READ.0
                | Self::WRITE.0
                | Self::MAP.0
                | Self::EXECUTE.0
                | Self::SIGNAL.0
                | Self::WAIT.0
                | Self::MANAGE.0,
        )
    }

    /// Builds a rights mask from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Rights(bits)
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if every right in `other` is present in `self`.
    pub fn contains(&self, other: Rights) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of two rights masks.
    pub fn union(&self, other: Rights) -> Rights {
        Rights(self.0 | other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_word_round_trip() {
        let handle = CapHandle::new(7, 3);
        let word = handle.to_word();
        assert_eq!(CapHandle::from_word(word), handle);
    }

    #[test]
    fn test_handle_none_sentinel() {
        assert!(CapHandle::NONE.is_none());
        assert!(!CapHandle::new(0, 0).is_none());
        assert_eq!(CapHandle::from_word(CapHandle::NONE.to_word()), CapHandle::NONE);
    }

    #[test]
    fn test_handle_generation_distinguishes() {
        let old = CapHandle::new(4, 1);
        let new = CapHandle::new(4, 2);
        assert_ne!(old, new);
        assert_ne!(old.to_word(), new.to_word());
    }

    #[test]
    fn test_rights_contains() {
        let rw = Rights::READ.union(Rights::WRITE);
        assert!(rw.contains(Rights::READ));
        assert!(rw.contains(Rights::WRITE));
        assert!(!rw.contains(Rights::MAP));
        assert!(Rights::all().contains(rw));
    }

    #[test]
    fn test_rights_none_is_empty() {
        assert!(!Rights::NONE.contains(Rights::READ));
        assert!(Rights::READ.contains(Rights::NONE));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(format!("{}", CapHandle::new(2, 9)), "cap:2@9");
        assert_eq!(format!("{}", CapHandle::NONE), "cap:none");
    }
}
