//! Kernel error taxonomy.
//!
//! Every failing syscall maps to exactly one of these variants. The set is
//! deliberately small: userspace should branch on the kind of failure, not
//! parse strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned across the syscall boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SysError {
    /// The handle does not resolve in the caller's capability table, either
    /// because it never existed or because its generation is stale.
    #[error("invalid or stale capability handle")]
    InvalidHandle,

    /// The handle resolves, but the object behind it is the wrong kind for
    /// the requested operation.
    #[error("operation not defined for this object kind")]
    WrongObjectKind,

    /// The capability lacks a right the operation requires.
    #[error("capability rights do not permit this operation")]
    PermissionDenied,

    /// A kernel-side limit was hit (table full, queue full of a kind that
    /// does not block, arena exhausted).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The object was torn down while the operation was in flight or before
    /// it started.
    #[error("object closed")]
    ObjectClosed,

    /// A deadline-bounded blocking operation expired before its condition
    /// was satisfied.
    #[error("operation timed out")]
    Timeout,

    /// A non-blocking operation would have had to block.
    #[error("operation would block")]
    WouldBlock,

    /// A requested mapping overlaps an existing one, or names a region that
    /// is not mapped.
    #[error("mapping conflict")]
    MappingConflict,

    /// Malformed syscall arguments.
    #[error("bad arguments: {0}")]
    BadArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", SysError::InvalidHandle), "invalid or stale capability handle");
        assert_eq!(
            format!("{}", SysError::ResourceExhausted("cap table full".into())),
            "resource exhausted: cap table full"
        );
    }

    #[test]
    fn test_timeout_is_not_would_block() {
        assert_ne!(SysError::Timeout, SysError::WouldBlock);
    }
}
