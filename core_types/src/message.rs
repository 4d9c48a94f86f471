//! Channel messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::CapHandle;

/// Maximum inline payload bytes per message.
pub const MAX_MESSAGE_DATA: usize = 64;

/// Maximum capabilities transferred per message.
pub const MAX_MESSAGE_CAPS: usize = 4;

/// Errors raised when constructing a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("payload of {0} bytes exceeds the {MAX_MESSAGE_DATA}-byte limit")]
    DataTooLarge(usize),
    #[error("{0} capabilities exceeds the {MAX_MESSAGE_CAPS}-capability limit")]
    TooManyCaps(usize),
}

/// A single channel message: a small inline payload plus up to four
/// capability handles transferred out of band.
///
/// The handles listed here are meaningful only in the sender's domain at
/// send time; the kernel rewrites them into receiver-domain handles during
/// delivery. A `Message` in flight inside the kernel therefore never stores
/// handles, only the payload — transfer bookkeeping lives with the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    data: Vec<u8>,
    caps: Vec<CapHandle>,
}

impl Message {
    /// Builds a message, enforcing the payload and capability limits.
    pub fn new(data: Vec<u8>, caps: Vec<CapHandle>) -> Result<Self, MessageError> {
        if data.len() > MAX_MESSAGE_DATA {
            return Err(MessageError::DataTooLarge(data.len()));
        }
        if caps.len() > MAX_MESSAGE_CAPS {
            return Err(MessageError::TooManyCaps(caps.len()));
        }
        Ok(Self { data, caps })
    }

    /// Builds a data-only message.
    pub fn from_data(data: Vec<u8>) -> Result<Self, MessageError> {
        Self::new(data, Vec::new())
    }

    /// The inline payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The capability handles attached by the sender.
    pub fn caps(&self) -> &[CapHandle] {
        &self.caps
    }

    /// Consumes the message into its parts.
    pub fn into_parts(self) -> (Vec<u8>, Vec<CapHandle>) {
        (self.data, self.caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_within_limits() {
        let msg = Message::new(vec![1, 2, 3], vec![CapHandle::new(0, 0)]);
        assert!(msg.is_ok());
    }

    #[test]
    fn test_message_data_too_large() {
        let result = Message::from_data(vec![0u8; MAX_MESSAGE_DATA + 1]);
        assert_eq!(result, Err(MessageError::DataTooLarge(MAX_MESSAGE_DATA + 1)));
    }

    #[test]
    fn test_message_too_many_caps() {
        let caps = (0..=MAX_MESSAGE_CAPS as u32)
            .map(|i| CapHandle::new(i, 0))
            .collect::<Vec<_>>();
        let result = Message::new(Vec::new(), caps);
        assert_eq!(result, Err(MessageError::TooManyCaps(MAX_MESSAGE_CAPS + 1)));
    }

    #[test]
    fn test_message_at_exact_limits() {
        let caps = (0..MAX_MESSAGE_CAPS as u32)
            .map(|i| CapHandle::new(i, 0))
            .collect::<Vec<_>>();
        let msg = Message::new(vec![0u8; MAX_MESSAGE_DATA], caps);
        assert!(msg.is_ok());
    }
}
