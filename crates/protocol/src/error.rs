//! Protocol error types

use thiserror::Error;

/// Wire-level errors for both device families
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload does not fit in one vendor frame
    #[error("Payload too large: {len} bytes (max: {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Frame does not start with the 0xEF 0x01 sync bytes
    #[error("Sync mismatch: frame starts with {found:#04x?}")]
    SyncMismatch { found: [u8; 2] },

    /// Frame is shorter than its header or declared length requires
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// Package tag is not one of command/data/end-data
    #[error("Invalid package tag: {tag:#04x}")]
    InvalidPackageTag { tag: u8 },

    /// Package content length is outside the allowed range
    #[error("Content too large: {len} bytes (max: {max})")]
    ContentTooLarge { len: usize, max: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
