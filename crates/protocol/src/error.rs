//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer bytes than the declared packet size were available
    #[error("truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Version or command field was not recognized on a read
    #[error("unrecognized packet: version {version:#06x}, command {command:#06x}")]
    BadMagic { version: u16, command: u32 },

    /// Descriptor blob could not be walked
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// I/O error while encoding or decoding
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
