//! Client error taxonomy

use protocol::{errno, ProtocolError};
use std::time::Duration;
use thiserror::Error;

use crate::session::DeviceLink;

/// Errors surfaced by the client and its device sessions
#[derive(Debug, Error)]
pub enum ClientError {
    /// Name resolution failed or the daemon refused the connection
    #[error("cannot reach usbipd at {host}:{port}: {detail}")]
    DaemonConnect {
        host: String,
        port: u16,
        detail: String,
    },

    /// The connect did not complete within the connect budget
    #[error("connection attempt to {host}:{port} timed out after {timeout:?}")]
    DaemonTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// The underlying stream failed mid-operation; `link` identifies the
    /// session so a reconnect can be attempted
    #[error("connection lost: {detail}")]
    ConnectionLost {
        link: Option<DeviceLink>,
        detail: String,
    },

    /// No bytes were collected within the caller's timeout
    #[error("no response within {timeout:?} (expected {size} bytes)")]
    ResponseTimeout { timeout: Duration, size: usize },

    /// The daemon replied non-success to an import or an enumeration step
    #[error("error attaching to device, errno {errno}: {}", errno::describe(*.errno))]
    Attach { errno: i32 },

    /// No requested hardware id matched any exported path
    #[error("no requested device matched any exported path")]
    NotFound,

    /// An endpoint was used before a configuration bound it
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// Configuration file problem
    #[error("configuration error: {0}")]
    Config(String),

    /// Codec or descriptor failure, surfaced unchanged
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Stream failure with no session attached yet.
    pub(crate) fn lost(detail: impl Into<String>) -> Self {
        Self::ConnectionLost {
            link: None,
            detail: detail.into(),
        }
    }

    /// Tag a connection loss with the session it belongs to.
    pub(crate) fn with_link(self, link: DeviceLink) -> Self {
        match self {
            Self::ConnectionLost { detail, .. } => Self::ConnectionLost {
                link: Some(link),
                detail,
            },
            other => other,
        }
    }
}

/// Type alias for client results
pub type Result<T> = std::result::Result<T, ClientError>;
