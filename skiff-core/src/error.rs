//! Skiff Error Types
//!
//! Error taxonomy shared by the connection engine and the lookup client.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Skiff operations
#[derive(Error, Debug)]
pub enum SkiffError {
    /// IO error from the transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// No response within the shared query budget
    #[error("Command {command} timed out after {budget:?} ({phase})")]
    ProtocolTimeout {
        command: &'static str,
        phase: &'static str,
        budget: Duration,
    },

    /// Bad or absent IDENTIFY response; the connection is unusable
    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    /// A strictly ordered message arrived behind the watermark
    #[error(
        "Ordering violation: ({internal_id}, {disk_queue_offset}) behind watermark \
         ({watermark_internal_id}, {watermark_disk_queue_offset})"
    )]
    OrderingViolation {
        internal_id: i64,
        disk_queue_offset: i64,
        watermark_internal_id: i64,
        watermark_disk_queue_offset: i64,
    },

    /// Lookup query failed (network or parse)
    #[error("Discovery failure: {0}")]
    Discovery(String),

    /// Command attempted on a dead or closing connection
    #[error("Transport closed ({})", closed_reason(.intentional))]
    TransportClosed { intentional: bool },

    /// Protocol error while encoding or interpreting a frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

const fn closed_reason(intentional: &bool) -> &'static str {
    if *intentional {
        "closed by us"
    } else {
        "closed, not by us"
    }
}

/// Result type alias for Skiff operations
pub type Result<T> = std::result::Result<T, SkiffError>;

impl SkiffError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a handshake failure
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::HandshakeFailure(msg.into())
    }

    /// Create a discovery failure
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Check if this is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ProtocolTimeout { .. })
    }

    /// Check if the connection must be discarded after this error
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::HandshakeFailure(_) | Self::TransportClosed { .. })
    }

    /// Check if this error is recoverable by retrying on the same connection
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::ProtocolTimeout { .. } | Self::Discovery(_) | Self::OrderingViolation { .. } => {
                true
            }
            _ => false,
        }
    }
}
