//! Outbound protocol commands.
//!
//! A `Command` is built once and never mutated; the codec turns it into the
//! exact bytes the daemon expects.

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Protocol magic sent once, before anything else, on a fresh connection.
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// A topic, optionally narrowed to one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    name: String,
    partition: Option<i32>,
}

impl Topic {
    /// A topic without a partition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition: None,
        }
    }

    /// A topic narrowed to `partition`.
    pub fn with_partition(name: impl Into<String>, partition: i32) -> Self {
        Self {
            name: name.into(),
            partition: Some(partition),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn partition(&self) -> Option<i32> {
        self.partition
    }

    pub const fn has_partition(&self) -> bool {
        self.partition.is_some()
    }
}

/// Renders as it appears on the wire: `name` or `name partition`.
impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition {
            Some(p) => write!(f, "{} {}", self.name, p),
            None => f.write_str(&self.name),
        }
    }
}

/// 16-byte message identifier assigned by the daemon.
pub type MessageId = [u8; 16];

/// An outbound protocol request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Protocol preamble `"  V2"`
    Magic,
    /// Client identity, JSON body
    Identify(Bytes),
    /// Authentication secret
    Auth(Bytes),
    /// Subscribe to a topic/channel
    Sub { topic: Topic, channel: String },
    /// Subscribe with strict ordering
    SubOrdered { topic: Topic, channel: String },
    /// Update the ready count
    Rdy(i32),
    /// Finish a message
    Fin(MessageId),
    /// Re-queue a message after a delay
    Req { id: MessageId, delay: Duration },
    /// Reset a message's timeout
    Touch(MessageId),
    /// Publish one message
    Pub { topic: Topic, body: Bytes },
    /// Publish several messages atomically
    Mpub { topic: Topic, bodies: Vec<Bytes> },
    /// No-op, answers heartbeats
    Nop,
    /// Start a clean close
    Cls,
}

impl Command {
    /// Wire name of the command, used for logging and timeouts.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Magic => "MAGIC",
            Self::Identify(_) => "IDENTIFY",
            Self::Auth(_) => "AUTH",
            Self::Sub { .. } => "SUB",
            Self::SubOrdered { .. } => "SUB_ORDERED",
            Self::Rdy(_) => "RDY",
            Self::Fin(_) => "FIN",
            Self::Req { .. } => "REQ",
            Self::Touch(_) => "TOUCH",
            Self::Pub { .. } => "PUB",
            Self::Mpub { .. } => "MPUB",
            Self::Nop => "NOP",
            Self::Cls => "CLS",
        }
    }

    /// Returns true if the daemon answers this command with a frame.
    ///
    /// FIN/REQ/TOUCH/RDY/NOP are fire-and-forget; an error for them arrives
    /// asynchronously, if at all.
    pub const fn expects_response(&self) -> bool {
        matches!(
            self,
            Self::Identify(_)
                | Self::Auth(_)
                | Self::Sub { .. }
                | Self::SubOrdered { .. }
                | Self::Pub { .. }
                | Self::Mpub { .. }
                | Self::Cls
        )
    }

    /// Convenience constructor for a multi-publish.
    pub fn mpub<I, B>(topic: Topic, bodies: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::Mpub {
            topic,
            bodies: bodies.into_iter().map(Into::into).collect(),
        }
    }

    /// Convenience constructor for a single publish.
    pub fn publish(topic: Topic, body: impl Into<Bytes>) -> Self {
        Self::Pub {
            topic,
            body: body.into(),
        }
    }
}
