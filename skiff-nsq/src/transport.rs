//! Transport seam.
//!
//! The connection engine never touches sockets directly. Whatever owns the
//! socket (and the frame reader on its inbound side) implements `Transport`
//! and feeds decoded frames back through the connection registry.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of one transport, used to route inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}

/// Outbound half of a connection to a daemon.
///
/// Futures are not required to be `Send`: transports live on the compio
/// thread that owns their socket.
#[async_trait(?Send)]
pub trait Transport: Send + Sync {
    /// Identity used by the registry to route frames back.
    fn id(&self) -> TransportId;

    /// Write `bytes` to the wire.
    ///
    /// Resolves once the bytes were handed to the OS (transmit completion),
    /// or with the transmit failure.
    async fn send(&self, bytes: Bytes) -> io::Result<()>;

    /// Returns true while the underlying channel is open.
    fn is_active(&self) -> bool;

    /// Stop delivering inbound frames for this transport.
    ///
    /// Must be callable from synchronous contexts (drop paths).
    fn deregister(&self);

    /// Close the underlying channel.
    async fn shutdown(&self) -> io::Result<()>;
}
