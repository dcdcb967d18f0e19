//! NSQ protocol implementation.
//!
//! # Building Blocks
//!
//! - [`Connection`] - one daemon connection: handshake, single-flight
//!   commands, RDY flow control, ordered-consumption watermark
//! - [`ConnectionRegistry`] - routes decoded frames to their connection
//! - [`LookupService`] - round-robin discovery over lookup servers
//! - [`codec`] - byte-exact command encoding
//!
//! The socket and its frame reader are supplied by the caller through the
//! [`Transport`] trait.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use skiff::nsq::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ConnectionRegistry::new();
//! let address = BrokerAddress::new("10.0.0.1", 4150);
//! let conn = skiff::nsq::open(&registry, 1, address, transport, ClientOptions::default()).await?;
//!
//! let reply = conn.send_and_await(&Command::mpub(Topic::new("orders"), ["a", "bb"])).await?;
//! assert!(reply.is_ok());
//! # Ok(())
//! # }
//! ```

use skiff_core::address::BrokerAddress;
use skiff_core::error::Result;
use skiff_core::options::ClientOptions;
use std::sync::Arc;
use tracing::debug;

pub use skiff_nsq::codec;
pub use skiff_nsq::{
    Command, CompioHttpClient, Connection, ConnectionManager, ConnectionRegistry,
    DispatchOutcome, Frame, FrameType, IdentifyBody, LifecycleState, LookupError, LookupHttp,
    LookupOptions, LookupService, MessageId, ServerIdentity, Topic, Transport, TransportId,
};

/// Validate `options`, wrap `transport`, register the connection and run the
/// handshake.
///
/// The connection is registered before the handshake so the transport's frame
/// reader can already route the IDENTIFY response through `registry`. On
/// failure it is removed again.
///
/// # Errors
///
/// `InvalidConfig` for bad options, otherwise whatever the handshake reports.
pub async fn open(
    registry: &ConnectionRegistry,
    id: u64,
    address: BrokerAddress,
    transport: Arc<dyn Transport>,
    options: ClientOptions,
) -> Result<Arc<Connection>> {
    options.validate()?;

    let transport_id = transport.id();
    let conn = Arc::new(Connection::new(id, address, transport, Arc::new(options)));
    registry.register(Arc::clone(&conn));

    if let Err(e) = conn.initialize().await {
        registry.remove(transport_id);
        return Err(e);
    }
    debug!(conn_id = id, "[CONN] Opened");
    Ok(conn)
}

/// Convenient imports for the NSQ protocol.
///
/// ```rust
/// use skiff::nsq::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Command, Connection, ConnectionRegistry, Frame, LookupOptions, LookupService, Topic,
        Transport,
    };
    pub use bytes::Bytes;
    pub use skiff_core::prelude::{BrokerAddress, ClientOptions, Deadline, SkiffError};
}
