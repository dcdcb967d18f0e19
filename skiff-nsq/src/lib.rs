//! # Skiff NSQ
//!
//! Client-side protocol engine for NSQ-style message brokers.
//!
//! ## Overview
//!
//! - **Connection**: handshake, single-flight command correlation, RDY flow
//!   control and backoff, ordered-consumption watermark, graceful close
//! - **Codec**: byte-exact command encoding, including batched MPUB
//! - **Lookup**: round-robin broker discovery with a self-refreshing list of
//!   lookup servers
//!
//! Socket I/O and frame decoding stay outside this crate: a [`Transport`]
//! carries encoded commands out, and the [`ConnectionRegistry`] routes decoded
//! frames back in.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skiff_nsq::LookupService;
//!
//! #[compio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let lookup = LookupService::parse("127.0.0.1:4161, 127.0.0.2:4161")?;
//!     lookup.start();
//!
//!     for broker in lookup.find("orders", true).await? {
//!         println!("producer at {broker}");
//!     }
//!     Ok(())
//! }
//! ```

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::let_underscore_future)]

pub mod codec;
pub mod command;
pub mod connection;
pub mod frame;
pub mod http;
pub mod identify;
pub mod lookup;
mod ready;
pub mod registry;
pub mod transport;

pub use command::{Command, MessageId, Topic};
pub use connection::{Connection, LifecycleState};
pub use frame::{Frame, FrameType};
pub use http::{CompioHttpClient, LookupHttp};
pub use identify::{IdentifyBody, ServerIdentity};
pub use lookup::{LookupError, LookupOptions, LookupService};
pub use registry::{ConnectionManager, ConnectionRegistry, DispatchOutcome};
pub use transport::{Transport, TransportId};

/// Prelude module for convenient imports
///
/// ```rust
/// use skiff_nsq::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Command, Connection, ConnectionManager, ConnectionRegistry, Frame, LifecycleState,
        LookupService, Topic, Transport, TransportId,
    };
    pub use bytes::Bytes;
    pub use skiff_core::prelude::{BrokerAddress, ClientOptions, Deadline, SkiffError};
}
