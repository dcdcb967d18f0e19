//! # Skiff
//!
//! Client-side protocol engine for NSQ-style message-queue daemons, built on
//! `compio`.
//!
//! ## Architecture
//!
//! - **`skiff-core`**: errors, client options, broker addresses, shared-budget
//!   deadlines
//! - **`skiff-nsq`**: wire codec, connection engine (handshake, correlation,
//!   flow control, ordering), lookup-based discovery
//! - **`skiff`**: public API surface (this crate)
//!
//! ## Protocols (opt-in via features)
//!
//! - **`nsq`** (default) - NSQ TCP protocol V2 and the lookup HTTP API
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "nsq")]
//! use skiff::nsq::prelude::*;
//!
//! # #[cfg(feature = "nsq")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lookup = LookupService::parse("10.0.0.1:4161,10.0.0.2:4161")?;
//! lookup.start();
//!
//! let brokers = lookup.find("orders", true).await?;
//! println!("{} producers", brokers.len());
//!
//! lookup.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;

// Re-export core types
pub use bytes::Bytes;
pub use skiff_core::address::BrokerAddress;
pub use skiff_core::error::{Result, SkiffError};
pub use skiff_core::options::ClientOptions;

// Protocol modules (opt-in via features)
#[cfg(feature = "nsq")]
pub mod nsq;
