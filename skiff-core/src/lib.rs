//! Skiff Core
//!
//! This crate contains the protocol-agnostic building blocks shared by the
//! skiff client:
//! - Broker addressing (`address`)
//! - Shared-budget deadlines for multi-phase waits (`deadline`)
//! - Error types (`error`)
//! - Client configuration (`options`)
//! - Cancellation detection for in-flight exchanges (`poison`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod address;
pub mod deadline;
pub mod error;
pub mod options;
pub mod poison;

pub use error::{Result, SkiffError};

// A small prelude to make downstream crates ergonomic.
pub mod prelude {
    pub use crate::address::{AddressError, BrokerAddress};
    pub use crate::deadline::{Deadline, Elapsed};
    pub use crate::error::{Result, SkiffError};
    pub use crate::options::ClientOptions;
    pub use crate::poison::PoisonGuard;
}
