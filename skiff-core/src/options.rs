//! Client configuration options
//!
//! This module provides the per-connection configuration for the skiff client,
//! including the query budget, flow-control window and the fields sent to the
//! daemon in the IDENTIFY handshake.

use crate::error::{Result, SkiffError};
use std::time::Duration;
use tracing::debug;

/// Client configuration options.
///
/// These options control connection behavior: how long a synchronous
/// command/response exchange may take, the ready-count window the client
/// grants itself, whether the consumed topic is strictly ordered, and the
/// identity negotiated with the daemon.
///
/// # Examples
///
/// ```
/// use skiff_core::options::ClientOptions;
/// use std::time::Duration;
///
/// let opts = ClientOptions::default()
///     .with_query_timeout(Duration::from_secs(2))
///     .with_rdy(10)
///     .with_ordered(true);
///
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Query timeout
    ///
    /// Shared budget for one synchronous command/response exchange:
    /// acquiring the outbound slot, transmitting, and receiving the response.
    /// - Default: 5 seconds
    pub query_timeout: Duration,

    /// Ready count (RDY)
    ///
    /// Upper bound of the flow-control window this client grants itself.
    /// - Default: 3
    pub rdy: i32,

    /// Strict ordering
    ///
    /// - `false` (default): `check_order` accepts every message
    /// - `true`: messages must carry a non-decreasing (internal id, disk queue offset)
    pub ordered: bool,

    /// Client identifier sent in IDENTIFY
    pub client_id: String,

    /// Hostname sent in IDENTIFY
    pub hostname: String,

    /// User agent sent in IDENTIFY
    pub user_agent: String,

    /// Heartbeat interval requested from the daemon
    ///
    /// - Default: 30 seconds
    pub heartbeat_interval: Duration,

    /// Output buffer size requested from the daemon (bytes)
    ///
    /// - `None`: daemon default
    pub output_buffer_size: Option<u32>,

    /// Output buffer timeout requested from the daemon
    ///
    /// - `None`: daemon default
    pub output_buffer_timeout: Option<Duration>,

    /// Server-side message timeout
    ///
    /// - `None`: daemon default
    pub msg_timeout: Option<Duration>,

    /// Sample rate (0-99, percent of messages delivered)
    ///
    /// - Default: 0 (deliver everything)
    pub sample_rate: u8,

    /// Request a JSON IDENTIFY response with negotiated features
    ///
    /// - Default: true
    pub feature_negotiation: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self {
            query_timeout: Duration::from_secs(5),
            rdy: 3,
            ordered: false,
            client_id: hostname.split('.').next().unwrap_or("localhost").to_string(),
            hostname,
            user_agent: concat!("skiff/", env!("CARGO_PKG_VERSION")).to_string(),
            heartbeat_interval: Duration::from_secs(30),
            output_buffer_size: None,
            output_buffer_timeout: None,
            msg_timeout: None,
            sample_rate: 0,
            feature_negotiation: true,
        }
    }
}

impl ClientOptions {
    /// Create new options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query timeout (builder-style).
    #[must_use]
    pub const fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the ready-count window (builder-style).
    #[must_use]
    pub const fn with_rdy(mut self, rdy: i32) -> Self {
        self.rdy = rdy;
        self
    }

    /// Enable or disable strict ordering (builder-style).
    #[must_use]
    pub const fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Set the client identifier (builder-style).
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the hostname (builder-style).
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the user agent (builder-style).
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the heartbeat interval (builder-style).
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the output buffer size and timeout (builder-style).
    #[must_use]
    pub const fn with_output_buffer(mut self, size: u32, timeout: Duration) -> Self {
        self.output_buffer_size = Some(size);
        self.output_buffer_timeout = Some(timeout);
        self
    }

    /// Set the server-side message timeout (builder-style).
    #[must_use]
    pub const fn with_msg_timeout(mut self, timeout: Duration) -> Self {
        self.msg_timeout = Some(timeout);
        self
    }

    /// Set the sample rate (builder-style).
    #[must_use]
    pub const fn with_sample_rate(mut self, rate: u8) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Enable or disable feature negotiation (builder-style).
    #[must_use]
    pub const fn with_feature_negotiation(mut self, enabled: bool) -> Self {
        self.feature_negotiation = enabled;
        self
    }

    /// Check the options for values the daemon would reject.
    ///
    /// # Errors
    ///
    /// Returns `SkiffError::InvalidConfig` describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.check().map_err(|e| {
            debug!(client_id = %self.client_id, error = %e, "[OPTIONS] Rejected client options");
            e
        })
    }

    fn check(&self) -> Result<()> {
        if self.query_timeout.is_zero() {
            return Err(SkiffError::invalid_config("query_timeout must be non-zero"));
        }
        if self.rdy < 1 {
            return Err(SkiffError::invalid_config(format!(
                "rdy must be at least 1, got {}",
                self.rdy
            )));
        }
        if self.sample_rate > 99 {
            return Err(SkiffError::invalid_config(format!(
                "sample_rate must be in 0..=99, got {}",
                self.sample_rate
            )));
        }
        if self.client_id.is_empty() {
            return Err(SkiffError::invalid_config("client_id must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ClientOptions::default();
        assert_eq!(opts.query_timeout, Duration::from_secs(5));
        assert_eq!(opts.rdy, 3);
        assert!(!opts.ordered);
        assert!(opts.feature_negotiation);
        assert!(opts.user_agent.starts_with("skiff/"));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let opts = ClientOptions::new()
            .with_query_timeout(Duration::from_millis(250))
            .with_rdy(50)
            .with_ordered(true)
            .with_client_id("worker-1")
            .with_output_buffer(16 * 1024, Duration::from_millis(25))
            .with_msg_timeout(Duration::from_secs(60));

        assert_eq!(opts.query_timeout, Duration::from_millis(250));
        assert_eq!(opts.rdy, 50);
        assert!(opts.ordered);
        assert_eq!(opts.client_id, "worker-1");
        assert_eq!(opts.output_buffer_size, Some(16 * 1024));
        assert_eq!(opts.output_buffer_timeout, Some(Duration::from_millis(25)));
        assert_eq!(opts.msg_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientOptions::default().with_rdy(0).validate().is_err());
        assert!(ClientOptions::default()
            .with_query_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ClientOptions::default().with_sample_rate(100).validate().is_err());
        assert!(ClientOptions::default().with_client_id("").validate().is_err());
    }
}
