//! IDENTIFY payloads.
//!
//! The client describes itself in a JSON body; with feature negotiation on,
//! the daemon answers with a JSON document of its own instead of `OK`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skiff_core::error::{Result, SkiffError};
use skiff_core::options::ClientOptions;

/// JSON body of the IDENTIFY command.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IdentifyBody {
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    pub feature_negotiation: bool,
    /// Milliseconds
    pub heartbeat_interval: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_buffer_size: Option<u32>,
    /// Milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_buffer_timeout: Option<u64>,
    /// Milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_timeout: Option<u64>,
    pub sample_rate: u8,
    pub tls_v1: bool,
    pub snappy: bool,
    pub deflate: bool,
}

impl IdentifyBody {
    /// Build the identify body from client options.
    ///
    /// TLS and compression are never requested: negotiating them is the
    /// transport's business.
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            client_id: options.client_id.clone(),
            hostname: options.hostname.clone(),
            user_agent: options.user_agent.clone(),
            feature_negotiation: options.feature_negotiation,
            heartbeat_interval: millis(options.heartbeat_interval),
            output_buffer_size: options.output_buffer_size,
            output_buffer_timeout: options.output_buffer_timeout.map(millis),
            msg_timeout: options.msg_timeout.map(millis),
            sample_rate: options.sample_rate,
            tls_v1: false,
            snappy: false,
            deflate: false,
        }
    }

    /// Serialize to the JSON bytes carried by the command.
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| SkiffError::protocol(format!("cannot serialize IDENTIFY body: {e}")))
    }
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Negotiated settings reported by the daemon.
///
/// Unknown fields are ignored; missing fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerIdentity {
    pub max_rdy_count: Option<i32>,
    pub version: Option<String>,
    pub max_msg_timeout: Option<u64>,
    pub msg_timeout: Option<u64>,
    pub tls_v1: bool,
    pub deflate: bool,
    pub snappy: bool,
    pub sample_rate: u8,
    pub auth_required: bool,
    pub output_buffer_size: Option<i64>,
    pub output_buffer_timeout: Option<i64>,
}

impl ServerIdentity {
    /// Parse an IDENTIFY response body.
    ///
    /// A plain `OK` (no feature negotiation) yields `Ok(None)`.
    pub fn parse(body: &[u8]) -> Result<Option<Self>> {
        if body == b"OK" {
            return Ok(None);
        }
        serde_json::from_slice(body)
            .map(Some)
            .map_err(|e| SkiffError::handshake(format!("malformed IDENTIFY response: {e}")))
    }
}
