//! Broker addressing.
//!
//! A `BrokerAddress` names one daemon endpoint (optionally one partition of a
//! topic on it). Lookup results are collected into ordered sets of these, so
//! the ordering is part of the contract: host, then port, then partition.

use std::fmt;
use std::str::FromStr;

/// Address of a broker daemon as returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrokerAddress {
    host: String,
    port: u16,
    partition: Option<i32>,
}

impl BrokerAddress {
    /// Create an address without a partition.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            partition: None,
        }
    }

    /// Create an address bound to a topic partition.
    pub fn with_partition(host: impl Into<String>, port: u16, partition: i32) -> Self {
        Self {
            host: host.into(),
            port,
            partition: Some(partition),
        }
    }

    /// Parse an address from `host:port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use skiff_core::address::BrokerAddress;
    ///
    /// let addr = BrokerAddress::parse("10.0.0.7:4150").unwrap();
    /// assert_eq!(addr.host(), "10.0.0.7");
    /// assert_eq!(addr.port(), 4150);
    ///
    /// let v6 = BrokerAddress::parse("[::1]:4150").unwrap();
    /// assert_eq!(v6.host(), "::1");
    /// ```
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        s.parse()
    }

    /// Host name or IP literal (without IPv6 brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Partition id, if this address is partition-specific.
    pub const fn partition(&self) -> Option<i32> {
        self.partition
    }

    /// Returns true if this address carries a partition id.
    pub const fn has_partition(&self) -> bool {
        self.partition.is_some()
    }

    /// `host:port` suitable for connecting, with IPv6 hosts bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for BrokerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| AddressError::InvalidHost(s.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| AddressError::MissingPort(s.to_string()))?
        };

        if host.is_empty() {
            return Err(AddressError::InvalidHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(port.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition {
            Some(p) => write!(f, "{}/{}", self.authority(), p),
            None => f.write_str(&self.authority()),
        }
    }
}

/// Errors that can occur when parsing addresses.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Missing port in address: {0} (expected host:port)")]
    MissingPort(String),

    #[error("Invalid host in address: {0}")]
    InvalidHost(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_host_port() {
        let addr = BrokerAddress::parse("nsqd-1.internal:4150").unwrap();
        assert_eq!(addr.host(), "nsqd-1.internal");
        assert_eq!(addr.port(), 4150);
        assert_eq!(addr.partition(), None);
        assert_eq!(addr.to_string(), "nsqd-1.internal:4150");
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = BrokerAddress::parse("[::1]:4150").unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.authority(), "[::1]:4150");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            BrokerAddress::parse("localhost"),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            BrokerAddress::parse(":4150"),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(
            BrokerAddress::parse("localhost:http"),
            Err(AddressError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_partition_display() {
        let addr = BrokerAddress::with_partition("10.0.0.1", 4150, 2);
        assert!(addr.has_partition());
        assert_eq!(addr.to_string(), "10.0.0.1:4150/2");
    }

    #[test]
    fn test_ordering_and_dedup() {
        let set: BTreeSet<BrokerAddress> = [
            BrokerAddress::new("b", 1),
            BrokerAddress::with_partition("a", 2, 1),
            BrokerAddress::new("a", 2),
            BrokerAddress::with_partition("a", 2, 0),
            BrokerAddress::new("a", 2),
        ]
        .into_iter()
        .collect();

        let order: Vec<String> = set.iter().map(ToString::to_string).collect();
        assert_eq!(order, vec!["a:2", "a:2/0", "a:2/1", "b:1"]);
    }
}
