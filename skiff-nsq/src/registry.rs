//! Ownership of live connections and routing of inbound frames.
//!
//! The frame reader of each transport hands decoded frames to
//! [`ConnectionRegistry::dispatch`] together with its [`TransportId`]; the
//! registry finds the owning connection and feeds the correlation slots.
//! Message frames are handed back to the caller: consuming them is not the
//! registry's job.

use crate::command::Command;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::transport::TransportId;
use bytes::Bytes;
use dashmap::DashMap;
use skiff_core::address::BrokerAddress;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Receives connections that should stop receiving messages.
pub trait ConnectionManager {
    /// Put `conn` into backoff and remember it as such.
    fn register_backoff(&self, conn: &Connection);
}

/// What `dispatch` did with a frame.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Handed to the waiting command (or dropped with a log line)
    Delivered,
    /// `_heartbeat_` answered with NOP
    Heartbeat,
    /// A message for the consumer
    Message {
        connection: Arc<Connection>,
        body: Bytes,
    },
    /// No connection owns this transport
    UnknownTransport,
}

/// Map of transport id to connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<TransportId, Arc<Connection>>,
    backed_off: DashMap<u64, BrokerAddress>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `conn`, keyed by its transport.
    ///
    /// Returns the connection previously registered for the same transport.
    pub fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let transport = conn.transport_id();
        debug!(conn_id = conn.id(), %transport, "[REGISTRY] Registered");
        self.connections.insert(transport, conn)
    }

    pub fn remove(&self, transport: TransportId) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(&transport).map(|(_, conn)| conn);
        if let Some(conn) = &removed {
            self.backed_off.remove(&conn.id());
        }
        removed
    }

    pub fn get(&self, transport: TransportId) -> Option<Arc<Connection>> {
        self.connections.get(&transport).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns true if `conn_id` was registered as backed off.
    pub fn is_backed_off(&self, conn_id: u64) -> bool {
        self.backed_off.contains_key(&conn_id)
    }

    /// Route one decoded frame from `transport`.
    pub async fn dispatch(&self, transport: TransportId, frame: Frame) -> DispatchOutcome {
        // Never hold a map guard across an await.
        let Some(conn) = self.get(transport) else {
            warn!(%transport, ?frame, "[REGISTRY] Frame for unknown transport dropped");
            return DispatchOutcome::UnknownTransport;
        };

        match frame {
            frame if frame.is_heartbeat() => {
                trace!(conn_id = conn.id(), "[REGISTRY] Heartbeat");
                if let Err(e) = conn.send(&Command::Nop).await {
                    warn!(conn_id = conn.id(), error = %e, "[REGISTRY] Heartbeat reply failed");
                }
                DispatchOutcome::Heartbeat
            }
            Frame::Response(_) => {
                conn.deliver_response(frame).await;
                DispatchOutcome::Delivered
            }
            Frame::Error(_) => {
                debug!(conn_id = conn.id(), error = %frame.text(), "[REGISTRY] Error frame");
                conn.deliver_error(frame).await;
                DispatchOutcome::Delivered
            }
            Frame::Message(body) => {
                conn.record_message_received();
                DispatchOutcome::Message {
                    connection: conn,
                    body,
                }
            }
        }
    }

    /// The transport went away: drop and close its connection.
    pub async fn on_transport_inactive(&self, transport: TransportId) {
        if let Some(conn) = self.remove(transport) {
            info!(conn_id = conn.id(), %transport, "[REGISTRY] Transport inactive, closing");
            conn.close().await;
        }
    }

    /// Close and forget every connection.
    pub async fn close_all(&self) {
        let ids: Vec<TransportId> = self.connections.iter().map(|e| *e.key()).collect();
        for transport in ids {
            if let Some(conn) = self.remove(transport) {
                conn.close().await;
            }
        }
    }
}

impl ConnectionManager for ConnectionRegistry {
    fn register_backoff(&self, conn: &Connection) {
        info!(conn_id = conn.id(), address = %conn.address(), "[REGISTRY] Backing off connection");
        self.backed_off.insert(conn.id(), conn.address().clone());
        conn.backoff(|_, _| {});
    }
}
