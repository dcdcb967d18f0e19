//! One logical connection to a daemon.
//!
//! # Architecture
//!
//! ```text
//! caller ── send_and_await ──► [outbound slot (1)] ──► codec ──► Transport
//!                                                                  │
//! caller ◄───────────────────── [inbound slot (1)] ◄── registry ◄──┘ (decoded frames)
//! ```
//!
//! At most one command awaits a response at any instant. Correlation is
//! positional: the daemon answers in order and carries no request ids, so the
//! single-flight slot is what ties a response to its command.
//!
//! # Locking
//!
//! - `send_and_await` and liveness checks take the shared side of the lock
//!   and may run concurrently (the slot serializes them).
//! - `initialize`, `close` and `disconnect` take the exclusive side, so a
//!   lifecycle transition never interleaves with an in-flight exchange.
//! - Counters and flags read outside the lock are individual atomics.
//!
//! # State Machine
//!
//! ```text
//! Created → HandshakeInFlight → Ready → Closing → Closed
//!    └──────────────┴──────────────────────────────↗ (failure, early close)
//! ```

use crate::codec;
use crate::command::{Command, Topic};
use crate::frame::Frame;
use crate::identify::{IdentifyBody, ServerIdentity};
use crate::ready::ReadyState;
use crate::registry::ConnectionManager;
use crate::transport::{Transport, TransportId};
use async_lock::RwLock;
use bytes::Bytes;
use parking_lot::Mutex;
use skiff_core::address::BrokerAddress;
use skiff_core::deadline::Deadline;
use skiff_core::error::{Result, SkiffError};
use skiff_core::options::ClientOptions;
use skiff_core::poison::PoisonGuard;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleState {
    /// Transport attached, nothing sent yet
    Created = 0,
    /// Magic + IDENTIFY sent, waiting for the daemon
    HandshakeInFlight = 1,
    /// Handshake done, commands may flow
    Ready = 2,
    /// CLS sent (or being sent)
    Closing = 3,
    /// Transport released
    Closed = 4,
}

impl LifecycleState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::HandshakeInFlight,
            2 => Self::Ready,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Returns true once the connection has started (or finished) shutting down.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// A connection to one daemon: handshake, correlation, flow control, ordering.
pub struct Connection {
    id: u64,
    address: BrokerAddress,
    transport: Arc<dyn Transport>,
    options: Arc<ClientOptions>,

    /// Shared: correlation. Exclusive: handshake, close, disconnect.
    lock: RwLock<()>,
    state: AtomicU8,
    /// Set once an exchange was abandoned mid-flight; never cleared.
    poisoned: AtomicBool,

    outbound_tx: flume::Sender<&'static str>,
    outbound_rx: flume::Receiver<&'static str>,
    inbound_tx: flume::Sender<Frame>,
    inbound_rx: flume::Receiver<Frame>,

    pub(crate) ready: Arc<ReadyState>,

    /// (internal id, disk queue offset) of the latest accepted ordered message
    watermark: Mutex<(i64, i64)>,
    /// Millis since the epoch, 0 = never
    last_msg_received: AtomicU64,
    last_consumption_failed: AtomicU64,

    topic: parking_lot::RwLock<Option<Topic>>,
    server_identity: parking_lot::RwLock<Option<ServerIdentity>>,
}

impl Connection {
    /// Wrap a freshly opened transport.
    ///
    /// The connection starts in `Created`; call `initialize()` before
    /// issuing commands.
    pub fn new(
        id: u64,
        address: BrokerAddress,
        transport: Arc<dyn Transport>,
        options: Arc<ClientOptions>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = flume::bounded(1);
        let (inbound_tx, inbound_rx) = flume::bounded(1);
        let ready = Arc::new(ReadyState::new(options.rdy));

        debug!(
            conn_id = id,
            %address,
            transport = %transport.id(),
            "[CONN] Connection created"
        );

        Self {
            id,
            address,
            transport,
            options,
            lock: RwLock::new(()),
            state: AtomicU8::new(LifecycleState::Created as u8),
            poisoned: AtomicBool::new(false),
            outbound_tx,
            outbound_rx,
            inbound_tx,
            inbound_rx,
            ready,
            watermark: Mutex::new((-1, -1)),
            last_msg_received: AtomicU64::new(0),
            last_consumption_failed: AtomicU64::new(0),
            topic: parking_lot::RwLock::new(None),
            server_identity: parking_lot::RwLock::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    /// Perform the handshake: magic preamble, then IDENTIFY.
    ///
    /// Only the first call does anything; later calls return `Ok(())` while
    /// the connection is usable.
    ///
    /// # Errors
    ///
    /// - `HandshakeFailure` if the daemon's answer is missing or invalid; the
    ///   transport is released and the connection must not be reused
    /// - `TransportClosed` if the connection was already closed
    pub async fn initialize(&self) -> Result<()> {
        let _exclusive = self.lock.write().await;
        self.handshake_locked().await
    }

    /// Handshake, then bind the connection to `topic`.
    pub async fn initialize_with_topic(&self, topic: Topic) -> Result<()> {
        let _exclusive = self.lock.write().await;
        self.handshake_locked().await?;
        debug!(conn_id = self.id, %topic, "[CONN] Bound to topic");
        *self.topic.write() = Some(topic);
        Ok(())
    }

    async fn handshake_locked(&self) -> Result<()> {
        if !self.transition(LifecycleState::Created, LifecycleState::HandshakeInFlight) {
            let state = self.state();
            trace!(conn_id = self.id, ?state, "[CONN] Handshake already done");
            return if state.is_terminal() {
                Err(SkiffError::TransportClosed { intentional: true })
            } else {
                Ok(())
            };
        }

        debug!(conn_id = self.id, address = %self.address, "[HANDSHAKE] Starting");
        match self.perform_handshake().await {
            Ok(identity) => {
                if let Some(identity) = identity {
                    if let Some(max) = identity.max_rdy_count {
                        self.ready.cap_expected(max);
                    }
                    debug!(conn_id = self.id, ?identity, "[HANDSHAKE] Negotiated");
                    *self.server_identity.write() = Some(identity);
                }
                self.set_state(LifecycleState::Ready);
                info!(conn_id = self.id, address = %self.address, "[HANDSHAKE] Complete");
                Ok(())
            }
            Err(e) => {
                error!(
                    conn_id = self.id,
                    address = %self.address,
                    error = %e,
                    "[HANDSHAKE] Bad identify response, closing connection"
                );
                self.release_transport().await;
                self.set_state(LifecycleState::Closed);
                Err(match e {
                    SkiffError::HandshakeFailure(_) => e,
                    other => SkiffError::handshake(other.to_string()),
                })
            }
        }
    }

    async fn perform_handshake(&self) -> Result<Option<ServerIdentity>> {
        let deadline = Deadline::after(self.options.query_timeout);
        let magic = codec::encode(&Command::Magic)?;
        match deadline.run(self.transport.send(magic)).await {
            Ok(Ok(())) => trace!(conn_id = self.id, "[HANDSHAKE] Sent magic"),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(timeout_error("MAGIC", "transmit", &deadline)),
        }

        let body = IdentifyBody::from_options(&self.options).to_bytes()?;
        let frame = self.correlate(&Command::Identify(body), deadline).await?;
        match frame {
            Frame::Response(data) => ServerIdentity::parse(&data),
            Frame::Error(data) => Err(SkiffError::handshake(format!(
                "daemon rejected IDENTIFY: {}",
                String::from_utf8_lossy(&data)
            ))),
            Frame::Message(_) => Err(SkiffError::handshake("message frame in reply to IDENTIFY")),
        }
    }

    // ------------------------------------------------------------------
    // Command correlation
    // ------------------------------------------------------------------

    /// Send `cmd` and wait for the daemon's answer.
    ///
    /// One shared budget (`query_timeout`) covers acquiring the single-flight
    /// slot, transmitting, and receiving the response; it is not reset
    /// between phases.
    ///
    /// # Errors
    ///
    /// - `TransportClosed` immediately if the connection is not open
    /// - `ProtocolTimeout` if the budget runs out in any phase
    /// - `Io` if the transmit failed
    pub async fn send_and_await(&self, cmd: &Command) -> Result<Frame> {
        if !cmd.expects_response() {
            return Err(SkiffError::protocol(format!(
                "{} has no response; use send()",
                cmd.name()
            )));
        }
        self.ensure_open()?;

        let deadline = Deadline::after(self.options.query_timeout);
        let _shared = deadline
            .run(self.lock.read())
            .await
            .map_err(|_| timeout_error(cmd.name(), "lock", &deadline))?;
        // close() may have run while we queued for the lock
        self.ensure_open()?;

        self.correlate(cmd, deadline).await
    }

    /// Transmit `cmd` without waiting for a response (FIN, REQ, TOUCH, NOP).
    pub async fn send(&self, cmd: &Command) -> Result<()> {
        self.ensure_open()?;
        let deadline = Deadline::after(self.options.query_timeout);
        let bytes = codec::encode(cmd)?;
        match deadline.run(self.transport.send(bytes)).await {
            Ok(result) => result.map_err(SkiffError::from),
            Err(_) => Err(timeout_error(cmd.name(), "transmit", &deadline)),
        }
    }

    async fn correlate(&self, cmd: &Command, deadline: Deadline) -> Result<Frame> {
        let name = cmd.name();
        let bytes = codec::encode(cmd)?;

        match deadline.run(self.outbound_tx.send_async(name)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(SkiffError::TransportClosed { intentional: true }),
            Err(_) => {
                debug!(conn_id = self.id, command = name, "[CONN] Another command still in flight");
                return Err(timeout_error(name, "slot", &deadline));
            }
        }
        let _slot = SlotPermit {
            rx: &self.outbound_rx,
        };

        let in_flight = InFlight::arm(self);
        let result = self.exchange(name, bytes, &deadline).await;
        in_flight.finish();
        result
    }

    async fn exchange(&self, name: &'static str, bytes: Bytes, deadline: &Deadline) -> Result<Frame> {
        let stale = self.inbound_rx.drain().count();
        if stale > 0 {
            warn!(conn_id = self.id, stale, "[CONN] Discarded unclaimed responses");
        }

        trace!(conn_id = self.id, command = name, len = bytes.len(), "[CONN] Sending");
        match deadline.run(self.transport.send(bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(conn_id = self.id, command = name, error = %e, "[CONN] Transmit failed");
                return Err(e.into());
            }
            Err(_) => return Err(timeout_error(name, "transmit", deadline)),
        }

        match deadline.run(self.inbound_rx.recv_async()).await {
            Ok(Ok(frame)) => {
                trace!(conn_id = self.id, command = name, ?frame, "[CONN] Response");
                Ok(frame)
            }
            Ok(Err(_)) => Err(SkiffError::TransportClosed { intentional: true }),
            Err(_) => Err(timeout_error(name, "response", deadline)),
        }
    }

    // ------------------------------------------------------------------
    // Inbound delivery (called by the dispatcher)
    // ------------------------------------------------------------------

    /// Hand a response frame to the waiting command.
    ///
    /// Waits up to twice the query budget for the inbound slot. A response
    /// with no outstanding command is logged and dropped.
    pub async fn deliver_response(&self, frame: Frame) {
        if self.outbound_rx.is_empty() {
            error!(
                conn_id = self.id,
                ?frame,
                "[CONN] No request to send, but got a frame from the server"
            );
            return;
        }
        self.push_inbound(frame, self.options.query_timeout * 2).await;
    }

    /// Hand an error frame to the waiting command.
    pub async fn deliver_error(&self, frame: Frame) {
        self.push_inbound(frame, self.options.query_timeout).await;
    }

    async fn push_inbound(&self, frame: Frame, budget: Duration) {
        match Deadline::after(budget).run(self.inbound_tx.send_async(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!(conn_id = self.id, "[CONN] Inbound slot gone, frame dropped"),
            Err(_) => warn!(
                conn_id = self.id,
                ?budget,
                "[CONN] Inbound slot still full, frame dropped"
            ),
        }
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Validate and advance the ordering watermark.
    ///
    /// Always true unless the connection is configured for strict ordering.
    /// Otherwise true only if both components are at or above the current
    /// watermark, in which case the watermark moves to the new pair. A false
    /// return leaves the watermark untouched; the caller must not treat the
    /// message as ordered.
    pub fn check_order(&self, internal_id: i64, disk_queue_offset: i64) -> bool {
        if !self.options.ordered {
            return true;
        }

        let mut watermark = self.watermark.lock();
        let (latest_id, latest_offset) = *watermark;
        if internal_id >= latest_id && disk_queue_offset >= latest_offset {
            *watermark = (internal_id, disk_queue_offset);
            return true;
        }
        drop(watermark);

        warn!(
            conn_id = self.id,
            internal_id,
            disk_queue_offset,
            latest_id,
            latest_offset,
            "[CONN] InternalID or diskQueueOffset is NOT latest in current connection"
        );
        false
    }

    /// `check_order` as a `Result`.
    ///
    /// # Errors
    ///
    /// `OrderingViolation` carrying the rejected pair and the watermark.
    pub fn ensure_order(&self, internal_id: i64, disk_queue_offset: i64) -> Result<()> {
        if self.check_order(internal_id, disk_queue_offset) {
            return Ok(());
        }
        let (watermark_internal_id, watermark_disk_queue_offset) = self.watermark();
        Err(SkiffError::OrderingViolation {
            internal_id,
            disk_queue_offset,
            watermark_internal_id,
            watermark_disk_queue_offset,
        })
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Close the connection.
    ///
    /// CLS is attempted at most once, and only after a successful handshake;
    /// its failure is logged, never returned. The transport is released
    /// regardless. Calling `close()` again is harmless.
    pub async fn close(&self) {
        info!(conn_id = self.id, address = %self.address, "[CONN] Begin to clear");
        let _exclusive = self.lock.write().await;
        self.close_locked().await;
    }

    /// Back off, register this connection as backed off with `manager`,
    /// then close it.
    ///
    /// `RDY 0` is transmitted and awaited before CLS goes out.
    pub async fn disconnect(&self, manager: &dyn ConnectionManager) {
        let _exclusive = self.lock.write().await;
        info!(conn_id = self.id, address = %self.address, "[CONN] Disconnecting");
        self.backoff_inline().await;
        manager.register_backoff(self);
        self.close_locked().await;
        info!(conn_id = self.id, address = %self.address, "[CONN] Disconnected");
    }

    async fn close_locked(&self) {
        let closing = self.transition(LifecycleState::Ready, LifecycleState::Closing);
        if closing && !self.transport.is_active() {
            debug!(conn_id = self.id, "[CONN] Transport already gone, skipping CLS");
        } else if closing {
            let deadline = Deadline::after(self.options.query_timeout);
            match self.correlate(&Command::Cls, deadline).await {
                Ok(frame) if frame.is_close_wait() => {
                    debug!(conn_id = self.id, "[CONN] CLOSE_WAIT received");
                }
                Ok(frame) => {
                    debug!(conn_id = self.id, ?frame, "[CONN] Unexpected reply to CLS");
                }
                Err(e) if e.is_timeout() => {
                    warn!(conn_id = self.id, "[CONN] Timeout receiving response for CLS");
                }
                Err(e) => warn!(conn_id = self.id, error = %e, "[CONN] CLS failed"),
            }
        }

        self.release_transport().await;
        self.set_state(LifecycleState::Closed);
        info!(conn_id = self.id, address = %self.address, "[CONN] Cleared");
    }

    async fn release_transport(&self) {
        self.transport.deregister();
        if self.transport.is_active() {
            if let Err(e) = self.transport.shutdown().await {
                warn!(conn_id = self.id, error = %e, "[CONN] Transport shutdown failed");
            }
        }
    }

    /// Synchronous close for abandoned exchanges.
    ///
    /// The transport stops routing frames immediately; the socket itself is
    /// shut down by the next `close()`.
    fn force_close(&self, reason: &str) {
        error!(conn_id = self.id, address = %self.address, reason, "[CONN] Force-closing connection");
        self.set_state(LifecycleState::Closed);
        self.transport.deregister();
        // Nobody is left to claim a late response.
        let _ = self.inbound_rx.drain().count();
    }

    // ------------------------------------------------------------------
    // State helpers
    // ------------------------------------------------------------------

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set_state(&self, to: LifecycleState) {
        self.state.store(to as u8, Ordering::Release);
    }

    fn ensure_open(&self) -> Result<()> {
        let state = self.state();
        if !self.transport.is_active() || state.is_terminal() {
            return Err(SkiffError::TransportClosed {
                intentional: state.is_terminal(),
            });
        }
        if state != LifecycleState::Ready {
            return Err(SkiffError::protocol("connection is not initialized"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn address(&self) -> &BrokerAddress {
        &self.address
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport_id(&self) -> TransportId {
        self.transport.id()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true once the IDENTIFY handshake has been started.
    pub fn is_identity_sent(&self) -> bool {
        self.state() != LifecycleState::Created
    }

    /// Transport open and handshake complete.
    pub fn is_connected(&self) -> bool {
        self.transport.is_active() && self.state() == LifecycleState::Ready
    }

    /// Returns true if an exchange was abandoned mid-flight. A connection
    /// that is merely busy is not poisoned.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub fn topic(&self) -> Option<Topic> {
        self.topic.read().clone()
    }

    /// Settings the daemon reported in its IDENTIFY response.
    pub fn server_identity(&self) -> Option<ServerIdentity> {
        self.server_identity.read().clone()
    }

    /// Current ordering watermark `(internal id, disk queue offset)`.
    pub fn watermark(&self) -> (i64, i64) {
        *self.watermark.lock()
    }

    pub fn record_message_received(&self) {
        self.last_msg_received.store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_consumption_failed(&self) {
        self.last_consumption_failed.store(now_millis(), Ordering::Relaxed);
    }

    pub fn last_message_received(&self) -> Option<SystemTime> {
        from_millis(self.last_msg_received.load(Ordering::Relaxed))
    }

    pub fn last_consumption_failed(&self) -> Option<SystemTime> {
        from_millis(self.last_consumption_failed.load(Ordering::Relaxed))
    }

    pub(crate) fn transport_handle(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }
}

/// Holds the single-flight slot; drains it on every exit path.
struct SlotPermit<'a> {
    rx: &'a flume::Receiver<&'static str>,
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        let _ = self.rx.try_recv();
    }
}

/// Marks an exchange in flight. Dropped without `finish()`, the exchange was
/// abandoned and the connection is force-closed.
struct InFlight<'a> {
    conn: &'a Connection,
    guard: Option<PoisonGuard<'a>>,
}

impl<'a> InFlight<'a> {
    fn arm(conn: &'a Connection) -> Self {
        Self {
            conn,
            guard: Some(PoisonGuard::new(&conn.poisoned)),
        }
    }

    fn finish(mut self) {
        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            self.conn.force_close("exchange abandoned while waiting for the daemon");
        }
    }
}

fn timeout_error(command: &'static str, phase: &'static str, deadline: &Deadline) -> SkiffError {
    SkiffError::ProtocolTimeout {
        command,
        phase,
        budget: deadline.budget(),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(1)
        .max(1)
}

fn from_millis(ms: u64) -> Option<SystemTime> {
    (ms != 0).then(|| UNIX_EPOCH + Duration::from_millis(ms))
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.address == other.address
    }
}

impl Eq for Connection {}

impl PartialOrd for Connection {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Numeric id first; the address only breaks ties so `Ord` agrees with `Eq`.
impl Ord for Connection {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl std::hash::Hash for Connection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.address.hash(state);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection[id={}, address={}, state={:?}]", self.id, self.address, self.state())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("transport", &self.transport.id())
            .field("state", &self.state())
            .field("backoff", &self.ready.is_backed_off())
            .field("current_rdy", &self.ready.current())
            .field("watermark", &self.watermark())
            .finish()
    }
}
