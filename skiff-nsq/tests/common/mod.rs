//! Shared fixtures: an in-memory transport and a scripted daemon.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use skiff_core::address::BrokerAddress;
use skiff_core::options::ClientOptions;
use skiff_nsq::{Connection, Frame, Transport, TransportId};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport that records every write instead of touching a socket.
pub struct MockTransport {
    id: TransportId,
    active: AtomicBool,
    fail_sends: AtomicBool,
    deregistered: AtomicUsize,
    shutdowns: AtomicUsize,
    /// Writes starting with this prefix complete only after the delay.
    slow_prefix: Mutex<Option<(&'static [u8], Duration)>>,
    sent: flume::Sender<Bytes>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, flume::Receiver<Bytes>) {
        let (tx, rx) = flume::unbounded();
        let transport = Arc::new(Self {
            id: TransportId::next(),
            active: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            deregistered: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            slow_prefix: Mutex::new(None),
            sent: tx,
        });
        (transport, rx)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn slow_sends(&self, prefix: &'static [u8], delay: Duration) {
        *self.slow_prefix.lock().unwrap() = Some((prefix, delay));
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn deregister_count(&self) -> usize {
        self.deregistered.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    async fn send(&self, bytes: Bytes) -> io::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        let delay = match *self.slow_prefix.lock().unwrap() {
            Some((prefix, delay)) if bytes.starts_with(prefix) => Some(delay),
            _ => None,
        };
        if let Some(delay) = delay {
            compio::time::sleep(delay).await;
        }
        let _ = self.sent.send(bytes);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn deregister(&self) {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Fixture {
    pub conn: Arc<Connection>,
    pub transport: Arc<MockTransport>,
    pub wire: flume::Receiver<Bytes>,
}

pub fn options() -> ClientOptions {
    ClientOptions::default()
        .with_client_id("test-client")
        .with_hostname("test-host")
        .with_query_timeout(Duration::from_millis(200))
}

/// A connection in `Created` state.
pub fn fixture(options: ClientOptions) -> Fixture {
    fixture_with_id(1, options)
}

pub fn fixture_with_id(id: u64, options: ClientOptions) -> Fixture {
    let (transport, wire) = MockTransport::new();
    let conn = Arc::new(Connection::new(
        id,
        BrokerAddress::new("127.0.0.1", 4150),
        transport.clone(),
        Arc::new(options),
    ));
    Fixture {
        conn,
        transport,
        wire,
    }
}

/// A connection that completed the handshake with a plain `OK`.
pub async fn ready_fixture(options: ClientOptions) -> Fixture {
    let fx = fixture(options);
    let (result, ()) = futures::join!(fx.conn.initialize(), answer_handshake(&fx, "OK"));
    result.expect("handshake");
    fx
}

/// Play the daemon side of a handshake: consume magic + IDENTIFY, reply.
pub async fn answer_handshake(fx: &Fixture, reply: &str) {
    let magic = fx.wire.recv_async().await.unwrap();
    assert_eq!(&magic[..], b"  V2");
    let identify = fx.wire.recv_async().await.unwrap();
    assert!(identify.starts_with(b"IDENTIFY\n"));
    fx.conn
        .deliver_response(Frame::Response(Bytes::copy_from_slice(reply.as_bytes())))
        .await;
}

/// Wait for the next write and return it as text.
pub async fn next_line(wire: &flume::Receiver<Bytes>) -> String {
    let bytes = compio::time::timeout(Duration::from_secs(1), wire.recv_async())
        .await
        .expect("nothing written within 1s")
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Let detached tasks run.
pub async fn settle() {
    compio::time::sleep(Duration::from_millis(20)).await;
}
