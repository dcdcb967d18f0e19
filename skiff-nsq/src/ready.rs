//! RDY flow control.
//!
//! The ready count is the number of in-flight messages the daemon may push to
//! this connection. Updates are fire-and-forget: the RDY command is
//! transmitted on a detached task and the counters only move once the
//! transmit completed. A failed transmit is logged and the callback is not
//! invoked.

use crate::codec;
use crate::command::Command;
use crate::connection::Connection;
use crate::transport::Transport;
use parking_lot::Mutex;
use skiff_core::address::BrokerAddress;
use skiff_core::deadline::Deadline;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ready-count bookkeeping shared with in-flight RDY tasks.
#[derive(Debug)]
pub(crate) struct ReadyState {
    current: AtomicI32,
    last: AtomicI32,
    expected: AtomicI32,
    configured: i32,
    server_max: AtomicI32,
    backoff: AtomicBool,
    /// Serializes (current, last) updates
    apply_lock: Mutex<()>,
}

impl ReadyState {
    pub(crate) fn new(configured: i32) -> Self {
        Self {
            current: AtomicI32::new(1),
            last: AtomicI32::new(1),
            expected: AtomicI32::new(configured),
            configured,
            server_max: AtomicI32::new(i32::MAX),
            backoff: AtomicBool::new(false),
            apply_lock: Mutex::new(()),
        }
    }

    pub(crate) fn current(&self) -> i32 {
        self.current.load(Ordering::Acquire)
    }

    pub(crate) fn last(&self) -> i32 {
        self.last.load(Ordering::Acquire)
    }

    pub(crate) fn expected(&self) -> i32 {
        self.expected.load(Ordering::Acquire)
    }

    pub(crate) fn is_backed_off(&self) -> bool {
        self.backoff.load(Ordering::Acquire)
    }

    /// Record a transmitted RDY. Returns the previous current count.
    fn apply(&self, count: i32) -> i32 {
        let _serial = self.apply_lock.lock();
        self.swap_current(count)
    }

    /// Like `apply`, but a non-zero count that completes after a backoff is
    /// dropped so it cannot reopen the window. Returns `None` when dropped.
    fn apply_unless_backed_off(&self, count: i32) -> Option<i32> {
        let _serial = self.apply_lock.lock();
        if count != 0 && self.is_backed_off() {
            return None;
        }
        Some(self.swap_current(count))
    }

    fn swap_current(&self, count: i32) -> i32 {
        let previous = self.current.swap(count, Ordering::AcqRel);
        if previous != count {
            self.last.store(previous, Ordering::Release);
        }
        previous
    }

    /// Lower the window to the daemon's `max_rdy_count`.
    pub(crate) fn cap_expected(&self, max: i32) {
        let max = max.max(0);
        self.server_max.store(max, Ordering::Release);
        let _ = self
            .expected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |e| (e > max).then_some(max));
    }

    fn ceiling(&self) -> i32 {
        self.configured.min(self.server_max.load(Ordering::Acquire))
    }
}

impl Connection {
    /// Ask the daemon for a ready count of `count`, clamped to
    /// `[0, expected_rdy]`.
    ///
    /// `on_updated(new, previous)` runs once the RDY command was transmitted.
    /// If the connection is closed or backed off nothing is sent and the
    /// callback runs immediately with `(current, current)`.
    pub fn set_ready<F>(&self, count: i32, on_updated: F)
    where
        F: FnOnce(i32, i32) + 'static,
    {
        let current = self.ready.current();
        if !self.is_connected() {
            info!(conn_id = self.id(), "[RDY] Connection is closed. Ready update quit");
            on_updated(current, current);
            return;
        }
        if self.ready.is_backed_off() {
            info!(conn_id = self.id(), count, "[RDY] Connection is backed off. Ready update quit");
            on_updated(current, current);
            return;
        }

        let count = count.clamp(0, self.ready.expected().max(0));
        self.spawn_rdy(count, move |ready| settle_update(ready, count, on_updated));
    }

    /// Pause delivery by sending `RDY 0`.
    ///
    /// On the first call the previous ready count is kept so `resume()` can
    /// restore it. `on_updated(0, previous)` runs once `RDY 0` was
    /// transmitted; an already backed-off or closed connection gets `(0, 0)`.
    pub fn backoff<F>(&self, on_updated: F)
    where
        F: FnOnce(i32, i32) + 'static,
    {
        if !self.is_connected() {
            info!(conn_id = self.id(), "[RDY] Connection is closed. Backoff quit");
            on_updated(0, 0);
            return;
        }

        if self
            .ready
            .backoff
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(conn_id = self.id(), "[RDY] Backing off");
            self.spawn_rdy(0, move |ready| {
                let previous = ready.apply(0);
                on_updated(0, previous);
            });
        } else {
            info!(conn_id = self.id(), "[RDY] Connection already backed off");
            on_updated(0, 0);
        }
    }

    /// Leave backoff by re-sending the ready count held before it.
    pub fn resume<F>(&self, on_updated: F)
    where
        F: FnOnce(i32, i32) + 'static,
    {
        let current = self.ready.current();
        if !self.is_connected() {
            info!(conn_id = self.id(), "[RDY] Connection is closed. Resume quit");
            on_updated(current, current);
            return;
        }

        if self
            .ready
            .backoff
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let count = self.ready.last().clamp(0, self.ready.expected().max(0));
            debug!(conn_id = self.id(), count, "[RDY] Resuming");
            self.spawn_rdy(count, move |ready| settle_update(ready, count, on_updated));
        } else {
            info!(conn_id = self.id(), "[RDY] Connection not backed off");
            on_updated(current, current);
        }
    }

    /// Enter backoff and wait for `RDY 0` to be transmitted.
    ///
    /// Used on the way out, before CLS, so the pause reaches the daemon ahead
    /// of the close. Does nothing if the connection is not connected or is
    /// already backed off.
    pub(crate) async fn backoff_inline(&self) {
        if !self.is_connected() {
            return;
        }
        if self
            .ready
            .backoff
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(conn_id = self.id(), "[RDY] Already backed off before close");
            return;
        }

        let sent = transmit_rdy(
            self.transport_handle(),
            self.id(),
            self.address(),
            self.options().query_timeout,
            0,
        )
        .await;
        if sent {
            self.ready.apply(0);
        }
    }

    /// Grow the expected window by one, up to the configured rdy and the
    /// daemon's `max_rdy_count`. Returns the new value.
    pub fn increase_expected_rdy(&self) -> i32 {
        let ceiling = self.ready.ceiling();
        match self.ready.expected.fetch_update(Ordering::AcqRel, Ordering::Acquire, |e| {
            (e < ceiling).then_some(e + 1)
        }) {
            Ok(previous) => previous + 1,
            Err(unchanged) => unchanged,
        }
    }

    /// Shrink the expected window by one, never below zero. Returns the new
    /// value.
    pub fn decline_expected_rdy(&self) -> i32 {
        match self
            .ready
            .expected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |e| (e > 0).then_some(e - 1))
        {
            Ok(previous) => previous - 1,
            Err(unchanged) => unchanged,
        }
    }

    pub fn current_rdy(&self) -> i32 {
        self.ready.current()
    }

    pub fn last_rdy(&self) -> i32 {
        self.ready.last()
    }

    pub fn expected_rdy(&self) -> i32 {
        self.ready.expected()
    }

    pub fn is_backed_off(&self) -> bool {
        self.ready.is_backed_off()
    }

    fn spawn_rdy<F>(&self, count: i32, on_sent: F)
    where
        F: FnOnce(&ReadyState) + 'static,
    {
        let transport = self.transport_handle();
        let ready = Arc::clone(&self.ready);
        let conn_id = self.id();
        let address = self.address().clone();
        let budget = self.options().query_timeout;

        compio::runtime::spawn(async move {
            if transmit_rdy(transport, conn_id, &address, budget, count).await {
                on_sent(&ready);
            }
        })
        .detach();
    }
}

/// Apply a transmitted `count` and report it, unless a backoff overtook it.
fn settle_update<F>(ready: &ReadyState, count: i32, on_updated: F)
where
    F: FnOnce(i32, i32),
{
    match ready.apply_unless_backed_off(count) {
        Some(previous) => on_updated(count, previous),
        None => {
            debug!(count, "[RDY] Stale update completed after backoff, ignored");
            let current = ready.current();
            on_updated(current, current);
        }
    }
}

/// Encode and transmit `RDY count` under the query budget. Returns true once
/// the bytes went out; failures are logged only.
async fn transmit_rdy(
    transport: Arc<dyn Transport>,
    conn_id: u64,
    address: &BrokerAddress,
    budget: Duration,
    count: i32,
) -> bool {
    let bytes = match codec::encode(&Command::Rdy(count)) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(conn_id, %address, error = %e, "[RDY] Cannot encode RDY {}", count);
            return false;
        }
    };
    match Deadline::after(budget).run(transport.send(bytes)).await {
        Ok(Ok(())) => {
            debug!(conn_id, %address, count, "[RDY] Updated");
            true
        }
        Ok(Err(e)) => {
            warn!(conn_id, %address, error = %e, "[RDY] Fail to update RDY {}", count);
            false
        }
        Err(_) => {
            warn!(conn_id, %address, ?budget, "[RDY] Timed out sending RDY {}", count);
            false
        }
    }
}
