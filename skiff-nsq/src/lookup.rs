//! Broker discovery through lookup servers.
//!
//! A `LookupService` holds a sorted list of lookup-server addresses and
//! spreads queries over them round-robin. A background task periodically asks
//! one of them for the current set of lookup servers and swaps the list
//! wholesale.
//!
//! # Selection
//!
//! The rotating offset starts at a random value in `[0, 100)`. Every query
//! (including refreshes) advances it by one and uses `offset mod N` against
//! the list snapshot it read. The increment is a plain load + store: two
//! concurrent queries may pick the same server, which is harmless.
//!
//! # Responses
//!
//! Lookup servers answer either with a bare JSON document or one wrapped in a
//! `{"status_code":..,"data":{..}}` envelope; both are accepted.

use crate::http::{CompioHttpClient, LookupHttp};
use parking_lot::RwLock;
use rand::Rng;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use skiff_core::address::BrokerAddress;
use skiff_core::error::SkiffError;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Discovery failures.
///
/// None of these affect later queries; the next call simply tries the next
/// lookup server.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Topic is blank")]
    BlankTopic,

    #[error("No lookup addresses configured")]
    NoAddresses,

    #[error("Invalid lookup address '{0}'")]
    InvalidAddress(String),

    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("Lookup server {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed lookup response from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Lookup request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<LookupError> for SkiffError {
    fn from(e: LookupError) -> Self {
        SkiffError::discovery(e.to_string())
    }
}

/// Discovery tuning.
#[derive(Debug, Clone)]
pub struct LookupOptions {
    /// Time between background refreshes (default: 60s)
    pub refresh_interval: Duration,

    /// Earliest first refresh (default: 45s)
    pub initial_delay: Duration,

    /// Random extra delay added to the first refresh, drawn from
    /// `[0, initial_jitter)` (default: 60s)
    pub initial_jitter: Duration,

    /// Budget for one HTTP request (default: 5s)
    pub http_timeout: Duration,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(45),
            initial_jitter: Duration::from_secs(60),
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl LookupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// First refresh fires after `delay + rand[0, jitter)`.
    pub const fn with_initial_delay(mut self, delay: Duration, jitter: Duration) -> Self {
        self.initial_delay = delay;
        self.initial_jitter = jitter;
        self
    }

    pub const fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    fn first_refresh_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.initial_jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.initial_delay + Duration::from_millis(extra)
    }
}

// ----------------------------------------------------------------------
// Response models
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LookupData {
    producers: Vec<Producer>,
    #[serde(default)]
    partitions: HashMap<String, Producer>,
}

#[derive(Debug, Deserialize)]
struct Producer {
    broadcast_address: String,
    #[serde(deserialize_with = "port")]
    tcp_port: u16,
    #[serde(default)]
    partition: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct TopicsData {
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListLookupData {
    lookupdnodes: Vec<LookupNode>,
}

#[derive(Debug, Deserialize)]
struct LookupNode {
    #[serde(rename = "NodeIP")]
    node_ip: String,
    #[serde(rename = "HttpPort", deserialize_with = "port")]
    http_port: u16,
}

/// Ports arrive as numbers or as strings depending on the server version.
fn port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

// ----------------------------------------------------------------------
// Service
// ----------------------------------------------------------------------

struct Inner {
    addresses: RwLock<Arc<Vec<String>>>,
    offset: AtomicUsize,
    http: Box<dyn LookupHttp>,
    options: LookupOptions,
}

/// Round-robin client over a set of lookup servers.
pub struct LookupService {
    inner: Arc<Inner>,
    stop: parking_lot::Mutex<Option<flume::Sender<()>>>,
}

impl LookupService {
    /// Build a service over `addresses` using the built-in HTTP client.
    ///
    /// # Errors
    ///
    /// `NoAddresses` if nothing usable remains after trimming,
    /// `InvalidAddress` if an entry is not `host:port`.
    pub fn new<I, S>(addresses: I) -> Result<Self, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let options = LookupOptions::default();
        let http = CompioHttpClient::new(options.http_timeout);
        Self::with_http(addresses, http, options)
    }

    /// Build a service from a comma-separated address list.
    pub fn parse(addresses: &str) -> Result<Self, LookupError> {
        Self::new(addresses.split(','))
    }

    /// Build a service with a custom HTTP implementation.
    pub fn with_http<I, S, H>(addresses: I, http: H, options: LookupOptions) -> Result<Self, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        H: LookupHttp + 'static,
    {
        let addresses = normalize(addresses)?;
        let seed = rand::thread_rng().gen_range(0..100);
        debug!(?addresses, seed, "[LOOKUP] Service created");

        Ok(Self {
            inner: Arc::new(Inner {
                addresses: RwLock::new(Arc::new(addresses)),
                offset: AtomicUsize::new(seed),
                http: Box::new(http),
                options,
            }),
            stop: parking_lot::Mutex::new(None),
        })
    }

    /// Current lookup-server list, sorted.
    pub fn addresses(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.inner.addresses.read())
    }

    /// Current value of the rotating offset.
    pub fn offset(&self) -> usize {
        self.inner.offset.load(Ordering::Relaxed)
    }

    /// Brokers serving `topic`, for writing (`writable`) or reading.
    ///
    /// An empty set is a valid answer.
    pub async fn find(&self, topic: &str, writable: bool) -> Result<BTreeSet<BrokerAddress>, LookupError> {
        if topic.trim().is_empty() {
            return Err(LookupError::BlankTopic);
        }

        let server = self.inner.next_server()?;
        let mut url = base_url(&server, "lookup")?;
        url.query_pairs_mut()
            .append_pair("topic", topic)
            .append_pair("access", if writable { "w" } else { "r" });
        debug!(%url, "[LOOKUP] Begin to lookup some DataNodes");

        let data: LookupData = self.inner.fetch(&url).await?;
        let brokers = collect_brokers(data);
        trace!(%url, ?brokers, "[LOOKUP] DataNodes");
        Ok(brokers)
    }

    /// Every topic the lookup server knows about.
    pub async fn list_topics(&self) -> Result<HashSet<String>, LookupError> {
        let server = self.inner.next_server()?;
        let url = base_url(&server, "topics")?;
        debug!(%url, "[LOOKUP] Begin to lookup all the topics");

        let data: TopicsData = self.inner.fetch(&url).await?;
        Ok(data
            .topics
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect())
    }

    /// Run one refresh cycle now.
    ///
    /// Returns true if the address list was replaced. An empty answer keeps
    /// the current list.
    pub async fn refresh_now(&self) -> Result<bool, LookupError> {
        self.inner.refresh().await
    }

    /// Start the background refresh task. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut stop = self.stop.lock();
        if stop.is_some() {
            return;
        }
        let (tx, rx) = flume::bounded::<()>(1);
        *stop = Some(tx);
        drop(stop);

        let inner = Arc::clone(&self.inner);
        let first = inner.options.first_refresh_delay();
        info!(first_refresh = ?first, interval = ?inner.options.refresh_interval, "[LOOKUP] Refresh task started");

        compio::runtime::spawn(async move {
            use futures::{select, FutureExt};

            let mut delay = first;
            loop {
                select! {
                    _ = compio::time::sleep(delay).fuse() => {}
                    _ = rx.recv_async().fuse() => break,
                }
                if let Err(e) = inner.refresh().await {
                    error!(error = %e, "[LOOKUP] Refresh failed");
                }
                delay = inner.options.refresh_interval;
            }
            debug!("[LOOKUP] Refresh task stopped");
        })
        .detach();
    }

    /// Stop the background refresh. Queries already running complete.
    pub fn shutdown(&self) {
        if let Some(tx) = self.stop.lock().take() {
            let _ = tx.try_send(());
            info!("[LOOKUP] Shutdown requested");
        }
    }
}

impl Drop for LookupService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LookupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupService")
            .field("addresses", &self.addresses())
            .field("offset", &self.offset())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Inner {
    fn next_server(&self) -> Result<String, LookupError> {
        let snapshot = Arc::clone(&self.addresses.read());
        if snapshot.is_empty() {
            return Err(LookupError::NoAddresses);
        }
        let offset = self.offset.load(Ordering::Relaxed).wrapping_add(1);
        self.offset.store(offset, Ordering::Relaxed);
        let index = offset % snapshot.len();
        trace!(size = snapshot.len(), index, "[LOOKUP] Selected server");
        Ok(snapshot[index].clone())
    }

    async fn fetch<T>(&self, url: &Url) -> Result<T, LookupError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body = self.http.get(url).await?;
        decode(&body).map_err(|source| LookupError::Json {
            url: url.to_string(),
            source,
        })
    }

    async fn refresh(&self) -> Result<bool, LookupError> {
        let server = self.next_server()?;
        let url = base_url(&server, "listlookup")?;
        debug!(%url, "[LOOKUP] Begin to get the new lookup servers");

        let data: ListLookupData = self.fetch(&url).await?;
        let mut fresh: Vec<String> = data
            .lookupdnodes
            .into_iter()
            .map(|n| format!("{}:{}", n.node_ip.trim(), n.http_port))
            .collect();
        if fresh.is_empty() {
            warn!(%url, "[LOOKUP] Server responded without any lookupd, keeping current list");
            return Ok(false);
        }
        fresh.sort();
        fresh.dedup();

        info!(addresses = ?fresh, "[LOOKUP] Having got the new lookup servers");
        *self.addresses.write() = Arc::new(fresh);
        Ok(true)
    }
}

/// Unwrap the optional `{"status_code":..,"data":..}` envelope, then decode
/// strictly. A `data` key that is present must hold a valid document; `null`
/// included, it is never treated as an empty answer.
fn decode<T>(body: &[u8]) -> Result<T, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    let mut root: Value = serde_json::from_slice(body)?;
    let document = match root.as_object_mut().and_then(|map| map.remove("data")) {
        Some(data) => data,
        None => root,
    };
    T::deserialize(document)
}

fn normalize<I, S>(addresses: I) -> Result<Vec<String>, LookupError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for raw in addresses {
        let addr: String = raw.as_ref().trim().chars().filter(|c| *c != ' ').collect();
        if addr.is_empty() {
            continue;
        }
        BrokerAddress::parse(&addr).map_err(|_| LookupError::InvalidAddress(addr.clone()))?;
        out.push(addr);
    }
    if out.is_empty() {
        return Err(LookupError::NoAddresses);
    }
    out.sort();
    Ok(out)
}

fn base_url(server: &str, path: &str) -> Result<Url, LookupError> {
    Url::parse(&format!("http://{server}/{path}"))
        .map_err(|_| LookupError::InvalidAddress(server.to_string()))
}

fn collect_brokers(data: LookupData) -> BTreeSet<BrokerAddress> {
    let partitioned = data.partitions.into_iter().filter_map(|(id, producer)| match id.parse() {
        Ok(partition) => Some(BrokerAddress::with_partition(
            producer.broadcast_address,
            producer.tcp_port,
            partition,
        )),
        Err(_) => {
            warn!(partition = %id, "[LOOKUP] Skipping producer with non-numeric partition");
            None
        }
    });

    data.producers
        .into_iter()
        .map(|p| match p.partition {
            Some(partition) => BrokerAddress::with_partition(p.broadcast_address, p.tcp_port, partition),
            None => BrokerAddress::new(p.broadcast_address, p.tcp_port),
        })
        .chain(partitioned)
        .collect()
}
