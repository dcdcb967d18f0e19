//! HTTP GET for lookup queries.
//!
//! Requests go through `cyper`, a hyper client running on the compio
//! runtime, so framing (`Content-Length`, chunked bodies, keep-alive) is
//! handled by hyper.

use crate::lookup::LookupError;
use async_trait::async_trait;
use bytes::Bytes;
use compio::time::timeout;
use http::header::{HeaderMap, HeaderValue, ACCEPT};
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Media type lookup servers expect for their versioned JSON answers.
pub const ACCEPT_HEADER: &str = "application/vnd.nsq; version=1.0";

/// Fetches a lookup URL and returns the response body.
#[async_trait(?Send)]
pub trait LookupHttp {
    /// GET `url`.
    ///
    /// # Errors
    ///
    /// `Status` for non-2xx answers, `Timeout` or `Http` for transport
    /// failures.
    async fn get(&self, url: &Url) -> Result<Bytes, LookupError>;
}

/// `LookupHttp` over a `cyper` client.
#[derive(Clone)]
pub struct CompioHttpClient {
    client: cyper::Client,
    headers: HeaderMap,
    timeout: Duration,
}

impl CompioHttpClient {
    pub fn new(timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HEADER));
        Self {
            client: cyper::Client::new(),
            headers,
            timeout,
        }
    }

    async fn request(&self, url: &Url) -> Result<Bytes, LookupError> {
        let failed = |e: cyper::Error| LookupError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url.clone())
            .map_err(failed)?
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(failed)?;

        let status = response.status();
        trace!(%url, %status, "[HTTP] Response received");
        if !status.is_success() {
            return Err(LookupError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.bytes().await.map_err(failed)
    }
}

impl std::fmt::Debug for CompioHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompioHttpClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait(?Send)]
impl LookupHttp for CompioHttpClient {
    async fn get(&self, url: &Url) -> Result<Bytes, LookupError> {
        match timeout(self.timeout, self.request(url)).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compio::buf::BufResult;
    use compio::io::{AsyncRead, AsyncWriteExt};
    use compio::net::TcpListener;
    use std::net::SocketAddr;

    /// Serve one request with `reply`, keeping the socket open until the test
    /// drops the returned sender. Yields the raw request text.
    async fn serve_once(
        reply: &'static [u8],
    ) -> (SocketAddr, flume::Receiver<String>, flume::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = flume::bounded(1);
        let (hold_tx, hold_rx) = flume::bounded::<()>(1);

        compio::runtime::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let BufResult(res, buf) = stream.read(Vec::with_capacity(1024)).await;
                assert!(res.unwrap() > 0, "client closed before finishing the request");
                request.extend_from_slice(&buf);
            }
            let BufResult(res, _) = stream.write_all(reply.to_vec()).await;
            res.unwrap();
            seen_tx.send(String::from_utf8(request).unwrap()).unwrap();
            let _ = hold_rx.recv_async().await;
        })
        .detach();

        (addr, seen_rx, hold_tx)
    }

    #[compio::test]
    async fn test_get_sends_accept_header_on_kept_alive_socket() {
        let (addr, seen, _hold) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n{\"topics\":[\"t\"]}",
        )
        .await;

        // The server never closes: the body must end at Content-Length.
        let client = CompioHttpClient::new(Duration::from_secs(2));
        let url = Url::parse(&format!("http://{addr}/topics")).unwrap();
        let body = client.get(&url).await.unwrap();
        assert_eq!(&body[..], b"{\"topics\":[\"t\"]}");

        let request = seen.recv_async().await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /topics http/1.1\r\n"));
        assert!(request.contains("accept: application/vnd.nsq; version=1.0\r\n"));
    }

    #[compio::test]
    async fn test_get_reads_chunked_body() {
        let (addr, _seen, _hold) = serve_once(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n6\r\n{\"topi\r\na\r\ncs\":[\"t\"]}\r\n0\r\n\r\n",
        )
        .await;

        let client = CompioHttpClient::new(Duration::from_secs(2));
        let url = Url::parse(&format!("http://{addr}/topics")).unwrap();
        let body = client.get(&url).await.unwrap();
        assert_eq!(&body[..], b"{\"topics\":[\"t\"]}");
    }

    #[compio::test]
    async fn test_get_maps_error_status() {
        let (addr, _seen, _hold) = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 29\r\n\r\n{\"message\":\"TOPIC_NOT_FOUND\"}",
        )
        .await;

        let client = CompioHttpClient::new(Duration::from_secs(2));
        let url = Url::parse(&format!("http://{addr}/lookup?topic=x&access=r")).unwrap();
        let err = client.get(&url).await.unwrap_err();
        assert!(matches!(err, LookupError::Status { status: 404, .. }));
    }

    #[compio::test]
    async fn test_get_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = CompioHttpClient::new(Duration::from_millis(100));
        let url = Url::parse(&format!("http://{addr}/topics")).unwrap();
        let err = client.get(&url).await.unwrap_err();
        assert!(matches!(err, LookupError::Timeout { .. }));
        drop(listener);
    }
}
