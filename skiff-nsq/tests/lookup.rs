//! Discovery against a scripted lookup server.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use skiff_core::address::BrokerAddress;
use skiff_nsq::{LookupError, LookupHttp, LookupOptions, LookupService};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
enum Reply {
    Body(&'static str),
    Status(u16),
}

#[derive(Default)]
struct State {
    requests: Mutex<Vec<Url>>,
    replies: Mutex<HashMap<&'static str, Reply>>,
}

#[derive(Clone, Default)]
struct MockHttp {
    state: Arc<State>,
}

impl MockHttp {
    fn reply(&self, path: &'static str, reply: Reply) {
        self.state.replies.lock().insert(path, reply);
    }

    fn requests(&self) -> Vec<Url> {
        self.state.requests.lock().clone()
    }
}

#[async_trait(?Send)]
impl LookupHttp for MockHttp {
    async fn get(&self, url: &Url) -> Result<Bytes, LookupError> {
        self.state.requests.lock().push(url.clone());
        let reply = self.state.replies.lock().get(url.path()).cloned();
        match reply {
            Some(Reply::Body(body)) => Ok(Bytes::from_static(body.as_bytes())),
            Some(Reply::Status(status)) => Err(LookupError::Status {
                url: url.to_string(),
                status,
            }),
            None => Err(LookupError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

fn service(addresses: &[&str]) -> (LookupService, MockHttp) {
    let http = MockHttp::default();
    let svc = LookupService::with_http(addresses.iter(), http.clone(), LookupOptions::default())
        .unwrap();
    (svc, http)
}

const PRODUCERS: &str = r#"{
    "status_code": 200,
    "status_txt": "OK",
    "data": {
        "channels": ["billing"],
        "producers": [
            {"remote_address": "10.0.0.2:51234", "broadcast_address": "10.0.0.2", "tcp_port": 4150, "http_port": 4151},
            {"remote_address": "10.0.0.1:51234", "broadcast_address": "10.0.0.1", "tcp_port": 4150, "http_port": 4151},
            {"remote_address": "10.0.0.1:51235", "broadcast_address": "10.0.0.1", "tcp_port": 4150, "http_port": 4151}
        ]
    }
}"#;

#[test]
fn test_construction_normalizes_addresses() {
    let svc = LookupService::parse(" 10.0.0.3:4161 ,10.0.0.1: 4161,, 10.0.0.2:4161").unwrap();
    assert_eq!(
        svc.addresses().as_slice(),
        ["10.0.0.1:4161", "10.0.0.2:4161", "10.0.0.3:4161"]
    );
    assert!(svc.offset() < 100);
}

#[test]
fn test_construction_rejects_blank_input() {
    assert!(matches!(LookupService::parse(""), Err(LookupError::NoAddresses)));
    assert!(matches!(LookupService::parse(" , "), Err(LookupError::NoAddresses)));
}

#[compio::test]
async fn test_round_robin_over_sorted_addresses() {
    let (svc, http) = service(&["c:4161", "a:4161", "b:4161"]);
    http.reply("/lookup", Reply::Body(PRODUCERS));

    let sorted = svc.addresses();
    let seed = svc.offset();
    for m in 1..=7 {
        svc.find("orders", true).await.unwrap();
        let hit = http.requests().last().unwrap().clone();
        let expected = &sorted[(seed + m) % sorted.len()];
        assert_eq!(hit.authority(), expected.as_str(), "call {m}");
    }
}

#[compio::test]
async fn test_find_builds_query_and_collects_producers() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    http.reply("/lookup", Reply::Body(PRODUCERS));

    let brokers: Vec<_> = svc.find("orders", true).await.unwrap().into_iter().collect();
    assert_eq!(
        brokers,
        vec![
            BrokerAddress::new("10.0.0.1", 4150),
            BrokerAddress::new("10.0.0.2", 4150),
        ]
    );

    svc.find("orders", false).await.unwrap();
    let requests = http.requests();
    assert_eq!(requests[0].as_str(), "http://127.0.0.1:4161/lookup?topic=orders&access=w");
    assert_eq!(requests[1].query(), Some("topic=orders&access=r"));
}

#[compio::test]
async fn test_find_bare_document_with_partitions() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    http.reply(
        "/lookup",
        Reply::Body(
            r#"{"partitions":{
                "0":{"broadcast_address":"10.0.0.1","tcp_port":4150},
                "1":{"broadcast_address":"10.0.0.2","tcp_port":4150}
            },"producers":[]}"#,
        ),
    );

    let brokers: Vec<_> = svc.find("orders", true).await.unwrap().into_iter().collect();
    assert_eq!(
        brokers,
        vec![
            BrokerAddress::with_partition("10.0.0.1", 4150, 0),
            BrokerAddress::with_partition("10.0.0.2", 4150, 1),
        ]
    );
}

#[compio::test]
async fn test_find_empty_result_is_ok() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    http.reply("/lookup", Reply::Body(r#"{"data":{"producers":[]}}"#));
    assert!(svc.find("orders", true).await.unwrap().is_empty());
}

#[compio::test]
async fn test_find_malformed_reply_is_not_an_empty_answer() {
    let (svc, http) = service(&["127.0.0.1:4161"]);

    http.reply(
        "/lookup",
        Reply::Body(r#"{"status_code":200,"data":{"producers":[{"broadcast_address":"a"}]}}"#),
    );
    assert!(matches!(
        svc.find("orders", true).await,
        Err(LookupError::Json { .. })
    ));

    http.reply(
        "/lookup",
        Reply::Body(r#"{"status_code":500,"status_txt":"INTERNAL_ERROR","data":null}"#),
    );
    let err = svc.find("orders", true).await.unwrap_err();
    assert!(matches!(err, LookupError::Json { .. }));
    let err: skiff_core::error::SkiffError = err.into();
    assert!(matches!(err, skiff_core::error::SkiffError::Discovery(_)));
}

#[compio::test]
async fn test_refresh_with_null_data_keeps_list() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    http.reply("/listlookup", Reply::Body(r#"{"status_code":500,"data":null}"#));

    assert!(matches!(svc.refresh_now().await, Err(LookupError::Json { .. })));
    assert_eq!(*svc.addresses(), vec!["127.0.0.1:4161".to_string()]);
}

#[compio::test]
async fn test_find_blank_topic_makes_no_request() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    assert!(matches!(svc.find("  ", true).await, Err(LookupError::BlankTopic)));
    assert!(http.requests().is_empty());
}

#[compio::test]
async fn test_failures_do_not_stick() {
    let (svc, http) = service(&["127.0.0.1:4161"]);

    http.reply("/lookup", Reply::Status(500));
    let err = svc.find("orders", true).await.unwrap_err();
    assert!(matches!(err, LookupError::Status { status: 500, .. }));

    http.reply("/lookup", Reply::Body("not json"));
    assert!(matches!(
        svc.find("orders", true).await,
        Err(LookupError::Json { .. })
    ));

    http.reply("/lookup", Reply::Body(PRODUCERS));
    assert_eq!(svc.find("orders", true).await.unwrap().len(), 2);
}

#[compio::test]
async fn test_list_topics_skips_blank_names() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    http.reply("/topics", Reply::Body(r#"{"data":{"topics":["orders","","payments"]}}"#));

    let topics = svc.list_topics().await.unwrap();
    assert_eq!(topics.len(), 2);
    assert!(topics.contains("orders"));
    assert!(topics.contains("payments"));
}

#[compio::test]
async fn test_refresh_replaces_list() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    http.reply(
        "/listlookup",
        Reply::Body(
            r#"{"data":{"lookupdnodes":[
                {"ID":"2","NodeIP":"10.0.0.9","TcpPort":"4160","HttpPort":"4161"},
                {"ID":"1","NodeIP":"10.0.0.8","TcpPort":"4160","HttpPort":"4161"}
            ]}}"#,
        ),
    );

    assert!(svc.refresh_now().await.unwrap());
    assert_eq!(svc.addresses().as_slice(), ["10.0.0.8:4161", "10.0.0.9:4161"]);
}

#[compio::test]
async fn test_refresh_keeps_list_on_empty_or_failure() {
    let (svc, http) = service(&["127.0.0.1:4161"]);
    let before = svc.addresses();

    http.reply("/listlookup", Reply::Body(r#"{"data":{"lookupdnodes":[]}}"#));
    assert!(!svc.refresh_now().await.unwrap());
    assert_eq!(svc.addresses(), before);

    http.reply("/listlookup", Reply::Status(503));
    assert!(svc.refresh_now().await.is_err());
    assert_eq!(svc.addresses(), before);
}

#[compio::test]
async fn test_background_refresh_and_shutdown() {
    let http = MockHttp::default();
    http.reply(
        "/listlookup",
        Reply::Body(r#"{"lookupdnodes":[{"NodeIP":"10.0.0.7","HttpPort":4161}]}"#),
    );
    let options = LookupOptions::new()
        .with_initial_delay(Duration::from_millis(10), Duration::ZERO)
        .with_refresh_interval(Duration::from_millis(20));
    let svc = LookupService::with_http(["127.0.0.1:4161"], http.clone(), options).unwrap();

    svc.start();
    svc.start();
    compio::time::sleep(Duration::from_millis(70)).await;
    assert_eq!(svc.addresses().as_slice(), ["10.0.0.7:4161"]);
    assert!(http.requests().len() >= 2, "refresh repeats on the interval");

    svc.shutdown();
    compio::time::sleep(Duration::from_millis(5)).await;
    let settled = http.requests().len();
    compio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(http.requests().len(), settled, "no refresh after shutdown");
}
