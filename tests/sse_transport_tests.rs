//! End-to-end tests for the SSE transport over a real TCP listener

use eventsource_client as es;
use es::Client as _;
use futures::stream::BoxStream;
use futures::StreamExt;
use mcpgen::{
    config::ServerConfig,
    mcp::activity::{ActivityKind, Transport},
    mcp::McpState,
    test_utils::test_helpers,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::NamedTempFile;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Received {
    event: String,
    data: String,
}

/// Client side of an SSE stream, read with the same client the bridge uses
struct EventStream {
    events: BoxStream<'static, Result<es::SSE, es::Error>>,
}

impl EventStream {
    async fn open(url: &str) -> Self {
        Self::open_with(url, &[]).await
    }

    async fn open_with(url: &str, headers: &[(&str, &str)]) -> Self {
        let mut builder = es::ClientBuilder::for_url(url).unwrap();
        for (name, value) in headers {
            builder = builder.header(name, value).unwrap();
        }
        let client = builder
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build();
        Self {
            events: client.stream().boxed(),
        }
    }

    /// Poll until the server has accepted the stream, so its subscription exists
    async fn connected(&mut self) {
        loop {
            let item = tokio::time::timeout(EVENT_TIMEOUT, self.events.next())
                .await
                .expect("timed out waiting for SSE connection");
            match item {
                Some(Ok(es::SSE::Connected(_))) => return,
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("SSE connection failed: {e:?}"),
                None => panic!("stream closed before connecting"),
            }
        }
    }

    /// Next dispatched event; `None` when the server ends the stream
    async fn next_event(&mut self) -> Option<Received> {
        loop {
            let item = tokio::time::timeout(EVENT_TIMEOUT, self.events.next())
                .await
                .expect("timed out waiting for SSE data");
            match item {
                Some(Ok(es::SSE::Event(event))) => {
                    return Some(Received {
                        event: event.event_type,
                        data: event.data.trim().to_string(),
                    })
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Next event that is not a keepalive ping
    async fn next_non_ping(&mut self) -> Received {
        loop {
            let event = self.next_event().await.expect("stream ended");
            if event.event != "ping" {
                return event;
            }
        }
    }
}

/// Raw text of an SSE response, for assertions on the wire framing itself
struct RawStream {
    response: reqwest::Response,
    text: String,
}

impl RawStream {
    async fn open(url: &str) -> Self {
        let response = reqwest::Client::new().get(url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        Self {
            response,
            text: String::new(),
        }
    }

    /// Read until `needle` has appeared `count` times in total
    async fn wait_for(&mut self, needle: &str, count: usize) {
        while self.text.matches(needle).count() < count {
            let chunk = tokio::time::timeout(EVENT_TIMEOUT, self.response.chunk())
                .await
                .expect("timed out waiting for SSE data")
                .unwrap()
                .expect("stream ended");
            self.text.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    fn endpoint(&self) -> Option<String> {
        let after = self.text.split("event: endpoint\n").nth(1)?;
        let line = after.lines().next()?;
        line.strip_prefix("data: ").map(|url| url.trim().to_string())
    }
}

struct Server {
    addr: SocketAddr,
    state: McpState,
    client: reqwest::Client,
    _target: NamedTempFile,
}

impl Server {
    async fn start() -> Self {
        Self::start_with(test_helpers::test_config()).await
    }

    async fn start_with(config: ServerConfig) -> Self {
        let pool = test_helpers::create_test_db().await.unwrap();
        let target = test_helpers::create_customers_db().await.unwrap();
        let connection_id =
            test_helpers::insert_connection(&pool, "crm", target.path().to_str().unwrap())
                .await
                .unwrap();
        test_helpers::insert_capability(
            &pool,
            connection_id,
            "list_active_customers",
            "SELECT id, name FROM customers WHERE active = 1 ORDER BY id",
            vec![],
            true,
        )
        .await
        .unwrap();

        let state = test_helpers::create_test_state(pool, &config);
        let addr = test_helpers::spawn_server(state.clone()).await.unwrap();

        Self {
            addr,
            state,
            client: reqwest::Client::new(),
            _target: target,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn open_session(&self) -> (EventStream, String) {
        let mut stream = EventStream::open(&self.url("/mcp/sse")).await;
        let endpoint = stream.next_event().await.unwrap();
        assert_eq!(endpoint.event, "endpoint");
        (stream, endpoint.data)
    }

    async fn post_message(&self, endpoint: &str, body: Value) -> reqwest::Response {
        self.client.post(endpoint).json(&body).send().await.unwrap()
    }

    async fn active_sessions(&self) -> i64 {
        let logs: Value = self
            .client
            .get(self.url("/mcp/logs"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        logs["active_sessions"].as_i64().unwrap()
    }

    async fn wait_for_sessions(&self, expected: i64) {
        for _ in 0..50 {
            if self.active_sessions().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("active sessions never reached {}", expected);
    }
}

#[tokio::test]
async fn endpoint_then_initialize_arrives_as_message() {
    let server = Server::start().await;
    let (mut stream, endpoint) = server.open_session().await;

    assert!(endpoint.starts_with(&format!("http://{}/mcp/messages?session_id=", server.addr)));

    let response = server
        .post_message(
            &endpoint,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let direct: Value = response.json().await.unwrap();
    assert_eq!(direct["result"]["protocolVersion"], "2024-11-05");

    let event = stream.next_non_ping().await;
    assert_eq!(event.event, "message");
    let pushed: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(pushed["id"], 1);
    assert_eq!(pushed["result"]["protocolVersion"], "2024-11-05");

    // Both deliveries carry the same envelope; clients dedupe by id
    assert_eq!(pushed, direct);
}

#[tokio::test]
async fn tool_call_over_sse() {
    let server = Server::start().await;
    let (mut stream, endpoint) = server.open_session().await;

    server
        .post_message(
            &endpoint,
            json!({"jsonrpc": "2.0", "id": "call-1", "method": "tools/call",
                   "params": {"name": "list_active_customers"}}),
        )
        .await;

    let event = stream.next_non_ping().await;
    let pushed: Value = serde_json::from_str(&event.data).unwrap();
    let content = &pushed["result"]["content"][0];
    assert_eq!(content["type"], "text");
    let rows: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
    assert_eq!(rows, json!([{"id": 1, "name": "Ada"}, {"id": 2, "name": "Grace"}]));
}

#[tokio::test]
async fn messages_arrive_in_post_order() {
    let server = Server::start().await;
    let (mut stream, endpoint) = server.open_session().await;

    for id in 1..=3 {
        let response = server
            .post_message(&endpoint, json!({"jsonrpc": "2.0", "id": id, "method": "ping"}))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    for expected in 1..=3 {
        let event = stream.next_non_ping().await;
        let pushed: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(pushed["id"], expected);
    }
}

#[tokio::test]
async fn concurrent_posts_to_one_session_arrive_exactly_once() {
    let server = Server::start_with(ServerConfig {
        session_queue_capacity: 2,
        ..test_helpers::test_config()
    })
    .await;
    let (mut stream, endpoint) = server.open_session().await;

    let posts = (0..16).map(|id| {
        server.post_message(&endpoint, json!({"jsonrpc": "2.0", "id": id, "method": "ping"}))
    });
    let reader = async {
        let mut seen = Vec::new();
        while seen.len() < 16 {
            let event = stream.next_non_ping().await;
            let pushed: Value = serde_json::from_str(&event.data).unwrap();
            seen.push(pushed["id"].as_i64().unwrap());
        }
        seen
    };

    let (responses, mut seen) = tokio::join!(futures::future::join_all(posts), reader);
    assert!(responses.iter().all(|r| r.status() == StatusCode::OK));
    seen.sort_unstable();
    assert_eq!(seen, (0..16).collect::<Vec<_>>());
}

#[tokio::test]
async fn idle_stream_receives_ping_and_stays_open() {
    let server = Server::start().await;
    let mut stream = RawStream::open(&server.url("/mcp/sse")).await;

    stream.wait_for("event: endpoint", 1).await;
    stream.wait_for("event: ping", 2).await;
    let endpoint = stream.endpoint().expect("endpoint frame");

    let response = server
        .post_message(&endpoint, json!({"jsonrpc": "2.0", "id": 9, "method": "ping"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    stream.wait_for("event: message", 1).await;
}

#[tokio::test]
async fn malformed_body_is_400_and_parse_error_is_pushed() {
    let server = Server::start().await;
    let (mut stream, endpoint) = server.open_session().await;

    let response = server
        .client
        .post(&endpoint)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Parse error"}));

    let event = stream.next_non_ping().await;
    let pushed: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(pushed["id"], Value::Null);
    assert_eq!(pushed["error"]["code"], -32700);

    let errors: Vec<_> = server
        .state
        .activity
        .recent(10)
        .into_iter()
        .filter(|entry| entry.kind == ActivityKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].transport, Some(Transport::Sse));
    assert!(errors[0].session_id.is_some());
    assert_eq!(errors[0].data["raw"], "{not json");
    assert_eq!(errors[0].data["response"]["error"]["code"], -32700);
}

#[tokio::test]
async fn session_is_gone_after_stream_closes() {
    let server = Server::start().await;
    let (stream, endpoint) = server.open_session().await;
    server.wait_for_sessions(1).await;

    drop(stream);
    server.wait_for_sessions(0).await;

    let response = server
        .post_message(&endpoint, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Session not found");

    let logs: Value = server
        .client
        .get(server.url("/mcp/logs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kinds: Vec<&str> = logs["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"connect"));
    assert!(kinds.contains(&"disconnect"));
}

#[tokio::test]
async fn post_without_session_id_is_404() {
    let server = Server::start().await;
    let response = server
        .post_message(
            &server.url("/mcp/messages"),
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn endpoint_honours_forwarded_headers() {
    let server = Server::start().await;
    let mut stream = EventStream::open_with(
        &server.url("/mcp/sse"),
        &[
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "mcp.example.com"),
        ],
    )
    .await;

    let endpoint = stream.next_event().await.unwrap();
    assert_eq!(endpoint.event, "endpoint");
    assert!(endpoint
        .data
        .starts_with("https://mcp.example.com/mcp/messages?session_id="));
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let server = Server::start().await;
    let (mut stream, _endpoint) = server.open_session().await;

    server.state.shutdown.cancel();

    loop {
        match stream.next_event().await {
            Some(event) => assert_eq!(event.event, "ping"),
            None => break,
        }
    }
    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn log_stream_pushes_new_entries() {
    let server = Server::start().await;
    let mut logs = EventStream::open(&server.url("/mcp/logs/stream")).await;
    logs.connected().await;

    let response = server
        .client
        .post(server.url("/mcp"))
        .json(&json!({"jsonrpc": "2.0", "id": 77, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let event = logs.next_non_ping().await;
    assert_eq!(event.event, "log");
    let entry: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(entry["type"], "request");
    assert_eq!(entry["transport"], "http");
    assert_eq!(entry["client"], "127.0.0.1");
    assert_eq!(entry["data"]["id"], 77);

    let event = logs.next_non_ping().await;
    let entry: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(entry["type"], "response");
}
