//! Stdio to SSE bridge
//!
//! Lets a client that only speaks MCP over stdio talk to a remote server's
//! SSE transport. Three tasks run concurrently:
//!
//! - the stdin reader frames JSON values from raw bytes
//! - the SSE reader learns the message endpoint and writes every pushed
//!   `message` event to stdout as one line
//! - the forwarder waits for the endpoint, then POSTs each framed message
//!
//! Stdin EOF ends the bridge once already-read messages are forwarded.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpgen::bridge::{self, BridgeConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), mcpgen::bridge::BridgeError> {
//! let config = BridgeConfig::new("http://127.0.0.1:8000/mcp/sse", Duration::from_secs(30))?;
//! bridge::run(config, tokio::io::stdin(), tokio::io::stdout()).await?;
//! # Ok(())
//! # }
//! ```

pub mod framing;

pub use framing::JsonFramer;

use crate::mcp::protocol::{error_codes, JsonRpcResponse};
use eventsource_client as es;
use es::Client as _;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};

const READ_BUFFER_SIZE: usize = 8192;
const FORWARD_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid SSE URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to connect to SSE: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub sse_url: Url,
    /// How long a message waits for the endpoint event before it is failed
    pub connect_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(sse_url: &str, connect_timeout: Duration) -> Result<Self, BridgeError> {
        let sse_url = Url::parse(sse_url).map_err(|e| BridgeError::InvalidUrl {
            url: sse_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            sse_url,
            connect_timeout,
        })
    }
}

type SharedOutput<W> = Arc<Mutex<W>>;

async fn write_line<W>(output: &SharedOutput<W>, line: &str)
where
    W: AsyncWrite + Unpin,
{
    let mut out = output.lock().await;
    let result = async {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }
    .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "Failed to write to stdout");
    }
}

/// Run the bridge until `input` reaches EOF
pub async fn run<R, W>(config: BridgeConfig, mut input: R, output: W) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let client = reqwest::Client::new();

    tracing::info!(url = %config.sse_url, "Connecting to SSE endpoint");
    let events = connect_events(&config.sse_url).await?;

    let output: SharedOutput<W> = Arc::new(Mutex::new(output));
    let (endpoint_tx, endpoint_rx) = watch::channel(None::<Url>);
    let (message_tx, message_rx) = mpsc::channel::<Value>(FORWARD_QUEUE_CAPACITY);

    let sse_task = tokio::spawn(read_events(
        events,
        config.sse_url.clone(),
        endpoint_tx,
        Arc::clone(&output),
    ));
    let forwarder = tokio::spawn(forward_messages(
        client,
        message_rx,
        endpoint_rx,
        config.connect_timeout,
        Arc::clone(&output),
    ));

    let mut framer = JsonFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    'read: loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        framer.push(&buf[..n]);
        for message in framer.drain_messages() {
            if message_tx.send(message).await.is_err() {
                tracing::error!("Forwarder stopped, closing bridge");
                break 'read;
            }
        }
    }

    if framer.pending() > 0 {
        tracing::warn!(bytes = framer.pending(), "Incomplete message at end of input");
    }
    tracing::info!("Input closed, draining pending messages");

    drop(message_tx);
    if let Err(e) = forwarder.await {
        tracing::error!(error = %e, "Forwarder task failed");
    }
    sse_task.abort();

    Ok(())
}

type EventStream = BoxStream<'static, Result<es::SSE, es::Error>>;

/// Open the SSE stream and wait for the server to accept it. Reconnection is
/// disabled: once the stream ends the bridge stops receiving responses.
async fn connect_events(url: &Url) -> Result<EventStream, BridgeError> {
    let client = es::ClientBuilder::for_url(url.as_str())
        .map_err(|e| BridgeError::Connect(e.to_string()))?
        .reconnect(es::ReconnectOptions::reconnect(false).build())
        .build();

    let mut events: EventStream = client.stream().boxed();
    loop {
        match events.next().await {
            Some(Ok(es::SSE::Connected(_))) => return Ok(events),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(BridgeError::Connect(e.to_string())),
            None => return Err(BridgeError::Connect("stream closed before connecting".into())),
        }
    }
}

async fn read_events<W>(
    mut events: EventStream,
    base: Url,
    endpoint_tx: watch::Sender<Option<Url>>,
    output: SharedOutput<W>,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let event = match events.next().await {
            Some(Ok(es::SSE::Event(event))) => event,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::error!(error = %e, "SSE stream failed");
                break;
            }
            None => {
                tracing::warn!("SSE stream closed by server");
                break;
            }
        };

        match event.event_type.as_str() {
            "endpoint" => match base.join(event.data.trim()) {
                Ok(url) => {
                    tracing::info!(endpoint = %url, "Message endpoint received");
                    endpoint_tx.send_replace(Some(url));
                }
                Err(e) => tracing::error!(data = %event.data, error = %e, "Invalid endpoint event"),
            },
            "message" => match serde_json::from_str::<Value>(&event.data) {
                Ok(message) => write_line(&output, &message.to_string()).await,
                Err(e) => tracing::warn!(error = %e, "Dropping non-JSON message event"),
            },
            "ping" => {}
            other => tracing::debug!(event = %other, "Ignoring SSE event"),
        }
    }
}

async fn forward_messages<W>(
    client: reqwest::Client,
    mut messages: mpsc::Receiver<Value>,
    mut endpoint_rx: watch::Receiver<Option<Url>>,
    connect_timeout: Duration,
    output: SharedOutput<W>,
) where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(message) = messages.recv().await {
        let endpoint: Option<Url> =
            match tokio::time::timeout(connect_timeout, endpoint_rx.wait_for(Option::is_some)).await
            {
                Ok(Ok(endpoint)) => endpoint.clone(),
                _ => None,
            };

        let Some(endpoint) = endpoint else {
            tracing::error!("No message endpoint within {:?}", connect_timeout);
            if let Some(id) = message.get("id").filter(|id| !id.is_null()) {
                let failure = JsonRpcResponse::error(
                    id.clone(),
                    error_codes::SERVER_ERROR,
                    "Bridge not connected: no message endpoint received",
                );
                match serde_json::to_string(&failure) {
                    Ok(line) => write_line(&output, &line).await,
                    Err(e) => tracing::error!(error = %e, "Failed to encode bridge error"),
                }
            }
            continue;
        };

        match client.post(endpoint).json(&message).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Message send failed")
            }
            Err(e) => tracing::error!(error = %e, "Message send error"),
        }
    }
}
