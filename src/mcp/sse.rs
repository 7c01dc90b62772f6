//! Server-Sent Events plumbing shared by the session and log streams
//!
//! Both streams are built with [`futures::stream::unfold`]: each step waits
//! for the next queued item or for the keepalive interval, whichever comes
//! first, and a shutdown token ends the stream. Dropping the stream drops its
//! state, which is how session cleanup runs on client disconnect.

use crate::mcp::activity::{ActivityEntry, ActivitySubscription};
use crate::mcp::protocol::JsonRpcResponse;
use crate::mcp::session::SessionGuard;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::{stream, Stream, StreamExt};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const MESSAGES_PATH: &str = "/mcp/messages";

/// One frame on an SSE stream
#[derive(Debug)]
pub enum SseFrame {
    Endpoint(String),
    Message(JsonRpcResponse),
    Log(ActivityEntry),
    Ping,
}

impl SseFrame {
    pub fn into_event(self) -> Result<Event, axum::Error> {
        match self {
            SseFrame::Endpoint(url) => Ok(Event::default().event("endpoint").data(url)),
            SseFrame::Message(response) => Event::default().event("message").json_data(response),
            SseFrame::Log(entry) => Event::default().event("log").json_data(entry),
            SseFrame::Ping => Ok(Event::default().event("ping").data("")),
        }
    }
}

struct SessionStream {
    guard: SessionGuard,
    rx: mpsc::Receiver<JsonRpcResponse>,
    endpoint: Option<String>,
    keepalive: Duration,
    shutdown: CancellationToken,
}

/// Frames for one session: the endpoint first, then queued messages with
/// pings while idle
pub fn session_frames(
    guard: SessionGuard,
    rx: mpsc::Receiver<JsonRpcResponse>,
    endpoint: String,
    keepalive: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = SseFrame> + Send + 'static {
    let state = SessionStream {
        guard,
        rx,
        endpoint: Some(endpoint),
        keepalive,
        shutdown,
    };

    stream::unfold(state, |mut state| async move {
        if let Some(endpoint) = state.endpoint.take() {
            return Some((SseFrame::Endpoint(endpoint), state));
        }

        let frame = tokio::select! {
            _ = state.shutdown.cancelled() => None,
            next = tokio::time::timeout(state.keepalive, state.rx.recv()) => match next {
                Ok(Some(response)) => Some(SseFrame::Message(response)),
                Ok(None) => None,
                Err(_) => Some(SseFrame::Ping),
            },
        };

        match frame {
            Some(frame) => Some((frame, state)),
            None => {
                tracing::debug!(session_id = %state.guard.id(), "Session stream ending");
                None
            }
        }
    })
}

struct LogStream {
    subscription: ActivitySubscription,
    keepalive: Duration,
    shutdown: CancellationToken,
}

/// Frames for the live activity feed
pub fn log_frames(
    subscription: ActivitySubscription,
    keepalive: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = SseFrame> + Send + 'static {
    let state = LogStream {
        subscription,
        keepalive,
        shutdown,
    };

    stream::unfold(state, |mut state| async move {
        let frame = tokio::select! {
            _ = state.shutdown.cancelled() => None,
            next = tokio::time::timeout(state.keepalive, state.subscription.recv()) => match next {
                Ok(Some(entry)) => Some(SseFrame::Log(entry)),
                Ok(None) => None,
                Err(_) => Some(SseFrame::Ping),
            },
        };
        frame.map(|frame| (frame, state))
    })
}

/// Wrap a frame stream as an SSE response with proxy buffering disabled
pub fn sse_response<S>(frames: S) -> Response
where
    S: Stream<Item = SseFrame> + Send + 'static,
{
    let events = frames.map(SseFrame::into_event);
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim())
        .filter(|value| !value.is_empty())
}

fn host_has_port(host: &str) -> bool {
    match host.rfind(']') {
        Some(bracket) => host[bracket..].contains(':'),
        None => host.contains(':'),
    }
}

/// Absolute message endpoint URL advertised to a new session
///
/// Honours `X-Forwarded-Proto`, `X-Forwarded-Host` and `X-Forwarded-Port`
/// so clients behind a reverse proxy post back through the proxy.
pub fn endpoint_url(headers: &HeaderMap, fallback_host: &str, session_id: &str) -> String {
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, header::HOST.as_str()))
        .unwrap_or(fallback_host);

    let mut authority = host.to_string();
    if let Some(port) = header_str(headers, "x-forwarded-port") {
        let default_port = match scheme {
            "https" => "443",
            _ => "80",
        };
        if !host_has_port(host) && port != default_port {
            authority = format!("{}:{}", host, port);
        }
    }

    format!(
        "{}://{}{}?session_id={}",
        scheme, authority, MESSAGES_PATH, session_id
    )
}

/// Best-effort client address: first `X-Forwarded-For` hop, then the peer
/// socket address, then `"unknown"`
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(forwarded) = header_str(&parts.headers, "x-forwarded-for") {
            return Ok(ClientAddr(forwarded.to_string()));
        }

        let client = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ClientAddr(client))
    }
}
