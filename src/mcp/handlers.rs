//! HTTP request handlers for the SSE transport and the activity log
//!
//! The SSE transport decouples requests from responses: a client opens
//! `GET /mcp/sse`, reads the `endpoint` event, then POSTs each message to
//! that endpoint. Responses are pushed on the stream and also returned in
//! the POST body; clients dedupe by request id.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::mcp::activity::{ActivityEntry, ActivityKind, Transport};
use crate::mcp::http_transport::{loggable_body, parse_error_entry};
use crate::mcp::protocol::JsonRpcResponse;
use crate::mcp::session::SessionError;
use crate::mcp::sse::{self, ClientAddr};
use crate::mcp::McpState;

pub const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /mcp/sse - open a session stream
///
/// The first event is `endpoint` carrying the absolute URL to POST messages
/// to. Then every queued response arrives as a `message` event, with `ping`
/// events while idle.
pub async fn mcp_sse_handler(
    State(state): State<McpState>,
    ClientAddr(client): ClientAddr,
    headers: HeaderMap,
) -> Response {
    let (guard, rx) = state.sessions.open(client);
    let endpoint = sse::endpoint_url(&headers, &state.public_host, guard.id());

    tracing::debug!(session_id = %guard.id(), endpoint = %endpoint, "Advertising message endpoint");

    sse::sse_response(sse::session_frames(
        guard,
        rx,
        endpoint,
        state.keepalive,
        state.shutdown.clone(),
    ))
}

/// POST /mcp/messages?session_id=<id> - relay a message into a session
///
/// # Returns
///
/// * `200 OK` with the JSON-RPC response, which is also queued on the stream
/// * `202 Accepted` for notifications
/// * `400 Bad Request` when the body is not JSON (the parse error is queued)
/// * `404 Not Found` when the session does not exist
pub async fn mcp_message_handler(
    State(state): State<McpState>,
    ClientAddr(client): ClientAddr,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<Response> {
    let session_id = query
        .session_id
        .filter(|id| state.sessions.contains(id))
        .ok_or(AppError::SessionNotFound)?;

    let request = loggable_body(&body);
    let logged = match &request {
        Ok(value) | Err(value) => value.clone(),
    };
    state.activity.record(
        ActivityEntry::new(ActivityKind::Request, client.clone())
            .session(session_id.clone())
            .transport(Transport::Sse)
            .data(logged),
    );

    let request = match request {
        Ok(request) => request,
        Err(raw) => {
            let response = JsonRpcResponse::parse_error();
            state.activity.record(
                parse_error_entry(&client, Transport::Sse, &raw, &response)
                    .session(session_id.clone()),
            );
            enqueue(&state, &client, &session_id, response).await;
            return Err(AppError::ParseError);
        }
    };

    let Some(response) = state.service.handle_value(request).await else {
        return Ok(StatusCode::ACCEPTED.into_response());
    };

    state.activity.record(
        ActivityEntry::new(ActivityKind::Response, client.clone())
            .session(session_id.clone())
            .transport(Transport::Sse)
            .data(json!(response)),
    );

    enqueue(&state, &client, &session_id, response.clone()).await;

    Ok((StatusCode::OK, Json(response)).into_response())
}

async fn enqueue(state: &McpState, client: &str, session_id: &str, response: JsonRpcResponse) {
    match state.sessions.deliver(session_id, response).await {
        Ok(()) => {}
        Err(e @ SessionError::DeliveryTimeout { .. }) => {
            tracing::warn!(session_id = %session_id, error = %e, "Session queue full");
            state.activity.record(
                ActivityEntry::new(ActivityKind::Error, client)
                    .session(session_id)
                    .transport(Transport::Sse)
                    .data(json!({ "error": e.to_string() })),
            );
        }
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Dropping message for closed session");
        }
    }
}

/// GET /mcp/logs?limit=<n> - recent activity, oldest first
pub async fn mcp_logs_handler(
    State(state): State<McpState>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .min(state.activity.capacity());
    let logs = state.activity.recent(limit);

    Json(json!({
        "count": logs.len(),
        "logs": logs,
        "active_sessions": state.sessions.count(),
        "session_ids": state.sessions.ids(),
    }))
}

/// GET /mcp/logs/stream - live activity feed as `log` events
pub async fn mcp_logs_stream_handler(State(state): State<McpState>) -> impl IntoResponse {
    let subscription = state.activity.subscribe();
    sse::sse_response(sse::log_frames(
        subscription,
        state.keepalive,
        state.shutdown.clone(),
    ))
}
