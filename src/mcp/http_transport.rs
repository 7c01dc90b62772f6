//! Plain HTTP transport for MCP
//!
//! One JSON-RPC request per POST, answered synchronously. This is the
//! primary transport; SSE is for clients that need a push channel.
//!
//! # URL Structure
//!
//! - `POST /mcp` - Send JSON-RPC request, receive JSON response
//! - `GET /mcp` - Server info
//! - `OPTIONS /mcp` - CORS preflight
//!
//! # Usage
//!
//! ```http
//! POST /mcp
//! Content-Type: application/json
//!
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}
//! ```
//!
//! Response:
//! ```http
//! HTTP/1.1 200 OK
//! Content-Type: application/json
//!
//! {"jsonrpc":"2.0","id":1,"result":{...}}
//! ```

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::error::Result;
use crate::mcp::activity::{ActivityEntry, ActivityKind, Transport};
use crate::mcp::protocol::JsonRpcResponse;
use crate::mcp::service::SERVER_VERSION;
use crate::mcp::sse::ClientAddr;
use crate::mcp::McpState;

/// Decoded body for the activity log; undecodable input is kept as text
pub(crate) fn loggable_body(body: &[u8]) -> std::result::Result<Value, Value> {
    serde_json::from_slice::<Value>(body)
        .map_err(|_| json!({ "raw": String::from_utf8_lossy(body) }))
}

/// Error entry for a body that failed to parse, pairing the raw text with
/// the envelope sent back
pub(crate) fn parse_error_entry(
    client: &str,
    transport: Transport,
    raw: &Value,
    response: &JsonRpcResponse,
) -> ActivityEntry {
    ActivityEntry::new(ActivityKind::Error, client)
        .transport(transport)
        .data(json!({
            "raw": raw.get("raw").cloned().unwrap_or(Value::Null),
            "response": response,
        }))
}

/// POST /mcp - Plain HTTP transport
///
/// Always answers `200 OK` with a JSON-RPC envelope, parse errors included.
/// Notifications are acknowledged with `202 Accepted` and an empty body.
pub async fn handle_http_post(
    State(state): State<McpState>,
    ClientAddr(client): ClientAddr,
    body: Bytes,
) -> Response {
    let response = match loggable_body(&body) {
        Ok(request) => {
            state.activity.record(
                ActivityEntry::new(ActivityKind::Request, client.clone())
                    .transport(Transport::Http)
                    .data(request.clone()),
            );
            state.service.handle_value(request).await
        }
        Err(raw) => {
            state.activity.record(
                ActivityEntry::new(ActivityKind::Request, client.clone())
                    .transport(Transport::Http)
                    .data(raw.clone()),
            );
            let response = JsonRpcResponse::parse_error();
            state
                .activity
                .record(parse_error_entry(&client, Transport::Http, &raw, &response));
            Some(response)
        }
    };

    let Some(response) = response else {
        return StatusCode::ACCEPTED.into_response();
    };

    state.activity.record(
        ActivityEntry::new(ActivityKind::Response, client)
            .transport(Transport::Http)
            .data(json!(response)),
    );

    (StatusCode::OK, Json(response)).into_response()
}

/// GET /mcp - Server info and live capability count
pub async fn handle_http_info(State(state): State<McpState>) -> Result<Json<Value>> {
    let live_capabilities = state.service.registry().count_live().await?;

    Ok(Json(json!({
        "name": "MCP Server Generator",
        "version": SERVER_VERSION,
        "protocol_version": "2024-11-05",
        "live_capabilities": live_capabilities,
        "status": "running",
        "transports": ["http", "sse"],
        "sse_endpoint": "/mcp/sse",
    })))
}

/// OPTIONS on the POST routes - CORS preflight
///
/// # Returns
///
/// `204 No Content` with appropriate CORS headers
pub async fn handle_options() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("3600"),
    );

    (StatusCode::NO_CONTENT, headers).into_response()
}

/// GET /health
pub async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": SERVER_VERSION }))
}
