//! JSON-RPC dispatcher for the MCP protocol
//!
//! [`McpService`] decodes request envelopes, routes them by method name and
//! encodes the response envelope. It is transport-agnostic: the plain HTTP
//! endpoint and the SSE message endpoint both feed it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  McpService                         │
//! │  - initialize / ping                │
//! │  - tools/list                       │
//! │  - tools/call                       │
//! └──────────────┬──────────────────────┘
//!                │
//!                ├─> CapabilityRepository (every call, no cache)
//!                │   └─> live capabilities + connections
//!                │
//!                ├─> SchemaGenerator
//!                │   └─> inputSchema per capability
//!                │
//!                ├─> ParameterResolver
//!                │   └─> arguments checked before execution
//!                │
//!                └─> SqlExecutor
//!                    └─> rows as JSON
//! ```
//!
//! Failures never escape a handler. Unknown methods map to `-32601`,
//! everything a handler rejects maps to `-32000` with the failure's message.

use crate::error::McpServiceError;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::repositories::CapabilityRepository;
use crate::services::{ExecutionRequest, ParameterResolver, SchemaGenerator, SqlExecutor};
use rmcp::model::{CallToolResult, Content, Implementation, ProtocolVersion};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const SERVER_NAME: &str = "mcp-server-generator";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct McpService {
    registry: Arc<dyn CapabilityRepository>,
    executor: Arc<dyn SqlExecutor>,
    sql_timeout: Duration,
}

impl McpService {
    pub fn new(
        registry: Arc<dyn CapabilityRepository>,
        executor: Arc<dyn SqlExecutor>,
        sql_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            sql_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<dyn CapabilityRepository> {
        &self.registry
    }

    /// Handle a raw request body
    ///
    /// # Arguments
    ///
    /// * `body` - Bytes exactly as received from the transport
    ///
    /// # Returns
    ///
    /// * `Some(response)` - The envelope to send back, success or JSON-RPC error
    /// * `None` - The message was a notification and no response is owed
    ///
    /// # Errors
    ///
    /// Failures never escape as `Err`. A body that is not JSON yields the
    /// `-32700` parse-error envelope with a `null` id, and dispatch failures
    /// become error envelopes carrying the request id.
    pub async fn handle_body(&self, body: &[u8]) -> Option<JsonRpcResponse> {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting malformed JSON-RPC body");
                Some(JsonRpcResponse::parse_error())
            }
        }
    }

    /// Handle an already-decoded JSON value
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        if !value.is_object() {
            return Some(JsonRpcResponse::invalid_request());
        }

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(_) => Some(JsonRpcResponse::error(
                id,
                McpServiceError::InvalidRequest.code(),
                McpServiceError::InvalidRequest.to_string(),
            )),
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.response_id();
        tracing::debug!(method = %request.method, id = %id, "Dispatching request");

        let response = match self.dispatch(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::debug!(method = %request.method, error = %e, "Request failed");
                JsonRpcResponse::error(id, e.code(), e.to_string())
            }
        };

        Some(response)
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpServiceError> {
        match method {
            "initialize" => Ok(Self::initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools().await,
            "tools/call" => self.call_tool(params.unwrap_or(Value::Null)).await,
            other => Err(McpServiceError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize_result() -> Value {
        let server_info = Implementation {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
            title: None,
            website_url: None,
            icons: None,
        };

        json!({
            "protocolVersion": ProtocolVersion::V_2024_11_05,
            "capabilities": { "tools": {} },
            "serverInfo": server_info,
        })
    }

    async fn list_tools(&self) -> Result<Value, McpServiceError> {
        let tools: Vec<_> = self
            .registry
            .list_live()
            .await?
            .iter()
            .map(SchemaGenerator::tool_definition)
            .collect();

        Ok(json!({ "tools": tools }))
    }

    async fn call_tool(&self, params: Value) -> Result<Value, McpServiceError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or(McpServiceError::ToolNameRequired)?;

        let arguments: Map<String, Value> = params
            .get("arguments")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let capability = self
            .registry
            .find_live_by_name(name)
            .await?
            .ok_or_else(|| McpServiceError::ToolNotFound(name.to_string()))?;

        let connection = self
            .registry
            .get_connection(capability.connection_id)
            .await?
            .ok_or_else(|| McpServiceError::ConnectionNotFound(name.to_string()))?;

        // Rejected calls never reach the data source
        let resolved = ParameterResolver::resolve(
            &capability.sql_template,
            &arguments,
            &capability.parameters,
        )?;

        tracing::info!(tool = %name, connection = %connection.name, "Executing tool");

        let rows = self
            .executor
            .execute(
                connection,
                ExecutionRequest {
                    sql_template: capability.sql_template,
                    arguments: resolved,
                    parameters: capability.parameters,
                    timeout: self.sql_timeout,
                },
            )
            .await?;

        let text = serde_json::to_string_pretty(&rows)?;
        let result = CallToolResult::success(vec![Content::text(text)]);
        Ok(serde_json::to_value(result)?)
    }
}
