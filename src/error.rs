use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::mcp::protocol::error_codes;

// Type alias for Result with our AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// HTTP-facing errors for the MCP transport endpoints
///
/// These short-circuit before the JSON-RPC dispatcher: they never carry a
/// JSON-RPC envelope, only a small JSON acknowledgement.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Parse error")]
    ParseError,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::SessionNotFound => (StatusCode::NOT_FOUND, "Session not found".to_string()),
            AppError::ParseError => (StatusCode::BAD_REQUEST, "Parse error".to_string()),
            AppError::Registry(e) => {
                tracing::error!(error = %e, "Registry failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": error_message }))).into_response()
    }
}

/// Errors raised by the capability registry adapter
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid parameter definitions for capability '{capability}': {source}")]
    InvalidParameters {
        capability: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while resolving caller arguments against parameter definitions
#[derive(Debug, Error, PartialEq)]
pub enum ParameterError {
    #[error("Required parameter '{0}' not provided")]
    Missing(String),

    #[error("Cannot convert value '{value}' to type '{param_type}'")]
    Conversion { value: String, param_type: String },
}

/// Errors raised by a SQL execution backend
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unsupported database type: {0}")]
    UnsupportedDatabase(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Query(String),

    #[error("Query timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Error types for JSON-RPC dispatch
///
/// Every variant except [`McpServiceError::MethodNotFound`] and
/// [`McpServiceError::InvalidRequest`] is a handler-level business failure
/// and maps to the generic server error code `-32000`. The `Display` text is
/// what the calling assistant sees in `error.message`.
#[derive(Debug, Error)]
pub enum McpServiceError {
    /// The request named a method this server does not implement
    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    /// The body was JSON but not a request object
    #[error("Invalid Request")]
    InvalidRequest,

    #[error("Tool name is required")]
    ToolNameRequired,

    /// Tool does not exist, or exists but is not live
    #[error("Tool '{0}' not found or not live")]
    ToolNotFound(String),

    #[error("Database connection for tool '{0}' not found")]
    ConnectionNotFound(String),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error("Query execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to serialize result: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl McpServiceError {
    /// JSON-RPC error code reported for this failure
    pub fn code(&self) -> i32 {
        match self {
            McpServiceError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpServiceError::InvalidRequest => error_codes::INVALID_REQUEST,
            _ => error_codes::SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_failures_use_server_error_code() {
        let errors = [
            McpServiceError::ToolNameRequired,
            McpServiceError::ToolNotFound("x".into()),
            McpServiceError::ConnectionNotFound("x".into()),
            McpServiceError::Parameter(ParameterError::Missing("limit".into())),
            McpServiceError::Execution(ExecutionError::Timeout(30)),
        ];
        for err in errors {
            assert_eq!(err.code(), -32000, "{err}");
        }
        assert_eq!(McpServiceError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(McpServiceError::InvalidRequest.code(), -32600);
    }

    #[test]
    fn messages_name_the_tool() {
        assert_eq!(
            McpServiceError::ToolNotFound("list_orders".into()).to_string(),
            "Tool 'list_orders' not found or not live"
        );
        assert_eq!(
            McpServiceError::ConnectionNotFound("list_orders".into()).to_string(),
            "Database connection for tool 'list_orders' not found"
        );
        assert_eq!(
            McpServiceError::Execution(ExecutionError::Query("no such table: t".into()))
                .to_string(),
            "Query execution failed: no such table: t"
        );
    }
}
