//! MCP protocol transport and session layer
//!
//! JSON-RPC 2.0 served over two transports that share one dispatcher:
//!
//! - plain HTTP request/response on `POST /mcp`
//! - Server-Sent Events on `GET /mcp/sse`, with requests relayed through
//!   `POST /mcp/messages?session_id=<id>` and responses pushed on the stream
//!
//! # Architecture
//!
//! - [`McpService`] - JSON-RPC dispatcher (initialize, tools/list, tools/call)
//! - [`SessionManager`] - session id to queue registry for SSE streams
//! - [`ActivityLog`] - ring buffer of protocol events with live subscribers
//! - [`router`] - axum routes wiring the transports to [`McpState`]
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpgen::config::ServerConfig;
//! use mcpgen::mcp::{self, McpService, McpState};
//! use mcpgen::repositories::SqliteCapabilityRepository;
//! use mcpgen::services::DatabaseExecutor;
//! use sqlx::SqlitePool;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(pool: SqlitePool, config: ServerConfig) {
//! let service = McpService::new(
//!     Arc::new(SqliteCapabilityRepository::new(pool)),
//!     Arc::new(DatabaseExecutor::new()),
//!     config.sql_timeout,
//! );
//! let state = McpState::new(service, &config, CancellationToken::new());
//! let app = mcp::router(state);
//! # }
//! ```

pub mod activity;
pub mod handlers;
pub mod http_transport;
pub mod protocol;
pub mod service;
pub mod session;
pub mod sse;

pub use activity::{ActivityEntry, ActivityKind, ActivityLog, Transport};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use service::McpService;
pub use session::{SessionError, SessionManager};

use crate::config::ServerConfig;
use axum::{
    http::{header, HeaderName},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Shared state for every MCP route
#[derive(Clone)]
pub struct McpState {
    pub service: McpService,
    pub sessions: Arc<SessionManager>,
    pub activity: Arc<ActivityLog>,
    pub keepalive: Duration,
    /// Host advertised in endpoint URLs when the request carries none
    pub public_host: String,
    /// Cancelled on shutdown to end open SSE streams
    pub shutdown: CancellationToken,
}

impl McpState {
    pub fn new(service: McpService, config: &ServerConfig, shutdown: CancellationToken) -> Self {
        let activity = Arc::new(ActivityLog::new(
            config.log_capacity,
            config.log_listener_capacity,
        ));
        let sessions = Arc::new(SessionManager::new(
            config.session_queue_capacity,
            config.session_send_timeout,
            Arc::clone(&activity),
        ));

        Self {
            service,
            sessions,
            activity,
            keepalive: config.keepalive,
            public_host: config.bind_addr().to_string(),
            shutdown,
        }
    }
}

pub fn router(state: McpState) -> Router {
    // MCP-specific headers like mcp-protocol-version must be listed explicitly
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::CACHE_CONTROL,
            header::USER_AGENT,
            HeaderName::from_static("mcp-protocol-version"),
        ])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route(
            "/mcp",
            post(http_transport::handle_http_post)
                .get(http_transport::handle_http_info)
                .options(http_transport::handle_options),
        )
        .route("/mcp/sse", get(handlers::mcp_sse_handler))
        .route(
            "/mcp/messages",
            post(handlers::mcp_message_handler).options(http_transport::handle_options),
        )
        .route("/mcp/logs", get(handlers::mcp_logs_handler))
        .route("/mcp/logs/stream", get(handlers::mcp_logs_stream_handler))
        .layer(cors_layer)
        .route("/health", get(http_transport::handle_health))
        .with_state(state)
}
