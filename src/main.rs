use anyhow::Context;
use mcpgen::{
    config::ServerConfig,
    db,
    mcp::{self, McpService, McpState},
    repositories::SqliteCapabilityRepository,
    services::DatabaseExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcpgen=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // Database connection
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to open registry database")?;

    // Run migrations
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let registry = Arc::new(SqliteCapabilityRepository::new(pool.clone()));
    let service = McpService::new(registry, Arc::new(DatabaseExecutor::new()), config.sql_timeout);

    let shutdown = CancellationToken::new();
    let state = McpState::new(service, &config, shutdown.clone());
    let app = mcp::router(state).layer(TraceLayer::new_for_http());

    let addr = config.bind_addr();
    tracing::info!("MCP server running on http://{}", addr);
    tracing::info!("HTTP transport: POST http://{}/mcp", addr);
    tracing::info!("SSE transport: GET http://{}/mcp/sse", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C and cancels open SSE streams so the server can drain
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
