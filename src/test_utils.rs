pub mod test_helpers {
    use crate::config::ServerConfig;
    use crate::mcp::{self, McpService, McpState};
    use crate::models::ParameterDefinition;
    use crate::repositories::{NewCapability, NewConnection, SqliteCapabilityRepository};
    use crate::services::DatabaseExecutor;
    use sqlx::{sqlite::SqlitePoolOptions, Connection, SqliteConnection, SqlitePool};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio_util::sync::CancellationToken;

    /// Create a new in-memory SQLite database for testing
    pub async fn create_test_db() -> Result<SqlitePool, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Create a target database with a small `customers` table
    ///
    /// Rows: Ada (active, Paris), Grace (active, London), Linus (inactive, Paris).
    pub async fn create_customers_db() -> Result<NamedTempFile, sqlx::Error> {
        let temp_file = NamedTempFile::new().map_err(sqlx::Error::Io)?;
        let db_path = temp_file
            .path()
            .to_str()
            .ok_or_else(|| sqlx::Error::Configuration("Invalid database path".into()))?;

        let mut conn = SqliteConnection::connect(&format!("sqlite://{}", db_path)).await?;
        sqlx::query(
            r#"
            CREATE TABLE customers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                city TEXT NOT NULL,
                active BOOLEAN NOT NULL,
                balance REAL,
                avatar BLOB
            )
            "#,
        )
        .execute(&mut conn)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO customers (name, city, active, balance, avatar) VALUES
                ('Ada', 'Paris', 1, 120.5, x'CAFE'),
                ('Grace', 'London', 1, NULL, NULL),
                ('Linus', 'Paris', 0, 3.0, NULL)
            "#,
        )
        .execute(&mut conn)
        .await?;
        conn.close().await?;

        Ok(temp_file)
    }

    /// Register a SQLite connection pointing at `path`
    pub async fn insert_connection(pool: &SqlitePool, name: &str, path: &str) -> Result<i64, sqlx::Error> {
        let repo = SqliteCapabilityRepository::new(pool.clone());
        repo.create_connection(NewConnection {
            name: name.to_string(),
            db_type: "sqlite".to_string(),
            connection_string: path.to_string(),
        })
        .await
        .map_err(|e| sqlx::Error::Protocol(e.to_string()))
    }

    /// Register a capability on a connection
    pub async fn insert_capability(
        pool: &SqlitePool,
        connection_id: i64,
        name: &str,
        sql_template: &str,
        parameters: Vec<ParameterDefinition>,
        is_live: bool,
    ) -> Result<i64, sqlx::Error> {
        let repo = SqliteCapabilityRepository::new(pool.clone());
        repo.create_capability(NewCapability {
            connection_id,
            name: name.to_string(),
            description: format!("Test capability {}", name),
            sql_template: sql_template.to_string(),
            parameters,
            is_live,
        })
        .await
        .map_err(|e| sqlx::Error::Protocol(e.to_string()))
    }

    /// Server settings for tests: short keepalive, everything else default
    pub fn test_config() -> ServerConfig {
        ServerConfig {
            keepalive: Duration::from_millis(200),
            session_send_timeout: Duration::from_secs(2),
            sql_timeout: Duration::from_secs(5),
            ..ServerConfig::default()
        }
    }

    /// MCP state backed by the SQLite registry and executor
    pub fn create_test_state(pool: SqlitePool, config: &ServerConfig) -> McpState {
        let service = McpService::new(
            Arc::new(SqliteCapabilityRepository::new(pool)),
            Arc::new(DatabaseExecutor::new()),
            config.sql_timeout,
        );
        McpState::new(service, config, CancellationToken::new())
    }

    /// Serve the MCP router on an ephemeral local port
    pub async fn spawn_server(state: McpState) -> std::io::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = mcp::router(state);

        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        Ok(addr)
    }
}
