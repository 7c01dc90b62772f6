use crate::error::RegistryError;
use crate::models::{Capability, DatabaseConnection, ParameterDefinition};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

type Result<T> = std::result::Result<T, RegistryError>;

/// Read-only view of the capability registry used by the MCP dispatcher.
///
/// Implementations must not cache: every call reflects the registry's
/// current state, so liveness edits apply on the next `tools/list` or
/// `tools/call`. The order of [`CapabilityRepository::list_live`] is the
/// registry's own and is not otherwise specified.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapabilityRepository: Send + Sync {
    async fn list_live(&self) -> Result<Vec<Capability>>;
    /// Exact, case-sensitive name match restricted to live capabilities
    async fn find_live_by_name(&self, name: &str) -> Result<Option<Capability>>;
    async fn count_live(&self) -> Result<i64>;
    async fn get_connection(&self, id: i64) -> Result<Option<DatabaseConnection>>;
}

#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub db_type: String,
    pub connection_string: String,
}

#[derive(Debug, Clone)]
pub struct NewCapability {
    pub connection_id: i64,
    pub name: String,
    pub description: String,
    pub sql_template: String,
    pub parameters: Vec<ParameterDefinition>,
    pub is_live: bool,
}

#[derive(Clone)]
pub struct SqliteCapabilityRepository {
    pool: SqlitePool,
}

const CAPABILITY_COLUMNS: &str =
    "id, connection_id, name, description, sql_template, parameters, is_live";

impl SqliteCapabilityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn capability_from_row(row: &SqliteRow) -> Result<Capability> {
        let name: String = row.get("name");
        let raw_parameters: String = row.get("parameters");
        let parameters = serde_json::from_str(&raw_parameters).map_err(|source| {
            RegistryError::InvalidParameters {
                capability: name.clone(),
                source,
            }
        })?;

        Ok(Capability {
            id: row.get("id"),
            connection_id: row.get("connection_id"),
            name,
            description: row.get("description"),
            sql_template: row.get("sql_template"),
            parameters,
            is_live: row.get("is_live"),
        })
    }

    fn connection_from_row(row: &SqliteRow) -> DatabaseConnection {
        DatabaseConnection {
            id: row.get("id"),
            name: row.get("name"),
            db_type: row.get("db_type"),
            connection_string: row.get("connection_string"),
            is_active: row.get("is_active"),
        }
    }

    pub async fn create_connection(&self, request: NewConnection) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO database_connections (name, db_type, connection_string) VALUES (?, ?, ?)",
        )
        .bind(&request.name)
        .bind(&request.db_type)
        .bind(&request.connection_string)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    pub async fn list_connections(&self) -> Result<Vec<DatabaseConnection>> {
        let rows = sqlx::query(
            "SELECT id, name, db_type, connection_string, is_active FROM database_connections ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::connection_from_row).collect())
    }

    pub async fn create_capability(&self, request: NewCapability) -> Result<i64> {
        let parameters = serde_json::to_string(&request.parameters).map_err(|source| {
            RegistryError::InvalidParameters {
                capability: request.name.clone(),
                source,
            }
        })?;

        let id = sqlx::query(
            r#"
            INSERT INTO capabilities (connection_id, name, description, sql_template, parameters, is_live)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.connection_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.sql_template)
        .bind(parameters)
        .bind(request.is_live)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    pub async fn list_all(&self) -> Result<Vec<Capability>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM capabilities ORDER BY id",
            CAPABILITY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::capability_from_row).collect()
    }

    /// Returns false when no capability has that name
    pub async fn set_live(&self, name: &str, is_live: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE capabilities SET is_live = ?, updated_at = unixepoch() WHERE name = ?",
        )
        .bind(is_live)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Looks a capability up by name whether or not it is live
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Capability>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM capabilities WHERE name = ?",
            CAPABILITY_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::capability_from_row).transpose()
    }

    pub async fn delete_capability(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM capabilities WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CapabilityRepository for SqliteCapabilityRepository {
    async fn list_live(&self) -> Result<Vec<Capability>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM capabilities WHERE is_live = 1 ORDER BY id",
            CAPABILITY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::capability_from_row).collect()
    }

    async fn find_live_by_name(&self, name: &str) -> Result<Option<Capability>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM capabilities WHERE name = ? AND is_live = 1",
            CAPABILITY_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::capability_from_row).transpose()
    }

    async fn count_live(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM capabilities WHERE is_live = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn get_connection(&self, id: i64) -> Result<Option<DatabaseConnection>> {
        let row = sqlx::query(
            "SELECT id, name, db_type, connection_string, is_active FROM database_connections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::connection_from_row))
    }
}
