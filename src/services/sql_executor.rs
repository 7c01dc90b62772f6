//! SQL execution backend for capabilities
//!
//! The dispatcher hands an [`ExecutionRequest`] and the capability's
//! [`DatabaseConnection`] to a [`SqlExecutor`]. The shipped
//! [`DatabaseExecutor`] opens one connection per call to a SQLite, PostgreSQL
//! or MySQL target, picked by the connection's `db_type`. Anything else is
//! rejected with [`ExecutionError::UnsupportedDatabase`].
//!
//! Templates use `{{name}}` placeholders. Each occurrence becomes a bind
//! parameter in the target's own syntax (`?` or `$n`), bound to the resolved
//! argument value, so caller input never reaches the SQL text.

use crate::error::ExecutionError;
use crate::models::capability::PLACEHOLDER_PATTERN;
use crate::models::{DatabaseConnection, ParameterDefinition};
use crate::services::parameter_resolver::ParameterResolver;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{
    Column, ConnectOptions, Connection, Database, Encode, MySql, Postgres, Row, Sqlite, Type,
    TypeInfo, ValueRef,
};
use std::str::FromStr;
use std::time::Duration;

/// Rows returned by a query, one JSON object per row keyed by column name
pub type QueryRows = Vec<Map<String, Value>>;

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub sql_template: String,
    pub arguments: Map<String, Value>,
    pub parameters: Vec<ParameterDefinition>,
    pub timeout: Duration,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(
        &self,
        connection: DatabaseConnection,
        request: ExecutionRequest,
    ) -> Result<QueryRows, ExecutionError>;
}

/// How a target database spells bind parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStyle {
    /// `?` for every parameter (SQLite, MySQL)
    Positional,
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
}

/// Target database families the executor can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
    MySql,
}

impl DatabaseKind {
    /// Map a stored `db_type` to a backend. Matching ignores case.
    pub fn parse(db_type: &str) -> Result<Self, ExecutionError> {
        match db_type.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgresql" | "postgres" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            _ => Err(ExecutionError::UnsupportedDatabase(db_type.to_string())),
        }
    }

    pub fn bind_style(self) -> BindStyle {
        match self {
            Self::Postgres => BindStyle::Numbered,
            Self::Sqlite | Self::MySql => BindStyle::Positional,
        }
    }

    /// Query whose single cell names the server version
    pub fn version_query(self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT sqlite_version()",
            Self::Postgres => "SELECT version()",
            Self::MySql => "SELECT VERSION()",
        }
    }
}

/// Replace every `{{name}}` occurrence with a bind parameter and return the
/// bind values in occurrence order. Names absent from `arguments` bind as NULL.
pub fn render_template(
    template: &str,
    arguments: &Map<String, Value>,
    style: BindStyle,
) -> (String, Vec<Value>) {
    let mut binds = Vec::new();
    let sql = PLACEHOLDER_PATTERN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            binds.push(arguments.get(&caps[1]).cloned().unwrap_or(Value::Null));
            match style {
                BindStyle::Positional => "?".to_string(),
                BindStyle::Numbered => format!("${}", binds.len()),
            }
        })
        .into_owned();
    (sql, binds)
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseExecutor;

impl DatabaseExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run the backend's version query against a stored connection
    ///
    /// # Errors
    ///
    /// The same failures as [`SqlExecutor::execute`]: an unsupported
    /// `db_type`, an unreachable target or the timeout elapsing.
    pub async fn server_version(
        &self,
        connection: &DatabaseConnection,
        timeout: Duration,
    ) -> Result<String, ExecutionError> {
        let kind = DatabaseKind::parse(&connection.db_type)?;
        let rows = tokio::time::timeout(
            timeout,
            Self::run(kind, &connection.connection_string, kind.version_query(), vec![]),
        )
        .await
        .map_err(|_| ExecutionError::Timeout(timeout.as_secs()))??;

        let version = rows
            .first()
            .and_then(|row| row.values().next())
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        Ok(version)
    }

    async fn run(
        kind: DatabaseKind,
        connection_string: &str,
        sql: &str,
        binds: Vec<Value>,
    ) -> Result<QueryRows, ExecutionError> {
        match kind {
            DatabaseKind::Sqlite => run_sqlite(connection_string, sql, binds).await,
            DatabaseKind::Postgres => run_postgres(connection_string, sql, binds).await,
            DatabaseKind::MySql => run_mysql(connection_string, sql, binds).await,
        }
    }
}

#[async_trait]
impl SqlExecutor for DatabaseExecutor {
    async fn execute(
        &self,
        connection: DatabaseConnection,
        request: ExecutionRequest,
    ) -> Result<QueryRows, ExecutionError> {
        let kind = DatabaseKind::parse(&connection.db_type)?;

        let arguments =
            ParameterResolver::resolve(&request.sql_template, &request.arguments, &request.parameters)?;
        let (sql, binds) = render_template(&request.sql_template, &arguments, kind.bind_style());

        tracing::debug!(
            connection = %connection.name,
            db_type = ?kind,
            sql = %sql,
            binds = binds.len(),
            "Executing query"
        );

        tokio::time::timeout(
            request.timeout,
            Self::run(kind, &connection.connection_string, &sql, binds),
        )
        .await
        .map_err(|_| ExecutionError::Timeout(request.timeout.as_secs()))?
    }
}

type BackendQuery<'q, DB> = sqlx::query::Query<'q, DB, <DB as Database>::Arguments<'q>>;

fn bind_value<'q, DB>(query: BackendQuery<'q, DB>, value: Value) -> BackendQuery<'q, DB>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s),
        other => query.bind(other.to_string()),
    }
}

fn sqlite_options(connection_string: &str) -> Result<SqliteConnectOptions, ExecutionError> {
    let options = if connection_string.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| ExecutionError::Connection(e.to_string()))?
    } else {
        SqliteConnectOptions::new().filename(connection_string)
    };
    Ok(options.create_if_missing(false))
}

async fn run_sqlite(
    connection_string: &str,
    sql: &str,
    binds: Vec<Value>,
) -> Result<QueryRows, ExecutionError> {
    let mut conn = sqlite_options(connection_string)?
        .connect()
        .await
        .map_err(|e| ExecutionError::Connection(e.to_string()))?;

    let mut query = sqlx::query::<Sqlite>(sql);
    for value in binds {
        query = bind_value(query, value);
    }

    let result = query.fetch_all(&mut conn).await;
    close(conn).await;

    let rows = result.map_err(|e| ExecutionError::Query(e.to_string()))?;
    rows.iter().map(sqlite_row_to_json).collect()
}

async fn run_postgres(
    connection_string: &str,
    sql: &str,
    binds: Vec<Value>,
) -> Result<QueryRows, ExecutionError> {
    let mut conn = PgConnection::connect(connection_string)
        .await
        .map_err(|e| ExecutionError::Connection(e.to_string()))?;

    let mut query = sqlx::query::<Postgres>(sql);
    for value in binds {
        query = bind_value(query, value);
    }

    let result = query.fetch_all(&mut conn).await;
    close(conn).await;

    let rows = result.map_err(|e| ExecutionError::Query(e.to_string()))?;
    rows.iter().map(pg_row_to_json).collect()
}

async fn run_mysql(
    connection_string: &str,
    sql: &str,
    binds: Vec<Value>,
) -> Result<QueryRows, ExecutionError> {
    let mut conn = MySqlConnection::connect(connection_string)
        .await
        .map_err(|e| ExecutionError::Connection(e.to_string()))?;

    let mut query = sqlx::query::<MySql>(sql);
    for value in binds {
        query = bind_value(query, value);
    }

    let result = query.fetch_all(&mut conn).await;
    close(conn).await;

    let rows = result.map_err(|e| ExecutionError::Query(e.to_string()))?;
    rows.iter().map(mysql_row_to_json).collect()
}

async fn close<C: Connection>(conn: C) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "Failed to close target connection cleanly");
    }
}

fn is_null<R: Row>(row: &R, index: usize) -> Result<bool, ExecutionError>
where
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(index)
        .map(|raw| raw.is_null())
        .map_err(|e| ExecutionError::Query(e.to_string()))
}

fn sqlite_row_to_json(row: &SqliteRow) -> Result<Map<String, Value>, ExecutionError> {
    let mut record = Map::new();

    for (index, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(index)
            .map_err(|e| ExecutionError::Query(e.to_string()))?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            // Storage class of this value, not the declared column type
            let decoded = match raw.type_info().name() {
                "INTEGER" => row.try_get_unchecked::<i64, _>(index).map(Value::from),
                "REAL" => row.try_get_unchecked::<f64, _>(index).map(Value::from),
                "BLOB" => row
                    .try_get_unchecked::<Vec<u8>, _>(index)
                    .map(|bytes| Value::String(hex::encode(bytes))),
                _ => row.try_get_unchecked::<String, _>(index).map(Value::String),
            };
            decoded.map_err(|e| ExecutionError::Query(e.to_string()))?
        };

        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

fn pg_row_to_json(row: &PgRow) -> Result<Map<String, Value>, ExecutionError> {
    let mut record = Map::new();

    for (index, column) in row.columns().iter().enumerate() {
        let value = if is_null(row, index)? {
            Value::Null
        } else {
            pg_value(row, index)
        };
        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

// Type-checked decode attempts; a column type none of these accept
// (NUMERIC, arrays, ranges) comes back as null
fn pg_value(row: &PgRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<i32, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<i16, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<f64, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<f32, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<bool, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<String, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Value, _>(index) {
        v
    } else if let Ok(v) = row.try_get::<uuid::Uuid, _>(index) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
        json!(v.to_rfc3339())
    } else if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(index) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        json!(hex::encode(v))
    } else {
        Value::Null
    }
}

fn mysql_row_to_json(row: &MySqlRow) -> Result<Map<String, Value>, ExecutionError> {
    let mut record = Map::new();

    for (index, column) in row.columns().iter().enumerate() {
        let value = if is_null(row, index)? {
            Value::Null
        } else {
            mysql_value(row, index)
        };
        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

fn mysql_value(row: &MySqlRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<u64, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<f64, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<f32, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<String, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Value, _>(index) {
        v
    } else if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(index) {
        json!(v.to_string())
    } else if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        json!(hex::encode(v))
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(db_type: &str, connection_string: &str) -> DatabaseConnection {
        DatabaseConnection {
            id: 1,
            name: "warehouse".into(),
            db_type: db_type.into(),
            connection_string: connection_string.into(),
            is_active: true,
        }
    }

    fn request(sql: &str) -> ExecutionRequest {
        ExecutionRequest {
            sql_template: sql.into(),
            arguments: Map::new(),
            parameters: vec![],
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn renders_each_occurrence_as_positional_parameter() {
        let args = json!({"city": "Lyon", "min": 3});
        let (sql, binds) = render_template(
            "SELECT * FROM c WHERE city = {{city}} AND n > {{min}} OR alt = {{city}}",
            args.as_object().unwrap(),
            BindStyle::Positional,
        );
        assert_eq!(sql, "SELECT * FROM c WHERE city = ? AND n > ? OR alt = ?");
        assert_eq!(binds, vec![json!("Lyon"), json!(3), json!("Lyon")]);
    }

    #[test]
    fn numbered_style_counts_every_occurrence() {
        let args = json!({"city": "Lyon", "min": 3});
        let (sql, binds) = render_template(
            "SELECT * FROM c WHERE city = {{city}} AND n > {{min}} OR alt = {{city}}",
            args.as_object().unwrap(),
            BindStyle::Numbered,
        );
        assert_eq!(sql, "SELECT * FROM c WHERE city = $1 AND n > $2 OR alt = $3");
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn unresolved_placeholders_bind_null() {
        let (sql, binds) = render_template("SELECT {{gone}}", &Map::new(), BindStyle::Positional);
        assert_eq!(sql, "SELECT ?");
        assert_eq!(binds, vec![Value::Null]);
    }

    #[test]
    fn db_type_maps_to_backend() {
        assert_eq!(DatabaseKind::parse("SQLite").unwrap(), DatabaseKind::Sqlite);
        assert_eq!(DatabaseKind::parse("postgresql").unwrap(), DatabaseKind::Postgres);
        assert_eq!(DatabaseKind::parse("postgres").unwrap(), DatabaseKind::Postgres);
        assert_eq!(DatabaseKind::parse("mysql").unwrap(), DatabaseKind::MySql);
        assert_eq!(DatabaseKind::Postgres.bind_style(), BindStyle::Numbered);
        assert_eq!(DatabaseKind::MySql.bind_style(), BindStyle::Positional);
    }

    #[tokio::test]
    async fn rejects_unknown_database_types() {
        let err = DatabaseExecutor::new()
            .execute(connection("mssql", "mssql://localhost/warehouse"), request("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedDatabase(ref t) if t == "mssql"));
    }

    #[tokio::test]
    async fn unreachable_postgres_is_a_connection_error() {
        let err = DatabaseExecutor::new()
            .execute(
                connection("postgresql", "postgres://mcp@127.0.0.1:1/warehouse"),
                request("SELECT 1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Connection(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_mysql_is_a_connection_error() {
        let err = DatabaseExecutor::new()
            .execute(
                connection("mysql", "mysql://mcp@127.0.0.1:1/warehouse"),
                request("SELECT 1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Connection(_)), "{err:?}");
    }

    #[tokio::test]
    async fn sqlite_reports_its_version() {
        let target = tempfile::NamedTempFile::new().unwrap();
        let version = DatabaseExecutor::new()
            .server_version(
                &connection("sqlite", target.path().to_str().unwrap()),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(version.starts_with('3'), "{version}");
    }
}
