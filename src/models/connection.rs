use serde::{Deserialize, Serialize};

/// Database types a connection may declare
pub const SUPPORTED_DB_TYPES: [&str; 4] = ["sqlite", "postgresql", "mysql", "mssql"];

/// A data source that capabilities execute against
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConnection {
    pub id: i64,
    pub name: String,
    pub db_type: String,
    pub connection_string: String,
    pub is_active: bool,
}
