pub mod capability;
pub mod connection;

pub use capability::{extract_placeholders, Capability, ParamType, ParameterDefinition};
pub use connection::{DatabaseConnection, SUPPORTED_DB_TYPES};
