pub mod parameter_resolver;
pub mod schema_generator;
pub mod sql_executor;

pub use parameter_resolver::ParameterResolver;
pub use schema_generator::SchemaGenerator;
pub use sql_executor::{
    render_template, BindStyle, DatabaseExecutor, DatabaseKind, ExecutionRequest, QueryRows,
    SqlExecutor,
};

#[cfg(test)]
pub use sql_executor::MockSqlExecutor;
