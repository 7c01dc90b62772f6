//! JSON Schema generation for MCP tool definitions
//!
//! Turns a capability's parameter definitions into the `inputSchema` object
//! that `tools/list` advertises, and wraps it into an MCP tool descriptor.
//!
//! # Type Mapping
//!
//! | Capability type | JSON Schema type | Additional properties |
//! |-----------------|------------------|-----------------------|
//! | string          | "string"         | -                     |
//! | integer         | "integer"        | -                     |
//! | float           | "number"         | -                     |
//! | boolean         | "boolean"        | -                     |
//! | date            | "string"         | format: "date"        |
//!
//! Required parameters populate the schema's `required` array in definition
//! order.
//!
//! # Usage
//!
//! ```rust
//! use mcpgen::models::{Capability, ParamType, ParameterDefinition};
//! use mcpgen::services::schema_generator::SchemaGenerator;
//!
//! let capability = Capability {
//!     id: 1,
//!     connection_id: 1,
//!     name: "orders_since".into(),
//!     description: "Orders placed since a date".into(),
//!     sql_template: "SELECT * FROM orders WHERE placed_at >= {{since}}".into(),
//!     parameters: vec![ParameterDefinition {
//!         name: "since".into(),
//!         param_type: ParamType::Date,
//!         required: true,
//!         description: None,
//!         default: None,
//!     }],
//!     is_live: true,
//! };
//!
//! let schema = SchemaGenerator::input_schema(&capability);
//! assert_eq!(schema["properties"]["since"]["format"], "date");
//! assert_eq!(schema["required"][0], "since");
//! ```

use crate::models::{Capability, ParamType, ParameterDefinition};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub struct SchemaGenerator;

impl SchemaGenerator {
    /// Map a capability parameter type to a JSON Schema type definition
    fn map_param_type_to_json_schema(param_type: ParamType) -> Map<String, Value> {
        let mut schema = Map::new();
        match param_type {
            ParamType::String => {
                schema.insert("type".into(), json!("string"));
            }
            ParamType::Integer => {
                schema.insert("type".into(), json!("integer"));
            }
            ParamType::Float => {
                schema.insert("type".into(), json!("number"));
            }
            ParamType::Boolean => {
                schema.insert("type".into(), json!("boolean"));
            }
            ParamType::Date => {
                schema.insert("type".into(), json!("string"));
                schema.insert("format".into(), json!("date"));
            }
        }
        schema
    }

    fn build_property_schema(param: &ParameterDefinition) -> Value {
        let mut schema = Self::map_param_type_to_json_schema(param.param_type);
        schema.insert(
            "description".into(),
            json!(param.description.clone().unwrap_or_default()),
        );
        if let Some(default) = &param.default {
            schema.insert("default".into(), default.clone());
        }
        Value::Object(schema)
    }

    /// Build the `inputSchema` object for a capability
    ///
    /// Always an object schema with `properties` and `required`, even when
    /// the capability takes no parameters.
    pub fn input_schema(capability: &Capability) -> Map<String, Value> {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &capability.parameters {
            properties.insert(param.name.clone(), Self::build_property_schema(param));
            if param.required {
                required.push(json!(param.name));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), Value::Array(required));
        schema
    }

    /// Build the MCP tool descriptor advertised for a live capability
    pub fn tool_definition(capability: &Capability) -> rmcp::model::Tool {
        rmcp::model::Tool {
            name: capability.name.clone().into(),
            description: Some(capability.description.clone().into()),
            input_schema: Arc::new(Self::input_schema(capability)),
            annotations: None,
            title: None,
            icons: None,
            output_schema: None,
        }
    }
}
