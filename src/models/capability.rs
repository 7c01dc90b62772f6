use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

// Hardcoded regex pattern - guaranteed to be valid at compile time
#[allow(clippy::unwrap_used)]
pub(crate) static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").unwrap());

/// A SQL-backed capability. Live capabilities are exposed as MCP tools
/// under their `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capability {
    pub id: i64,
    pub connection_id: i64,
    pub name: String,
    pub description: String,
    pub sql_template: String, // {{param}} placeholders
    pub parameters: Vec<ParameterDefinition>,
    pub is_live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

fn default_required() -> bool {
    true
}

/// Parameter types a capability may declare
///
/// Unknown type names read as [`ParamType::String`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

impl ParamType {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "integer" => ParamType::Integer,
            "float" => ParamType::Float,
            "boolean" => ParamType::Boolean,
            "date" => ParamType::Date,
            _ => ParamType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::Date => "date",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(ParamType::parse(&value))
    }
}

/// Distinct `{{name}}` placeholders in a template, in first-occurrence order
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in PLACEHOLDER_PATTERN.captures_iter(template) {
        let name = &cap[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameter_definition_defaults() {
        let def: ParameterDefinition = serde_json::from_value(json!({"name": "city"})).unwrap();
        assert_eq!(def.param_type, ParamType::String);
        assert!(def.required);
        assert!(def.default.is_none());
    }

    #[test]
    fn unknown_type_reads_as_string() {
        let def: ParameterDefinition =
            serde_json::from_value(json!({"name": "x", "type": "uuid"})).unwrap();
        assert_eq!(def.param_type, ParamType::String);

        let def: ParameterDefinition =
            serde_json::from_value(json!({"name": "x", "type": "Float", "required": false}))
                .unwrap();
        assert_eq!(def.param_type, ParamType::Float);
        assert!(!def.required);
    }

    #[test]
    fn placeholders_are_distinct_and_ordered() {
        let names = extract_placeholders(
            "SELECT * FROM t WHERE a = {{city}} AND b > {{min}} OR a = {{city}}",
        );
        assert_eq!(names, vec!["city".to_string(), "min".to_string()]);
        assert!(extract_placeholders("SELECT 1").is_empty());
    }
}
