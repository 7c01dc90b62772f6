use crate::error::ParameterError;
use crate::models::{extract_placeholders, ParamType, ParameterDefinition};
use serde_json::{Map, Value};

/// Resolves caller-supplied tool arguments against a capability's template
/// and parameter definitions.
///
/// Only placeholders that occur in the template are resolved. For each:
/// the caller's value wins, then the definition's default, then `null` when
/// the parameter is optional. A required parameter with neither value nor
/// default fails the call. Placeholders without a definition are treated as
/// required strings. Resolved values are converted to the declared type.
pub struct ParameterResolver;

impl ParameterResolver {
    /// Resolve the arguments for one tool call
    ///
    /// # Arguments
    ///
    /// * `sql_template` - Template whose `{{name}}` placeholders select what to resolve
    /// * `arguments` - Caller-supplied values keyed by parameter name
    /// * `definitions` - The capability's declared parameters
    ///
    /// # Returns
    ///
    /// One entry per distinct placeholder, converted to its declared type.
    /// Arguments that match no placeholder are left out.
    ///
    /// # Errors
    ///
    /// * `ParameterError::Missing` - A required placeholder has no value and no default
    /// * `ParameterError::Conversion` - A value cannot be converted to its declared type
    pub fn resolve(
        sql_template: &str,
        arguments: &Map<String, Value>,
        definitions: &[ParameterDefinition],
    ) -> Result<Map<String, Value>, ParameterError> {
        let mut resolved = Map::new();

        for name in extract_placeholders(sql_template) {
            let definition = definitions.iter().find(|d| d.name == name);
            let required = definition.map(|d| d.required).unwrap_or(true);
            let param_type = definition.map(|d| d.param_type).unwrap_or_default();
            let default = definition.and_then(|d| d.default.clone());

            let value = match arguments.get(&name) {
                Some(value) => value.clone(),
                None => match default {
                    Some(default) if !default.is_null() => default,
                    _ if !required => Value::Null,
                    _ => return Err(ParameterError::Missing(name)),
                },
            };

            let value = if value.is_null() {
                value
            } else {
                convert(value, param_type)?
            };

            resolved.insert(name, value);
        }

        Ok(resolved)
    }
}

fn convert(value: Value, param_type: ParamType) -> Result<Value, ParameterError> {
    let failed = |value: &Value| ParameterError::Conversion {
        value: display(value),
        param_type: param_type.to_string(),
    };

    match param_type {
        ParamType::Integer => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(n) => n
                .as_f64()
                .map(|f| Value::from(f.trunc() as i64))
                .ok_or_else(|| failed(&value)),
            Value::Bool(b) => Ok(Value::from(*b as i64)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| failed(&value)),
            _ => Err(failed(&value)),
        },
        ParamType::Float => match &value {
            Value::Number(n) => n.as_f64().map(Value::from).ok_or_else(|| failed(&value)),
            Value::Bool(b) => Ok(Value::from(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(|| failed(&value)),
            _ => Err(failed(&value)),
        },
        ParamType::Boolean => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => Ok(Value::Bool(matches!(
                s.to_lowercase().as_str(),
                "true" | "1" | "yes"
            ))),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
            Value::Array(items) => Ok(Value::Bool(!items.is_empty())),
            Value::Object(fields) => Ok(Value::Bool(!fields.is_empty())),
            Value::Null => Ok(Value::Null),
        },
        ParamType::String | ParamType::Date => Ok(Value::String(display(&value))),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(name: &str, param_type: ParamType, required: bool, default: Option<Value>) -> ParameterDefinition {
        ParameterDefinition {
            name: name.to_string(),
            param_type,
            required,
            description: None,
            default,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn missing_required_parameter_fails() {
        let err = ParameterResolver::resolve(
            "SELECT * FROM orders WHERE customer_id = {{customer_id}}",
            &Map::new(),
            &[def("customer_id", ParamType::Integer, true, None)],
        )
        .unwrap_err();
        assert_eq!(err, ParameterError::Missing("customer_id".into()));
        assert_eq!(err.to_string(), "Required parameter 'customer_id' not provided");
    }

    #[test]
    fn undefined_placeholder_is_required() {
        let err = ParameterResolver::resolve("SELECT {{x}}", &Map::new(), &[]).unwrap_err();
        assert_eq!(err, ParameterError::Missing("x".into()));
    }

    #[test]
    fn defaults_and_optional_values() {
        let resolved = ParameterResolver::resolve(
            "SELECT * FROM t WHERE a = {{limit}} AND b = {{note}}",
            &Map::new(),
            &[
                def("limit", ParamType::Integer, true, Some(json!("10"))),
                def("note", ParamType::String, false, None),
            ],
        )
        .unwrap();
        assert_eq!(resolved["limit"], json!(10));
        assert_eq!(resolved["note"], Value::Null);
    }

    #[test]
    fn converts_declared_types() {
        let resolved = ParameterResolver::resolve(
            "{{i}} {{f}} {{b}} {{d}} {{s}}",
            &args(json!({"i": "42", "f": "2.5", "b": "Yes", "d": "2024-01-31", "s": 7})),
            &[
                def("i", ParamType::Integer, true, None),
                def("f", ParamType::Float, true, None),
                def("b", ParamType::Boolean, true, None),
                def("d", ParamType::Date, true, None),
                def("s", ParamType::String, true, None),
            ],
        )
        .unwrap();
        assert_eq!(resolved["i"], json!(42));
        assert_eq!(resolved["f"], json!(2.5));
        assert_eq!(resolved["b"], json!(true));
        assert_eq!(resolved["d"], json!("2024-01-31"));
        assert_eq!(resolved["s"], json!("7"));
    }

    #[test]
    fn conversion_failure_names_value_and_type() {
        let err = ParameterResolver::resolve(
            "{{n}}",
            &args(json!({"n": "abc"})),
            &[def("n", ParamType::Integer, true, None)],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Cannot convert value 'abc' to type 'integer'");
    }

    #[test]
    fn ignores_arguments_not_in_template() {
        let resolved = ParameterResolver::resolve(
            "SELECT 1",
            &args(json!({"unused": 1})),
            &[def("unused", ParamType::Integer, true, None)],
        )
        .unwrap();
        assert!(resolved.is_empty());
    }
}
