//! Tool specifications consumed by backend adapters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-invocation parameter values, keyed by parameter name.
pub type Parameters = HashMap<String, serde_json::Value>;

/// Immutable description of one invocable capability.
///
/// Produced by the external detection layer. The argument/command template
/// fields are backend-specific: `args` drives the command-line backend,
/// `command` the line-protocol server backend, `endpoint`/`method` the HTTP
/// backend. Unused fields are simply ignored by the other backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique identifier within a backend.
    pub name: String,

    /// Human description.
    pub description: String,

    /// Ordered argument tokens; a token that is exactly `{name}` is a
    /// placeholder for the parameter `name`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Declared parameter schema, in declaration order.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,

    /// Endpoint path appended to the HTTP backend's base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// HTTP method, case-insensitive. Defaults to GET when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Command template for the server backend; every `{name}` occurrence
    /// is replaced by the stringified parameter value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name, referenced by `{name}` placeholders.
    pub name: String,

    /// Declared type name (free text, e.g. "string", "number").
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human description.
    #[serde(default)]
    pub description: String,

    /// Whether the caller must supply this parameter.
    #[serde(default)]
    pub required: bool,
}

/// Render a parameter value the way it should appear in a command line or
/// command template: strings without quotes, everything else via its JSON
/// representation.
pub fn stringify_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringify_renders_strings_without_quotes() {
        assert_eq!(stringify_value(&json!("hi")), "hi");
        assert_eq!(stringify_value(&json!(2)), "2");
        assert_eq!(stringify_value(&json!(true)), "true");
        assert_eq!(stringify_value(&json!(2.5)), "2.5");
    }

    #[test]
    fn tool_spec_parses_with_optional_fields_absent() {
        let spec: ToolSpec = serde_json::from_value(json!({
            "name": "greet",
            "description": "Greets someone",
            "args": ["{name}"],
            "parameters": [
                { "name": "name", "type": "string", "description": "who to greet" }
            ]
        }))
        .unwrap();

        assert_eq!(spec.name, "greet");
        assert!(spec.endpoint.is_none());
        assert!(spec.method.is_none());
        assert!(spec.command.is_none());
        assert!(!spec.parameters[0].required);
    }
}
