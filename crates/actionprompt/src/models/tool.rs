use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A function the model may call, described by a JSON schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the parameters the tool accepts
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// The flat `{name, description, parameters}` description, before any provider wrapping
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// A single tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Provider-assigned token correlating this call with its result
    pub id: String,
    /// The tool the model selected
    pub name: String,
    /// Decoded arguments; `None` when the provider sent arguments that did not parse
    pub params: Option<Map<String, Value>>,
}

impl Action {
    pub fn new<I: Into<String>, N: Into<String>>(
        id: I,
        name: N,
        params: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params: params.map(normalize_keys),
        }
    }

    /// Look up one argument
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params
            .as_ref()
            .and_then(|params| params.get(key.trim_start_matches(':')))
    }

    /// Arguments as a JSON object, empty when none were decoded
    pub fn arguments(&self) -> Value {
        Value::Object(self.params.clone().unwrap_or_default())
    }
}

/// Symbol-style keys (`:a`) and string keys (`a`) address the same argument
fn normalize_keys(params: Map<String, Value>) -> Map<String, Value> {
    params
        .into_iter()
        .map(|(key, value)| (key.trim_start_matches(':').to_string(), value))
        .collect()
}
