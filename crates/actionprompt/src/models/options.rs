use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Requested shape of the model's answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: String,
        schema: Value,
        strict: Option<bool>,
    },
}

impl ResponseFormat {
    pub fn json_schema<S: Into<String>>(name: S, schema: Value, strict: Option<bool>) -> Self {
        ResponseFormat::JsonSchema {
            name: name.into(),
            schema,
            strict,
        }
    }

    /// Accept `"json_object"`, `":text"`, `{type: ...}` envelopes or a bare `{name, schema}`
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(token) => match token.trim_start_matches(':') {
                "text" => Some(ResponseFormat::Text),
                "json_object" | "json" => Some(ResponseFormat::JsonObject),
                _ => None,
            },
            Value::Object(object) => match object.get("type").and_then(Value::as_str) {
                Some("text") => Some(ResponseFormat::Text),
                Some("json_object") => Some(ResponseFormat::JsonObject),
                Some("json_schema") => {
                    let inner = object.get("json_schema").unwrap_or(value);
                    Self::schema_from(inner)
                }
                Some(_) => None,
                None => Self::schema_from(value),
            },
            _ => None,
        }
    }

    fn schema_from(value: &Value) -> Option<Self> {
        let schema = value.get("schema")?.clone();
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("response")
            .to_string();
        let strict = value.get("strict").and_then(Value::as_bool);
        Some(ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        })
    }

    /// The chat-completions envelope: `{type, json_schema: {name, schema, strict}}`
    pub fn to_openai(&self) -> Value {
        match self {
            ResponseFormat::Text => json!({"type": "text"}),
            ResponseFormat::JsonObject => json!({"type": "json_object"}),
            ResponseFormat::JsonSchema {
                name,
                schema,
                strict,
            } => {
                let mut json_schema = json!({"name": name, "schema": schema});
                if let Some(strict) = strict {
                    json_schema["strict"] = json!(strict);
                }
                json!({"type": "json_schema", "json_schema": json_schema})
            }
        }
    }

    /// True when the answer is expected to be parseable JSON
    pub fn expects_json(&self) -> bool {
        !matches!(self, ResponseFormat::Text)
    }
}

impl TryFrom<Value> for ResponseFormat {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        ResponseFormat::from_value(&value)
            .ok_or_else(|| format!("Unrecognized response format: {}", value))
    }
}

impl From<ResponseFormat> for Value {
    fn from(format: ResponseFormat) -> Self {
        format.to_openai()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCollectionPolicy {
    Allow,
    Deny,
}

/// Whether providers may retain prompts: a flag, or an explicit provider allowlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataCollection {
    Policy(DataCollectionPolicy),
    Providers(Vec<String>),
}

impl DataCollection {
    pub fn allow() -> Self {
        DataCollection::Policy(DataCollectionPolicy::Allow)
    }

    pub fn deny() -> Self {
        DataCollection::Policy(DataCollectionPolicy::Deny)
    }

    pub fn providers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DataCollection::Providers(names.into_iter().map(Into::into).collect())
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        match self {
            DataCollection::Policy(DataCollectionPolicy::Allow) => json!("allow"),
            DataCollection::Policy(DataCollectionPolicy::Deny) => json!("deny"),
            DataCollection::Providers(names) => json!(names),
        }
    }
}

/// Generation options at one precedence level.
///
/// Every field is optional: `None` means "not set at this level" and lets a lower
/// level show through. Provider-specific keys go to `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_collection: Option<DataCollection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Provider-hosted tools (web search, image generation, MCP connectors)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin_tools: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_data_collection(mut self, data_collection: DataCollection) -> Self {
        self.data_collection = Some(data_collection);
        self
    }

    pub fn with_builtin_tools(mut self, tools: Vec<Value>) -> Self {
        self.builtin_tools = Some(tools);
        self
    }

    pub fn with_extra<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Layer `self` over `lower`: set fields win, unset fields fall through.
    ///
    /// `extra` is merged key by key, and a `null` in `self.extra` counts as unset.
    pub fn over(&self, lower: &GenerationOptions) -> GenerationOptions {
        let mut extra = lower.extra.clone();
        for (key, value) in &self.extra {
            if !value.is_null() {
                extra.insert(key.clone(), value.clone());
            }
        }

        GenerationOptions {
            model: self.model.clone().or_else(|| lower.model.clone()),
            temperature: self.temperature.or(lower.temperature),
            max_tokens: self.max_tokens.or(lower.max_tokens),
            stream: self.stream.or(lower.stream),
            response_format: self
                .response_format
                .clone()
                .or_else(|| lower.response_format.clone()),
            data_collection: self
                .data_collection
                .clone()
                .or_else(|| lower.data_collection.clone()),
            tool_choice: self
                .tool_choice
                .clone()
                .or_else(|| lower.tool_choice.clone()),
            builtin_tools: self
                .builtin_tools
                .clone()
                .or_else(|| lower.builtin_tools.clone()),
            extra,
        }
    }
}
