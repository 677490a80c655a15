use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::message::Message;
use super::options::ResponseFormat;
use crate::sanitizer::Sanitizer;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Read token counts from a usage object, accepting both
    /// `prompt_tokens/completion_tokens` and `input_tokens/output_tokens` names
    pub fn from_value(usage: &Value) -> Self {
        let read = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| usage.get(*key).and_then(Value::as_i64))
                .map(|v| v as i32)
        };

        let input_tokens = read(&["prompt_tokens", "input_tokens", "prompt_eval_count"]);
        let output_tokens = read(&["completion_tokens", "output_tokens", "eval_count"]);
        let total_tokens = read(&["total_tokens"]).or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

        Self::new(input_tokens, output_tokens, total_tokens)
    }
}

/// Provider extras observed on a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// The adapter that produced the response
    pub provider: String,
    /// Upstream provider actually used, when a router reports it
    pub routed_provider: Option<String>,
    /// Model reported by the provider
    pub model: Option<String>,
    pub trace_id: Option<String>,
    pub finish_reason: Option<String>,
    /// Rate-limit headers, keyed by lowercased header name
    pub rate_limit: BTreeMap<String, String>,
}

/// The outcome of one provider round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message: Message,
    /// The request body with known credentials replaced
    pub raw_request: Value,
    pub raw_response: Value,
    pub usage: Usage,
    pub metadata: ResponseMetadata,
    /// Parsed JSON answer when a JSON response format was requested
    pub structured_output: Option<Value>,
}

impl Response {
    /// Build a response; `raw_request` is sanitized here, once
    pub fn new(
        message: Message,
        raw_request: &Value,
        raw_response: Value,
        usage: Usage,
        metadata: ResponseMetadata,
        sanitizer: &Sanitizer,
    ) -> Self {
        Self {
            message,
            raw_request: sanitizer.sanitize(raw_request),
            raw_response,
            usage,
            metadata,
            structured_output: None,
        }
    }

    /// Parse the message text as JSON when `format` expects it; unparsable text leaves `None`
    pub fn with_structured_output(mut self, format: Option<&ResponseFormat>) -> Self {
        if format.is_some_and(ResponseFormat::expects_json) {
            self.structured_output = serde_json::from_str(self.message.text().trim()).ok();
        }
        self
    }
}
