//! The OpenAI chat-completions wire client shared by every OpenAI-compatible backend.
//!
//! Adapters own one `OpenAiCompatClient` and add their own headers, body fields
//! and endpoint quirks on top.
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use super::base::{response_metadata, Embedding, RawResponse};
use super::streaming::{collect_sse, StreamAccumulator, StreamDelta};
use super::utils::{finish_reason, openai_response_to_message, post_json, send_request};
use crate::errors::{GenerationError, GenerationResult, ProviderError};
use crate::models::options::GenerationOptions;
use crate::models::response::{Response, Usage};
use crate::sanitizer::Sanitizer;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const EMBEDDINGS_PATH: &str = "/v1/embeddings";

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    host: String,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
}

impl OpenAiCompatClient {
    pub fn new(host: &str, api_key: Option<String>, timeout: Duration) -> GenerationResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            headers: Vec::new(),
        })
    }

    /// Add a header sent with every request
    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    fn request_headers(&self) -> Vec<(&str, String)> {
        let mut headers: Vec<(&str, String)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect();
        if let Some(key) = &self.api_key {
            headers.push(("Authorization", format!("Bearer {}", key)));
        }
        headers
    }

    pub async fn post(&self, path: &str, payload: &Value) -> Result<RawResponse, ProviderError> {
        post_json(&self.client, &self.url(path), &self.request_headers(), payload).await
    }

    /// POST with `stream: true` and fold the event stream through `accumulator`
    pub async fn post_streaming<A: StreamAccumulator>(
        &self,
        path: &str,
        payload: &Value,
        accumulator: A,
        sink: &mpsc::Sender<StreamDelta>,
    ) -> Result<RawResponse, ProviderError> {
        let mut request = self
            .client
            .post(self.url(path))
            .header("Accept", "text/event-stream")
            .json(payload);
        for (name, value) in self.request_headers() {
            request = request.header(name, value);
        }

        let response = send_request(request).await?;
        collect_sse(response, accumulator, sink).await
    }
}

/// Parse a chat-completions body into a `Response`
pub fn parse_chat_response(
    provider: &str,
    raw: RawResponse,
    request_body: &Value,
    options: &GenerationOptions,
    sanitizer: &Sanitizer,
) -> Result<Response, ProviderError> {
    let message = openai_response_to_message(&raw.body)?;
    let usage = raw
        .body
        .get("usage")
        .map(Usage::from_value)
        .unwrap_or_default();

    let mut metadata = response_metadata(provider, &raw);
    metadata.finish_reason = finish_reason(&raw.body);

    Ok(Response::new(
        message,
        request_body,
        raw.body,
        usage,
        metadata,
        sanitizer,
    )
    .with_structured_output(options.response_format.as_ref()))
}

/// Read an embedding vector from `{data: [{embedding}]}`, `{embedding}` or `{embeddings: [[..]]}`
pub fn parse_embedding(body: &Value, model: Option<String>) -> Result<Embedding, ProviderError> {
    let vector = body
        .pointer("/data/0/embedding")
        .or_else(|| body.get("embedding"))
        .or_else(|| body.pointer("/embeddings/0"))
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Decode(format!("no embedding in response: {}", body)))?;

    let vector = vector
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::Decode(format!("non-numeric embedding value {}", v)))
        })
        .collect::<Result<Vec<f32>, _>>()?;

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(model);

    Ok(Embedding { vector, model })
}
