use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::params::resolve_options;
use super::retry::{RetryFailure, RetryPolicy};
use super::streaming::StreamDelta;
use crate::errors::{GenerationError, GenerationProviderError, GenerationResult, ProviderError};
use crate::models::message::Message;
use crate::models::options::GenerationOptions;
use crate::models::prompt::Prompt;
use crate::models::response::{ResponseMetadata, Response};
use crate::sanitizer::Sanitizer;

/// A provider payload as received, before parsing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResponse {
    pub body: Value,
    /// Response headers, lowercased names
    pub headers: BTreeMap<String, String>,
}

impl RawResponse {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        self.headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        self
    }
}

/// Everything one provider call needs, passed per call so adapters stay stateless
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    /// Function tool schemas advertised this turn
    pub tools: Vec<Value>,
    /// Options set when the conversation turn was initiated
    pub options: GenerationOptions,
    /// Explicit arguments of this call, the highest precedence level
    pub overrides: GenerationOptions,
}

impl GenerationRequest {
    pub fn from_prompt(prompt: &Prompt) -> Self {
        Self {
            messages: prompt.messages().to_vec(),
            tools: prompt.tools.clone(),
            options: prompt.options.clone(),
            overrides: GenerationOptions::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: GenerationOptions) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Immutable per-adapter state shared by every call
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    /// Defaults configured once for the agent using this adapter
    pub agent_options: GenerationOptions,
    pub retry: RetryPolicy,
    pub sanitizer: Sanitizer,
    pub verbose_errors: bool,
}

impl ProviderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent_options(mut self, options: GenerationOptions) -> Self {
        self.agent_options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_verbose_errors(mut self, verbose: bool) -> Self {
        self.verbose_errors = verbose;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: Option<String>,
}

/// Base trait for LLM providers (OpenAI, Anthropic, Ollama, OpenRouter)
///
/// Adapters implement the wire-specific steps; `complete` and `complete_streaming`
/// resolve options, build the body, run the call under the retry policy and parse.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Adapter name reported in metadata and errors
    fn name(&self) -> &str;

    fn context(&self) -> &ProviderContext;

    /// The stored configuration level of the option precedence chain
    fn stored_options(&self) -> GenerationOptions;

    /// Build the outbound body from fully resolved options
    fn build_request(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> GenerationResult<Value>;

    /// One network round trip
    async fn send(&self, body: &Value) -> Result<RawResponse, ProviderError>;

    /// Stream one round trip, pushing deltas into `sink`; the returned body has the
    /// same shape `send` would have produced
    async fn send_streaming(
        &self,
        _body: &Value,
        _sink: &mpsc::Sender<StreamDelta>,
    ) -> Result<RawResponse, ProviderError> {
        Err(ProviderError::Other(format!(
            "{} does not support streaming",
            self.name()
        )))
    }

    fn parse(
        &self,
        raw: RawResponse,
        body: &Value,
        options: &GenerationOptions,
    ) -> GenerationResult<Response>;

    async fn embed(&self, _input: &str, _options: &GenerationOptions) -> GenerationResult<Embedding> {
        Err(GenerationError::Unsupported(format!(
            "{} does not support embeddings",
            self.name()
        )))
    }

    /// call-site > prompt runtime > agent default > stored configuration
    fn resolve_options(&self, request: &GenerationRequest) -> GenerationOptions {
        resolve_options(
            &request.overrides,
            &request.options,
            &self.context().agent_options,
            &self.stored_options(),
        )
    }

    /// Generate the next assistant message
    async fn complete(&self, request: &GenerationRequest) -> GenerationResult<Response> {
        let options = self.resolve_options(request);
        let body = self.build_request(request, &options)?;
        debug!(provider = self.name(), model = ?options.model, "sending generation request");

        let raw = self
            .context()
            .retry
            .run(|| self.send(&body))
            .await
            .map_err(|failure| self.provider_error(failure, &options))?;

        self.parse(raw, &body, &options)
    }

    /// Generate the next assistant message, streaming text deltas into `sink`
    async fn complete_streaming(
        &self,
        request: &GenerationRequest,
        sink: mpsc::Sender<StreamDelta>,
    ) -> GenerationResult<Response> {
        let mut options = self.resolve_options(request);
        options.stream = Some(true);
        let body = self.build_request(request, &options)?;
        debug!(provider = self.name(), model = ?options.model, "sending streaming request");

        let raw = self
            .context()
            .retry
            .run(|| self.send_streaming(&body, &sink))
            .await
            .map_err(|failure| self.provider_error(failure, &options))?;

        self.parse(raw, &body, &options)
    }

    /// Wrap a final failure in the uniform boundary error
    fn provider_error(&self, failure: RetryFailure, options: &GenerationOptions) -> GenerationError {
        info!(
            provider = self.name(),
            attempts = failure.attempts,
            kind = %failure.error.kind(),
            "generation failed"
        );
        GenerationProviderError::new(
            &failure.error,
            self.name(),
            options.model.clone(),
            failure.attempts,
        )
        .verbose(self.context().verbose_errors)
        .into()
    }

    /// A response that arrived but could not be understood
    fn parse_error(&self, error: ProviderError, options: &GenerationOptions) -> GenerationError {
        self.provider_error(RetryFailure { error, attempts: 1 }, options)
    }
}

/// Collect the metadata every adapter attaches when the transport exposes it
pub fn response_metadata(provider: &str, raw: &RawResponse) -> ResponseMetadata {
    let rate_limit = raw
        .headers
        .iter()
        .filter(|(name, _)| name.contains("ratelimit") || name.as_str() == "retry-after")
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let trace_id = ["x-request-id", "request-id", "x-trace-id", "cf-ray"]
        .iter()
        .find_map(|name| raw.headers.get(*name).cloned())
        .or_else(|| raw.body.get("id").and_then(Value::as_str).map(str::to_string));

    ResponseMetadata {
        provider: provider.to_string(),
        routed_provider: raw
            .body
            .get("provider")
            .and_then(Value::as_str)
            .map(str::to_string),
        model: raw
            .body
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string),
        trace_id,
        finish_reason: None,
        rate_limit,
    }
}
