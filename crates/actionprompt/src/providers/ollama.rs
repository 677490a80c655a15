use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::base::{Embedding, GenerationRequest, Provider, ProviderContext, RawResponse};
use super::configs::{http_timeout, stored_options, OllamaProviderConfig};
use super::openai_compat::{
    parse_chat_response, parse_embedding, OpenAiCompatClient, CHAT_COMPLETIONS_PATH,
    EMBEDDINGS_PATH,
};
use super::params::{build_chat_parameters, embedding_model, into_body};
use super::streaming::{OpenAiChatAccumulator, StreamDelta};
use crate::errors::{GenerationError, GenerationResult, ProviderError};
use crate::models::content::{ContentPart, MessageContent};
use crate::models::options::GenerationOptions;
use crate::models::response::Response;

pub const OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Ollama through its OpenAI-compatible endpoints
pub struct OllamaProvider {
    client: OpenAiCompatClient,
    config: OllamaProviderConfig,
    context: ProviderContext,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig, mut context: ProviderContext) -> GenerationResult<Self> {
        let client = OpenAiCompatClient::new(
            &config.host,
            config.api_key.clone(),
            http_timeout(config.timeout_secs),
        )?;
        if let Some(key) = &config.api_key {
            context.sanitizer = context.sanitizer.with_secret("OLLAMA_API_KEY", key.clone());
        }

        Ok(Self {
            client,
            config,
            context,
        })
    }
}

/// Ollama has no file input
fn reject_files(request: &GenerationRequest) -> GenerationResult<()> {
    let has_file = request.messages.iter().any(|message| match &message.content {
        MessageContent::Parts(parts) => {
            parts.iter().any(|part| matches!(part, ContentPart::File { .. }))
        }
        _ => false,
    });
    if has_file {
        return Err(GenerationError::UnsupportedContent(
            "file parts are not accepted by Ollama".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn stored_options(&self) -> GenerationOptions {
        stored_options(self.config.model.as_deref(), &self.config.options)
    }

    fn build_request(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> GenerationResult<Value> {
        reject_files(request)?;
        Ok(into_body(build_chat_parameters(self.name(), request, options)?))
    }

    async fn send(&self, body: &Value) -> Result<RawResponse, ProviderError> {
        self.client.post(CHAT_COMPLETIONS_PATH, body).await
    }

    async fn send_streaming(
        &self,
        body: &Value,
        sink: &mpsc::Sender<StreamDelta>,
    ) -> Result<RawResponse, ProviderError> {
        self.client
            .post_streaming(CHAT_COMPLETIONS_PATH, body, OpenAiChatAccumulator::default(), sink)
            .await
    }

    fn parse(
        &self,
        raw: RawResponse,
        body: &Value,
        options: &GenerationOptions,
    ) -> GenerationResult<Response> {
        parse_chat_response(self.name(), raw, body, options, &self.context.sanitizer)
            .map_err(|e| self.parse_error(e, options))
    }

    async fn embed(&self, input: &str, options: &GenerationOptions) -> GenerationResult<Embedding> {
        let model = embedding_model(
            options,
            &self.context.agent_options,
            self.config.embedding_model.as_deref(),
            OLLAMA_EMBEDDING_MODEL,
        );
        let body = json!({"model": model, "input": input});
        debug!(provider = self.name(), model = %model, "requesting embedding");

        let raw = self
            .context
            .retry
            .run(|| self.client.post(EMBEDDINGS_PATH, &body))
            .await
            .map_err(|failure| self.provider_error(failure, options))?;

        // native servers answer `{embedding}` or `{embeddings}`, compatible ones `{data}`
        parse_embedding(&raw.body, Some(model)).map_err(|e| self.parse_error(e, options))
    }
}
