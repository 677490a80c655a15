use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::base::{Embedding, GenerationRequest, Provider, ProviderContext, RawResponse};
use super::configs::{http_timeout, stored_options, OpenAiProviderConfig};
use super::openai_compat::{
    parse_chat_response, parse_embedding, OpenAiCompatClient, CHAT_COMPLETIONS_PATH,
    EMBEDDINGS_PATH,
};
use super::params::{build_chat_parameters, embedding_model, into_body};
use super::streaming::{OpenAiChatAccumulator, StreamDelta};
use crate::errors::{GenerationResult, ProviderError};
use crate::models::options::GenerationOptions;
use crate::models::response::Response;

pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// OpenAI chat completions
pub struct OpenAiProvider {
    client: OpenAiCompatClient,
    config: OpenAiProviderConfig,
    context: ProviderContext,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig, mut context: ProviderContext) -> GenerationResult<Self> {
        let mut client = OpenAiCompatClient::new(
            &config.host,
            Some(config.api_key.clone()),
            http_timeout(config.timeout_secs),
        )?;
        if let Some(organization) = &config.organization {
            client = client.with_header("OpenAI-Organization", organization.clone());
        }
        context.sanitizer = context
            .sanitizer
            .with_secret("OPENAI_API_KEY", config.api_key.clone());

        Ok(Self {
            client,
            config,
            context,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
            OPENAI_EMBEDDING_MODEL,
        );
        let body = json!({"model": model, "input": input});
        debug!(provider = self.name(), model = %model, "requesting embedding");

        let raw = self
            .context
            .retry
            .run(|| self.client.post(EMBEDDINGS_PATH, &body))
            .await
            .map_err(|failure| self.provider_error(failure, options))?;

        parse_embedding(&raw.body, Some(model)).map_err(|e| self.parse_error(e, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, GenerationError};
    use crate::models::message::Message;
    use crate::models::options::ResponseFormat;
    use crate::models::prompt::Prompt;
    use crate::providers::retry::RetryPolicy;
    use anyhow::Result;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(response_body: Value) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server, RetryPolicy::disabled());
        (mock_server, provider)
    }

    fn provider_for(server: &MockServer, retry: RetryPolicy) -> OpenAiProvider {
        let mut config = OpenAiProviderConfig::new("test_api_key");
        config.host = server.uri();
        config.model = Some("gpt-4o".to_string());
        OpenAiProvider::new(config, ProviderContext::new().with_retry(retry)).unwrap()
    }

    fn request(text: &str) -> GenerationRequest {
        GenerationRequest::from_prompt(
            &Prompt::from_messages(vec![Message::user(text)]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });

        let (_, provider) = setup_mock_server(response_body).await;
        let response = provider.complete(&request("Hello?")).await?;

        assert_eq!(response.message.text(), "Hello! How can I assist you today?");
        assert_eq!(response.usage.input_tokens, Some(12));
        assert_eq!(response.usage.output_tokens, Some(15));
        assert_eq!(response.usage.total_tokens, Some(27));
        assert_eq!(response.metadata.trace_id.as_deref(), Some("chatcmpl-123"));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_tool_request() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-tool",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "get_weather",
                            "arguments": "{\"location\":\"San Francisco, CA\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 15, "total_tokens": 35}
        });

        let (_, provider) = setup_mock_server(response_body).await;
        let mut req = request("What's the weather in San Francisco?");
        req.tools = vec![json!({
            "name": "get_weather",
            "description": "Gets the current weather for a location",
            "parameters": {
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }
        })];

        let response = provider.complete(&req).await?;
        assert!(response.message.action_requested());
        let action = &response.message.requested_actions[0];
        assert_eq!(action.id, "call_123");
        assert_eq!(action.name, "get_weather");
        assert_eq!(action.arguments(), json!({"location": "San Francisco, CA"}));
        Ok(())
    }

    #[tokio::test]
    async fn test_request_body_carries_resolved_options() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "temperature": 0.25,
                "response_format": {"type": "json_schema", "json_schema": {"name": "answer"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"value\": 5}"}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server, RetryPolicy::disabled());
        let req = request("Add 2 and 3").with_overrides(
            GenerationOptions::new()
                .with_model("gpt-4o-mini")
                .with_temperature(0.25)
                .with_response_format(ResponseFormat::json_schema(
                    "answer",
                    json!({"type": "object"}),
                    Some(true),
                )),
        );

        let response = provider.complete(&req).await?;
        assert_eq!(response.structured_output, Some(json!({"value": 5})));
        assert_eq!(response.raw_request["model"], "gpt-4o-mini");
        Ok(())
    }

    #[tokio::test]
    async fn test_raw_request_is_sanitized() -> Result<()> {
        let (_, provider) = setup_mock_server(json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        }))
        .await;
        let req = request("hi").with_overrides(
            GenerationOptions::new().with_extra("user", json!("key test_api_key leaked")),
        );

        let response = provider.complete(&req).await?;
        assert_eq!(response.raw_request["user"], "key <OPENAI_API_KEY> leaked");
        Ok(())
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_wrapped() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let retry = RetryPolicy::enabled(2).with_base_delay(std::time::Duration::from_millis(1));
        let provider = provider_for(&mock_server, retry);

        let err = provider.complete(&request("hi")).await.unwrap_err();
        match err {
            GenerationError::Provider(error) => {
                assert_eq!(error.kind, ErrorKind::ServerError);
                assert_eq!(error.attempts, 3);
                assert_eq!(error.provider, "openai");
            }
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_context_length_error_is_not_retried() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "context_length_exceeded", "message": "too long"}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let retry = RetryPolicy::enabled(3).with_base_delay(std::time::Duration::from_millis(1));
        let provider = provider_for(&mock_server, retry);

        match provider.complete(&request("hi")).await.unwrap_err() {
            GenerationError::Provider(error) => {
                assert_eq!(error.kind, ErrorKind::ContextLengthExceeded)
            }
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_streaming() -> Result<()> {
        let mock_server = MockServer::start().await;
        let sse = concat!(
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server, RetryPolicy::disabled());
        let (tx, mut rx) = mpsc::channel(16);
        let response = provider.complete_streaming(&request("hi"), tx).await?;

        let mut deltas = Vec::new();
        while let Some(delta) = rx.recv().await {
            deltas.push(delta);
        }
        assert_eq!(
            deltas,
            vec![
                StreamDelta::text("Hel"),
                StreamDelta::text("lo"),
                StreamDelta::finished()
            ]
        );
        assert_eq!(response.message.text(), "Hello");
        assert_eq!(response.metadata.finish_reason.as_deref(), Some("stop"));
        Ok(())
    }

    #[tokio::test]
    async fn test_embed() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"model": "text-embedding-3-small", "input": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5, -0.5]}],
                "model": "text-embedding-3-small"
            })))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server, RetryPolicy::disabled());
        let embedding = provider.embed("hello", &GenerationOptions::new()).await?;
        assert_eq!(embedding.vector, vec![0.5f32, -0.5]);
        Ok(())
    }

    #[tokio::test]
    async fn test_embed_call_site_model_beats_stored_model() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"model": "text-embedding-3-large"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [1.0]}],
                "model": "text-embedding-3-large"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = OpenAiProviderConfig::new("test_api_key");
        config.host = mock_server.uri();
        config.embedding_model = Some("text-embedding-3-small".to_string());
        let provider = OpenAiProvider::new(
            config,
            ProviderContext::new().with_retry(RetryPolicy::disabled()),
        )?;

        let mut options = GenerationOptions::new();
        options
            .extra
            .insert("embedding_model".into(), json!("text-embedding-3-large"));
        let embedding = provider.embed("hello", &options).await?;
        assert_eq!(embedding.model.as_deref(), Some("text-embedding-3-large"));
        Ok(())
    }
}
