use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::base::{GenerationRequest, Provider, ProviderContext, RawResponse};
use super::streaming::StreamDelta;
use crate::errors::{GenerationResult, ProviderError};
use crate::models::message::Message;
use crate::models::options::GenerationOptions;
use crate::models::response::{Response, ResponseMetadata, Usage};

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    context: ProviderContext,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
            context: ProviderContext::new(),
        }
    }

    fn next_message(&self) -> Message {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Message::assistant("")
        } else {
            responses.remove(0)
        }
    }

    /// The message list sent on each round trip so far
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn context(&self) -> &ProviderContext {
        &self.context
    }

    fn stored_options(&self) -> GenerationOptions {
        GenerationOptions::new().with_model("mock-model")
    }

    fn build_request(
        &self,
        request: &GenerationRequest,
        options: &GenerationOptions,
    ) -> GenerationResult<Value> {
        self.requests.lock().unwrap().push(request.messages.clone());
        Ok(json!({"model": options.model, "messages": request.messages.len()}))
    }

    async fn send(&self, _body: &Value) -> Result<RawResponse, ProviderError> {
        Ok(RawResponse::new(serde_json::to_value(self.next_message())?))
    }

    /// Replays the scripted message text as a single delta
    async fn send_streaming(
        &self,
        _body: &Value,
        sink: &mpsc::Sender<StreamDelta>,
    ) -> Result<RawResponse, ProviderError> {
        let message = self.next_message();
        let text = message.text();
        if !text.is_empty() {
            let _ = sink.send(StreamDelta::text(text)).await;
        }
        let _ = sink.send(StreamDelta::finished()).await;
        Ok(RawResponse::new(serde_json::to_value(message)?))
    }

    fn parse(
        &self,
        raw: RawResponse,
        body: &Value,
        options: &GenerationOptions,
    ) -> GenerationResult<Response> {
        let message: Message = serde_json::from_value(raw.body.clone())
            .map_err(|e| ProviderError::Decode(e.to_string()))
            .map_err(|e| self.parse_error(e, options))?;
        Ok(Response::new(
            message,
            body,
            raw.body,
            Usage::default(),
            ResponseMetadata::default(),
            &self.context.sanitizer,
        ))
    }
}
