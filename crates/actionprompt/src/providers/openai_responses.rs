//! OpenAI Responses API (`/v1/responses`).
//!
//! Same model family as chat completions but a different wire shape: system text
//! moves to `instructions`, history becomes typed input items, tools are flat and
//! structured output lives under `text.format`.
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use super::base::{response_metadata, GenerationRequest, Provider, ProviderContext, RawResponse};
use super::configs::{http_timeout, stored_options, OpenAiProviderConfig};
use super::openai_compat::OpenAiCompatClient;
use super::params::{assemble_tools, into_body, merge_extra, require_model};
use super::streaming::{ResponsesAccumulator, StreamDelta};
use super::tool_calls::parse_tool_calls;
use super::utils::{content_parts, sanitize_function_name, tool_schema_parts};
use crate::errors::{GenerationError, GenerationResult, ProviderError};
use crate::models::content::{ContentPart, MediaSource};
use crate::models::message::Message;
use crate::models::options::{GenerationOptions, ResponseFormat};
use crate::models::response::{Response, Usage};
use crate::models::role::Role;

pub const RESPONSES_PATH: &str = "/v1/responses";

fn part_to_responses(part: &ContentPart, role: Role) -> GenerationResult<Value> {
    match part {
        ContentPart::Text { text } if role == Role::Assistant => {
            Ok(json!({"type": "output_text", "text": text}))
        }
        ContentPart::Text { text } => Ok(json!({"type": "input_text", "text": text})),
        ContentPart::Image { source, detail } => Ok(json!({
            "type": "input_image",
            "image_url": source.to_url(),
            "detail": detail.clone().unwrap_or_else(|| "auto".to_string()),
        })),
        ContentPart::File { source, filename } => Ok(match source {
            MediaSource::Url { url } => json!({"type": "input_file", "file_url": url}),
            MediaSource::Base64 { .. } => json!({
                "type": "input_file",
                "filename": filename.clone().unwrap_or_else(|| "file".to_string()),
                "file_data": source.to_url(),
            }),
        }),
        ContentPart::Audio { .. } => Err(GenerationError::UnsupportedContent(
            "audio parts are not accepted by the Responses API".to_string(),
        )),
    }
}

/// Convert non-system messages to Responses input items
pub fn messages_to_responses_input(messages: &[Message]) -> GenerationResult<Vec<Value>> {
    let mut items = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        if message.role == Role::Tool {
            items.push(json!({
                "type": "function_call_output",
                "call_id": message.action_id,
                "output": message.text(),
            }));
            continue;
        }

        let content = match content_parts(message)? {
            None => json!(message.content.text()),
            Some(parts) => Value::Array(
                parts
                    .iter()
                    .map(|part| part_to_responses(part, message.role))
                    .collect::<GenerationResult<Vec<_>>>()?,
            ),
        };
        if !message.content.is_empty() || !message.action_requested() {
            items.push(json!({"role": message.role, "content": content}));
        }

        for action in &message.requested_actions {
            items.push(json!({
                "type": "function_call",
                "call_id": action.id,
                "name": sanitize_function_name(&action.name),
                "arguments": action.arguments().to_string(),
            }));
        }
    }
    Ok(items)
}

/// System messages joined into the `instructions` field
pub fn instructions(messages: &[Message]) -> Option<String> {
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text)
        .collect();
    (!system.is_empty()).then(|| system.join("\n\n"))
}

/// Flat `{type: "function", name, description, parameters}` tools; flat entries pass through
pub fn tools_to_responses_spec(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let flat = tool.get("type").and_then(Value::as_str) == Some("function")
                && tool.get("name").is_some()
                && tool.get("function").is_none();
            if flat {
                return Some(tool.clone());
            }
            let (name, description, parameters) = tool_schema_parts(tool)?;
            Some(json!({
                "type": "function",
                "name": name,
                "description": description,
                "parameters": parameters,
            }))
        })
        .collect()
}

pub fn text_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::Text => json!({"format": {"type": "text"}}),
        ResponseFormat::JsonObject => json!({"format": {"type": "json_object"}}),
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        } => {
            let mut envelope = json!({"type": "json_schema", "name": name, "schema": schema});
            if let Some(strict) = strict {
                envelope["strict"] = json!(strict);
            }
            json!({"format": envelope})
        }
    }
}

/// Read the assistant message from a Responses body's `output` items
pub fn responses_output_to_message(body: &Value) -> Result<Message, ProviderError> {
    let output = body
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Decode(format!("response has no output: {}", body)))?;

    let mut texts = Vec::new();
    let mut calls = Vec::new();
    for item in output {
        match item.get("type").and_then(Value::as_str) {
            Some("message") => {
                for part in item.get("content").and_then(Value::as_array).into_iter().flatten() {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        texts.push(text.to_string());
                    }
                }
            }
            Some("function_call") => {
                // `call_id` correlates the later function_call_output, `id` does not
                let mut call = item.clone();
                if let Some(call_id) = item.get("call_id") {
                    call["id"] = call_id.clone();
                }
                calls.push(call);
            }
            _ => {}
        }
    }

    Ok(Message::assistant(texts.join("")).with_actions(parse_tool_calls(&calls)))
}

pub struct OpenAiResponsesProvider {
    client: OpenAiCompatClient,
    config: OpenAiProviderConfig,
    context: ProviderContext,
}

impl OpenAiResponsesProvider {
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
impl Provider for OpenAiResponsesProvider {
    fn name(&self) -> &str {
        "openai_responses"
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
        let mut payload = Map::new();
        payload.insert("model".into(), json!(require_model(self.name(), options)?));
        if let Some(instructions) = instructions(&request.messages) {
            payload.insert("instructions".into(), json!(instructions));
        }
        payload.insert(
            "input".into(),
            json!(messages_to_responses_input(&request.messages)?),
        );

        let tools = assemble_tools(tools_to_responses_spec(&request.tools), options);
        if !tools.is_empty() {
            payload.insert("tools".into(), json!(tools));
            if let Some(choice) = &options.tool_choice {
                payload.insert("tool_choice".into(), choice.clone());
            }
        }
        if let Some(temperature) = options.temperature {
            payload.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            payload.insert("max_output_tokens".into(), json!(max_tokens));
        }
        if let Some(format) = &options.response_format {
            payload.insert("text".into(), text_format(format));
        }
        if options.stream == Some(true) {
            payload.insert("stream".into(), json!(true));
        }

        merge_extra(&mut payload, &options.extra);
        Ok(into_body(payload))
    }

    async fn send(&self, body: &Value) -> Result<RawResponse, ProviderError> {
        self.client.post(RESPONSES_PATH, body).await
    }

    async fn send_streaming(
        &self,
        body: &Value,
        sink: &mpsc::Sender<StreamDelta>,
    ) -> Result<RawResponse, ProviderError> {
        self.client
            .post_streaming(RESPONSES_PATH, body, ResponsesAccumulator::default(), sink)
            .await
    }

    fn parse(
        &self,
        raw: RawResponse,
        body: &Value,
        options: &GenerationOptions,
    ) -> GenerationResult<Response> {
        let message =
            responses_output_to_message(&raw.body).map_err(|e| self.parse_error(e, options))?;
        let usage = raw
            .body
            .get("usage")
            .map(Usage::from_value)
            .unwrap_or_default();
        let mut metadata = response_metadata(self.name(), &raw);
        metadata.finish_reason = raw
            .body
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Response::new(
            message,
            body,
            raw.body,
            usage,
            metadata,
            &self.context.sanitizer,
        )
        .with_structured_output(options.response_format.as_ref()))
    }
}
