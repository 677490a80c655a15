use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::warn;

use super::base::{response_metadata, GenerationRequest, Provider, ProviderContext, RawResponse};
use super::configs::{http_timeout, stored_options, AnthropicProviderConfig};
use super::params::{filter_builtin_tools, into_body, merge_extra, require_model};
use super::streaming::{collect_sse, AnthropicAccumulator, StreamDelta};
use super::tool_calls::parse_tool_calls;
use super::utils::{
    content_parts, merge_consecutive_messages, post_json, sanitize_function_name, send_request,
    tool_schema_parts,
};
use crate::errors::{GenerationError, GenerationResult, ProviderError};
use crate::models::content::{ContentPart, MediaSource};
use crate::models::message::Message;
use crate::models::options::{GenerationOptions, ResponseFormat};
use crate::models::response::{Response, Usage};
use crate::models::role::Role;

pub const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;
const JSON_RESPONSE_TOOL: &str = "json_response";
const WEB_SEARCH_TOOL: &str = "web_search_20250305";

fn text_block(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

fn media_source(source: &MediaSource) -> Value {
    match source {
        MediaSource::Url { url } => json!({"type": "url", "url": url}),
        MediaSource::Base64 { media_type, data } => json!({
            "type": "base64",
            "media_type": media_type,
            "data": data,
        }),
    }
}

fn part_to_anthropic(part: &ContentPart) -> GenerationResult<Value> {
    match part {
        ContentPart::Text { text } => Ok(text_block(text)),
        ContentPart::Image { source, .. } => {
            Ok(json!({"type": "image", "source": media_source(source)}))
        }
        ContentPart::File { source, .. } => {
            Ok(json!({"type": "document", "source": media_source(source)}))
        }
        ContentPart::Audio { .. } => Err(GenerationError::UnsupportedContent(
            "audio parts are not accepted by Anthropic".to_string(),
        )),
    }
}

/// The `system` field: every system message, in order
pub fn system_prompt(messages: &[Message]) -> Option<String> {
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text)
        .collect();
    (!system.is_empty()).then(|| system.join("\n\n"))
}

/// Convert non-system messages; tool results travel as user turns and
/// consecutive same-role turns are merged
pub fn messages_to_anthropic_spec(messages: &[Message]) -> GenerationResult<Vec<Value>> {
    let mut converted = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        let wire = match message.role {
            Role::Tool => json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": message.action_id,
                    "content": message.text(),
                }]
            }),
            Role::Assistant if message.action_requested() => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(text_block(&message.text()));
                }
                for action in &message.requested_actions {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": action.id,
                        "name": sanitize_function_name(&action.name),
                        "input": action.arguments(),
                    }));
                }
                json!({"role": "assistant", "content": blocks})
            }
            role => {
                let content = match content_parts(message)? {
                    None => json!(message.content.text()),
                    Some(parts) => Value::Array(
                        parts
                            .iter()
                            .map(part_to_anthropic)
                            .collect::<GenerationResult<Vec<_>>>()?,
                    ),
                };
                json!({"role": role, "content": content})
            }
        };
        converted.push(wire);
    }
    Ok(merge_consecutive_messages(converted, text_block))
}

/// `{name, description, input_schema}` tools; entries already in that shape pass through
pub fn tools_to_anthropic_spec(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let native = tool.get("input_schema").is_some()
                && tool.get("name").is_some()
                && tool.get("function").is_none();
            if native {
                return Some(tool.clone());
            }
            let (name, description, parameters) = tool_schema_parts(tool)?;
            Some(json!({
                "name": name,
                "description": description,
                "input_schema": parameters,
            }))
        })
        .collect()
}

/// The forced tool that carries a structured answer, if JSON output was requested
fn structured_output_tool(format: Option<&ResponseFormat>) -> Option<(String, Value)> {
    match format? {
        ResponseFormat::Text => None,
        ResponseFormat::JsonObject => Some((
            JSON_RESPONSE_TOOL.to_string(),
            json!({"type": "object", "additionalProperties": true}),
        )),
        ResponseFormat::JsonSchema { name, schema, .. } => {
            Some((sanitize_function_name(name), schema.clone()))
        }
    }
}

/// Convert a Messages API body into the assistant message.
///
/// A `tool_use` block for `structured_tool` is the structured answer, not an action,
/// and becomes JSON text content.
pub fn anthropic_response_to_message(
    body: &Value,
    structured_tool: Option<&str>,
) -> Result<Message, ProviderError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Decode(format!("response has no content: {}", body)))?;

    let mut texts = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
            Some("tool_use")
                if structured_tool.is_some()
                    && block.get("name").and_then(Value::as_str) == structured_tool =>
            {
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                return Ok(Message::assistant(input.to_string()));
            }
            Some("tool_use") => calls.push(block.clone()),
            _ => {}
        }
    }

    Ok(Message::assistant(texts.join("\n")).with_actions(parse_tool_calls(&calls)))
}

/// Anthropic reports context overflow as a plain 400
fn classify(error: ProviderError) -> ProviderError {
    match error {
        ProviderError::Client { status: 400, body } if body.contains("prompt is too long") => {
            ProviderError::ContextLengthExceeded(body)
        }
        other => other,
    }
}

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
    context: ProviderContext,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig, mut context: ProviderContext) -> GenerationResult<Self> {
        let client = Client::builder()
            .timeout(http_timeout(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Configuration(format!("HTTP client: {}", e)))?;
        context.sanitizer = context
            .sanitizer
            .with_secret("ANTHROPIC_API_KEY", config.api_key.clone());

        Ok(Self {
            client,
            config,
            context,
        })
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.config.host.trim_end_matches('/'))
    }

    fn headers(&self) -> Vec<(&str, String)> {
        vec![
            ("x-api-key", self.config.api_key.clone()),
            ("anthropic-version", self.config.anthropic_version.clone()),
        ]
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
        if let Some(system) = system_prompt(&request.messages) {
            payload.insert("system".into(), json!(system));
        }
        payload.insert(
            "messages".into(),
            json!(messages_to_anthropic_spec(&request.messages)?),
        );
        payload.insert(
            "max_tokens".into(),
            json!(options.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS)),
        );

        let mut tools = tools_to_anthropic_spec(&request.tools);
        if let Some(builtins) = &options.builtin_tools {
            for builtin in filter_builtin_tools(builtins) {
                if builtin["type"] == "web_search" {
                    let mut tool = builtin.clone();
                    tool["type"] = json!(WEB_SEARCH_TOOL);
                    tool["name"] = json!("web_search");
                    tools.push(tool);
                } else {
                    warn!(
                        provider = self.name(),
                        tool = %builtin["type"],
                        "built-in tool not supported by this provider, dropping"
                    );
                }
            }
        }

        let mut tool_choice = options.tool_choice.clone();
        if let Some((name, schema)) = structured_output_tool(options.response_format.as_ref()) {
            tools.push(json!({
                "name": name,
                "description": "Respond with a JSON object matching the input schema",
                "input_schema": schema,
            }));
            tool_choice = Some(json!({"type": "tool", "name": name}));
        }
        if !tools.is_empty() {
            payload.insert("tools".into(), json!(tools));
            if let Some(choice) = tool_choice {
                payload.insert("tool_choice".into(), choice);
            }
        }

        if let Some(temperature) = options.temperature {
            payload.insert("temperature".into(), json!(temperature));
        }
        if options.stream == Some(true) {
            payload.insert("stream".into(), json!(true));
        }

        merge_extra(&mut payload, &options.extra);
        Ok(into_body(payload))
    }

    async fn send(&self, body: &Value) -> Result<RawResponse, ProviderError> {
        post_json(&self.client, &self.url(), &self.headers(), body)
            .await
            .map_err(classify)
    }

    async fn send_streaming(
        &self,
        body: &Value,
        sink: &mpsc::Sender<StreamDelta>,
    ) -> Result<RawResponse, ProviderError> {
        let mut request = self.client.post(self.url()).json(body);
        for (name, value) in self.headers() {
            request = request.header(name, value);
        }
        let response = send_request(request).await.map_err(classify)?;
        collect_sse(response, AnthropicAccumulator::default(), sink).await
    }

    fn parse(
        &self,
        raw: RawResponse,
        body: &Value,
        options: &GenerationOptions,
    ) -> GenerationResult<Response> {
        let structured = structured_output_tool(options.response_format.as_ref());
        let message = anthropic_response_to_message(
            &raw.body,
            structured.as_ref().map(|(name, _)| name.as_str()),
        )
        .map_err(|e| self.parse_error(e, options))?;

        let usage = raw
            .body
            .get("usage")
            .map(Usage::from_value)
            .unwrap_or_default();
        let mut metadata = response_metadata(self.name(), &raw);
        metadata.finish_reason = raw
            .body
            .get("stop_reason")
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
