//! Server-sent event decoding and per-protocol accumulators.
//!
//! Each accumulator folds stream events into the body the non-streaming endpoint
//! would have returned, so adapters parse streamed and buffered answers the same way.
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::base::RawResponse;
use crate::errors::ProviderError;

/// One incremental piece of generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDelta {
    pub text: String,
    /// Set on the last delta of a round trip
    pub finished: bool,
}

impl StreamDelta {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            finished: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            text: String::new(),
            finished: true,
        }
    }
}

/// A delta sink and the `Stream` that drains it
pub fn delta_channel(buffer: usize) -> (mpsc::Sender<StreamDelta>, ReceiverStream<StreamDelta>) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, ReceiverStream::new(rx))
}

/// Splits a byte stream into SSE event payloads, tolerating chunk boundaries
/// anywhere, including inside a UTF-8 sequence.
///
/// Consecutive `data:` lines of one event are joined with `\n`; a blank line
/// ends the event. `event:`, `id:`, `retry:` and comment lines are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.line(&line, &mut payloads);
        }
        payloads
    }

    /// Flush a trailing line that was not newline-terminated and any event
    /// still waiting for its blank line
    pub fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        let mut payloads = Vec::new();
        self.line(&line, &mut payloads);
        self.dispatch(&mut payloads);
        payloads
    }

    fn line(&mut self, line: &[u8], payloads: &mut Vec<String>) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            self.dispatch(payloads);
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data.push(data.to_string());
        }
    }

    fn dispatch(&mut self, payloads: &mut Vec<String>) {
        if self.data.is_empty() {
            return;
        }
        let payload = std::mem::take(&mut self.data).join("\n");
        if !payload.trim().is_empty() {
            payloads.push(payload.trim().to_string());
        }
    }
}

/// Folds decoded stream events into a complete response body
pub trait StreamAccumulator: Send {
    /// Apply one event, returning any text to forward to the caller
    fn apply(&mut self, event: &Value) -> Result<Option<String>, ProviderError>;

    /// The body in the non-streaming response shape
    fn finish(self) -> Value;
}

enum Payload {
    Done,
    Text(String),
    Skip,
}

fn handle_payload<A: StreamAccumulator>(
    accumulator: &mut A,
    data: &str,
) -> Result<Payload, ProviderError> {
    if data == "[DONE]" {
        return Ok(Payload::Done);
    }
    let event: Value = serde_json::from_str(data)?;
    Ok(match accumulator.apply(&event)? {
        Some(text) if !text.is_empty() => Payload::Text(text),
        _ => Payload::Skip,
    })
}

/// Drain an SSE response through `accumulator`, forwarding text deltas into `sink`.
///
/// Forwarding awaits buffer space, so the receiver has to be read while this runs.
/// A dropped receiver does not abort the call; the full body is still assembled.
pub async fn collect_sse<A: StreamAccumulator>(
    response: reqwest::Response,
    mut accumulator: A,
    sink: &mpsc::Sender<StreamDelta>,
) -> Result<RawResponse, ProviderError> {
    let headers = response.headers().clone();
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut done = false;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for data in decoder.push(&chunk) {
            match handle_payload(&mut accumulator, &data)? {
                Payload::Done => done = true,
                Payload::Text(text) => {
                    let _ = sink.send(StreamDelta::text(text)).await;
                }
                Payload::Skip => {}
            }
        }
        if done {
            break;
        }
    }

    if !done {
        for data in decoder.finish() {
            if let Payload::Text(text) = handle_payload(&mut accumulator, &data)? {
                let _ = sink.send(StreamDelta::text(text)).await;
            }
        }
    }

    let _ = sink.send(StreamDelta::finished()).await;
    debug!("stream finished");
    Ok(RawResponse::new(accumulator.finish()).with_headers(&headers))
}

fn stream_error(error: &Value) -> ProviderError {
    let kind = error.get("type").and_then(Value::as_str).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    match kind {
        "rate_limit_error" => ProviderError::RateLimited {
            message,
            retry_after: None,
        },
        "overloaded_error" | "api_error" | "server_error" => ProviderError::Server {
            status: 529,
            body: message,
        },
        _ => ProviderError::Other(format!("Stream error: {}", message)),
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Chat-completions chunks (`choices[0].delta`), also spoken by Ollama and OpenRouter
#[derive(Debug, Default)]
pub struct OpenAiChatAccumulator {
    header: Map<String, Value>,
    content: String,
    tool_calls: BTreeMap<u64, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<Value>,
}

impl StreamAccumulator for OpenAiChatAccumulator {
    fn apply(&mut self, event: &Value) -> Result<Option<String>, ProviderError> {
        if let Some(error) = event.get("error").filter(|e| !e.is_null()) {
            return Err(stream_error(error));
        }

        for key in ["id", "model", "provider", "created"] {
            if let Some(value) = event.get(key).filter(|v| !v.is_null()) {
                self.header.entry(key).or_insert_with(|| value.clone());
            }
        }
        if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(usage.clone());
        }

        let Some(choice) = event.get("choices").and_then(|c| c.get(0)) else {
            return Ok(None);
        };
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);
        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for (position, call) in calls.iter().enumerate() {
                let index = call
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(position as u64);
                let partial = self.tool_calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    partial.id = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                    partial.name.push_str(name);
                }
                if let Some(arguments) = call.pointer("/function/arguments").and_then(Value::as_str)
                {
                    partial.arguments.push_str(arguments);
                }
            }
        }

        let text = delta.get("content").and_then(Value::as_str).map(str::to_string);
        if let Some(text) = &text {
            self.content.push_str(text);
        }
        Ok(text)
    }

    fn finish(self) -> Value {
        let content = if self.content.is_empty() {
            Value::Null
        } else {
            Value::String(self.content)
        };
        let mut message = json!({"role": "assistant", "content": content});
        if !self.tool_calls.is_empty() {
            let calls: Vec<Value> = self
                .tool_calls
                .into_values()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments}
                    })
                })
                .collect();
            message["tool_calls"] = json!(calls);
        }

        let mut body = self.header;
        body.insert(
            "choices".to_string(),
            json!([{"index": 0, "message": message, "finish_reason": self.finish_reason}]),
        );
        if let Some(usage) = self.usage {
            body.insert("usage".to_string(), usage);
        }
        Value::Object(body)
    }
}

#[derive(Debug)]
enum AnthropicBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
    Other(Value),
}

/// Anthropic Messages events (`message_start`, `content_block_*`, `message_delta`)
#[derive(Debug, Default)]
pub struct AnthropicAccumulator {
    message: Map<String, Value>,
    blocks: BTreeMap<u64, AnthropicBlock>,
    stop_reason: Option<String>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
}

impl StreamAccumulator for AnthropicAccumulator {
    fn apply(&mut self, event: &Value) -> Result<Option<String>, ProviderError> {
        let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
        match event.get("type").and_then(Value::as_str).unwrap_or_default() {
            "message_start" => {
                if let Some(Value::Object(message)) = event.get("message") {
                    self.input_tokens = message
                        .get("usage")
                        .and_then(|u| u.get("input_tokens"))
                        .and_then(Value::as_i64);
                    self.message = message.clone();
                }
            }
            "content_block_start" => {
                let block = event.get("content_block").unwrap_or(&Value::Null);
                let block = match block.get("type").and_then(Value::as_str) {
                    Some("text") => AnthropicBlock::Text(
                        block
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    ),
                    Some("tool_use") => AnthropicBlock::ToolUse {
                        id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        input_json: String::new(),
                    },
                    _ => AnthropicBlock::Other(block.clone()),
                };
                self.blocks.insert(index, block);
            }
            "content_block_delta" => {
                let delta = event.get("delta").unwrap_or(&Value::Null);
                match (self.blocks.get_mut(&index), delta.get("type").and_then(Value::as_str)) {
                    (Some(AnthropicBlock::Text(text)), Some("text_delta")) => {
                        let piece = delta.get("text").and_then(Value::as_str).unwrap_or_default();
                        text.push_str(piece);
                        return Ok(Some(piece.to_string()));
                    }
                    (Some(AnthropicBlock::ToolUse { input_json, .. }), Some("input_json_delta")) => {
                        if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                            input_json.push_str(partial);
                        }
                    }
                    _ => debug!(index, "ignoring content block delta"),
                }
            }
            "message_delta" => {
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(tokens) = event.pointer("/usage/output_tokens").and_then(Value::as_i64) {
                    self.output_tokens = Some(tokens);
                }
            }
            "error" => return Err(stream_error(event.get("error").unwrap_or(event))),
            _ => {}
        }
        Ok(None)
    }

    fn finish(self) -> Value {
        let content: Vec<Value> = self
            .blocks
            .into_values()
            .map(|block| match block {
                AnthropicBlock::Text(text) => json!({"type": "text", "text": text}),
                AnthropicBlock::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = if input_json.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&input_json).unwrap_or_else(|_| {
                            warn!(input = %input_json, "streamed tool input is not valid JSON");
                            Value::String(input_json)
                        })
                    };
                    json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
                AnthropicBlock::Other(value) => value,
            })
            .collect();

        let mut body = self.message;
        body.insert("content".to_string(), json!(content));
        body.insert("stop_reason".to_string(), json!(self.stop_reason));
        body.insert(
            "usage".to_string(),
            json!({"input_tokens": self.input_tokens, "output_tokens": self.output_tokens}),
        );
        Value::Object(body)
    }
}

/// OpenAI Responses events; `response.completed` carries the full body
#[derive(Debug, Default)]
pub struct ResponsesAccumulator {
    text: String,
    items: Vec<Value>,
    completed: Option<Value>,
}

impl StreamAccumulator for ResponsesAccumulator {
    fn apply(&mut self, event: &Value) -> Result<Option<String>, ProviderError> {
        match event.get("type").and_then(Value::as_str).unwrap_or_default() {
            "response.output_text.delta" => {
                let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
                self.text.push_str(delta);
                return Ok(Some(delta.to_string()));
            }
            "response.output_item.done" => {
                if let Some(item) = event.get("item") {
                    self.items.push(item.clone());
                }
            }
            "response.completed" => self.completed = event.get("response").cloned(),
            "response.failed" => {
                let error = event
                    .pointer("/response/error")
                    .cloned()
                    .unwrap_or_else(|| event.clone());
                return Err(stream_error(&error));
            }
            "error" => return Err(stream_error(event)),
            _ => {}
        }
        Ok(None)
    }

    fn finish(self) -> Value {
        if let Some(completed) = self.completed {
            return completed;
        }
        let output = if self.items.is_empty() {
            json!([{
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": self.text}]
            }])
        } else {
            json!(self.items)
        };
        json!({"object": "response", "status": "incomplete", "output": output})
    }
}
