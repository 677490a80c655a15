use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::warn;

use super::base::RawResponse;
use super::tool_calls::{extract_tool_name, parse_tool_calls};
use crate::errors::{GenerationError, GenerationResult, ProviderError};
use crate::models::content::{ContentPart, ContentType, MediaSource, MessageContent};
use crate::models::message::Message;
use crate::models::role::Role;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Resolve a message body into parts according to its declared content type.
///
/// `Ok(None)` means the body is sent as a bare string.
pub fn content_parts(message: &Message) -> GenerationResult<Option<Vec<ContentPart>>> {
    match (&message.content_type, &message.content) {
        (ContentType::Text | ContentType::ApplicationJson, MessageContent::Text(_)) => Ok(None),
        (ContentType::ImageUrl, MessageContent::Text(url)) => {
            Ok(Some(vec![ContentPart::image_url(url.clone())]))
        }
        (ContentType::MultipartMixed, MessageContent::Text(text)) => {
            Ok(Some(vec![ContentPart::text(text.clone())]))
        }
        (ContentType::Other(other), _) => Err(GenerationError::UnsupportedContent(format!(
            "content type '{}' cannot be sent to a provider",
            other
        ))),
        (_, MessageContent::Parts(parts)) => Ok(Some(parts.clone())),
    }
}

/// One content part in the chat-completions shape
pub fn part_to_openai(part: &ContentPart) -> GenerationResult<Value> {
    match part {
        ContentPart::Text { text } => Ok(json!({"type": "text", "text": text})),
        ContentPart::Image { source, detail } => {
            let mut image_url = json!({"url": source.to_url()});
            if let Some(detail) = detail {
                image_url["detail"] = json!(detail);
            }
            Ok(json!({"type": "image_url", "image_url": image_url}))
        }
        ContentPart::File { source, filename } => match source {
            MediaSource::Base64 { .. } => Ok(json!({
                "type": "file",
                "file": {
                    "filename": filename.clone().unwrap_or_else(|| "file".to_string()),
                    "file_data": source.to_url(),
                }
            })),
            MediaSource::Url { url } => Err(GenerationError::UnsupportedContent(format!(
                "chat completions cannot reference files by url ({})",
                url
            ))),
        },
        ContentPart::Audio { data, format } => Ok(json!({
            "type": "input_audio",
            "input_audio": {"data": data, "format": format}
        })),
    }
}

/// Parse one chat-completions content part back into the canonical model.
///
/// Unknown part types and parts missing their payload are decode errors, so
/// no content is lost without the caller hearing about it.
pub fn part_from_openai(part: &Value) -> Result<ContentPart, ProviderError> {
    let malformed = || ProviderError::Decode(format!("malformed content part: {}", part));
    let field = |outer: &str, inner: &str| {
        part.get(outer)
            .and_then(|value| value.get(inner))
            .and_then(Value::as_str)
            .ok_or_else(malformed)
    };

    match part.get("type").and_then(Value::as_str).ok_or_else(malformed)? {
        "text" => Ok(ContentPart::text(
            part.get("text").and_then(Value::as_str).ok_or_else(malformed)?,
        )),
        "image_url" => {
            let image = part.get("image_url").ok_or_else(malformed)?;
            let url = image
                .get("url")
                .unwrap_or(image)
                .as_str()
                .ok_or_else(malformed)?;
            Ok(ContentPart::Image {
                source: MediaSource::from_url(url),
                detail: image.get("detail").and_then(Value::as_str).map(str::to_string),
            })
        }
        "file" => Ok(ContentPart::File {
            source: MediaSource::from_url(field("file", "file_data")?),
            filename: part
                .pointer("/file/filename")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        "input_audio" => Ok(ContentPart::Audio {
            data: field("input_audio", "data")?.to_string(),
            format: field("input_audio", "format")?.to_string(),
        }),
        other => {
            warn!(part_type = other, "unknown content part");
            Err(ProviderError::Decode(format!(
                "unsupported content part type: {}",
                other
            )))
        }
    }
}

/// Format one message in the chat-completions shape
pub fn message_to_openai_spec(message: &Message) -> GenerationResult<Value> {
    let content = match content_parts(message)? {
        None => json!(message.content.text()),
        Some(parts) => Value::Array(
            parts
                .iter()
                .map(part_to_openai)
                .collect::<GenerationResult<Vec<_>>>()?,
        ),
    };

    let mut converted = json!({"role": message.role, "content": content});

    match message.role {
        Role::Tool => {
            converted["tool_call_id"] = json!(message.action_id);
            if let Some(name) = &message.action_name {
                converted["name"] = json!(sanitize_function_name(name));
            }
        }
        Role::Assistant if message.action_requested() => {
            let tool_calls: Vec<Value> = message
                .requested_actions
                .iter()
                .map(|action| {
                    json!({
                        "id": action.id,
                        "type": "function",
                        "function": {
                            "name": sanitize_function_name(&action.name),
                            "arguments": action.arguments().to_string(),
                        }
                    })
                })
                .collect();
            converted["tool_calls"] = json!(tool_calls);
            if message.content.is_empty() {
                converted["content"] = Value::Null;
            }
        }
        _ => {}
    }

    Ok(converted)
}

/// Convert canonical messages to the chat-completions message list
pub fn messages_to_openai_spec(messages: &[Message]) -> GenerationResult<Vec<Value>> {
    messages.iter().map(message_to_openai_spec).collect()
}

/// Parse a chat-completions message list back into canonical messages
pub fn openai_spec_to_messages(messages: &[Value]) -> Result<Vec<Message>, ProviderError> {
    messages.iter().map(openai_message_to_message).collect()
}

pub fn openai_message_to_message(original: &Value) -> Result<Message, ProviderError> {
    let role = original
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("assistant")
        .parse::<Role>()
        .map_err(|_| ProviderError::Decode(format!("unknown role in {}", original)))?;

    let (content, content_type) = match original.get("content") {
        Some(Value::String(text)) => (MessageContent::Text(text.clone()), ContentType::Text),
        Some(Value::Array(parts)) => (
            MessageContent::Parts(
                parts
                    .iter()
                    .map(part_from_openai)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            ContentType::MultipartMixed,
        ),
        _ => (MessageContent::default(), ContentType::Text),
    };

    let mut message = Message::new(role, content).with_content_type(content_type);

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        message = message.with_actions(parse_tool_calls(tool_calls));
    }

    if role == Role::Tool {
        message.action_id = original
            .get("tool_call_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        message.action_name = original.get("name").and_then(Value::as_str).map(str::to_string);
    }

    Ok(message)
}

/// Convert a chat-completions response body to the assistant message
pub fn openai_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| {
            ProviderError::Decode(format!("response has no choices[0].message: {}", response))
        })?;

    let mut message = openai_message_to_message(original)?;
    message.role = Role::Assistant;
    Ok(message)
}

pub fn finish_reason(response: &Value) -> Option<String> {
    response
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Unpack a tool schema from any known shape into `(name, description, parameters)`
pub fn tool_schema_parts(tool: &Value) -> Option<(String, Value, Value)> {
    let inner = tool.get("function").filter(|f| f.is_object()).unwrap_or(tool);
    let name = extract_tool_name(inner)?;
    let description = inner.get("description").cloned().unwrap_or(json!(""));
    let parameters = inner
        .get("parameters")
        .or_else(|| inner.get("input_schema"))
        .cloned()
        .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
    Some((name, description, parameters))
}

/// Wrap tool schemas as `{type: "function", function: {...}}`.
///
/// Already wrapped entries pass through untouched, so formatting twice is a no-op.
pub fn tools_to_openai_spec(tools: &[Value]) -> GenerationResult<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        let already_wrapped = tool.get("type").and_then(Value::as_str) == Some("function")
            && tool.get("function").is_some_and(Value::is_object);

        let formatted = if already_wrapped {
            tool.clone()
        } else {
            match tool_schema_parts(tool) {
                Some((name, description, parameters)) => json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": description,
                        "parameters": parameters,
                    }
                }),
                None => {
                    warn!(tool = %tool, "skipping tool schema without a name");
                    continue;
                }
            }
        };

        let name = formatted["function"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if !tool_names.insert(name.clone()) {
            return Err(GenerationError::InvalidConversation(format!(
                "Duplicate tool name: {}",
                name
            )));
        }
        result.push(formatted);
    }

    Ok(result)
}

/// Merge consecutive messages that share a role into one message whose content is
/// the concatenated part list. Parts keep their order; role changes always split.
pub fn merge_consecutive_messages<F>(messages: Vec<Value>, text_part: F) -> Vec<Value>
where
    F: Fn(&str) -> Value,
{
    let as_parts = |content: &Value| -> Vec<Value> {
        match content {
            Value::String(text) if text.is_empty() => Vec::new(),
            Value::String(text) => vec![text_part(text)],
            Value::Array(parts) => parts.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    };

    let mut merged: Vec<Value> = Vec::new();
    for message in messages {
        let same_role = merged
            .last()
            .is_some_and(|previous| previous.get("role") == message.get("role"));

        if same_role {
            if let Some(previous) = merged.last_mut() {
                let mut parts = as_parts(&previous["content"]);
                parts.extend(as_parts(&message["content"]));
                previous["content"] = Value::Array(parts);
            }
        } else {
            merged.push(message);
        }
    }
    merged
}

/// Recognize OpenAI-style context overflow errors
pub fn check_openai_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}

/// Send a prepared request and classify the outcome
pub async fn send_request(request: RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited {
            message: body,
            retry_after,
        });
    }

    if let Ok(error_body) = serde_json::from_str::<Value>(&body) {
        if let Some(err) = error_body
            .get("error")
            .and_then(check_openai_context_length_error)
        {
            return Err(err);
        }
    }

    Err(ProviderError::from_status(status.as_u16(), body))
}

/// POST a JSON body and decode the JSON answer
pub async fn post_json(
    client: &Client,
    url: &str,
    headers: &[(&str, String)],
    payload: &Value,
) -> Result<RawResponse, ProviderError> {
    let mut request = client.post(url).json(payload);
    for (name, value) in headers {
        request = request.header(*name, value);
    }

    let response = send_request(request).await?;
    let response_headers = response.headers().clone();
    let body: Value = response.json().await?;

    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        if let Some(err) = check_openai_context_length_error(error) {
            return Err(err);
        }
        return Err(ProviderError::Other(format!("Provider returned an error: {}", error)));
    }

    Ok(RawResponse::new(body).with_headers(&response_headers))
}

/// Drop `null` entries from a request body
pub fn without_nulls(payload: Map<String, Value>) -> Value {
    Value::Object(payload.into_iter().filter(|(_, v)| !v.is_null()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::Action;
    use anyhow::Result;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "example_fn",
                        "arguments": "{\"param\": \"value\"}"
                    }
                }]
            }
        }],
        "usage": {
            "input_tokens": 10,
            "output_tokens": 25,
            "total_tokens": 35
        }
    }"#;

    #[test]
    fn test_messages_to_openai_spec() -> Result<()> {
        let spec = messages_to_openai_spec(&[Message::user("Hello")])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
        Ok(())
    }

    #[test]
    fn test_messages_to_openai_spec_complex() -> Result<()> {
        let messages = vec![
            Message::system("You are a calculator agent"),
            Message::user("How are you?"),
            Message::assistant("").with_action(Action::new(
                "tool1",
                "example",
                json!({"param1": "value1"}).as_object().cloned(),
            )),
            Message::tool_result("tool1", "example", "Result"),
        ];

        let spec = messages_to_openai_spec(&messages)?;

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[2]["role"], "assistant");
        assert!(spec[2]["content"].is_null());
        assert_eq!(spec[2]["tool_calls"][0]["type"], "function");
        // arguments travel as a JSON-encoded string
        assert_eq!(
            spec[2]["tool_calls"][0]["function"]["arguments"],
            "{\"param1\":\"value1\"}"
        );
        assert_eq!(spec[3]["role"], "tool");
        assert_eq!(spec[3]["content"], "Result");
        assert_eq!(spec[3]["tool_call_id"], spec[2]["tool_calls"][0]["id"]);
        Ok(())
    }

    #[test]
    fn test_multimodal_parts() -> Result<()> {
        let message = Message::user_parts(vec![
            ContentPart::text("What is this?"),
            ContentPart::image_base64("image/png", "AAAA"),
            ContentPart::file_bytes("doc.pdf", "application/pdf", b"%PDF"),
        ]);
        let spec = message_to_openai_spec(&message)?;
        let parts = spec["content"].as_array().unwrap();
        assert_eq!(parts[0], json!({"type": "text", "text": "What is this?"}));
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(parts[2]["type"], "file");
        assert_eq!(parts[2]["file"]["filename"], "doc.pdf");
        Ok(())
    }

    #[test]
    fn test_parts_parse_back() -> Result<()> {
        let messages = openai_spec_to_messages(&[json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "Describe"},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png", "detail": "low"}},
                {"type": "input_audio", "input_audio": {"data": "AAAA", "format": "wav"}}
            ]
        })])?;
        match &messages[0].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], ContentPart::text("Describe"));
                assert!(matches!(&parts[1], ContentPart::Image { detail: Some(d), .. } if d == "low"));
                assert!(matches!(&parts[2], ContentPart::Audio { format, .. } if format == "wav"));
            }
            other => panic!("expected parts, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_unknown_or_malformed_part_is_an_error() {
        let unknown = json!({
            "role": "user",
            "content": [{"type": "text", "text": "hi"}, {"type": "video_url", "video_url": {"url": "x"}}]
        });
        let err = openai_message_to_message(&unknown).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
        assert!(err.to_string().contains("video_url"));

        let malformed = json!({"role": "user", "content": [{"type": "input_audio", "input_audio": {"data": "AAAA"}}]});
        assert!(matches!(
            openai_message_to_message(&malformed),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_image_url_content_type() -> Result<()> {
        let message = Message::user("https://example.com/cat.png")
            .with_content_type(ContentType::ImageUrl);
        let spec = message_to_openai_spec(&message)?;
        assert_eq!(spec["content"][0]["type"], "image_url");
        assert_eq!(spec["content"][0]["image_url"]["url"], "https://example.com/cat.png");
        Ok(())
    }

    #[test]
    fn test_unsupported_content_type_fails() {
        let message =
            Message::user("clip").with_content_type(ContentType::Other("video/mp4".to_string()));
        let err = message_to_openai_spec(&message).unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedContent(_)));
        assert!(err.to_string().contains("video/mp4"));
    }

    #[test]
    fn test_round_trip_plain_messages() -> Result<()> {
        let messages = vec![
            Message::system("Be brief"),
            Message::user("Hi"),
            Message::assistant("Hello!"),
        ];
        let spec = messages_to_openai_spec(&messages)?;
        let parsed = openai_spec_to_messages(&spec)?;

        for (original, parsed) in messages.iter().zip(parsed.iter()) {
            assert_eq!(original.role, parsed.role);
            assert_eq!(original.content, parsed.content);
            assert_eq!(original.content_type, parsed.content_type);
        }
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_is_idempotent() -> Result<()> {
        let tools = vec![
            json!({"name": "add", "description": "Add", "parameters": {"type": "object"}}),
            json!({"name": "mul", "description": "Multiply", "input_schema": {"type": "object"}}),
            json!({"type": "function", "function": {"name": "sub", "parameters": {}}}),
        ];

        let once = tools_to_openai_spec(&tools)?;
        let twice = tools_to_openai_spec(&once)?;
        assert_eq!(once, twice);
        assert_eq!(once[0]["function"]["name"], "add");
        assert_eq!(once[1]["function"]["parameters"], json!({"type": "object"}));
        assert_eq!(once[2], tools[2]);
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = json!({"name": "test_tool", "description": "Test tool", "parameters": {}});
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result.unwrap_err().to_string().contains("Duplicate tool name"));
    }

    #[test]
    fn test_tools_to_openai_spec_empty() -> Result<()> {
        assert!(tools_to_openai_spec(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_text() -> Result<()> {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello from John Cena!"}}]
        });
        let message = openai_response_to_message(&response)?;
        assert_eq!(message.text(), "Hello from John Cena!");
        assert_eq!(message.role, Role::Assistant);
        assert!(!message.action_requested());
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_valid_toolrequest() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let message = openai_response_to_message(&response)?;

        assert!(message.action_requested());
        let action = &message.requested_actions[0];
        assert_eq!(action.name, "example_fn");
        assert_eq!(action.arguments(), json!({"param": "value"}));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_json_decode_error() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!("invalid json {");

        let message = openai_response_to_message(&response)?;
        assert_eq!(message.requested_actions.len(), 1);
        assert!(message.requested_actions[0].params.is_none());
        Ok(())
    }

    #[test]
    fn test_openai_response_without_choices() {
        let err = openai_response_to_message(&json!({"object": "list"})).unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn test_merge_consecutive_messages() {
        let text = |t: &str| json!({"type": "text", "text": t});
        let merged = merge_consecutive_messages(
            vec![
                json!({"role": "user", "content": "a"}),
                json!({"role": "user", "content": [{"type": "image"}]}),
                json!({"role": "assistant", "content": ""}),
                json!({"role": "user", "content": "b"}),
                json!({"role": "user", "content": "c"}),
            ],
            text,
        );

        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged[0]["content"],
            json!([{"type": "text", "text": "a"}, {"type": "image"}])
        );
        assert_eq!(merged[1]["role"], "assistant");
        assert_eq!(
            merged[2]["content"],
            json!([{"type": "text", "text": "b"}, {"type": "text", "text": "c"}])
        );
    }

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_is_valid_function_name() {
        assert!(is_valid_function_name("hello-world"));
        assert!(is_valid_function_name("hello_world"));
        assert!(!is_valid_function_name("hello world"));
        assert!(!is_valid_function_name("hello@world"));
    }

    #[test]
    fn test_check_openai_context_length_error() {
        let error = json!({
            "code": "context_length_exceeded",
            "message": "This message is too long"
        });
        let result = check_openai_context_length_error(&error);
        assert_eq!(
            result.unwrap().to_string(),
            "Context length exceeded. Message: This message is too long"
        );

        let error = json!({"code": "other_error", "message": "Some other error"});
        assert!(check_openai_context_length_error(&error).is_none());
    }
}
