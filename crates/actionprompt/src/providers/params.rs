use serde_json::{json, Map, Value};
use tracing::debug;

use super::base::GenerationRequest;
use super::utils::{messages_to_openai_spec, tools_to_openai_spec, without_nulls};
use crate::errors::{GenerationError, GenerationResult};
use crate::models::options::GenerationOptions;

/// Provider-hosted tool types that may be advertised next to function tools
pub const BUILTIN_TOOL_TYPES: &[&str] = &[
    "web_search",
    "web_search_preview",
    "file_search",
    "image_generation",
    "code_interpreter",
    "mcp",
    "computer_use_preview",
];

/// Resolve options across the four precedence levels, highest first.
///
/// Each field is decided independently; an unset field at one level lets the
/// next level show through.
pub fn resolve_options(
    overrides: &GenerationOptions,
    runtime: &GenerationOptions,
    agent: &GenerationOptions,
    stored: &GenerationOptions,
) -> GenerationOptions {
    overrides.over(runtime).over(agent).over(stored)
}

/// Keep only object entries whose `type` is a recognized built-in tool
pub fn filter_builtin_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter(|tool| {
            let recognized = tool
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|kind| BUILTIN_TOOL_TYPES.contains(&kind));
            if !recognized {
                debug!(tool = %tool, "dropping unrecognized built-in tool");
            }
            recognized
        })
        .cloned()
        .collect()
}

/// Function tools first, then the requested built-in tools
pub fn assemble_tools(function_tools: Vec<Value>, options: &GenerationOptions) -> Vec<Value> {
    let mut tools = function_tools;
    if let Some(builtins) = &options.builtin_tools {
        tools.extend(filter_builtin_tools(builtins));
    }
    tools
}

/// Pick the embedding model: an `embedding_model` entry in the call-site or
/// agent options' `extra` wins over the adapter's stored model, then `default`
pub fn embedding_model(
    call: &GenerationOptions,
    agent: &GenerationOptions,
    stored: Option<&str>,
    default: &str,
) -> String {
    call.over(agent)
        .extra
        .get("embedding_model")
        .and_then(Value::as_str)
        .or(stored)
        .unwrap_or(default)
        .to_string()
}

pub fn require_model(provider: &str, options: &GenerationOptions) -> GenerationResult<String> {
    options.model.clone().ok_or_else(|| {
        GenerationError::Configuration(format!("No model configured for provider {}", provider))
    })
}

/// Copy `extra` keys into `payload` without shadowing keys already set
pub fn merge_extra(payload: &mut Map<String, Value>, extra: &Map<String, Value>) {
    for (key, value) in extra {
        if !value.is_null() && !payload.contains_key(key) {
            payload.insert(key.clone(), value.clone());
        }
    }
}

/// The chat-completions request body shared by OpenAI, Ollama and OpenRouter
pub fn build_chat_parameters(
    provider: &str,
    request: &GenerationRequest,
    options: &GenerationOptions,
) -> GenerationResult<Map<String, Value>> {
    let mut payload = Map::new();
    payload.insert("model".into(), json!(require_model(provider, options)?));
    payload.insert(
        "messages".into(),
        json!(messages_to_openai_spec(&request.messages)?),
    );

    let tools = assemble_tools(tools_to_openai_spec(&request.tools)?, options);
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
        payload.insert("max_tokens".into(), json!(max_tokens));
    }
    if let Some(format) = &options.response_format {
        payload.insert("response_format".into(), format.to_openai());
    }
    if options.stream == Some(true) {
        payload.insert("stream".into(), json!(true));
        payload.insert("stream_options".into(), json!({"include_usage": true}));
    }

    merge_extra(&mut payload, &options.extra);
    Ok(payload)
}

pub fn into_body(payload: Map<String, Value>) -> Value {
    without_nulls(payload)
}
