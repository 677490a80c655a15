//! Field accessors over raw tool calls in any provider shape.
//!
//! Each accessor tries an ordered list of lookup paths and returns the first hit,
//! accepting nested (`function.name`) and flat (`name`) layouts and symbol-style
//! (`:name`) keys.
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::models::tool::Action;

/// Find `key` or its symbol-style spelling `:key`
fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    object
        .get(key)
        .or_else(|| object.get(&format!(":{}", key)))
        .filter(|v| !v.is_null())
}

fn lookup_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| lookup(current, key))
}

pub fn extract_tool_id(raw: &Value) -> Option<String> {
    [&["id"][..], &["call_id"][..]]
        .iter()
        .find_map(|path| lookup_path(raw, path))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

pub fn extract_tool_name(raw: &Value) -> Option<String> {
    [&["function", "name"][..], &["name"][..]]
        .iter()
        .find_map(|path| lookup_path(raw, path).and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Arguments from `function.arguments`, `arguments` or `input`.
///
/// A JSON string is decoded, an object passes through, anything unparsable is `None`.
pub fn extract_tool_params(raw: &Value) -> Option<Map<String, Value>> {
    let arguments = [
        &["function", "arguments"][..],
        &["arguments"][..],
        &["input"][..],
    ]
    .iter()
    .find_map(|path| lookup_path(raw, path))?;

    match arguments {
        Value::Object(object) => Some(object.clone()),
        Value::String(text) if text.trim().is_empty() => Some(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => Some(object),
            Ok(_) | Err(_) => {
                warn!(arguments = %text, "could not decode tool call arguments");
                None
            }
        },
        _ => None,
    }
}

/// Parse raw tool calls into actions, dropping entries without a discoverable name
pub fn parse_tool_calls(raw_calls: &[Value]) -> Vec<Action> {
    raw_calls
        .iter()
        .filter_map(|raw| {
            let name = extract_tool_name(raw)?;
            let id = extract_tool_id(raw).unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
            Some(Action::new(id, name, extract_tool_params(raw)))
        })
        .collect()
}
