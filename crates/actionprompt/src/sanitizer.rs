use serde_json::Value;

/// Replaces configured credential values with placeholders such as `<OPENAI_API_KEY>`.
///
/// Built once from the configured secrets; sanitizing never mutates its input.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    // (secret, placeholder), longest secret first so overlapping values are replaced whole
    replacements: Vec<(String, String)>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret under `<NAME>`; empty secrets are ignored
    pub fn with_secret<S: Into<String>>(mut self, name: &str, secret: S) -> Self {
        let secret = secret.into();
        if secret.is_empty() {
            return self;
        }
        let placeholder = format!("<{}>", name.to_uppercase());
        self.replacements.push((secret, placeholder));
        self.replacements
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    /// A copy of `value` with every known secret replaced, recursively
    pub fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.sanitize_str(text)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.sanitize(v)).collect()),
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(key, v)| (key.clone(), self.sanitize(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn sanitize_str(&self, text: &str) -> String {
        let mut sanitized = text.to_string();
        for (secret, placeholder) in &self.replacements {
            if sanitized.contains(secret.as_str()) {
                sanitized = sanitized.replace(secret.as_str(), placeholder);
            }
        }
        sanitized
    }
}
