//! OpenRouter: the chat-completions wire format plus model routing.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use super::base::{GenerationRequest, Provider, ProviderContext, RawResponse};
use super::configs::{http_timeout, stored_options, OpenRouterProviderConfig};
use super::openai_compat::{parse_chat_response, OpenAiCompatClient, CHAT_COMPLETIONS_PATH};
use super::params::{build_chat_parameters, into_body};
use super::streaming::{OpenAiChatAccumulator, StreamDelta};
use crate::errors::{GenerationResult, ProviderError};
use crate::models::options::{DataCollection, GenerationOptions};
use crate::models::response::Response;

/// Routing and filtering preferences sent as the `provider` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPreferences {
    /// Providers to try, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_parameters: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_collection: Option<DataCollection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantizations: Option<Vec<String>>,
    /// `price`, `throughput` or `latency`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<Value>,
}

impl ProviderPreferences {
    /// Resolve the preferences object for one call.
    ///
    /// `data_collection` comes from the resolved top-level option, then from a nested
    /// `provider.data_collection` key, then defaults to `"allow"`. Other nested keys
    /// are shallow-merged over the stored preferences.
    pub fn build(&self, options: &GenerationOptions) -> Map<String, Value> {
        let mut preferences = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        if let Some(Value::Object(nested)) = options.extra.get("provider") {
            for (key, value) in nested {
                if !value.is_null() {
                    preferences.insert(key.clone(), value.clone());
                }
            }
        }

        let data_collection = options
            .data_collection
            .as_ref()
            .map(DataCollection::to_value)
            .or_else(|| {
                preferences
                    .get("data_collection")
                    .filter(|v| !v.is_null())
                    .cloned()
            })
            .unwrap_or_else(|| DataCollection::allow().to_value());
        preferences.insert("data_collection".to_string(), data_collection);
        preferences
    }
}

pub struct OpenRouterProvider {
    client: OpenAiCompatClient,
    config: OpenRouterProviderConfig,
    context: ProviderContext,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterProviderConfig, mut context: ProviderContext) -> GenerationResult<Self> {
        let mut client = OpenAiCompatClient::new(
            &config.host,
            Some(config.api_key.clone()),
            http_timeout(config.timeout_secs),
        )?;
        if let Some(site_url) = &config.site_url {
            client = client.with_header("HTTP-Referer", site_url.clone());
        }
        if let Some(app_name) = &config.app_name {
            client = client.with_header("X-Title", app_name.clone());
        }
        context.sanitizer = context
            .sanitizer
            .with_secret("OPENROUTER_API_KEY", config.api_key.clone());

        Ok(Self {
            client,
            config,
            context,
        })
    }

    /// Primary model first, then the configured fallbacks without duplicates
    fn model_list(&self, primary: &str) -> Vec<String> {
        let mut models = vec![primary.to_string()];
        for model in &self.config.fallback_models {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
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
        let mut payload = build_chat_parameters(self.name(), request, options)?;

        payload.insert(
            "provider".into(),
            Value::Object(self.config.provider.build(options)),
        );

        if !self.config.fallback_models.is_empty() {
            let primary = payload
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            payload.insert("models".into(), json!(self.model_list(&primary)));
            payload.insert("route".into(), json!("fallback"));
        }
        if !self.config.plugins.is_empty() && !payload.contains_key("plugins") {
            payload.insert("plugins".into(), json!(self.config.plugins));
        }
        if !self.config.transforms.is_empty() && !payload.contains_key("transforms") {
            payload.insert("transforms".into(), json!(self.config.transforms));
        }

        Ok(into_body(payload))
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
}
