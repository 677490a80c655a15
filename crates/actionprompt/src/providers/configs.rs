use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;

use super::openrouter::ProviderPreferences;
use crate::errors::{GenerationError, GenerationResult};
use crate::models::options::GenerationOptions;

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";
pub const OPENROUTER_HOST: &str = "https://openrouter.ai/api";

/// Which OpenAI wire protocol to speak
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiApi {
    #[default]
    Chat,
    Responses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default = "default_openai_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api: OpenAiApi,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl OpenAiProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: default_openai_host(),
            api_key: api_key.into(),
            model: None,
            api: OpenAiApi::Chat,
            organization: None,
            embedding_model: None,
            timeout_secs: default_timeout_secs(),
            options: GenerationOptions::default(),
        }
    }

    pub fn from_env() -> GenerationResult<Self> {
        let mut config = Self::new(get_env("OPENAI_API_KEY", true, None)?.unwrap_or_default());
        if let Some(host) = get_env("OPENAI_HOST", false, None)? {
            config.host = host;
        }
        config.model = get_env("OPENAI_MODEL", false, None)?;
        if get_env("OPENAI_API", false, None)?.as_deref() == Some("responses") {
            config.api = OpenAiApi::Responses;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicProviderConfig {
    #[serde(default = "default_anthropic_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl AnthropicProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: default_anthropic_host(),
            api_key: api_key.into(),
            model: None,
            anthropic_version: default_anthropic_version(),
            timeout_secs: default_timeout_secs(),
            options: GenerationOptions::default(),
        }
    }

    pub fn from_env() -> GenerationResult<Self> {
        let mut config =
            Self::new(get_env("ANTHROPIC_API_KEY", true, None)?.unwrap_or_default());
        if let Some(host) = get_env("ANTHROPIC_HOST", false, None)? {
            config.host = host;
        }
        config.model = get_env("ANTHROPIC_MODEL", false, None)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaProviderConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    /// Only needed behind an authenticating proxy
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ollama_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl Default for OllamaProviderConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            api_key: None,
            model: default_ollama_model(),
            embedding_model: None,
            timeout_secs: default_timeout_secs(),
            options: GenerationOptions::default(),
        }
    }
}

impl OllamaProviderConfig {
    pub fn from_env() -> GenerationResult<Self> {
        let mut config = Self::default();
        if let Some(host) = get_env("OLLAMA_HOST", false, None)? {
            config.host = host;
        }
        if let Some(model) = get_env("OLLAMA_MODEL", false, None)? {
            config.model = Some(model);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterProviderConfig {
    #[serde(default = "default_openrouter_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Sent as `X-Title`
    #[serde(default)]
    pub app_name: Option<String>,
    /// Sent as `HTTP-Referer`
    #[serde(default)]
    pub site_url: Option<String>,
    /// Models tried in order when the primary model is unavailable
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default)]
    pub provider: ProviderPreferences,
    #[serde(default)]
    pub plugins: Vec<Value>,
    #[serde(default)]
    pub transforms: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl OpenRouterProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: default_openrouter_host(),
            api_key: api_key.into(),
            model: None,
            app_name: None,
            site_url: None,
            fallback_models: Vec::new(),
            provider: ProviderPreferences::default(),
            plugins: Vec::new(),
            transforms: Vec::new(),
            timeout_secs: default_timeout_secs(),
            options: GenerationOptions::default(),
        }
    }

    pub fn from_env() -> GenerationResult<Self> {
        let mut config =
            Self::new(get_env("OPENROUTER_API_KEY", true, None)?.unwrap_or_default());
        config.model = get_env("OPENROUTER_MODEL", false, None)?;
        config.app_name = get_env("OPENROUTER_APP_NAME", false, None)?;
        config.site_url = get_env("OPENROUTER_SITE_URL", false, None)?;
        Ok(config)
    }
}

/// What the configuration lookup returns for one provider key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service")]
pub enum ProviderConfig {
    #[serde(rename = "OpenAI", alias = "openai")]
    OpenAi(OpenAiProviderConfig),
    #[serde(rename = "Anthropic", alias = "anthropic")]
    Anthropic(AnthropicProviderConfig),
    #[serde(rename = "Ollama", alias = "ollama")]
    Ollama(OllamaProviderConfig),
    #[serde(rename = "OpenRouter", alias = "openrouter")]
    OpenRouter(OpenRouterProviderConfig),
}

impl ProviderConfig {
    pub fn service(&self) -> &'static str {
        match self {
            ProviderConfig::OpenAi(_) => "OpenAI",
            ProviderConfig::Anthropic(_) => "Anthropic",
            ProviderConfig::Ollama(_) => "Ollama",
            ProviderConfig::OpenRouter(_) => "OpenRouter",
        }
    }

    /// Name under which the credential is masked in sanitized requests
    pub fn secret_name(&self) -> String {
        format!("{}_API_KEY", self.service().to_uppercase())
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            ProviderConfig::OpenAi(config) => Some(config.api_key.as_str()),
            ProviderConfig::Anthropic(config) => Some(config.api_key.as_str()),
            ProviderConfig::Ollama(config) => config.api_key.as_deref(),
            ProviderConfig::OpenRouter(config) => Some(config.api_key.as_str()),
        }
        .filter(|key| !key.is_empty())
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            ProviderConfig::OpenAi(config) => config.model.as_deref(),
            ProviderConfig::Anthropic(config) => config.model.as_deref(),
            ProviderConfig::Ollama(config) => config.model.as_deref(),
            ProviderConfig::OpenRouter(config) => config.model.as_deref(),
        }
    }
}

/// The lowest precedence level: stored defaults with the configured model filled in
pub(crate) fn stored_options(model: Option<&str>, options: &GenerationOptions) -> GenerationOptions {
    let mut stored = options.clone();
    if stored.model.is_none() {
        stored.model = model.map(str::to_string);
    }
    stored
}

pub(crate) fn http_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Read an environment variable, failing only when a required one is missing
fn get_env(key: &str, required: bool, default: Option<String>) -> GenerationResult<Option<String>> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) if !required => Ok(default),
        Err(env::VarError::NotPresent) => Err(GenerationError::Configuration(format!(
            "Environment variable '{}' is required but not set.",
            key
        ))),
        Err(e) => Err(GenerationError::Configuration(e.to_string())),
    }
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_anthropic_version() -> String {
    ANTHROPIC_VERSION.to_string()
}

fn default_ollama_host() -> String {
    OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> Option<String> {
    Some(OLLAMA_MODEL.to_string())
}

fn default_openrouter_host() -> String {
    OPENROUTER_HOST.to_string()
}

fn default_timeout_secs() -> u64 {
    600
}
