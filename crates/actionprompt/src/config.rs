use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::errors::{ErrorKind, GenerationError, GenerationResult};
use crate::models::options::GenerationOptions;
use crate::providers::base::{Provider, ProviderContext};
use crate::providers::configs::ProviderConfig;
use crate::providers::factory::get_provider;
use crate::providers::retry::RetryPolicy;
use crate::sanitizer::Sanitizer;

pub const ENV_PREFIX: &str = "ACTIONPROMPT";
pub const DEFAULT_ENVIRONMENT: &str = "development";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No provider '{provider}' configured for environment '{environment}'")]
    MissingProvider {
        provider: String,
        environment: String,
    },
    #[error("Missing required setting, set {env_var}")]
    MissingEnvVar { env_var: String },
    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

impl From<ConfigError> for GenerationError {
    fn from(err: ConfigError) -> Self {
        GenerationError::Configuration(err.to_string())
    }
}

/// The environment variable that sets `key`
pub fn to_env_var(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.replace('.', "__").to_uppercase())
}

/// The active environment name, from `ACTIONPROMPT_ENV`
pub fn current_environment() -> String {
    env::var(format!("{}_ENV", ENV_PREFIX)).unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Error kinds retried on top of the default set
    #[serde(default)]
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            retryable: Vec::new(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        if !self.enabled {
            return RetryPolicy::disabled();
        }
        RetryPolicy::enabled(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_retryable(self.retryable.iter().copied())
    }
}

/// Everything configured for one provider key in one environment
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(flatten)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub verbose_errors: bool,
}

impl ProviderSettings {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            retry: RetrySettings::default(),
            verbose_errors: false,
        }
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// The per-adapter context: retry policy, verbosity and agent defaults
    pub fn context(&self, agent_options: GenerationOptions) -> ProviderContext {
        ProviderContext::new()
            .with_agent_options(agent_options)
            .with_retry(self.retry.policy())
            .with_verbose_errors(self.verbose_errors)
    }
}

/// Looks up provider settings by key and environment. Results are read-only for
/// the lifetime of the adapter built from them.
pub trait ConfigurationSource: Send + Sync {
    fn provider_settings(&self, provider_key: &str, environment: &str)
        -> GenerationResult<ProviderSettings>;

    /// Every configured credential, masked in sanitized requests
    fn sanitizer(&self) -> Sanitizer;
}

type EnvironmentMap = HashMap<String, HashMap<String, ProviderSettings>>;

fn lookup(
    environments: &EnvironmentMap,
    provider_key: &str,
    environment: &str,
) -> GenerationResult<ProviderSettings> {
    environments
        .get(environment)
        .and_then(|providers| providers.get(provider_key))
        .cloned()
        .ok_or_else(|| {
            ConfigError::MissingProvider {
                provider: provider_key.to_string(),
                environment: environment.to_string(),
            }
            .into()
        })
}

fn credentials(environments: &EnvironmentMap) -> Sanitizer {
    environments
        .values()
        .flat_map(HashMap::values)
        .fold(Sanitizer::new(), |sanitizer, settings| {
            match settings.provider.api_key() {
                Some(key) => sanitizer.with_secret(&settings.provider.secret_name(), key),
                None => sanitizer,
            }
        })
}

/// Settings loaded from an optional file plus `ACTIONPROMPT_`-prefixed
/// environment variables, e.g. `ACTIONPROMPT_ENVIRONMENTS__PRODUCTION__OPENAI__API_KEY`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environments: EnvironmentMap,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Extract `field` from serde's "missing field `field`" message
fn missing_field(error: &str) -> Option<&str> {
    let start = error.find("missing field `")? + "missing field `".len();
    let rest = &error[start..];
    rest.find('`').map(|end| &rest[..end])
}

impl ConfigurationSource for Settings {
    fn provider_settings(
        &self,
        provider_key: &str,
        environment: &str,
    ) -> GenerationResult<ProviderSettings> {
        lookup(&self.environments, provider_key, environment)
    }

    fn sanitizer(&self) -> Sanitizer {
        credentials(&self.environments)
    }
}

/// Settings assembled in code
#[derive(Debug, Clone, Default)]
pub struct StaticConfiguration {
    environments: EnvironmentMap,
}

impl StaticConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(
        mut self,
        environment: &str,
        provider_key: &str,
        settings: ProviderSettings,
    ) -> Self {
        self.environments
            .entry(environment.to_string())
            .or_default()
            .insert(provider_key.to_string(), settings);
        self
    }
}

impl ConfigurationSource for StaticConfiguration {
    fn provider_settings(
        &self,
        provider_key: &str,
        environment: &str,
    ) -> GenerationResult<ProviderSettings> {
        lookup(&self.environments, provider_key, environment)
    }

    fn sanitizer(&self) -> Sanitizer {
        credentials(&self.environments)
    }
}

/// Build the adapter configured under `provider_key`, masking every configured
/// credential in its sanitized requests
pub fn build_provider(
    source: &dyn ConfigurationSource,
    provider_key: &str,
    environment: &str,
    agent_options: GenerationOptions,
) -> GenerationResult<Arc<dyn Provider>> {
    let settings = source.provider_settings(provider_key, environment)?;
    let context = settings
        .context(agent_options)
        .with_sanitizer(source.sanitizer());
    get_provider(settings.provider, context)
}

fn default_retry_enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}
