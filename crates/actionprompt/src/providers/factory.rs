use std::sync::Arc;
use strum_macros::{Display, EnumIter};

use super::{
    anthropic::AnthropicProvider,
    base::{Provider, ProviderContext},
    configs::{OpenAiApi, ProviderConfig},
    ollama::OllamaProvider,
    openai::OpenAiProvider,
    openai_responses::OpenAiResponsesProvider,
    openrouter::OpenRouterProvider,
};
use crate::errors::GenerationResult;

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum ProviderType {
    OpenAi,
    OpenAiResponses,
    Anthropic,
    Ollama,
    OpenRouter,
}

impl From<&ProviderConfig> for ProviderType {
    fn from(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::OpenAi(openai) if openai.api == OpenAiApi::Responses => {
                ProviderType::OpenAiResponses
            }
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
            ProviderConfig::Anthropic(_) => ProviderType::Anthropic,
            ProviderConfig::Ollama(_) => ProviderType::Ollama,
            ProviderConfig::OpenRouter(_) => ProviderType::OpenRouter,
        }
    }
}

/// Build the adapter for `config`. The adapter registers its own credential
/// with the context's sanitizer.
pub fn get_provider(
    config: ProviderConfig,
    context: ProviderContext,
) -> GenerationResult<Arc<dyn Provider>> {
    let provider_type = ProviderType::from(&config);
    tracing::debug!(provider = %provider_type, "constructing provider");

    match config {
        ProviderConfig::OpenAi(openai_config) if provider_type == ProviderType::OpenAiResponses => {
            Ok(Arc::new(OpenAiResponsesProvider::new(openai_config, context)?))
        }
        ProviderConfig::OpenAi(openai_config) => {
            Ok(Arc::new(OpenAiProvider::new(openai_config, context)?))
        }
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Arc::new(AnthropicProvider::new(anthropic_config, context)?))
        }
        ProviderConfig::Ollama(ollama_config) => {
            Ok(Arc::new(OllamaProvider::new(ollama_config, context)?))
        }
        ProviderConfig::OpenRouter(openrouter_config) => {
            Ok(Arc::new(OpenRouterProvider::new(openrouter_config, context)?))
        }
    }
}
