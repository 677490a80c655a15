pub mod anthropic;
pub mod base;
pub mod configs;
pub mod factory;
pub mod ollama;
pub mod openai;
pub mod openai_compat;
pub mod openai_responses;
pub mod openrouter;
pub mod params;
pub mod retry;
pub mod streaming;
pub mod tool_calls;
pub mod utils;

#[cfg(test)]
pub mod mock;
