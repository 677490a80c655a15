//! These models represent the objects passed between the generation loop and the providers
//!
//! Every provider dialect (OpenAI chat, OpenAI responses, Anthropic messages, Ollama,
//! OpenRouter) is converted into and out of these structs at the adapter boundary.
//! Because they must round trip through several formats, they are not an exact match
//! for any single wire shape.
pub mod content;
pub mod message;
pub mod options;
pub mod prompt;
pub mod response;
pub mod role;
pub mod tool;
