use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Failures raised while performing an action on behalf of the model
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Classification of a provider failure, used as the retry allowlist key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    RateLimited,
    ServerError,
    ClientError,
    Decode,
    ContextLengthExceeded,
    Other,
}

impl ErrorKind {
    /// Kinds retried when no explicit list is configured
    pub fn default_retryable() -> Vec<ErrorKind> {
        vec![
            ErrorKind::Timeout,
            ErrorKind::Connection,
            ErrorKind::RateLimited,
            ErrorKind::ServerError,
        ]
    }
}

/// A classified transport or protocol failure from a single provider call
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Server error: {status} {body}")]
    Server { status: u16, body: String },

    #[error("Request failed: {status} {body}")]
    Client { status: u16, body: String },

    #[error("Could not decode provider response: {0}")]
    Decode(String),

    #[error("Context length exceeded. Message: {0}")]
    ContextLengthExceeded(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Timeout(_) => ErrorKind::Timeout,
            ProviderError::Connection(_) => ErrorKind::Connection,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::Server { .. } => ErrorKind::ServerError,
            ProviderError::Client { .. } => ErrorKind::ClientError,
            ProviderError::Decode(_) => ErrorKind::Decode,
            ProviderError::ContextLengthExceeded(_) => ErrorKind::ContextLengthExceeded,
            ProviderError::Other(_) => ErrorKind::Other,
        }
    }

    /// Build an error from a non-success HTTP status and its body
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => ProviderError::RateLimited {
                message: body,
                retry_after: None,
            },
            408 => ProviderError::Timeout(body),
            s if s >= 500 => ProviderError::Server { status: s, body },
            s => ProviderError::Client { status: s, body },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ProviderError::Connection(err.to_string())
        } else if err.is_decode() || err.is_body() {
            ProviderError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), err.to_string())
        } else {
            ProviderError::Other(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

/// The uniform error surfaced once retries are exhausted
#[derive(Debug, Clone)]
pub struct GenerationProviderError {
    pub message: String,
    pub kind: ErrorKind,
    pub provider: String,
    pub model: Option<String>,
    pub attempts: u32,
    pub verbose: bool,
}

impl GenerationProviderError {
    pub fn new(error: &ProviderError, provider: &str, model: Option<String>, attempts: u32) -> Self {
        Self {
            message: error.to_string(),
            kind: error.kind(),
            provider: provider.to_string(),
            model,
            attempts,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl std::fmt::Display for GenerationProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.verbose {
            write!(
                f,
                "{} ({}; provider={}, model={}, attempts={})",
                self.message,
                self.kind,
                self.provider,
                self.model.as_deref().unwrap_or("unknown"),
                self.attempts
            )
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for GenerationProviderError {}

/// Everything a caller of an adapter or of the generation loop can receive
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("Generation provider error: {0}")]
    Provider(GenerationProviderError),

    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("Turn limit of {max_turns} exceeded")]
    TurnLimitExceeded { max_turns: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

impl From<GenerationProviderError> for GenerationError {
    fn from(err: GenerationProviderError) -> Self {
        GenerationError::Provider(err)
    }
}
