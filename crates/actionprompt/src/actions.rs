use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::tool::{Action, Tool};

/// Something the model can ask to have performed
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The tool name advertised to the model
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters
    fn parameters(&self) -> Value;

    fn tool(&self) -> Tool {
        Tool::new(self.name(), self.description(), self.parameters())
    }

    /// Perform the action and render its result as text
    async fn perform(&self, action: &Action) -> AgentResult<String>;
}

type ActionFn = dyn Fn(&Map<String, Value>) -> AgentResult<String> + Send + Sync;

/// An `ActionHandler` backed by a synchronous closure
pub struct FnAction {
    tool: Tool,
    function: Arc<ActionFn>,
}

impl FnAction {
    pub fn new<F>(tool: Tool, function: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> AgentResult<String> + Send + Sync + 'static,
    {
        Self {
            tool,
            function: Arc::new(function),
        }
    }
}

#[async_trait]
impl ActionHandler for FnAction {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters(&self) -> Value {
        self.tool.parameters.clone()
    }

    async fn perform(&self, action: &Action) -> AgentResult<String> {
        let params = action.params.as_ref().ok_or_else(|| {
            AgentError::InvalidParameters(format!("{} received unparsable arguments", action.name))
        })?;
        (self.function)(params)
    }
}

/// Handlers by name, in registration order
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: Vec<Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler, replacing any handler with the same name
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.retain(|h| h.name() != handler.name());
        self.handlers.push(handler);
    }

    pub fn with_handler<H: ActionHandler + 'static>(mut self, handler: H) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.handlers.iter().map(|h| h.tool()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Perform one action and wrap the outcome in a tool message.
    ///
    /// Unknown actions and handler failures still produce a tool message, carrying
    /// the error text, so the conversation stays answerable.
    pub async fn dispatch(&self, action: &Action) -> Message {
        let result = match self.get(&action.name) {
            Some(handler) => handler.perform(action).await,
            None => Err(AgentError::ToolNotFound(action.name.clone())),
        };

        let content = match result {
            Ok(output) => {
                debug!(action = %action.name, id = %action.id, "action performed");
                output
            }
            Err(error) => {
                warn!(action = %action.name, id = %action.id, error = %error, "action failed");
                format!("Error: {}", error)
            }
        };
        Message::tool_result(action.id.clone(), action.name.clone(), content)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name().to_string()))
            .finish()
    }
}
