use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Message;
use super::options::GenerationOptions;
use super::role::Role;
use super::tool::Tool;
use crate::errors::{GenerationError, GenerationResult};

/// The conversation sent to a provider: an append-only message list, the
/// runtime options of this turn, and the tools advertised to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    messages: Vec<Message>,
    #[serde(default)]
    pub options: GenerationOptions,
    /// Function tool schemas, in any wrapper shape the formatters accept
    #[serde(default)]
    pub tools: Vec<Value>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a prompt from existing messages, validating each one in order
    pub fn from_messages(messages: Vec<Message>) -> GenerationResult<Self> {
        let mut prompt = Self::new();
        for message in messages {
            prompt.push(message)?;
        }
        Ok(prompt)
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_tool(mut self, tool: &Tool) -> Self {
        self.tools.push(tool.to_value());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Append a message. Tool results must answer an action requested earlier.
    pub fn push(&mut self, message: Message) -> GenerationResult<()> {
        message
            .validate()
            .map_err(GenerationError::InvalidConversation)?;

        if message.role == Role::Tool {
            let action_id = message.action_id.as_deref().unwrap_or_default();
            if !self.has_requested_action(action_id) {
                return Err(GenerationError::InvalidConversation(format!(
                    "Tool result references unknown action id '{}'",
                    action_id
                )));
            }
        }

        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    fn has_requested_action(&self, action_id: &str) -> bool {
        self.messages
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .flat_map(|message| message.requested_actions.iter())
            .any(|action| action.id == action_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::Action;
    use anyhow::Result;

    #[test]
    fn test_push_keeps_order() -> Result<()> {
        let prompt = Prompt::from_messages(vec![
            Message::system("You are a calculator agent"),
            Message::user("Add 2 and 3"),
        ])?;
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt.messages()[0].role, Role::System);
        assert_eq!(prompt.last_message().unwrap().text(), "Add 2 and 3");
        Ok(())
    }

    #[test]
    fn test_tool_result_must_match_requested_action() -> Result<()> {
        let mut prompt = Prompt::from_messages(vec![
            Message::user("Add 2 and 3"),
            Message::assistant("").with_action(Action::new("call_1", "add", None)),
        ])?;

        assert!(prompt.push(Message::tool_result("call_1", "add", "5.0")).is_ok());

        let err = prompt
            .push(Message::tool_result("call_9", "add", "5.0"))
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidConversation(_)));
        assert_eq!(prompt.len(), 3);
        Ok(())
    }
}
