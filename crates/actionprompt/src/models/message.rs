use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::content::{ContentPart, ContentType, MessageContent};
use super::role::Role;
use super::tool::Action;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single turn of a conversation to or from an LLM
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default)]
    pub content_type: ContentType,
    /// Tool invocations carried by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_actions: Vec<Action>,
    /// On tool turns, the id of the action this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    pub created: i64,
}

impl Message {
    pub fn new<C: Into<MessageContent>>(role: Role, content: C) -> Self {
        Message {
            role,
            content: content.into(),
            content_type: ContentType::Text,
            requested_actions: Vec::new(),
            action_id: None,
            action_name: None,
            created: Utc::now().timestamp(),
        }
    }

    pub fn system<S: Into<String>>(text: S) -> Self {
        Self::new(Role::System, text.into())
    }

    pub fn user<S: Into<String>>(text: S) -> Self {
        Self::new(Role::User, text.into())
    }

    pub fn assistant<S: Into<String>>(text: S) -> Self {
        Self::new(Role::Assistant, text.into())
    }

    /// A user turn made of several typed parts
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::new(Role::User, parts).with_content_type(ContentType::MultipartMixed)
    }

    /// The result of an executed action, correlated by id
    pub fn tool_result<I, N, C>(action_id: I, action_name: N, content: C) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        C: Into<MessageContent>,
    {
        let mut message = Self::new(Role::Tool, content);
        message.action_id = Some(action_id.into());
        message.action_name = Some(action_name.into());
        message
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Add a requested tool invocation
    pub fn with_action(mut self, action: Action) -> Self {
        self.requested_actions.push(action);
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.requested_actions.extend(actions);
        self
    }

    /// True when this turn asks for one or more actions to be executed
    pub fn action_requested(&self) -> bool {
        !self.requested_actions.is_empty()
    }

    /// All text content joined by newlines
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Check the role-specific shape of the message
    pub fn validate(&self) -> Result<(), String> {
        match self.role {
            Role::Tool => {
                if self.action_id.as_deref().map_or(true, str::is_empty) {
                    return Err("Tool message must carry an action_id".to_string());
                }
            }
            Role::Assistant => {}
            _ => {
                if self.action_requested() {
                    return Err(format!(
                        "{} message does not support requested actions",
                        self.role
                    ));
                }
            }
        }
        if self.role != Role::Tool && self.action_id.is_some() {
            return Err(format!("{} message does not support action_id", self.role));
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut summary = format!("message:{}\n{}", self.role, self.text());
        for action in &self.requested_actions {
            summary.push_str(&format!(
                "\naction:{}:{}\nparams:{}",
                action.id,
                action.name,
                action.arguments()
            ));
        }
        summary
    }
}
