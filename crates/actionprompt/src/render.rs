use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Error as TeraError, Tera};

use crate::errors::{AgentError, AgentResult};
use crate::models::content::{ContentPart, ContentType, MessageContent};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

/// What rendering an action produces
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedContent {
    /// A message body
    Text(String),
    /// A multimodal message body
    Parts(Vec<ContentPart>),
    /// A tool description advertised to the model
    Schema(Tool),
}

impl RenderedContent {
    pub fn into_message(self, role: Role) -> AgentResult<Message> {
        match self {
            RenderedContent::Text(text) => Ok(Message::new(role, text)),
            RenderedContent::Parts(parts) => Ok(Message::new(role, MessageContent::Parts(parts))
                .with_content_type(ContentType::MultipartMixed)),
            RenderedContent::Schema(tool) => Err(AgentError::InvalidParameters(format!(
                "{} renders a tool schema, not a message body",
                tool.name
            ))),
        }
    }

    pub fn into_tool(self) -> AgentResult<Tool> {
        match self {
            RenderedContent::Schema(tool) => Ok(tool),
            _ => Err(AgentError::InvalidParameters(
                "rendered content is a message body, not a tool schema".to_string(),
            )),
        }
    }
}

/// Turns an action name and its parameters into message content or a tool schema
pub trait Render: Send + Sync {
    fn render(&self, action: &str, params: &Map<String, Value>) -> AgentResult<RenderedContent>;
}

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    tera.render("inline_template", &context)
}

pub fn load_prompt_file<T: Serialize>(
    template_file: impl Into<PathBuf>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_path = template_file.into();
    let template_content = fs::read_to_string(&template_path)
        .map_err(|e| TeraError::chain("Failed to read template file", e))?;
    load_prompt(&template_content, context_data)
}

/// A `Render` backed by tera templates (message bodies) and static tool schemas
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    tera: Tera,
    schemas: HashMap<String, Tool>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, action: &str, template: &str) -> AgentResult<Self> {
        self.tera
            .add_raw_template(action, template)
            .map_err(|e| AgentError::Internal(format!("template {}: {}", action, e)))?;
        Ok(self)
    }

    /// Register every file in `dir` as a template named after its file stem
    pub fn with_template_dir(mut self, dir: impl AsRef<Path>) -> AgentResult<Self> {
        let entries = fs::read_dir(dir.as_ref()).map_err(|e| AgentError::Internal(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| AgentError::Internal(e.to_string()))?.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if path.is_file() {
                let template =
                    fs::read_to_string(&path).map_err(|e| AgentError::Internal(e.to_string()))?;
                self = self.with_template(&name, &template)?;
            }
        }
        Ok(self)
    }

    pub fn with_schema(mut self, tool: Tool) -> Self {
        self.schemas.insert(tool.name.clone(), tool);
        self
    }
}

impl Render for TemplateRenderer {
    fn render(&self, action: &str, params: &Map<String, Value>) -> AgentResult<RenderedContent> {
        if self.tera.get_template_names().any(|name| name == action) {
            let context = Context::from_serialize(params)
                .map_err(|e| AgentError::InvalidParameters(e.to_string()))?;
            return self
                .tera
                .render(action, &context)
                .map(RenderedContent::Text)
                .map_err(|e| AgentError::InvalidParameters(format!("{}: {}", action, e)));
        }

        self.schemas
            .get(action)
            .cloned()
            .map(RenderedContent::Schema)
            .ok_or_else(|| AgentError::ToolNotFound(action.to_string()))
    }
}

/// Render `action` as a message with the given role
pub fn render_message(
    renderer: &dyn Render,
    role: Role,
    action: &str,
    params: &Map<String, Value>,
) -> AgentResult<Message> {
    renderer.render(action, params)?.into_message(role)
}

/// Render `action` as a tool description
pub fn render_tool(
    renderer: &dyn Render,
    action: &str,
    params: &Map<String, Value>,
) -> AgentResult<Tool> {
    renderer.render(action, params)?.into_tool()
}
