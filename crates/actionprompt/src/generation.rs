use futures::stream::BoxStream;
use futures::{future, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::actions::{ActionHandler, ActionRegistry};
use crate::errors::{GenerationError, GenerationResult};
use crate::models::message::Message;
use crate::models::options::GenerationOptions;
use crate::models::prompt::Prompt;
use crate::models::response::Response;
use crate::providers::base::{GenerationRequest, Provider};
use crate::providers::streaming::StreamDelta;
use crate::providers::utils::tool_schema_parts;

pub const DEFAULT_MAX_TURNS: usize = 10;

/// The finished conversation and the provider response that ended it
#[derive(Debug, Clone)]
pub struct Completion {
    pub prompt: Prompt,
    pub response: Response,
}

impl Completion {
    pub fn message(&self) -> &Message {
        &self.response.message
    }
}

/// One appended step of the loop; `Finished` carries the whole conversation
enum Step {
    Assistant(Response),
    ToolResult(Message),
    Finished(Prompt),
}

impl Step {
    fn message(&self) -> Option<&Message> {
        match self {
            Step::Assistant(response) => Some(&response.message),
            Step::ToolResult(message) => Some(message),
            Step::Finished(_) => None,
        }
    }
}

/// Drives a provider through the generate, perform, resubmit cycle until the
/// model stops requesting actions
pub struct Generation {
    provider: Arc<dyn Provider>,
    actions: ActionRegistry,
    max_turns: usize,
    overrides: GenerationOptions,
}

impl Generation {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            actions: ActionRegistry::new(),
            max_turns: DEFAULT_MAX_TURNS,
            overrides: GenerationOptions::default(),
        }
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_handler<H: ActionHandler + 'static>(mut self, handler: H) -> Self {
        self.actions.register(Arc::new(handler));
        self
    }

    /// Upper bound on provider round trips for one reply
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Call-site options applied to every round trip
    pub fn with_overrides(mut self, overrides: GenerationOptions) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Advertise every registered action the prompt does not already describe
    fn advertise(&self, mut prompt: Prompt) -> Prompt {
        let known: Vec<String> = prompt
            .tools
            .iter()
            .filter_map(tool_schema_parts)
            .map(|(name, _, _)| name)
            .collect();
        for tool in self.actions.tools() {
            if !known.contains(&tool.name) {
                prompt = prompt.with_tool(&tool);
            }
        }
        prompt
    }

    fn request(&self, prompt: &Prompt) -> GenerationRequest {
        GenerationRequest::from_prompt(prompt).with_overrides(self.overrides.clone())
    }

    fn steps(
        &self,
        prompt: Prompt,
        sink: Option<mpsc::Sender<StreamDelta>>,
    ) -> BoxStream<'_, GenerationResult<Step>> {
        let mut prompt = self.advertise(prompt);

        Box::pin(async_stream::try_stream! {
            let mut turn = 0;
            loop {
                if turn == self.max_turns {
                    info!(max_turns = self.max_turns, "turn limit reached");
                    Err(GenerationError::TurnLimitExceeded { max_turns: self.max_turns })?;
                }
                turn += 1;

                let request = self.request(&prompt);
                let response = match &sink {
                    Some(sink) => self.provider.complete_streaming(&request, sink.clone()).await?,
                    None => self.provider.complete(&request).await?,
                };
                debug!(
                    turn,
                    provider = self.provider.name(),
                    actions = response.message.requested_actions.len(),
                    "assistant turn"
                );

                prompt.push(response.message.clone())?;
                let actions = response.message.requested_actions.clone();
                yield Step::Assistant(response);

                // let the consumer see the assistant turn before actions run
                tokio::task::yield_now().await;

                if actions.is_empty() {
                    break;
                }

                for action in &actions {
                    let result = self.actions.dispatch(action).await;
                    prompt.push(result.clone())?;
                    yield Step::ToolResult(result);
                }
            }
            yield Step::Finished(prompt);
        })
    }

    /// Create a stream that yields each message as it is appended: assistant
    /// turns and the tool results answering them, in order.
    pub fn reply(&self, prompt: Prompt) -> BoxStream<'_, GenerationResult<Message>> {
        Box::pin(
            self.steps(prompt, None)
                .try_filter_map(|step| future::ready(Ok(step.message().cloned()))),
        )
    }

    /// Run the loop to completion
    pub async fn generate(&self, prompt: Prompt) -> GenerationResult<Completion> {
        self.drain(prompt, None).await
    }

    /// Run the loop to completion, forwarding text deltas of every assistant
    /// turn into `sink`.
    ///
    /// Deltas are sent with backpressure, so the receiving half must be drained
    /// concurrently with this future (a spawned task or `tokio::join!`). Awaiting
    /// this call before reading blocks once `sink`'s buffer fills. Dropping the
    /// receiver is fine; the loop keeps running without forwarding.
    pub async fn generate_streaming(
        &self,
        prompt: Prompt,
        sink: mpsc::Sender<StreamDelta>,
    ) -> GenerationResult<Completion> {
        self.drain(prompt, Some(sink)).await
    }

    async fn drain(
        &self,
        prompt: Prompt,
        sink: Option<mpsc::Sender<StreamDelta>>,
    ) -> GenerationResult<Completion> {
        let mut conversation = None;
        let mut last = None;

        let mut steps = self.steps(prompt, sink);
        while let Some(step) = steps.next().await {
            match step? {
                Step::Assistant(response) => last = Some(response),
                Step::ToolResult(_) => {}
                Step::Finished(prompt) => conversation = Some(prompt),
            }
        }

        match (conversation, last) {
            (Some(prompt), Some(response)) => Ok(Completion { prompt, response }),
            _ => Err(GenerationError::InvalidConversation(
                "provider produced no response".to_string(),
            )),
        }
    }
}
