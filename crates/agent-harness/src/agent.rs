use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::content::{Conversation, Message};
use crate::dispatch::ToolDispatcher;
use crate::errors::HarnessError;
use crate::json::parse_and_validate;
use crate::model::RunOptions;
use crate::observer::EventObservers;
use crate::provider::ProviderAdapter;
use crate::run::{RunConfig, RunOutcome, RunStream, TerminalReason, execute};
use crate::tool::{Tool, ToolSet};

/// Builder for an [`Agent`].
///
/// Everything except the provider and model name is optional; `build()`
/// validates the combination.
pub struct AgentBuilder {
    provider: Arc<dyn ProviderAdapter>,
    model: String,
    system_prompt: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
    options: RunOptions,
    observers: EventObservers,
    cancellation: Option<CancellationToken>,
    history: Vec<Message>,
    vendor_options: Option<Value>,
}

impl AgentBuilder {
    fn new(provider: Arc<dyn ProviderAdapter>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: None,
            tools: Vec::new(),
            options: RunOptions::default(),
            observers: EventObservers::new(),
            cancellation: None,
            history: Vec::new(),
            vendor_options: None,
        }
    }

    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.system_prompt = Some(text.into());
        self
    }

    /// Registers one tool. Duplicate names are rejected by `build()`.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Replaces all run options, for example with `RunOptions::from_env()?`.
    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.options.max_steps = max_steps;
        self
    }

    /// Whole-run deadline; expiry ends the run as cancelled.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.options.stream_buffer_capacity = capacity;
        self
    }

    pub fn observers(mut self, observers: EventObservers) -> Self {
        self.observers = observers;
        self
    }

    /// Parent token; cancelling it cancels every run of the agent.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Prior turns placed before each run's prompt.
    pub fn history(mut self, messages: Vec<Message>) -> Self {
        self.history = messages;
        self
    }

    /// Opaque vendor options forwarded with every model call.
    pub fn vendor_options(mut self, options: Value) -> Self {
        self.vendor_options = Some(options);
        self
    }

    pub fn build(self) -> Result<Agent, HarnessError> {
        if self.model.trim().is_empty() {
            return Err(HarnessError::Validation("model must not be empty".into()));
        }
        if self.options.max_steps == 0 {
            return Err(HarnessError::Validation(
                "max_steps must be greater than 0".into(),
            ));
        }
        if self.options.stream_buffer_capacity == 0 {
            return Err(HarnessError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        let tools = ToolSet::new(self.tools)?;
        Ok(Agent {
            config: RunConfig {
                provider: self.provider,
                model: self.model,
                dispatcher: ToolDispatcher::new(Arc::new(tools)),
                observers: self.observers,
                options: self.options,
                vendor_options: self.vendor_options,
            },
            system_prompt: self.system_prompt.filter(|s| !s.trim().is_empty()),
            history: self.history,
            cancellation: self.cancellation.unwrap_or_default(),
        })
    }
}

/// A configured agent. Cheap to clone; each run owns its own conversation.
#[derive(Clone)]
pub struct Agent {
    config: RunConfig,
    system_prompt: Option<String>,
    history: Vec<Message>,
    cancellation: CancellationToken,
}

impl Agent {
    pub fn builder(provider: Arc<dyn ProviderAdapter>, model: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(provider, model)
    }

    /// Runs the loop to a terminal reason and returns everything it produced.
    ///
    /// Run-level failures do not surface as `Err`; they are reported in
    /// `RunOutcome::error` alongside the steps that completed before them.
    pub async fn run(&self, prompt: impl Into<String>) -> Result<RunOutcome, HarnessError> {
        let conversation = self.conversation(prompt.into())?;
        Ok(execute(
            uuid::Uuid::new_v4(),
            &self.config,
            conversation,
            self.cancellation.child_token(),
            None,
        )
        .await)
    }

    /// Runs the loop for its observer side effects only.
    ///
    /// A fatal run failure comes back as `HarnessError::RunFailed`.
    pub async fn run_observed(&self, prompt: impl Into<String>) -> Result<TerminalReason, HarnessError> {
        let conversation = self.conversation(prompt.into())?;
        let outcome = execute(
            uuid::Uuid::new_v4(),
            &self.config,
            conversation,
            self.cancellation.child_token(),
            None,
        )
        .await;
        Ok(outcome.into_result()?.reason)
    }

    /// Starts the loop on a background task and streams its events.
    pub fn stream(&self, prompt: impl Into<String>) -> Result<RunStream, HarnessError> {
        let conversation = self.conversation(prompt.into())?;
        Ok(RunStream::start(
            self.config.clone(),
            conversation,
            self.cancellation.child_token(),
        ))
    }

    /// Asks for a JSON object matching `schema` in a single tool-less step.
    pub async fn generate_object(
        &self,
        prompt: impl Into<String>,
        schema: &Value,
    ) -> Result<Value, HarnessError> {
        let mut conversation = self.conversation(prompt.into())?;
        let instruction = format!(
            "Respond only with a JSON value that conforms to this JSON Schema:\n{schema}"
        );
        conversation.system_prompt = Some(match conversation.system_prompt.take() {
            Some(prompt) => format!("{prompt}\n\n{instruction}"),
            None => instruction,
        });
        let config = RunConfig {
            dispatcher: ToolDispatcher::new(Arc::new(ToolSet::default())),
            options: RunOptions {
                max_steps: 1,
                ..self.config.options.clone()
            },
            ..self.config.clone()
        };
        let outcome = execute(
            uuid::Uuid::new_v4(),
            &config,
            conversation,
            self.cancellation.child_token(),
            None,
        )
        .await
        .into_result()?;
        match outcome.reason {
            TerminalReason::Finished | TerminalReason::MaxSteps | TerminalReason::Stopped => {
                Ok(parse_and_validate(&outcome.text(), schema)?)
            }
            reason => Err(HarnessError::Incomplete(format!(
                "object generation ended with {reason:?}"
            ))),
        }
    }

    fn conversation(&self, prompt: String) -> Result<Conversation, HarnessError> {
        if prompt.trim().is_empty() {
            return Err(HarnessError::Validation("prompt must not be empty".into()));
        }
        let mut messages = self.history.clone();
        messages.push(Message::user(prompt));
        Ok(Conversation::new(self.system_prompt.clone(), messages))
    }
}
