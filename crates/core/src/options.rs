use chatloop_model::ModelMessage;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::strategy::{AgentLoopStrategy, max_iterations};
use crate::tool::{ClientState, ToolSet};

/// The input of a [`ChatEngine`](crate::ChatEngine) run.
pub struct ChatOptions {
    pub(crate) model: String,
    pub(crate) messages: Vec<ModelMessage>,
    pub(crate) system_prompts: Vec<String>,
    pub(crate) tools: ToolSet,
    pub(crate) provider_options: Value,
    pub(crate) loop_strategy: Box<dyn AgentLoopStrategy>,
    pub(crate) abort_signal: CancellationToken,
    pub(crate) client_state: ClientState,
}

impl ChatOptions {
    /// Creates a builder for the given model.
    #[inline]
    pub fn builder<M: Into<String>>(model: M) -> ChatOptionsBuilder {
        ChatOptionsBuilder {
            options: ChatOptions {
                model: model.into(),
                messages: vec![],
                system_prompts: vec![],
                tools: ToolSet::new(),
                provider_options: Value::Null,
                loop_strategy: Box::new(max_iterations(5)),
                abort_signal: CancellationToken::new(),
                client_state: ClientState::new(),
            },
        }
    }

    /// Returns the requested model.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the history supplied by the caller.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the offered tools.
    #[inline]
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Returns the token that aborts the run.
    #[inline]
    pub fn abort_signal(&self) -> &CancellationToken {
        &self.abort_signal
    }
}

/// [`ChatOptions`] builder.
pub struct ChatOptionsBuilder {
    options: ChatOptions,
}

impl ChatOptionsBuilder {
    /// Sets the conversation history.
    #[inline]
    pub fn with_messages(mut self, messages: Vec<ModelMessage>) -> Self {
        self.options.messages = messages;
        self
    }

    /// Adds a system prompt. Prompts are sent before the history, in the
    /// order they were added.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.options.system_prompts.push(prompt.into());
        self
    }

    /// Sets the tools offered to the model.
    #[inline]
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.options.tools = tools;
        self
    }

    /// Sets the adapter-specific options.
    #[inline]
    pub fn with_provider_options(mut self, options: Value) -> Self {
        self.options.provider_options = options;
        self
    }

    /// Sets the agent loop strategy, `max_iterations(5)` by default.
    #[inline]
    pub fn with_loop_strategy<S: AgentLoopStrategy + 'static>(
        mut self,
        strategy: S,
    ) -> Self {
        self.options.loop_strategy = Box::new(strategy);
        self
    }

    /// Sets the token that aborts the run when cancelled.
    #[inline]
    pub fn with_abort_signal(mut self, signal: CancellationToken) -> Self {
        self.options.abort_signal = signal;
        self
    }

    /// Sets the approval decisions and client results for pending calls.
    #[inline]
    pub fn with_client_state(mut self, state: ClientState) -> Self {
        self.options.client_state = state;
        self
    }

    /// Builds the options.
    #[inline]
    pub fn build(self) -> ChatOptions {
        self.options
    }
}
