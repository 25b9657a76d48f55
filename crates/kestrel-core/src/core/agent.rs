//! Orchestration loop.
//!
//! [`Agent::chat`] appends the user message, then alternates provider turns
//! and tool batches until the model answers with text, hits its token limit,
//! or a provider error survives the retry controller. Every outcome comes
//! back as a [`ChatResponse`]; nothing escapes as an error.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::core::conversation::Conversation;
use crate::core::dispatcher::{ToolCallRecord, ToolDispatcher, ToolExecutor, ToolInvocation};
use crate::core::events::{NoopObserver, Presenter, ToolObserver};
use crate::core::retry::{RetryPolicy, send_with_retry};
use crate::core::session::SessionSnapshot;
use crate::prompts::merge_system_prompt;
use crate::providers::{
    ChatMessage, Provider, ProviderError, ProviderErrorKind, ProviderRequest, StopReason, Usage,
};
use crate::tools::ToolDefinition;

/// Returned as the response text when the model runs out of output tokens.
pub const TRUNCATION_MESSAGE: &str = "The response was cut off because it reached the maximum \
    token limit. Try asking for a shorter answer or breaking the task into smaller steps.";

/// Per-agent request settings.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub parallel_tools: bool,
    pub retry: RetryPolicy,
}

impl AgentOptions {
    /// Options from config, with the built-in prompt merged in.
    ///
    /// # Errors
    /// Returns an error if the configured system prompt file is unreadable.
    pub fn from_config(config: &Config) -> Result<Self> {
        let extra = config.effective_system_prompt()?;
        Ok(Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt: Some(merge_system_prompt(extra.as_deref())),
            parallel_tools: config.parallel_tools,
            retry: config.retry_policy(),
        })
    }
}

/// Why a `chat` call did not end normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The model hit `max_tokens`; the partial reply was discarded.
    MaxTokens,
    /// The provider failed fatally or ran out of retries.
    Failed {
        kind: ProviderErrorKind,
        message: String,
    },
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::MaxTokens => f.write_str("max_tokens"),
            ChatError::Failed { message, .. } => f.write_str(message),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<ProviderError> for ChatError {
    fn from(e: ProviderError) -> Self {
        ChatError::Failed {
            kind: e.kind,
            message: e.to_string(),
        }
    }
}

/// Result of one `chat` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub text: String,
    /// Every tool call made during this call, in execution order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Summed over every provider turn that succeeded.
    pub usage: Option<Usage>,
    pub error: Option<ChatError>,
}

impl ChatResponse {
    pub fn is_truncated(&self) -> bool {
        matches!(self.error, Some(ChatError::MaxTokens))
    }

    /// True for provider failures; truncation does not count.
    pub fn is_failure(&self) -> bool {
        matches!(self.error, Some(ChatError::Failed { .. }))
    }
}

enum TurnOutcome {
    Final(String),
    Truncated,
}

/// Drives one conversation.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolExecutor>,
    tool_definitions: Vec<ToolDefinition>,
    options: AgentOptions,
    dispatcher: ToolDispatcher,
    observer: Arc<dyn ToolObserver>,
    presenter: Option<Arc<dyn Presenter>>,
    conversation: Conversation,
    session: SessionSnapshot,
}

impl Agent {
    /// Creates an agent continuing `session`'s conversation.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        tool_definitions: Vec<ToolDefinition>,
        options: AgentOptions,
        mut session: SessionSnapshot,
    ) -> Self {
        session.model.clone_from(&options.model);
        Self {
            provider,
            tools,
            tool_definitions,
            dispatcher: ToolDispatcher::new(options.parallel_tools),
            options,
            observer: Arc::new(NoopObserver),
            presenter: None,
            conversation: Conversation::from_messages(session.conversation.clone()),
            session,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ToolObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// The session as of the last settled `chat` call.
    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.session
    }

    pub fn run_id(&self) -> &str {
        &self.session.run_id
    }

    pub fn clear(&mut self) {
        self.conversation.clear();
        self.session.conversation.clear();
    }

    /// Runs one user message to completion.
    pub async fn chat(&mut self, user_text: &str) -> ChatResponse {
        self.conversation.push(ChatMessage::user(user_text));

        let mut tool_calls = Vec::new();
        let mut usage = None;

        let response = match self.run_turns(&mut tool_calls, &mut usage).await {
            Ok(TurnOutcome::Final(text)) => ChatResponse {
                text,
                tool_calls,
                usage,
                error: None,
            },
            Ok(TurnOutcome::Truncated) => {
                tracing::warn!(run_id = %self.session.run_id, "response truncated at max_tokens");
                ChatResponse {
                    text: TRUNCATION_MESSAGE.to_string(),
                    tool_calls,
                    usage,
                    error: Some(ChatError::MaxTokens),
                }
            }
            Err(e) => {
                tracing::error!(run_id = %self.session.run_id, error = %e, "chat failed");
                ChatResponse {
                    text: format!("An error occurred: {e}"),
                    tool_calls,
                    usage,
                    error: Some(e),
                }
            }
        };

        self.session.conversation = self.conversation.snapshot();

        if let Some(presenter) = &self.presenter {
            presenter.present(self.conversation.messages(), &response.tool_calls);
        }

        response
    }

    async fn run_turns(
        &mut self,
        tool_calls: &mut Vec<ToolCallRecord>,
        usage: &mut Option<Usage>,
    ) -> Result<TurnOutcome, ChatError> {
        loop {
            let request = self.build_request();
            let reply = send_with_retry(&self.options.retry, self.provider.as_ref(), &request).await?;
            usage.get_or_insert_with(Usage::default).add(&reply.usage);

            // The partial reply is not kept in history.
            if reply.stop_reason == StopReason::MaxTokens {
                return Ok(TurnOutcome::Truncated);
            }

            let invocations = ToolInvocation::from_blocks(&reply.content);
            if invocations.is_empty() {
                let text = ChatMessage::assistant_blocks(reply.content).text();
                if !text.is_empty() {
                    self.conversation.push(ChatMessage::assistant(text.clone()));
                }
                return Ok(TurnOutcome::Final(text));
            }

            tracing::debug!(count = invocations.len(), "dispatching tool calls");
            let records = self
                .dispatcher
                .dispatch(&self.tools, &self.observer, &invocations)
                .await;

            let results = records.iter().map(ToolCallRecord::to_result_block).collect();
            self.conversation.push_pair(
                ChatMessage::assistant_blocks(reply.content),
                ChatMessage::tool_results(results),
            );
            tool_calls.extend(records);
        }
    }

    fn build_request(&self) -> ProviderRequest {
        ProviderRequest {
            model: self.options.model.clone(),
            max_tokens: self.options.max_tokens,
            system_prompt: self.options.system_prompt.clone(),
            tools: self.tool_definitions.clone(),
            messages: self.conversation.snapshot(),
        }
    }
}
