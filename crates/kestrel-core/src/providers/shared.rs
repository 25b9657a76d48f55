//! Provider-agnostic types shared by the engine and LLM backends.

use std::fmt;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolDefinition;

/// Standard User-Agent header for Kestrel API requests.
pub const USER_AGENT: &str = concat!("kestrel/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Config resolution helpers
// ============================================================================

/// Resolves an API key with precedence: config > env.
///
/// # Errors
/// Returns an error if neither the config value nor `env_var` is set.
pub fn resolve_api_key(
    config_api_key: Option<&str>,
    env_var: &str,
    config_section: &str,
) -> Result<String> {
    if let Some(key) = config_api_key {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    std::env::var(env_var).context(format!(
        "No API key available. Set {env_var} or api_key in [providers.{config_section}]."
    ))
}

/// Resolves a base URL with precedence: env > config > default.
///
/// # Errors
/// Returns an error if the chosen URL is not well-formed.
pub fn resolve_base_url(
    config_base_url: Option<&str>,
    env_var: &str,
    default_url: &str,
    provider_name: &str,
) -> Result<String> {
    if let Ok(env_url) = std::env::var(env_var) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, provider_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    if let Some(config_url) = config_base_url {
        let trimmed = config_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, provider_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    Ok(default_url.to_string())
}

fn validate_url(url: &str, provider_name: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid {provider_name} base URL: {url}"))?;
    Ok(())
}

// ============================================================================
// Conversation types
// ============================================================================

/// Content block in a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ChatContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ChatContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ChatContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ChatContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Message content - either simple text or structured blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ChatContentBlock>),
}

/// A chat message with owned data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Creates an assistant message with content blocks (for tool use).
    pub fn assistant_blocks(blocks: Vec<ChatContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Creates a user message carrying tool results.
    pub fn tool_results(blocks: Vec<ChatContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Ids of every tool-use block in this message, in order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.blocks()
            .iter()
            .filter_map(|block| match block {
                ChatContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Ids referenced by every tool-result block in this message, in order.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.blocks()
            .iter()
            .filter_map(|block| match block {
                ChatContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text of the message (text blocks joined by newline).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ChatContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn blocks(&self) -> &[ChatContentBlock] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Categories of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Invalid or missing credentials (401)
    Authentication,
    /// Credentials lack permission (403)
    Forbidden,
    /// Provider rejected the request as invalid (400, 413, 422)
    BadRequest,
    /// Request could not be built or serialized locally
    MalformedRequest,
    /// Rate limited (429)
    RateLimited,
    /// Provider overloaded (529)
    Overloaded,
    /// Other 5xx
    Server,
    /// Any other non-success status
    HttpStatus,
    /// Connection or request timeout
    Timeout,
    /// Transport failure
    Network,
    /// Response body could not be understood
    Parse,
}

impl ProviderErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ProviderErrorKind::Authentication
                | ProviderErrorKind::Forbidden
                | ProviderErrorKind::BadRequest
                | ProviderErrorKind::MalformedRequest
        )
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => ProviderErrorKind::BadRequest,
            401 => ProviderErrorKind::Authentication,
            403 => ProviderErrorKind::Forbidden,
            429 => ProviderErrorKind::RateLimited,
            529 => ProviderErrorKind::Overloaded,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::HttpStatus,
        }
    }

    /// Maps an API error `type` string (e.g. `overloaded_error`).
    pub fn from_api_error_type(error_type: &str) -> Option<Self> {
        match error_type {
            "authentication_error" => Some(ProviderErrorKind::Authentication),
            "permission_error" => Some(ProviderErrorKind::Forbidden),
            "invalid_request_error" | "request_too_large" => Some(ProviderErrorKind::BadRequest),
            "rate_limit_error" => Some(ProviderErrorKind::RateLimited),
            "overloaded_error" => Some(ProviderErrorKind::Overloaded),
            "api_error" => Some(ProviderErrorKind::Server),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::Forbidden => "forbidden",
            ProviderErrorKind::BadRequest => "bad_request",
            ProviderErrorKind::MalformedRequest => "malformed_request",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::Overloaded => "overloaded",
            ProviderErrorKind::Server => "server",
            ProviderErrorKind::HttpStatus => "http_status",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Parse => "parse",
        };
        f.write_str(name)
    }
}

/// Structured error from the provider with kind and details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Error category
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Creates an error from a non-success HTTP response.
    ///
    /// The status decides the kind; the body's `error.type` refines it when
    /// the status alone is generic.
    pub fn http_status(status: u16, body: &str) -> Self {
        let mut kind = ProviderErrorKind::from_status(status);
        let mut message = format!("HTTP {status}");

        if let Ok(json) = serde_json::from_str::<Value>(body)
            && let Some(error_obj) = json.get("error")
        {
            if kind == ProviderErrorKind::HttpStatus
                && let Some(refined) = error_obj
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(ProviderErrorKind::from_api_error_type)
            {
                kind = refined;
            }
            if let Some(msg) = error_obj.get("message").and_then(Value::as_str) {
                message = format!("HTTP {status}: {msg}");
            }
        }

        let details = (!body.is_empty()).then(|| body.to_string());
        Self {
            kind,
            message,
            details,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Parse, message)
    }

    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::MalformedRequest, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// Wire contract
// ============================================================================

/// Token usage information reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    /// Input tokens (non-cached)
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Tokens read from cache
    pub cache_read_input_tokens: u64,
    /// Tokens written to cache
    pub cache_creation_input_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    /// Adds another Usage to this one.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    StopSequence,
    MaxTokens,
    Other(String),
}

impl StopReason {
    pub fn parse(value: &str) -> Self {
        match value {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "stop_sequence" => StopReason::StopSequence,
            "max_tokens" => StopReason::MaxTokens,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// One outbound request for the next assistant turn.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub messages: Vec<ChatMessage>,
}

/// The provider's reply for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub content: Vec<ChatContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

pub type ProviderFuture<'a> = BoxFuture<'a, ProviderResult<ProviderResponse>>;

/// An LLM backend able to produce the next assistant turn.
pub trait Provider: Send + Sync {
    fn send<'a>(&'a self, request: &'a ProviderRequest) -> ProviderFuture<'a>;
}
