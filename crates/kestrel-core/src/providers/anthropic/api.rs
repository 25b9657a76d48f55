//! Anthropic API key provider (Messages API, non-streaming).

use anyhow::{Context, Result, bail};
use tokio::time::Duration;

use super::types::{
    ApiContentBlock, ApiMessage, ApiMessageContent, ApiToolDef, CacheControl, MessagesRequest,
    MessagesResponse, SystemBlock,
};
use crate::providers::shared::{
    ChatMessage, Provider, ProviderError, ProviderErrorKind, ProviderFuture, ProviderRequest,
    ProviderResponse, ProviderResult, Role, StopReason, USER_AGENT, resolve_api_key,
    resolve_base_url,
};
use crate::tools::ToolDefinition;

/// Default base URL for the Anthropic API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the Anthropic client.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    /// Creates a new config from the config file values and the environment.
    ///
    /// Authentication resolution order:
    /// 1. `config_api_key` parameter (from config file)
    /// 2. `ANTHROPIC_API_KEY` environment variable
    ///
    /// Base URL resolution order:
    /// 1. `ANTHROPIC_BASE_URL` env var (if set and non-empty)
    /// 2. `config_base_url` parameter (if Some and non-empty)
    /// 3. Default: `https://api.anthropic.com`
    ///
    /// # Errors
    /// Returns an error if no API key is available or the base URL is invalid.
    pub fn from_env(config_base_url: Option<&str>, config_api_key: Option<&str>) -> Result<Self> {
        let api_key = resolve_api_key(config_api_key, "ANTHROPIC_API_KEY", "anthropic")?;
        let base_url = resolve_base_url(
            config_base_url,
            "ANTHROPIC_BASE_URL",
            DEFAULT_BASE_URL,
            "Anthropic",
        )?;

        Ok(Self { api_key, base_url })
    }
}

/// Anthropic API client.
pub struct AnthropicClient {
    config: AnthropicConfig,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Creates a new Anthropic client with the given configuration.
    ///
    /// When `KESTREL_BLOCK_REAL_API=1` is set, pointing the client at the
    /// production API is refused so test harnesses cannot reach the network.
    ///
    /// # Errors
    /// Returns an error if the guard trips or the HTTP client cannot be built.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if std::env::var("KESTREL_BLOCK_REAL_API").is_ok_and(|v| v == "1")
            && config.base_url == DEFAULT_BASE_URL
        {
            bail!(
                "KESTREL_BLOCK_REAL_API=1 but trying to use production Anthropic API. \
                 Set ANTHROPIC_BASE_URL to a mock server."
            );
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("build HTTP client")?;

        Ok(Self { config, http })
    }

    /// Sends one Messages API request and returns the complete reply.
    ///
    /// # Errors
    /// Returns a classified `ProviderError` for transport, status, or parse failures.
    pub async fn send_messages(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            messages: build_api_messages_with_cache_control(&request.messages),
            tools: build_tool_defs(&request.tools),
            system: build_system_blocks(request.system_prompt.as_deref()),
        };
        let payload = serde_json::to_vec(&body).map_err(|e| {
            ProviderError::malformed_request(format!("Failed to serialize request: {e}"))
        })?;

        let url = format!("{}/v1/messages", self.config.base_url);
        tracing::debug!(%url, model = %request.model, messages = request.messages.len(), "sending messages request");

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .header("user-agent", USER_AGENT)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.config.api_key)
            .body(payload)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if !status.is_success() {
            return Err(ProviderError::http_status(status.as_u16(), &text));
        }

        parse_response(&text)
    }
}

impl Provider for AnthropicClient {
    fn send<'a>(&'a self, request: &'a ProviderRequest) -> ProviderFuture<'a> {
        Box::pin(self.send_messages(request))
    }
}

fn parse_response(body: &str) -> ProviderResult<ProviderResponse> {
    let parsed: MessagesResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::parse(format!("Failed to parse Messages API response: {e}"))
            .with_details(body.to_string())
    })?;

    let stop_reason = parsed
        .stop_reason
        .as_deref()
        .map_or(StopReason::EndTurn, StopReason::parse);

    Ok(ProviderResponse {
        content: parsed
            .content
            .into_iter()
            .filter_map(super::types::ApiResponseBlock::into_chat_block)
            .collect(),
        stop_reason,
        usage: parsed.usage,
    })
}

fn build_api_messages_with_cache_control(messages: &[ChatMessage]) -> Vec<ApiMessage> {
    let mut api_messages: Vec<ApiMessage> =
        messages.iter().map(ApiMessage::from_chat_message).collect();

    sanitize_tool_use_ids(&mut api_messages);
    apply_cache_control_to_last_user_block(&mut api_messages);

    api_messages
}

fn build_tool_defs(tools: &[ToolDefinition]) -> Option<Vec<ApiToolDef<'_>>> {
    if tools.is_empty() {
        None
    } else {
        Some(tools.iter().map(ApiToolDef::from).collect())
    }
}

fn build_system_blocks(prompt: Option<&str>) -> Option<Vec<SystemBlock>> {
    prompt
        .filter(|p| !p.trim().is_empty())
        .map(|p| vec![SystemBlock::with_cache_control(p)])
}

fn apply_cache_control_to_last_user_block(api_messages: &mut [ApiMessage]) {
    if let Some(last_user_msg) = api_messages.iter_mut().rev().find(|m| m.role == Role::User)
        && let ApiMessageContent::Blocks(blocks) = &mut last_user_msg.content
        && let Some(last_block) = blocks.last_mut()
    {
        match last_block {
            ApiContentBlock::Text { cache_control, .. }
            | ApiContentBlock::ToolResult { cache_control, .. } => {
                *cache_control = Some(CacheControl::ephemeral());
            }
            ApiContentBlock::ToolUse { .. } => {}
        }
    }
}

fn sanitize_tool_use_ids(api_messages: &mut [ApiMessage]) {
    fn sanitize(id: &str) -> String {
        id.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>()
    }

    for message in api_messages.iter_mut() {
        let ApiMessageContent::Blocks(blocks) = &mut message.content else {
            continue;
        };

        for block in blocks.iter_mut() {
            match block {
                ApiContentBlock::ToolUse { id, .. } => *id = sanitize(id),
                ApiContentBlock::ToolResult { tool_use_id, .. } => {
                    *tool_use_id = sanitize(tool_use_id);
                }
                ApiContentBlock::Text { .. } => {}
            }
        }
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProviderError::network(format!("Connection failed: {e}"))
    } else if e.is_builder() {
        ProviderError::new(
            ProviderErrorKind::MalformedRequest,
            format!("Invalid request: {e}"),
        )
    } else if e.is_decode() {
        ProviderError::parse(format!("Failed to read response body: {e}"))
    } else {
        ProviderError::network(format!("Network error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::providers::shared::{ChatContentBlock, Usage};

    #[test]
    fn test_parse_response_maps_blocks_and_usage() {
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "text", "text": "Looking."},
                {"type": "tool_use", "id": "toolu_1", "name": "list_files", "input": {"path": "."}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        })
        .to_string();

        let response = parse_response(&body).unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage, Usage::new(12, 7));
        assert_eq!(
            response.content,
            vec![
                ChatContentBlock::text("Looking."),
                ChatContentBlock::tool_use("toolu_1", "list_files", json!({"path": "."})),
            ]
        );
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        let err = parse_response("not json").unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Parse);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cache_control_on_last_user_block_only() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant_blocks(vec![ChatContentBlock::tool_use(
                "toolu_1",
                "read_file",
                json!({"path": "a"}),
            )]),
            ChatMessage::tool_results(vec![ChatContentBlock::tool_result(
                "toolu_1", "contents", false,
            )]),
        ];

        let api = build_api_messages_with_cache_control(&messages);
        let value = serde_json::to_value(&api).unwrap();

        assert_eq!(value[0]["content"], json!("first"));
        assert_eq!(
            value[2]["content"][0]["cache_control"],
            json!({"type": "ephemeral"})
        );
        assert!(value[2]["content"][0].get("is_error").is_none());
    }

    #[test]
    fn test_tool_use_ids_are_sanitized() {
        let messages = vec![
            ChatMessage::assistant_blocks(vec![ChatContentBlock::tool_use(
                "call:1/x",
                "run_command",
                json!({"command": "ls"}),
            )]),
            ChatMessage::tool_results(vec![ChatContentBlock::tool_result(
                "call:1/x", "ok", true,
            )]),
        ];

        let value = serde_json::to_value(build_api_messages_with_cache_control(&messages)).unwrap();
        assert_eq!(value[0]["content"][0]["id"], json!("call_1_x"));
        assert_eq!(value[1]["content"][0]["tool_use_id"], json!("call_1_x"));
        assert_eq!(value[1]["content"][0]["is_error"], json!(true));
    }

    #[test]
    fn test_blank_system_prompt_is_omitted() {
        assert!(build_system_blocks(Some("  ")).is_none());
        assert!(build_system_blocks(None).is_none());
        assert_eq!(build_system_blocks(Some("sys")).map(|b| b.len()), Some(1));
    }
}
