//! LLM providers.

pub mod anthropic;
pub mod shared;

pub use shared::{
    ChatContentBlock, ChatMessage, MessageContent, Provider, ProviderError, ProviderErrorKind,
    ProviderFuture, ProviderRequest, ProviderResponse, ProviderResult, Role, StopReason, Usage,
};
