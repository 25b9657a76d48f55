//! Anthropic Messages API provider.
//!
//! # Prompt Caching Strategy
//!
//! Two cache breakpoints are placed per request:
//! - the system prompt block, reused across runs with the same config;
//! - the last block of the last user message, reused turn over turn within a run.

pub mod api;
pub(crate) mod types;

pub use api::{AnthropicClient, AnthropicConfig, DEFAULT_BASE_URL};
