//! Tool lifecycle events and presentation hooks.
//!
//! The dispatcher reports each invocation to a [`ToolObserver`] before and
//! after it runs. Hosts that render the transcript implement [`Presenter`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::dispatcher::ToolCallRecord;
use crate::providers::ChatMessage;

/// Default channel capacity for observer event streams.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Emitted around every tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// The invocation is about to run.
    Started {
        id: String,
        name: String,
        input: Value,
    },

    /// The invocation settled, successfully or not.
    Finished {
        id: String,
        name: String,
        input: Value,
        result: String,
        error: bool,
    },
}

impl ToolEvent {
    pub fn id(&self) -> &str {
        match self {
            ToolEvent::Started { id, .. } | ToolEvent::Finished { id, .. } => id,
        }
    }
}

/// Side channel for tool lifecycle notifications.
///
/// Called inline by the dispatcher, so implementations must not block.
pub trait ToolObserver: Send + Sync {
    fn on_event(&self, event: &ToolEvent);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ToolObserver for NoopObserver {
    fn on_event(&self, _event: &ToolEvent) {}
}

/// Forwards events into a bounded channel.
///
/// Sends are best-effort: when the consumer lags and the channel is full,
/// the event is dropped rather than stalling tool execution.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<ToolEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<ToolEvent>) -> Self {
        Self { tx }
    }

    /// Creates an observer and the receiver paired with it.
    pub fn channel() -> (Self, mpsc::Receiver<ToolEvent>) {
        let (tx, rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }
}

impl ToolObserver for ChannelObserver {
    fn on_event(&self, event: &ToolEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            tracing::debug!(id = event.id(), error = %e, "dropped tool event");
        }
    }
}

/// Receives the conversation and the turn's tool calls once `chat` settles.
pub trait Presenter: Send + Sync {
    fn present(&self, conversation: &[ChatMessage], tool_calls: &[ToolCallRecord]);
}
