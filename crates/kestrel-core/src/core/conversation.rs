//! Append-only message sequence for one conversation.
//!
//! The conversation stores messages in the order it is given them. Keeping
//! tool-use and tool-result messages paired is the agent's job: it always
//! pushes the two together.

use crate::providers::ChatMessage;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing history, e.g. one restored from a session snapshot.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Appends an assistant tool-use message and its tool-result message together.
    pub fn push_pair(&mut self, tool_use: ChatMessage, tool_results: ChatMessage) {
        self.messages.reserve(2);
        self.messages.push(tool_use);
        self.messages.push(tool_results);
    }

    /// Owned copy of the history.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
