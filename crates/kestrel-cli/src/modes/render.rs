//! Stderr rendering of tool activity.
//!
//! Tool lines go to stderr so stdout carries only the answer text.

use std::collections::HashMap;
use std::io::{Write, stderr};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use kestrel_core::core::dispatcher::ToolCallRecord;
use kestrel_core::core::events::{Presenter, ToolEvent, ToolObserver};
use kestrel_core::providers::ChatMessage;

/// Prints one line per tool start and finish, plus a failure summary.
#[derive(Debug, Default)]
pub struct StderrRenderer {
    /// Tracks tool start times for duration calculation.
    started: Mutex<HashMap<String, Instant>>,
}

impl StderrRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn render_event(&self, event: &ToolEvent) -> String {
        let mut started = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match event {
            ToolEvent::Started { id, name, .. } => {
                started.insert(id.clone(), Instant::now());
                format!("⚙ Running {name}...")
            }
            ToolEvent::Finished {
                id, name, error, ..
            } => {
                let duration = started
                    .remove(id)
                    .map(|start| format!(" ({:.2}s)", start.elapsed().as_secs_f64()))
                    .unwrap_or_default();
                if *error {
                    format!("✗ {name} failed.{duration}")
                } else {
                    format!("✓ {name} done.{duration}")
                }
            }
        }
    }
}

impl ToolObserver for StderrRenderer {
    fn on_event(&self, event: &ToolEvent) {
        let line = self.render_event(event);
        let _ = writeln!(stderr(), "{line}");
    }
}

impl Presenter for StderrRenderer {
    fn present(&self, _conversation: &[ChatMessage], tool_calls: &[ToolCallRecord]) {
        if let Some(line) = failure_summary(tool_calls) {
            let _ = writeln!(stderr(), "{line}");
        }
    }
}

fn failure_summary(tool_calls: &[ToolCallRecord]) -> Option<String> {
    let failed: Vec<&str> = tool_calls
        .iter()
        .filter(|call| call.error)
        .map(|call| call.name.as_str())
        .collect();
    if failed.is_empty() {
        return None;
    }
    Some(format!(
        "{} of {} tool calls failed: {}",
        failed.len(),
        tool_calls.len(),
        failed.join(", ")
    ))
}
