//! Session command handlers.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use kestrel_core::core::session::{SessionError, SessionSnapshot, SessionStore, format_timestamp};
use kestrel_core::providers::{ChatContentBlock, MessageContent};

const RESULT_PREVIEW_CHARS: usize = 200;

pub fn list() -> Result<()> {
    let store = SessionStore::default_location();
    let summaries = store.summaries();
    if summaries.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    for summary in summaries {
        let created = summary
            .created_at
            .and_then(format_timestamp)
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{}  {}  {}  {} messages",
            summary.run_id, created, summary.model, summary.message_count
        );
    }
    Ok(())
}

pub fn show(id: &str) -> Result<()> {
    let store = SessionStore::default_location();
    let snapshot = store
        .load(id)
        .ok_or_else(|| SessionError::NotFound(id.to_string()))
        .with_context(|| format!("load session '{id}'"))?;
    print!("{}", format_transcript(&snapshot));
    Ok(())
}

/// Renders a snapshot as a plain-text transcript.
fn format_transcript(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let created = snapshot
        .created_at
        .and_then(format_timestamp)
        .unwrap_or_else(|| "unknown".to_string());
    let _ = writeln!(out, "Session {}", snapshot.run_id);
    let _ = writeln!(out, "Model: {}", snapshot.model);
    let _ = writeln!(out, "Created: {created}");
    let _ = writeln!(out, "Working dir: {}", snapshot.working_dir.display());

    for message in &snapshot.conversation {
        out.push('\n');
        match &message.content {
            MessageContent::Text(text) => {
                let _ = writeln!(out, "[{}] {text}", message.role);
            }
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    format_block(&mut out, &message.role.to_string(), block);
                }
            }
        }
    }
    out
}

fn format_block(out: &mut String, role: &str, block: &ChatContentBlock) {
    match block {
        ChatContentBlock::Text { text } => {
            let _ = writeln!(out, "[{role}] {text}");
        }
        ChatContentBlock::ToolUse { name, input, .. } => {
            let _ = writeln!(out, "[{role}] → {name} {input}");
        }
        ChatContentBlock::ToolResult {
            content, is_error, ..
        } => {
            let label = if *is_error { "tool error" } else { "tool" };
            let _ = writeln!(out, "[{label}] {}", preview(content));
        }
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(RESULT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use kestrel_core::providers::ChatMessage;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_format_transcript_renders_tool_turns() {
        let mut snapshot = SessionSnapshot::new("claude-test", "/work");
        snapshot.conversation = vec![
            ChatMessage::user("list files"),
            ChatMessage::assistant_blocks(vec![ChatContentBlock::tool_use(
                "t1",
                "list_files",
                json!({"path": "."}),
            )]),
            ChatMessage::tool_results(vec![ChatContentBlock::tool_result(
                "t1", "src/", false,
            )]),
            ChatMessage::assistant("There is a src directory."),
        ];

        let transcript = format_transcript(&snapshot);

        assert!(transcript.contains("Model: claude-test"));
        assert!(transcript.contains("[user] list files"));
        assert!(transcript.contains("[assistant] → list_files {\"path\":\".\"}"));
        assert!(transcript.contains("[tool] src/"));
        assert!(transcript.contains("[assistant] There is a src directory."));
    }

    #[test]
    fn test_preview_truncates_long_results() {
        let long = "x".repeat(RESULT_PREVIEW_CHARS + 10);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), RESULT_PREVIEW_CHARS + 1);
        assert!(shown.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}
