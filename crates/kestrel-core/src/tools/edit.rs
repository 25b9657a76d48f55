//! Edit file tool.
//!
//! Performs a single exact string replacement, or creates a file when
//! `old_str` is empty.

use std::fs;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    ToolContext, ToolDefinition, ToolError, ToolErrorKind, ToolOutput, parse_input,
    resolve_existing_path, resolve_path,
};

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "edit_file".to_string(),
        description: "Replace one exact occurrence of 'old_str' with 'new_str' in a file. \
            'old_str' must match exactly (including whitespace) and appear exactly once. \
            Pass an empty 'old_str' to create the file with 'new_str' as its content."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit (relative to the project root)"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace; empty to create the file"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text, or the full content of a new file"
                }
            },
            "required": ["path", "old_str", "new_str"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct EditInput {
    path: String,
    old_str: String,
    new_str: String,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: EditInput = parse_input(input, "edit_file")?;

    if input.old_str.is_empty() {
        return create_file(&input, ctx);
    }

    let file_path = resolve_existing_path(&input.path, &ctx.root)?;

    let content = fs::read_to_string(&file_path).map_err(|e| {
        ToolError::new(
            ToolErrorKind::ReadError,
            format!("Failed to read file '{}'", file_path.display()),
        )
        .with_details(format!("OS error: {e}"))
    })?;

    match content.matches(&input.old_str).count() {
        0 => {
            return Err(ToolError::new(
                ToolErrorKind::OldNotFound,
                format!(
                    "No occurrences of old_str found in '{}'",
                    file_path.display()
                ),
            )
            .with_details(format!("Searched for: {}", input.old_str)));
        }
        1 => {}
        count => {
            return Err(ToolError::new(
                ToolErrorKind::AmbiguousMatch,
                format!(
                    "old_str appears {count} times in '{}'; include more surrounding text so it matches exactly once",
                    file_path.display()
                ),
            ));
        }
    }

    let new_content = content.replacen(&input.old_str, &input.new_str, 1);

    fs::write(&file_path, new_content).map_err(|e| {
        ToolError::new(
            ToolErrorKind::WriteError,
            format!("Failed to write file '{}'", file_path.display()),
        )
        .with_details(format!("OS error: {e}"))
    })?;

    Ok(format!("Edited {}", file_path.display()))
}

fn create_file(input: &EditInput, ctx: &ToolContext) -> ToolOutput {
    let file_path = resolve_path(&input.path, &ctx.root);

    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ToolError::new(
                ToolErrorKind::WriteError,
                format!("Failed to create directory '{}'", parent.display()),
            )
            .with_details(format!("OS error: {e}"))
        })?;
    }

    fs::write(&file_path, &input.new_str).map_err(|e| {
        ToolError::new(
            ToolErrorKind::WriteError,
            format!("Failed to write file '{}'", file_path.display()),
        )
        .with_details(format!("OS error: {e}"))
    })?;

    Ok(format!(
        "Created {} ({} bytes)",
        file_path.display(),
        input.new_str.len()
    ))
}
