//! Read file tool.

use std::fs;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    ToolContext, ToolDefinition, ToolError, ToolErrorKind, ToolOutput, parse_input,
    resolve_existing_path,
};

/// Files larger than this are cut off with a trailing notice.
const MAX_READ_BYTES: usize = 256 * 1024;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_file".to_string(),
        description: "Read the contents of a file. Paths are relative to the project root."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ReadInput {
    path: String,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: ReadInput = parse_input(input, "read_file")?;
    let file_path = resolve_existing_path(&input.path, &ctx.root)?;

    if file_path.is_dir() {
        return Err(ToolError::new(
            ToolErrorKind::ReadError,
            format!(
                "'{}' is a directory; use list_files instead",
                file_path.display()
            ),
        ));
    }

    let bytes = fs::read(&file_path).map_err(|e| {
        ToolError::new(
            ToolErrorKind::ReadError,
            format!("Failed to read file '{}'", file_path.display()),
        )
        .with_details(format!("OS error: {e}"))
    })?;

    if bytes.len() > MAX_READ_BYTES {
        let head = String::from_utf8_lossy(&bytes[..MAX_READ_BYTES]);
        return Ok(format!(
            "{head}\n[truncated: showing first {MAX_READ_BYTES} of {} bytes]",
            bytes.len()
        ));
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
