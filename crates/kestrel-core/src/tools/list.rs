//! Directory listing tool.

use std::fs;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    ToolContext, ToolDefinition, ToolError, ToolErrorKind, ToolOutput, parse_input,
    resolve_existing_path,
};

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_files".to_string(),
        description: "List the entries of a directory. Directories are suffixed with '/'. \
            Defaults to the project root."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (relative to the project root). Defaults to '.'"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn default_path() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
struct ListInput {
    #[serde(default = "default_path")]
    path: String,
}

pub fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: ListInput = parse_input(input, "list_files")?;
    let dir = resolve_existing_path(&input.path, &ctx.root)?;

    if !dir.is_dir() {
        return Err(ToolError::new(
            ToolErrorKind::PathError,
            format!("'{}' is not a directory", dir.display()),
        ));
    }

    let read_err = |e: std::io::Error| {
        ToolError::new(
            ToolErrorKind::ReadError,
            format!("Failed to list directory '{}'", dir.display()),
        )
        .with_details(format!("OS error: {e}"))
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(&dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            name.push('/');
        }
        entries.push(name);
    }

    if entries.is_empty() {
        return Ok("(empty directory)".to_string());
    }

    entries.sort();
    Ok(entries.join("\n"))
}
