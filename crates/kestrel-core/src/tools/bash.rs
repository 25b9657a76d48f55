//! Shell command tool.
//!
//! Runs `sh -c <command>` in the context root and renders exit code,
//! stdout and stderr as plain text for the model.

use std::fmt::Write as _;
use std::process::Stdio;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, ToolError, ToolErrorKind, ToolOutput, parse_input};

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "run_command".to_string(),
        description: "Execute a shell command in the project root. Returns the exit code, \
            stdout and stderr. Useful for running tools like rg (ripgrep), cargo test, etc."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct CommandInput {
    command: String,
}

/// Captured result of one command run.
#[derive(Debug)]
struct CommandOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl CommandOutput {
    fn render(&self) -> String {
        let mut text = format!("exit code: {}", self.exit_code);
        if !self.stdout.is_empty() {
            let _ = write!(text, "\n\nstdout:\n{}", self.stdout.trim_end());
        }
        if !self.stderr.is_empty() {
            let _ = write!(text, "\n\nstderr:\n{}", self.stderr.trim_end());
        }
        text
    }
}

/// Executes the command. A timeout is a normal result, not an error.
pub async fn execute(input: &Value, ctx: &ToolContext) -> ToolOutput {
    let input: CommandInput = parse_input(input, "run_command")?;

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&input.command)
        .current_dir(&ctx.root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ToolError::new(
                ToolErrorKind::SpawnError,
                format!("Failed to spawn command '{}'", input.command),
            )
            .with_details(format!("OS error: {e}"))
        })?;

    let output_fut = child.wait_with_output();
    let output = match ctx.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, output_fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(command = %input.command, "command timed out");
                return Ok(format!(
                    "Command timed out after {} seconds",
                    timeout.as_secs()
                ));
            }
        },
        None => output_fut.await,
    }
    .map_err(|e| {
        ToolError::new(
            ToolErrorKind::ExecError,
            format!("Failed to execute command '{}'", input.command),
        )
        .with_details(format!("OS error: {e}"))
    })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    }
    .render())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn ctx(temp: &TempDir, timeout: Option<Duration>) -> ToolContext {
        ToolContext::new(temp.path().to_path_buf(), timeout)
    }

    #[tokio::test]
    async fn test_command_captures_stdout() {
        let temp = TempDir::new().unwrap();

        let output = execute(&json!({"command": "echo hello"}), &ctx(&temp, None))
            .await
            .unwrap();
        assert_eq!(output, "exit code: 0\n\nstdout:\nhello");
    }

    #[tokio::test]
    async fn test_command_captures_stderr_and_exit_code() {
        let temp = TempDir::new().unwrap();

        let output = execute(
            &json!({"command": "echo oops >&2; exit 42"}),
            &ctx(&temp, None),
        )
        .await
        .unwrap();
        assert_eq!(output, "exit code: 42\n\nstderr:\noops");
    }

    #[tokio::test]
    async fn test_command_runs_in_root_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "x").unwrap();

        let output = execute(&json!({"command": "ls"}), &ctx(&temp, None))
            .await
            .unwrap();
        assert!(output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_command_timeout_is_reported_not_failed() {
        let temp = TempDir::new().unwrap();

        let output = execute(
            &json!({"command": "sleep 5"}),
            &ctx(&temp, Some(Duration::from_millis(100))),
        )
        .await
        .unwrap();
        assert_eq!(output, "Command timed out after 0 seconds");
    }

    #[tokio::test]
    async fn test_command_invalid_input() {
        let temp = TempDir::new().unwrap();

        let err = execute(&json!({"cmd": "ls"}), &ctx(&temp, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_command_missing_root_is_spawn_error() {
        let temp = TempDir::new().unwrap();
        let ctx = ToolContext::new(temp.path().join("gone"), None);

        let err = execute(&json!({"command": "true"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::SpawnError);
    }
}
