//! Tool system for agentic capabilities.
//!
//! This module provides a registry of tools that the agent can use,
//! along with schema definitions for the provider API.

pub mod bash;
pub mod edit;
pub mod list;
pub mod read;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::dispatcher::{ExecFuture, ToolExecutor};

// ============================================================================
// Errors
// ============================================================================

/// Failure categories reported by tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidInput,
    PathError,
    ReadError,
    WriteError,
    OldNotFound,
    /// `old_str` occurs more than once; refusing to guess which to replace.
    AmbiguousMatch,
    SpawnError,
    ExecError,
    Timeout,
    UnknownTool,
    Panic,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::InvalidInput => "invalid_input",
            ToolErrorKind::PathError => "path_error",
            ToolErrorKind::ReadError => "read_error",
            ToolErrorKind::WriteError => "write_error",
            ToolErrorKind::OldNotFound => "old_not_found",
            ToolErrorKind::AmbiguousMatch => "ambiguous_match",
            ToolErrorKind::SpawnError => "spawn_error",
            ToolErrorKind::ExecError => "exec_error",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::Panic => "panic",
        }
    }

    /// Whether the failure came from the filesystem or process layer.
    pub fn is_io(self) -> bool {
        matches!(
            self,
            ToolErrorKind::PathError
                | ToolErrorKind::ReadError
                | ToolErrorKind::WriteError
                | ToolErrorKind::SpawnError
                | ToolErrorKind::ExecError
        )
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details for failed tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    /// Optional additional context (OS error, available tools, ...).
    pub details: Option<String>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolError {}

/// What a tool produces: result text for the model, or a classified failure.
pub type ToolOutput = Result<String, ToolError>;

// ============================================================================
// Path Resolution Helpers
// ============================================================================

/// Joins a possibly relative path with root.
pub fn resolve_path(path: &str, root: &Path) -> PathBuf {
    let requested = Path::new(path);
    if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    }
}

/// Resolves a path that must already exist (canonicalized).
///
/// # Errors
/// Returns `PathError` if the path does not exist.
pub fn resolve_existing_path(path: &str, root: &Path) -> Result<PathBuf, ToolError> {
    let full_path = resolve_path(path, root);
    full_path.canonicalize().map_err(|e| {
        ToolError::new(
            ToolErrorKind::PathError,
            format!("Path does not exist '{}'", full_path.display()),
        )
        .with_details(format!("OS error: {e}"))
    })
}

/// Deserializes tool input, mapping failures to `InvalidInput`.
pub(crate) fn parse_input<T: DeserializeOwned>(input: &Value, tool: &str) -> Result<T, ToolError> {
    serde_json::from_value(input.clone()).map_err(|e| {
        ToolError::new(
            ToolErrorKind::InvalidInput,
            format!("Invalid input for {tool} tool"),
        )
        .with_details(format!("Parse error: {e}"))
    })
}

// ============================================================================
// Registry
// ============================================================================

/// Tool definition for the provider API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Context for tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Root directory for file operations.
    pub root: PathBuf,

    /// Optional timeout for tool execution.
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(root: PathBuf, timeout: Option<Duration>) -> Self {
        Self { root, timeout }
    }
}

/// Async tool handler function.
pub type ToolFuture = BoxFuture<'static, ToolOutput>;
pub type ToolHandler = Arc<dyn Fn(&Value, &ToolContext) -> ToolFuture + Send + Sync>;

/// Tool registry (definitions + executors).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("definitions", &self.definitions)
            .field("handlers_len", &self.handlers.len())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `read_file`, `edit_file`, `run_command` and `list_files`.
    pub fn builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtin_tools();
        registry
    }

    #[must_use]
    pub fn with_tool(mut self, definition: ToolDefinition, handler: ToolHandler) -> Self {
        self.register(definition, handler);
        self
    }

    /// Registers a tool, replacing any existing tool with the same name.
    pub fn register(&mut self, definition: ToolDefinition, handler: ToolHandler) {
        let name_lower = definition.name.to_ascii_lowercase();
        if let Some(pos) = self
            .definitions
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(&definition.name))
        {
            self.definitions.remove(pos);
        }
        self.definitions.push(definition);
        self.handlers.insert(name_lower, handler);
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.definitions.iter().map(|t| t.name.clone()).collect()
    }

    /// Executes a tool by name. Names are matched case-insensitively.
    pub async fn execute(&self, name: &str, input: &Value, ctx: &ToolContext) -> ToolOutput {
        match self.handlers.get(&name.to_ascii_lowercase()) {
            Some(handler) => handler(input, ctx).await,
            None => {
                let mut available = self.tool_names();
                available.sort();
                Err(
                    ToolError::new(ToolErrorKind::UnknownTool, format!("Unknown tool: {name}"))
                        .with_details(format!("Available tools: {}", available.join(", "))),
                )
            }
        }
    }

    fn register_builtin_tools(&mut self) {
        self.register(
            read::definition(),
            Arc::new(|input, ctx| {
                let input = input.clone();
                let ctx = ctx.clone();
                Box::pin(async move {
                    execute_blocking(ctx.timeout, move || read::execute(&input, &ctx)).await
                })
            }),
        );

        self.register(
            edit::definition(),
            Arc::new(|input, ctx| {
                let input = input.clone();
                let ctx = ctx.clone();
                Box::pin(async move {
                    execute_blocking(ctx.timeout, move || edit::execute(&input, &ctx)).await
                })
            }),
        );

        self.register(
            bash::definition(),
            Arc::new(|input, ctx| {
                let input = input.clone();
                let ctx = ctx.clone();
                Box::pin(async move { bash::execute(&input, &ctx).await })
            }),
        );

        self.register(
            list::definition(),
            Arc::new(|input, ctx| {
                let input = input.clone();
                let ctx = ctx.clone();
                Box::pin(async move {
                    execute_blocking(ctx.timeout, move || list::execute(&input, &ctx)).await
                })
            }),
        );
    }
}

/// Execute a blocking tool function with optional timeout.
async fn execute_blocking<F>(timeout: Option<Duration>, f: F) -> ToolOutput
where
    F: FnOnce() -> ToolOutput + Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(f);

    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(output)) => output,
            Ok(Err(_)) => Err(ToolError::new(
                ToolErrorKind::Panic,
                "Tool execution panicked",
            )),
            Err(_) => {
                handle.abort();
                Err(ToolError::new(
                    ToolErrorKind::Timeout,
                    format!(
                        "Tool execution timed out after {} seconds",
                        timeout.as_secs()
                    ),
                ))
            }
        },
        None => handle.await.unwrap_or_else(|_| {
            Err(ToolError::new(
                ToolErrorKind::Panic,
                "Tool execution panicked",
            ))
        }),
    }
}

/// Registry bound to a context: the agent's tool-execution capability.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    registry: ToolRegistry,
    ctx: ToolContext,
}

impl ToolRunner {
    pub fn new(registry: ToolRegistry, ctx: ToolContext) -> Self {
        Self { registry, ctx }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        self.registry.definitions()
    }
}

impl ToolExecutor for ToolRunner {
    fn execute<'a>(&'a self, name: &'a str, input: &'a Value) -> ExecFuture<'a> {
        Box::pin(async move {
            self.registry
                .execute(name, input, &self.ctx)
                .await
                .map_err(anyhow::Error::from)
        })
    }
}
