//! Runtime execution modes.
//!
//! - `exec`: single prompt, answer on stdout
//! - `chat`: line-oriented interactive loop over stdin

use std::fs;
use std::io::{Write, stderr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use kestrel_core::config::Config;
use kestrel_core::core::agent::{Agent, AgentOptions};
use kestrel_core::core::events::ToolObserver;
use kestrel_core::core::session::{ResumeTarget, SessionSnapshot, SessionStore, resolve_resume};
use kestrel_core::providers::anthropic::{AnthropicClient, AnthropicConfig};
use kestrel_core::tools::{ToolContext, ToolRegistry, ToolRunner};

pub mod chat;
pub mod exec;
mod render;

/// Options shared by every mode.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root directory for file operations, when given on the command line.
    pub root: Option<PathBuf>,
    pub resume: Option<ResumeTarget>,
    pub no_save: bool,
}

impl RunOptions {
    pub fn new(root: Option<&Path>, resume: Option<ResumeTarget>, no_save: bool) -> Self {
        Self {
            root: root.map(Path::to_path_buf),
            resume,
            no_save,
        }
    }

    fn store(&self) -> Option<SessionStore> {
        (!self.no_save).then(SessionStore::default_location)
    }
}

/// Resolves the session to continue and the root its tools run in.
///
/// A resumed session keeps working in its recorded directory unless
/// `--root` says otherwise; the snapshot then records the new root.
///
/// # Errors
/// Fails when a resume was requested and cannot be satisfied.
fn open_session(config: &Config, opts: &RunOptions) -> Result<(SessionSnapshot, PathBuf)> {
    let Some(target) = &opts.resume else {
        let root = effective_root(opts.root.as_deref(), None);
        let session = SessionSnapshot::new(config.model.clone(), canonical(&root));
        return Ok((session, root));
    };

    let store = SessionStore::default_location();
    let mut session = resolve_resume(&store, target).context("resume session")?;
    tracing::info!(run_id = %session.run_id, "resumed session");

    let recorded = session.working_dir.clone();
    let root = effective_root(opts.root.as_deref(), Some(&recorded));
    let working_dir = canonical(&root);
    if working_dir != canonical(&recorded) {
        tracing::warn!(
            run_id = %session.run_id,
            recorded = %recorded.display(),
            root = %working_dir.display(),
            "resumed session runs in a different directory"
        );
        let _ = writeln!(
            stderr(),
            "Warning: session {} was recorded in {}; tools run in {}",
            session.run_id,
            recorded.display(),
            working_dir.display()
        );
    }
    session.working_dir = working_dir;
    Ok((session, root))
}

/// `--root` when given, else the resumed session's directory if it still
/// exists, else the current directory.
fn effective_root(explicit: Option<&Path>, recorded: Option<&Path>) -> PathBuf {
    match (explicit, recorded) {
        (Some(root), _) => root.to_path_buf(),
        (None, Some(dir)) if dir.is_dir() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Wires the provider, tools and renderer into an agent.
fn build_agent(config: &Config, opts: &RunOptions) -> Result<Agent> {
    let (session, root) = open_session(config, opts)?;

    let anthropic = &config.providers.anthropic;
    let client_config =
        AnthropicConfig::from_env(anthropic.effective_base_url(), anthropic.effective_api_key())?;
    let client = AnthropicClient::new(client_config)?;

    let runner = ToolRunner::new(
        ToolRegistry::builtins(),
        ToolContext::new(root, config.tool_timeout()),
    );
    let definitions = runner.definitions().to_vec();

    let options = AgentOptions::from_config(config)?;
    let renderer = Arc::new(render::StderrRenderer::new());
    let observer = Arc::clone(&renderer) as Arc<dyn ToolObserver>;

    Ok(Agent::new(
        Arc::new(client),
        Arc::new(runner),
        definitions,
        options,
        session,
    )
    .with_observer(observer)
    .with_presenter(renderer))
}

/// Persists the agent's session unless saving is disabled.
fn save_session(store: Option<&SessionStore>, agent: &Agent) -> Result<()> {
    let Some(store) = store else {
        return Ok(());
    };
    let path = store
        .save(agent.run_id(), agent.snapshot())
        .with_context(|| format!("save session '{}'", agent.run_id()))?;
    tracing::debug!(path = %path.display(), "session saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_explicit_root_wins() {
        let recorded = TempDir::new().unwrap();
        assert_eq!(
            effective_root(Some(Path::new("/elsewhere")), Some(recorded.path())),
            PathBuf::from("/elsewhere")
        );
    }

    #[test]
    fn test_resumed_directory_is_default_root() {
        let recorded = TempDir::new().unwrap();
        assert_eq!(
            effective_root(None, Some(recorded.path())),
            recorded.path().to_path_buf()
        );
    }

    #[test]
    fn test_missing_recorded_directory_falls_back_to_cwd() {
        let recorded = TempDir::new().unwrap();
        let gone = recorded.path().join("deleted");
        assert_eq!(effective_root(None, Some(&gone)), PathBuf::from("."));
        assert_eq!(effective_root(None, None), PathBuf::from("."));
    }
}
