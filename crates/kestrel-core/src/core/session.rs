//! Session persistence.
//!
//! Each run is stored as `<sessions_dir>/<runId>/session.json`:
//! `{runId, createdAt, workingDir, model, conversation}`. Saves go through a
//! sibling `session.json.tmp` that is synced and renamed over the final path,
//! so a crash never leaves a half-written snapshot visible.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::paths;
use crate::providers::ChatMessage;

const SNAPSHOT_FILE: &str = "session.json";
const TEMP_SNAPSHOT_FILE: &str = "session.json.tmp";

/// Durable, resumable state of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub run_id: String,
    /// Milliseconds since the Unix epoch. `None` when the stored value is
    /// absent, null or not a finite number.
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<i64>,
    pub working_dir: PathBuf,
    pub model: String,
    #[serde(default)]
    pub conversation: Vec<ChatMessage>,
}

impl SessionSnapshot {
    /// Starts a fresh run with a new id.
    pub fn new(model: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            created_at: Some(Utc::now().timestamp_millis()),
            working_dir: working_dir.into(),
            model: model.into(),
            conversation: Vec::new(),
        }
    }
}

/// Listing entry for one stored run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub run_id: String,
    /// `createdAt` as stored, when present and numeric.
    pub created_at: Option<i64>,
    pub modified: Option<SystemTime>,
    pub model: String,
    pub message_count: usize,
}

impl SessionSummary {
    /// Ordering key: `createdAt`, else the file's modification time.
    pub fn sort_key(&self) -> i64 {
        self.created_at
            .or_else(|| self.modified.map(system_time_millis))
            .unwrap_or(0)
    }
}

/// Fatal resume failures surfaced to the host at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A named run does not exist or cannot be loaded.
    NotFound(String),
    /// The latest run was requested but none are stored.
    NoSessions,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound(id) => write!(f, "Session not found: {id}"),
            SessionError::NoSessions => write!(f, "No saved sessions to resume"),
        }
    }
}

impl std::error::Error for SessionError {}

/// What the host asked to resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeTarget {
    Latest,
    Id(String),
}

/// Filesystem-backed snapshot store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under `${KESTREL_HOME}/sessions`.
    pub fn default_location() -> Self {
        Self::new(paths::sessions_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id).join(SNAPSHOT_FILE)
    }

    /// Atomically writes `snapshot` as the state of `run_id`.
    ///
    /// # Errors
    /// Returns an error if the id is not a plain name or any write step fails.
    pub fn save(&self, run_id: &str, snapshot: &SessionSnapshot) -> Result<PathBuf> {
        if !is_valid_run_id(run_id) {
            bail!("Invalid run id: {run_id:?}");
        }

        let dir = self.root.join(run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create session dir {}", dir.display()))?;

        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize session")?;

        let temp_path = dir.join(TEMP_SNAPSHOT_FILE);
        let final_path = dir.join(SNAPSHOT_FILE);
        {
            let mut temp = fs::File::create(&temp_path)
                .with_context(|| format!("Failed to create {}", temp_path.display()))?;
            temp.write_all(&json)
                .context("Failed to write temp session file")?;
            temp.sync_all()
                .context("Failed to sync temp session file")?;
        }
        fs::rename(&temp_path, &final_path).context("Failed to replace session file")?;

        tracing::debug!(run_id, path = %final_path.display(), messages = snapshot.conversation.len(), "session saved");
        Ok(final_path)
    }

    /// Loads a run. Missing or unreadable snapshots are `None`.
    pub fn load(&self, run_id: &str) -> Option<SessionSnapshot> {
        if !is_valid_run_id(run_id) {
            return None;
        }

        let path = self.snapshot_path(run_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!(run_id, error = %e, "no session snapshot");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(run_id, path = %path.display(), error = %e, "ignoring malformed session snapshot");
                None
            }
        }
    }

    /// Ids of every run with a readable snapshot, newest first.
    pub fn list(&self) -> Vec<String> {
        self.summaries().into_iter().map(|s| s.run_id).collect()
    }

    /// Summaries of every readable snapshot, newest first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut summaries: Vec<SessionSummary> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| {
                let run_id = entry.file_name().to_string_lossy().into_owned();
                self.summarize(&run_id)
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.sort_key()
                .cmp(&a.sort_key())
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        summaries
    }

    /// The run with the greatest `createdAt`.
    pub fn find_latest(&self) -> Option<String> {
        self.summaries().into_iter().next().map(|s| s.run_id)
    }

    fn summarize(&self, run_id: &str) -> Option<SessionSummary> {
        let path = self.snapshot_path(run_id);
        let contents = fs::read_to_string(&path).ok()?;

        let snapshot = match serde_json::from_str::<SessionSnapshot>(&contents) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(run_id, error = %e, "skipping malformed session snapshot");
                return None;
            }
        };

        Some(SessionSummary {
            run_id: run_id.to_string(),
            created_at: snapshot.created_at,
            modified: fs::metadata(&path).and_then(|m| m.modified()).ok(),
            model: snapshot.model,
            message_count: snapshot.conversation.len(),
        })
    }
}

/// Resolves an explicit resume request.
///
/// # Errors
/// Returns `SessionError::NoSessions` when the latest run is requested and
/// none exist, or `SessionError::NotFound` when the run cannot be loaded.
pub fn resolve_resume(
    store: &SessionStore,
    target: &ResumeTarget,
) -> Result<SessionSnapshot, SessionError> {
    let run_id = match target {
        ResumeTarget::Id(id) => id.clone(),
        ResumeTarget::Latest => store.find_latest().ok_or(SessionError::NoSessions)?,
    };

    store
        .load(&run_id)
        .ok_or(SessionError::NotFound(run_id))
}

/// Formats epoch milliseconds as `YYYY-MM-DD HH:MM` (UTC).
pub fn format_timestamp(millis: i64) -> Option<String> {
    let datetime: DateTime<Utc> = DateTime::from_timestamp_millis(millis)?;
    Some(datetime.format("%Y-%m-%d %H:%M").to_string())
}

fn system_time_millis(time: SystemTime) -> i64 {
    let datetime: DateTime<Utc> = time.into();
    datetime.timestamp_millis()
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|ms| ms.is_finite())
        .map(|ms| ms as i64))
}

fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id != "."
        && run_id != ".."
        && !run_id.contains(['/', '\\'])
}
