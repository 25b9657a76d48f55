//! Tool dispatcher: runs one turn's tool invocations.
//!
//! Results always come back positionally aligned with the invocations.
//! With parallel mode on and more than one invocation, every invocation is
//! spawned on a `JoinSet` and the batch waits for all of them to settle
//! before returning. Otherwise invocations run one after another.
//! A failing or panicking invocation becomes an error-tagged record and
//! never affects its siblings.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::core::events::{ToolEvent, ToolObserver};
use crate::providers::ChatContentBlock;
use crate::tools::{ToolError, ToolErrorKind};

pub type ExecFuture<'a> = BoxFuture<'a, anyhow::Result<String>>;

/// Capability that executes a named tool with structured input.
///
/// Failures are returned as errors; a `ToolError` in the chain is
/// recovered for telemetry.
pub trait ToolExecutor: Send + Sync {
    fn execute<'a>(&'a self, name: &'a str, input: &'a Value) -> ExecFuture<'a>;
}

/// One requested tool call, taken from a tool-use block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolInvocation {
    /// Collects the tool-use blocks of an assistant reply, in order.
    pub fn from_blocks(blocks: &[ChatContentBlock]) -> Vec<Self> {
        blocks
            .iter()
            .filter_map(|block| match block {
                ChatContentBlock::ToolUse { id, name, input } => Some(Self {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                ChatContentBlock::Text { .. } | ChatContentBlock::ToolResult { .. } => None,
            })
            .collect()
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub result: String,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolCallRecord {
    fn success(invocation: &ToolInvocation, result: String) -> Self {
        Self {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            input: invocation.input.clone(),
            result,
            error: false,
            error_kind: None,
        }
    }

    fn failure(
        invocation: &ToolInvocation,
        message: impl Into<String>,
        kind: Option<ToolErrorKind>,
    ) -> Self {
        Self {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            input: invocation.input.clone(),
            result: message.into(),
            error: true,
            error_kind: kind,
        }
    }

    /// The tool-result block answering this call.
    pub fn to_result_block(&self) -> ChatContentBlock {
        ChatContentBlock::tool_result(&self.id, &self.result, self.error)
    }

    fn finished_event(&self) -> ToolEvent {
        ToolEvent::Finished {
            id: self.id.clone(),
            name: self.name.clone(),
            input: self.input.clone(),
            result: self.result.clone(),
            error: self.error,
        }
    }
}

/// Executes tool batches under a parallel or sequential policy.
#[derive(Debug, Clone, Copy)]
pub struct ToolDispatcher {
    parallel: bool,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl ToolDispatcher {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Runs `invocations` and returns one record per invocation, in order.
    pub async fn dispatch(
        &self,
        executor: &Arc<dyn ToolExecutor>,
        observer: &Arc<dyn ToolObserver>,
        invocations: &[ToolInvocation],
    ) -> Vec<ToolCallRecord> {
        if self.parallel && invocations.len() > 1 {
            dispatch_parallel(executor, observer, invocations).await
        } else {
            dispatch_sequential(executor, observer, invocations).await
        }
    }
}

async fn dispatch_sequential(
    executor: &Arc<dyn ToolExecutor>,
    observer: &Arc<dyn ToolObserver>,
    invocations: &[ToolInvocation],
) -> Vec<ToolCallRecord> {
    let mut records = Vec::with_capacity(invocations.len());

    for invocation in invocations {
        notify_started(observer.as_ref(), invocation);
        let outcome = run_guarded(executor.as_ref(), invocation).await;
        let record = into_record(invocation, outcome);
        notify_finished(observer.as_ref(), &record);
        records.push(record);
    }

    records
}

async fn dispatch_parallel(
    executor: &Arc<dyn ToolExecutor>,
    observer: &Arc<dyn ToolObserver>,
    invocations: &[ToolInvocation],
) -> Vec<ToolCallRecord> {
    let mut join_set = JoinSet::new();
    let mut slots: Vec<Option<ToolCallRecord>> = vec![None; invocations.len()];

    // Started events go out in request order before anything runs.
    for (idx, invocation) in invocations.iter().enumerate() {
        notify_started(observer.as_ref(), invocation);

        let executor = Arc::clone(executor);
        let invocation = invocation.clone();
        join_set.spawn(async move {
            let outcome = run_guarded(executor.as_ref(), &invocation).await;
            (idx, into_record(&invocation, outcome))
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, record)) => {
                notify_finished(observer.as_ref(), &record);
                slots[idx] = Some(record);
            }
            Err(e) => tracing::error!(error = %e, "tool task failed to join"),
        }
    }

    slots
        .into_iter()
        .zip(invocations)
        .map(|(slot, invocation)| {
            slot.unwrap_or_else(|| {
                let record = ToolCallRecord::failure(
                    invocation,
                    "Error: tool task was cancelled",
                    Some(ToolErrorKind::Panic),
                );
                notify_finished(observer.as_ref(), &record);
                record
            })
        })
        .collect()
}

type GuardedOutcome = Result<anyhow::Result<String>, String>;

/// Runs one invocation, converting a panic into a message.
///
/// `execute` itself is called inside the guard, so a panic raised before
/// the future is returned is caught as well.
async fn run_guarded(executor: &dyn ToolExecutor, invocation: &ToolInvocation) -> GuardedOutcome {
    AssertUnwindSafe(async move { executor.execute(&invocation.name, &invocation.input).await })
        .catch_unwind()
        .await
        .map_err(|payload| {
            payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string())
        })
}

fn into_record(invocation: &ToolInvocation, outcome: GuardedOutcome) -> ToolCallRecord {
    match outcome {
        Ok(Ok(result)) => ToolCallRecord::success(invocation, result),
        Ok(Err(e)) => {
            let kind = e.downcast_ref::<ToolError>().map(|t| t.kind);
            ToolCallRecord::failure(invocation, format!("Error: {e:#}"), kind)
        }
        Err(panic) => {
            tracing::error!(id = %invocation.id, name = %invocation.name, %panic, "tool panicked");
            ToolCallRecord::failure(
                invocation,
                format!("Error: tool panicked: {panic}"),
                Some(ToolErrorKind::Panic),
            )
        }
    }
}

fn notify_started(observer: &dyn ToolObserver, invocation: &ToolInvocation) {
    tracing::debug!(id = %invocation.id, name = %invocation.name, "tool started");
    observer.on_event(&ToolEvent::Started {
        id: invocation.id.clone(),
        name: invocation.name.clone(),
        input: invocation.input.clone(),
    });
}

fn notify_finished(observer: &dyn ToolObserver, record: &ToolCallRecord) {
    tracing::debug!(id = %record.id, name = %record.name, error = record.error, "tool finished");
    observer.on_event(&record.finished_event());
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::core::events::NoopObserver;

    /// Sleeps for `input.ms`, then echoes `input.value`.
    /// `fail` returns a tool error and `panic` panics.
    #[derive(Default)]
    struct Echo {
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl ToolExecutor for Echo {
        fn execute<'a>(&'a self, name: &'a str, input: &'a Value) -> ExecFuture<'a> {
            Box::pin(async move {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_running.fetch_max(now, Ordering::SeqCst);
                let ms = input["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);

                match name {
                    "fail" => Err(ToolError::new(ToolErrorKind::ReadError, "disk gone").into()),
                    "panic" => panic!("tool blew up"),
                    _ => Ok(input["value"].as_str().unwrap_or_default().to_string()),
                }
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ToolEvent>>);

    impl ToolObserver for Recorder {
        fn on_event(&self, event: &ToolEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn invocation(id: &str, name: &str, ms: u64) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            input: json!({"ms": ms, "value": id}),
        }
    }

    #[tokio::test]
    async fn test_parallel_results_keep_input_order() {
        let echo = Arc::new(Echo::default());
        let executor: Arc<dyn ToolExecutor> = echo.clone();
        let observer: Arc<dyn ToolObserver> = Arc::new(Recorder::default());
        let invocations = vec![
            invocation("a", "echo", 60),
            invocation("b", "echo", 5),
            invocation("c", "echo", 30),
        ];

        let records = ToolDispatcher::new(true)
            .dispatch(&executor, &observer, &invocations)
            .await;

        let results: Vec<&str> = records.iter().map(|r| r.result.as_str()).collect();
        assert_eq!(results, vec!["a", "b", "c"]);
        assert!(echo.max_running.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_single_invocation_runs_sequentially() {
        let echo = Arc::new(Echo::default());
        let executor: Arc<dyn ToolExecutor> = echo.clone();
        let observer: Arc<dyn ToolObserver> = Arc::new(NoopObserver);

        let records = ToolDispatcher::new(true)
            .dispatch(&executor, &observer, &[invocation("only", "echo", 1)])
            .await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, "only");
        assert_eq!(echo.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_mode_never_overlaps() {
        let echo = Arc::new(Echo::default());
        let executor: Arc<dyn ToolExecutor> = echo.clone();
        let observer: Arc<dyn ToolObserver> = Arc::new(NoopObserver);
        let invocations = vec![invocation("a", "echo", 10), invocation("b", "echo", 10)];

        let records = ToolDispatcher::new(false)
            .dispatch(&executor, &observer, &invocations)
            .await;

        assert_eq!(records.len(), 2);
        assert_eq!(echo.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_isolated() {
        let executor: Arc<dyn ToolExecutor> = Arc::new(Echo::default());
        let recorder = Arc::new(Recorder::default());
        let observer: Arc<dyn ToolObserver> = recorder.clone();
        let invocations = vec![
            invocation("a", "fail", 5),
            invocation("b", "panic", 1),
            invocation("c", "echo", 10),
        ];

        let records = ToolDispatcher::new(true)
            .dispatch(&executor, &observer, &invocations)
            .await;

        assert!(records[0].error);
        assert_eq!(records[0].error_kind, Some(ToolErrorKind::ReadError));
        assert!(records[0].result.starts_with("Error: read_error: disk gone"));

        assert!(records[1].error);
        assert_eq!(records[1].error_kind, Some(ToolErrorKind::Panic));
        assert!(records[1].result.contains("tool blew up"));

        assert!(!records[2].error);
        assert_eq!(records[2].result, "c");

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 6);
        let started: Vec<&str> = events
            .iter()
            .filter(|e| matches!(e, ToolEvent::Started { .. }))
            .map(ToolEvent::id)
            .collect();
        assert_eq!(started, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_sequential_failure_does_not_stop_batch() {
        let executor: Arc<dyn ToolExecutor> = Arc::new(Echo::default());
        let observer: Arc<dyn ToolObserver> = Arc::new(NoopObserver);
        let invocations = vec![invocation("a", "panic", 0), invocation("b", "echo", 0)];

        let records = ToolDispatcher::new(false)
            .dispatch(&executor, &observer, &invocations)
            .await;

        assert!(records[0].error);
        assert_eq!(records[1].result, "b");
    }

    /// Panics while building the future, before anything is polled.
    struct PanicsOnCall;

    impl ToolExecutor for PanicsOnCall {
        fn execute<'a>(&'a self, name: &'a str, _input: &'a Value) -> ExecFuture<'a> {
            panic!("no future for {name}")
        }
    }

    #[tokio::test]
    async fn test_synchronous_panic_is_isolated_on_sequential_path() {
        let executor: Arc<dyn ToolExecutor> = Arc::new(PanicsOnCall);
        let recorder = Arc::new(Recorder::default());
        let observer: Arc<dyn ToolObserver> = recorder.clone();

        let records = ToolDispatcher::new(true)
            .dispatch(&executor, &observer, &[invocation("only", "boom", 0)])
            .await;

        assert_eq!(records.len(), 1);
        assert!(records[0].error);
        assert_eq!(records[0].error_kind, Some(ToolErrorKind::Panic));
        assert_eq!(records[0].result, "Error: tool panicked: no future for boom");
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_synchronous_panic_is_isolated_on_parallel_path() {
        let executor: Arc<dyn ToolExecutor> = Arc::new(PanicsOnCall);
        let observer: Arc<dyn ToolObserver> = Arc::new(NoopObserver);
        let invocations = vec![invocation("a", "first", 0), invocation("b", "second", 0)];

        let records = ToolDispatcher::new(true)
            .dispatch(&executor, &observer, &invocations)
            .await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].result, "Error: tool panicked: no future for first");
        assert_eq!(records[1].result, "Error: tool panicked: no future for second");
        assert!(records.iter().all(|r| r.error_kind == Some(ToolErrorKind::Panic)));
    }

    #[test]
    fn test_invocations_from_blocks_skip_text() {
        let blocks = vec![
            ChatContentBlock::text("thinking out loud"),
            ChatContentBlock::tool_use("t1", "list_files", json!({})),
            ChatContentBlock::tool_use("t2", "read_file", json!({"path": "a"})),
        ];

        let ids: Vec<String> = ToolInvocation::from_blocks(&blocks)
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_record_to_result_block() {
        let record = ToolCallRecord::failure(&invocation("t1", "x", 0), "Error: boom", None);
        assert_eq!(
            record.to_result_block(),
            ChatContentBlock::tool_result("t1", "Error: boom", true)
        );
    }
}
