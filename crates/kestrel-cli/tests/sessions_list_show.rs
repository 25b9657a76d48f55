//! Session listing, transcript display and resume.


use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_cmd::cargo::cargo_bin_cmd;
use fixtures::{TEST_API_KEY, request_json, temp_home, text_body, text_response, tool_use_body};
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn write_session(home: &Path, run_id: &str, created_at: i64, model: &str) {
    write_session_in(home, run_id, created_at, model, Path::new("/work"));
}

fn write_session_in(home: &Path, run_id: &str, created_at: i64, model: &str, working_dir: &Path) {
    let dir = home.join("sessions").join(run_id);
    fs::create_dir_all(&dir).unwrap();
    let snapshot = json!({
        "runId": run_id,
        "createdAt": created_at,
        "workingDir": working_dir,
        "model": model,
        "conversation": [
            {"role": "user", "content": format!("question for {run_id}")},
            {"role": "assistant", "content": format!("answer from {run_id}")}
        ]
    });
    fs::write(dir.join("session.json"), snapshot.to_string()).unwrap();
}

#[test]
fn test_sessions_list_empty() {
    let home = temp_home();

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .args(["sessions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions found."));
}

#[test]
fn test_sessions_list_newest_first() {
    let home = temp_home();
    write_session(home.path(), "run-old", 1_700_000_000_000, "claude-a");
    write_session(home.path(), "run-new", 1_700_000_600_000, "claude-b");

    let output = cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .args(["sessions", "list"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("run-new"), "{stdout}");
    assert!(lines[0].contains("claude-b"));
    assert!(lines[0].contains("2 messages"));
    assert!(lines[0].contains("2023-11-14 22:"), "{stdout}");
    assert!(lines[1].starts_with("run-old"), "{stdout}");
}

#[test]
fn test_sessions_list_skips_malformed_snapshot() {
    let home = temp_home();
    write_session(home.path(), "run-good", 1_700_000_000_000, "claude-a");
    let bad = home.path().join("sessions").join("run-bad");
    fs::create_dir_all(&bad).unwrap();
    fs::write(bad.join("session.json"), "{not json").unwrap();

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .args(["sessions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run-good"))
        .stdout(predicate::str::contains("run-bad").not());
}

#[test]
fn test_sessions_show_prints_transcript() {
    let home = temp_home();
    write_session(home.path(), "run-1", 1_700_000_000_000, "claude-a");

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .args(["sessions", "show", "run-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Session run-1"))
        .stdout(predicate::str::contains("[user] question for run-1"))
        .stdout(predicate::str::contains("[assistant] answer from run-1"));
}

#[test]
fn test_sessions_show_missing_fails() {
    let home = temp_home();

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .args(["sessions", "show", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Session not found: nope"));
}

#[test]
fn test_resume_missing_id_is_fatal() {
    let home = temp_home();

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .env("KESTREL_BLOCK_REAL_API", "1")
        .env("ANTHROPIC_API_KEY", TEST_API_KEY)
        .env("ANTHROPIC_BASE_URL", "http://127.0.0.1:9")
        .args(["--resume", "does-not-exist", "exec", "-p", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Session not found: does-not-exist"));
}

#[test]
fn test_resume_latest_without_sessions_is_fatal() {
    let home = temp_home();

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .env("KESTREL_BLOCK_REAL_API", "1")
        .env("ANTHROPIC_API_KEY", TEST_API_KEY)
        .env("ANTHROPIC_BASE_URL", "http://127.0.0.1:9")
        .args(["exec", "-p", "hi", "--resume"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No saved sessions to resume"));
}

#[tokio::test]
async fn test_resume_latest_sends_history_and_keeps_run_id() {
    let home = temp_home();
    write_session(home.path(), "run-old", 1_700_000_000_000, "claude-a");
    write_session(home.path(), "run-new", 1_700_000_600_000, "claude-b");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(text_response("Continuing."))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .env("KESTREL_BLOCK_REAL_API", "1")
        .env("ANTHROPIC_API_KEY", TEST_API_KEY)
        .env("ANTHROPIC_BASE_URL", server.uri())
        .args(["exec", "-p", "and then?", "--resume"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Continuing."));

    let received = server.received_requests().await.unwrap();
    let body = request_json(&received[0]);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].to_string().contains("question for run-new"));

    let saved: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(home.path().join("sessions/run-new/session.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved["runId"], "run-new");
    assert_eq!(saved["createdAt"], 1_700_000_600_000_i64);
    assert_eq!(saved["conversation"].as_array().unwrap().len(), 4);
    assert_eq!(fs::read_dir(home.path().join("sessions")).unwrap().count(), 2);
}

/// Replies with one list_files call, then with text.
async fn list_files_then_text(server: &MockServer) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(move |_req: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200).set_body_json(tool_use_body(
                    "toolu_001",
                    "list_files",
                    json!({"path": "."}),
                ))
            } else {
                ResponseTemplate::new(200).set_body_json(text_body("Listed."))
            }
        })
        .expect(2)
        .mount(server)
        .await;
}

/// The tool_result text carried by the second request of a resumed run.
async fn resumed_tool_result(server: &MockServer) -> String {
    let received = server.received_requests().await.unwrap();
    let second = request_json(&received[1]);
    let messages = second["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 5);
    let result = &messages[4]["content"][0];
    assert_eq!(result["type"], "tool_result");
    result["content"].to_string()
}

#[tokio::test]
async fn test_resume_runs_tools_in_recorded_directory() {
    let home = temp_home();
    let workdir = TempDir::new().unwrap();
    fs::write(workdir.path().join("recorded.txt"), "hi").unwrap();
    write_session_in(home.path(), "run-dir", 1_700_000_000_000, "claude-a", workdir.path());

    let server = MockServer::start().await;
    list_files_then_text(&server).await;

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .env("KESTREL_BLOCK_REAL_API", "1")
        .env("ANTHROPIC_API_KEY", TEST_API_KEY)
        .env("ANTHROPIC_BASE_URL", server.uri())
        .args(["exec", "-p", "what is here?", "--resume", "run-dir"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Listed."))
        .stderr(predicate::str::contains("Warning:").not());

    assert!(resumed_tool_result(&server).await.contains("recorded.txt"));
}

#[tokio::test]
async fn test_resume_with_other_root_warns_and_records_it() {
    let home = temp_home();
    let recorded = TempDir::new().unwrap();
    let other = TempDir::new().unwrap();
    fs::write(recorded.path().join("recorded.txt"), "hi").unwrap();
    fs::write(other.path().join("other.txt"), "hi").unwrap();
    write_session_in(home.path(), "run-dir", 1_700_000_000_000, "claude-a", recorded.path());

    let server = MockServer::start().await;
    list_files_then_text(&server).await;

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .env("KESTREL_BLOCK_REAL_API", "1")
        .env("ANTHROPIC_API_KEY", TEST_API_KEY)
        .env("ANTHROPIC_BASE_URL", server.uri())
        .args([
            "--root",
            other.path().to_str().unwrap(),
            "exec",
            "-p",
            "what is here?",
            "--resume",
            "run-dir",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Warning: session run-dir was recorded in"));

    let listing = resumed_tool_result(&server).await;
    assert!(listing.contains("other.txt"), "{listing}");
    assert!(!listing.contains("recorded.txt"), "{listing}");

    let saved: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(home.path().join("sessions/run-dir/session.json")).unwrap(),
    )
    .unwrap();
    let saved_dir = Path::new(saved["workingDir"].as_str().unwrap()).to_path_buf();
    assert_eq!(saved_dir, fs::canonicalize(other.path()).unwrap());
}
