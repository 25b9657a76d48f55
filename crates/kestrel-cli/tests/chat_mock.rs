//! Interactive chat over piped stdin.


use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use fixtures::{TEST_API_KEY, request_json, temp_home, text_response};
use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

#[tokio::test]
async fn test_chat_answers_each_line_until_quit() {
    let home = temp_home();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(text_response("Noted."))
        .expect(2)
        .mount(&server)
        .await;

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .env("KESTREL_BLOCK_REAL_API", "1")
        .env("ANTHROPIC_API_KEY", TEST_API_KEY)
        .env("ANTHROPIC_BASE_URL", server.uri())
        .write_stdin("first\n\nsecond\n:q\nnever sent\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Noted."));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    let second = request_json(&received[1]);
    assert_eq!(second["messages"].as_array().unwrap().len(), 3);

    let sessions: Vec<_> = fs::read_dir(home.path().join("sessions"))
        .unwrap()
        .collect();
    assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn test_chat_clear_resets_history() {
    let home = temp_home();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(text_response("Sure."))
        .mount(&server)
        .await;

    cargo_bin_cmd!("kestrel")
        .env("KESTREL_HOME", home.path())
        .env("KESTREL_BLOCK_REAL_API", "1")
        .env("ANTHROPIC_API_KEY", TEST_API_KEY)
        .env("ANTHROPIC_BASE_URL", server.uri())
        .args(["--no-save", "chat"])
        .write_stdin("one\n:clear\ntwo\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("Conversation cleared."));

    let received = server.received_requests().await.unwrap();
    let second = request_json(&received[1]);
    assert_eq!(second["messages"].as_array().unwrap().len(), 1);
}
