//! End-to-end tests against the built `playlet-worker` binary.
//!
//! Each test spawns the real process and speaks the line protocol over its
//! stdin/stdout, the same way the host does.

#![cfg(feature = "engine")]

use std::io::Write;
use std::process::{Command, Stdio};

use playlet_worker::{WorkerRequest, WorkerResponse};

fn exchange(line: &str) -> WorkerResponse {
    let mut child = Command::new(env!("CARGO_BIN_EXE_playlet-worker"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("worker should start");

    let mut stdin = child.stdin.take().unwrap();
    writeln!(stdin, "{}", line).unwrap();
    drop(stdin);

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "worker exited with {}", output.status);

    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines = stdout.lines();
    let response = serde_json::from_str(lines.next().expect("one response line")).unwrap();
    assert!(lines.next().is_none(), "worker wrote more than one line");
    response
}

fn run(code: &str, timeout_ms: u64) -> WorkerResponse {
    let request = WorkerRequest::Run {
        payload: code.to_string(),
        timeout_ms: Some(timeout_ms),
        memory_limit_mb: Some(64),
    };
    exchange(&serde_json::to_string(&request).unwrap())
}

#[test]
fn test_logs_and_result_cross_the_process_boundary() {
    let response = run("console.log('a'); console.log('b'); 42", 2_000);
    assert_eq!(
        response,
        WorkerResponse {
            result: Some("42".to_string()),
            logs: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        }
    );
}

#[test]
fn test_thrown_error_is_reported() {
    let response = run("throw new Error('boom')", 2_000);
    assert_eq!(response.error.as_deref(), Some("boom"));
    assert!(response.result.is_none());
}

#[test]
fn test_deadline_is_enforced_in_process() {
    let response = run("console.log('started'); for (;;) {}", 100);
    assert!(response.timed_out);
    assert_eq!(response.logs, vec!["started"]);
}

#[test]
fn test_garbled_request_gets_error_response() {
    let response = exchange("not json");
    assert!(response.error.unwrap().starts_with("Invalid request"));
}
