use std::path::{Path, PathBuf};

use async_trait::async_trait;
use playlet_worker::{WorkerRequest, WorkerResponse};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tracing::{debug, warn};

use super::sandboxed_command;
use crate::error::{PlayletError, Result};
use crate::sandbox::traits::ExecutionStrategy;
use crate::sandbox::{
    ExecutionLimits, ExecutionRequest, ExecutionResult, GuestLanguage, LanguageKind,
};

/// Worker executable name
const WORKER_BINARY: &str = "playlet-worker";

/// Background execution context for scripting languages.
///
/// Every execution spawns a fresh `playlet-worker` process that owns an
/// embedded interpreter. The process is discarded afterwards; no state
/// survives between runs.
pub struct BackgroundContext {
    worker_binary: Option<PathBuf>,
    limits: ExecutionLimits,
}

impl BackgroundContext {
    /// Create a context. Without an explicit binary the worker is looked up
    /// next to the current executable, then on PATH.
    pub fn new(worker_binary: Option<PathBuf>, limits: ExecutionLimits) -> Self {
        Self {
            worker_binary,
            limits,
        }
    }

    fn locate(&self) -> Result<PathBuf> {
        locate_worker(self.worker_binary.as_deref())
    }
}

fn locate_worker(configured: Option<&Path>) -> Result<PathBuf> {
    let file_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);

    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(PlayletError::SandboxCreation(format!(
            "worker binary not found at {}",
            path.display()
        )));
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let candidate = dir.join(&file_name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    which::which(&file_name).map_err(|e| {
        PlayletError::SandboxCreation(format!("{} not found: {}", WORKER_BINARY, e))
    })
}

#[async_trait]
impl ExecutionStrategy for BackgroundContext {
    fn name(&self) -> &str {
        "worker"
    }

    fn supports(&self, language: &GuestLanguage) -> bool {
        language.kind() == LanguageKind::Scripting
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let binary = self.locate()?;
        let workdir = tempfile::tempdir().map_err(|e| {
            PlayletError::SandboxCreation(format!("Failed to create worker directory: {}", e))
        })?;

        let mut child = sandboxed_command(&binary, workdir.path())
            .spawn()
            .map_err(|e| PlayletError::SandboxCreation(format!("Failed to spawn worker: {}", e)))?;

        debug!(pid = ?child.id(), binary = %binary.display(), "Worker started");

        let millis = self.limits.timeout_millis();
        let message = WorkerRequest::Run {
            payload: request.code.clone(),
            timeout_ms: Some(millis),
            memory_limit_mb: Some(self.limits.memory_limit_mb),
        };

        // The worker enforces the deadline itself; the grace period covers
        // a worker that is stuck outside the interpreter.
        let deadline = self.limits.timeout + self.limits.grace;
        let outcome = tokio::time::timeout(deadline, exchange(&mut child, &message)).await;
        let _ = child.start_kill();

        let response = match outcome {
            Ok(response) => response?,
            Err(_) => {
                warn!(timeout_ms = millis, "Worker missed its deadline, killed");
                return Err(PlayletError::Timeout {
                    millis,
                    logs: Vec::new(),
                });
            }
        };

        if response.timed_out {
            return Err(PlayletError::Timeout {
                millis,
                logs: response.logs,
            });
        }

        Ok(response.into())
    }
}

/// Post one request line and read one response line.
async fn exchange(child: &mut Child, request: &WorkerRequest) -> Result<WorkerResponse> {
    let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(PlayletError::SandboxCreation(
            "worker stdio is not available".to_string(),
        ));
    };

    let mut line = serde_json::to_string(request)?;
    line.push('\n');

    // A worker that died on startup shows up as a missing response below.
    if let Err(e) = stdin.write_all(line.as_bytes()).await {
        debug!(error = %e, "Failed to send request to worker");
    }
    drop(stdin);

    let mut reader = BufReader::new(stdout);
    let mut reply = String::new();
    let mut diagnostics = String::new();
    let (read, _) = tokio::join!(
        reader.read_line(&mut reply),
        stderr.read_to_string(&mut diagnostics)
    );
    read?;

    if reply.trim().is_empty() {
        let status = child.wait().await?;
        return Err(PlayletError::SandboxCreation(format!(
            "worker exited ({}) without a response: {}",
            status,
            diagnostics.trim()
        )));
    }

    serde_json::from_str(reply.trim()).map_err(|e| {
        PlayletError::SandboxCreation(format!("malformed worker response: {}", e))
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sandbox::strategies::test_support::script;

    fn limits(timeout: Duration) -> ExecutionLimits {
        ExecutionLimits {
            timeout,
            grace: Duration::from_millis(100),
            ..ExecutionLimits::default()
        }
    }

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest::new(code, GuestLanguage::JavaScript)
    }

    #[tokio::test]
    async fn test_worker_response_becomes_result() {
        let dir = tempfile::tempdir().unwrap();
        let worker = script(
            dir.path(),
            "worker",
            r#"read line
echo '{"result":"42","logs":["a","b"]}'"#,
        );
        let context = BackgroundContext::new(Some(worker), ExecutionLimits::default());

        let result = context.execute(&request("42")).await.unwrap();
        assert_eq!(result.result.as_deref(), Some("42"));
        assert_eq!(result.logs, vec!["a", "b"]);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_request_is_sent_as_one_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let worker = script(
            dir.path(),
            "worker",
            r#"read line
printf '{"result":"%s"}\n' "$(printf '%s' "$line" | wc -c | tr -d ' ')""#,
        );
        let context = BackgroundContext::new(Some(worker), ExecutionLimits::default());

        let result = context.execute(&request("1 + 1")).await.unwrap();
        let expected = serde_json::to_string(&WorkerRequest::Run {
            payload: "1 + 1".to_string(),
            timeout_ms: Some(10_000),
            memory_limit_mb: Some(64),
        })
        .unwrap();
        assert_eq!(result.result, Some(expected.len().to_string()));
    }

    #[tokio::test]
    async fn test_worker_reported_timeout_keeps_logs() {
        let dir = tempfile::tempdir().unwrap();
        let worker = script(
            dir.path(),
            "worker",
            r#"read line
echo '{"error":"Execution timed out after 50 ms","logs":["tick"],"timed_out":true}'"#,
        );
        let context = BackgroundContext::new(Some(worker), limits(Duration::from_millis(50)));

        let err = context.execute(&request("while(true){}")).await.unwrap_err();
        match err {
            PlayletError::Timeout { millis, logs } => {
                assert_eq!(millis, 50);
                assert_eq!(logs, vec!["tick"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_hung_worker_is_killed_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let worker = script(dir.path(), "worker", "read line\nexec sleep 30");
        let context = BackgroundContext::new(Some(worker), limits(Duration::from_millis(200)));

        let started = std::time::Instant::now();
        let err = context.execute(&request("1")).await.unwrap_err();
        assert!(matches!(err, PlayletError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_silent_exit_is_sandbox_failure() {
        let dir = tempfile::tempdir().unwrap();
        let worker = script(dir.path(), "worker", "echo 'no engine' >&2\nexit 3");
        let context = BackgroundContext::new(Some(worker), ExecutionLimits::default());

        let err = context.execute(&request("1")).await.unwrap_err();
        match err {
            PlayletError::SandboxCreation(message) => assert!(message.contains("no engine")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_garbled_response_is_sandbox_failure() {
        let dir = tempfile::tempdir().unwrap();
        let worker = script(dir.path(), "worker", "read line\necho 'not json'");
        let context = BackgroundContext::new(Some(worker), ExecutionLimits::default());

        let err = context.execute(&request("1")).await.unwrap_err();
        assert!(matches!(err, PlayletError::SandboxCreation(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_sandbox_failure() {
        let dir = tempfile::tempdir().unwrap();
        let context = BackgroundContext::new(
            Some(dir.path().join("absent-worker")),
            ExecutionLimits::default(),
        );

        let err = context.execute(&request("1")).await.unwrap_err();
        assert!(matches!(err, PlayletError::SandboxCreation(_)));
        assert!(err.is_infrastructure());
    }

    /// The workspace's own worker build, when it has been built alongside
    /// the tests (`target/<profile>/playlet-worker`).
    fn built_worker() -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        let profile_dir = exe.parent()?.parent()?;
        let file_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);
        let candidate = profile_dir.join(file_name);
        candidate.is_file().then_some(candidate)
    }

    #[tokio::test]
    async fn test_real_worker_round_trip() {
        let Some(worker) = built_worker() else {
            println!("playlet-worker is not built, skipping");
            return;
        };
        let context = BackgroundContext::new(Some(worker), ExecutionLimits::default());

        let result = context
            .execute(&request("console.log('a'); console.log('b'); 42"))
            .await
            .unwrap();
        assert_eq!(result.result.as_deref(), Some("42"));
        assert_eq!(result.logs, vec!["a", "b"]);
        assert!(result.error.is_none());

        let failed = context.execute(&request("throw new Error('boom')")).await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_worker_sees_no_host_environment() {
        std::env::set_var("PLAYLET_HOST_SECRET", "hunter2");
        let dir = tempfile::tempdir().unwrap();
        let worker = script(
            dir.path(),
            "worker",
            r#"read line
printf '{"result":"%s"}\n' "${PLAYLET_HOST_SECRET:-unset}""#,
        );
        let context = BackgroundContext::new(Some(worker), ExecutionLimits::default());

        let result = context.execute(&request("1")).await.unwrap();
        assert_eq!(result.result.as_deref(), Some("unset"));
    }
}
