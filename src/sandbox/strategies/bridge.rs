use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::sandboxed_command;
use crate::config::types::{PlayletConfig, RuntimeConfig, RuntimeSource};
use crate::error::{PlayletError, Result};
use crate::sandbox::traits::ExecutionStrategy;
use crate::sandbox::{ExecutionLimits, ExecutionRequest, ExecutionResult, GuestLanguage};

/// Observable load state of one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Ready,
    LoadFailed(String),
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "not loaded"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::LoadFailed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A loaded external interpreter.
#[derive(Debug)]
pub struct Interpreter {
    language: String,
    program: PathBuf,
    args: Vec<String>,
    version: String,
}

impl Interpreter {
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Run source text. The source is piped to stdin and every stdout line
    /// becomes a log entry.
    pub async fn run(&self, code: &str, limits: &ExecutionLimits) -> Result<ExecutionResult> {
        let workdir = tempfile::tempdir().map_err(|e| {
            PlayletError::SandboxCreation(format!("Failed to create runtime directory: {}", e))
        })?;

        let mut child = sandboxed_command(&self.program, workdir.path())
            .args(&self.args)
            .spawn()
            .map_err(|e| {
                PlayletError::SandboxCreation(format!(
                    "Failed to start {} interpreter: {}",
                    self.language, e
                ))
            })?;

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(PlayletError::SandboxCreation(
                "interpreter stdio is not available".to_string(),
            ));
        };

        let source = code.to_string();
        let writer = tokio::spawn(async move {
            if let Err(e) = stdin.write_all(source.as_bytes()).await {
                debug!(error = %e, "Interpreter closed stdin early");
            }
        });
        let reader = tokio::spawn(async move {
            let mut diagnostics = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut diagnostics).await {
                debug!(error = %e, "Interpreter stderr ended early");
            }
            String::from_utf8_lossy(&diagnostics).into_owned()
        });

        // Guest output need not be UTF-8; invalid bytes are replaced.
        let mut logs = Vec::new();
        let collected = tokio::time::timeout(limits.timeout, async {
            let mut stdout = BufReader::new(stdout);
            let mut line = Vec::new();
            while stdout.read_until(b'\n', &mut line).await? > 0 {
                logs.push(decode_line(&line));
                line.clear();
            }
            child.wait().await
        })
        .await;

        let status = match collected {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.start_kill();
                writer.abort();
                reader.abort();
                warn!(
                    language = %self.language,
                    lines = logs.len(),
                    "Interpreter timed out, killed"
                );
                return Err(PlayletError::Timeout {
                    millis: limits.timeout_millis(),
                    logs,
                });
            }
        };

        let diagnostics = reader.await.unwrap_or_default();
        let diagnostics = diagnostics.trim_end();

        if status.success() {
            logs.extend(diagnostics.lines().map(str::to_string));
            return Ok(ExecutionResult {
                result: None,
                error: None,
                logs,
            });
        }

        let error = if diagnostics.is_empty() {
            format!("{} exited with {}", self.language, status)
        } else {
            diagnostics.to_string()
        };
        Ok(ExecutionResult {
            result: None,
            error: Some(error),
            logs,
        })
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

enum SlotState {
    NotLoaded,
    Ready(Arc<Interpreter>),
    LoadFailed(String),
}

struct RuntimeSlot {
    config: RuntimeConfig,
    state: Mutex<SlotState>,
}

static GLOBAL: OnceLock<Arc<RuntimeBridge>> = OnceLock::new();

/// Guest runtime bridge.
///
/// Holds one lazily loaded interpreter per configured language. A load runs
/// while holding the slot's lock, so callers arriving during a load wait for
/// it instead of starting another. A failed load stays failed until
/// [`RuntimeBridge::retry`].
pub struct RuntimeBridge {
    slots: BTreeMap<String, RuntimeSlot>,
    limits: ExecutionLimits,
    loads: AtomicUsize,
}

impl RuntimeBridge {
    /// Create a bridge over the enabled runtimes.
    pub fn new(runtimes: &BTreeMap<String, RuntimeConfig>, limits: ExecutionLimits) -> Self {
        let slots = runtimes
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(language, config)| {
                (
                    language.clone(),
                    RuntimeSlot {
                        config: config.clone(),
                        state: Mutex::new(SlotState::NotLoaded),
                    },
                )
            })
            .collect();

        Self {
            slots,
            limits,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &PlayletConfig) -> Self {
        Self::new(&config.runtimes, ExecutionLimits::from(&config.execution))
    }

    /// Process-wide bridge. The first call wins; later calls return the
    /// bridge created then, whatever config they pass.
    pub fn init(config: &PlayletConfig) -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::from_config(config))))
    }

    /// Languages with an enabled runtime.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn has_runtime(&self, language: &GuestLanguage) -> bool {
        self.slots.contains_key(language.id())
    }

    /// Number of load attempts made so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn state(&self, language: &GuestLanguage) -> Option<LoadState> {
        let slot = self.slots.get(language.id())?;
        let state = match slot.state.try_lock() {
            Ok(guard) => match &*guard {
                SlotState::NotLoaded => LoadState::NotLoaded,
                SlotState::Ready(_) => LoadState::Ready,
                SlotState::LoadFailed(reason) => LoadState::LoadFailed(reason.clone()),
            },
            Err(_) => LoadState::Loading,
        };
        Some(state)
    }

    /// Load the interpreter for a language, or reuse the loaded one.
    pub async fn load(&self, language: &GuestLanguage) -> Result<Arc<Interpreter>> {
        let id = language.id();
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| PlayletError::EnvironmentUnavailable {
                language: id.to_string(),
                reason: "no runtime is configured".to_string(),
            })?;

        let mut state = slot.state.lock().await;
        match &*state {
            SlotState::Ready(interpreter) => return Ok(Arc::clone(interpreter)),
            SlotState::LoadFailed(reason) => {
                return Err(PlayletError::EnvironmentUnavailable {
                    language: id.to_string(),
                    reason: reason.clone(),
                })
            }
            SlotState::NotLoaded => {}
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        info!(language = %id, source = ?slot.config.source, "Loading runtime");

        match load_interpreter(id, &slot.config, &self.limits).await {
            Ok(interpreter) => {
                info!(
                    language = %id,
                    program = %interpreter.program.display(),
                    version = %interpreter.version,
                    "Runtime ready"
                );
                let interpreter = Arc::new(interpreter);
                *state = SlotState::Ready(Arc::clone(&interpreter));
                Ok(interpreter)
            }
            Err(reason) => {
                warn!(language = %id, reason = %reason, "Runtime failed to load");
                *state = SlotState::LoadFailed(reason.clone());
                Err(PlayletError::EnvironmentUnavailable {
                    language: id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Allow another load attempt after a failure. Returns whether the
    /// runtime was in the failed state.
    pub async fn retry(&self, language: &GuestLanguage) -> bool {
        let Some(slot) = self.slots.get(language.id()) else {
            return false;
        };
        let mut state = slot.state.lock().await;
        if matches!(*state, SlotState::LoadFailed(_)) {
            *state = SlotState::NotLoaded;
            return true;
        }
        false
    }

    /// Drop every loaded interpreter.
    pub async fn teardown(&self) {
        for (language, slot) in &self.slots {
            let mut state = slot.state.lock().await;
            if !matches!(*state, SlotState::NotLoaded) {
                debug!(language = %language, "Tearing down runtime");
            }
            *state = SlotState::NotLoaded;
        }
    }

    pub async fn run(&self, language: &GuestLanguage, code: &str) -> Result<ExecutionResult> {
        let interpreter = self.load(language).await?;
        interpreter.run(code, &self.limits).await
    }
}

async fn load_interpreter(
    language: &str,
    config: &RuntimeConfig,
    limits: &ExecutionLimits,
) -> std::result::Result<Interpreter, String> {
    match config.source {
        RuntimeSource::Host => {
            let program = which::which(&config.program)
                .map_err(|e| format!("{} not found: {}", config.program, e))?;
            let version = probe(&program, &config.version_args, limits).await?;
            Ok(Interpreter {
                language: language.to_string(),
                program,
                args: config.args.clone(),
                version,
            })
        }
        RuntimeSource::Wasmer => load_wasmer(language, config).await,
    }
}

#[cfg(feature = "wasmer")]
async fn load_wasmer(
    language: &str,
    config: &RuntimeConfig,
) -> std::result::Result<Interpreter, String> {
    let package = config
        .package
        .clone()
        .ok_or_else(|| "wasmer runtimes need a package".to_string())?;
    let wasmer = super::wasmer::ensure_wasmer()
        .await
        .map_err(|e| e.to_string())?;

    let mut args = vec!["run".to_string(), package.clone(), "--".to_string()];
    args.extend(config.args.iter().cloned());

    Ok(Interpreter {
        language: language.to_string(),
        program: wasmer,
        args,
        version: package,
    })
}

#[cfg(not(feature = "wasmer"))]
async fn load_wasmer(
    _language: &str,
    _config: &RuntimeConfig,
) -> std::result::Result<Interpreter, String> {
    Err("playlet was built without wasmer support".to_string())
}

/// Run the interpreter's version command to confirm it starts.
async fn probe(
    program: &Path,
    version_args: &[String],
    limits: &ExecutionLimits,
) -> std::result::Result<String, String> {
    let output = tokio::time::timeout(
        limits.timeout,
        Command::new(program)
            .args(version_args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| format!("{} did not answer its version probe", program.display()))?
    .map_err(|e| format!("failed to start {}: {}", program.display(), e))?;

    if !output.status.success() {
        return Err(format!(
            "{} version probe exited with {}",
            program.display(),
            output.status
        ));
    }

    // Some interpreters print their version on stderr.
    let version = [&output.stdout, &output.stderr]
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes))
        .flat_map(|text| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .next()
        .unwrap_or_default();

    Ok(version)
}

#[async_trait]
impl ExecutionStrategy for RuntimeBridge {
    fn name(&self) -> &str {
        "bridge"
    }

    fn supports(&self, language: &GuestLanguage) -> bool {
        self.has_runtime(language)
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.run(&request.language, &request.code).await
    }
}
