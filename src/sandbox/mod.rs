mod dispatcher;
mod language;
mod strategies;
mod traits;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::types::ExecutionConfig;

pub use dispatcher::Dispatcher;
pub use language::{GuestLanguage, LanguageKind};
pub use strategies::{
    escape_html, frame_document, BackgroundContext, FrameHandle, Interpreter, LoadState,
    RenderingFrame, RuntimeBridge,
};
pub use traits::ExecutionStrategy;

/// Source text submitted for execution. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: GuestLanguage,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: GuestLanguage) -> Self {
        Self {
            code: code.into(),
            language,
        }
    }
}

/// Observable output of one execution.
///
/// `result` and `error` are exclusive in practice but not enforced. `logs`
/// holds every captured print call in call order, including those made
/// before an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ExecutionResult {
    /// Result returned for languages no strategy can run.
    pub fn unsupported(language: &GuestLanguage) -> Self {
        Self {
            error: Some(format!(
                "Running {} code is not supported in the playground",
                language.label()
            )),
            ..Self::default()
        }
    }

    /// Result recorded when the deadline expired.
    pub fn timed_out(millis: u64, logs: Vec<String>) -> Self {
        Self {
            result: None,
            error: Some(format!("Execution timed out after {} ms", millis)),
            logs,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_none() && self.error.is_none() && self.logs.is_empty()
    }

    /// Text shown by output displays: logs, then the value, then the error.
    pub fn display_text(&self) -> String {
        let mut lines: Vec<String> = self.logs.clone();
        if let Some(result) = &self.result {
            lines.push(result.clone());
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {}", error));
        }
        lines.join("\n")
    }
}

impl From<playlet_worker::WorkerResponse> for ExecutionResult {
    fn from(response: playlet_worker::WorkerResponse) -> Self {
        Self {
            result: response.result,
            error: response.error,
            logs: response.logs,
        }
    }
}

/// Resource limits shared by every strategy.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub grace: Duration,
    pub memory_limit_mb: u64,
    pub max_code_bytes: usize,
}

impl ExecutionLimits {
    pub fn timeout_millis(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ExecutionLimits {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_seconds),
            grace: Duration::from_millis(config.grace_millis),
            memory_limit_mb: config.memory_limit_mb,
            max_code_bytes: config.max_code_bytes,
        }
    }
}
