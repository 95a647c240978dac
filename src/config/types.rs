use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayletConfig {
    pub execution: ExecutionConfig,
    pub scripting: ScriptingConfig,
    /// External interpreters keyed by language id (python, ruby, ...)
    pub runtimes: BTreeMap<String, RuntimeConfig>,
    pub surface: SurfaceConfig,
}

impl Default for PlayletConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            scripting: ScriptingConfig::default(),
            runtimes: default_runtimes(),
            surface: SurfaceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock deadline for a single execution
    pub timeout_seconds: u64,
    /// Extra time granted to the sandbox to report its own timeout before it is killed
    pub grace_millis: u64,
    /// Memory limit for the scripting interpreter in MB
    pub memory_limit_mb: u64,
    /// Largest accepted source text in bytes
    pub max_code_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            grace_millis: 500,
            memory_limit_mb: 64,
            max_code_bytes: 1024 * 1024,
        }
    }
}

/// Scripting (JavaScript/TypeScript) worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingConfig {
    /// Path to the playlet-worker binary (looked up next to playlet, then on PATH)
    pub worker_binary: Option<PathBuf>,
}

/// Where an external interpreter comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSource {
    /// Interpreter installed on the host
    #[default]
    Host,
    /// Wasmer registry package run through the wasmer CLI
    Wasmer,
}

/// External interpreter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub source: RuntimeSource,
    /// Interpreter program (host source)
    pub program: String,
    /// Arguments passed before the source, which is piped to stdin
    pub args: Vec<String>,
    /// Arguments used to probe the interpreter when it is loaded
    pub version_args: Vec<String>,
    /// Registry package (wasmer source), e.g. "python/python"
    pub package: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: RuntimeSource::Host,
            program: String::new(),
            args: Vec::new(),
            version_args: vec!["--version".to_string()],
            package: None,
        }
    }
}

impl RuntimeConfig {
    pub fn host(program: &str, args: &[&str], version_args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            version_args: version_args.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Secondary (popout) surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Popout document location (defaults to the data directory)
    pub path: Option<PathBuf>,
    /// Synchronization tick used to detect a surface closed by the user
    pub poll_interval_ms: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: 250,
        }
    }
}

/// Interpreters available out of the box.
pub fn default_runtimes() -> BTreeMap<String, RuntimeConfig> {
    BTreeMap::from([
        (
            "python".to_string(),
            RuntimeConfig::host("python3", &["-"], &["--version"]),
        ),
        (
            "ruby".to_string(),
            RuntimeConfig::host("ruby", &[], &["--version"]),
        ),
        (
            "php".to_string(),
            RuntimeConfig::host("php", &[], &["--version"]),
        ),
        (
            "shell".to_string(),
            RuntimeConfig::host("bash", &["-s"], &["--version"]),
        ),
        (
            "lua".to_string(),
            RuntimeConfig::host("lua", &["-"], &["-v"]),
        ),
        (
            "perl".to_string(),
            RuntimeConfig::host("perl", &[], &["--version"]),
        ),
    ])
}
