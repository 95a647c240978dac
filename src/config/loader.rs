use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::types::{default_runtimes, PlayletConfig};
use crate::error::{PlayletError, Result};
use crate::sandbox::GuestLanguage;

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "playlet", "playlet") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".playlet").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<PlayletConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // Return defaults if no config file exists
        return Ok(PlayletConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}

/// Parse a configuration document.
///
/// Runtime entries are layered over the built-in interpreters, so a file
/// that only customizes `[runtimes.python]` keeps ruby, php and the rest.
/// Keys may use any language alias (`py`, `sh`) and are stored by id.
pub fn parse_config(content: &str) -> Result<PlayletConfig> {
    let mut config: PlayletConfig =
        toml::from_str(content).map_err(|e| PlayletError::TomlParse(e.to_string()))?;

    let mut runtimes = default_runtimes();
    for (key, runtime) in std::mem::take(&mut config.runtimes) {
        let id = GuestLanguage::parse(&key).id().to_string();
        if id != key {
            debug!(key = %key, language = %id, "Runtime key resolved to language id");
        }
        runtimes.insert(id, runtime);
    }
    config.runtimes = runtimes;

    for (language, runtime) in &config.runtimes {
        if runtime.enabled && runtime.program.is_empty() && runtime.package.is_none() {
            return Err(PlayletError::Config(format!(
                "runtime '{}' needs either a program or a package",
                language
            )));
        }
    }

    Ok(config)
}

/// Get the cache directory for downloaded runtimes
pub fn get_cache_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "playlet", "playlet") {
        proj_dirs.cache_dir().to_path_buf()
    } else {
        dirs_fallback().join(".cache").join("playlet")
    }
}

/// Get the data directory for handoff and popout storage
pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "playlet", "playlet") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs_fallback().join(".local").join("share").join("playlet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::RuntimeSource;

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = PlayletConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = parse_config(&toml_str).unwrap();
        assert_eq!(parsed.execution.timeout_seconds, 10);
        assert_eq!(parsed.runtimes.len(), config.runtimes.len());
        assert_eq!(parsed.runtimes["python"].program, "python3");
    }

    #[test]
    fn test_partial_runtimes_keep_defaults() {
        let config = parse_config(
            r#"
            [execution]
            timeout_seconds = 3

            [runtimes.python]
            source = "wasmer"
            package = "python/python"

            [runtimes.go]
            program = "go-run-stdin"
            "#,
        )
        .unwrap();

        assert_eq!(config.execution.timeout_seconds, 3);
        assert_eq!(config.execution.memory_limit_mb, 64);
        assert_eq!(config.runtimes["python"].source, RuntimeSource::Wasmer);
        assert!(config.runtimes.contains_key("ruby"));
        assert!(config.runtimes.contains_key("go"));
    }

    #[test]
    fn test_runtime_aliases_resolve_to_language_ids() {
        let config = parse_config(
            r#"
            [runtimes.py]
            program = "pypy3"

            [runtimes.Golang]
            program = "go-run-stdin"
            "#,
        )
        .unwrap();

        assert_eq!(config.runtimes["python"].program, "pypy3");
        assert_eq!(config.runtimes["go"].program, "go-run-stdin");
        assert!(!config.runtimes.contains_key("py"));
        assert!(!config.runtimes.contains_key("Golang"));
    }

    #[test]
    fn test_runtime_without_program_is_rejected() {
        let err = parse_config("[runtimes.zig]\nargs = []\n").unwrap_err();
        assert!(matches!(err, PlayletError::Config(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.surface.poll_interval_ms, 250);
    }
}
