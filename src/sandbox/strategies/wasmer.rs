use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use crate::config::loader::get_cache_dir;
use crate::error::{PlayletError, Result};

/// Wasmer version to download if not installed
const WASMER_VERSION: &str = "v6.0.0";

/// Download URL of the Wasmer release for the current platform.
fn wasmer_download_url() -> Result<String> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        "windows" => "windows",
        other => {
            return Err(PlayletError::SandboxCreation(format!(
                "Wasmer has no release for OS {}",
                other
            )));
        }
    };

    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => {
            return Err(PlayletError::SandboxCreation(format!(
                "Wasmer has no release for architecture {}",
                other
            )));
        }
    };

    Ok(format!(
        "https://github.com/wasmerio/wasmer/releases/download/{}/wasmer-{}-{}.tar.gz",
        WASMER_VERSION, os, arch
    ))
}

/// Version string of a working wasmer binary, or `None`.
async fn probe(binary: &Path) -> Option<String> {
    let output = Command::new(binary).arg("--version").output().await.ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Locate the wasmer CLI used to run registry interpreters.
///
/// Checks PATH, then the cache, then downloads the release archive into the
/// cache.
pub async fn ensure_wasmer() -> Result<PathBuf> {
    if let Ok(system) = which::which("wasmer") {
        if let Some(version) = probe(&system).await {
            info!(version = %version, "Using system wasmer");
            return Ok(system);
        }
    }

    let cache_dir = get_cache_dir().join("wasmer");
    let binary_path = cache_dir.join(format!("wasmer{}", std::env::consts::EXE_SUFFIX));

    if binary_path.exists() {
        if let Some(version) = probe(&binary_path).await {
            info!(version = %version, path = %binary_path.display(), "Using cached wasmer");
            return Ok(binary_path);
        }
    }

    download(&cache_dir, &binary_path).await?;

    let version = probe(&binary_path).await.ok_or_else(|| {
        PlayletError::SandboxCreation("Downloaded wasmer binary is not working".to_string())
    })?;
    info!(version = %version, path = %binary_path.display(), "Wasmer ready");

    Ok(binary_path)
}

async fn download(cache_dir: &Path, binary_path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(cache_dir).await?;

    let url = wasmer_download_url()?;
    info!(url = %url, "Downloading Wasmer {}", WASMER_VERSION);

    let response = reqwest::get(&url).await?;
    if !response.status().is_success() {
        return Err(PlayletError::SandboxCreation(format!(
            "Failed to download wasmer: HTTP {}",
            response.status()
        )));
    }
    let archive_bytes = response.bytes().await?;

    let extract_dir = cache_dir.join("extract_temp");
    tokio::fs::create_dir_all(&extract_dir).await?;

    let target = extract_dir.clone();
    tokio::task::spawn_blocking(move || {
        let tar = flate2::read::GzDecoder::new(std::io::Cursor::new(archive_bytes));
        tar::Archive::new(tar).unpack(&target)
    })
    .await
    .map_err(|e| PlayletError::SandboxCreation(format!("Extraction task failed: {}", e)))?
    .map_err(|e| PlayletError::SandboxCreation(format!("Failed to extract wasmer: {}", e)))?;

    let file_name = format!("wasmer{}", std::env::consts::EXE_SUFFIX);
    let extracted = [
        extract_dir.join("bin").join(&file_name),
        extract_dir.join(&file_name),
    ]
    .into_iter()
    .find(|candidate| candidate.exists())
    .ok_or_else(|| {
        PlayletError::SandboxCreation("Could not find wasmer binary in archive".to_string())
    })?;

    tokio::fs::rename(&extracted, binary_path).await?;
    let _ = tokio::fs::remove_dir_all(&extract_dir).await;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(binary_path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(binary_path, perms)?;
    }

    Ok(())
}
