use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use super::surface::{CloseSignal, Surface, SurfaceContent, SurfaceFactory};
use crate::config::loader::get_data_dir;
use crate::config::types::SurfaceConfig;
use crate::error::{PlayletError, Result};
use crate::sandbox::escape_html;

/// Popout surface backed by an HTML file that a browser can keep open.
///
/// Every render rewrites the whole file through a temporary sibling and a
/// rename, so a reader never sees half a document. Deleting the file counts
/// as the user closing the surface.
pub struct HtmlFileSurface {
    path: PathBuf,
    on_close: CloseSignal,
    closed: AtomicBool,
    written: AtomicBool,
}

impl HtmlFileSurface {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Surface for HtmlFileSurface {
    async fn render(&self, content: &SurfaceContent) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlayletError::SurfaceUnavailable(format!(
                "{} is closed",
                self.path.display()
            )));
        }

        let document = match content {
            SurfaceContent::Text(text) => text_document(text),
            SurfaceContent::Frame(handle) => refreshing(&handle.document),
        };

        let staging = self.path.with_extension("html.tmp");
        fs::write(&staging, document.as_bytes()).await?;
        fs::rename(&staging, &self.path).await?;
        self.written.store(true, Ordering::SeqCst);

        debug!(path = %self.path.display(), bytes = document.len(), "Popout written");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(error = %e, "Failed to remove popout file");
            }
        }
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        if self.written.load(Ordering::SeqCst) && !self.path.exists() {
            self.closed.store(true, Ordering::SeqCst);
            self.on_close.fire();
            return true;
        }
        false
    }
}

/// Makes an open browser tab reload the popout file every second.
const REFRESH_META: &str = r#"<meta http-equiv="refresh" content="1">"#;

/// Frame host document with the reload tag added to its head.
fn refreshing(document: &str) -> String {
    match document.split_once("<head>\n") {
        Some((before, after)) => format!("{}<head>\n{}\n{}", before, REFRESH_META, after),
        None => document.to_string(),
    }
}

/// Popout page for text output: a dark preformatted block that reloads
/// itself so a browser tab follows updates.
fn text_document(text: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
{refresh}
<title>Playlet Output</title>
<style>html, body {{ margin: 0; height: 100%; background: #1e1e1e; }} pre {{ margin: 0; padding: 1rem; color: #d4d4d4; font: 13px/1.5 monospace; white-space: pre-wrap; }}</style>
</head>
<body>
<pre>{text}</pre>
</body>
</html>
"#,
        refresh = REFRESH_META,
        text = escape_html(text),
    )
}

/// Opens popout files at one location and keeps them alive until closed.
pub struct HtmlFileSurfaceFactory {
    path: PathBuf,
    surfaces: Mutex<Vec<Arc<HtmlFileSurface>>>,
}

impl HtmlFileSurfaceFactory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            surfaces: Mutex::new(Vec::new()),
        }
    }

    /// Location from config, or `popout.html` in the data directory.
    pub fn from_config(config: &SurfaceConfig) -> Self {
        let path = config
            .path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("popout.html"));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SurfaceFactory for HtmlFileSurfaceFactory {
    async fn open(&self, on_close: CloseSignal) -> Result<Arc<dyn Surface>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                PlayletError::SurfaceUnavailable(format!("{}: {}", parent.display(), e))
            })?;
        }

        let surface = Arc::new(HtmlFileSurface {
            path: self.path.clone(),
            on_close,
            closed: AtomicBool::new(false),
            written: AtomicBool::new(false),
        });

        if let Ok(mut surfaces) = self.surfaces.lock() {
            surfaces.retain(|s| !s.is_closed());
            surfaces.push(Arc::clone(&surface));
        }

        info!(path = %self.path.display(), "Popout surface opened");
        Ok(surface)
    }
}
