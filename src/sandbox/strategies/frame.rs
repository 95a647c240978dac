use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Title of every host document. Guest markup never changes it.
const HOST_TITLE: &str = "Playlet Preview";

/// Capabilities granted to the inner frame. Scripts run, but the frame gets
/// an opaque origin and cannot navigate the host, submit forms or open popups.
const FRAME_SANDBOX: &str = "allow-scripts";

/// One rendering of guest markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHandle {
    pub id: Uuid,
    /// Guest markup this frame was rendered from
    pub markup: String,
    /// Host document wrapping the sandboxed frame
    pub document: String,
    pub rendered_at: DateTime<Utc>,
}

/// Sandboxed rendering frame for markup.
///
/// Only the latest render is kept. A new render replaces the previous handle
/// outright; content is never merged.
#[derive(Debug, Default)]
pub struct RenderingFrame {
    current: Mutex<Option<Arc<FrameHandle>>>,
}

impl RenderingFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render markup into a fresh frame, replacing whatever was shown.
    pub fn render(&self, markup: &str) -> Arc<FrameHandle> {
        let handle = Arc::new(FrameHandle {
            id: Uuid::new_v4(),
            markup: markup.to_string(),
            document: frame_document(markup),
            rendered_at: Utc::now(),
        });

        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.take() {
                debug!(frame_id = %previous.id, "Discarding previous frame");
            }
            *current = Some(Arc::clone(&handle));
        }

        debug!(frame_id = %handle.id, bytes = markup.len(), "Rendered markup frame");
        handle
    }

    /// The frame currently displayed, if any.
    pub fn current(&self) -> Option<Arc<FrameHandle>> {
        self.current.lock().ok().and_then(|guard| guard.clone())
    }

    /// The current frame if it shows `markup`, otherwise a fresh render.
    pub fn current_or_render(&self, markup: &str) -> Arc<FrameHandle> {
        match self.current() {
            Some(handle) if handle.markup == markup => handle,
            _ => self.render(markup),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            current.take();
        }
    }
}

/// Build the host document for a piece of guest markup.
pub fn frame_document(markup: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>html, body {{ margin: 0; height: 100%; background: #fff; }} iframe {{ border: 0; width: 100%; height: 100%; display: block; }}</style>
</head>
<body>
<iframe sandbox="{sandbox}" referrerpolicy="no-referrer" srcdoc="{srcdoc}"></iframe>
</body>
</html>
"#,
        title = HOST_TITLE,
        sandbox = FRAME_SANDBOX,
        srcdoc = escape_html(markup),
    )
}

/// Escape text for use inside HTML content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
