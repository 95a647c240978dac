use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::sink::{OutputSink, OutputSnapshot};
use crate::error::Result;
use crate::sandbox::{FrameHandle, LanguageKind, RenderingFrame};

/// Fully rendered display content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceContent {
    /// Text output of a scripting or interpreted run
    Text(String),
    /// Markup shown through a sandboxed frame
    Frame(Arc<FrameHandle>),
}

impl SurfaceContent {
    /// Render a snapshot. Used by the inline display and the secondary
    /// surface alike, so both always show the same thing.
    pub fn from_snapshot(snapshot: &OutputSnapshot, frame: &RenderingFrame) -> Self {
        if snapshot.language.kind() == LanguageKind::Markup {
            return Self::Frame(frame.current_or_render(&snapshot.code));
        }
        Self::Text(
            snapshot
                .result
                .as_ref()
                .map(|result| result.display_text())
                .unwrap_or_default(),
        )
    }

    /// Plain text form; for frames this is the host document.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Frame(handle) => &handle.document,
        }
    }
}

/// Fired by a surface when the user closes it directly.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    inner: Arc<CloseState>,
}

#[derive(Debug, Default)]
struct CloseState {
    fired: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        if !self.inner.fired.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Resolves once the signal has fired.
    pub async fn fired(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// An independently-lived display context, e.g. a popout window.
///
/// The synchronizer never owns a surface; it may be closed at any time.
#[async_trait]
pub trait Surface: Send + Sync {
    /// Replace the entire displayed content.
    async fn render(&self, content: &SurfaceContent) -> Result<()>;

    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Creates surfaces. The close signal is registered at creation time.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn open(&self, on_close: CloseSignal) -> Result<Arc<dyn Surface>>;
}

struct OpenSurface {
    surface: Weak<dyn Surface>,
    signal: CloseSignal,
    task: JoinHandle<()>,
}

impl OpenSurface {
    fn live(&self) -> Option<Arc<dyn Surface>> {
        if self.signal.is_fired() {
            return None;
        }
        self.surface.upgrade().filter(|surface| !surface.is_closed())
    }
}

/// Keeps an optional secondary surface in step with the output sink.
pub struct Synchronizer {
    sink: OutputSink,
    factory: Arc<dyn SurfaceFactory>,
    frame: Arc<RenderingFrame>,
    poll_interval: Duration,
    open: Mutex<Option<OpenSurface>>,
}

impl Synchronizer {
    pub fn new(
        sink: OutputSink,
        factory: Arc<dyn SurfaceFactory>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sink,
            factory,
            frame: Arc::new(RenderingFrame::new()),
            poll_interval,
            open: Mutex::new(None),
        }
    }

    /// Open the surface, or re-render it if it is already open.
    pub async fn open(&self) -> Result<()> {
        let mut open = self.open.lock().await;

        if let Some(surface) = open.as_ref().and_then(OpenSurface::live) {
            let content = SurfaceContent::from_snapshot(&self.sink.snapshot(), &self.frame);
            surface.render(&content).await?;
            debug!("Secondary surface already open, re-rendered");
            return Ok(());
        }

        if let Some(stale) = open.take() {
            stale.task.abort();
        }

        let signal = CloseSignal::new();
        let surface = self.factory.open(signal.clone()).await?;

        // Subscribe first so a change racing the initial render is not lost.
        let mut updates = self.sink.subscribe();
        let snapshot = updates.borrow_and_update().clone();
        if let Err(e) = surface
            .render(&SurfaceContent::from_snapshot(&snapshot, &self.frame))
            .await
        {
            surface.close().await;
            return Err(e);
        }

        let weak = Arc::downgrade(&surface);
        let task = tokio::spawn(sync_loop(
            weak.clone(),
            signal.clone(),
            updates,
            Arc::clone(&self.frame),
            self.poll_interval,
        ));

        *open = Some(OpenSurface {
            surface: weak,
            signal,
            task,
        });
        info!(revision = snapshot.revision, "Secondary surface opened");
        Ok(())
    }

    pub async fn close(&self) {
        let mut open = self.open.lock().await;
        if let Some(current) = open.take() {
            current.task.abort();
            current.signal.fire();
            if let Some(surface) = current.surface.upgrade() {
                surface.close().await;
            }
            info!("Secondary surface closed");
        }
    }

    pub async fn is_open(&self) -> bool {
        self.open
            .lock()
            .await
            .as_ref()
            .and_then(OpenSurface::live)
            .is_some()
    }

    /// Resolves when the current surface is closed by any party.
    pub async fn closed(&self) {
        let signal = match self.open.lock().await.as_ref() {
            Some(current) => current.signal.clone(),
            None => return,
        };
        signal.fired().await;
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        if let Some(current) = self.open.get_mut().take() {
            current.task.abort();
        }
    }
}

async fn sync_loop(
    surface: Weak<dyn Surface>,
    signal: CloseSignal,
    mut updates: watch::Receiver<OutputSnapshot>,
    frame: Arc<RenderingFrame>,
    poll_interval: Duration,
) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = signal.fired() => break,
            _ = tick.tick() => {
                let alive = surface.upgrade().is_some_and(|s| !s.is_closed());
                if !alive {
                    debug!("Secondary surface went away");
                    signal.fire();
                    break;
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(target) = surface.upgrade().filter(|s| !s.is_closed()) else {
                    signal.fire();
                    break;
                };
                let snapshot = updates.borrow_and_update().clone();
                let content = SurfaceContent::from_snapshot(&snapshot, &frame);
                if let Err(e) = target.render(&content).await {
                    warn!(error = %e, "Failed to update secondary surface");
                    signal.fire();
                    break;
                }
                debug!(revision = snapshot.revision, "Secondary surface updated");
            }
        }
    }
}
