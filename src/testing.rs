//! Test doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::display::{CloseSignal, Surface, SurfaceContent, SurfaceFactory};
use crate::error::Result;
use crate::sandbox::{ExecutionRequest, ExecutionResult, ExecutionStrategy, GuestLanguage};

type Outcome = Box<dyn Fn(&ExecutionRequest) -> Result<ExecutionResult> + Send + Sync>;

/// Strategy answering from a closure, optionally after a delay.
pub struct FakeStrategy {
    outcome: Outcome,
    delay: Duration,
    languages: Vec<GuestLanguage>,
    calls: AtomicUsize,
}

impl FakeStrategy {
    pub fn new(
        outcome: impl Fn(&ExecutionRequest) -> Result<ExecutionResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            outcome: Box::new(outcome),
            delay: Duration::ZERO,
            languages: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers with the source text as the result value.
    pub fn echo() -> Self {
        Self::new(|request| {
            Ok(ExecutionResult {
                result: Some(request.code.clone()),
                ..Default::default()
            })
        })
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Restrict `supports` to these languages. Empty means all.
    pub fn supporting(mut self, languages: &[GuestLanguage]) -> Self {
        self.languages = languages.to_vec();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionStrategy for FakeStrategy {
    fn name(&self) -> &str {
        "fake"
    }

    fn supports(&self, language: &GuestLanguage) -> bool {
        self.languages.is_empty() || self.languages.contains(language)
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.outcome)(request)
    }
}

/// In-memory surface recording every render.
pub struct MemorySurface {
    renders: Mutex<Vec<SurfaceContent>>,
    closed: AtomicBool,
    on_close: CloseSignal,
}

impl MemorySurface {
    pub fn latest(&self) -> Option<SurfaceContent> {
        self.renders.lock().ok().and_then(|r| r.last().cloned())
    }

    pub fn render_count(&self) -> usize {
        self.renders.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Simulate the user closing the window.
    pub fn close_by_user(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.on_close.fire();
    }
}

#[async_trait]
impl Surface for MemorySurface {
    async fn render(&self, content: &SurfaceContent) -> Result<()> {
        if let Ok(mut renders) = self.renders.lock() {
            renders.push(content.clone());
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Factory owning the surfaces it opens, like a window manager would.
#[derive(Default)]
pub struct MemorySurfaceFactory {
    surfaces: Mutex<Vec<Arc<MemorySurface>>>,
    opened: AtomicUsize,
}

impl MemorySurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Arc<MemorySurface>> {
        self.surfaces.lock().ok().and_then(|s| s.last().cloned())
    }

    /// Drop every surface without notifying anyone.
    pub fn forget_all(&self) {
        if let Ok(mut surfaces) = self.surfaces.lock() {
            surfaces.clear();
        }
    }
}

#[async_trait]
impl SurfaceFactory for MemorySurfaceFactory {
    async fn open(&self, on_close: CloseSignal) -> Result<Arc<dyn Surface>> {
        let surface = Arc::new(MemorySurface {
            renders: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            on_close,
        });
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut surfaces) = self.surfaces.lock() {
            surfaces.push(Arc::clone(&surface));
        }
        Ok(surface)
    }
}

/// Poll a condition for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
