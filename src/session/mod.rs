use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::types::PlayletConfig;
use crate::display::{
    HtmlFileSurfaceFactory, OutputSink, OutputSnapshot, SurfaceContent, SurfaceFactory,
    Synchronizer,
};
use crate::error::Result;
use crate::sandbox::{Dispatcher, ExecutionResult, GuestLanguage};

/// One playground session: a dispatcher, its output sink and the optional
/// popped-out output surface.
pub struct Playground {
    dispatcher: Dispatcher,
    sink: OutputSink,
    synchronizer: Synchronizer,
}

impl Playground {
    /// Assemble a session around an existing dispatcher. The dispatcher must
    /// write into `sink`.
    pub fn new(dispatcher: Dispatcher, sink: OutputSink, synchronizer: Synchronizer) -> Self {
        Self {
            dispatcher,
            sink,
            synchronizer,
        }
    }

    /// Session with the configured strategies and the HTML popout surface.
    pub fn from_config(config: &PlayletConfig) -> Self {
        let factory = Arc::new(HtmlFileSurfaceFactory::from_config(&config.surface));
        Self::with_surfaces(config, factory)
    }

    pub fn with_surfaces(config: &PlayletConfig, surfaces: Arc<dyn SurfaceFactory>) -> Self {
        let sink = OutputSink::new();
        let dispatcher = Dispatcher::from_config(config, sink.clone());
        let synchronizer = Synchronizer::new(
            sink.clone(),
            surfaces,
            Duration::from_millis(config.surface.poll_interval_ms.max(1)),
        );
        Self::new(dispatcher, sink, synchronizer)
    }

    pub async fn execute(&self, code: &str, language: &GuestLanguage) -> Result<ExecutionResult> {
        self.dispatcher.execute(code, language).await
    }

    /// Run, giving up as soon as an open secondary surface is closed.
    /// Returns `None` when the surface closed first; the abandoned run is
    /// torn down with its future.
    pub async fn execute_while_open(
        &self,
        code: &str,
        language: &GuestLanguage,
    ) -> Option<Result<ExecutionResult>> {
        if !self.synchronizer.is_open().await {
            return Some(self.execute(code, language).await);
        }
        tokio::select! {
            outcome = self.execute(code, language) => Some(outcome),
            _ = self.synchronizer.closed() => {
                debug!(language = %language, "Secondary surface closed during run");
                None
            }
        }
    }

    /// Editor changes: update the displayed source without running it.
    pub fn set_source(&self, code: &str, language: &GuestLanguage) {
        if self.sink.update_source(code, language) {
            debug!(language = %language, bytes = code.len(), "Source updated");
        }
    }

    pub async fn open_secondary_surface(&self) -> Result<()> {
        self.synchronizer.open().await
    }

    pub async fn close_secondary_surface(&self) {
        self.synchronizer.close().await
    }

    pub async fn is_secondary_surface_open(&self) -> bool {
        self.synchronizer.is_open().await
    }

    /// Resolves once the secondary surface is closed, by the user or by us.
    pub async fn secondary_surface_closed(&self) {
        self.synchronizer.closed().await
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        self.sink.snapshot()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Content of the inline output display.
    pub fn primary_content(&self) -> SurfaceContent {
        SurfaceContent::from_snapshot(&self.sink.snapshot(), self.dispatcher.frame())
    }

    pub fn output_text(&self) -> String {
        self.primary_content().as_text().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::SurfaceContent;
    use crate::sandbox::RenderingFrame;
    use crate::testing::{eventually, FakeStrategy, MemorySurfaceFactory};

    fn playground() -> (Playground, Arc<MemorySurfaceFactory>) {
        let sink = OutputSink::new();
        let logging = FakeStrategy::new(|request| {
            Ok(crate::sandbox::ExecutionResult {
                result: Some(request.code.len().to_string()),
                error: None,
                logs: vec!["a".to_string(), "b".to_string()],
            })
        });
        let dispatcher = Dispatcher::new(
            sink.clone(),
            Arc::new(logging),
            Arc::new(FakeStrategy::echo().supporting(&[GuestLanguage::Python])),
            Arc::new(RenderingFrame::new()),
            1024,
        );
        let factory = Arc::new(MemorySurfaceFactory::new());
        let synchronizer =
            Synchronizer::new(sink.clone(), factory.clone(), Duration::from_millis(20));
        (Playground::new(dispatcher, sink, synchronizer), factory)
    }

    #[tokio::test]
    async fn test_primary_and_secondary_show_the_same_output() {
        let (playground, factory) = playground();
        playground.execute("42", &GuestLanguage::JavaScript).await.unwrap();
        playground.open_secondary_surface().await.unwrap();

        assert_eq!(playground.output_text(), "a\nb\n2");
        let surface = factory.last().unwrap();
        assert_eq!(surface.latest(), Some(playground.primary_content()));
    }

    #[tokio::test]
    async fn test_reading_markup_output_keeps_the_frame() {
        let (playground, _factory) = playground();
        playground.execute("<p>hi</p>", &GuestLanguage::Html).await.unwrap();
        let rendered = playground.dispatcher().frame().current().unwrap();

        let first = playground.primary_content();
        let second = playground.primary_content();

        assert_eq!(first, SurfaceContent::Frame(Arc::clone(&rendered)));
        assert_eq!(first, second);
        assert_eq!(playground.dispatcher().frame().current().unwrap().id, rendered.id);
    }

    #[tokio::test]
    async fn test_closing_surface_abandons_running_execution() {
        let sink = OutputSink::new();
        let slow = Arc::new(FakeStrategy::echo().delayed(Duration::from_secs(30)));
        let dispatcher = Dispatcher::new(
            sink.clone(),
            slow.clone(),
            Arc::new(FakeStrategy::echo().supporting(&[GuestLanguage::Python])),
            Arc::new(RenderingFrame::new()),
            1024,
        );
        let factory = Arc::new(MemorySurfaceFactory::new());
        let synchronizer =
            Synchronizer::new(sink.clone(), factory.clone(), Duration::from_millis(20));
        let playground = Playground::new(dispatcher, sink, synchronizer);
        playground.open_secondary_surface().await.unwrap();

        let closer = factory.last().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close_by_user();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            playground.execute_while_open("slow()", &GuestLanguage::JavaScript),
        )
        .await
        .unwrap();

        assert!(outcome.is_none());
        assert_eq!(slow.calls(), 1);
        assert_eq!(playground.snapshot().revision, 0);
    }

    #[tokio::test]
    async fn test_execute_while_open_without_surface_just_runs() {
        let (playground, _factory) = playground();

        let outcome = playground
            .execute_while_open("42", &GuestLanguage::JavaScript)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.result.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_pop_twice_opens_one_surface() {
        let (playground, factory) = playground();

        playground.open_secondary_surface().await.unwrap();
        playground.open_secondary_surface().await.unwrap();

        assert!(playground.is_secondary_surface_open().await);
        assert_eq!(factory.opened(), 1);
    }

    #[tokio::test]
    async fn test_code_change_rerenders_open_surface() {
        let (playground, factory) = playground();
        playground.open_secondary_surface().await.unwrap();
        let surface = factory.last().unwrap();

        playground.set_source("<p>new</p>", &GuestLanguage::Html);

        assert!(
            eventually(|| matches!(
                surface.latest(),
                Some(SurfaceContent::Frame(handle)) if handle.document.contains("new")
            ))
            .await
        );
    }

    #[tokio::test]
    async fn test_user_close_flips_open_state() {
        let (playground, factory) = playground();
        playground.open_secondary_surface().await.unwrap();

        factory.last().unwrap().close_by_user();
        playground.secondary_surface_closed().await;

        assert!(!playground.is_secondary_surface_open().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (playground, _factory) = playground();
        playground.close_secondary_surface().await;
        playground.open_secondary_surface().await.unwrap();
        playground.close_secondary_surface().await;
        playground.close_secondary_surface().await;
        assert!(!playground.is_secondary_surface_open().await);
    }
}
