use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::ExecutionStrategy;
use super::{
    BackgroundContext, ExecutionLimits, ExecutionRequest, ExecutionResult, GuestLanguage,
    LanguageKind, RenderingFrame, RuntimeBridge,
};
use crate::config::types::PlayletConfig;
use crate::display::OutputSink;
use crate::error::{PlayletError, Result};

/// Routes source text to the strategy for its language and records every
/// completed result in the session's output sink.
///
/// One execution is in flight per dispatcher. Starting another cancels the
/// running one; the cancelled call returns [`PlayletError::Cancelled`] and
/// never touches the sink.
pub struct Dispatcher {
    sink: OutputSink,
    scripting: Arc<dyn ExecutionStrategy>,
    external: Arc<dyn ExecutionStrategy>,
    frame: Arc<RenderingFrame>,
    max_code_bytes: usize,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl Dispatcher {
    pub fn new(
        sink: OutputSink,
        scripting: Arc<dyn ExecutionStrategy>,
        external: Arc<dyn ExecutionStrategy>,
        frame: Arc<RenderingFrame>,
        max_code_bytes: usize,
    ) -> Self {
        Self {
            sink,
            scripting,
            external,
            frame,
            max_code_bytes,
            in_flight: Mutex::new(None),
        }
    }

    /// Dispatcher over the worker process and the process-wide runtime bridge.
    pub fn from_config(config: &PlayletConfig, sink: OutputSink) -> Self {
        let limits = ExecutionLimits::from(&config.execution);
        let scripting = Arc::new(BackgroundContext::new(
            config.scripting.worker_binary.clone(),
            limits,
        ));
        Self::new(
            sink,
            scripting,
            RuntimeBridge::init(config),
            Arc::new(RenderingFrame::new()),
            config.execution.max_code_bytes,
        )
    }

    pub fn frame(&self) -> &Arc<RenderingFrame> {
        &self.frame
    }

    /// How a language will be executed.
    pub fn classify(&self, language: &GuestLanguage) -> LanguageKind {
        match language.kind() {
            LanguageKind::Scripting if self.scripting.supports(language) => LanguageKind::Scripting,
            LanguageKind::Markup => LanguageKind::Markup,
            _ if self.external.supports(language) => LanguageKind::ExternalInterpreted,
            _ => LanguageKind::Unsupported,
        }
    }

    pub async fn execute(&self, code: &str, language: &GuestLanguage) -> Result<ExecutionResult> {
        if code.len() > self.max_code_bytes {
            return Err(PlayletError::CodeTooLarge {
                size: code.len(),
                limit: self.max_code_bytes,
            });
        }

        let execution_id = Uuid::new_v4();
        let kind = self.classify(language);
        let request = ExecutionRequest::new(code, language.clone());
        let token = self.begin();
        let started = Instant::now();

        debug!(%execution_id, language = %language, %kind, bytes = code.len(), "Dispatching");

        let outcome = match kind {
            LanguageKind::Markup => {
                let handle = self.frame.render(code);
                debug!(%execution_id, frame_id = %handle.id, "Markup rendered");
                Ok(ExecutionResult::default())
            }
            LanguageKind::Unsupported => Ok(ExecutionResult::unsupported(language)),
            LanguageKind::Scripting => self.run(&token, self.scripting.as_ref(), &request).await,
            LanguageKind::ExternalInterpreted => {
                self.run(&token, self.external.as_ref(), &request).await
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        let recorded = match &outcome {
            Ok(result) => Some(result.clone()),
            Err(PlayletError::Timeout { millis, logs }) => {
                Some(ExecutionResult::timed_out(*millis, logs.clone()))
            }
            Err(_) => None,
        };

        if !self.finish(&token, &request, recorded) {
            info!(%execution_id, elapsed_ms, "Execution superseded");
            return Err(PlayletError::Cancelled);
        }

        match &outcome {
            Ok(result) => info!(
                %execution_id,
                language = %language,
                %kind,
                elapsed_ms,
                logs = result.logs.len(),
                guest_error = result.is_error(),
                "Execution finished"
            ),
            Err(e) => warn!(
                %execution_id,
                language = %language,
                elapsed_ms,
                error = %e,
                "Execution failed"
            ),
        }

        outcome
    }

    /// Cancel the execution in flight, if any, and register a new one.
    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some(previous) = in_flight.replace(token.clone()) {
                previous.cancel();
            }
        }
        token
    }

    /// Record the outcome unless the execution was superseded. Returns false
    /// when it was.
    fn finish(
        &self,
        token: &CancellationToken,
        request: &ExecutionRequest,
        recorded: Option<ExecutionResult>,
    ) -> bool {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return false;
        };
        if token.is_cancelled() {
            return false;
        }
        if let Some(result) = recorded {
            self.sink.record(request, result);
        }
        in_flight.take();
        true
    }

    async fn run(
        &self,
        token: &CancellationToken,
        strategy: &dyn ExecutionStrategy,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        debug!(strategy = strategy.name(), "Running in strategy");
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(PlayletError::Cancelled),
            outcome = strategy.execute(request) => outcome,
        }
    }
}
