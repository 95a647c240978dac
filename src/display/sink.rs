use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::sandbox::{ExecutionRequest, ExecutionResult, GuestLanguage};

/// What the output displays show: the latest result and the source/language
/// it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputSnapshot {
    /// Bumped on every change
    pub revision: u64,
    pub code: String,
    pub language: GuestLanguage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_at: Option<DateTime<Utc>>,
}

/// Single-slot output store of one playground session.
///
/// Writers overwrite the slot; no history is kept. Readers get snapshots or
/// a change subscription and cannot write.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: Arc<watch::Sender<OutputSnapshot>>,
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(OutputSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Store the result of a completed execution.
    pub fn record(&self, request: &ExecutionRequest, result: ExecutionResult) {
        self.tx.send_modify(|snapshot| {
            snapshot.revision += 1;
            snapshot.code = request.code.clone();
            snapshot.language = request.language.clone();
            snapshot.result = Some(result);
            snapshot.produced_at = Some(Utc::now());
            debug!(revision = snapshot.revision, "Output recorded");
        });
    }

    /// Change the displayed source or language without a new result.
    /// Returns false when nothing changed.
    pub fn update_source(&self, code: &str, language: &GuestLanguage) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.code == code && &snapshot.language == language {
                return false;
            }
            snapshot.revision += 1;
            snapshot.code = code.to_string();
            snapshot.language = language.clone();
            true
        })
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        self.tx.borrow().clone()
    }

    /// Watch for changes. The current value counts as already seen.
    pub fn subscribe(&self) -> watch::Receiver<OutputSnapshot> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(value: &str) -> ExecutionResult {
        ExecutionResult {
            result: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_record_overwrites_slot() {
        let sink = OutputSink::new();
        assert_eq!(sink.snapshot().revision, 0);
        assert!(sink.snapshot().result.is_none());

        let request = ExecutionRequest::new("1", GuestLanguage::JavaScript);
        sink.record(&request, result("1"));
        let second = ExecutionRequest::new("print(2)", GuestLanguage::Python);
        sink.record(&second, result("2"));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.code, "print(2)");
        assert_eq!(snapshot.language, GuestLanguage::Python);
        assert_eq!(snapshot.result, Some(result("2")));
        assert!(snapshot.produced_at.is_some());
    }

    #[test]
    fn test_update_source_keeps_result() {
        let sink = OutputSink::new();
        let request = ExecutionRequest::new("1", GuestLanguage::JavaScript);
        sink.record(&request, result("1"));

        assert!(sink.update_source("2", &GuestLanguage::JavaScript));
        assert!(!sink.update_source("2", &GuestLanguage::JavaScript));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.code, "2");
        assert_eq!(snapshot.result, Some(result("1")));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let sink = OutputSink::new();
        let mut updates = sink.subscribe();
        assert!(!updates.has_changed().unwrap());

        let writer = sink.clone();
        tokio::spawn(async move {
            writer.update_source("<p>x</p>", &GuestLanguage::Html);
        });

        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().language, GuestLanguage::Html);
    }
}
