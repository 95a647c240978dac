//! Playlet worker protocol and evaluator.
//!
//! The host spawns one `playlet-worker` process per scripting execution and
//! talks to it over stdin/stdout with single-line JSON messages:
//!
//! - Host sends `{"type": "run", "payload": "<source>", ...}`
//! - Worker replies `{"result"?, "error"?, "logs"?, "timed_out"?}` and exits
//!
//! The message types live here so the host can depend on this crate without
//! pulling in the interpreter (`default-features = false`).

use serde::{Deserialize, Serialize};

#[cfg(feature = "engine")]
mod engine;

#[cfg(feature = "engine")]
pub use engine::{evaluate, Limits};

/// Request from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Run {
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_limit_mb: Option<u64>,
    },
}

/// Response to the host. Absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    /// Set when the worker's own deadline interrupted evaluation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl WorkerResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_wire_format() {
        let request = WorkerRequest::Run {
            payload: "1 + 1".to_string(),
            timeout_ms: None,
            memory_limit_mb: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"run","payload":"1 + 1"}"#);

        let parsed: WorkerRequest =
            serde_json::from_str(r#"{"type": "run", "payload": "x", "timeout_ms": 50}"#).unwrap();
        assert_eq!(
            parsed,
            WorkerRequest::Run {
                payload: "x".to_string(),
                timeout_ms: Some(50),
                memory_limit_mb: None,
            }
        );
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let response = WorkerResponse {
            result: Some("42".to_string()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"result":"42"}"#);

        let parsed: WorkerResponse = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("boom"));
        assert!(parsed.logs.is_empty());
        assert!(!parsed.timed_out);
    }
}
