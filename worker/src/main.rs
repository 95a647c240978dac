//! Playlet Worker
//!
//! Spawned by the host once per scripting execution. Reads a single run
//! request from stdin, evaluates it in a fresh interpreter and writes a single
//! response line to stdout before exiting. Stdout is reserved for the
//! protocol; diagnostics go to stderr.

use std::io::{self, BufRead, Write};

use playlet_worker::{evaluate, Limits, WorkerRequest, WorkerResponse};

fn main() {
    let response = match read_request() {
        Ok(request) => process_request(request),
        Err(message) => WorkerResponse::failure(message),
    };

    if let Err(e) = write_response(&response) {
        eprintln!("playlet-worker: failed to write response: {}", e);
        std::process::exit(1);
    }
}

fn read_request() -> Result<WorkerRequest, String> {
    let mut line = String::new();
    let bytes_read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| format!("Failed to read request: {}", e))?;

    if bytes_read == 0 {
        return Err("No request received".to_string());
    }

    serde_json::from_str(line.trim()).map_err(|e| format!("Invalid request: {}", e))
}

fn process_request(request: WorkerRequest) -> WorkerResponse {
    match request {
        WorkerRequest::Run {
            payload,
            timeout_ms,
            memory_limit_mb,
        } => evaluate(&payload, &Limits::new(timeout_ms, memory_limit_mb)),
    }
}

fn write_response(response: &WorkerResponse) -> io::Result<()> {
    let json = serde_json::to_string(response)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json)?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_run_request() {
        let request: WorkerRequest =
            serde_json::from_str(r#"{"type": "run", "payload": "console.log('hi'); 1 + 1"}"#)
                .unwrap();
        let response = process_request(request);
        assert_eq!(response.result.as_deref(), Some("2"));
        assert_eq!(response.logs, vec!["hi"]);
    }
}
