use async_trait::async_trait;

use crate::error::Result;
use crate::sandbox::{ExecutionRequest, ExecutionResult, GuestLanguage};

/// Trait for execution strategies.
///
/// Each strategy owns the sandbox it creates for a request; nothing is shared
/// between executions. Dropping the returned future must tear the sandbox
/// down, which is how the dispatcher cancels superseded work.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Strategy name used in logs (e.g., "worker", "bridge")
    fn name(&self) -> &str;

    /// Whether this strategy can run the given language.
    /// Default implementation accepts everything routed to it.
    fn supports(&self, _language: &GuestLanguage) -> bool {
        true
    }

    /// Run the request. Guest failures are returned inside the result;
    /// `Err` is reserved for infrastructure failures and timeouts.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult>;
}
