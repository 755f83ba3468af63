//! Caller-side deadline for lifecycle actions.
//!
//! An elapsed deadline means the outcome is unknown, not that the action
//! failed: the batched write may already have committed. Callers retry, and
//! the handlers recognise a repeated take/resume for the same worker.

use std::future::Future;
use std::time::Duration;

use spoolflow_core::clock::duration_millis;
use spoolflow_core::{Error, ItemId, OperationKind, Result};
use tracing::warn;

/// Runs `fut`, mapping an elapsed `timeout` to [`Error::OutcomeUnknown`].
///
/// # Errors
///
/// The future's own error, or `OutcomeUnknown`.
pub async fn with_deadline<T, F>(
    timeout: Duration,
    item_id: &ItemId,
    operation: OperationKind,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_elapsed) => {
            let timeout_ms = duration_millis(timeout);
            warn!(item_id = %item_id, operation = %operation, timeout_ms, "action deadline elapsed; outcome unknown");
            Err(Error::OutcomeUnknown {
                item_id: item_id.clone(),
                operation,
                timeout_ms,
            })
        }
    }
}
