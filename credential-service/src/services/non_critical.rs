//! Best-effort side calls.
//!
//! A non-critical step is one whose failure must never fail the operation
//! that triggered it: the error is logged with the step name and dropped.

use std::future::Future;
use tokio::task::JoinHandle;

/// Await `fut`; on error log a warning and return `None`.
pub async fn run<T, E, F>(step: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(step = step, error = %e, "Non-critical step failed");
            metrics::counter!("non_critical_failures_total", "step" => step).increment(1);
            None
        }
    }
}

/// Like [`run`], but detached on the runtime so the caller never waits.
pub fn spawn<T, E, F>(step: &'static str, fut: F) -> JoinHandle<Option<T>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(run(step, fut))
}
