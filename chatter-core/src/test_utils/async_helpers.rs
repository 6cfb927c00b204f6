//! Async test helpers

use std::future::Future;
use tokio::time::{timeout, Duration};

/// Default wait used by tests that expect something to happen promptly
pub const PROMPT: Duration = Duration::from_secs(2);

/// Await `future`, panicking with `what` if it does not finish within [`PROMPT`]
pub async fn within<F, T>(what: &str, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(PROMPT, future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {}", what),
    }
}

/// True if `future` is still pending after `duration`
pub async fn stays_pending<F>(duration: Duration, future: F) -> bool
where
    F: Future,
{
    timeout(duration, future).await.is_err()
}
