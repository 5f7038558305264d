//! Immediate, bounded retry for upstream calls.

use std::future::Future;

use tracing::debug;

use crate::error::Transient;

/// Run `op` up to `attempts` times (at least once).
///
/// Transient errors are retried immediately with no backoff. Any other error,
/// or the last transient one once attempts are exhausted, is returned to the
/// caller unchanged.
pub async fn retry<T, E, F, Fut>(attempts: u32, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(attempt = attempt, attempts = attempts, error = %e, "upstream_retry");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
