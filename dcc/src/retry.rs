//! Bounded retry of station operations
//!
//! Drivers never retry on their own; a caller that wants to ride out
//! transient failures wraps the operation here.

use dcc_core::{DccError, DccResult};
use std::future::Future;

/// Total attempts made by [`with_retries`]: the first try plus 3 retries
pub const DEFAULT_ATTEMPTS: usize = 4;

/// Run `operation` until it succeeds, at most [`DEFAULT_ATTEMPTS`] times
///
/// # Errors
/// The error of the last attempt, unchanged
pub async fn with_retries<T, F, Fut>(operation: F) -> DccResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DccResult<T>>,
{
    with_attempts(DEFAULT_ATTEMPTS, operation).await
}

/// Run `operation` until it succeeds, at most `attempts` times
///
/// Validation errors are returned immediately, since repeating the same
/// call cannot succeed.
pub async fn with_attempts<T, F, Fut>(attempts: usize, mut operation: F) -> DccResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DccResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e @ DccError::Validation(_)) => return Err(e),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                log::warn!("attempt {attempt}/{attempts} failed: {e}");
                attempt += 1;
            }
        }
    }
}
