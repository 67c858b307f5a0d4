//! Exponential backoff for transient store errors, shared by the
//! Supervisor's restart path and the Cleanup Worker's sweep.

use std::time::Duration;

use crate::errors::StoreError;
use crate::log;

const BASE: Duration = Duration::from_millis(100);
const CAP: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 3;

/// Retries `op` up to [`MAX_ATTEMPTS`] times with exponential backoff
/// (base 100ms, factor 2, capped at 5s), returning the first success or
/// the last error. Only [`StoreError::Transient`] is retried; `NotFound`
/// and `Conflict` are returned immediately since retrying cannot help.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient(reason)) if attempt < MAX_ATTEMPTS => {
                let delay = BASE.saturating_mul(1 << (attempt - 1)).min(CAP);
                log::warn!(op = op_name, attempt, %reason, delay_ms = delay.as_millis() as u64, "retrying after transient store error");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Transient("unavailable".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("down".into())) }
        })
        .await;
        assert_eq!(result, Err(StoreError::Transient("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound) }
        })
        .await;
        assert_eq!(result, Err(StoreError::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
