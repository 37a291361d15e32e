//! Retrying RPC gate for row-store and object-store calls.
//!
//! Transient network failures are retried with exponential backoff plus a
//! unit of uniform jitter; everything else propagates on the first attempt.

use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const MAX_ATTEMPTS: u32 = 4;
const BASE_DELAY_SECS: f64 = 1.5;

/// Run `operation`, retrying network-transient failures up to
/// [`MAX_ATTEMPTS`] total attempts. Only the first and penultimate retries
/// are logged so micro-outages do not flood the log.
pub async fn execute<T, F, Fut>(label: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_network_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
                let delay = BASE_DELAY_SECS * f64::from(2u32.pow(attempt)) + jitter;
                if attempt == 0 || attempt == MAX_ATTEMPTS - 2 {
                    warn!(
                        operation = label,
                        attempt = attempt + 2,
                        max_attempts = MAX_ATTEMPTS,
                        delay_secs = format!("{delay:.1}"),
                        "Network error ({e}), retrying"
                    );
                }
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> WorkerError {
        WorkerError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_after_four_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::Configuration("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = execute("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
