/*!
 * Utility functions and helpers for ScopeFlow.
 *
 * Timeout, retry and task helpers shared by the device and engine crates.
 */
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `future` - The future to run
///
/// # Returns
///
/// The result of the future, or a timeout error if the timeout is reached
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!(
            "Operation timed out after {} ms",
            duration_to_millis(duration)
        ))),
    }
}

/// Run a future with a timeout and retry on failure
///
/// # Arguments
///
/// * `duration` - The timeout duration for each attempt
/// * `retries` - The number of retries
/// * `future_factory` - A function that creates a new future for each retry
///
/// # Returns
///
/// The result of the future, or the last error if all retries fail
pub async fn with_retry<F, Fut, T>(
    duration: Duration,
    retries: usize,
    mut future_factory: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    let start = Instant::now();

    for i in 0..=retries {
        if i > 0 {
            debug!("Retry {}/{}", i, retries);
        }

        match timeout(duration, future_factory()).await {
            Ok(Ok(result)) => {
                if i > 0 {
                    debug!("Succeeded after {} retries", i);
                }
                return Ok(result);
            }
            Ok(Err(e)) => {
                warn!("Attempt {} failed: {}", i + 1, e);
                last_error = Some(e);
            }
            Err(_) => {
                warn!("Attempt {} timed out", i + 1);
                last_error = Some(Error::timeout("Operation timed out"));
            }
        }
    }

    warn!("All {} retries failed after {:?}", retries, start.elapsed());

    Err(last_error.unwrap_or_else(|| Error::other("Unknown error in retry loop")))
}

/// Create a task that runs in the background and logs any errors
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}

/// Convert a Duration to whole milliseconds, saturating at `u64::MAX`
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Convert milliseconds to a Duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Error>(42)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_retry_success_after_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<u32> = with_retry(Duration::from_secs(1), 3, move || {
            let current = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if current < 2 {
                    Err(Error::other("Intentional failure"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_with_retry_all_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<()> = with_retry(Duration::from_secs(1), 2, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::other("Intentional failure")) }
        })
        .await;

        tokio_test::assert_err!(result);
        // initial attempt + 2 retries
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_times_out_each_attempt() {
        let result: Result<()> = with_retry(Duration::from_millis(5), 1, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_spawn_and_log_runs_to_completion() {
        let handle = spawn_and_log("noop", async { Ok::<_, Error>(()) });
        handle.await.unwrap();
    }

    #[test]
    fn test_duration_conversions() {
        let duration = Duration::from_millis(1234);
        let millis = duration_to_millis(duration);
        assert_eq!(millis, 1234);
        assert_eq!(millis_to_duration(millis), duration);
    }
}
