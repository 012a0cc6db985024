use anyhow::Error;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
pub async fn with_retry<F, Fut, T, E>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Error>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(Into::into) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result = with_retry(
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(42)
                }
            },
            3,
            1,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let result: Result<(), Error> = with_retry(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("down"))
            },
            2,
            1,
        )
        .await;
        assert_eq!(result.unwrap_err().to_string(), "down");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
