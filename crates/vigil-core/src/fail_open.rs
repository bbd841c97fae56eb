//! Best-effort side channels
//!
//! Execution-log writes, session release, healed-script persistence and the
//! terminal run update must never change a run's verdict. Errors from these
//! become a `tracing::warn!` line and `None`.
//!
//! Step execution and run creation are not side channels and must propagate.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Await `f()`, turning an error into a warning and `None`
///
/// ```no_run
/// use vigil_core::fail_open::fail_open;
/// use vigil_core::Result;
///
/// async fn close_session() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     if fail_open("session::close", || close_session()).await.is_none() {
///         // already logged
///     }
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation, e);
            None
        }
    }
}

/// [`fail_open`] with up to `attempts` tries for transient store errors
///
/// Sleeps `base_delay * attempt` between tries. Errors that are not
/// [`VigilError::is_transient`](crate::VigilError::is_transient) give up at once.
pub async fn fail_open_with_retries<F, Fut, T>(
    operation: &str,
    attempts: usize,
    base_delay: Duration,
    mut f: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {}", operation, attempt, attempts, e);
                tokio::time::sleep(base_delay * attempt as u32).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempt(s) (fail-open): {}",
                    operation, attempt, e
                );
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VigilError;

    #[tokio::test]
    async fn test_fail_open_passes_value_through() {
        let result = fail_open("op", || async { Ok::<_, VigilError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_swallows_error() {
        let result = fail_open("op", || async {
            Err::<i32, _>(VigilError::Persistence("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let mut calls = 0;
        let result = fail_open_with_retries("op", 3, Duration::from_millis(1), || {
            calls += 1;
            let current = calls;
            async move {
                if current < 2 {
                    Err(VigilError::Persistence("database is locked".to_string()))
                } else {
                    Ok("saved")
                }
            }
        })
        .await;
        assert_eq!(result, Some("saved"));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let mut calls = 0;
        let result = fail_open_with_retries("op", 3, Duration::from_millis(1), || {
            calls += 1;
            async { Err::<(), _>(VigilError::InvalidTransition("passed -> failed".to_string())) }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let mut calls = 0;
        let result = fail_open_with_retries("op", 3, Duration::from_millis(1), || {
            calls += 1;
            async { Err::<(), _>(VigilError::Persistence("read-only".to_string())) }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls, 3);
    }
}
