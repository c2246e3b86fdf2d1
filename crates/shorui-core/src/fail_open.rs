//! Fail-open helpers for non-critical work
//!
//! Some work should never fail a generation request: recording intermediate
//! session snapshots, best-effort cleanup, environment probes. Wrap those
//! calls here so a failure becomes a warning instead of an error.
//!
//! DO NOT use fail-open for:
//! - Quota reservation (correctness)
//! - Snippet execution (business logic)
//! - Terminal session records (state)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run an operation whose failure should only be logged.
///
/// Returns `None` and emits a `tracing::warn!` when the operation fails.
///
/// ```no_run
/// use shorui_core::fail_open::fail_open;
/// use shorui_core::Result;
///
/// async fn snapshot_session() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let recorded = fail_open("session_snapshot", || snapshot_session()).await;
///     // recorded is None if the snapshot failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Synchronous variant for cleanup paths such as `Drop` impls
pub fn fail_open_sync<T, E: std::fmt::Display>(
    operation_name: &str,
    result: std::result::Result<T, E>,
) -> Option<T> {
    match result {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShoruiError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, ShoruiError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(ShoruiError::Other("test error".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[test]
    fn test_fail_open_sync() {
        assert_eq!(fail_open_sync::<_, std::io::Error>("op", Ok(1)), Some(1));

        let missing = std::fs::remove_file("/definitely/not/here.py");
        assert_eq!(fail_open_sync("remove_scratch", missing), None);
    }
}
