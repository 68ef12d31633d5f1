//! Panic isolation at callback and task seams.
//!
//! A panicking status listener, progress observer or background task must not
//! take the agent down with it. These helpers capture the panic, log it and
//! turn it into `Error::Internal`.

use crate::types::{Error, Result};
use futures::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execute a function with panic recovery.
///
/// # Example
/// ```
/// use kiosk_core::failsafe::with_recovery;
///
/// let result = with_recovery(|| Ok(2 + 2), "add");
/// assert_eq!(result.unwrap(), 4);
/// ```
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                "panic_recovered: operation={}, panic={}",
                operation_name,
                panic_msg
            );

            Err(Error::internal(format!(
                "Panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Execute a future with panic recovery, including panics raised while it is
/// being polled.
pub async fn with_recovery_async<Fut, T>(future: Fut, operation_name: &str) -> Result<T>
where
    Fut: std::future::Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(
                "async_panic_recovered: operation={}, panic={}",
                operation_name,
                panic_msg
            );

            Err(Error::internal(format!(
                "Async panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_recovery_success() {
        assert_eq!(with_recovery(|| Ok(42), "test_operation").unwrap(), 42);
    }

    #[test]
    fn test_with_recovery_preserves_error() {
        let result: Result<()> = with_recovery(
            || Err(Error::validation("specific validation error")),
            "test_operation",
        );
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("specific validation error"));
    }

    #[test]
    fn test_with_recovery_panic_str() {
        let result: Result<()> = with_recovery(|| panic!("listener exploded"), "status_listener");
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Panic in status_listener"));
        assert!(err_msg.contains("listener exploded"));
    }

    #[test]
    fn test_with_recovery_panic_string() {
        let job = "4c1e";
        let result: Result<()> = with_recovery(|| panic!("job {} vanished", job), "observer");
        assert!(result.unwrap_err().to_string().contains("job 4c1e vanished"));
    }

    #[tokio::test]
    async fn test_with_recovery_async_success() {
        let result = with_recovery_async(async { Ok(42) }, "async_test").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_recovery_async_panic_while_polled() {
        let result: Result<()> = with_recovery_async(
            async {
                tokio::task::yield_now().await;
                panic!("mid-flight");
            },
            "async_test",
        )
        .await;
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Async panic in async_test"));
        assert!(err_msg.contains("mid-flight"));
    }
}
