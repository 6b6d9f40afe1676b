//! Transaction wrapper used by the collection sync commit step.
//!
//! Wraps a `sqlx::Transaction` with panic-safe rollback: if the closure panics
//! mid-commit (e.g. a bug in a diff merge), the transaction is rolled back
//! instead of leaking a half-applied write.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::AppError;

/// Runs `body` inside a transaction, committing on `Ok` and rolling back on
/// `Err` or panic.
pub async fn run_in_transaction<'a, F, Fut, T>(pool: &'a PgPool, body: F) -> Result<T, AppError>
where
    F: FnOnce(&mut Transaction<'a, Postgres>) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut tx = pool.begin().await?;

    let result = AssertUnwindSafe(body(&mut tx)).catch_unwind().await;

    match result {
        Ok(Ok(value)) => {
            tx.commit().await?;
            Ok(value)
        }
        Ok(Err(e)) => {
            let _ = tx.rollback().await;
            Err(e)
        }
        Err(panic) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(
                    error = %rollback_err,
                    "rollback failed after a panic inside a transaction; data integrity cannot be guaranteed"
                );
                std::process::abort();
            }
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic during transaction".to_string());
            Err(AppError::Internal(format!(
                "transaction body panicked: {message}"
            )))
        }
    }
}
