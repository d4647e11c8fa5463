//! All-or-nothing execution of a unit of work.

use futures::future::BoxFuture;

use crate::{ConnectionPool, DbError, Transaction};

/// Runs `work` inside a fresh transaction.
///
/// Commits when `work` returns `Ok` and rolls back when it returns `Err`.
/// A failed rollback is logged and the original error is returned. The
/// connection is released on every path, including when the returned
/// future is dropped early.
///
/// `work` receives the transaction by reference, so anything it captures
/// must be owned.
///
/// # Errors
///
/// Returns the error from `work`, or a [`DbError`] (converted into `E`) if
/// the transaction could not be opened or committed.
pub async fn run_in_transaction<T, E, F>(pool: &dyn ConnectionPool, work: F) -> Result<T, E>
where
    F: for<'t> FnOnce(&'t dyn Transaction) -> BoxFuture<'t, Result<T, E>>,
    E: From<DbError> + std::fmt::Display,
{
    let tx = pool.begin().await?;
    let result = work(tx.as_ref()).await;

    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            log::warn!("Rolling back transaction: {e}");
            if let Err(rollback_err) = tx.rollback().await {
                log::error!("Rollback failed: {rollback_err}");
            }
            Err(e)
        }
    }
}
