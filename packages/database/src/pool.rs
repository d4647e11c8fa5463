//! Connection pool and transaction boundary.
//!
//! Everything above this crate issues SQL through these two traits, so the
//! load pipeline can run against Postgres in production and against
//! [`crate::memory::MemoryPool`] in tests.

use async_trait::async_trait;

pub use switchy_database::DatabaseValue;

use crate::DbError;

/// Process-wide handle that hands out connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Runs one auto-committed statement and returns the rows affected.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails.
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DbError>;

    /// Opens a transaction on a dedicated connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if no connection could be acquired or `BEGIN`
    /// failed.
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;
}

/// An open transaction bound to one connection.
///
/// Statements may be issued from several tasks at once; implementations run
/// them one at a time on the connection. Dropping a transaction without
/// committing releases the connection and discards its work.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Runs one statement inside the transaction and returns the rows
    /// affected.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the statement fails. The transaction should
    /// then be rolled back.
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DbError>;

    /// Commits and releases the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if `COMMIT` fails.
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    /// Rolls back and releases the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if `ROLLBACK` fails.
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
