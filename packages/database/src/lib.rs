#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Database boundary, transactions, queries, and migrations for the dataset
//! loader.
//!
//! The load pipeline talks to Postgres only through the [`ConnectionPool`]
//! and [`Transaction`] traits. [`db::PostgresPool`] adapts a
//! `switchy_database` connection to them, and `switchy_schema` applies the
//! embedded SQL migrations that create the feature tables and the two stored
//! operations the loader calls by name.

pub mod db;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod pool;
pub mod queries;
pub mod transaction;

use std::time::Duration;

use include_dir::{Dir, include_dir};
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

pub use pool::{ConnectionPool, DatabaseValue, Transaction};
pub use transaction::run_in_transaction;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

const UNIQUE_VIOLATION: &str = "duplicate key value violates unique constraint";
const FOREIGN_KEY_VIOLATION: &str = "violates foreign key constraint";
const STATEMENT_TIMEOUT: &str = "canceling statement due to statement timeout";

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error that is not a constraint violation.
    #[error("Database error: {0}")]
    Database(#[source] switchy_database::DatabaseError),

    /// A row collided with an existing unique key.
    #[error("Unique constraint violated: {message}")]
    UniqueViolation {
        /// Server message naming the constraint.
        message: String,
    },

    /// A row referenced a parent that does not exist.
    #[error("Foreign key constraint violated: {message}")]
    ForeignKeyViolation {
        /// Server message naming the constraint.
        message: String,
    },

    /// The server cancelled a statement that ran past `statement_timeout`.
    #[error("Statement timed out: {message}")]
    StatementTimeout {
        /// Server message.
        message: String,
    },

    /// A transaction did not finish within its deadline and was abandoned.
    #[error("Transaction exceeded its {0:?} deadline")]
    Timeout(Duration),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),
}

impl From<switchy_database::DatabaseError> for DbError {
    fn from(e: switchy_database::DatabaseError) -> Self {
        let message = e.to_string();
        if message.contains(UNIQUE_VIOLATION) {
            Self::UniqueViolation { message }
        } else if message.contains(FOREIGN_KEY_VIOLATION) {
            Self::ForeignKeyViolation { message }
        } else if message.contains(STATEMENT_TIMEOUT) {
            Self::StatementTimeout { message }
        } else {
            Self::Database(e)
        }
    }
}

impl DbError {
    /// Whether this error is a uniqueness or referential-integrity
    /// violation raised by the data itself.
    #[must_use]
    pub const fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::UniqueViolation { .. } | Self::ForeignKeyViolation { .. }
        )
    }

    /// Whether this error came from a client or server side timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::StatementTimeout { .. } | Self::Timeout(_))
    }
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_helper_predicates() {
        let unique = DbError::UniqueViolation {
            message: "dup".to_string(),
        };
        let fk = DbError::ForeignKeyViolation {
            message: "fk".to_string(),
        };
        let timeout = DbError::Timeout(Duration::from_secs(1));

        assert!(unique.is_constraint_violation());
        assert!(fk.is_constraint_violation());
        assert!(!timeout.is_constraint_violation());
        assert!(timeout.is_timeout());
        assert!(!unique.is_timeout());
    }

    #[test]
    fn embeds_migrations() {
        assert!(MIGRATIONS_DIR.dirs().count() > 0);
    }
}
