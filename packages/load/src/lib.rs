#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dataset load pipeline.
//!
//! [`LoadOrchestrator`] takes one extract-load request from start to
//! finish: it resolves the archive in storage, deletes the dataset's
//! previous rows, streams every entry into a single transaction through
//! [`BatchInserter`], refreshes the dataset statistics, and publishes the
//! outcome with [`ResultReporter`].

pub mod insert;
pub mod orchestrator;
pub mod report;

#[cfg(test)]
mod fixtures;

use dataset_loader_archive::ArchiveError;
use dataset_loader_database::DbError;
use dataset_loader_load_models::DataType;
use dataset_loader_storage::StorageError;

pub use insert::{BatchInserter, InsertError};
pub use orchestrator::{LoadOrchestrator, SUCCESS_MESSAGE, resolve_dataset_id};
pub use report::ResultReporter;

/// Errors that abort a load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// `data_type` is not one of the known dataset families.
    #[error("Invalid data type: {0:?}")]
    UnsupportedDataType(String),

    /// The dataset family is known but has no loader yet.
    #[error("Loading {0} datasets is not implemented")]
    NotImplemented(DataType),

    /// Neither the payload nor the envelope names a dataset.
    #[error("Request does not name a dataset")]
    MissingDatasetId,

    /// The archive could not be located or opened.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The archive could not be spooled, or is corrupt or truncated.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// A statement outside the feature inserts failed, or the transaction
    /// timed out.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Writing one kind's rows failed.
    #[error(transparent)]
    Insert(#[from] InsertError),
}

impl LoadError {
    /// Text sent back to the requester.
    #[must_use]
    pub fn report_message(&self) -> String {
        match self {
            Self::UnsupportedDataType(_) => "Invalid data type".to_string(),
            other => format!("Error processing dataset: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_messages() {
        assert_eq!(
            LoadError::UnsupportedDataType("bogus".to_string()).report_message(),
            "Invalid data type"
        );
        assert_eq!(
            LoadError::NotImplemented(DataType::Flex).report_message(),
            "Error processing dataset: Loading flex datasets is not implemented"
        );
    }
}
