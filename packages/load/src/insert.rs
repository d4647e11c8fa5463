//! Chunked insertion of one feature collection.

use dataset_loader_database::{DbError, Transaction, queries};
use dataset_loader_load_models::config::MAX_BATCH_SIZE;
use dataset_loader_load_models::{DatasetId, FeatureCollection, GeometryKind};

/// Failure while writing one kind's collection.
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    /// The metadata update on the dataset row failed.
    #[error("Failed to write {kind} metadata: {source}")]
    Metadata {
        /// Kind being written.
        kind: GeometryKind,
        /// Underlying database error.
        source: DbError,
    },

    /// The metadata update matched no `dataset` row, so feature rows would
    /// have no parent.
    #[error("Dataset {dataset_id} has no dataset row to receive {kind} metadata")]
    MissingDataset {
        /// Kind being written.
        kind: GeometryKind,
        /// Dataset the update targeted.
        dataset_id: DatasetId,
    },

    /// A row chunk failed.
    #[error("Failed to insert {kind} chunk {chunk} ({rows} rows): {source}")]
    Chunk {
        /// Kind being written.
        kind: GeometryKind,
        /// Zero-based chunk index within the collection.
        chunk: usize,
        /// Rows in the failed chunk.
        rows: usize,
        /// Underlying database error.
        source: DbError,
    },
}

impl InsertError {
    /// Kind whose write failed.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        match self {
            Self::Metadata { kind, .. }
            | Self::MissingDataset { kind, .. }
            | Self::Chunk { kind, .. } => *kind,
        }
    }

    /// Underlying database error, if a statement failed.
    #[must_use]
    pub const fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Metadata { source, .. } | Self::Chunk { source, .. } => Some(source),
            Self::MissingDataset { .. } => None,
        }
    }
}

/// Writes a collection's metadata and then its features in bounded
/// multi-row statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchInserter {
    batch_size: usize,
}

impl BatchInserter {
    /// Creates an inserter issuing at most `batch_size` rows per
    /// statement, clamped to `1..=MAX_BATCH_SIZE`.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        let clamped = batch_size.clamp(1, MAX_BATCH_SIZE);
        if clamped != batch_size {
            log::warn!("Batch size {batch_size} out of range, using {clamped}");
        }
        Self {
            batch_size: clamped,
        }
    }

    /// Rows per statement.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Writes `collection` for `kind` inside `tx`.
    ///
    /// The metadata update runs first, then one insert per chunk in
    /// feature order, each awaited before the next starts. An empty
    /// collection still gets its metadata written.
    ///
    /// # Errors
    ///
    /// Returns [`InsertError`] on the first failing statement, or when the
    /// metadata update matches no dataset row; later statements are not
    /// attempted.
    pub async fn insert(
        &self,
        tx: &dyn Transaction,
        dataset_id: &DatasetId,
        kind: GeometryKind,
        collection: &FeatureCollection,
        requested_by: &str,
    ) -> Result<u64, InsertError> {
        let updated =
            queries::update_dataset_metadata(tx, dataset_id, kind, &collection.metadata())
                .await
                .map_err(|source| InsertError::Metadata { kind, source })?;
        if updated == 0 {
            return Err(InsertError::MissingDataset {
                kind,
                dataset_id: dataset_id.clone(),
            });
        }

        let mut inserted = 0u64;
        for (chunk, features) in collection.features.chunks(self.batch_size).enumerate() {
            let rows = queries::insert_feature_rows(tx, dataset_id, kind, features, requested_by)
                .await
                .map_err(|source| InsertError::Chunk {
                    kind,
                    chunk,
                    rows: features.len(),
                    source,
                })?;
            log::debug!("[{dataset_id}] {kind} chunk {chunk}: {rows} rows");
            inserted += rows;
        }

        log::info!("[{dataset_id}] Inserted {inserted} {kind} rows");
        Ok(inserted)
    }
}
