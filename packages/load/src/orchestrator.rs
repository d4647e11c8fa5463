//! End-to-end handling of one extract-load request.
//!
//! A load moves through [`LoadPhase`]s in order: the request is validated
//! and the archive located (`start`), the dataset's previous rows are
//! removed (`deleting`), every archive entry is written inside one
//! transaction (`loading`), and the dataset statistics are refreshed
//! (`aggregating`). Nothing is touched before the archive has been located,
//! and a failure in any phase up to and including `loading` leaves no new
//! rows behind.
//!
//! Within `loading`, entries are read one at a time. Each classified entry
//! becomes an insert unit; units of different kinds run concurrently on the
//! shared transaction while units of the same kind run one after another
//! in archive order.

use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Instant;

use dataset_loader_archive::{ArchiveEntry, ArchiveEntryStream, classify_entry};
use dataset_loader_database::{
    ConnectionPool, DbError, Transaction, queries, run_in_transaction,
};
use dataset_loader_load_models::{
    DataType, DatasetId, ExtractLoadRequest, FeatureCollection, GeometryKind, LoadConfig,
    LoadPhase, LoadSummary,
};
use dataset_loader_queue::{QueueMessage, RawMessage};
use dataset_loader_storage::StorageClient;
use futures::FutureExt as _;
use futures::StreamExt as _;
use futures::stream::FuturesUnordered;
use tokio::sync::oneshot;

use crate::{BatchInserter, InsertError, LoadError, ResultReporter};

/// Text reported for a committed load.
pub const SUCCESS_MESSAGE: &str = "Data loaded successfully";

/// Insert units allowed in flight before the archive reader pauses.
const MAX_PENDING_UNITS: usize = GeometryKind::ALL.len();

/// Runs loads against an injected pool, storage client, and reporter.
pub struct LoadOrchestrator {
    pool: Arc<dyn ConnectionPool>,
    storage: Arc<dyn StorageClient>,
    reporter: ResultReporter,
    config: LoadConfig,
}

impl std::fmt::Debug for LoadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn log_phase(dataset: &str, phase: LoadPhase) {
    log::info!("[{dataset}] phase={phase}");
}

/// The request's dataset id, or the message id when the request leaves it
/// blank.
///
/// # Errors
///
/// Returns [`LoadError::MissingDatasetId`] if both are blank.
pub fn resolve_dataset_id(
    message: &QueueMessage<ExtractLoadRequest>,
) -> Result<DatasetId, LoadError> {
    DatasetId::new(message.data.tdei_dataset_id.as_str())
        .or_else(|_| DatasetId::new(message.message_id.as_str()))
        .map_err(|_| LoadError::MissingDatasetId)
}

/// Name used in log lines for `message`: its dataset id when one resolves.
fn log_label(message: &QueueMessage<ExtractLoadRequest>) -> String {
    resolve_dataset_id(message).map_or_else(
        |_| message.message_id.clone(),
        |id| id.as_str().to_string(),
    )
}

impl LoadOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        storage: Arc<dyn StorageClient>,
        reporter: ResultReporter,
        config: LoadConfig,
    ) -> Self {
        Self {
            pool,
            storage,
            reporter,
            config,
        }
    }

    /// Handles a message straight off the bus. A payload that does not
    /// decode is treated as an empty request, so it still fails
    /// validation and gets a failure report.
    pub async fn handle_message(&self, message: RawMessage) -> bool {
        let message = message.map(|data| {
            serde_json::from_value::<ExtractLoadRequest>(data).unwrap_or_else(|e| {
                log::warn!("Undecodable extract-load payload: {e}");
                ExtractLoadRequest::default()
            })
        });
        self.handle(&message).await
    }

    /// Runs the load and publishes exactly one result. Returns whether the
    /// load succeeded.
    pub async fn handle(&self, message: &QueueMessage<ExtractLoadRequest>) -> bool {
        let result = self.load(message).await;
        let label = log_label(message);

        match result {
            Ok(summary) => {
                log::info!("[{label}] Load complete: {summary}");
                self.reporter.report(message, true, SUCCESS_MESSAGE).await;
                true
            }
            Err(e) => {
                log_phase(&label, LoadPhase::Failed);
                log::error!("[{label}] Load failed: {e}");
                self.reporter
                    .report(message, false, &e.report_message())
                    .await;
                false
            }
        }
    }

    /// Runs the load without reporting.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if validation, storage, deletion, or any part
    /// of the loading transaction fails. Statistics refresh failures are
    /// logged and do not fail the load.
    pub async fn load(
        &self,
        message: &QueueMessage<ExtractLoadRequest>,
    ) -> Result<LoadSummary, LoadError> {
        let started = Instant::now();
        let request = &message.data;
        let dataset_id = resolve_dataset_id(message);
        log_phase(&log_label(message), LoadPhase::Start);

        let data_type = DataType::from_str(request.data_type.trim())
            .map_err(|_| LoadError::UnsupportedDataType(request.data_type.clone()))?;
        let dataset_id = dataset_id?;

        match data_type {
            DataType::Osw => self.load_osw(&dataset_id, request, started).await,
            DataType::Flex | DataType::Pathways => Err(LoadError::NotImplemented(data_type)),
        }
    }

    async fn load_osw(
        &self,
        dataset_id: &DatasetId,
        request: &ExtractLoadRequest,
        started: Instant,
    ) -> Result<LoadSummary, LoadError> {
        let file = self
            .storage
            .get_file_from_url(&request.file_upload_path)
            .await?;
        log::info!(
            "[{dataset_id}] Resolved {} ({} bytes)",
            file.name(),
            file.size()
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );
        let reader = file.get_stream().await?;

        log_phase(dataset_id.as_str(), LoadPhase::Deleting);
        queries::delete_dataset_features(self.pool.as_ref(), dataset_id).await?;

        log_phase(dataset_id.as_str(), LoadPhase::Loading);
        let entries = ArchiveEntryStream::open(reader);
        let mut summary = self
            .load_entries(entries, dataset_id.clone(), request.user_id.clone())
            .await?;

        log_phase(dataset_id.as_str(), LoadPhase::Aggregating);
        if let Err(e) = queries::refresh_dataset_statistics(self.pool.as_ref(), dataset_id).await
        {
            log::error!("[{dataset_id}] Statistics refresh failed after commit: {e}");
        }

        summary.elapsed = started.elapsed();
        log_phase(dataset_id.as_str(), LoadPhase::Done);
        Ok(summary)
    }

    /// Writes every entry inside one transaction bounded by the configured
    /// timeout.
    async fn load_entries(
        &self,
        entries: ArchiveEntryStream,
        dataset_id: DatasetId,
        user_id: String,
    ) -> Result<LoadSummary, LoadError> {
        let inserter = BatchInserter::new(self.config.batch_size);
        let timeout = self.config.transaction_timeout;

        run_in_transaction(self.pool.as_ref(), move |tx| {
            async move {
                let load = load_archive(tx, entries, &dataset_id, &user_id, inserter);
                match tokio::time::timeout(timeout, load).await {
                    Ok(result) => result,
                    Err(_) => Err(LoadError::Database(DbError::Timeout(timeout))),
                }
            }
            .boxed()
        })
        .await
    }
}

/// Reads an entry and parses it, or explains why it is skipped.
async fn prepare_entry(
    entry: ArchiveEntry,
    dataset_id: &DatasetId,
    summary: &mut LoadSummary,
) -> Result<Option<(GeometryKind, FeatureCollection)>, LoadError> {
    if entry.is_directory() {
        return Ok(None);
    }
    summary.entries_seen += 1;

    let path = entry.path().to_string();
    let Some(kind) = classify_entry(&path) else {
        log::debug!("[{dataset_id}] Skipping unclassified entry {path}");
        summary.entries_skipped += 1;
        return Ok(None);
    };

    let bytes = entry.read().await?;
    match FeatureCollection::from_slice(&bytes) {
        Ok(collection) => {
            log::info!(
                "[{dataset_id}] {path}: {} {kind} features",
                collection.features.len()
            );
            Ok(Some((kind, collection)))
        }
        Err(e) => {
            log::warn!("[{dataset_id}] Skipping {path}: not a feature collection ({e})");
            summary.entries_skipped += 1;
            Ok(None)
        }
    }
}

/// One collection waiting to be written.
struct InsertUnit {
    kind: GeometryKind,
    collection: FeatureCollection,
    /// Resolves when the previous unit of the same kind has finished.
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

async fn run_unit(
    inserter: BatchInserter,
    tx: &dyn Transaction,
    dataset_id: &DatasetId,
    user_id: &str,
    unit: InsertUnit,
) -> Result<(GeometryKind, u64), InsertError> {
    let InsertUnit {
        kind,
        collection,
        previous,
        done,
    } = unit;

    if let Some(previous) = previous {
        // A dropped sender means the earlier unit failed and the load is
        // already being torn down.
        let _ = previous.await;
    }

    let rows = inserter
        .insert(tx, dataset_id, kind, &collection, user_id)
        .await?;
    let _ = done.send(());
    Ok((kind, rows))
}

/// Streams the archive into `tx`, interleaving entry reads with insert
/// units. The first failure drops every outstanding unit and is returned.
async fn load_archive(
    tx: &dyn Transaction,
    mut entries: ArchiveEntryStream,
    dataset_id: &DatasetId,
    user_id: &str,
    inserter: BatchInserter,
) -> Result<LoadSummary, LoadError> {
    let mut summary = LoadSummary::default();
    let mut tails: [Option<oneshot::Receiver<()>>; GeometryKind::ALL.len()] = Default::default();
    let mut pending = FuturesUnordered::new();
    let mut exhausted = false;

    loop {
        tokio::select! {
            entry = entries.next_entry(), if !exhausted && pending.len() < MAX_PENDING_UNITS => {
                let Some(entry) = entry else {
                    exhausted = true;
                    continue;
                };
                let Some((kind, collection)) = prepare_entry(entry?, dataset_id, &mut summary).await? else {
                    continue;
                };

                let (done, next_tail) = oneshot::channel();
                let previous = tails[kind.index()].replace(next_tail);
                let unit = InsertUnit { kind, collection, previous, done };
                pending.push(run_unit(inserter, tx, dataset_id, user_id, unit));
            }
            Some(result) = pending.next(), if !pending.is_empty() => {
                let (kind, rows) = result?;
                *summary.rows.entry(kind).or_default() += rows;
            }
            else => break,
        }
    }

    Ok(summary)
}
