//! In-memory [`ConnectionPool`] for tests.
//!
//! Understands exactly the statements [`crate::queries`] emits: multi-row
//! feature inserts, metadata updates, and the two stored operations.
//! Anything else is logged and treated as a no-op. Transactions stage their
//! changes and apply them on commit, so rollback and dropped transactions
//! leave committed state untouched.
//!
//! Like the real schema, feature rows must reference an existing `dataset`
//! row and metadata updates only touch rows that exist. Dataset rows are
//! created with [`MemoryPool::add_dataset`] or implicitly by
//! [`MemoryPool::seed`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dataset_loader_load_models::config::PARAMS_PER_ROW;
use serde_json::Value;

use crate::{ConnectionPool, DatabaseValue, DbError, Transaction};

/// One feature row as stored in a feature table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// `tdei_dataset_id` column.
    pub dataset_id: String,
    /// `feature` column, parsed back into JSON.
    pub feature: Value,
    /// `requested_by` column.
    pub requested_by: String,
}

/// A statement as it reached the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    /// SQL text.
    pub sql: String,
    /// Bound parameter count.
    pub param_count: usize,
    /// Whether it ran inside a transaction.
    pub in_transaction: bool,
}

#[derive(Debug, Clone)]
enum Change {
    Insert {
        table: String,
        rows: Vec<StoredRow>,
    },
    Metadata {
        dataset_id: String,
        column: String,
        value: Value,
    },
    DeleteDataset(String),
    Refresh(String),
}

#[derive(Debug)]
struct Trigger {
    needle: String,
    occurrence: usize,
    seen: usize,
}

impl Trigger {
    fn new(needle: &str, occurrence: usize) -> Self {
        Self {
            needle: needle.to_string(),
            occurrence,
            seen: 0,
        }
    }

    fn hit(&mut self, sql: &str) -> bool {
        if !sql.contains(&self.needle) {
            return false;
        }
        self.seen += 1;
        self.seen == self.occurrence
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Vec<StoredRow>>,
    /// `dataset` rows: id to the non-null `*_info` columns.
    datasets: BTreeMap<String, BTreeMap<String, Value>>,
    refreshed: Vec<String>,
    statements: Vec<ExecutedStatement>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
    failures: Vec<Trigger>,
    stalls: Vec<Trigger>,
    delay: Option<Duration>,
}

impl State {
    fn apply(&mut self, change: Change) {
        match change {
            Change::Insert { table, rows } => {
                self.tables.entry(table).or_default().extend(rows);
            }
            Change::Metadata {
                dataset_id,
                column,
                value,
            } => {
                if let Some(columns) = self.datasets.get_mut(&dataset_id) {
                    columns.insert(column, value);
                }
            }
            Change::DeleteDataset(dataset_id) => {
                for rows in self.tables.values_mut() {
                    rows.retain(|row| row.dataset_id != dataset_id);
                }
                if let Some(columns) = self.datasets.get_mut(&dataset_id) {
                    columns.clear();
                }
            }
            Change::Refresh(dataset_id) => self.refreshed.push(dataset_id),
        }
    }
}

/// Shared in-memory database. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    state: Arc<Mutex<State>>,
}

impl MemoryPool {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the `occurrence`-th statement (1-based, counted across the
    /// pool and its transactions) containing `needle` fail with a unique
    /// violation.
    pub fn fail_on(&self, needle: &str, occurrence: usize) {
        self.lock().failures.push(Trigger::new(needle, occurrence));
    }

    /// Makes the `occurrence`-th statement containing `needle` never
    /// complete.
    pub fn stall_on(&self, needle: &str, occurrence: usize) {
        self.lock().stalls.push(Trigger::new(needle, occurrence));
    }

    /// Sleeps for `delay` before every transactional statement, while
    /// holding the transaction's connection.
    pub fn set_statement_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Creates an empty `dataset` row for `dataset_id`.
    pub fn add_dataset(&self, dataset_id: &str) {
        self.lock()
            .datasets
            .entry(dataset_id.to_string())
            .or_default();
    }

    /// Seeds committed rows directly, creating their dataset rows.
    pub fn seed(&self, table: &str, rows: Vec<StoredRow>) {
        let mut state = self.lock();
        for row in &rows {
            state.datasets.entry(row.dataset_id.clone()).or_default();
        }
        state.apply(Change::Insert {
            table: table.to_string(),
            rows,
        });
    }

    /// Committed rows of `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Committed metadata written to `column` for `dataset_id`.
    #[must_use]
    pub fn metadata(&self, dataset_id: &str, column: &str) -> Option<Value> {
        self.lock()
            .datasets
            .get(dataset_id)
            .and_then(|columns| columns.get(column))
            .cloned()
    }

    /// Dataset ids whose statistics were refreshed, in call order.
    #[must_use]
    pub fn refreshed(&self) -> Vec<String> {
        self.lock().refreshed.clone()
    }

    /// Every statement that was attempted, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.lock().statements.clone()
    }

    /// Row counts of each insert statement attempted against `table`.
    #[must_use]
    pub fn insert_sizes(&self, table: &str) -> Vec<usize> {
        let prefix = format!("INSERT INTO {table} ");
        self.lock()
            .statements
            .iter()
            .filter(|s| s.sql.starts_with(&prefix))
            .map(|s| s.param_count / PARAMS_PER_ROW)
            .collect()
    }

    /// Transactions opened.
    #[must_use]
    pub fn begins(&self) -> usize {
        self.lock().begins
    }

    /// Transactions committed.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    /// Transactions rolled back explicitly.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    /// Records the statement and checks the injected triggers.
    async fn admit(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        in_transaction: bool,
    ) -> Result<(), DbError> {
        let (fail, stall) = {
            let mut state = self.lock();
            state.statements.push(ExecutedStatement {
                sql: sql.to_string(),
                param_count: params.len(),
                in_transaction,
            });
            let fail = state
                .failures
                .iter_mut()
                .map(|t| t.hit(sql))
                .fold(false, |a, b| a || b);
            let stall = state
                .stalls
                .iter_mut()
                .map(|t| t.hit(sql))
                .fold(false, |a, b| a || b);
            (fail, stall)
        };

        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(DbError::UniqueViolation {
                message: format!("injected failure: {sql}"),
            });
        }
        Ok(())
    }
}

fn text(value: Option<&DatabaseValue>) -> String {
    match value {
        Some(DatabaseValue::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn json(value: Option<&DatabaseValue>) -> Value {
    serde_json::from_str(&text(value)).unwrap_or(Value::Null)
}

/// Maps a statement onto the change it would make, with its row count,
/// checked against committed dataset rows.
fn interpret(
    state: &State,
    sql: &str,
    params: &[DatabaseValue],
) -> Result<(Option<Change>, u64), DbError> {
    if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
        let table = rest.split_whitespace().next().unwrap_or_default().to_string();
        let rows: Vec<StoredRow> = params
            .chunks_exact(PARAMS_PER_ROW)
            .map(|row| StoredRow {
                dataset_id: text(row.first()),
                feature: json(row.get(1)),
                requested_by: text(row.get(2)),
            })
            .collect();

        if let Some(orphan) = rows
            .iter()
            .find(|row| !state.datasets.contains_key(&row.dataset_id))
        {
            return Err(DbError::ForeignKeyViolation {
                message: format!(
                    "insert or update on table \"{table}\" violates foreign key constraint: \
                     Key (tdei_dataset_id)=({}) is not present in table \"dataset\"",
                    orphan.dataset_id
                ),
            });
        }

        let count = rows.len() as u64;
        return Ok((Some(Change::Insert { table, rows }), count));
    }

    if let Some(rest) = sql.strip_prefix("UPDATE dataset SET ") {
        let dataset_id = text(params.first());
        if !state.datasets.contains_key(&dataset_id) {
            return Ok((None, 0));
        }
        let column = rest.split_whitespace().next().unwrap_or_default().to_string();
        let change = Change::Metadata {
            dataset_id,
            column,
            value: json(params.get(1)),
        };
        return Ok((Some(change), 1));
    }

    if sql.contains("delete_dataset_features(") {
        return Ok((Some(Change::DeleteDataset(text(params.first()))), 1));
    }

    if sql.contains("refresh_dataset_statistics(") {
        return Ok((Some(Change::Refresh(text(params.first()))), 1));
    }

    log::debug!("Memory pool ignoring statement: {sql}");
    Ok((None, 0))
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DbError> {
        self.admit(sql, params, false).await?;
        let mut state = self.lock();
        let (change, count) = interpret(&state, sql, params)?;
        if let Some(change) = change {
            state.apply(change);
        }
        drop(state);
        Ok(count)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        self.lock().begins += 1;
        Ok(Box::new(MemoryTransaction {
            pool: self.clone(),
            staged: Mutex::new(Vec::new()),
            connection: tokio::sync::Mutex::new(()),
        }))
    }
}

struct MemoryTransaction {
    pool: MemoryPool,
    staged: Mutex<Vec<Change>>,
    connection: tokio::sync::Mutex<()>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DbError> {
        let _connection = self.connection.lock().await;

        let delay = self.pool.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.pool.admit(sql, params, true).await?;
        let (change, count) = interpret(&self.pool.lock(), sql, params)?;
        if let Some(change) = change {
            self.staged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(change);
        }
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let staged = self
            .staged
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = self.pool.lock();
        for change in staged {
            state.apply(change);
        }
        state.commits += 1;
        drop(state);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.pool.lock().rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(values: &[&str]) -> Vec<DatabaseValue> {
        values
            .iter()
            .map(|v| DatabaseValue::String((*v).to_string()))
            .collect()
    }

    const NODE_INSERT: &str =
        "INSERT INTO node (tdei_dataset_id, feature, requested_by) VALUES ($1, $2::text::jsonb, $3)";

    #[tokio::test]
    async fn staged_rows_only_become_visible_on_commit() {
        let pool = MemoryPool::new();
        pool.add_dataset("d1");
        let tx = pool.begin().await.unwrap();

        tx.execute(
            "INSERT INTO edge (tdei_dataset_id, feature, requested_by) VALUES ($1, $2::text::jsonb, $3)",
            &params(&["d1", r#"{"id":"e1"}"#, "u1"]),
        )
        .await
        .unwrap();
        assert!(pool.rows("edge").is_empty());

        tx.commit().await.unwrap();
        let rows = pool.rows("edge");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feature, serde_json::json!({"id": "e1"}));
        assert_eq!(rows[0].requested_by, "u1");
    }

    #[tokio::test]
    async fn delete_only_touches_the_named_dataset() {
        let pool = MemoryPool::new();
        for id in ["d1", "d2"] {
            pool.seed(
                "node",
                vec![StoredRow {
                    dataset_id: id.to_string(),
                    feature: Value::Null,
                    requested_by: "u".to_string(),
                }],
            );
        }

        pool.execute("SELECT delete_dataset_features($1)", &params(&["d1"]))
            .await
            .unwrap();

        let rows = pool.rows("node");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dataset_id, "d2");
    }

    #[tokio::test]
    async fn injected_failure_hits_only_the_requested_occurrence() {
        let pool = MemoryPool::new();
        pool.fail_on("refresh_dataset_statistics", 2);
        let sql = "SELECT refresh_dataset_statistics($1)";

        assert!(pool.execute(sql, &params(&["d1"])).await.is_ok());
        assert!(matches!(
            pool.execute(sql, &params(&["d1"])).await,
            Err(DbError::UniqueViolation { .. })
        ));
        assert!(pool.execute(sql, &params(&["d1"])).await.is_ok());
        assert_eq!(pool.refreshed(), vec!["d1", "d1"]);
    }

    #[tokio::test]
    async fn feature_rows_need_a_dataset_row() {
        let pool = MemoryPool::new();
        let tx = pool.begin().await.unwrap();

        let err = tx
            .execute(NODE_INSERT, &params(&["d9", "{}", "u1"]))
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
        assert!(err.to_string().contains("(d9)"));
    }

    #[tokio::test]
    async fn metadata_update_without_dataset_row_affects_nothing() {
        let pool = MemoryPool::new();
        let tx = pool.begin().await.unwrap();

        let updated = tx
            .execute(
                "UPDATE dataset SET node_info = $2::text::jsonb WHERE tdei_dataset_id = $1",
                &params(&["d9", "{}"]),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(updated, 0);
        assert_eq!(pool.metadata("d9", "node_info"), None);
    }

    #[tokio::test]
    async fn delete_clears_metadata_but_keeps_the_dataset_row() {
        let pool = MemoryPool::new();
        pool.add_dataset("d1");
        let update = "UPDATE dataset SET zone_info = $2::text::jsonb WHERE tdei_dataset_id = $1";
        pool.execute(update, &params(&["d1", r#"{"region":"x"}"#]))
            .await
            .unwrap();

        pool.execute("SELECT delete_dataset_features($1)", &params(&["d1"]))
            .await
            .unwrap();

        assert_eq!(pool.metadata("d1", "zone_info"), None);
        assert_eq!(pool.execute(NODE_INSERT, &params(&["d1", "{}", "u1"])).await.unwrap(), 1);
    }
}
