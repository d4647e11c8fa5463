//! Statements the loader issues.
//!
//! Feature rows are stored verbatim as `jsonb`. JSON travels as text and is
//! cast server-side (`$n::text::jsonb`), since the raw Postgres driver will
//! not bind a Rust string to a `jsonb` parameter directly.

use std::fmt::Write as _;

use dataset_loader_load_models::config::PARAMS_PER_ROW;
use dataset_loader_load_models::{DatasetId, GeometryKind};
use serde_json::{Map, Value};

use crate::{ConnectionPool, DatabaseValue, DbError, Transaction};

/// Removes every feature row previously loaded for `dataset_id`.
///
/// Runs auto-committed, outside any load transaction.
///
/// # Errors
///
/// Returns [`DbError`] if the stored operation fails.
pub async fn delete_dataset_features(
    pool: &dyn ConnectionPool,
    dataset_id: &DatasetId,
) -> Result<(), DbError> {
    pool.execute(
        "SELECT delete_dataset_features($1)",
        &[DatabaseValue::String(dataset_id.to_string())],
    )
    .await?;
    Ok(())
}

/// Recomputes the derived statistics for `dataset_id`.
///
/// # Errors
///
/// Returns [`DbError`] if the stored operation fails.
pub async fn refresh_dataset_statistics(
    pool: &dyn ConnectionPool,
    dataset_id: &DatasetId,
) -> Result<(), DbError> {
    pool.execute(
        "SELECT refresh_dataset_statistics($1)",
        &[DatabaseValue::String(dataset_id.to_string())],
    )
    .await?;
    Ok(())
}

/// Writes one kind's collection metadata to its column on the dataset row.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn update_dataset_metadata(
    tx: &dyn Transaction,
    dataset_id: &DatasetId,
    kind: GeometryKind,
    metadata: &Map<String, Value>,
) -> Result<u64, DbError> {
    let sql = format!(
        "UPDATE dataset SET {} = $2::text::jsonb WHERE tdei_dataset_id = $1",
        kind.metadata_column()
    );
    let metadata = Value::Object(metadata.clone()).to_string();

    tx.execute(
        &sql,
        &[
            DatabaseValue::String(dataset_id.to_string()),
            DatabaseValue::String(metadata),
        ],
    )
    .await
}

/// Builds a multi-row insert for `rows` features of `kind`.
#[must_use]
pub fn feature_insert_sql(kind: GeometryKind, rows: usize) -> String {
    let mut sql = format!(
        "INSERT INTO {} (tdei_dataset_id, feature, requested_by) VALUES ",
        kind.table()
    );

    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        let idx = i * PARAMS_PER_ROW + 1;
        let feature = idx + 1;
        let user = idx + 2;
        write!(sql, "(${idx}, ${feature}::text::jsonb, ${user})").unwrap_or_default();
    }

    sql
}

/// Inserts `features` as one multi-row statement and returns the rows
/// affected. Callers keep `features.len()` within the bind-parameter limit.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_feature_rows(
    tx: &dyn Transaction,
    dataset_id: &DatasetId,
    kind: GeometryKind,
    features: &[Value],
    requested_by: &str,
) -> Result<u64, DbError> {
    if features.is_empty() {
        return Ok(0);
    }

    let sql = feature_insert_sql(kind, features.len());
    let mut params = Vec::with_capacity(features.len() * PARAMS_PER_ROW);
    for feature in features {
        params.push(DatabaseValue::String(dataset_id.to_string()));
        params.push(DatabaseValue::String(feature.to_string()));
        params.push(DatabaseValue::String(requested_by.to_string()));
    }

    tx.execute(&sql, &params).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::memory::MemoryPool;

    fn dataset() -> DatasetId {
        DatasetId::new("d1").unwrap()
    }

    #[test]
    fn builds_numbered_placeholders() {
        assert_eq!(
            feature_insert_sql(GeometryKind::ExtensionLine, 2),
            "INSERT INTO extension_line (tdei_dataset_id, feature, requested_by) VALUES \
             ($1, $2::text::jsonb, $3), ($4, $5::text::jsonb, $6)"
        );
    }

    #[tokio::test]
    async fn inserts_rows_with_dataset_and_user() {
        let pool = MemoryPool::new();
        pool.add_dataset("d1");
        let tx = pool.begin().await.unwrap();

        let inserted = insert_feature_rows(
            tx.as_ref(),
            &dataset(),
            GeometryKind::Node,
            &[json!({"id": "n1"}), json!({"id": "n2"})],
            "u1",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(inserted, 2);
        let rows = pool.rows("node");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.dataset_id == "d1" && r.requested_by == "u1"));
        assert_eq!(rows[1].feature, json!({"id": "n2"}));
    }

    #[tokio::test]
    async fn empty_insert_issues_nothing() {
        let pool = MemoryPool::new();
        pool.add_dataset("d1");
        let tx = pool.begin().await.unwrap();

        let inserted = insert_feature_rows(tx.as_ref(), &dataset(), GeometryKind::Zone, &[], "u1")
            .await
            .unwrap();

        assert_eq!(inserted, 0);
        assert!(pool.statements().is_empty());
    }

    #[tokio::test]
    async fn metadata_lands_in_the_kind_column() {
        let pool = MemoryPool::new();
        pool.add_dataset("d1");
        let tx = pool.begin().await.unwrap();
        let mut metadata = Map::new();
        metadata.insert("dataSource".to_string(), json!(""));

        update_dataset_metadata(tx.as_ref(), &dataset(), GeometryKind::ExtensionPoint, &metadata)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            pool.metadata("d1", "ext_point_info"),
            Some(json!({"dataSource": ""}))
        );
    }

    #[tokio::test]
    async fn stored_operations_run_outside_transactions() {
        let pool = MemoryPool::new();
        pool.add_dataset("d1");

        delete_dataset_features(&pool, &dataset()).await.unwrap();
        refresh_dataset_statistics(&pool, &dataset()).await.unwrap();

        let statements = pool.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| !s.in_transaction));
        assert_eq!(pool.refreshed(), vec!["d1"]);
    }
}
