//! Set reconciliation: insert the source rows the target does not have.
//!
//! Rows are compared by full-value equality over the selected columns. There
//! is no key-based matching, so a changed row shows up as a new row and is
//! inserted next to the old one. Updates and deletes are never detected.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema::Table;
use crate::core::traits::{RowSink, RowSource};
use crate::core::value::Row;
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::{MigrateError, Result};

/// Outcome of comparing two row sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Rows present on both sides.
    pub identical: HashSet<Row>,
    /// Source rows missing from the target.
    pub to_insert: HashSet<Row>,
}

/// Split `source_rows` into rows already in `target_rows` and rows to insert.
pub fn reconcile(source_rows: &HashSet<Row>, target_rows: &HashSet<Row>) -> Reconciliation {
    let mut result = Reconciliation::default();
    for row in source_rows {
        if target_rows.contains(row) {
            result.identical.insert(row.clone());
        } else {
            result.to_insert.insert(row.clone());
        }
    }
    result
}

/// Summary of a synchronization run for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub table: String,
    pub columns: Vec<String>,
    pub identical: usize,
    pub inserted: usize,
    pub count_before: u64,
    pub count_after: u64,
}

/// Synchronize `columns` of `source_table` into `target_table`.
///
/// Reads both sides in full, inserts the difference with one `insert_many`
/// call and reports target counts before and after. Any insert failure,
/// including a batch rejection, aborts the sync and is returned.
pub async fn sync_table<S, T>(
    source: &S,
    target: &T,
    source_table: &Table,
    target_table: &Table,
    columns: &[String],
    diagnostics: &dyn DiagnosticsSink,
) -> Result<SyncReport>
where
    S: RowSource + ?Sized,
    T: RowSource + RowSink + ?Sized,
{
    if columns.is_empty() {
        return Err(MigrateError::Config("sync requires at least one column".into()));
    }
    for (side, table) in [("source", source_table), ("target", target_table)] {
        if let Some(missing) = columns.iter().find(|c| table.column(c).is_none()) {
            return Err(MigrateError::transfer(
                &table.name,
                format!("column '{}' not found in {} table", missing, side),
            ));
        }
    }

    info!("Fetching data from source table {}", source_table.full_name());
    let source_rows: HashSet<Row> = source
        .fetch_all(source_table, columns)
        .await?
        .into_iter()
        .collect();
    info!("Fetched {} distinct rows from source", source_rows.len());

    let count_before = target.count(target_table).await?;

    let mut report = SyncReport {
        table: target_table.name.clone(),
        columns: columns.to_vec(),
        identical: 0,
        inserted: 0,
        count_before,
        count_after: count_before,
    };

    if source_rows.is_empty() {
        warn!(
            "No data fetched from {}, skipping synchronization",
            source_table.full_name()
        );
        record_summary(&report, diagnostics);
        return Ok(report);
    }

    let target_rows: HashSet<Row> = target
        .fetch_all(target_table, columns)
        .await?
        .into_iter()
        .collect();

    let Reconciliation {
        identical,
        to_insert,
    } = reconcile(&source_rows, &target_rows);
    report.identical = identical.len();
    info!(
        "Identical rows: {}, new rows to insert: {}",
        identical.len(),
        to_insert.len()
    );

    if to_insert.is_empty() {
        info!("No new rows to insert into {}", target_table.full_name());
    } else {
        let rows: Vec<Row> = to_insert.into_iter().collect();
        let inserted = target.insert_many(target_table, columns, &rows).await?;
        report.inserted = inserted as usize;
        info!("Inserted {} new rows into {}", inserted, target_table.full_name());
    }

    report.count_after = target.count(target_table).await?;
    record_summary(&report, diagnostics);
    Ok(report)
}

fn record_summary(report: &SyncReport, diagnostics: &dyn DiagnosticsSink) {
    diagnostics.record(Diagnostic::ReconciliationSummary {
        table: report.table.clone(),
        identical: report.identical,
        inserted: report.inserted,
        count_before: report.count_before,
        count_after: report.count_after,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Column, ColumnType};
    use crate::diagnostics::CollectingDiagnostics;
    use crate::drivers::memory::{MemoryCall, MemoryDatabase};

    fn user(id: i64, email: &str) -> Row {
        Row::new().with("id", id).with("email", email)
    }

    fn set(rows: impl IntoIterator<Item = Row>) -> HashSet<Row> {
        rows.into_iter().collect()
    }

    fn user_tb(schema: &str) -> Table {
        Table::new(
            schema,
            "user_tb",
            vec![
                Column::new("id", ColumnType::Integer),
                Column::new("email", ColumnType::VarChar { length: Some(100) }),
                Column::new("status", ColumnType::Integer),
            ],
        )
        .unwrap()
    }

    fn cols() -> Vec<String> {
        vec!["id".to_string(), "email".to_string()]
    }

    #[test]
    fn test_reconcile_partitions_source() {
        let (a, b, c) = (user(1, "a@x"), user(2, "b@x"), user(3, "c@x"));

        let result = reconcile(&set([a.clone(), b.clone(), c.clone()]), &set([b.clone(), c.clone()]));

        assert_eq!(result.identical, set([b, c]));
        assert_eq!(result.to_insert, set([a]));
    }

    #[test]
    fn test_reconcile_after_insert_is_empty() {
        let source = set([user(1, "a@x"), user(2, "b@x"), user(3, "c@x")]);
        let mut target = set([user(2, "b@x"), user(3, "c@x")]);

        let first = reconcile(&source, &target);
        target.extend(first.to_insert);
        let second = reconcile(&source, &target);

        assert!(second.to_insert.is_empty());
        assert_eq!(second.identical.len(), 3);
    }

    #[test]
    fn test_changed_row_is_new_not_update() {
        let result = reconcile(&set([user(1, "new@x")]), &set([user(1, "old@x")]));

        assert!(result.identical.is_empty());
        assert_eq!(result.to_insert, set([user(1, "new@x")]));
    }

    #[tokio::test]
    async fn test_sync_inserts_only_missing_rows() {
        let source = MemoryDatabase::new();
        source.add_table(user_tb("hotpack"));
        source.seed(
            "hotpack",
            "user_tb",
            [user(1, "a@x"), user(2, "b@x"), user(3, "c@x")],
        );
        let target = MemoryDatabase::new();
        target.add_table(user_tb("dbo"));
        target.seed("dbo", "user_tb", [user(2, "b@x"), user(3, "c@x")]);
        let diag = CollectingDiagnostics::new();

        let report = sync_table(&source, &target, &user_tb("hotpack"), &user_tb("dbo"), &cols(), &diag)
            .await
            .unwrap();

        assert_eq!(report.identical, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.count_before, 2);
        assert_eq!(report.count_after, 3);
        assert_eq!(target.calls(), vec![MemoryCall::Insert("user_tb".into(), 1)]);
        assert_eq!(
            diag.count(|e| matches!(e, Diagnostic::ReconciliationSummary { inserted: 1, .. })),
            1
        );

        let again = sync_table(&source, &target, &user_tb("hotpack"), &user_tb("dbo"), &cols(), &diag)
            .await
            .unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.count_after, 3);
    }

    #[tokio::test]
    async fn test_sync_with_empty_source_does_nothing() {
        let source = MemoryDatabase::new();
        source.add_table(user_tb("hotpack"));
        let target = MemoryDatabase::new();
        target.add_table(user_tb("dbo"));
        target.seed("dbo", "user_tb", [user(9, "z@x")]);
        let diag = CollectingDiagnostics::new();

        let report = sync_table(&source, &target, &user_tb("hotpack"), &user_tb("dbo"), &cols(), &diag)
            .await
            .unwrap();

        assert_eq!(report.inserted, 0);
        assert_eq!(report.count_after, 1);
        assert!(target.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_insert_failure_aborts() {
        let keyed = |schema: &str| {
            Table::new(
                schema,
                "user_tb",
                vec![
                    Column::new("id", ColumnType::Integer).primary_key(),
                    Column::new("email", ColumnType::Text),
                ],
            )
            .unwrap()
        };
        let source = MemoryDatabase::new();
        source.add_table(keyed("hotpack"));
        source.seed("hotpack", "user_tb", [user(1, "changed@x")]);
        let target = MemoryDatabase::new();
        target.add_table(keyed("dbo"));
        target.seed("dbo", "user_tb", [user(1, "a@x")]);
        let diag = CollectingDiagnostics::new();

        let result = sync_table(&source, &target, &keyed("hotpack"), &keyed("dbo"), &cols(), &diag).await;

        assert!(matches!(result, Err(MigrateError::BatchRejected { .. })));
        assert_eq!(target.row_count("dbo", "user_tb"), 1);
        assert_eq!(diag.count(|e| matches!(e, Diagnostic::ReconciliationSummary { .. })), 0);
    }

    #[tokio::test]
    async fn test_sync_rejects_unknown_column() {
        let source = MemoryDatabase::new();
        let target = MemoryDatabase::new();
        let diag = CollectingDiagnostics::new();
        let columns = vec!["id".to_string(), "nickname".to_string()];

        let err = sync_table(&source, &target, &user_tb("hotpack"), &user_tb("dbo"), &columns, &diag)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("nickname"));
    }
}
