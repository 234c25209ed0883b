//! In-memory database implementing every collaborator trait.
//!
//! Used by the test suites and by callers that want to dry-run a migration
//! plan without a server. Constraint handling mirrors what a real target
//! enforces at statement level: a batch with a NULL in a NOT NULL column or a
//! duplicate primary key is rejected as a whole and leaves the table unchanged.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::core::schema::Table;
use crate::core::traits::{RowSink, RowSource, SchemaIntrospector};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

/// A mutating call observed by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCall {
    Create(String),
    Truncate(String),
    /// Table name and number of rows in the batch.
    Insert(String, usize),
}

#[derive(Debug, Default)]
struct StoredTable {
    table: Option<Table>,
    rows: Vec<Row>,
    /// Row positions that fail to decode when read.
    undecodable: BTreeSet<usize>,
}

impl StoredTable {
    fn check_decodable(&self, table: &Table, start: usize, end: usize) -> Result<()> {
        match self.undecodable.range(start..end).next() {
            Some(index) => Err(MigrateError::undecodable(
                &table.name,
                format!("row {} holds a value that cannot be decoded", index),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<(String, String), StoredTable>,
    calls: Vec<MemoryCall>,
    offline: bool,
}

/// Thread-safe in-memory database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

fn key(schema: &str, name: &str) -> (String, String) {
    (schema.to_string(), name.to_string())
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table descriptor (replacing any previous one, keeping rows).
    pub fn add_table(&self, table: Table) {
        if let Ok(mut state) = self.state.lock() {
            let entry = state.tables.entry(key(&table.schema, &table.name)).or_default();
            entry.table = Some(table);
        }
    }

    /// Append rows directly, bypassing constraints and call recording.
    pub fn seed(&self, schema: &str, name: &str, rows: impl IntoIterator<Item = Row>) {
        if let Ok(mut state) = self.state.lock() {
            let entry = state.tables.entry(key(schema, name)).or_default();
            entry.rows.extend(rows);
        }
    }

    /// Make the row at `row_index` fail to decode on every read.
    pub fn mark_undecodable(&self, schema: &str, name: &str, row_index: usize) {
        if let Ok(mut state) = self.state.lock() {
            let entry = state.tables.entry(key(schema, name)).or_default();
            entry.undecodable.insert(row_index);
        }
    }

    /// Simulate a lost connection: every trait call fails until switched back.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Table descriptor, if registered.
    pub fn table(&self, schema: &str, name: &str) -> Option<Table> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(&key(schema, name)).and_then(|t| t.table.clone()))
    }

    /// Current rows, in insertion order.
    pub fn rows(&self, schema: &str, name: &str) -> Vec<Row> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(&key(schema, name)).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    pub fn row_count(&self, schema: &str, name: &str) -> usize {
        self.rows(schema, name).len()
    }

    /// Mutating calls recorded so far.
    pub fn calls(&self) -> Vec<MemoryCall> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    fn connect(&self) -> Result<MutexGuard<'_, State>> {
        let state = self
            .state
            .lock()
            .map_err(|e| MigrateError::pool(e, "memory database lock"))?;
        if state.offline {
            return Err(MigrateError::pool(
                "connection is closed",
                "memory database is offline",
            ));
        }
        Ok(state)
    }
}

impl State {
    fn stored(&self, table: &Table) -> Result<&StoredTable> {
        self.tables
            .get(&key(&table.schema, &table.name))
            .filter(|t| t.table.is_some())
            .ok_or_else(|| MigrateError::table_not_found(table.full_name(), "memory"))
    }

    fn stored_mut(&mut self, table: &Table) -> Result<&mut StoredTable> {
        self.tables
            .get_mut(&key(&table.schema, &table.name))
            .filter(|t| t.table.is_some())
            .ok_or_else(|| MigrateError::table_not_found(table.full_name(), "memory"))
    }
}

#[async_trait]
impl SchemaIntrospector for MemoryDatabase {
    async fn list_tables(&self, schema: &str) -> Result<Vec<Table>> {
        let state = self.connect()?;
        Ok(state
            .tables
            .iter()
            .filter(|((s, _), _)| s == schema)
            .filter_map(|(_, t)| t.table.clone())
            .collect())
    }

    async fn get_table(&self, schema: &str, name: &str) -> Result<Option<Table>> {
        let state = self.connect()?;
        Ok(state
            .tables
            .get(&key(schema, name))
            .and_then(|t| t.table.clone()))
    }
}

#[async_trait]
impl RowSource for MemoryDatabase {
    async fn count(&self, table: &Table) -> Result<u64> {
        let state = self.connect()?;
        Ok(state.stored(table)?.rows.len() as u64)
    }

    async fn fetch_page(&self, table: &Table, offset: u64, limit: u64) -> Result<Vec<Row>> {
        let state = self.connect()?;
        let stored = state.stored(table)?;
        let start = offset as usize;
        let end = start.saturating_add(limit as usize).min(stored.rows.len());
        stored.check_decodable(table, start, end.max(start))?;
        Ok(stored
            .rows
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_all(&self, table: &Table, columns: &[String]) -> Result<Vec<Row>> {
        let state = self.connect()?;
        let stored = state.stored(table)?;
        stored.check_decodable(table, 0, stored.rows.len())?;
        Ok(stored
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl RowSink for MemoryDatabase {
    async fn truncate(&self, table: &Table) -> Result<()> {
        let mut state = self.connect()?;
        state.stored_mut(table)?.rows.clear();
        state.calls.push(MemoryCall::Truncate(table.name.clone()));
        Ok(())
    }

    async fn insert_many(&self, table: &Table, columns: &[String], rows: &[Row]) -> Result<u64> {
        let mut state = self.connect()?;
        state
            .calls
            .push(MemoryCall::Insert(table.name.clone(), rows.len()));

        let stored = state.stored_mut(table)?;
        let schema = stored.table.clone().unwrap_or_else(|| table.clone());
        let pk = schema.primary_key();

        let mut next_identity = schema
            .columns
            .iter()
            .find(|c| c.is_auto_increment)
            .map(|c| {
                stored
                    .rows
                    .iter()
                    .filter_map(|r| match r.get(&c.name) {
                        Some(SqlValue::Int(v)) => Some(*v),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0)
                    + 1
            });

        let mut keys: HashSet<Vec<SqlValue>> = stored.rows.iter().map(|r| r.values_for(&pk)).collect();
        let mut staged = Vec::with_capacity(rows.len());

        for row in rows {
            let mut out: Row = columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                .collect();

            for col in &schema.columns {
                let missing = out.get(&col.name).map_or(true, SqlValue::is_null);
                if !missing {
                    continue;
                }
                if col.is_auto_increment {
                    if let Some(ref mut next) = next_identity {
                        out.insert(col.name.clone(), SqlValue::Int(*next));
                        *next += 1;
                        continue;
                    }
                }
                if let Some(ref default) = col.default_value {
                    out.insert(col.name.clone(), default.clone());
                    continue;
                }
                if !col.nullable {
                    return Err(MigrateError::rejected(
                        &table.name,
                        format!("Cannot insert the value NULL into column '{}'", col.name),
                    ));
                }
                out.insert(col.name.clone(), SqlValue::Null);
            }

            if !pk.is_empty() && !keys.insert(out.values_for(&pk)) {
                return Err(MigrateError::rejected(
                    &table.name,
                    format!(
                        "Violation of PRIMARY KEY constraint: duplicate key {:?}",
                        out.values_for(&pk)
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                    ),
                ));
            }
            staged.push(out);
        }

        let inserted = staged.len() as u64;
        stored.rows.extend(staged);
        debug!("memory: inserted {} rows into {}", inserted, table.full_name());
        Ok(inserted)
    }

    async fn create_table(&self, table: &Table) -> Result<()> {
        let mut state = self.connect()?;
        let entry = state
            .tables
            .entry(key(&table.schema, &table.name))
            .or_default();
        if entry.table.is_some() {
            return Err(MigrateError::rejected(
                &table.name,
                format!("There is already an object named '{}'", table.full_name()),
            ));
        }
        entry.table = Some(table.clone());
        state.calls.push(MemoryCall::Create(table.name.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Column, ColumnType};

    fn accounts() -> Table {
        Table::new(
            "dbo",
            "accounts",
            vec![
                Column::new("id", ColumnType::Integer).primary_key(),
                Column::new("owner", ColumnType::Text).not_null(),
                Column::new("note", ColumnType::Text),
            ],
        )
        .unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_fills_missing_nullable_columns() {
        let db = MemoryDatabase::new();
        db.add_table(accounts());

        let n = db
            .insert_many(
                &accounts(),
                &cols(&["id", "owner"]),
                &[Row::new().with("id", 1).with("owner", "ann")],
            )
            .await
            .unwrap();

        assert_eq!(n, 1);
        assert_eq!(db.rows("dbo", "accounts")[0].get("note"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_batch_with_duplicate_key_is_atomic() {
        let db = MemoryDatabase::new();
        db.add_table(accounts());
        let batch = [
            Row::new().with("id", 1).with("owner", "a"),
            Row::new().with("id", 1).with("owner", "b"),
        ];

        let err = db
            .insert_many(&accounts(), &cols(&["id", "owner"]), &batch)
            .await
            .unwrap_err();

        assert!(err.is_table_failure());
        assert_eq!(db.row_count("dbo", "accounts"), 0);
    }

    #[tokio::test]
    async fn test_null_in_not_null_column_rejected() {
        let db = MemoryDatabase::new();
        db.add_table(accounts());

        let err = db
            .insert_many(&accounts(), &cols(&["id"]), &[Row::new().with("id", 1)])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("'owner'"));
    }

    #[tokio::test]
    async fn test_identity_assigned_when_omitted() {
        let table = Table::new(
            "dbo",
            "events",
            vec![
                Column::new("id", ColumnType::Integer).primary_key().auto_increment(),
                Column::new("kind", ColumnType::Text),
            ],
        )
        .unwrap();
        let db = MemoryDatabase::new();
        db.add_table(table.clone());
        let rows = [Row::new().with("kind", "a"), Row::new().with("kind", "b")];

        db.insert_many(&table, &cols(&["kind"]), &rows).await.unwrap();

        let ids: Vec<_> = db
            .rows("dbo", "events")
            .iter()
            .map(|r| r.get("id").cloned())
            .collect();
        assert_eq!(ids, vec![Some(SqlValue::Int(1)), Some(SqlValue::Int(2))]);
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let db = MemoryDatabase::new();
        db.add_table(accounts());
        db.set_offline(true);

        assert!(matches!(db.count(&accounts()).await, Err(MigrateError::Pool { .. })));
        assert!(db.list_tables("dbo").await.is_err());
        assert!(db.truncate(&accounts()).await.is_err());

        db.set_offline(false);
        assert_eq!(db.count(&accounts()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_existing_table_rejected() {
        let db = MemoryDatabase::new();
        db.create_table(&accounts()).await.unwrap();
        assert!(db.create_table(&accounts()).await.is_err());
        assert_eq!(db.calls(), vec![MemoryCall::Create("accounts".into())]);
    }

    #[tokio::test]
    async fn test_fetch_all_projects_columns() {
        let db = MemoryDatabase::new();
        db.add_table(accounts());
        db.seed("dbo", "accounts", [Row::new().with("id", 1).with("owner", "x").with("note", "n")]);

        let rows = db.fetch_all(&accounts(), &cols(&["owner"])).await.unwrap();

        assert_eq!(rows, vec![Row::new().with("owner", "x")]);
    }

    #[tokio::test]
    async fn test_undecodable_row_fails_only_pages_that_contain_it() {
        let db = MemoryDatabase::new();
        db.add_table(accounts());
        db.seed(
            "dbo",
            "accounts",
            (0..4).map(|i| Row::new().with("id", i).with("owner", "x")),
        );
        db.mark_undecodable("dbo", "accounts", 2);

        assert_eq!(db.fetch_page(&accounts(), 0, 2).await.unwrap().len(), 2);
        let err = db.fetch_page(&accounts(), 2, 2).await.unwrap_err();
        assert!(matches!(err, MigrateError::Undecodable { .. }));
        assert!(err.is_table_failure());
        assert!(db.fetch_all(&accounts(), &cols(&["id"])).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_table_is_not_found() {
        let db = MemoryDatabase::new();
        assert!(matches!(
            db.count(&accounts()).await,
            Err(MigrateError::TableNotFound { .. })
        ));
        assert_eq!(db.get_table("dbo", "accounts").await.unwrap(), None);
    }
}
