//! Collaborator traits consumed by the migration engine.
//!
//! - [`SchemaIntrospector`]: reads table descriptors from a database
//! - [`RowSource`]: counts and reads rows
//! - [`RowSink`]: clears, fills and creates tables
//! - [`TypeMapper`]: maps a source column type to a target column type
//!
//! The engine awaits every call in sequence; implementations never see two
//! calls in flight from the same job.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{Column, ColumnType, Table};
use super::value::Row;

/// Read table metadata from a database.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// List every base table in `schema`, with columns.
    async fn list_tables(&self, schema: &str) -> Result<Vec<Table>>;

    /// Load a single table, or `None` if it does not exist.
    async fn get_table(&self, schema: &str, name: &str) -> Result<Option<Table>>;
}

/// Read rows from a database.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Total number of rows in the table.
    async fn count(&self, table: &Table) -> Result<u64>;

    /// Read up to `limit` rows starting at `offset`.
    ///
    /// Implementations order by the primary key when the table has one so
    /// that consecutive pages neither overlap nor skip rows. A cell that
    /// cannot be decoded must be reported as
    /// [`MigrateError::Undecodable`](crate::MigrateError::Undecodable).
    async fn fetch_page(&self, table: &Table, offset: u64, limit: u64) -> Result<Vec<Row>>;

    /// Read every row, restricted to `columns`.
    async fn fetch_all(&self, table: &Table, columns: &[String]) -> Result<Vec<Row>>;
}

/// Write rows and DDL to a database.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Remove every row from the table.
    async fn truncate(&self, table: &Table) -> Result<()>;

    /// Insert `rows` (restricted to `columns`) as one atomic unit.
    ///
    /// Returns the number of rows inserted. A data-level rejection must be
    /// reported as [`MigrateError::BatchRejected`](crate::MigrateError::BatchRejected).
    async fn insert_many(&self, table: &Table, columns: &[String], rows: &[Row]) -> Result<u64>;

    /// Create a table whose columns already carry target types.
    async fn create_table(&self, table: &Table) -> Result<()>;
}

/// A database usable as a migration source.
pub trait SourceDatabase: SchemaIntrospector + RowSource {}

impl<T: SchemaIntrospector + RowSource + ?Sized> SourceDatabase for T {}

/// A database usable as a migration target (also read during reconciliation).
pub trait TargetDatabase: SchemaIntrospector + RowSource + RowSink {}

impl<T: SchemaIntrospector + RowSource + RowSink + ?Sized> TargetDatabase for T {}

/// Maps column types between a source and a target dialect.
pub trait TypeMapper: Send + Sync {
    /// Get the source dialect name.
    fn source_dialect(&self) -> &str;

    /// Get the target dialect name.
    fn target_dialect(&self) -> &str;

    /// Map a source type to a target type. Never fails.
    fn map_type(&self, source: &ColumnType) -> TypeMapping;

    /// Map a column definition from source to target.
    fn map_column(&self, col: &Column) -> ColumnMapping {
        let mapping = self.map_type(&col.column_type);
        ColumnMapping {
            column: Column {
                column_type: mapping.target_type,
                ..col.clone()
            },
            fallback: mapping.fallback,
            warning: mapping.warning,
        }
    }
}

/// Result of mapping a column from source to target.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    /// Target column (same name, nullability and keys as the source).
    pub column: Column,
    /// Whether the default fallback type was substituted.
    pub fallback: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

/// Result of mapping a type from source to target.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMapping {
    /// Target type.
    pub target_type: ColumnType,
    /// Whether the default fallback type was substituted.
    pub fallback: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a mapping found in the lookup table.
    pub fn mapped(target_type: ColumnType) -> Self {
        Self {
            target_type,
            fallback: false,
            warning: None,
        }
    }

    /// Create a fallback mapping with a warning.
    pub fn fallback(target_type: ColumnType, warning: impl Into<String>) -> Self {
        Self {
            target_type,
            fallback: true,
            warning: Some(warning.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping_mapped() {
        let mapping = TypeMapping::mapped(ColumnType::Integer);
        assert_eq!(mapping.target_type, ColumnType::Integer);
        assert!(!mapping.fallback);
        assert!(mapping.warning.is_none());
    }

    #[test]
    fn test_type_mapping_fallback() {
        let mapping = TypeMapping::fallback(
            ColumnType::VarChar { length: Some(255) },
            "GEOMETRY has no mapping",
        );
        assert!(mapping.fallback);
        assert_eq!(mapping.warning.as_deref(), Some("GEOMETRY has no mapping"));
    }
}
