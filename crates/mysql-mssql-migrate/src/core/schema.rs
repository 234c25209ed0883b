//! Table and column metadata.
//!
//! These are read-only snapshots taken once per job from a schema
//! introspection collaborator. The same types describe both sides: a source
//! table carries source types, a mapped table carries target types.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

use super::value::SqlValue;

/// Column type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    /// Variable-length character data. `None` means unbounded (`MAX`).
    VarChar {
        length: Option<u32>,
    },
    Text,
    /// Boolean, or a single-byte integer used as one (`TINYINT(1)`).
    Boolean,
    DateTime,
    Decimal {
        precision: u8,
        scale: u8,
    },
    /// Anything else, carrying the dialect's own spelling.
    Other {
        raw: String,
    },
}

impl ColumnType {
    /// Normalized (upper-cased) type name used for mapping lookups.
    pub fn type_name(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::VarChar { .. } => "VARCHAR".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Decimal { .. } => "DECIMAL".to_string(),
            ColumnType::Other { raw } => raw.trim().to_uppercase(),
        }
    }

    /// Declared maximum length in characters, if the type has one.
    pub fn max_length(&self) -> Option<usize> {
        match self {
            ColumnType::VarChar { length: Some(n) } => Some(*n as usize),
            _ => None,
        }
    }

    /// Whether values of this type are character data.
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::VarChar { .. } | ColumnType::Text)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::VarChar { length: Some(n) } => write!(f, "VARCHAR({})", n),
            ColumnType::VarChar { length: None } => write!(f, "VARCHAR(MAX)"),
            ColumnType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({},{})", precision, scale)
            }
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name, unique within its table.
    pub name: String,

    /// Declared type.
    pub column_type: ColumnType,

    /// Whether NULL is allowed.
    pub nullable: bool,

    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,

    /// Whether the column is auto-increment / identity.
    pub is_auto_increment: bool,

    /// Declared default value.
    pub default_value: Option<SqlValue>,
}

impl Column {
    /// Create a nullable, non-key column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            is_primary_key: false,
            is_auto_increment: false,
            default_value: None,
        }
    }

    /// Mark the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as (part of) the primary key. Implies NOT NULL.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark the column auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }

    /// Set a default value.
    #[must_use]
    pub fn with_default(mut self, value: SqlValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Schema (MySQL database or SQL Server schema) name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in declaration order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a table descriptor, rejecting duplicate column names.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<Column>,
    ) -> Result<Self> {
        let table = Self {
            schema: schema.into(),
            name: name.into(),
            columns,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check that column names are unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.columns.len());
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(MigrateError::SchemaExtraction(format!(
                    "table {} declares column '{}' more than once",
                    self.full_name(),
                    col.name
                )));
            }
        }
        Ok(())
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key column names in declaration order.
    pub fn primary_key(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// Whether any auto-increment column is among `columns`.
    pub fn has_auto_increment_in(&self, columns: &[String]) -> bool {
        self.columns
            .iter()
            .any(|c| c.is_auto_increment && columns.contains(&c.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_column_names_rejected() {
        let result = Table::new(
            "shop",
            "orders",
            vec![
                Column::new("id", ColumnType::Integer),
                Column::new("id", ColumnType::Text),
            ],
        );
        assert!(matches!(result, Err(MigrateError::SchemaExtraction(_))));
    }

    #[test]
    fn test_type_name_is_normalized() {
        assert_eq!(ColumnType::Other { raw: " geometry ".into() }.type_name(), "GEOMETRY");
        assert_eq!(ColumnType::VarChar { length: Some(10) }.type_name(), "VARCHAR");
    }

    #[test]
    fn test_max_length_only_for_bounded_varchar() {
        assert_eq!(ColumnType::VarChar { length: Some(40) }.max_length(), Some(40));
        assert_eq!(ColumnType::VarChar { length: None }.max_length(), None);
        assert_eq!(ColumnType::Text.max_length(), None);
    }

    #[test]
    fn test_primary_key_columns() {
        let table = Table::new(
            "shop",
            "orders",
            vec![
                Column::new("id", ColumnType::Integer).primary_key().auto_increment(),
                Column::new("note", ColumnType::Text),
            ],
        )
        .unwrap();
        assert_eq!(table.primary_key(), vec!["id".to_string()]);
        assert!(table.has_auto_increment_in(&table.column_names()));
        assert!(!table.has_auto_increment_in(&["note".to_string()]));
        assert_eq!(table.full_name(), "shop.orders");
    }

    #[test]
    fn test_display() {
        assert_eq!(ColumnType::VarChar { length: Some(255) }.to_string(), "VARCHAR(255)");
        assert_eq!(
            ColumnType::Decimal { precision: 10, scale: 2 }.to_string(),
            "DECIMAL(10,2)"
        );
    }
}
