//! Core abstractions for database-agnostic migration.
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: SQL values and name-keyed rows
//! - [`traits`]: collaborator traits for introspection, reading, writing and type mapping
//!
//! Drivers (`drivers/mysql`, `drivers/mssql`, `drivers/memory`) implement the
//! traits; the engines in `transfer`, `coerce` and `reconcile` only see the traits.

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{Column, ColumnType, Table};
pub use traits::{
    ColumnMapping, RowSink, RowSource, SchemaIntrospector, SourceDatabase, TargetDatabase,
    TypeMapper, TypeMapping,
};
pub use value::{Row, SqlValue};
