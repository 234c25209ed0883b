//! Database driver implementations.
//!
//! Each driver implements the collaborator traits from [`crate::core::traits`]:
//!
//! - [`mysql`]: MySQL/MariaDB source (SQLx)
//! - [`mssql`]: SQL Server target (Tiberius + bb8)
//! - [`memory`]: in-memory database for tests and dry runs
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `SchemaIntrospector` and `RowSource` (and `RowSink` for a target)
//! 3. Register a type mapper for the new dialect pair in `typemap`

pub mod memory;
pub mod mssql;
pub mod mysql;

pub use memory::{MemoryCall, MemoryDatabase};
pub use mssql::MssqlTarget;
pub use mysql::MysqlSource;
