//! # mysql-mssql-migrate
//!
//! MySQL to SQL Server table migration library.
//!
//! This library provides the core functionality for moving tables from
//! MySQL (or MariaDB) into Microsoft SQL Server with support for:
//!
//! - **Schema copy** with a lookup-table type mapper and a lossy `VARCHAR(255)` fallback
//! - **Batched transfers** that truncate the target and copy the source page by page
//! - **Row coercion** (UTF-8 cleanup, length truncation, decimal rounding, null checks)
//! - **Set reconciliation** for inserting only the rows the target is missing
//!
//! ## Example
//!
//! ```rust,no_run
//! use mysql_mssql_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> mysql_mssql_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::connect(&config).await?;
//!     let result = orchestrator.run().await?;
//!     println!("Copied {} rows", result.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod coerce;
pub mod config;
pub mod core;
pub mod diagnostics;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use coerce::{RowCoercer, SkipReason};
pub use config::{Config, MigrationConfig, SourceConfig, SyncConfig, TargetConfig};
pub use self::core::{Column, ColumnType, Row, SqlValue, Table};
pub use diagnostics::{CollectingDiagnostics, Diagnostic, DiagnosticsSink, TracingDiagnostics};
pub use drivers::{MemoryDatabase, MssqlTarget, MysqlSource};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationResult, Orchestrator, SchemaResult};
pub use reconcile::{reconcile, sync_table, Reconciliation, SyncReport};
pub use transfer::{JobStatus, TransferConfig, TransferEngine, TransferJob};
pub use typemap::TableTypeMapper;
