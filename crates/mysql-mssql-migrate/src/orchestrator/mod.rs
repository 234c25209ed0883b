//! Migration orchestrator - main workflow coordinator.
//!
//! Resolves table names on both sides, then hands each table to the
//! [`TransferEngine`] (copy), the type mapper (schema copy) or the
//! reconciliation engine (sync). Tables run one after another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::core::schema::Table;
use crate::core::traits::{SourceDatabase, TargetDatabase, TypeMapper};
use crate::diagnostics::{Diagnostic, DiagnosticsSink, TableSkip, TracingDiagnostics};
use crate::drivers::{MssqlTarget, MysqlSource};
use crate::error::{MigrateError, Result};
use crate::reconcile::{self, SyncReport};
use crate::transfer::{JobStatus, TransferConfig, TransferEngine, TransferJob};
use crate::typemap::TableTypeMapper;

/// Migration orchestrator.
pub struct Orchestrator<S: ?Sized, T: ?Sized> {
    source: Arc<S>,
    target: Arc<T>,
    source_schema: String,
    target_schema: String,
    tables: Vec<String>,
    transfer: TransferConfig,
    mapper: Arc<dyn TypeMapper>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

/// Result of a data copy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: `completed` or `failed`.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Tables copied without a rejected batch.
    pub tables_success: usize,

    /// Tables whose transfer was aborted by a rejected batch.
    pub failed_tables: Vec<String>,

    /// Tables missing on one side and left alone.
    pub skipped_tables: Vec<String>,

    /// Rows committed to the target.
    pub rows_copied: u64,

    /// Rows excluded by the coercer.
    pub rows_skipped: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Per-table jobs, in run order.
    pub jobs: Vec<TransferJob>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a schema copy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Tables created on the target.
    pub created_tables: Vec<String>,
    /// Tables that already existed on the target.
    pub existing_tables: Vec<String>,
}

impl SchemaResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Orchestrator<MysqlSource, MssqlTarget> {
    /// Connect to the MySQL source and SQL Server target described by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let max_conns = config.migration.max_connections;
        let source = MysqlSource::new(&config.source, max_conns).await?;
        let target = MssqlTarget::new(&config.target, max_conns).await?;

        Ok(Self::new(
            Arc::new(source),
            Arc::new(target),
            &config.source.database,
            &config.target.schema,
        )
        .with_tables(config.migration.tables.clone())
        .with_transfer_config(config.transfer_config())
        .with_type_mapper(Arc::new(config.type_mapper())))
    }
}

impl<S, T> Orchestrator<S, T>
where
    S: SourceDatabase + ?Sized,
    T: TargetDatabase + ?Sized,
{
    /// Create an orchestrator over existing connections.
    ///
    /// For MySQL the source schema is the database name.
    pub fn new(
        source: Arc<S>,
        target: Arc<T>,
        source_schema: impl Into<String>,
        target_schema: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            source_schema: source_schema.into(),
            target_schema: target_schema.into(),
            tables: Vec::new(),
            transfer: TransferConfig::default(),
            mapper: Arc::new(TableTypeMapper::mysql_to_mssql()),
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    /// Tables copied by [`run`](Self::run). Empty means every source table.
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_transfer_config(mut self, config: TransferConfig) -> Self {
        self.transfer = config;
        self
    }

    pub fn with_type_mapper(mut self, mapper: Arc<dyn TypeMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Route diagnostic events somewhere other than `tracing`.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    fn engine(&self) -> TransferEngine<S, T> {
        TransferEngine::new(
            self.source.clone(),
            self.target.clone(),
            self.diagnostics.clone(),
            self.transfer.clone(),
        )
    }

    /// Create every source table on the target with mapped column types.
    ///
    /// Tables that already exist on the target are left untouched.
    pub async fn copy_schema(&self) -> Result<SchemaResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting schema copy: {}", run_id);

        let tables = self.source.list_tables(&self.source_schema).await?;
        info!("Found {} tables in source", tables.len());

        let engine = self.engine();
        let mut created_tables = Vec::new();
        let mut existing_tables = Vec::new();

        for table in &tables {
            if self
                .target
                .get_table(&self.target_schema, &table.name)
                .await?
                .is_some()
            {
                self.diagnostics.record(Diagnostic::TableSkipped {
                    table: table.name.clone(),
                    reason: TableSkip::AlreadyExists,
                });
                existing_tables.push(table.name.clone());
                continue;
            }

            engine
                .create_target_table(self.mapper.as_ref(), table, &self.target_schema)
                .await?;
            info!("Created table {}.{}", self.target_schema, table.name);
            created_tables.push(table.name.clone());
        }

        Ok(SchemaResult {
            run_id,
            started_at,
            completed_at: Utc::now(),
            created_tables,
            existing_tables,
        })
    }

    /// Copy the configured tables (every source table if none are configured).
    pub async fn run(&self) -> Result<MigrationResult> {
        self.copy_tables(&self.tables).await
    }

    /// Copy `names` (every source table when empty), one table at a time.
    ///
    /// A rejected batch fails only its own table; the run moves on to the
    /// next one. Tables missing on either side are skipped with a diagnostic.
    /// Connection and read errors abort the run.
    pub async fn copy_tables(&self, names: &[String]) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        let names: Vec<String> = if names.is_empty() {
            self.source
                .list_tables(&self.source_schema)
                .await?
                .into_iter()
                .map(|t| t.name)
                .collect()
        } else {
            names.to_vec()
        };

        let engine = self.engine();
        let mut jobs = Vec::with_capacity(names.len());
        let mut skipped_tables = Vec::new();

        for name in &names {
            let Some((source_table, target_table)) = self.resolve(name).await? else {
                skipped_tables.push(name.clone());
                continue;
            };
            let job = engine.transfer_table(&source_table, &target_table).await?;
            jobs.push(job);
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let failed_tables: Vec<String> = jobs
            .iter()
            .filter(|j| j.is_failed())
            .map(|j| j.table.clone())
            .collect();
        let tables_success = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .count();
        let rows_copied: u64 = jobs.iter().map(|j| j.copied_row_count).sum();
        let rows_skipped: u64 = jobs.iter().map(|j| j.skipped_row_count).sum();

        let rows_per_second = if duration > 0.0 {
            (rows_copied as f64 / duration) as u64
        } else {
            0
        };

        let status = if failed_tables.is_empty() {
            "completed"
        } else {
            "failed"
        };

        let result = MigrationResult {
            run_id,
            status: status.to_string(),
            duration_seconds: duration,
            started_at,
            completed_at,
            tables_success,
            failed_tables,
            skipped_tables,
            rows_copied,
            rows_skipped,
            rows_per_second,
            jobs,
        };

        info!(
            "Migration {}: {} tables, {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.jobs.len(),
            result.rows_copied,
            result.duration_seconds,
            result.rows_per_second
        );
        if !result.failed_tables.is_empty() {
            warn!("Failed tables: {}", result.failed_tables.join(", "));
        }

        Ok(result)
    }

    /// Copy a single table. A missing table or a rejected batch is an error.
    pub async fn copy_table(&self, name: &str) -> Result<TransferJob> {
        let source_table = self.source_table(name).await?;
        let target_table = self.target_table(name).await?;

        let job = self
            .engine()
            .transfer_table(&source_table, &target_table)
            .await?;

        if job.is_failed() {
            let reason = job
                .errors
                .last()
                .map(|e| e.reason.clone())
                .unwrap_or_else(|| "batch rejected".to_string());
            return Err(MigrateError::transfer(name, reason));
        }
        Ok(job)
    }

    /// Insert the source rows of `name` that the target lacks, comparing
    /// whole rows over `columns`.
    pub async fn sync_table(&self, name: &str, columns: &[String]) -> Result<SyncReport> {
        let source_table = self.source_table(name).await?;
        let target_table = self.target_table(name).await?;

        reconcile::sync_table(
            self.source.as_ref(),
            self.target.as_ref(),
            &source_table,
            &target_table,
            columns,
            self.diagnostics.as_ref(),
        )
        .await
    }

    /// Look `name` up on both sides, recording a skip when either is missing.
    async fn resolve(&self, name: &str) -> Result<Option<(Table, Table)>> {
        let source = self.source.get_table(&self.source_schema, name).await?;
        let target = self.target.get_table(&self.target_schema, name).await?;

        match (source, target) {
            (Some(source), Some(target)) => Ok(Some((source, target))),
            (None, _) => {
                self.diagnostics.record(Diagnostic::TableSkipped {
                    table: name.to_string(),
                    reason: TableSkip::MissingInSource,
                });
                Ok(None)
            }
            (Some(_), None) => {
                self.diagnostics.record(Diagnostic::TableSkipped {
                    table: name.to_string(),
                    reason: TableSkip::MissingInTarget,
                });
                Ok(None)
            }
        }
    }

    async fn source_table(&self, name: &str) -> Result<Table> {
        self.source
            .get_table(&self.source_schema, name)
            .await?
            .ok_or_else(|| {
                MigrateError::table_not_found(format!("{}.{}", self.source_schema, name), "source")
            })
    }

    async fn target_table(&self, name: &str) -> Result<Table> {
        self.target
            .get_table(&self.target_schema, name)
            .await?
            .ok_or_else(|| {
                MigrateError::table_not_found(format!("{}.{}", self.target_schema, name), "target")
            })
    }
}
