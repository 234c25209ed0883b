//! Batch transfer engine: truncate the target table, then copy the source
//! table in bounded pages, coercing every row on the way.
//!
//! The engine is strictly sequential. A page is read, coerced and written as
//! one statement before the next page is requested, so at most one batch of
//! rows is held in memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coerce::RowCoercer;
use crate::core::schema::Table;
use crate::core::traits::{RowSink, RowSource, TypeMapper};
use crate::core::value::Row;
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::{MigrateError, Result};
use crate::typemap::map_table;

/// Lifecycle of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// A batch was rejected; the rest of the table was not copied.
    Failed,
}

/// A row (or batch) that did not make it into the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// Zero-based position of the row in the paged source read.
    pub row_index: u64,
    pub reason: String,
}

/// Transfer job for a single table.
///
/// Created per table per run and discarded afterwards; nothing is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    /// Table name.
    pub table: String,

    /// Source row count, snapshotted once at the start.
    pub total_row_count: u64,

    /// Rows per page.
    pub batch_size: u64,

    /// Rows committed to the target so far.
    pub copied_row_count: u64,

    /// Rows excluded by the coercer.
    pub skipped_row_count: u64,

    /// Skipped rows and rejected batches, in the order they happened.
    pub errors: Vec<RowError>,

    /// Current status.
    pub status: JobStatus,
}

impl TransferJob {
    /// Create a pending job.
    pub fn new(table: impl Into<String>, total_row_count: u64, batch_size: u64) -> Self {
        Self {
            table: table.into(),
            total_row_count,
            batch_size,
            copied_row_count: 0,
            skipped_row_count: 0,
            errors: Vec::new(),
            status: JobStatus::Pending,
        }
    }

    /// Whether a batch was rejected.
    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// Rows read from the source and accounted for.
    pub fn processed_row_count(&self) -> u64 {
        self.copied_row_count + self.skipped_row_count
    }
}

/// One page of the source table: rows `[offset, offset + limit)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    pub offset: u64,
    pub limit: u64,
}

/// Split `[0, total)` into consecutive pages of `batch_size` rows.
///
/// The last page may be smaller. Pages never overlap and leave no gaps.
/// A zero `batch_size` yields no pages. Ranges are produced on demand.
pub fn partition_batches(total: u64, batch_size: u64) -> Batches {
    Batches {
        next_offset: 0,
        total: if batch_size == 0 { 0 } else { total },
        batch_size,
    }
}

/// Iterator over the pages of a table, see [`partition_batches`].
#[derive(Debug, Clone)]
pub struct Batches {
    next_offset: u64,
    total: u64,
    batch_size: u64,
}

impl Iterator for Batches {
    type Item = BatchRange;

    fn next(&mut self) -> Option<BatchRange> {
        if self.next_offset >= self.total {
            return None;
        }
        let offset = self.next_offset;
        let limit = self.batch_size.min(self.total - offset);
        self.next_offset += limit;
        Some(BatchRange { offset, limit })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.batch_size {
            0 => 0,
            size => (self.total - self.next_offset).div_ceil(size),
        };
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Number of rows per page / insert statement.
    pub batch_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Transfer engine for moving one table at a time between databases.
pub struct TransferEngine<S: ?Sized, T: ?Sized> {
    source: Arc<S>,
    target: Arc<T>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    config: TransferConfig,
    /// Optional shared counter for real-time progress reporting.
    progress_counter: Option<Arc<AtomicU64>>,
}

impl<S, T> TransferEngine<S, T>
where
    S: RowSource + ?Sized,
    T: RowSink + ?Sized,
{
    /// Create a new transfer engine.
    pub fn new(
        source: Arc<S>,
        target: Arc<T>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            diagnostics,
            config,
            progress_counter: None,
        }
    }

    /// Set a shared progress counter, bumped after every committed batch.
    pub fn with_progress_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress_counter = Some(counter);
        self
    }

    /// Create the target table for `source_table` with mapped column types.
    ///
    /// Returns the target descriptor that was created.
    pub async fn create_target_table(
        &self,
        mapper: &dyn TypeMapper,
        source_table: &Table,
        target_schema: &str,
    ) -> Result<Table> {
        let target_table = map_table(mapper, source_table, target_schema, self.diagnostics.as_ref());
        self.target.create_table(&target_table).await?;
        debug!("Created table {}", target_table.full_name());
        Ok(target_table)
    }

    /// Copy `source_table` into `target_table`, replacing its contents.
    ///
    /// Returns `Ok` with a [`JobStatus::Failed`] job when the target rejects a
    /// batch or a source page cannot be decoded; any other error (truncate,
    /// lost connection) is returned as `Err`.
    pub async fn transfer_table(&self, source_table: &Table, target_table: &Table) -> Result<TransferJob> {
        let start = Instant::now();
        let table_name = target_table.name.clone();

        let total = self.source.count(source_table).await?;
        let mut job = TransferJob::new(&table_name, total, self.config.batch_size);

        self.diagnostics.record(Diagnostic::TableStarted {
            table: table_name.clone(),
            total_rows: total,
        });

        if total == 0 {
            job.status = JobStatus::Completed;
            self.complete(&job, start);
            return Ok(job);
        }

        if self.config.batch_size == 0 {
            return Err(MigrateError::Config("batch_size must be at least 1".into()));
        }

        if !source_table.has_pk() {
            self.diagnostics.record(Diagnostic::UnorderedPaging {
                table: table_name.clone(),
            });
        }

        self.target.truncate(target_table).await?;
        job.status = JobStatus::Running;

        let columns = target_table.column_names();
        let coercer = RowCoercer::new(&table_name, &target_table.columns);

        for range in partition_batches(total, self.config.batch_size) {
            let page = match self
                .source
                .fetch_page(source_table, range.offset, range.limit)
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_table_failure() => {
                    self.fail(&mut job, range.offset, range.offset, &e, String::new());
                    return Ok(job);
                }
                Err(e) => return Err(e),
            };

            let mut batch: Vec<Row> = Vec::with_capacity(page.len());
            // Source position of the last row that made it into `batch`.
            let mut last_index = range.offset;
            // A source that grew since the count may return extra rows; never
            // read past the snapshot.
            for (i, row) in page.iter().take(range.limit as usize).enumerate() {
                let row_index = range.offset + i as u64;
                match coercer.coerce(row, self.diagnostics.as_ref()) {
                    Ok(coerced) => {
                        last_index = row_index;
                        batch.push(coerced);
                    }
                    Err(reason) => {
                        job.skipped_row_count += 1;
                        job.errors.push(RowError {
                            row_index,
                            reason: reason.to_string(),
                        });
                        self.diagnostics.record(Diagnostic::RowSkipped {
                            table: table_name.clone(),
                            row_index,
                            reason,
                        });
                    }
                }
            }

            if batch.is_empty() {
                continue;
            }

            match self.target.insert_many(target_table, &columns, &batch).await {
                Ok(_) => {
                    let rows = batch.len() as u64;
                    job.copied_row_count += rows;
                    if let Some(ref counter) = self.progress_counter {
                        counter.fetch_add(rows, Ordering::Relaxed);
                    }
                    self.diagnostics.record(Diagnostic::BatchCommitted {
                        table: table_name.clone(),
                        rows,
                        copied: job.copied_row_count,
                        total,
                    });
                }
                Err(e) if e.is_table_failure() => {
                    let last_row = batch.last().map(|r| r.to_string()).unwrap_or_default();
                    self.fail(&mut job, range.offset, last_index, &e, last_row);
                    return Ok(job);
                }
                Err(e) => return Err(e),
            }
        }

        job.status = JobStatus::Completed;
        self.complete(&job, start);
        Ok(job)
    }

    /// Mark the job failed at `row_index` of the page starting at `offset`.
    fn fail(
        &self,
        job: &mut TransferJob,
        offset: u64,
        row_index: u64,
        e: &MigrateError,
        last_row: String,
    ) {
        let reason = if last_row.is_empty() {
            e.to_string()
        } else {
            format!("{} (last row: {})", e, last_row)
        };
        job.errors.push(RowError { row_index, reason });
        job.status = JobStatus::Failed;
        self.diagnostics.record(Diagnostic::BatchFailed {
            table: job.table.clone(),
            offset,
            message: e.to_string(),
            last_row,
        });
    }

    fn complete(&self, job: &TransferJob, start: Instant) {
        self.diagnostics.record(Diagnostic::TableCompleted {
            table: job.table.clone(),
            copied: job.copied_row_count,
            skipped: job.skipped_row_count,
            elapsed: start.elapsed(),
        });
    }
}
