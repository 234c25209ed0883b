//! Structured diagnostic events.
//!
//! Row- and value-level problems never fail a transfer; they are reported
//! here instead. [`TracingDiagnostics`] forwards events to `tracing`,
//! [`CollectingDiagnostics`] keeps them in memory.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coerce::SkipReason;

/// Why a whole table was left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSkip {
    /// Present on the source, absent on the target.
    MissingInTarget,
    /// Present on the target, absent on the source.
    MissingInSource,
    /// Target already has the table (schema copy only).
    AlreadyExists,
}

/// A diagnostic event emitted by the engines.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    TableStarted {
        table: String,
        total_rows: u64,
    },
    TableCompleted {
        table: String,
        copied: u64,
        skipped: u64,
        elapsed: Duration,
    },
    TableSkipped {
        table: String,
        reason: TableSkip,
    },
    /// An unmapped source type was replaced by the default target type.
    TypeMappingFallback {
        table: String,
        column: String,
        source_type: String,
        target_type: String,
    },
    ValueTruncated {
        table: String,
        column: String,
        original_len: usize,
        max_len: usize,
    },
    RowSkipped {
        table: String,
        row_index: u64,
        reason: SkipReason,
    },
    BatchCommitted {
        table: String,
        rows: u64,
        copied: u64,
        total: u64,
    },
    BatchFailed {
        table: String,
        offset: u64,
        message: String,
        last_row: String,
    },
    /// Reads were not ordered by a key; concurrent writes may shift pages.
    UnorderedPaging {
        table: String,
    },
    ReconciliationSummary {
        table: String,
        identical: usize,
        inserted: usize,
        count_before: u64,
        count_after: u64,
    },
}

/// Receiver for diagnostic events.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: Diagnostic);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn record(&self, event: Diagnostic) {
        match event {
            Diagnostic::TableStarted { table, total_rows } => {
                info!(table = %table, total_rows, "Starting table transfer");
            }
            Diagnostic::TableCompleted {
                table,
                copied,
                skipped,
                elapsed,
            } => {
                info!(
                    table = %table,
                    copied,
                    skipped,
                    "Completed table in {:.2}s",
                    elapsed.as_secs_f64()
                );
            }
            Diagnostic::TableSkipped { table, reason } => match reason {
                TableSkip::AlreadyExists => {
                    info!(table = %table, "Table already exists in target, skipping")
                }
                other => warn!(table = %table, reason = ?other, "Skipping table"),
            },
            Diagnostic::TypeMappingFallback {
                table,
                column,
                source_type,
                target_type,
            } => {
                warn!(
                    "{}.{}: no mapping for {}, using {}",
                    table, column, source_type, target_type
                );
            }
            Diagnostic::ValueTruncated {
                table,
                column,
                original_len,
                max_len,
            } => {
                debug!(
                    "Truncating `{}` in `{}`: original length = {}, max length = {}",
                    column, table, original_len, max_len
                );
            }
            Diagnostic::RowSkipped {
                table,
                row_index,
                reason,
            } => {
                warn!(table = %table, row_index, "Skipping row: {}", reason);
            }
            Diagnostic::BatchCommitted {
                table,
                rows,
                copied,
                total,
            } => {
                let pct = if total > 0 {
                    copied as f64 * 100.0 / total as f64
                } else {
                    100.0
                };
                info!(
                    table = %table,
                    rows,
                    "Progress: {}/{} rows copied ({:.2}%)",
                    copied,
                    total,
                    pct
                );
            }
            Diagnostic::BatchFailed {
                table,
                offset,
                message,
                last_row,
            } => {
                warn!(
                    table = %table,
                    offset,
                    "Batch rejected: {} (last row: {})",
                    message,
                    last_row
                );
            }
            Diagnostic::UnorderedPaging { table } => {
                warn!(
                    table = %table,
                    "No primary key: paging in natural row order, concurrent writes may skip or repeat rows"
                );
            }
            Diagnostic::ReconciliationSummary {
                table,
                identical,
                inserted,
                count_before,
                count_after,
            } => {
                info!(
                    table = %table,
                    identical,
                    inserted,
                    count_before,
                    count_after,
                    "Synchronization complete"
                );
            }
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    events: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl DiagnosticsSink for CollectingDiagnostics {
    fn record(&self, event: Diagnostic) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_keeps_order() {
        let sink = CollectingDiagnostics::new();
        sink.record(Diagnostic::TableStarted {
            table: "a".into(),
            total_rows: 3,
        });
        sink.record(Diagnostic::UnorderedPaging { table: "a".into() });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Diagnostic::TableStarted { total_rows: 3, .. }));
        assert_eq!(
            sink.count(|e| matches!(e, Diagnostic::UnorderedPaging { .. })),
            1
        );
    }
}
