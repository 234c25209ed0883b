//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source (MySQL) connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target (SQL Server) connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Schema introspection returned something unusable
    #[error("Schema extraction failed: {0}")]
    SchemaExtraction(String),

    /// A table required in single-table mode does not exist on one side
    #[error("Table {table} not found in {side} database")]
    TableNotFound { table: String, side: String },

    /// The target rejected a whole batch (constraint violation, bad data)
    #[error("Batch rejected by target for table {table}: {message}")]
    BatchRejected { table: String, message: String },

    /// A source cell could not be decoded into a value
    #[error("Cannot decode source row for table {table}: {message}")]
    Undecodable { table: String, message: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a BatchRejected error
    pub fn rejected(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::BatchRejected {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an Undecodable error
    pub fn undecodable(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Undecodable {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a TableNotFound error
    pub fn table_not_found(table: impl Into<String>, side: impl Into<String>) -> Self {
        MigrateError::TableNotFound {
            table: table.into(),
            side: side.into(),
        }
    }

    /// Whether this error is caused by the data of one table.
    ///
    /// Rejected batches and undecodable source rows abort only the current
    /// table; everything else is treated as a connection-level failure and
    /// ends the run.
    pub fn is_table_failure(&self) -> bool {
        matches!(
            self,
            MigrateError::BatchRejected { .. } | MigrateError::Undecodable { .. }
        )
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Source(_) | MigrateError::Target(_) | MigrateError::Pool { .. } => 3,
            MigrateError::TableNotFound { .. }
            | MigrateError::BatchRejected { .. }
            | MigrateError::Undecodable { .. }
            | MigrateError::Transfer { .. } => 4,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_failure_classification() {
        assert!(MigrateError::rejected("users", "PK violation").is_table_failure());
        assert!(MigrateError::undecodable("shapes", "bad cell").is_table_failure());
        assert!(!MigrateError::transfer("users", "boom").is_table_failure());
        assert!(!MigrateError::pool("closed", "memory").is_table_failure());
        assert!(!MigrateError::Source(sqlx::Error::PoolTimedOut).is_table_failure());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("bad".into()).exit_code(), 2);
        assert_eq!(MigrateError::pool("closed", "ctx").exit_code(), 3);
        assert_eq!(MigrateError::table_not_found("t", "target").exit_code(), 4);
        assert_eq!(MigrateError::undecodable("t", "bad cell").exit_code(), 4);
        assert_eq!(MigrateError::SchemaExtraction("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::rejected("orders", "duplicate key");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Batch rejected by target for table orders"));
    }
}
