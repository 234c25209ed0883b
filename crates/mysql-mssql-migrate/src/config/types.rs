//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::typemap::DEFAULT_VARCHAR_LENGTH;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MySQL).
    pub source: SourceConfig,

    /// Target database configuration (SQL Server).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Set-reconciliation settings for `sync`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,
}

/// Source database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name. Also the schema tables are listed from.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,
}

/// Target database (SQL Server) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host. A named instance may be given as `host\instance`.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per page and per insert statement (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Tables to copy. Empty means every source table.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Keep known source VARCHAR lengths when creating target tables (default: true).
    #[serde(default = "default_true")]
    pub preserve_varchar_length: bool,

    /// VARCHAR length for fallback and unknown-length columns (default: 255).
    #[serde(default = "default_varchar_length")]
    pub default_varchar_length: u32,

    /// Maximum pooled connections per side (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tables: Vec::new(),
            preserve_varchar_length: true,
            default_varchar_length: DEFAULT_VARCHAR_LENGTH,
            max_connections: default_max_connections(),
        }
    }
}

/// Set-reconciliation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Table to synchronize.
    pub table: String,

    /// Columns compared and copied, in order.
    pub columns: Vec<String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_batch_size() -> u64 {
    100
}

fn default_varchar_length() -> u32 {
    DEFAULT_VARCHAR_LENGTH
}

fn default_max_connections() -> u32 {
    4
}

fn default_true() -> bool {
    true
}
