//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(MigrateError::Config("target.schema must not be empty".into()));
    }

    // Cannot migrate to the same database
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.default_varchar_length == 0
        || config.migration.default_varchar_length > 8000
    {
        return Err(MigrateError::Config(
            "migration.default_varchar_length must be between 1 and 8000".into(),
        ));
    }
    if config.migration.max_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_connections must be at least 1".into(),
        ));
    }
    if config.migration.tables.iter().any(|t| t.trim().is_empty()) {
        return Err(MigrateError::Config(
            "migration.tables must not contain empty names".into(),
        ));
    }

    if let Some(ref sync) = config.sync {
        if sync.table.is_empty() {
            return Err(MigrateError::Config("sync.table is required".into()));
        }
        if sync.columns.is_empty() {
            return Err(MigrateError::Config(
                "sync.columns must list at least one column".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, SyncConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                host: "mysql.local".to_string(),
                port: 3306,
                database: "hotpack_test".to_string(),
                user: "test123".to_string(),
                password: "password".to_string(),
            },
            target: TargetConfig {
                host: "mssql.local".to_string(),
                port: 1433,
                database: "Report_1".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                schema: "dbo".to_string(),
                encrypt: false,
                trust_server_cert: true,
            },
            migration: MigrationConfig::default(),
            sync: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target.host = config.source.host.clone();
        config.target.port = config.source.port;
        config.target.database = config.source.database.clone();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_sync_requires_columns() {
        let mut config = valid_config();
        config.sync = Some(SyncConfig {
            table: "user_tb".to_string(),
            columns: vec![],
        });
        assert!(validate(&config).is_err());

        config.sync = Some(SyncConfig {
            table: "user_tb".to_string(),
            columns: vec!["id".to_string()],
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_456"));
    }
}
