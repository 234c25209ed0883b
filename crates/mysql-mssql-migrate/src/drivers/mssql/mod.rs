//! SQL Server target driver.
//!
//! [`MssqlTarget`] implements every collaborator trait over a bb8 pool of
//! Tiberius clients:
//! - `reader`: introspection through `sys` catalog views, counts and reads
//! - `writer`: `TRUNCATE`, `CREATE TABLE` and transactional multi-row `INSERT`

mod reader;
mod writer;

pub use reader::parse_column_type;
pub use writer::render_create_table;

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;

use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};

/// Connection acquisition timeout from pool.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: TargetConfig,
}

impl TiberiusConnectionManager {
    fn new(config: TargetConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        let (host, instance) = self.config.host_and_instance();
        config.host(host);
        match instance {
            Some(name) => config.instance_name(name),
            None => config.port(self.config.port),
        }
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = if self.config.host_and_instance().1.is_some() {
            // Named instance: resolve the port through SQL Browser.
            TcpStream::connect_named(&config).await?
        } else {
            TcpStream::connect(config.get_addr()).await.map_err(|e| {
                tiberius::error::Error::Io {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            })?
        };

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server target.
pub struct MssqlTarget {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlTarget {
    /// Create the pool and verify the connection.
    pub async fn new(config: &TargetConfig, max_conns: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_conns)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MSSQL target pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "testing MSSQL target connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MSSQL target connection"))
    }

    /// Quote an MSSQL identifier with brackets.
    pub(crate) fn quote_ident(name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    pub(crate) fn qualified(schema: &str, name: &str) -> String {
        format!("{}.{}", Self::quote_ident(schema), Self::quote_ident(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(host: &str, port: u16) -> TargetConfig {
        TargetConfig {
            host: host.into(),
            port,
            database: "shop".into(),
            user: "sa".into(),
            password: "secret".into(),
            schema: "dbo".into(),
            encrypt: false,
            trust_server_cert: false,
        }
    }

    #[test]
    fn test_build_config_uses_host_and_port() {
        let manager = TiberiusConnectionManager::new(target("mssql.internal", 14330));
        assert_eq!(manager.build_config().get_addr(), "mssql.internal:14330");
    }

    #[test]
    fn test_build_config_named_instance_strips_instance_from_host() {
        let manager = TiberiusConnectionManager::new(target("mssql.internal\\SQLEXPRESS", 1433));
        assert!(manager.build_config().get_addr().starts_with("mssql.internal:"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(MssqlTarget::quote_ident("users"), "[users]");
        assert_eq!(MssqlTarget::quote_ident("odd]name"), "[odd]]name]");
        assert_eq!(MssqlTarget::qualified("dbo", "user_tb"), "[dbo].[user_tb]");
    }
}
