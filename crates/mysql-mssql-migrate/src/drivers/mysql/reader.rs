//! MySQL/MariaDB source reader.
//!
//! Uses SQLx for connection pooling and async query execution.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Row as _, ValueRef};
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::schema::{Column, ColumnType, Table};
use crate::core::traits::{RowSource, SchemaIntrospector};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const COLUMNS_QUERY: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
        CAST(DATA_TYPE AS CHAR(64)) AS DATA_TYPE,
        CAST(COLUMN_TYPE AS CHAR(255)) AS COLUMN_TYPE,
        CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, 0) AS SIGNED) AS max_length,
        CAST(COALESCE(NUMERIC_PRECISION, 0) AS SIGNED) AS num_precision,
        CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED) AS num_scale,
        CAST(IF(IS_NULLABLE = 'YES', 1, 0) AS SIGNED) AS is_nullable,
        CAST(IF(COLUMN_KEY = 'PRI', 1, 0) AS SIGNED) AS is_pk,
        CAST(IF(EXTRA LIKE '%auto_increment%', 1, 0) AS SIGNED) AS is_identity,
        CAST(COLUMN_DEFAULT AS CHAR) AS COLUMN_DEFAULT
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

/// MySQL/MariaDB source.
pub struct MysqlSource {
    pool: MySqlPool,
}

impl MysqlSource {
    /// Connect to MySQL and verify the connection.
    pub async fn new(config: &SourceConfig, max_conns: u32) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(MySqlSslMode::Preferred);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL source pool"))?;

        // Test connection
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL source connection"))?;

        info!("Connected to MySQL source: {}", config.display_url());

        Ok(Self { pool })
    }

    /// Quote a MySQL identifier.
    fn quote_ident(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn qualified(table: &Table) -> String {
        format!(
            "{}.{}",
            Self::quote_ident(&table.schema),
            Self::quote_ident(&table.name)
        )
    }

    fn select_list(columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Load columns for a table. An empty result means the table does not exist.
    async fn load_columns(&self, schema: &str, name: &str) -> Result<Vec<Column>> {
        let rows: Vec<MySqlRow> = sqlx::query(COLUMNS_QUERY)
            .bind(schema)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "loading MySQL columns"))?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let data_type: String = row.try_get("DATA_TYPE")?;
            let column_type: String = row.try_get("COLUMN_TYPE")?;
            let parsed = parse_column_type(
                &data_type,
                &column_type,
                row.try_get::<i64, _>("max_length")?,
                row.try_get::<i64, _>("num_precision")?,
                row.try_get::<i64, _>("num_scale")?,
            );

            let mut col = Column::new(row.try_get::<String, _>("COLUMN_NAME")?, parsed);
            col.nullable = row.try_get::<i64, _>("is_nullable")? == 1;
            col.is_primary_key = row.try_get::<i64, _>("is_pk")? == 1;
            col.is_auto_increment = row.try_get::<i64, _>("is_identity")? == 1;
            col.default_value = row
                .try_get::<Option<String>, _>("COLUMN_DEFAULT")?
                .and_then(|d| parse_default(&d, &col.column_type));
            columns.push(col);
        }

        Ok(columns)
    }

    fn rows_to_values(rows: &[MySqlRow], table: &Table, columns: &[String]) -> Result<Vec<Row>> {
        let types: Vec<ColumnType> = columns
            .iter()
            .map(|c| {
                table
                    .column(c)
                    .map(|col| col.column_type.clone())
                    .ok_or_else(|| {
                        MigrateError::transfer(&table.name, format!("unknown column '{}'", c))
                    })
            })
            .collect::<Result<_>>()?;

        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(&types)
                    .enumerate()
                    .map(|(i, (name, ty))| -> Result<(String, SqlValue)> {
                        let value = decode_value(row, i, ty)
                            .map_err(|e| classify_read_error(&table.name, name, e))?;
                        Ok((name.clone(), value))
                    })
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl SchemaIntrospector for MysqlSource {
    async fn list_tables(&self, schema: &str) -> Result<Vec<Table>> {
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "listing MySQL tables"))?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("TABLE_NAME")?;
            let columns = self.load_columns(schema, &name).await?;
            tables.push(Table::new(schema, name, columns)?);
        }

        info!("Found {} tables in MySQL schema {}", tables.len(), schema);
        Ok(tables)
    }

    async fn get_table(&self, schema: &str, name: &str) -> Result<Option<Table>> {
        let columns = self.load_columns(schema, name).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(Table::new(schema, name, columns)?))
    }
}

#[async_trait]
impl RowSource for MysqlSource {
    async fn count(&self, table: &Table) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::qualified(table));
        let row: MySqlRow = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, format!("counting rows in {}", table.full_name())))?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_page(&self, table: &Table, offset: u64, limit: u64) -> Result<Vec<Row>> {
        let columns = table.column_names();
        let pk = table.primary_key();
        let order_by = if pk.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", Self::select_list(&pk))
        };
        let sql = format!(
            "SELECT {} FROM {}{} LIMIT ? OFFSET ?",
            Self::select_list(&columns),
            Self::qualified(table),
            order_by
        );
        debug!("MySQL page query: {} [limit={}, offset={}]", sql, limit, offset);

        let rows: Vec<MySqlRow> = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, format!("reading page of {}", table.full_name())))?;

        Self::rows_to_values(&rows, table, &columns)
    }

    async fn fetch_all(&self, table: &Table, columns: &[String]) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT {} FROM {}",
            Self::select_list(columns),
            Self::qualified(table)
        );

        let rows: Vec<MySqlRow> = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, format!("reading {}", table.full_name())))?;

        Self::rows_to_values(&rows, table, columns)
    }
}

/// Build a [`ColumnType`] from `INFORMATION_SCHEMA.COLUMNS` fields.
///
/// `TINYINT(1)` is reported as [`ColumnType::Boolean`]; other integer widths
/// besides `INT` keep their own name.
pub fn parse_column_type(
    data_type: &str,
    column_type: &str,
    max_length: i64,
    precision: i64,
    scale: i64,
) -> ColumnType {
    let data_type = data_type.trim().to_lowercase();
    let column_type = column_type.trim().to_lowercase();

    match data_type.as_str() {
        "int" | "integer" => ColumnType::Integer,
        "tinyint" if column_type.starts_with("tinyint(1)") => ColumnType::Boolean,
        "bool" | "boolean" => ColumnType::Boolean,
        "varchar" => ColumnType::VarChar {
            length: u32::try_from(max_length).ok().filter(|n| *n > 0),
        },
        "text" => ColumnType::Text,
        "datetime" => ColumnType::DateTime,
        "decimal" | "numeric" => ColumnType::Decimal {
            precision: precision.clamp(1, 65) as u8,
            scale: scale.clamp(0, 30) as u8,
        },
        other => ColumnType::Other {
            raw: other.to_uppercase(),
        },
    }
}

/// Turn a literal `COLUMN_DEFAULT` into a value. Expressions are dropped.
fn parse_default(raw: &str, column_type: &ColumnType) -> Option<SqlValue> {
    let upper = raw.trim().to_uppercase();
    if upper == "NULL" || upper.starts_with("CURRENT_TIMESTAMP") || upper.ends_with(')') {
        return None;
    }
    match column_type {
        ColumnType::Integer => raw.trim().parse::<i64>().ok().map(SqlValue::Int),
        ColumnType::Boolean => raw.trim().parse::<i64>().ok().map(|v| SqlValue::Bool(v != 0)),
        _ => Some(SqlValue::Text(raw.trim_matches('\'').to_string())),
    }
}

/// Map a cell read failure to a table-scoped error when the data itself is
/// at fault, or to a source error otherwise.
fn classify_read_error(table: &str, column: &str, e: sqlx::Error) -> MigrateError {
    match e {
        e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
            MigrateError::undecodable(table, format!("column `{}`: {}", column, e))
        }
        other => MigrateError::Source(other),
    }
}

fn decode_int(row: &MySqlRow, idx: usize) -> sqlx::Result<SqlValue> {
    match row.try_get::<i64, _>(idx) {
        Ok(v) => Ok(SqlValue::Int(v)),
        Err(_) => {
            let v: u64 = row.try_get(idx)?;
            Ok(i64::try_from(v)
                .map(SqlValue::Int)
                .unwrap_or_else(|_| SqlValue::Decimal(Decimal::from(v))))
        }
    }
}

/// Raw cell bytes, whatever the declared column type.
///
/// `Vec<u8>` only type-checks against string and blob columns; GEOMETRY, BIT
/// and JSON carry plain bytes too and are read unchecked.
fn decode_bytes(row: &MySqlRow, idx: usize) -> sqlx::Result<Vec<u8>> {
    row.try_get_unchecked::<Vec<u8>, _>(idx)
}

/// Character data is read as bytes so that invalid UTF-8 survives to the coercer.
fn decode_chars(row: &MySqlRow, idx: usize) -> sqlx::Result<SqlValue> {
    Ok(match String::from_utf8(decode_bytes(row, idx)?) {
        Ok(s) => SqlValue::Text(s),
        Err(e) => SqlValue::Bytes(e.into_bytes()),
    })
}

/// Convert one MySQL cell to a [`SqlValue`] based on the column type.
fn decode_value(row: &MySqlRow, idx: usize, column_type: &ColumnType) -> sqlx::Result<SqlValue> {
    let is_null = row.try_get_raw(idx).map(|r| r.is_null())?;
    if is_null {
        return Ok(SqlValue::Null);
    }

    let value = match column_type {
        ColumnType::Integer => decode_int(row, idx)?,
        ColumnType::Boolean => match row.try_get::<bool, _>(idx) {
            Ok(b) => SqlValue::Bool(b),
            Err(_) => match decode_int(row, idx)? {
                SqlValue::Int(v) => SqlValue::Bool(v != 0),
                other => other,
            },
        },
        ColumnType::VarChar { .. } | ColumnType::Text => decode_chars(row, idx)?,
        ColumnType::DateTime => SqlValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(idx)?),
        ColumnType::Decimal { .. } => SqlValue::Decimal(row.try_get::<Decimal, _>(idx)?),
        ColumnType::Other { raw } => match raw.to_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "bigint" | "year" => decode_int(row, idx)?,
            "float" => SqlValue::Float(row.try_get::<f32, _>(idx)? as f64),
            "double" | "real" => SqlValue::Float(row.try_get::<f64, _>(idx)?),
            "date" => SqlValue::Date(row.try_get::<chrono::NaiveDate, _>(idx)?),
            "time" => SqlValue::Time(row.try_get::<chrono::NaiveTime, _>(idx)?),
            "timestamp" => SqlValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(idx)?),
            "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "bit"
            | "geometry" | "point" | "linestring" | "polygon" | "multipoint"
            | "multilinestring" | "multipolygon" | "geometrycollection" => {
                SqlValue::Bytes(decode_bytes(row, idx)?)
            }
            // char, tinytext, mediumtext, longtext, enum, set, json and the rest
            _ => decode_chars(row, idx)?,
        },
    };

    Ok(value)
}
