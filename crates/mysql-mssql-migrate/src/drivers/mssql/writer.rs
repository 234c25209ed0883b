//! SQL Server writes: truncate, DDL and transactional multi-row inserts.

use async_trait::async_trait;
use tiberius::{Client, ColumnData, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::{debug, warn};

use super::MssqlTarget;
use crate::core::schema::{Column, ColumnType, Table};
use crate::core::traits::RowSink;
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

/// SQL Server accepts at most 2100 parameters per statement.
const MAX_PARAMS: usize = 2100;

/// A table value constructor holds at most 1000 rows.
const MAX_ROWS_PER_INSERT: usize = 1000;

/// Longest bounded VARCHAR; anything longer becomes VARCHAR(MAX).
const MAX_VARCHAR_LENGTH: u32 = 8000;

type TdsClient = Client<Compat<TcpStream>>;

/// Map a target error from a write statement.
///
/// Errors raised by the server (constraint violations, conversion failures,
/// truncation) reject the batch. Anything else is a connection failure.
fn classify(table: &str, e: tiberius::error::Error) -> MigrateError {
    match e {
        tiberius::error::Error::Server(ref token) => {
            MigrateError::rejected(table, format!("{} (error {})", token.message(), token.code()))
        }
        other => MigrateError::Target(other),
    }
}

async fn run_batch(conn: &mut TdsClient, sql: &str) -> std::result::Result<(), tiberius::error::Error> {
    conn.simple_query(sql).await?.into_results().await?;
    Ok(())
}

/// Render a column type as SQL Server DDL.
fn render_type(column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Integer => "INT".to_string(),
        ColumnType::VarChar { length: Some(n) } if *n <= MAX_VARCHAR_LENGTH => {
            format!("VARCHAR({})", n)
        }
        ColumnType::VarChar { .. } | ColumnType::Text => "VARCHAR(MAX)".to_string(),
        ColumnType::Boolean => "BIT".to_string(),
        ColumnType::DateTime => "DATETIME".to_string(),
        ColumnType::Decimal { precision, scale } => {
            let precision = (*precision).clamp(1, 38);
            format!("DECIMAL({},{})", precision, (*scale).min(precision))
        }
        ColumnType::Other { raw } => raw.clone(),
    }
}

/// Render a default value as a SQL literal.
fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::Float(v) => v.to_string(),
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        SqlValue::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
            format!("0x{}", hex)
        }
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        SqlValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%dT%H:%M:%S%.3f")),
    }
}

fn render_column(col: &Column) -> String {
    let mut def = format!("{} {}", MssqlTarget::quote_ident(&col.name), render_type(&col.column_type));
    if col.is_auto_increment {
        if col.column_type == ColumnType::Integer {
            def.push_str(" IDENTITY(1,1)");
        } else {
            warn!(
                "Column {} is auto-increment but maps to {}, creating without IDENTITY",
                col.name,
                render_type(&col.column_type)
            );
        }
    }
    def.push_str(if col.nullable { " NULL" } else { " NOT NULL" });
    if let Some(ref default) = col.default_value {
        if !col.is_auto_increment {
            def.push_str(&format!(" DEFAULT {}", render_literal(default)));
        }
    }
    def
}

/// Render `CREATE TABLE` for a table whose columns carry SQL Server types.
pub fn render_create_table(table: &Table) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(render_column).collect();

    let pk = table.primary_key();
    if !pk.is_empty() {
        let pk_cols: Vec<String> = pk.iter().map(|c| MssqlTarget::quote_ident(c)).collect();
        parts.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            MssqlTarget::quote_ident(&format!("PK_{}", table.name)),
            pk_cols.join(", ")
        ));
    }

    format!(
        "CREATE TABLE {} ({})",
        MssqlTarget::qualified(&table.schema, &table.name),
        parts.join(", ")
    )
}

/// Rows per `INSERT` statement for the given column count.
fn rows_per_statement(cols: usize) -> usize {
    if cols == 0 {
        return MAX_ROWS_PER_INSERT;
    }
    (MAX_PARAMS / cols).clamp(1, MAX_ROWS_PER_INSERT)
}

/// Build a multi-row `INSERT` with `@P{n}` placeholders.
fn build_insert_sql(qualified_table: &str, cols: &[String], rows: usize, identity_insert: bool) -> String {
    let col_str = cols
        .iter()
        .map(|c| MssqlTarget::quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut param_idx = 1;
    let mut value_groups = Vec::with_capacity(rows);
    for _ in 0..rows {
        let placeholders: Vec<String> = (0..cols.len())
            .map(|_| {
                let p = format!("@P{}", param_idx);
                param_idx += 1;
                p
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    let insert = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        col_str,
        value_groups.join(", ")
    );

    if identity_insert {
        format!(
            "SET IDENTITY_INSERT {} ON; {}; SET IDENTITY_INSERT {} OFF;",
            qualified_table, insert, qualified_table
        )
    } else {
        insert
    }
}

/// Parameter type of a NULL, picked from the target column.
///
/// An untyped NULL is sent as NVARCHAR, which SQL Server refuses to convert
/// into binary and a few other column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    Date,
    Time,
}

impl SqlNullType {
    fn for_column(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => SqlNullType::I32,
            ColumnType::Boolean => SqlNullType::Bool,
            ColumnType::VarChar { .. } | ColumnType::Text => SqlNullType::String,
            ColumnType::DateTime => SqlNullType::DateTime,
            ColumnType::Decimal { .. } => SqlNullType::Decimal,
            ColumnType::Other { raw } => {
                let base = raw.split('(').next().unwrap_or_default().trim().to_uppercase();
                match base.as_str() {
                    "BIT" => SqlNullType::Bool,
                    "TINYINT" | "SMALLINT" => SqlNullType::I16,
                    "INT" => SqlNullType::I32,
                    "BIGINT" => SqlNullType::I64,
                    "FLOAT" | "REAL" => SqlNullType::F64,
                    "DECIMAL" | "NUMERIC" | "MONEY" | "SMALLMONEY" => SqlNullType::Decimal,
                    "BINARY" | "VARBINARY" | "IMAGE" | "GEOMETRY" | "GEOGRAPHY" => SqlNullType::Bytes,
                    "UNIQUEIDENTIFIER" => SqlNullType::Uuid,
                    "DATETIME" | "DATETIME2" | "SMALLDATETIME" => SqlNullType::DateTime,
                    "DATE" => SqlNullType::Date,
                    "TIME" => SqlNullType::Time,
                    _ => SqlNullType::String,
                }
            }
        }
    }
}

impl ToSql for SqlNullType {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlNullType::Bool => ColumnData::Bit(None),
            SqlNullType::I16 => ColumnData::I16(None),
            SqlNullType::I32 => ColumnData::I32(None),
            SqlNullType::I64 => ColumnData::I64(None),
            SqlNullType::F64 => ColumnData::F64(None),
            SqlNullType::String => ColumnData::String(None),
            SqlNullType::Bytes => ColumnData::Binary(None),
            SqlNullType::Uuid => ColumnData::Guid(None),
            SqlNullType::Decimal => ColumnData::Numeric(None),
            SqlNullType::DateTime => ColumnData::DateTime2(None),
            SqlNullType::Date => ColumnData::Date(None),
            SqlNullType::Time => ColumnData::Time(None),
        }
    }
}

fn sql_value_to_sql_param(value: &SqlValue, null_type: SqlNullType) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => Box::new(null_type),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::Int(i) => Box::new(*i),
        SqlValue::Float(f) => Box::new(*f),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
        SqlValue::DateTime(dt) => Box::new(*dt),
    }
}

/// NULL parameter type for each of `cols`, in order.
fn null_types(table: &Table, cols: &[String]) -> Vec<SqlNullType> {
    cols.iter()
        .map(|c| {
            table
                .column(c)
                .map_or(SqlNullType::String, |col| SqlNullType::for_column(&col.column_type))
        })
        .collect()
}

impl MssqlTarget {
    /// Insert every chunk on `conn`. The caller owns the transaction.
    async fn insert_chunks(
        conn: &mut TdsClient,
        table: &Table,
        cols: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let qualified_table = Self::qualified(&table.schema, &table.name);
        let identity_insert = table.has_auto_increment_in(cols);
        let null_types = null_types(table, cols);
        let mut total_inserted = 0u64;

        for chunk in rows.chunks(rows_per_statement(cols.len())) {
            let sql = build_insert_sql(&qualified_table, cols, chunk.len(), identity_insert);

            // Flatten all row values into a single params vector
            let params: Vec<Box<dyn ToSql>> = chunk
                .iter()
                .flat_map(|row| row.values_for(cols).into_iter().zip(null_types.iter().copied()))
                .map(|(v, null_type)| sql_value_to_sql_param(&v, null_type))
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            conn.execute(sql.as_str(), &param_refs)
                .await
                .map_err(|e| classify(&table.name, e))?;

            total_inserted += chunk.len() as u64;
        }

        Ok(total_inserted)
    }
}

#[async_trait]
impl RowSink for MssqlTarget {
    async fn truncate(&self, table: &Table) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", Self::qualified(&table.schema, &table.name));
        let mut conn = self.get_conn().await?;
        run_batch(&mut conn, &sql).await?;
        debug!("Truncated {}", table.full_name());
        Ok(())
    }

    async fn insert_many(&self, table: &Table, columns: &[String], rows: &[Row]) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn().await?;
        run_batch(&mut conn, "BEGIN TRANSACTION").await?;

        match Self::insert_chunks(&mut conn, table, columns, rows).await {
            Ok(inserted) => {
                run_batch(&mut conn, "COMMIT TRANSACTION")
                    .await
                    .map_err(|e| classify(&table.name, e))?;
                debug!("Inserted {} rows into {}", inserted, table.full_name());
                Ok(inserted)
            }
            Err(e) => {
                // The server may already have rolled back on a severe error.
                if let Err(rollback_err) =
                    run_batch(&mut conn, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
                {
                    warn!("Rollback failed for {}: {}", table.full_name(), rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn create_table(&self, table: &Table) -> Result<()> {
        let sql = render_create_table(table);
        debug!("{}", sql);
        let mut conn = self.get_conn().await?;
        run_batch(&mut conn, &sql)
            .await
            .map_err(|e| classify(&table.name, e))?;
        Ok(())
    }
}
