//! SQL Server introspection and row reads.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{Row as TdsRow, Uuid};
use tracing::debug;

use super::MssqlTarget;
use crate::core::schema::{Column, ColumnType, Table};
use crate::core::traits::{RowSource, SchemaIntrospector};
use crate::core::value::{Row, SqlValue};
use crate::error::{MigrateError, Result};

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.name AS column_name,
        t.name AS data_type,
        CAST(c.max_length AS INT) AS max_length,
        CAST(c.precision AS INT) AS num_precision,
        CAST(c.scale AS INT) AS num_scale,
        c.is_nullable,
        c.is_identity,
        CAST(CASE WHEN EXISTS (
            SELECT 1
            FROM sys.index_columns ic
            JOIN sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id
            WHERE i.is_primary_key = 1
              AND ic.object_id = c.object_id
              AND ic.column_id = c.column_id
        ) THEN 1 ELSE 0 END AS BIT) AS is_pk,
        dc.definition AS default_definition
    FROM sys.columns c
    JOIN sys.types t ON c.user_type_id = t.user_type_id
    JOIN sys.tables tbl ON c.object_id = tbl.object_id
    JOIN sys.schemas s ON tbl.schema_id = s.schema_id
    LEFT JOIN sys.default_constraints dc ON dc.object_id = c.default_object_id
    WHERE s.name = @P1 AND tbl.name = @P2
    ORDER BY c.column_id
"#;

impl MssqlTarget {
    /// Load columns for a table. An empty result means the table does not exist.
    async fn load_columns(&self, schema: &str, name: &str) -> Result<Vec<Column>> {
        let mut conn = self.get_conn().await?;
        let rows = conn
            .query(COLUMNS_QUERY, &[&schema, &name])
            .await?
            .into_first_result()
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let col_name: &str = row.try_get(0)?.ok_or_else(|| {
                MigrateError::SchemaExtraction(format!("{}.{}: missing column name", schema, name))
            })?;
            let data_type: &str = row.try_get(1)?.unwrap_or("");
            let column_type = parse_column_type(
                data_type,
                row.try_get::<i32, _>(2)?.unwrap_or(0),
                row.try_get::<i32, _>(3)?.unwrap_or(0),
                row.try_get::<i32, _>(4)?.unwrap_or(0),
            );

            let mut col = Column::new(col_name, column_type);
            col.nullable = row.try_get::<bool, _>(5)?.unwrap_or(true);
            col.is_auto_increment = row.try_get::<bool, _>(6)?.unwrap_or(false);
            col.is_primary_key = row.try_get::<bool, _>(7)?.unwrap_or(false);
            col.default_value = row
                .try_get::<&str, _>(8)?
                .and_then(parse_default_definition);
            columns.push(col);
        }

        Ok(columns)
    }

    fn select_list(columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| Self::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn rows_to_values(rows: &[TdsRow], table: &Table, columns: &[String]) -> Result<Vec<Row>> {
        let types: Vec<&ColumnType> = columns
            .iter()
            .map(|c| {
                table.column(c).map(|col| &col.column_type).ok_or_else(|| {
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
                        Ok((name.clone(), decode_value(row, i, ty)?))
                    })
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl SchemaIntrospector for MssqlTarget {
    async fn list_tables(&self, schema: &str) -> Result<Vec<Table>> {
        let query = r#"
            SELECT t.name
            FROM sys.tables t
            JOIN sys.schemas s ON t.schema_id = s.schema_id
            WHERE s.name = @P1 AND t.is_ms_shipped = 0
            ORDER BY t.name
        "#;

        let names: Vec<String> = {
            let mut conn = self.get_conn().await?;
            let rows = conn.query(query, &[&schema]).await?.into_first_result().await?;
            rows.iter()
                .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten().map(str::to_string))
                .collect()
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = self.load_columns(schema, &name).await?;
            tables.push(Table::new(schema, name, columns)?);
        }

        debug!("Found {} tables in MSSQL schema {}", tables.len(), schema);
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
impl RowSource for MssqlTarget {
    async fn count(&self, table: &Table) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {}",
            Self::qualified(&table.schema, &table.name)
        );
        let mut conn = self.get_conn().await?;
        let row = conn.simple_query(sql).await?.into_row().await?;
        let count = row
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn fetch_page(&self, table: &Table, offset: u64, limit: u64) -> Result<Vec<Row>> {
        let columns = table.column_names();
        let pk = table.primary_key();
        let order_by = if pk.is_empty() {
            "(SELECT NULL)".to_string()
        } else {
            Self::select_list(&pk)
        };
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY",
            Self::select_list(&columns),
            Self::qualified(&table.schema, &table.name),
            order_by
        );

        let mut conn = self.get_conn().await?;
        let rows = conn
            .query(sql.as_str(), &[&(offset as i64), &(limit as i64)])
            .await?
            .into_first_result()
            .await?;

        Self::rows_to_values(&rows, table, &columns)
    }

    async fn fetch_all(&self, table: &Table, columns: &[String]) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT {} FROM {}",
            Self::select_list(columns),
            Self::qualified(&table.schema, &table.name)
        );

        let mut conn = self.get_conn().await?;
        let rows = conn.simple_query(sql).await?.into_first_result().await?;

        Self::rows_to_values(&rows, table, columns)
    }
}

/// Build a [`ColumnType`] from `sys.columns` / `sys.types` fields.
///
/// `max_length` is in bytes as reported by SQL Server (`-1` for `MAX`).
pub fn parse_column_type(data_type: &str, max_length: i32, precision: i32, scale: i32) -> ColumnType {
    let data_type = data_type.trim().to_lowercase();
    match data_type.as_str() {
        "int" => ColumnType::Integer,
        "varchar" => ColumnType::VarChar {
            length: u32::try_from(max_length).ok(),
        },
        "nvarchar" => ColumnType::VarChar {
            length: u32::try_from(max_length).ok().map(|n| n / 2),
        },
        "text" | "ntext" => ColumnType::Text,
        "bit" => ColumnType::Boolean,
        "datetime" => ColumnType::DateTime,
        "decimal" | "numeric" => ColumnType::Decimal {
            precision: precision.clamp(1, 38) as u8,
            scale: scale.clamp(0, 38) as u8,
        },
        other => ColumnType::Other {
            raw: other.to_uppercase(),
        },
    }
}

/// Parse a default constraint definition such as `((0))` or `('abc')`.
fn parse_default_definition(definition: &str) -> Option<SqlValue> {
    let inner = definition
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');
    if let Some(text) = inner.strip_prefix("N'").or_else(|| inner.strip_prefix('\'')) {
        return Some(SqlValue::Text(
            text.strip_suffix('\'').unwrap_or(text).replace("''", "'"),
        ));
    }
    inner.parse::<i64>().ok().map(SqlValue::Int)
}

/// Convert one TDS cell to a [`SqlValue`] based on the column type.
fn decode_value(row: &TdsRow, idx: usize, column_type: &ColumnType) -> Result<SqlValue> {
    let value = match column_type {
        ColumnType::Integer => row.try_get::<i32, _>(idx)?.map(|v| SqlValue::Int(v as i64)),
        ColumnType::Boolean => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        ColumnType::VarChar { .. } | ColumnType::Text => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(s.to_string())),
        ColumnType::DateTime => row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime),
        ColumnType::Decimal { .. } => row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal),
        ColumnType::Other { raw } => match raw.to_lowercase().as_str() {
            "bigint" => row.try_get::<i64, _>(idx)?.map(SqlValue::Int),
            "smallint" => row.try_get::<i16, _>(idx)?.map(|v| SqlValue::Int(v as i64)),
            "tinyint" => row.try_get::<u8, _>(idx)?.map(|v| SqlValue::Int(v as i64)),
            "float" => row.try_get::<f64, _>(idx)?.map(SqlValue::Float),
            "real" => row.try_get::<f32, _>(idx)?.map(|v| SqlValue::Float(v as f64)),
            "money" | "smallmoney" => row.try_get::<f64, _>(idx)?.map(SqlValue::Float),
            "date" => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
            "time" => row.try_get::<NaiveTime, _>(idx)?.map(SqlValue::Time),
            "datetime2" | "smalldatetime" => {
                row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime)
            }
            "binary" | "varbinary" | "image" => row
                .try_get::<&[u8], _>(idx)?
                .map(|b| SqlValue::Bytes(b.to_vec())),
            "uniqueidentifier" => row
                .try_get::<Uuid, _>(idx)?
                .map(|u| SqlValue::Text(u.to_string())),
            _ => row
                .try_get::<&str, _>(idx)?
                .map(|s| SqlValue::Text(s.to_string())),
        },
    };

    Ok(value.unwrap_or(SqlValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column_type() {
        assert_eq!(parse_column_type("int", 4, 10, 0), ColumnType::Integer);
        assert_eq!(
            parse_column_type("varchar", 255, 0, 0),
            ColumnType::VarChar { length: Some(255) }
        );
        assert_eq!(
            parse_column_type("varchar", -1, 0, 0),
            ColumnType::VarChar { length: None }
        );
        assert_eq!(
            parse_column_type("nvarchar", 100, 0, 0),
            ColumnType::VarChar { length: Some(50) }
        );
        assert_eq!(parse_column_type("bit", 1, 1, 0), ColumnType::Boolean);
        assert_eq!(
            parse_column_type("decimal", 9, 18, 2),
            ColumnType::Decimal { precision: 18, scale: 2 }
        );
        assert_eq!(
            parse_column_type("datetime2", 8, 27, 7),
            ColumnType::Other { raw: "DATETIME2".into() }
        );
    }

    #[test]
    fn test_parse_default_definition() {
        assert_eq!(parse_default_definition("((0))"), Some(SqlValue::Int(0)));
        assert_eq!(
            parse_default_definition("('active')"),
            Some(SqlValue::Text("active".into()))
        );
        assert_eq!(
            parse_default_definition("(N'it''s')"),
            Some(SqlValue::Text("it's".into()))
        );
        assert_eq!(parse_default_definition("(getdate())"), None);
    }
}
