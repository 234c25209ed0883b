//! Type mapping between MySQL and SQL Server.
//!
//! Mapping is a lookup of the normalized (upper-cased) source type name in a
//! rule table. Anything not in the table maps to the fallback type,
//! `VARCHAR(255)` by default. Schema creation must never abort on an exotic
//! type, so the fallback is lossy by intent: a `DECIMAL`, `BIGINT` or
//! `GEOMETRY` source column lands in a character column.

use std::collections::HashMap;

use crate::core::schema::{ColumnType, Table};
use crate::core::traits::{TypeMapper, TypeMapping};
use crate::diagnostics::{Diagnostic, DiagnosticsSink};

/// Length used for `VARCHAR` targets when the source length is not kept.
pub const DEFAULT_VARCHAR_LENGTH: u32 = 255;

/// What a lookup-table entry produces.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingRule {
    /// Always this target type.
    To(ColumnType),
    /// `VARCHAR`, keeping the source length when known and length
    /// preservation is on, otherwise the default length.
    VarChar,
}

/// Table-driven [`TypeMapper`] with a default-fallback entry.
#[derive(Debug, Clone)]
pub struct TableTypeMapper {
    source: String,
    target: String,
    rules: HashMap<String, MappingRule>,
    fallback: ColumnType,
    preserve_varchar_length: bool,
    default_varchar_length: u32,
}

impl TableTypeMapper {
    /// An empty mapper: every type maps to the fallback.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rules: HashMap::new(),
            fallback: ColumnType::VarChar {
                length: Some(DEFAULT_VARCHAR_LENGTH),
            },
            preserve_varchar_length: true,
            default_varchar_length: DEFAULT_VARCHAR_LENGTH,
        }
    }

    /// MySQL → SQL Server mapping.
    ///
    /// Covers integer, varchar, text, boolean-like tinyint and datetime.
    pub fn mysql_to_mssql() -> Self {
        Self::new("mysql", "mssql")
            .with_rule("INTEGER", MappingRule::To(ColumnType::Integer))
            .with_rule("INT", MappingRule::To(ColumnType::Integer))
            .with_rule("VARCHAR", MappingRule::VarChar)
            .with_rule("TEXT", MappingRule::To(ColumnType::Text))
            .with_rule("BOOLEAN", MappingRule::To(ColumnType::Boolean))
            .with_rule("BOOL", MappingRule::To(ColumnType::Boolean))
            .with_rule("TINYINT(1)", MappingRule::To(ColumnType::Boolean))
            .with_rule("DATETIME", MappingRule::To(ColumnType::DateTime))
    }

    /// Add or replace a rule. The key is normalized to upper case.
    #[must_use]
    pub fn with_rule(mut self, type_name: &str, rule: MappingRule) -> Self {
        self.rules.insert(type_name.trim().to_uppercase(), rule);
        self
    }

    /// Replace the fallback type.
    #[must_use]
    pub fn with_fallback(mut self, fallback: ColumnType) -> Self {
        self.fallback = fallback;
        self
    }

    /// Keep known source `VARCHAR` lengths (default: on).
    #[must_use]
    pub fn preserve_varchar_length(mut self, preserve: bool) -> Self {
        self.preserve_varchar_length = preserve;
        self
    }

    /// Length used for `VARCHAR` when the source length is unknown or not kept.
    #[must_use]
    pub fn default_varchar_length(mut self, length: u32) -> Self {
        self.default_varchar_length = length;
        self
    }

    fn varchar_target(&self, source: &ColumnType) -> ColumnType {
        let length = match source {
            ColumnType::VarChar { length: Some(n) } if self.preserve_varchar_length => *n,
            _ => self.default_varchar_length,
        };
        ColumnType::VarChar {
            length: Some(length),
        }
    }
}

impl Default for TableTypeMapper {
    fn default() -> Self {
        Self::mysql_to_mssql()
    }
}

impl TypeMapper for TableTypeMapper {
    fn source_dialect(&self) -> &str {
        &self.source
    }

    fn target_dialect(&self) -> &str {
        &self.target
    }

    fn map_type(&self, source: &ColumnType) -> TypeMapping {
        let name = source.type_name();
        match self.rules.get(&name) {
            Some(MappingRule::To(target)) => TypeMapping::mapped(target.clone()),
            Some(MappingRule::VarChar) => TypeMapping::mapped(self.varchar_target(source)),
            None => TypeMapping::fallback(
                self.fallback.clone(),
                format!("no {} mapping for {}, using {}", self.target, name, self.fallback),
            ),
        }
    }
}

/// Map every column of `table` and return the target table descriptor.
///
/// Fallback substitutions are reported as [`Diagnostic::TypeMappingFallback`].
pub fn map_table(
    mapper: &dyn TypeMapper,
    table: &Table,
    target_schema: &str,
    diagnostics: &dyn DiagnosticsSink,
) -> Table {
    let columns = table
        .columns
        .iter()
        .map(|col| {
            let mapping = mapper.map_column(col);
            if mapping.fallback {
                diagnostics.record(Diagnostic::TypeMappingFallback {
                    table: table.name.clone(),
                    column: col.name.clone(),
                    source_type: col.column_type.type_name(),
                    target_type: mapping.column.column_type.to_string(),
                });
            }
            mapping.column
        })
        .collect();

    Table {
        schema: target_schema.to_string(),
        name: table.name.clone(),
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::Column;
    use crate::diagnostics::CollectingDiagnostics;

    fn map(t: ColumnType) -> TypeMapping {
        TableTypeMapper::mysql_to_mssql().map_type(&t)
    }

    #[test]
    fn test_fixed_mappings() {
        assert_eq!(map(ColumnType::Integer).target_type, ColumnType::Integer);
        assert_eq!(map(ColumnType::Text).target_type, ColumnType::Text);
        assert_eq!(map(ColumnType::Boolean).target_type, ColumnType::Boolean);
        assert_eq!(map(ColumnType::DateTime).target_type, ColumnType::DateTime);
        assert!(!map(ColumnType::Integer).fallback);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let m = map(ColumnType::Other { raw: "int".into() });
        assert_eq!(m.target_type, ColumnType::Integer);
        let m = map(ColumnType::Other { raw: "tinyint(1)".into() });
        assert_eq!(m.target_type, ColumnType::Boolean);
    }

    #[test]
    fn test_varchar_length_preserved_when_known() {
        let m = map(ColumnType::VarChar { length: Some(40) });
        assert_eq!(m.target_type, ColumnType::VarChar { length: Some(40) });

        let m = map(ColumnType::VarChar { length: None });
        assert_eq!(m.target_type, ColumnType::VarChar { length: Some(255) });
    }

    #[test]
    fn test_varchar_length_not_preserved() {
        let mapper = TableTypeMapper::mysql_to_mssql().preserve_varchar_length(false);
        let m = mapper.map_type(&ColumnType::VarChar { length: Some(40) });
        assert_eq!(m.target_type, ColumnType::VarChar { length: Some(255) });
    }

    #[test]
    fn test_unknown_type_falls_back_to_varchar_255() {
        let m = map(ColumnType::Other { raw: "GEOMETRY".into() });
        assert_eq!(m.target_type, ColumnType::VarChar { length: Some(255) });
        assert!(m.fallback);
        assert!(m.warning.unwrap().contains("GEOMETRY"));
    }

    #[test]
    fn test_decimal_is_unmapped() {
        let m = map(ColumnType::Decimal { precision: 10, scale: 4 });
        assert_eq!(m.target_type, ColumnType::VarChar { length: Some(255) });
        assert!(m.fallback);
    }

    #[test]
    fn test_injected_rule_and_fallback() {
        let mapper = TableTypeMapper::new("mysql", "mssql")
            .with_rule("decimal", MappingRule::To(ColumnType::Decimal { precision: 18, scale: 2 }))
            .with_fallback(ColumnType::Text);
        assert_eq!(
            mapper
                .map_type(&ColumnType::Decimal { precision: 10, scale: 4 })
                .target_type,
            ColumnType::Decimal { precision: 18, scale: 2 }
        );
        assert_eq!(mapper.map_type(&ColumnType::Integer).target_type, ColumnType::Text);
    }

    #[test]
    fn test_map_table_keeps_column_attributes_and_reports_fallbacks() {
        let source = Table::new(
            "shop",
            "places",
            vec![
                Column::new("id", ColumnType::Integer).primary_key().auto_increment(),
                Column::new("shape", ColumnType::Other { raw: "geometry".into() }).not_null(),
            ],
        )
        .unwrap();
        let diag = CollectingDiagnostics::new();

        let target = map_table(&TableTypeMapper::mysql_to_mssql(), &source, "dbo", &diag);

        assert_eq!(target.schema, "dbo");
        assert_eq!(target.name, "places");
        assert!(target.columns[0].is_primary_key && target.columns[0].is_auto_increment);
        assert!(!target.columns[1].nullable);
        assert_eq!(
            target.columns[1].column_type,
            ColumnType::VarChar { length: Some(255) }
        );
        assert_eq!(
            diag.events(),
            vec![Diagnostic::TypeMappingFallback {
                table: "places".into(),
                column: "shape".into(),
                source_type: "GEOMETRY".into(),
                target_type: "VARCHAR(255)".into(),
            }]
        );
    }
}
