//! Per-row value coercion against the target table's columns.
//!
//! For each target column, in declaration order:
//!
//! 1. look the value up by name (absent means NULL);
//! 2. character data bound for a length-limited column is re-encoded as
//!    UTF-8 with invalid sequences dropped, then cut to the maximum length;
//! 3. decimals become strings with exactly two fractional digits, rounded
//!    half-to-even, regardless of the column's declared scale;
//! 4. NULL in a non-nullable column discards the whole row.
//!
//! Step 3 loses precision for columns with more than two fractional digits.
//! It is a fixed policy; a per-column scale option would be the extension.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::core::schema::Column;
use crate::core::value::{Row, SqlValue};
use crate::diagnostics::{Diagnostic, DiagnosticsSink};

/// Number of fractional digits every decimal is formatted with.
pub const DECIMAL_PLACES: u32 = 2;

/// Why a row was excluded from its batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("NULL in non-nullable column `{column}`")]
    NullInNonNullable { column: String },
}

/// Coerces source rows into the shape of one target table.
pub struct RowCoercer<'a> {
    table: &'a str,
    columns: &'a [Column],
    max_lengths: HashMap<&'a str, usize>,
}

impl<'a> RowCoercer<'a> {
    /// Build a coercer for `columns` of target table `table`.
    pub fn new(table: &'a str, columns: &'a [Column]) -> Self {
        let max_lengths = columns
            .iter()
            .filter_map(|c| c.column_type.max_length().map(|n| (c.name.as_str(), n)))
            .collect();
        Self {
            table,
            columns,
            max_lengths,
        }
    }

    /// Coerce one row. The output has exactly one key per target column.
    pub fn coerce(
        &self,
        row: &Row,
        diagnostics: &dyn DiagnosticsSink,
    ) -> Result<Row, SkipReason> {
        let mut out = Row::new();

        for col in self.columns {
            let value = row.get(&col.name).cloned().unwrap_or(SqlValue::Null);
            let max_len = self.max_lengths.get(col.name.as_str()).copied();

            let value = match value {
                SqlValue::Text(s) => match max_len {
                    Some(max) => SqlValue::Text(self.truncate(&col.name, s, max, diagnostics)),
                    None => SqlValue::Text(s),
                },
                SqlValue::Bytes(b) if col.column_type.is_textual() => {
                    let s = decode_utf8_lossy_dropping(&b);
                    match max_len {
                        Some(max) => {
                            SqlValue::Text(self.truncate(&col.name, s, max, diagnostics))
                        }
                        None => SqlValue::Text(s),
                    }
                }
                SqlValue::Decimal(d) => SqlValue::Text(format_decimal(d)),
                other => other,
            };

            if value.is_null() && !col.nullable {
                return Err(SkipReason::NullInNonNullable {
                    column: col.name.clone(),
                });
            }

            out.insert(col.name.clone(), value);
        }

        Ok(out)
    }

    fn truncate(
        &self,
        column: &str,
        s: String,
        max: usize,
        diagnostics: &dyn DiagnosticsSink,
    ) -> String {
        // Lengths are in characters, not bytes.
        match s.char_indices().nth(max) {
            None => s,
            Some((cut, _)) => {
                diagnostics.record(Diagnostic::ValueTruncated {
                    table: self.table.to_string(),
                    column: column.to_string(),
                    original_len: s.chars().count(),
                    max_len: max,
                });
                s[..cut].to_string()
            }
        }
    }
}

/// Coerce `row` against `columns` of target table `table`.
///
/// Convenience wrapper around [`RowCoercer`] for one-off rows.
pub fn coerce_row(
    row: &Row,
    table: &str,
    columns: &[Column],
    diagnostics: &dyn DiagnosticsSink,
) -> Result<Row, SkipReason> {
    RowCoercer::new(table, columns).coerce(row, diagnostics)
}

/// Decode bytes as UTF-8, silently dropping invalid sequences.
pub fn decode_utf8_lossy_dropping(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Format a decimal with exactly [`DECIMAL_PLACES`] fractional digits,
/// rounding half to even (`3.005` → `"3.00"`, `3.015` → `"3.02"`).
pub fn format_decimal(d: Decimal) -> String {
    let mut rounded = d.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(DECIMAL_PLACES);
    rounded.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnType;
    use crate::diagnostics::CollectingDiagnostics;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", ColumnType::Integer).primary_key(),
            Column::new("code", ColumnType::VarChar { length: Some(5) }),
            Column::new("price", ColumnType::VarChar { length: Some(255) }),
            Column::new("note", ColumnType::Text),
        ]
    }

    #[test]
    fn test_output_has_one_key_per_target_column() {
        let diag = CollectingDiagnostics::new();
        let row = Row::new().with("id", 1).with("extra", "ignored");

        let out = coerce_row(&row, "t", &columns(), &diag).unwrap();

        assert_eq!(out.len(), 4);
        assert!(out.get("extra").is_none());
        assert_eq!(out.get("note"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_null_in_non_nullable_skips_row() {
        let diag = CollectingDiagnostics::new();
        let row = Row::new().with("code", "abc");

        let err = coerce_row(&row, "t", &columns(), &diag).unwrap_err();
        assert_eq!(
            err,
            SkipReason::NullInNonNullable {
                column: "id".into()
            }
        );
    }

    #[test]
    fn test_skip_names_the_non_nullable_column_regardless_of_order() {
        let diag = CollectingDiagnostics::new();
        let cols = vec![
            Column::new("a", ColumnType::Text),
            Column::new("b", ColumnType::Integer).not_null(),
            Column::new("c", ColumnType::Text),
        ];
        for row in [
            Row::new().with("a", "x").with("c", "y"),
            Row::new().with("c", "y").with("a", "x").with("b", SqlValue::Null),
        ] {
            let err = coerce_row(&row, "t", &cols, &diag).unwrap_err();
            assert_eq!(err.to_string(), "NULL in non-nullable column `b`");
        }
    }

    #[test]
    fn test_truncation_by_characters_with_diagnostic() {
        let diag = CollectingDiagnostics::new();
        let row = Row::new().with("id", 1).with("code", "héllo wörld");

        let out = coerce_row(&row, "t", &columns(), &diag).unwrap();

        assert_eq!(out.get("code").and_then(|v| v.as_text()), Some("héllo"));
        assert_eq!(
            diag.events(),
            vec![Diagnostic::ValueTruncated {
                table: "t".into(),
                column: "code".into(),
                original_len: 11,
                max_len: 5,
            }]
        );
    }

    #[test]
    fn test_short_text_untouched_and_silent() {
        let diag = CollectingDiagnostics::new();
        let row = Row::new().with("id", 1).with("code", "abcde");

        let out = coerce_row(&row, "t", &columns(), &diag).unwrap();

        assert_eq!(out.get("code").and_then(|v| v.as_text()), Some("abcde"));
        assert!(diag.events().is_empty());
    }

    #[test]
    fn test_invalid_utf8_dropped_before_truncation() {
        let diag = CollectingDiagnostics::new();
        let bytes = vec![b'a', 0xff, b'b', 0xc3, b'c', b'd', b'e', b'f'];
        let row = Row::new().with("id", 1).with("code", bytes);

        let out = coerce_row(&row, "t", &columns(), &diag).unwrap();

        assert_eq!(out.get("code").and_then(|v| v.as_text()), Some("abcde"));
        assert_eq!(diag.count(|e| matches!(e, Diagnostic::ValueTruncated { .. })), 1);
    }

    #[test]
    fn test_bytes_into_non_text_column_pass_through() {
        let diag = CollectingDiagnostics::new();
        let cols = vec![Column::new("blob", ColumnType::Other { raw: "VARBINARY".into() })];
        let row = Row::new().with("blob", vec![0xffu8, 0x00]);

        let out = coerce_row(&row, "t", &cols, &diag).unwrap();

        assert_eq!(out.get("blob"), Some(&SqlValue::Bytes(vec![0xff, 0x00])));
    }

    #[test]
    fn test_decimal_formatting() {
        assert_eq!(format_decimal(dec("3.1")), "3.10");
        assert_eq!(format_decimal(dec("3")), "3.00");
        assert_eq!(format_decimal(dec("-12.5")), "-12.50");
        assert_eq!(format_decimal(dec("1.23456")), "1.23");
    }

    #[test]
    fn test_decimal_rounds_half_to_even() {
        assert_eq!(format_decimal(dec("3.005")), "3.00");
        assert_eq!(format_decimal(dec("3.015")), "3.02");
        assert_eq!(format_decimal(dec("2.675")), "2.68");
        assert_eq!(format_decimal(dec("3.0051")), "3.01");
    }

    #[test]
    fn test_decimal_becomes_text_in_row() {
        let diag = CollectingDiagnostics::new();
        let row = Row::new().with("id", 1).with("price", dec("19.999"));

        let out = coerce_row(&row, "t", &columns(), &diag).unwrap();

        assert_eq!(out.get("price"), Some(&SqlValue::Text("20.00".into())));
    }

    #[test]
    fn test_decode_drops_invalid_sequences() {
        assert_eq!(decode_utf8_lossy_dropping(b"ok"), "ok");
        assert_eq!(decode_utf8_lossy_dropping(&[0xe2, 0x82, b'x']), "x");
        assert_eq!(decode_utf8_lossy_dropping("ü".as_bytes()), "ü");
    }
}
