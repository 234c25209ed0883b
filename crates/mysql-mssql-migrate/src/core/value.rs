//! SQL value and row types for database-agnostic data transfer.
//!
//! Rows are keyed by column name rather than position: source and target
//! tables are matched by name, and the target may declare its columns in a
//! different order than the source.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

/// A single column value.
///
/// Implements `Eq` and `Hash` so that whole rows can be placed in hash sets
/// for reconciliation. Floating point values compare by bit pattern, which
/// means `NaN == NaN` and `0.0 != -0.0`.
#[derive(Debug, Clone)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value (BIT).
    Bool(bool),

    /// Any integer width, widened to 64 bits.
    Int(i64),

    /// Floating point (FLOAT, DOUBLE, REAL).
    Float(f64),

    /// Fixed-point decimal (DECIMAL, NUMERIC).
    Decimal(Decimal),

    /// Valid UTF-8 text.
    Text(String),

    /// Raw bytes. Also used for character data that was not valid UTF-8.
    Bytes(Vec<u8>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Borrow the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Bool(_) => 1,
            SqlValue::Int(_) => 2,
            SqlValue::Float(_) => 3,
            SqlValue::Decimal(_) => 4,
            SqlValue::Text(_) => 5,
            SqlValue::Bytes(_) => 6,
            SqlValue::Date(_) => 7,
            SqlValue::Time(_) => 8,
            SqlValue::DateTime(_) => 9,
        }
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => true,
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a == b,
            (SqlValue::Int(a), SqlValue::Int(b)) => a == b,
            (SqlValue::Float(a), SqlValue::Float(b)) => a.to_bits() == b.to_bits(),
            (SqlValue::Decimal(a), SqlValue::Decimal(b)) => a == b,
            (SqlValue::Text(a), SqlValue::Text(b)) => a == b,
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => a == b,
            (SqlValue::Date(a), SqlValue::Date(b)) => a == b,
            (SqlValue::Time(a), SqlValue::Time(b)) => a == b,
            (SqlValue::DateTime(a), SqlValue::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Discriminator keeps Int(1) and Text("1") apart.
        self.discriminant().hash(state);
        match self {
            SqlValue::Null => {}
            SqlValue::Bool(v) => v.hash(state),
            SqlValue::Int(v) => v.hash(state),
            SqlValue::Float(v) => v.to_bits().hash(state),
            // Decimal's Hash is consistent with its Eq (1.0 == 1.00).
            SqlValue::Decimal(v) => v.hash(state),
            SqlValue::Text(v) => v.hash(state),
            SqlValue::Bytes(v) => v.hash(state),
            SqlValue::Date(v) => v.hash(state),
            SqlValue::Time(v) => v.hash(state),
            SqlValue::DateTime(v) => v.hash(state),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "'{}'", v),
            SqlValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            SqlValue::Date(v) => write!(f, "{}", v),
            SqlValue::Time(v) => write!(f, "{}", v),
            SqlValue::DateTime(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A row: column name to value.
///
/// Two rows are equal iff they have the same column names and every value
/// is equal. Column iteration order is by name, not by table declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Row(BTreeMap<String, SqlValue>);

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    /// Set a column value, replacing any previous value.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        self.0.insert(column.into(), value);
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    /// Number of columns present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.0.iter()
    }

    /// Values for the given columns in the given order; absent columns are NULL.
    pub fn values_for(&self, columns: &[String]) -> Vec<SqlValue> {
        columns
            .iter()
            .map(|c| self.0.get(c).cloned().unwrap_or(SqlValue::Null))
            .collect()
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Row(iter.into_iter().collect())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;

    #[test]
    fn test_rows_compare_by_name_not_insertion_order() {
        let a = Row::new().with("id", 1).with("name", "alice");
        let b = Row::new().with("name", "alice").with("id", 1);
        assert_eq!(a, b);

        let set: HashSet<Row> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_int_and_text_are_distinct() {
        let mut set = HashSet::new();
        set.insert(SqlValue::Int(1));
        set.insert(SqlValue::Text("1".into()));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_decimal_equality_ignores_scale() {
        let a = SqlValue::Decimal(Decimal::from_str("1.0").unwrap());
        let b = SqlValue::Decimal(Decimal::from_str("1.00").unwrap());
        assert_eq!(a, b);
        let set: HashSet<SqlValue> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_values_for_fills_missing_with_null() {
        let row = Row::new().with("id", 7);
        let cols = vec!["id".to_string(), "email".to_string()];
        assert_eq!(row.values_for(&cols), vec![SqlValue::Int(7), SqlValue::Null]);
    }

    #[test]
    fn test_option_into_value() {
        let v: SqlValue = Option::<i64>::None.into();
        assert!(v.is_null());
        let v: SqlValue = Some("x").into();
        assert_eq!(v.as_text(), Some("x"));
    }
}
