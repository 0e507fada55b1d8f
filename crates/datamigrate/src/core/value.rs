//! Row and value types shared by the engines.
//!
//! Rows travel as JSON objects keyed by ORM field name. `serde_json` is
//! built with `preserve_order`, so a row keeps the column order of the
//! SELECT that produced it.

use serde_json::{Map, Value};

use super::schema::{FieldKind, ModelMeta};

/// One table row keyed by field name.
pub type RowDict = Map<String, Value>;

/// A page of rows for one model, in ascending primary key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportBatch {
    /// Rows in this batch.
    pub rows: Vec<RowDict>,
    /// Primary key of the last row, for keyset pagination continuity.
    pub last_key: Option<Value>,
}

impl ExportBatch {
    pub fn new(rows: Vec<RowDict>, last_key: Option<Value>) -> Self {
        Self { rows, last_key }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Separator between the parts of a composite key fragment.
const KEY_SEPARATOR: char = '\u{1f}';

/// Comparable text form of one key value.
///
/// Values read back from MySQL and values read from a payload must land on
/// the same fragment: booleans are stored as 0/1, so they compare as such.
pub fn key_fragment(value: &Value) -> String {
    match value {
        Value::Null => "\u{0}null".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Comparable text form of a (possibly composite) key.
pub fn composite_key<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut out = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            out.push(KEY_SEPARATOR);
        }
        out.push_str(&key_fragment(value));
    }
    out
}

/// Key text as a case-insensitive PAD SPACE collation compares it: each
/// fragment lowercased with trailing spaces removed.
pub fn fold_key(key: &str) -> String {
    key.split(KEY_SEPARATOR)
        .map(|fragment| fragment.trim_end_matches(' ').to_lowercase())
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string())
}

/// Key of a row over the given fields; missing fields read as NULL.
pub fn row_key(row: &RowDict, fields: &[String]) -> String {
    composite_key(fields.iter().map(|f| row.get(f).unwrap_or(&Value::Null)))
}

/// Read a value as a signed integer (numbers and numeric strings).
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Shape a driver value according to the declared field kind.
pub fn coerce_field(kind: FieldKind, value: Value) -> Value {
    match (kind, value) {
        (FieldKind::Bool, Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::Bool(i != 0),
            None => Value::Number(n),
        },
        (FieldKind::Bool, Value::String(s)) if s == "0" || s == "1" => Value::Bool(s == "1"),
        (FieldKind::Json, Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        (_, value) => value,
    }
}

/// Build a row from a result set row, coercing values by field kind.
///
/// `columns` are the SELECT aliases, which are already field names.
pub fn assemble_row(meta: &ModelMeta, columns: &[String], values: Vec<Value>) -> RowDict {
    let mut row = RowDict::with_capacity(columns.len());
    for (name, value) in columns.iter().zip(values) {
        let kind = meta.field(name).map(|f| f.kind).unwrap_or_default();
        row.insert(name.clone(), coerce_field(kind, value));
    }
    row
}
