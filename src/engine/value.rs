use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shared::errors::{ImportError, ImportResult};

/// A single scalar column value as it travels through the engine.
///
/// `Null` is a present-but-null value; an *absent* column is modeled by the
/// surrounding `Option`/map lookup, never by `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Text form used for bulk loading. `None` maps to the store's null
    /// sentinel; booleans use Postgres text format.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(true) => Some("t".to_string()),
            Scalar::Bool(false) => Some("f".to_string()),
            Scalar::Int(v) => Some(v.to_string()),
            Scalar::Float(v) => Some(v.to_string()),
            Scalar::Text(v) => Some(v.clone()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert a JSON scalar. Arrays and objects have no place in a flat
    /// import record and are rejected.
    pub fn from_json(value: serde_json::Value) -> ImportResult<Self> {
        match value {
            serde_json::Value::Null => Ok(Scalar::Null),
            serde_json::Value::Bool(b) => Ok(Scalar::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Scalar::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Scalar::Float(f))
                } else {
                    Err(ImportError::Query(format!("Unrepresentable number: {}", n)))
                }
            }
            serde_json::Value::String(s) => Ok(Scalar::Text(s)),
            other => Err(ImportError::Query(format!(
                "Expected a scalar column value, got: {}",
                other
            ))),
        }
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

/// One flat incoming row: already parsed, already schema-checked upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    columns: HashMap<String, Scalar>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an upstream JSON object into a flat record.
    pub fn from_json(value: serde_json::Value) -> ImportResult<Self> {
        let map = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ImportError::Query(format!(
                    "Expected a JSON object row, got: {}",
                    other
                )))
            }
        };
        let mut columns = HashMap::with_capacity(map.len());
        for (name, value) in map {
            columns.insert(name, Scalar::from_json(value)?);
        }
        Ok(Self { columns })
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.columns.get(column)
    }

    /// Text form of a column, if present and non-null.
    pub fn text(&self, column: &str) -> Option<String> {
        self.columns.get(column).and_then(Scalar::to_text)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Scalar) {
        self.columns.insert(column.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Scalar)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Scalar)>>(iter: T) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// One currently stored entity, as fetched for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Internally generated identifier.
    pub id: i64,
    /// Stable externally supplied identifier used for matching.
    pub natural_key: String,
    /// Soft-delete marker; deletes flip this rather than removing the row.
    pub alive: bool,
    /// Full column snapshot, for fallback values in row construction.
    pub columns: Record,
}
