//! The in-memory snapshot data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// The result of loading one remote asset: the asset's reported update
/// time plus its decoded layers, keyed by layer name.
///
/// Iteration order is deterministic (`BTreeMap`), so a sync pass always
/// processes layers in the same order.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// When the provider last updated the remote asset, if reported.
    pub remote_updated: Option<DateTime<Utc>>,
    /// Decoded layers, keyed by layer name.
    pub layers: BTreeMap<String, Snapshot>,
}

/// A keyed record set for one logical layer.
///
/// Discarded after the merge; the persistent state lives in the target
/// table, never here.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Layer name within the parent collection.
    pub layer: String,
    /// Name of the column that uniquely identifies each row.
    ///
    /// Layers without one are not synchronizable and are skipped by the
    /// orchestrator.
    pub identity_column: Option<String>,
    /// Ordered column set. Every row has exactly one value per column.
    pub columns: Vec<Column>,
    /// Row data, one `Vec<Value>` per row, positionally matching
    /// `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl Snapshot {
    /// Index of the identity column within `columns`, if it is declared
    /// and present.
    pub fn identity_index(&self) -> Option<usize> {
        let identity = self.identity_column.as_deref()?;
        self.columns.iter().position(|c| c.name == identity)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One column of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Column types the sink can persist.
///
/// Geometry is carried as WKB and stored as `BYTEA`; interpreting it is
/// the decoder's concern, not the sink's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
    Double,
    Boolean,
    TimestampTz,
    Bytes,
    Geometry,
}

impl ColumnType {
    /// The PostgreSQL type this column maps to.
    pub fn pg_type(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Boolean => "BOOLEAN",
            Self::TimestampTz => "TIMESTAMPTZ",
            Self::Bytes | Self::Geometry => "BYTEA",
        }
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    BigInt(i64),
    Double(f64),
    Boolean(bool),
    TimestampTz(DateTime<Utc>),
    Bytes(Vec<u8>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as text, if it is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::TimestampTz(v)
    }
}
