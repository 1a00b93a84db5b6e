//! Change events emitted to the consumer
//!
//! All types serialise to JSON so callers can hand events straight to a
//! downstream system. `Row` keeps relation column order, which a plain map
//! would lose.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operation {
    #[serde(rename = "I")]
    Insert,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
    #[serde(rename = "T")]
    Truncate,
}

impl Operation {
    pub fn as_char(self) -> char {
        match self {
            Operation::Insert => 'I',
            Operation::Update => 'U',
            Operation::Delete => 'D',
            Operation::Truncate => 'T',
        }
    }
}

/// A column value after type coercion
///
/// Unchanged TOASTed values carry no data on the wire, so `Toasted`
/// serialises as null just like `Null` does.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Toasted,
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Text(String),
}

/// An ordered column-name → value mapping
///
/// Entry order equals column order in the owning relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, CellValue)>,
}

impl Row {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: CellValue) {
        self.entries.push((name.into(), value));
    }

    /// Value of the named column, if present
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.entries
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, CellValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, CellValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Metadata for one column of a replicated table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub part_of_pkey: bool,
    pub type_id: u32,
    pub type_name: String,
    pub optional: bool,
}

/// Schema of a replicated table, cached per relation id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub db: String,
    pub schema_name: String,
    pub table: String,
    pub relation_id: u32,
    pub column_definitions: Vec<ColumnDefinition>,
}

/// Metadata of the transaction an event belongs to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionMetadata {
    pub tx_id: u32,
    pub begin_lsn: u64,
    pub commit_ts: DateTime<Utc>,
}

/// One row change (or one truncated relation) ready for the consumer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub op: Operation,
    pub message_id: Uuid,
    pub lsn: u64,
    pub transaction: TransactionMetadata,
    pub table_schema: TableSchema,
    /// Old row image; None for inserts, truncates, and updates that did not
    /// touch the replica identity
    pub before: Option<Row>,
    /// New row image; None for deletes and truncates
    pub after: Option<Row>,
}
