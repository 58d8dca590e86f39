//! Common types used across partload

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// Identifiers
// ============================================================================

/// Kind of record identifier, fixed for a whole ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    #[default]
    String,
    Integer,
}

impl std::str::FromStr for IdentifierKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "str" => Ok(IdentifierKind::String),
            "integer" | "int" | "int64" => Ok(IdentifierKind::Integer),
            _ => Err(format!("Invalid identifier kind: {}", s)),
        }
    }
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierKind::String => write!(f, "string"),
            IdentifierKind::Integer => write!(f, "integer"),
        }
    }
}

/// A record identifier used for partition placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Integer(i64),
    String(String),
}

impl Identifier {
    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::Integer(_) => IdentifierKind::Integer,
            Identifier::String(_) => IdentifierKind::String,
        }
    }

    /// Extract an identifier of the given kind from a row value.
    ///
    /// String ids accept JSON strings and numbers (rendered as text). Integer
    /// ids accept JSON integers and strings holding a signed 64-bit integer.
    /// Anything else yields `None`.
    pub fn from_value(value: &Value, kind: IdentifierKind) -> Option<Self> {
        match (kind, value) {
            (IdentifierKind::String, Value::String(s)) => Some(Identifier::String(s.clone())),
            (IdentifierKind::String, Value::Number(n)) => Some(Identifier::String(n.to_string())),
            (IdentifierKind::Integer, Value::Number(n)) => n.as_i64().map(Identifier::Integer),
            (IdentifierKind::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Identifier::Integer)
            },
            _ => None,
        }
    }

    /// Parse a textual identifier as the given kind.
    pub fn parse(raw: &str, kind: IdentifierKind) -> Option<Self> {
        match kind {
            IdentifierKind::String => Some(Identifier::String(raw.to_string())),
            IdentifierKind::Integer => raw.trim().parse::<i64>().ok().map(Identifier::Integer),
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identifier::Integer(v) => write!(f, "{}", v),
            Identifier::String(s) => write!(f, "{}", s),
        }
    }
}

// ============================================================================
// Ranges
// ============================================================================

/// A contiguous `[start, start + size)` window over a source's ordered
/// result set, assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ExtractionRange {
    /// Offset of the first row (skip)
    pub start: u64,

    /// Number of rows (limit)
    pub size: u64,
}

impl ExtractionRange {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Shrink the range so it starts at `offset`.
    ///
    /// Offsets before the start leave the range untouched; offsets at or
    /// past the end yield an empty range positioned at the end.
    pub fn resume_from(&self, offset: u64) -> Self {
        if offset <= self.start {
            *self
        } else if offset >= self.end() {
            Self::new(self.end(), 0)
        } else {
            Self::new(offset, self.end() - offset)
        }
    }

    /// Consecutive pages of at most `page_size` rows covering the range.
    ///
    /// `None` (or a page size covering the whole range) yields the range
    /// itself as a single page. An empty range yields no pages.
    pub fn pages(&self, page_size: Option<u64>) -> Pages {
        let page_size = match page_size {
            Some(p) if p > 0 => p,
            _ => self.size.max(1),
        };
        Pages {
            next: self.start,
            end: self.end(),
            page_size,
        }
    }
}

/// Lazy page iterator returned by [`ExtractionRange::pages`]
#[derive(Debug, Clone)]
pub struct Pages {
    next: u64,
    end: u64,
    page_size: u64,
}

impl Iterator for Pages {
    type Item = ExtractionRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let size = self.page_size.min(self.end - self.next);
        let page = ExtractionRange::new(self.next, size);
        self.next += size;
        Some(page)
    }
}

impl std::fmt::Display for ExtractionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

// ============================================================================
// Rows and batches
// ============================================================================

/// One source record: field name -> value, in source field order.
pub type Row = serde_json::Map<String, Value>;

/// Ordered list of field names shared by every row of a merged stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Schema {
    pub fields: Vec<String>,
}

impl Schema {
    /// Union of the field names of `rows`, in encounter order.
    pub fn infer(rows: &[Row]) -> Self {
        let mut fields: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !fields.iter().any(|f| f == key) {
                    fields.push(key.clone());
                }
            }
        }
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Coerce a row onto this schema.
    ///
    /// Missing fields become `null`; fields the schema does not know are
    /// dropped. Returns the projected row and the number of dropped fields.
    pub fn project(&self, mut row: Row) -> (Row, usize) {
        let mut projected = Row::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = row.remove(field).unwrap_or(Value::Null);
            projected.insert(field.clone(), value);
        }
        (projected, row.len())
    }
}

/// Rows produced by one worker for one page of its range.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    /// Worker that produced the batch
    pub worker: usize,

    /// Absolute source offset of the first row
    pub offset: u64,

    pub rows: Vec<Row>,

    /// Schema the rows conform to, once unified at the merge point
    pub schema: Option<Arc<Schema>>,
}

impl RowBatch {
    pub fn new(worker: usize, offset: u64, rows: Vec<Row>) -> Self {
        Self {
            worker,
            offset,
            rows,
            schema: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
