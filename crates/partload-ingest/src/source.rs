//! Source adapters
//!
//! A source adapter exposes one ordered result set through two queries: a
//! total count, and a skip/limit read over `[start, start + size)`. Anything
//! that can answer both (relational, graph, column or key-value clients)
//! plugs into the planner and reader through [`SourceAdapter`].
//!
//! The file adapters here order rows by their position in the file, which
//! makes skip/limit reads repeatable across retries.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use partload_common::{ExtractionRange, IngestError, Result, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::{LinesStream, ReceiverStream};

/// Rows per chunk emitted by the file adapters
pub const CHUNK_ROWS: usize = 1024;

/// Lazily produced chunks of rows for one range read
pub type RowStream = BoxStream<'static, Result<Vec<Row>>>;

/// Capability interface every source implements
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Logical source name, used for checkpoints and logs
    fn name(&self) -> &str;

    /// Whether skip/limit reads see rows in a stable total order
    ///
    /// Sources that cannot guarantee this still run, but resumed reads may
    /// return different rows than the interrupted run would have.
    fn has_stable_order(&self) -> bool {
        false
    }

    /// Total number of rows the range reads will cover
    async fn count(&self) -> Result<u64>;

    /// Rows `[range.start, range.end())` in source order
    async fn fetch_range(&self, range: ExtractionRange) -> Result<RowStream>;
}

/// Supported built-in source kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// One JSON object per line
    Jsonl,
    /// Comma separated values with a header row
    Csv,
}

/// Build the adapter for a configured source
pub fn build_source(name: &str, kind: SourceKind, path: &Path) -> Arc<dyn SourceAdapter> {
    match kind {
        SourceKind::Jsonl => Arc::new(JsonLinesSource::new(name, path)),
        SourceKind::Csv => Arc::new(CsvSource::new(name, path)),
    }
}

fn source_error(source: &str, range: ExtractionRange, message: impl ToString) -> IngestError {
    // worker is filled in by the reader, which knows who issued the read
    IngestError::SourceQuery {
        source_name: source.to_string(),
        worker: 0,
        start: range.start,
        size: range.size,
        message: message.to_string(),
    }
}

// ============================================================================
// JSON lines
// ============================================================================

/// Reads a JSON-lines file; blank lines are ignored
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    name: String,
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    async fn lines(&self, range: ExtractionRange) -> Result<LinesStream<BufReader<tokio::fs::File>>> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| source_error(&self.name, range, format!("{}: {}", self.path.display(), e)))?;
        Ok(LinesStream::new(BufReader::new(file).lines()))
    }
}

fn parse_json_row(line: &str) -> std::result::Result<Row, String> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(e.to_string()),
    }
}

#[async_trait]
impl SourceAdapter for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_stable_order(&self) -> bool {
        true
    }

    async fn count(&self) -> Result<u64> {
        let range = ExtractionRange::default();
        let mut lines = self.lines(range).await?;
        let mut count = 0u64;
        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| source_error(&self.name, range, e))?;
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn fetch_range(&self, range: ExtractionRange) -> Result<RowStream> {
        let name = self.name.clone();
        let stream = self
            .lines(range)
            .await?
            .filter(|line| {
                let keep = !matches!(line, Ok(l) if l.trim().is_empty());
                futures::future::ready(keep)
            })
            .skip(range.start as usize)
            .take(range.size as usize)
            .map(move |line| {
                let line = line.map_err(|e| source_error(&name, range, e))?;
                parse_json_row(&line).map_err(|e| source_error(&name, range, e))
            })
            .chunks(CHUNK_ROWS)
            .map(|chunk| chunk.into_iter().collect::<Result<Vec<Row>>>());

        Ok(stream.boxed())
    }
}

// ============================================================================
// CSV
// ============================================================================

/// Reads a headed CSV file; every value is kept as a string
#[derive(Debug, Clone)]
pub struct CsvSource {
    name: String,
    path: PathBuf,
}

impl CsvSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    fn open(&self) -> std::result::Result<csv::Reader<std::fs::File>, csv::Error> {
        csv::ReaderBuilder::new().has_headers(true).from_path(&self.path)
    }
}

fn csv_row(headers: &csv::StringRecord, record: &csv::StringRecord) -> Row {
    headers
        .iter()
        .zip(record.iter())
        .map(|(field, value)| (field.to_string(), Value::String(value.to_string())))
        .collect()
}

#[async_trait]
impl SourceAdapter for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_stable_order(&self) -> bool {
        true
    }

    async fn count(&self) -> Result<u64> {
        let source = self.clone();
        let range = ExtractionRange::default();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut reader = source.open().map_err(|e| source_error(&source.name, range, e))?;
            let mut count = 0u64;
            for record in reader.records() {
                record.map_err(|e| source_error(&source.name, range, e))?;
                count += 1;
            }
            Ok(count)
        })
        .await
        .map_err(|e| source_error(&self.name, range, e))?
    }

    async fn fetch_range(&self, range: ExtractionRange) -> Result<RowStream> {
        let source = self.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Vec<Row>>>(2);

        // the csv reader is blocking; feed chunks back through a bounded channel
        tokio::task::spawn_blocking(move || {
            let send_err = |e: IngestError| {
                let _ = tx.blocking_send(Err(e));
            };

            let mut reader = match source.open() {
                Ok(reader) => reader,
                Err(e) => return send_err(source_error(&source.name, range, e)),
            };
            let headers = match reader.headers() {
                Ok(headers) => headers.clone(),
                Err(e) => return send_err(source_error(&source.name, range, e)),
            };

            let mut chunk = Vec::with_capacity(CHUNK_ROWS);
            let records = reader
                .records()
                .skip(range.start as usize)
                .take(range.size as usize);
            for record in records {
                match record {
                    Ok(record) => chunk.push(csv_row(&headers, &record)),
                    Err(e) => return send_err(source_error(&source.name, range, e)),
                }
                if chunk.len() == CHUNK_ROWS {
                    let full = std::mem::replace(&mut chunk, Vec::with_capacity(CHUNK_ROWS));
                    if tx.blocking_send(Ok(full)).is_err() {
                        // receiver dropped, nobody wants the rest
                        return;
                    }
                }
            }
            if !chunk.is_empty() {
                let _ = tx.blocking_send(Ok(chunk));
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}
