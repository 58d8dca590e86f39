//! Common test utilities for partload integration tests
//!
//! [`MemorySource`] serves rows from a vector and can be told to fail or
//! hang on a given page, and to record what the checkpoint store held at
//! the moment each page was fetched.

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use partload_common::{ExtractionRange, IngestError, Result, Row};
use partload_ingest::source::RowStream;
use partload_ingest::{CheckpointStore, SourceAdapter};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// `count` rows shaped like `{"id": i, "name": "player{i}"}`
pub fn player_rows(count: u64) -> Vec<Row> {
    (0..count)
        .map(|i| row(json!({"id": i, "name": format!("player{}", i)})))
        .collect()
}

pub fn row(value: Value) -> Row {
    value.as_object().unwrap().clone()
}

/// A fetch observed by the source, with the checkpoint seen at that moment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFetch {
    pub page: ExtractionRange,
    pub worker: usize,
    pub checkpoint: Option<u64>,
}

pub struct MemorySource {
    name: String,
    rows: Vec<Row>,
    count_override: Option<u64>,
    ordered: bool,
    fail_at: HashSet<u64>,
    hang_at: Option<(u64, Arc<Notify>)>,
    observe_checkpoints: Option<(Arc<dyn CheckpointStore>, Vec<ExtractionRange>)>,
    completed: Mutex<Vec<ExtractionRange>>,
    observed: Mutex<Vec<ObservedFetch>>,
}

impl MemorySource {
    pub fn new(name: &str, rows: Vec<Row>) -> Self {
        Self {
            name: name.to_string(),
            rows,
            count_override: None,
            ordered: true,
            fail_at: HashSet::new(),
            hang_at: None,
            observe_checkpoints: None,
            completed: Mutex::new(Vec::new()),
            observed: Mutex::new(Vec::new()),
        }
    }

    /// Report `count` rows regardless of what the range reads return
    pub fn with_count(mut self, count: u64) -> Self {
        self.count_override = Some(count);
        self
    }

    pub fn unordered(mut self) -> Self {
        self.ordered = false;
        self
    }

    /// Fail any page starting at `offset`
    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_at.insert(offset);
        self
    }

    /// Never finish the page starting at `offset`; `notify` fires when it starts
    pub fn hang_at(mut self, offset: u64, notify: Arc<Notify>) -> Self {
        self.hang_at = Some((offset, notify));
        self
    }

    /// Record the checkpoint of the owning worker (per `planned`) on every fetch
    pub fn observe_checkpoints(
        mut self,
        store: Arc<dyn CheckpointStore>,
        planned: Vec<ExtractionRange>,
    ) -> Self {
        self.observe_checkpoints = Some((store, planned));
        self
    }

    pub fn completed_pages(&self) -> Vec<ExtractionRange> {
        self.completed.lock().unwrap().clone()
    }

    pub fn observed(&self) -> Vec<ObservedFetch> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_stable_order(&self) -> bool {
        self.ordered
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.count_override.unwrap_or(self.rows.len() as u64))
    }

    async fn fetch_range(&self, range: ExtractionRange) -> Result<RowStream> {
        if let Some((store, planned)) = &self.observe_checkpoints {
            let worker = planned
                .iter()
                .position(|r| range.start >= r.start && range.start < r.end())
                .unwrap();
            let checkpoint = store.read_offset(&self.name, worker).await?;
            self.observed.lock().unwrap().push(ObservedFetch {
                page: range,
                worker,
                checkpoint,
            });
        }

        if let Some((offset, notify)) = &self.hang_at {
            if *offset == range.start {
                notify.notify_one();
                std::future::pending::<()>().await;
            }
        }

        if self.fail_at.contains(&range.start) {
            return Err(IngestError::SourceQuery {
                source_name: self.name.clone(),
                worker: 0,
                start: range.start,
                size: range.size,
                message: "connection reset by peer".to_string(),
            });
        }

        let len = self.rows.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end().min(len) as usize;
        let rows = self.rows[start..end].to_vec();
        self.completed.lock().unwrap().push(range);

        let chunks: Vec<Result<Vec<Row>>> = rows.chunks(4).map(|c| Ok(c.to_vec())).collect();
        Ok(stream::iter(chunks).boxed())
    }
}
