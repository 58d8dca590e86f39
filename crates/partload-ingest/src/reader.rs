//! Resumable parallel range reader
//!
//! Runs one task per non-empty range. Each task walks its range page by
//! page and, for every page, persists the page's start offset *before*
//! issuing the read.
//!
//! A batch counts as delivered only once the consumer polls the merged
//! stream again after receiving it, so consumers must finish staging a
//! batch before asking for the next one. A task does not move its
//! checkpoint past a page until that page's batch was delivered, and it
//! records its range end only after its last batch was delivered. A crash
//! therefore redoes at most the in-flight page of each worker on resume; no
//! row past a checkpoint can have been skipped.
//!
//! A task that has not delivered any row keeps its checkpoint at the range
//! start, so a range that read nothing is read again on the next run.
//!
//! Tasks share nothing but the checkpoint store (one key per worker) and
//! push their batches into a bounded channel. [`MergedRowStream`] drains
//! that channel, fixes the output schema from the first non-empty batch and
//! projects every later batch onto it. Order across workers is whatever
//! order the batches arrive in; within one worker rows keep source order.

use futures::{Stream, StreamExt};
use partload_common::{ExtractionRange, IngestError, Result, Row, RowBatch, Schema};
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::checkpoint::CheckpointStore;
use crate::source::SourceAdapter;

/// What a worker pushes to the merge point
enum WorkerItem {
    /// A page of rows plus the handle that tells the worker it was delivered
    Batch(RowBatch, oneshot::Sender<()>),
    Failed(usize, IngestError),
}

/// Default rows per page
pub const DEFAULT_PAGE_SIZE: u64 = 10_000;

/// Default number of batches buffered between workers and the consumer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Reader tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Rows per source read; `None` reads each range in one go
    pub page_size: Option<u64>,
    pub channel_capacity: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            page_size: Some(DEFAULT_PAGE_SIZE),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Reads planned ranges of one source in parallel
pub struct ResumableRangeReader {
    source: Arc<dyn SourceAdapter>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    options: ReaderOptions,
}

impl ResumableRangeReader {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
        options: ReaderOptions,
    ) -> Self {
        Self {
            source,
            checkpoints,
            options,
        }
    }

    /// Start one task per non-empty range; `ranges[i]` belongs to worker `i`.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// stream aborts the tasks that are still running.
    pub fn read(&self, ranges: &[ExtractionRange]) -> MergedRowStream {
        let source_name = self.source.name().to_string();

        if !self.source.has_stable_order() {
            warn!(
                source = %source_name,
                "Source does not declare a stable total ordering; resumed reads may not line up with the interrupted run"
            );
        }

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let mut tasks = Vec::new();

        for (worker, range) in ranges.iter().copied().enumerate() {
            if range.is_empty() {
                debug!(source = %source_name, worker, "Range empty, skipping worker");
                continue;
            }

            let task = RangeTask {
                worker,
                range,
                source: Arc::clone(&self.source),
                checkpoints: self.checkpoints.clone(),
                page_size: self.options.page_size,
            };
            let span = info_span!(
                "range_worker",
                source = %source_name,
                worker,
                start = range.start,
                size = range.size
            );
            tasks.push(tokio::spawn(task.run(tx.clone()).instrument(span)));
        }

        info!(source = %source_name, workers = tasks.len(), "Started range workers");

        MergedRowStream {
            source_name,
            rx: ReceiverStream::new(rx),
            tasks,
            schema: None,
            summary: ExtractionSummary::default(),
            unacked: None,
            finished: false,
        }
    }
}

struct RangeTask {
    worker: usize,
    range: ExtractionRange,
    source: Arc<dyn SourceAdapter>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    page_size: Option<u64>,
}

impl RangeTask {
    async fn run(self, tx: mpsc::Sender<WorkerItem>) {
        match self.drain(&tx).await {
            Ok(true) => debug!("Range complete"),
            Ok(false) => debug!("Consumer went away, stopping"),
            Err(e) => {
                error!(error = %e, "Range worker failed; rerun resumes from its last checkpoint");
                let _ = tx.send(WorkerItem::Failed(self.worker, e)).await;
            },
        }
    }

    /// Returns `Ok(false)` when the consumer hung up before the range finished.
    async fn drain(&self, tx: &mpsc::Sender<WorkerItem>) -> Result<bool> {
        let mut delivered = 0u64;

        for page in self.range.pages(self.page_size) {
            // nothing delivered yet: the range start is still the resume point
            let resume_at = if delivered > 0 { page.start } else { self.range.start };
            self.checkpoint(resume_at).await?;

            let rows = self.fetch_page(page).await.map_err(|e| self.attribute(e, page))?;
            if (rows.len() as u64) < page.size {
                warn!(
                    offset = page.start,
                    expected = page.size,
                    got = rows.len(),
                    "Source returned a short page; the row count may have changed since planning"
                );
            }
            debug!(offset = page.start, rows = rows.len(), "Fetched page");

            if rows.is_empty() {
                continue;
            }

            let count = rows.len() as u64;
            let (ack_tx, ack_rx) = oneshot::channel();
            let batch = RowBatch::new(self.worker, page.start, rows);
            if tx.send(WorkerItem::Batch(batch, ack_tx)).await.is_err() {
                return Ok(false);
            }
            if ack_rx.await.is_err() {
                // dropped unacknowledged: the batch may not have been staged
                return Ok(false);
            }
            delivered += count;
        }

        if delivered == 0 {
            warn!(
                start = self.range.start,
                size = self.range.size,
                "Range returned no rows; leaving it to be read again"
            );
            return Ok(true);
        }

        self.checkpoint(self.range.end()).await?;
        debug!(offset = self.range.end(), delivered, "Recorded range end");
        Ok(true)
    }

    async fn checkpoint(&self, offset: u64) -> Result<()> {
        match &self.checkpoints {
            Some(store) => store.write_offset(self.source.name(), self.worker, offset).await,
            None => Ok(()),
        }
    }

    async fn fetch_page(&self, page: ExtractionRange) -> Result<Vec<Row>> {
        let mut stream = self.source.fetch_range(page).await?;
        let mut rows = Vec::with_capacity(page.size.min(DEFAULT_PAGE_SIZE) as usize);
        while let Some(chunk) = stream.next().await {
            rows.extend(chunk?);
        }
        Ok(rows)
    }

    /// Tag a fetch failure with this worker and page
    fn attribute(&self, err: IngestError, page: ExtractionRange) -> IngestError {
        let message = match err {
            IngestError::SourceQuery { message, .. } => message,
            e @ (IngestError::CheckpointIo { .. } | IngestError::CheckpointCorrupt { .. }) => {
                return e
            },
            other => other.to_string(),
        };
        IngestError::SourceQuery {
            source_name: self.source.name().to_string(),
            worker: self.worker,
            start: page.start,
            size: page.size,
            message,
        }
    }
}

/// Running totals of a merged read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub rows: u64,
    pub batches: u64,
    pub failed_workers: BTreeSet<usize>,
}

/// Batches from every worker of one read, in arrival order.
///
/// Polling for the next item acknowledges the batch returned before it.
pub struct MergedRowStream {
    source_name: String,
    rx: ReceiverStream<WorkerItem>,
    tasks: Vec<JoinHandle<()>>,
    schema: Option<Arc<Schema>>,
    summary: ExtractionSummary,
    unacked: Option<oneshot::Sender<()>>,
    finished: bool,
}

impl MergedRowStream {
    pub fn summary(&self) -> &ExtractionSummary {
        &self.summary
    }

    /// Schema fixed by the first non-empty batch, if one arrived yet
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_deref()
    }

    fn unify(&mut self, mut batch: RowBatch) -> RowBatch {
        let schema = match &self.schema {
            Some(schema) => Arc::clone(schema),
            None => {
                let schema = Arc::new(Schema::infer(&batch.rows));
                info!(
                    source = %self.source_name,
                    worker = batch.worker,
                    fields = ?schema.fields,
                    "Inferred output schema"
                );
                self.schema = Some(Arc::clone(&schema));
                schema
            },
        };

        let mut dropped = 0usize;
        batch.rows = std::mem::take(&mut batch.rows)
            .into_iter()
            .map(|row| {
                let (row, extra) = schema.project(row);
                dropped += extra;
                row
            })
            .collect();
        if dropped > 0 {
            debug!(
                source = %self.source_name,
                worker = batch.worker,
                offset = batch.offset,
                dropped,
                "Dropped fields missing from the output schema"
            );
        }

        batch.schema = Some(schema);
        batch
    }
}

impl Stream for MergedRowStream {
    type Item = Result<RowBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(ack) = this.unacked.take() {
            // the worker may already be gone
            let _ = ack.send(());
        }
        if this.finished {
            return Poll::Ready(None);
        }

        match this.rx.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(WorkerItem::Batch(batch, ack))) => {
                this.summary.rows += batch.len() as u64;
                this.summary.batches += 1;
                this.unacked = Some(ack);
                Poll::Ready(Some(Ok(this.unify(batch))))
            },
            Poll::Ready(Some(WorkerItem::Failed(worker, e))) => {
                this.summary.failed_workers.insert(worker);
                Poll::Ready(Some(Err(e)))
            },
            Poll::Ready(None) => {
                this.finished = true;
                if this.summary.rows == 0 && this.summary.failed_workers.is_empty() {
                    error!(source = %this.source_name, "Extraction produced no rows");
                    return Poll::Ready(Some(Err(IngestError::EmptyResult {
                        source_name: this.source_name.clone(),
                    })));
                }
                info!(
                    source = %this.source_name,
                    rows = this.summary.rows,
                    batches = this.summary.batches,
                    failed_workers = this.summary.failed_workers.len(),
                    "All range workers finished"
                );
                Poll::Ready(None)
            },
        }
    }
}

impl Drop for MergedRowStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
