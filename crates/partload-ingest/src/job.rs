//! Extraction job runner
//!
//! Runs one source end to end:
//! 1. Count: ask the source for its total row count
//! 2. Plan: split the count into worker ranges, applying checkpoints
//! 3. Read: fan out range workers and merge their batches
//! 4. Stage: route every row to its partition's staging file
//!
//! Re-running a job after a partial failure picks up from the checkpoints,
//! so only the unfinished part of each range is read again.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use partload_common::{ExtractionRange, IngestError, Result, RowBatch};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::{validate_source_name, JobConfig};
use crate::planner::{PlanStatus, RangePlan, RangePlanner};
use crate::reader::ResumableRangeReader;
use crate::sink::PartitionedSink;
use crate::source::{build_source, SourceAdapter};

/// File name of the run report inside the output directory
pub const REPORT_FILE: &str = "_report.json";

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    /// Checkpoints show every range was already read
    AlreadyComplete,
    /// Some workers failed; rerun to resume them
    PartiallyFailed,
}

/// Summary of one run, also written to `{output.dir}/_report.json`
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub run_id: Uuid,
    pub source: String,
    pub outcome: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_count: u64,
    pub ranges: Vec<ExtractionRange>,
    pub rows_read: u64,
    pub rows_per_partition: BTreeMap<u32, u64>,
    pub rejected: u64,
    pub failed_workers: Vec<usize>,
}

/// Progress notifications emitted while a job runs
#[derive(Debug)]
pub enum JobEvent<'a> {
    Planned(&'a RangePlan),
    Batch(&'a RowBatch),
}

pub struct ExtractionJob {
    config: JobConfig,
    source: Arc<dyn SourceAdapter>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl ExtractionJob {
    /// Job reading the source described by the configuration
    pub fn from_config(config: JobConfig) -> Self {
        let source = build_source(&config.source.name, config.source.kind, &config.source.path);
        Self::with_source(config, source)
    }

    /// Job reading a caller-provided adapter (e.g. a database client)
    pub fn with_source(config: JobConfig, source: Arc<dyn SourceAdapter>) -> Self {
        let checkpoints = config
            .extract
            .checkpoint_dir
            .as_ref()
            .map(|dir| Arc::new(FileCheckpointStore::new(dir)) as Arc<dyn CheckpointStore>);

        Self {
            config,
            source,
            checkpoints,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Count the source and plan the remaining ranges
    pub async fn plan(&self) -> Result<RangePlan> {
        // the adapter's name keys the checkpoint files, not the configured one
        validate_source_name(self.source.name())?;
        let total = self.source.count().await?;
        RangePlanner::new(self.checkpoints.as_deref())
            .plan(self.source.name(), total, self.config.extract.parallelism)
            .await
    }

    pub async fn run(&self) -> Result<JobReport> {
        self.run_with(|_| {}).await
    }

    /// Run the job, calling `on_event` as it progresses
    pub async fn run_with<F>(&self, on_event: F) -> Result<JobReport>
    where
        F: FnMut(JobEvent<'_>) + Send,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("extraction_job", %run_id, source = %self.source.name());
        self.execute(run_id, on_event).instrument(span).await
    }

    async fn execute<F>(&self, run_id: Uuid, mut on_event: F) -> Result<JobReport>
    where
        F: FnMut(JobEvent<'_>) + Send,
    {
        let started_at = Utc::now();
        self.config.validate()?;

        let plan = self.plan().await?;
        on_event(JobEvent::Planned(&plan));

        let mut report = JobReport {
            run_id,
            source: self.source.name().to_string(),
            outcome: JobOutcome::Completed,
            started_at,
            finished_at: started_at,
            total_count: plan.total_count,
            ranges: plan.ranges.clone(),
            rows_read: 0,
            rows_per_partition: BTreeMap::new(),
            rejected: 0,
            failed_workers: Vec::new(),
        };

        match plan.status() {
            PlanStatus::EmptySource => {
                error!("Source count is zero; nothing to extract");
                return Err(IngestError::EmptyResult {
                    source_name: report.source,
                });
            },
            PlanStatus::Drained => {
                info!("Every range is already checkpointed as complete");
                report.outcome = JobOutcome::AlreadyComplete;
                report.finished_at = Utc::now();
                return Ok(report);
            },
            PlanStatus::Ready => {},
        }

        let mut sink = PartitionedSink::create(
            &self.config.output.dir,
            self.config.partition.count,
            &self.config.partition.id_field,
            self.config.partition.id_kind,
        )
        .await?;

        let reader = ResumableRangeReader::new(
            Arc::clone(&self.source),
            self.checkpoints.clone(),
            self.config.reader_options(),
        );
        let mut stream = reader.read(&plan.ranges);
        let mut worker_errors = Vec::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(batch) => {
                    // durable before the next poll acknowledges it to its worker
                    sink.write_batch(&batch).await?;
                    sink.sync().await?;
                    on_event(JobEvent::Batch(&batch));
                },
                Err(e) if e.is_worker_scoped() => worker_errors.push(e),
                Err(e) => return Err(e),
            }
        }

        let summary = stream.summary().clone();
        let stats = sink.finish().await?;

        report.rows_read = summary.rows;
        report.rows_per_partition = stats.rows_per_partition;
        report.rejected = stats.rejected;
        report.failed_workers = summary.failed_workers.into_iter().collect();
        report.finished_at = Utc::now();
        if !worker_errors.is_empty() {
            report.outcome = JobOutcome::PartiallyFailed;
        }

        self.write_report(&report).await?;

        info!(
            outcome = ?report.outcome,
            rows_read = report.rows_read,
            rejected = report.rejected,
            partitions = report.rows_per_partition.len(),
            "Extraction finished"
        );

        match worker_errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(report),
        }
    }

    async fn write_report(&self, report: &JobReport) -> Result<()> {
        let path = self.config.output.dir.join(REPORT_FILE);
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }
}
