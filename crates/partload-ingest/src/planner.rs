//! Range planning
//!
//! Splits a source's total row count into one contiguous range per worker,
//! then shrinks each range by whatever that worker already checkpointed.

use partload_common::{ExtractionRange, IngestError, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;

/// Where a plan leaves the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// At least one range still has rows to read
    Ready,
    /// Rows exist but every worker already checkpointed past its range
    Drained,
    /// The source reported zero rows
    EmptySource,
}

/// Ranges for one planning call, indexed by worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangePlan {
    pub total_count: u64,
    pub ranges: Vec<ExtractionRange>,
}

impl RangePlan {
    pub fn status(&self) -> PlanStatus {
        if self.total_count == 0 {
            PlanStatus::EmptySource
        } else if self.ranges.iter().all(ExtractionRange::is_empty) {
            PlanStatus::Drained
        } else {
            PlanStatus::Ready
        }
    }

    /// Rows still to be read across all workers
    pub fn remaining(&self) -> u64 {
        self.ranges.iter().map(|r| r.size).sum()
    }
}

/// Even split of `[0, total)` into `parallelism` contiguous ranges.
///
/// The first `total % parallelism` ranges get one extra row.
pub fn plan_ranges(total: u64, parallelism: usize) -> Result<Vec<ExtractionRange>> {
    if parallelism == 0 {
        return Err(IngestError::invalid_argument("parallelism must be at least 1"));
    }

    let workers = parallelism as u64;
    let base = total / workers;
    let remainder = total % workers;

    let mut ranges = Vec::with_capacity(parallelism);
    let mut start = 0u64;
    for worker in 0..workers {
        let size = if worker < remainder { base + 1 } else { base };
        ranges.push(ExtractionRange::new(start, size));
        start += size;
    }
    Ok(ranges)
}

/// Plans ranges for a source, consulting checkpoints when a store is given
pub struct RangePlanner<'a> {
    checkpoints: Option<&'a dyn CheckpointStore>,
}

impl<'a> RangePlanner<'a> {
    pub fn new(checkpoints: Option<&'a dyn CheckpointStore>) -> Self {
        Self { checkpoints }
    }

    pub async fn plan(&self, source: &str, total: u64, parallelism: usize) -> Result<RangePlan> {
        let mut ranges = plan_ranges(total, parallelism)?;

        if let Some(store) = self.checkpoints {
            for (worker, range) in ranges.iter_mut().enumerate() {
                let Some(offset) = store.read_offset(source, worker).await? else {
                    continue;
                };
                let resumed = range.resume_from(offset);
                if resumed != *range {
                    debug!(
                        source,
                        worker,
                        offset,
                        planned = %range,
                        resumed = %resumed,
                        "Applied checkpoint"
                    );
                }
                *range = resumed;
            }
        }

        let plan = RangePlan {
            total_count: total,
            ranges,
        };

        info!(
            source,
            total,
            parallelism,
            remaining = plan.remaining(),
            status = ?plan.status(),
            "Planned extraction ranges"
        );

        Ok(plan)
    }
}
