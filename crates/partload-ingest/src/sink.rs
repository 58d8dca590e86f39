//! Partitioned staging output
//!
//! Routes every row to its target partition and appends it as a JSON line
//! to `{dir}/part-{index:05}.jsonl`, ready for the target store's bulk
//! loader. Files are opened in append mode so a resumed run adds to what
//! the interrupted run already staged.
//!
//! [`PartitionedSink::sync`] makes everything written so far durable; call
//! it before acknowledging a batch upstream.

use partload_common::{Identifier, IdentifierKind, IngestError, Result, Row, RowBatch};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::partition::assign;

/// Counters collected while staging
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Rows written, keyed by 1-based partition index
    pub rows_per_partition: BTreeMap<u32, u64>,

    /// Rows without a usable identifier
    pub rejected: u64,
}

impl SinkStats {
    pub fn rows_written(&self) -> u64 {
        self.rows_per_partition.values().sum()
    }
}

/// Writes rows into one staging file per partition
pub struct PartitionedSink {
    dir: PathBuf,
    partition_count: u32,
    id_field: String,
    id_kind: IdentifierKind,
    writers: HashMap<u32, BufWriter<tokio::fs::File>>,
    dirty: BTreeSet<u32>,
    stats: SinkStats,
}

impl PartitionedSink {
    pub async fn create(
        dir: impl Into<PathBuf>,
        partition_count: u32,
        id_field: impl Into<String>,
        id_kind: IdentifierKind,
    ) -> Result<Self> {
        if partition_count == 0 {
            return Err(IngestError::invalid_argument(
                "partition count must be at least 1",
            ));
        }

        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            partition_count,
            id_field: id_field.into(),
            id_kind,
            writers: HashMap::new(),
            dirty: BTreeSet::new(),
            stats: SinkStats::default(),
        })
    }

    pub fn partition_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("part-{:05}.jsonl", index))
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Partition for a row, or `None` when its id is missing or of the wrong kind
    pub fn route(&self, row: &Row) -> Result<Option<u32>> {
        let Some(id) = row
            .get(&self.id_field)
            .and_then(|value| Identifier::from_value(value, self.id_kind))
        else {
            return Ok(None);
        };
        assign(&id, self.partition_count).map(Some)
    }

    pub async fn write_batch(&mut self, batch: &RowBatch) -> Result<()> {
        for (i, row) in batch.rows.iter().enumerate() {
            let Some(partition) = self.route(row)? else {
                self.stats.rejected += 1;
                debug!(
                    worker = batch.worker,
                    offset = batch.offset + i as u64,
                    id_field = %self.id_field,
                    "Row has no usable identifier, rejecting"
                );
                continue;
            };

            let mut line = serde_json::to_vec(row)?;
            line.push(b'\n');

            let writer = self.writer(partition).await?;
            writer.write_all(&line).await?;
            self.dirty.insert(partition);
            *self.stats.rows_per_partition.entry(partition).or_default() += 1;
        }
        Ok(())
    }

    /// Flush and fsync every staging file written since the last sync
    pub async fn sync(&mut self) -> Result<()> {
        for partition in std::mem::take(&mut self.dirty) {
            if let Some(writer) = self.writers.get_mut(&partition) {
                writer.flush().await?;
                writer.get_ref().sync_data().await?;
            }
        }
        Ok(())
    }

    async fn writer(&mut self, partition: u32) -> Result<&mut BufWriter<tokio::fs::File>> {
        if !self.writers.contains_key(&partition) {
            let path = Self::partition_path(&self.dir, partition);
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            self.writers.insert(partition, BufWriter::new(file));
        }
        self.writers
            .get_mut(&partition)
            .ok_or_else(|| IngestError::invalid_argument(format!("no writer for partition {}", partition)))
    }

    /// Flush every staging file and return the final counters
    pub async fn finish(mut self) -> Result<SinkStats> {
        self.sync().await?;
        if self.stats.rejected > 0 {
            warn!(
                rejected = self.stats.rejected,
                id_field = %self.id_field,
                id_kind = %self.id_kind,
                "Some rows were rejected for lacking a usable identifier"
            );
        }
        Ok(self.stats)
    }
}
