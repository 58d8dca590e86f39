//! partload ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Prepares records from sources without native partitioned reads for bulk
//! loading into a partitioned target store.
//!
//! # Components
//!
//! - **partition**: identifier -> 1-based target partition
//! - **planner**: total count -> one contiguous range per worker, shrunk by
//!   checkpoints
//! - **reader**: parallel, checkpointed range reads merged into one stream
//! - **source**: the adapter interface plus JSON-lines and CSV adapters
//! - **sink** / **job**: partitioned staging files and the end-to-end runner
//!
//! # Example
//!
//! ```no_run
//! use partload_ingest::{config::JobConfig, job::ExtractionJob};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = JobConfig::load(Some(Path::new("players.toml")))?;
//!     let report = ExtractionJob::from_config(config).run().await?;
//!     println!("{} rows staged", report.rows_read);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod job;
pub mod partition;
pub mod planner;
pub mod reader;
pub mod sink;
pub mod source;

pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use partition::assign;
pub use planner::{plan_ranges, PlanStatus, RangePlan, RangePlanner};
pub use reader::{MergedRowStream, ReaderOptions, ResumableRangeReader};
pub use source::{SourceAdapter, SourceKind};
