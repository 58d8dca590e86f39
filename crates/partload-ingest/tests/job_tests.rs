//! End-to-end tests for extraction jobs
//!
//! Each test stages a source in a temp directory, runs a job against it and
//! checks the per-partition staging files plus the run report.

mod common;

use common::{player_rows, MemorySource};
use partload_common::{IdentifierKind, IngestError};
use partload_ingest::config::{ExtractConfig, JobConfig, OutputConfig, PartitionConfig, SourceConfig};
use partload_ingest::job::{ExtractionJob, JobEvent, JobOutcome, REPORT_FILE};
use partload_ingest::sink::PartitionedSink;
use partload_ingest::{CheckpointStore, FileCheckpointStore, SourceKind};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

// ============================================================================
// Test Helpers
// ============================================================================

fn job_config(dir: &Path, kind: SourceKind, source_file: &str, id_kind: IdentifierKind) -> JobConfig {
    JobConfig {
        source: SourceConfig {
            name: "players".to_string(),
            kind,
            path: dir.join(source_file),
        },
        partition: PartitionConfig {
            count: 10,
            id_field: "id".to_string(),
            id_kind,
        },
        extract: ExtractConfig {
            parallelism: 3,
            page_size: 10,
            checkpoint_dir: Some(dir.join("checkpoints")),
            channel_capacity: 2,
        },
        output: OutputConfig {
            dir: dir.join("staging"),
        },
    }
}

fn write_jsonl(path: &Path, count: u64) {
    let mut file = std::fs::File::create(path).unwrap();
    for i in 0..count {
        writeln!(file, "{{\"id\": {}, \"name\": \"player{}\"}}", i, i).unwrap();
    }
}

/// Every staged id, sorted, across all partition files
fn staged_ids(dir: &Path, partitions: u32) -> Vec<i64> {
    let mut ids = Vec::new();
    for index in 1..=partitions {
        let path = PartitionedSink::partition_path(dir, index);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in content.lines() {
            let row: Value = serde_json::from_str(line).unwrap();
            ids.push(row["id"].as_i64().unwrap());
        }
    }
    ids.sort_unstable();
    ids
}

fn read_report(dir: &Path) -> Value {
    let content = std::fs::read_to_string(dir.join(REPORT_FILE)).unwrap();
    serde_json::from_str(&content).unwrap()
}

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test]
async fn test_jsonl_job_stages_every_row() {
    let dir = TempDir::new().unwrap();
    write_jsonl(&dir.path().join("players.jsonl"), 100);
    let config = job_config(dir.path(), SourceKind::Jsonl, "players.jsonl", IdentifierKind::Integer);
    let staging = config.output.dir.clone();

    let report = ExtractionJob::from_config(config).run().await.unwrap();

    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.total_count, 100);
    assert_eq!(report.rows_read, 100);
    assert_eq!(report.rejected, 0);
    assert!(report.failed_workers.is_empty());

    // integer ids route to id % 10 + 1, ten rows each
    assert_eq!(report.rows_per_partition.len(), 10);
    assert!(report.rows_per_partition.values().all(|rows| *rows == 10));
    let part_three = std::fs::read_to_string(PartitionedSink::partition_path(&staging, 3)).unwrap();
    for line in part_three.lines() {
        let row: Value = serde_json::from_str(line).unwrap();
        assert_eq!(row["id"].as_i64().unwrap() % 10, 2);
    }
    assert_eq!(staged_ids(&staging, 10), (0..100).collect::<Vec<_>>());

    let written = read_report(&staging);
    assert_eq!(written["outcome"], "completed");
    assert_eq!(written["rows_read"], 100);
    assert_eq!(written["source"], "players");
}

#[tokio::test]
async fn test_rerun_after_completion_is_already_complete() {
    let dir = TempDir::new().unwrap();
    write_jsonl(&dir.path().join("players.jsonl"), 25);
    let config = job_config(dir.path(), SourceKind::Jsonl, "players.jsonl", IdentifierKind::Integer);
    let staging = config.output.dir.clone();

    let first = ExtractionJob::from_config(config.clone()).run().await.unwrap();
    assert_eq!(first.outcome, JobOutcome::Completed);

    let second = ExtractionJob::from_config(config).run().await.unwrap();
    assert_eq!(second.outcome, JobOutcome::AlreadyComplete);
    assert_eq!(second.rows_read, 0);
    assert_ne!(first.run_id, second.run_id);

    // nothing staged twice
    assert_eq!(staged_ids(&staging, 10), (0..25).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_csv_job_with_string_ids() {
    let dir = TempDir::new().unwrap();
    let mut file = std::fs::File::create(dir.path().join("players.csv")).unwrap();
    writeln!(file, "id,name").unwrap();
    for name in ["Tim Duncan", "Tony Parker", "Manu Ginobili"] {
        writeln!(file, "{},{}", name, name.to_lowercase()).unwrap();
    }
    drop(file);

    let config = job_config(dir.path(), SourceKind::Csv, "players.csv", IdentifierKind::String);
    let staging = config.output.dir.clone();
    let report = ExtractionJob::from_config(config).run().await.unwrap();

    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_per_partition.values().sum::<u64>(), 3);

    let duncan = std::fs::read_to_string(PartitionedSink::partition_path(&staging, 8)).unwrap();
    assert!(duncan.contains("\"Tim Duncan\""));
}

#[tokio::test]
async fn test_progress_events() {
    let dir = TempDir::new().unwrap();
    write_jsonl(&dir.path().join("players.jsonl"), 40);
    let config = job_config(dir.path(), SourceKind::Jsonl, "players.jsonl", IdentifierKind::Integer);

    let mut planned = 0u64;
    let mut batched = 0u64;
    ExtractionJob::from_config(config)
        .run_with(|event| match event {
            JobEvent::Planned(plan) => planned = plan.remaining(),
            JobEvent::Batch(batch) => batched += batch.len() as u64,
        })
        .await
        .unwrap();

    assert_eq!(planned, 40);
    assert_eq!(batched, 40);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_partial_failure_then_resume() {
    let dir = TempDir::new().unwrap();
    let config = job_config(dir.path(), SourceKind::Jsonl, "unused", IdentifierKind::Integer);
    let staging = config.output.dir.clone();

    let failing = Arc::new(MemorySource::new("players", player_rows(100)).fail_at(44));
    let err = ExtractionJob::with_source(config.clone(), failing)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::SourceQuery {
            worker: 1,
            start: 44,
            ..
        }
    ));

    let report = read_report(&staging);
    assert_eq!(report["outcome"], "partially_failed");
    assert_eq!(report["failed_workers"], serde_json::json!([1]));
    assert_eq!(report["rows_read"], 77);

    let healthy = Arc::new(MemorySource::new("players", player_rows(100)));
    let resumed = ExtractionJob::with_source(config, healthy).run().await.unwrap();
    assert_eq!(resumed.outcome, JobOutcome::Completed);
    assert_eq!(resumed.rows_read, 23);

    // the two runs together stage each row exactly once
    assert_eq!(staged_ids(&staging, 10), (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_rows_without_identifier_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut file = std::fs::File::create(dir.path().join("players.jsonl")).unwrap();
    writeln!(file, "{{\"id\": 1, \"name\": \"a\"}}").unwrap();
    writeln!(file, "{{\"name\": \"no id\"}}").unwrap();
    writeln!(file, "{{\"id\": null, \"name\": \"null id\"}}").unwrap();
    writeln!(file, "{{\"id\": 11, \"name\": \"b\"}}").unwrap();
    drop(file);

    let mut config = job_config(dir.path(), SourceKind::Jsonl, "players.jsonl", IdentifierKind::Integer);
    config.extract.parallelism = 1;
    let report = ExtractionJob::from_config(config).run().await.unwrap();

    assert_eq!(report.rows_read, 4);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.rows_per_partition.get(&2), Some(&2));
}

#[tokio::test]
async fn test_empty_source_is_error() {
    let dir = TempDir::new().unwrap();
    std::fs::File::create(dir.path().join("players.jsonl")).unwrap();
    let config = job_config(dir.path(), SourceKind::Jsonl, "players.jsonl", IdentifierKind::Integer);

    let err = ExtractionJob::from_config(config).run().await.unwrap_err();
    assert!(matches!(err, IngestError::EmptyResult { ref source_name } if source_name == "players"));
}

#[tokio::test]
async fn test_missing_source_file_fails_before_reading() {
    let dir = TempDir::new().unwrap();
    let config = job_config(dir.path(), SourceKind::Jsonl, "absent.jsonl", IdentifierKind::Integer);
    let staging = config.output.dir.clone();

    let err = ExtractionJob::from_config(config).run().await.unwrap_err();
    assert!(matches!(err, IngestError::SourceQuery { .. }));
    assert!(!staging.exists());
}

#[tokio::test]
async fn test_empty_result_fails_again_on_rerun() {
    let dir = TempDir::new().unwrap();
    let config = job_config(dir.path(), SourceKind::Jsonl, "unused", IdentifierKind::Integer);

    for _ in 0..2 {
        let source = Arc::new(MemorySource::new("players", Vec::new()).with_count(30));
        let err = ExtractionJob::with_source(config.clone(), source)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::EmptyResult { .. }), "{err:?}");
    }
}

#[tokio::test]
async fn test_adapter_name_must_stay_inside_checkpoint_dir() {
    let dir = TempDir::new().unwrap();
    let config = job_config(dir.path(), SourceKind::Jsonl, "unused", IdentifierKind::Integer);

    let source = Arc::new(MemorySource::new("../escape", player_rows(10)));
    let err = ExtractionJob::with_source(config, source).run().await.unwrap_err();

    assert!(matches!(err, IngestError::InvalidConfiguration(_)), "{err:?}");
    assert!(!dir.path().join("escape.0").exists());
}

// ============================================================================
// Interrupted runs
// ============================================================================

#[tokio::test]
async fn test_killed_job_resumes_without_losing_rows() {
    let dir = TempDir::new().unwrap();
    let mut config = job_config(dir.path(), SourceKind::Jsonl, "unused", IdentifierKind::Integer);
    config.extract.parallelism = 1;
    let staging = config.output.dir.clone();
    let checkpoints = FileCheckpointStore::new(dir.path().join("checkpoints"));

    // the page at 30 never finishes; kill the job once it starts
    let hang = Arc::new(Notify::new());
    let stalling = Arc::new(
        MemorySource::new("players", player_rows(100)).hang_at(30, Arc::clone(&hang)),
    );
    let job = ExtractionJob::with_source(config.clone(), stalling);
    tokio::select! {
        _ = hang.notified() => {},
        result = job.run() => panic!("job finished despite the stalled page: {:?}", result),
    }

    // everything before the checkpoint is already staged
    assert_eq!(checkpoints.read_offset("players", 0).await.unwrap(), Some(30));
    assert_eq!(staged_ids(&staging, 10), (0..30).collect::<Vec<_>>());

    let healthy = Arc::new(MemorySource::new("players", player_rows(100)));
    let resumed = ExtractionJob::with_source(config, healthy).run().await.unwrap();
    assert_eq!(resumed.outcome, JobOutcome::Completed);
    assert_eq!(resumed.rows_read, 70);
    assert_eq!(staged_ids(&staging, 10), (0..100).collect::<Vec<_>>());
}
