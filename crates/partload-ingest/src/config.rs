//! Job configuration
//!
//! A job is described by a TOML/JSON/YAML file layered under environment
//! variables (`PARTLOAD__SECTION__KEY`, e.g. `PARTLOAD__EXTRACT__PARALLELISM=8`).
//! A `.env` file in the working directory is loaded first if present.
//!
//! ```toml
//! [source]
//! name = "players"
//! kind = "jsonl"
//! path = "./data/players.jsonl"
//!
//! [partition]
//! count = 100
//! id_field = "vid"
//! id_kind = "string"
//!
//! [extract]
//! parallelism = 4
//! page_size = 10000
//! checkpoint_dir = "./checkpoints"
//!
//! [output]
//! dir = "./staging/players"
//! ```

use partload_common::{IdentifierKind, IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::reader::{ReaderOptions, DEFAULT_CHANNEL_CAPACITY, DEFAULT_PAGE_SIZE};
use crate::source::SourceKind;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable prefix for job settings.
pub const ENV_PREFIX: &str = "PARTLOAD";

/// Separator between prefix, section and key in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

/// Default number of parallel range workers.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Complete description of one extraction job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub source: SourceConfig,
    pub partition: PartitionConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Logical name; also names the checkpoint files
    pub name: String,
    pub kind: SourceKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Number of partitions in the target store
    pub count: u32,
    /// Row field holding the record identifier
    pub id_field: String,
    #[serde(default)]
    pub id_kind: IdentifierKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Rows per source read within a worker's range
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Enables resumable extraction when set
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the per-partition staging files
    pub dir: PathBuf,
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            page_size: default_page_size(),
            checkpoint_dir: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl JobConfig {
    /// Load from an optional file plus `PARTLOAD__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        Self::build(builder)
    }

    /// Parse a TOML document, still layered under the environment
    pub fn from_toml(document: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: JobConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| IngestError::invalid_configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the job fail halfway through
    pub fn validate(&self) -> Result<()> {
        validate_source_name(&self.source.name)?;

        if self.partition.count == 0 {
            return Err(IngestError::invalid_configuration(
                "partition.count must be greater than 0",
            ));
        }
        if self.partition.id_field.trim().is_empty() {
            return Err(IngestError::invalid_configuration(
                "partition.id_field cannot be empty",
            ));
        }

        if self.extract.parallelism == 0 {
            return Err(IngestError::invalid_configuration(
                "extract.parallelism must be greater than 0",
            ));
        }
        if self.extract.page_size == 0 {
            return Err(IngestError::invalid_configuration(
                "extract.page_size must be greater than 0",
            ));
        }
        if self.extract.channel_capacity == 0 {
            return Err(IngestError::invalid_configuration(
                "extract.channel_capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            page_size: Some(self.extract.page_size),
            channel_capacity: self.extract.channel_capacity,
        }
    }
}

/// Source names become checkpoint file names, so they must stay inside
/// the checkpoint directory
pub fn validate_source_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(IngestError::invalid_configuration("source.name cannot be empty"));
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(IngestError::invalid_configuration(format!(
            "source.name '{}' must not contain path separators or start with '.'",
            name
        )));
    }
    Ok(())
}
