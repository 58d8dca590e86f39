//! partload common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging bootstrap for the partload
//! workspace members:
//!
//! - **Error Handling**: [`IngestError`] and the [`Result`] alias
//! - **Types**: identifiers, extraction ranges, rows and row batches
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```
//! use partload_common::types::ExtractionRange;
//!
//! let range = ExtractionRange::new(34, 33);
//! assert_eq!(range.end(), 67);
//! assert_eq!(range.resume_from(50), ExtractionRange::new(50, 17));
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{IngestError, Result};
pub use types::{ExtractionRange, Identifier, IdentifierKind, Pages, Row, RowBatch, Schema};
