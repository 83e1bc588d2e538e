//! Error types for the sync workers
//!
//! The variants follow how a failure is handled by a sync cycle:
//! configuration problems abort the cycle, fetch failures feed the
//! per-reference retry counter, persistence failures only affect the one
//! package being written.

use cycle_common::types::SourceId;
use thiserror::Error;

use crate::api::ApiError;
use crate::ingest::batch::BatchError;
use crate::ingest::builder::BuildError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or inconsistent configuration; retrying cannot fix it
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Mapping rules were never seeded
    #[error("Mapping configuration error: {0}")]
    Build(#[from] BuildError),

    /// Vendor API call failed
    #[error("Vendor API error: {0}")]
    Fetch(#[from] ApiError),

    /// Query or transaction failure
    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Multi-row insert failed or could not be planned
    #[error("Batch insert error: {0}")]
    Batch(#[from] BatchError),
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn unknown_source(source: SourceId) -> Self {
        Self::Configuration(format!("source {} has no registered API endpoint", source))
    }

    /// Errors that stop the whole cycle instead of a single package.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration(_) | SyncError::Build(_))
    }
}
