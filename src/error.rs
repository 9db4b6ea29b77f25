// src/error.rs
//! Run-level failure taxonomy.
//!
//! Collaborator calls return `anyhow::Result`; the engine maps their outcomes onto
//! these variants to decide scope: per source, per candidate, or the whole run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network / rate-limit failure of a single external call.
    #[error("{operation} failed: {reason}")]
    TransientIo {
        operation: &'static str,
        reason: String,
    },

    /// Classifier answered, but not in the expected verdict shape.
    #[error("malformed classifier verdict: {0}")]
    ClassificationSchema(String),

    /// A source's fetch budget is exhausted; only that source is skipped.
    #[error("source {source_id} failed after {attempts} attempts: {reason}")]
    TerminalSource {
        source_id: i64,
        attempts: u32,
        reason: String,
    },

    /// Listing sources or classification exhausted its budget; the run stops early.
    #[error("{step} failed after {attempts} attempts: {reason}")]
    TerminalRun {
        step: &'static str,
        attempts: u32,
        reason: String,
    },
}

impl SyncError {
    pub fn transient(operation: &'static str, err: &anyhow::Error) -> Self {
        SyncError::TransientIo {
            operation,
            reason: format!("{err:#}"),
        }
    }

    /// True for failures that end the run's remaining steps.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, SyncError::TerminalRun { .. })
    }
}
