//! Typed failures of a synchronization pass.
//!
//! Only [`SyncError::StoreUnavailable`] aborts a pass. The other kinds are
//! attached to individual records in the [`SyncReport`](crate::sync::SyncReport)
//! so that one bad scene never blocks the rest of the batch.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The record store could not be read or written.
    #[error("record store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    /// The embedding service failed or timed out for one digest.
    #[error("embedding failed for {external_id}: {detail}")]
    EmbeddingFailed { external_id: String, detail: String },

    /// The vector index rejected a batch; `pending` lists the external ids
    /// that were not written.
    #[error("index upsert failed ({} pending): {detail}", pending.len())]
    IndexUpsertFailed {
        pending: Vec<String>,
        detail: String,
    },

    /// A fetched row is missing a required field.
    #[error("record {record_id} is missing required field `{field}`")]
    InconsistentRecord { record_id: String, field: String },
}

impl SyncError {
    pub(crate) fn store(err: anyhow::Error) -> Self {
        SyncError::StoreUnavailable {
            detail: format!("{:#}", err),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::StoreUnavailable { .. } => "store_unavailable",
            SyncError::EmbeddingFailed { .. } => "embedding_failed",
            SyncError::IndexUpsertFailed { .. } => "index_upsert_failed",
            SyncError::InconsistentRecord { .. } => "inconsistent_record",
        }
    }
}
