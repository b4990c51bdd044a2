//! Vector index abstraction.
//!
//! A vector index maps an external id to a fixed-dimension vector plus
//! [`IndexMetadata`]. Upserts are keyed and idempotent: writing the same id
//! again replaces the previous vector and metadata.
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | In-memory | [`memory`] | tests, embedding into other programs |
//! | SQLite | [`sqlite`] | `index_entries` table next to the scenes |
//! | Pinecone | [`pinecone`] | HTTP data plane, `PINECONE_API_KEY` |

pub mod memory;
pub mod pinecone;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::digest::IndexMetadata;

/// One vector to write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertItem {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: IndexMetadata,
}

/// One query hit, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<IndexMetadata>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name recorded in the sync-run ledger.
    fn name(&self) -> &str;

    /// Make sure the index accepts vectors of `dims` dimensions,
    /// provisioning it lazily where the backend allows.
    async fn ensure_dimension(&self, dims: usize) -> Result<()>;

    /// Insert or replace every item. Succeeds only if all items were written.
    async fn upsert(&self, items: &[UpsertItem]) -> Result<()>;

    /// Nearest neighbours of `vector` by cosine similarity.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>>;
}

/// Instantiate the index named by `config.provider`.
///
/// The SQLite backend shares `pool` with the scene store.
pub fn create_index(config: &IndexConfig, pool: &SqlitePool) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "sqlite" => Ok(Arc::new(sqlite::SqliteVectorIndex::new(pool.clone()))),
        "pinecone" => Ok(Arc::new(pinecone::PineconeIndex::new(config)?)),
        other => bail!("Unknown index provider: {}", other),
    }
}
