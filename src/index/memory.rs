//! In-memory [`VectorIndex`] for tests and embedding into other programs.
//!
//! Entries live in a `BTreeMap` keyed by external id. Query is brute-force
//! cosine similarity. Keys can be marked as rejected to simulate an index
//! that refuses a batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;

use super::{IndexMatch, UpsertItem, VectorIndex};

#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<BTreeMap<String, UpsertItem>>,
    dims: RwLock<Option<usize>>,
    rejected_keys: RwLock<Vec<String>>,
    upsert_calls: AtomicUsize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index already provisioned for `dims` dimensions.
    pub fn with_dimension(dims: usize) -> Self {
        let index = Self::default();
        *index.dims.write().unwrap_or_else(PoisonError::into_inner) = Some(dims);
        index
    }

    /// Fail any upsert batch containing one of `keys`.
    pub fn reject_keys<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self
            .rejected_keys
            .write()
            .unwrap_or_else(PoisonError::into_inner) = keys.into_iter().map(Into::into).collect();
    }

    pub fn entry(&self, id: &str) -> Option<UpsertItem> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_dimension(&self, dims: usize) -> Result<()> {
        let mut current = self.dims.write().unwrap_or_else(PoisonError::into_inner);
        match *current {
            None => {
                *current = Some(dims);
                Ok(())
            }
            Some(existing) if existing == dims => Ok(()),
            Some(existing) => bail!(
                "index dimension is {}, embedding model produces {}",
                existing,
                dims
            ),
        }
    }

    async fn upsert(&self, items: &[UpsertItem]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        {
            let rejected = self
                .rejected_keys
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(item) = items.iter().find(|i| rejected.contains(&i.id)) {
                bail!("upsert rejected for {}", item.id);
            }
        }

        let dims = *self.dims.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(dims) = dims {
            if let Some(item) = items.iter().find(|i| i.values.len() != dims) {
                bail!(
                    "vector for {} has {} dimensions, index expects {}",
                    item.id,
                    item.values.len(),
                    dims
                );
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for item in items {
            entries.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches: Vec<IndexMatch> = entries
            .values()
            .map(|item| IndexMatch {
                id: item.id.clone(),
                score: cosine_similarity(vector, &item.values),
                metadata: Some(item.metadata.clone()),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}
