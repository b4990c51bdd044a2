//! Pinecone data-plane client.
//!
//! Talks to an existing index host (`https://<index>-<project>.svc.<env>.pinecone.io`):
//! - `POST /describe_index_stats`: dimension check before the first upsert
//! - `POST /vectors/upsert`: batched keyed upsert
//! - `POST /query`: top-k nearest neighbours with metadata
//!
//! The API key is read from `PINECONE_API_KEY`. Index creation is left to
//! the operator; a dimension mismatch fails the pass before any write.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::http::{self, RetryPolicy};

use super::{IndexMatch, UpsertItem, VectorIndex};

pub struct PineconeIndex {
    host: String,
    namespace: Option<String>,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl PineconeIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| anyhow::anyhow!("PINECONE_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &IndexConfig, api_key: String) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("index.host required for Pinecone"))?;
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone().filter(|n| !n.is_empty()),
            api_key,
            client: http::client(config.timeout_secs)?,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        http::post_json(
            &self.client,
            &format!("{}{}", self.host, path),
            &[("Api-Key", self.api_key.clone())],
            &body,
            &self.retry,
            "Pinecone",
        )
        .await
    }

    fn with_namespace(&self, mut body: serde_json::Value) -> serde_json::Value {
        if let (Some(ns), Some(obj)) = (&self.namespace, body.as_object_mut()) {
            obj.insert("namespace".into(), serde_json::Value::String(ns.clone()));
        }
        body
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn ensure_dimension(&self, dims: usize) -> Result<()> {
        let stats = self.post("/describe_index_stats", serde_json::json!({})).await?;
        match stats.get("dimension").and_then(|d| d.as_u64()) {
            Some(existing) if existing as usize == dims => Ok(()),
            Some(existing) => bail!(
                "Pinecone index dimension is {}, embedding model produces {}",
                existing,
                dims
            ),
            None => bail!("Invalid Pinecone response: missing dimension"),
        }
    }

    async fn upsert(&self, items: &[UpsertItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let vectors: Vec<serde_json::Value> = items
            .iter()
            .map(|item| -> Result<serde_json::Value> {
                Ok(serde_json::json!({
                    "id": item.id,
                    "values": item.values,
                    "metadata": serde_json::to_value(&item.metadata)?,
                }))
            })
            .collect::<Result<_>>()?;

        let body = self.with_namespace(serde_json::json!({ "vectors": vectors }));
        let response = self.post("/vectors/upsert", body).await?;

        if let Some(count) = response.get("upsertedCount").and_then(|c| c.as_u64()) {
            if count as usize != items.len() {
                bail!(
                    "Pinecone upserted {} of {} vectors",
                    count,
                    items.len()
                );
            }
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        let body = self.with_namespace(serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        }));
        let response = self.post("/query", body).await?;

        let matches = response
            .get("matches")
            .and_then(|m| m.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid Pinecone response: missing matches"))?;

        matches
            .iter()
            .map(|m| -> Result<IndexMatch> {
                let id = m
                    .get("id")
                    .and_then(|i| i.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid Pinecone response: match without id"))?;
                Ok(IndexMatch {
                    id: id.to_string(),
                    score: m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                    metadata: m
                        .get("metadata")
                        .and_then(|md| serde_json::from_value(md.clone()).ok()),
                })
            })
            .collect()
    }
}
