//! SQLite-backed [`VectorIndex`].
//!
//! Stores vectors as little-endian f32 BLOBs in `index_entries`, keyed by
//! external id, with the metadata as JSON. The provisioned dimension lives in
//! `index_meta` under `dims` and is written on first use.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::digest::{digest_hash, IndexMetadata};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

use super::{IndexMatch, UpsertItem, VectorIndex};

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn stored_dims(&self) -> Result<Option<usize>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
                .fetch_optional(&self.pool)
                .await?;
        value
            .map(|v| {
                v.parse::<usize>()
                    .with_context(|| format!("Corrupt index dimension: {}", v))
            })
            .transpose()
    }

    /// Metadata stored for `id`, if present.
    pub async fn metadata(&self, id: &str) -> Result<Option<IndexMetadata>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT metadata_json FROM index_entries WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| serde_json::from_str(&j).context("Corrupt index metadata"))
            .transpose()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn ensure_dimension(&self, dims: usize) -> Result<()> {
        match self.stored_dims().await? {
            Some(existing) if existing == dims => Ok(()),
            Some(existing) => bail!(
                "index dimension is {}, embedding model produces {}",
                existing,
                dims
            ),
            None => {
                sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES ('dims', ?)")
                    .bind(dims.to_string())
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        }
    }

    async fn upsert(&self, items: &[UpsertItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let dims = self.stored_dims().await?;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for item in items {
            if let Some(dims) = dims {
                if item.values.len() != dims {
                    bail!(
                        "vector for {} has {} dimensions, index expects {}",
                        item.id,
                        item.values.len(),
                        dims
                    );
                }
            }

            let metadata_json = serde_json::to_string(&item.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO index_entries (id, embedding, dims, model, metadata_json, digest_hash, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    model = excluded.model,
                    metadata_json = excluded.metadata_json,
                    digest_hash = excluded.digest_hash,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&item.id)
            .bind(vec_to_blob(&item.values))
            .bind(item.values.len() as i64)
            .bind(&item.metadata.embedding_model)
            .bind(metadata_json)
            .bind(digest_hash(&item.metadata.digest))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        let rows = sqlx::query("SELECT id, embedding, metadata_json FROM index_entries")
            .fetch_all(&self.pool)
            .await?;

        let mut matches: Vec<IndexMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                IndexMatch {
                    id: row.get("id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                    metadata: serde_json::from_str(&metadata_json).ok(),
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::CONTENT_KIND_PLOT;
    use tempfile::TempDir;

    async fn index(tmp: &TempDir) -> SqliteVectorIndex {
        let pool = crate::db::connect_path(&tmp.path().join("idx.sqlite"))
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        SqliteVectorIndex::new(pool)
    }

    fn item(id: &str, values: Vec<f32>, digest: &str) -> UpsertItem {
        UpsertItem {
            id: id.into(),
            values,
            metadata: IndexMetadata {
                external_id: id.into(),
                chapter_index: 1,
                scene_index: 0,
                chapter_title: "一章".into(),
                digest: digest.into(),
                related_characters: vec![],
                related_context_ids: vec![],
                content_kind: CONTENT_KIND_PLOT.into(),
                embedding_model: "test-model".into(),
            },
        }
    }

    #[tokio::test]
    async fn dimension_is_provisioned_once() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp).await;
        index.ensure_dimension(3).await.unwrap();
        index.ensure_dimension(3).await.unwrap();
        assert!(index.ensure_dimension(4).await.is_err());
    }

    #[tokio::test]
    async fn upsert_replaces_same_key() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp).await;
        index.ensure_dimension(2).await.unwrap();

        index
            .upsert(&[item("plot-ch1-0", vec![1.0, 0.0], "old")])
            .await
            .unwrap();
        index
            .upsert(&[item("plot-ch1-0", vec![0.0, 1.0], "new")])
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&index.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let meta = index.metadata("plot-ch1-0").await.unwrap().unwrap();
        assert_eq!(meta.digest, "new");

        let hits = index.query(&[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits[0].id, "plot-ch1-0");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn wrong_length_vector_rejects_whole_batch() {
        let tmp = TempDir::new().unwrap();
        let index = index(&tmp).await;
        index.ensure_dimension(2).await.unwrap();

        let result = index
            .upsert(&[
                item("plot-ch0-0", vec![1.0, 0.0], "a"),
                item("plot-ch0-1", vec![1.0], "b"),
            ])
            .await;
        assert!(result.is_err());
        assert!(index.metadata("plot-ch0-0").await.unwrap().is_none());
    }
}
