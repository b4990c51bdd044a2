//! Incremental vector-index synchronization.
//!
//! A pass pulls every dirty scene from the [`RecordStore`], embeds its digest,
//! upserts the vector under the scene's positional key, and only then clears
//! the scene's `needs_indexing` flag.
//!
//! ```text
//! RecordStore ──fetch_dirty──▶ Synchronizer ──embed──▶ EmbeddingProvider
//!      ▲                            │
//!      └────────mark_clean──────────┤
//!                                   └──upsert──▶ VectorIndex
//! ```
//!
//! # Failure isolation
//!
//! | Failure | Effect |
//! |---------|--------|
//! | store read/write | pass aborts with [`SyncError::StoreUnavailable`] |
//! | row missing a field | that row is skipped ([`SyncError::InconsistentRecord`]) |
//! | embedding call | that row is skipped ([`SyncError::EmbeddingFailed`]) |
//! | index upsert | every row in the batch stays dirty ([`SyncError::IndexUpsertFailed`]) |
//!
//! A multi-digest embedding request that fails is retried one digest at a
//! time, so a single bad record never takes its neighbours down with it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::digest::{DigestFormat, PreparedScene};
use crate::embedding::EmbeddingProvider;
use crate::error::SyncError;
use crate::index::{UpsertItem, VectorIndex};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::store::{CleanMark, RecordStore};

/// Tunables for a [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Digests per embedding request.
    pub embed_batch_size: usize,
    /// Vectors per upsert request.
    pub upsert_batch_size: usize,
    pub digest: DigestFormat,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            embed_batch_size: 64,
            upsert_batch_size: 100,
            digest: DigestFormat::default(),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            embed_batch_size: config.embedding.batch_size.max(1),
            upsert_batch_size: config.index.batch_size.max(1),
            digest: DigestFormat::from(&config.digest),
        }
    }
}

/// A record that did not make it into the index this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub record_id: String,
    pub error: SyncError,
}

/// Outcome of [`Synchronizer::synchronize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Dirty rows fetched.
    pub attempted: usize,
    /// Rows whose flag was cleared.
    pub synchronized: usize,
    /// Vectors acknowledged by the index.
    pub upserted: usize,
    /// Rows that shared a key with a later row in the same pass.
    pub collisions: usize,
    /// Rows indexed but rewritten before their flag could be cleared;
    /// they stay dirty for the next pass.
    pub superseded: usize,
    pub failures: Vec<RecordFailure>,
    /// Embedding model used for this pass.
    pub model: String,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn first_error(&self) -> Option<&SyncError> {
        self.failures.first().map(|f| &f.error)
    }

    /// Ids of records that are still dirty because of a failure.
    pub fn failed_record_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.record_id.as_str()).collect()
    }
}

/// Prepared work for a pass, without any outbound calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub attempted: usize,
    pub prepared: Vec<PreparedScene>,
    pub failures: Vec<RecordFailure>,
}

/// Runs synchronization passes against injected collaborators.
///
/// Overlapping calls on the same instance run one after the other.
pub struct Synchronizer {
    store: Arc<dyn RecordStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    options: SyncOptions,
    progress: Box<dyn SyncProgressReporter>,
    pass_lock: Mutex<()>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        mut options: SyncOptions,
    ) -> Self {
        options.embed_batch_size = options.embed_batch_size.max(1);
        options.upsert_batch_size = options.upsert_batch_size.max(1);
        Self {
            store,
            embedder,
            index,
            options,
            progress: Box::new(NoProgress),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Fetch dirty rows and derive keys and digests, without embedding or writing.
    pub async fn plan(&self) -> Result<SyncPlan, SyncError> {
        let rows = self.store.fetch_dirty().await.map_err(SyncError::store)?;
        let mut plan = SyncPlan {
            attempted: rows.len(),
            ..Default::default()
        };

        for row in rows {
            let record_id = row.id.clone();
            match row.into_record() {
                Ok(record) => plan
                    .prepared
                    .push(PreparedScene::from_record(&record, &self.options.digest)),
                Err(error) => {
                    tracing::warn!(record_id = %record_id, %error, "skipping inconsistent scene");
                    plan.failures.push(RecordFailure { record_id, error });
                }
            }
        }

        Ok(plan)
    }

    /// Run one synchronization pass.
    ///
    /// Returns `Err` only when the record store fails; every other failure
    /// is reported per record in the [`SyncReport`].
    pub async fn synchronize(&self) -> Result<SyncReport, SyncError> {
        let _pass = self.pass_lock.lock().await;

        let plan = self.plan().await?;
        let mut report = SyncReport {
            attempted: plan.attempted,
            failures: plan.failures,
            model: self.embedder.model_name().to_string(),
            ..Default::default()
        };
        self.progress.report(SyncProgressEvent::Fetched {
            dirty: report.attempted as u64,
        });

        if plan.prepared.is_empty() {
            return Ok(self.finish(report));
        }

        if let Err(e) = self.index.ensure_dimension(self.embedder.dims()).await {
            let detail = format!("{:#}", e);
            tracing::warn!(index = self.index.name(), %detail, "index not ready");
            let pending: Vec<String> = plan
                .prepared
                .iter()
                .map(|p| p.external_id.clone())
                .collect();
            for scene in plan.prepared {
                report.failures.push(RecordFailure {
                    record_id: scene.record_id,
                    error: SyncError::IndexUpsertFailed {
                        pending: pending.clone(),
                        detail: detail.clone(),
                    },
                });
            }
            return Ok(self.finish(report));
        }

        let embedded = self.embed_all(plan.prepared, &mut report).await;
        let batch = self.collect_upserts(embedded, &mut report);
        self.upsert_all(batch, &mut report).await?;

        Ok(self.finish(report))
    }

    fn finish(&self, report: SyncReport) -> SyncReport {
        tracing::info!(
            attempted = report.attempted,
            synchronized = report.synchronized,
            failed = report.failed(),
            model = %report.model,
            "sync pass finished"
        );
        self.progress.report(SyncProgressEvent::Done {
            synchronized: report.synchronized as u64,
            failed: report.failed() as u64,
        });
        report
    }

    /// Embed every prepared scene, skipping the ones whose embedding fails.
    async fn embed_all(
        &self,
        prepared: Vec<PreparedScene>,
        report: &mut SyncReport,
    ) -> Vec<(PreparedScene, Vec<f32>)> {
        let total = prepared.len();
        let mut embedded = Vec::with_capacity(total);
        let mut done = 0usize;

        for chunk in prepared.chunks(self.options.embed_batch_size) {
            let texts: Vec<String> = chunk.iter().map(|p| p.digest.clone()).collect();

            match self.embed_checked(&texts).await {
                Ok(vectors) => {
                    embedded.extend(chunk.iter().cloned().zip(vectors));
                }
                Err(detail) if chunk.len() == 1 => {
                    report.failures.push(embedding_failure(&chunk[0], detail));
                }
                Err(detail) => {
                    tracing::debug!(
                        size = chunk.len(),
                        %detail,
                        "embedding batch failed, retrying one digest at a time"
                    );
                    for scene in chunk {
                        match self.embed_checked(std::slice::from_ref(&scene.digest)).await {
                            Ok(mut vectors) => match vectors.pop() {
                                Some(vector) => embedded.push((scene.clone(), vector)),
                                None => report.failures.push(embedding_failure(
                                    scene,
                                    "empty embedding response".to_string(),
                                )),
                            },
                            Err(detail) => report.failures.push(embedding_failure(scene, detail)),
                        }
                    }
                }
            }

            done += chunk.len();
            self.progress.report(SyncProgressEvent::Embedding {
                n: done as u64,
                total: total as u64,
            });
        }

        embedded
    }

    /// One embedding call, with the response checked against the request.
    async fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        let vectors = self
            .embedder
            .embed(texts)
            .await
            .map_err(|e| format!("{:#}", e))?;

        if vectors.len() != texts.len() {
            return Err(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            ));
        }

        let dims = self.embedder.dims();
        if let Some(bad) = vectors
            .iter()
            .find(|v| v.is_empty() || (dims > 0 && v.len() != dims))
        {
            return Err(format!(
                "vector has {} dimensions, model {} declares {}",
                bad.len(),
                self.embedder.model_name(),
                dims
            ));
        }

        Ok(vectors)
    }

    /// Build upsert items, collapsing rows that share an external id.
    fn collect_upserts(
        &self,
        embedded: Vec<(PreparedScene, Vec<f32>)>,
        report: &mut SyncReport,
    ) -> UpsertBatch {
        let model = self.embedder.model_name().to_string();
        let mut batch = UpsertBatch::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (scene, values) in embedded {
            let item = UpsertItem {
                id: scene.external_id.clone(),
                values,
                metadata: scene.metadata(&model),
            };
            let mark = CleanMark {
                id: scene.record_id.clone(),
                revision: scene.revision,
            };

            match positions.get(&scene.external_id) {
                Some(&pos) => {
                    tracing::warn!(
                        external_id = %scene.external_id,
                        record_id = %scene.record_id,
                        "scenes share a position; the later one overwrites the vector"
                    );
                    report.collisions += 1;
                    batch.items[pos] = item;
                    batch.sources[pos].push(mark);
                }
                None => {
                    positions.insert(scene.external_id.clone(), batch.items.len());
                    batch.items.push(item);
                    batch.sources.push(vec![mark]);
                }
            }
        }

        batch
    }

    /// Upsert in batches; clear flags for each batch the index acknowledges.
    async fn upsert_all(
        &self,
        batch: UpsertBatch,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let total = batch.items.len();
        let size = self.options.upsert_batch_size;

        for start in (0..total).step_by(size) {
            let end = (start + size).min(total);
            let items = &batch.items[start..end];
            let sources = &batch.sources[start..end];

            match self.index.upsert(items).await {
                Ok(()) => {
                    let marks: Vec<CleanMark> = sources.iter().flatten().cloned().collect();
                    let cleared = self
                        .store
                        .mark_clean(&marks)
                        .await
                        .map_err(SyncError::store)? as usize;
                    report.upserted += items.len();
                    report.synchronized += cleared;
                    report.superseded += marks.len().saturating_sub(cleared);
                }
                Err(e) => {
                    let detail = format!("{:#}", e);
                    let pending: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
                    tracing::warn!(
                        index = self.index.name(),
                        pending = pending.len(),
                        %detail,
                        "upsert batch failed"
                    );
                    for mark in sources.iter().flatten() {
                        report.failures.push(RecordFailure {
                            record_id: mark.id.clone(),
                            error: SyncError::IndexUpsertFailed {
                                pending: pending.clone(),
                                detail: detail.clone(),
                            },
                        });
                    }
                }
            }

            self.progress.report(SyncProgressEvent::Upserting {
                n: end as u64,
                total: total as u64,
            });
        }

        Ok(())
    }
}

/// Upsert items with the rows that contributed to each.
#[derive(Default)]
struct UpsertBatch {
    items: Vec<UpsertItem>,
    sources: Vec<Vec<CleanMark>>,
}

fn embedding_failure(scene: &PreparedScene, detail: String) -> RecordFailure {
    tracing::warn!(
        record_id = %scene.record_id,
        external_id = %scene.external_id,
        %detail,
        "embedding failed"
    );
    RecordFailure {
        record_id: scene.record_id.clone(),
        error: SyncError::EmbeddingFailed {
            external_id: scene.external_id.clone(),
            detail,
        },
    }
}
