//! Record store abstraction.
//!
//! Two narrow traits split the store by who uses it:
//!
//! | Trait | Used by | Operations |
//! |-------|---------|------------|
//! | [`RecordStore`] | [`Synchronizer`](crate::sync::Synchronizer) | fetch dirty rows, clear their flag |
//! | [`SceneRepository`] | authoring commands ([`scenes`](crate::scenes)) | insert, update, lookups |
//!
//! Both are implemented by [`SqliteSceneStore`](sqlite::SqliteSceneStore) and
//! the in-memory [`InMemorySceneStore`](memory::InMemorySceneStore).
//!
//! Only the authoring path sets `needs_indexing`; only [`RecordStore::mark_clean`]
//! clears it.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chapter, Character, SceneRow};

/// The synchronizer's view of the record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All rows with `needs_indexing = true`, in write order (oldest write first).
    async fn fetch_dirty(&self) -> Result<Vec<SceneRow>>;

    /// Clear `needs_indexing` on each marked row still at the marked revision.
    ///
    /// Returns the number of rows changed. Unknown ids, and rows rewritten
    /// since they were fetched, are left alone.
    async fn mark_clean(&self, marks: &[CleanMark]) -> Result<u64>;
}

/// A row the index has acknowledged, at the revision that was indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanMark {
    pub id: String,
    pub revision: i64,
}

/// Row filter for [`SceneRepository::list_scenes`].
#[derive(Debug, Clone, Default)]
pub struct SceneFilter {
    pub chapter_index: Option<u32>,
    pub dirty_only: bool,
}

/// The authoring path's view of the record store.
#[async_trait]
pub trait SceneRepository: Send + Sync {
    /// Insert a new row. Fails if the id already exists.
    async fn insert_scene(&self, row: &SceneRow) -> Result<()>;

    /// Replace the content of an existing row. Fails if the id is unknown.
    async fn update_scene(&self, row: &SceneRow) -> Result<()>;

    async fn get_scene(&self, id: &str) -> Result<Option<SceneRow>>;

    /// Rows ordered by chapter, then scene index.
    async fn list_scenes(&self, filter: &SceneFilter) -> Result<Vec<SceneRow>>;

    /// Scene indices currently used in a chapter.
    async fn scene_indices(&self, chapter_index: u32) -> Result<Vec<u32>>;

    /// Distinct titled chapters, ordered by index.
    async fn chapters(&self) -> Result<Vec<Chapter>>;

    async fn characters(&self) -> Result<Vec<Character>>;

    async fn insert_character(&self, character: &Character) -> Result<()>;
}
