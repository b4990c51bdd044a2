//! In-memory scene store for tests and embedding into other programs.
//!
//! Rows live in a `Vec` behind a `RwLock`, in write order. The store can
//! be switched to an "unavailable" state to exercise failure handling.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Chapter, Character, SceneRow};

use super::{CleanMark, RecordStore, SceneFilter, SceneRepository};

#[derive(Default)]
pub struct InMemorySceneStore {
    rows: RwLock<Vec<SceneRow>>,
    characters: RwLock<Vec<Character>>,
    unavailable: AtomicBool,
    mark_clean_calls: AtomicUsize,
}

impl InMemorySceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw row without validation (legacy data, test fixtures).
    pub fn insert_row(&self, row: SceneRow) {
        self.write_rows().push(row);
    }

    pub fn row(&self, id: &str) -> Option<SceneRow> {
        self.read_rows().iter().find(|r| r.id == id).cloned()
    }

    pub fn dirty_ids(&self) -> Vec<String> {
        self.read_rows()
            .iter()
            .filter(|r| r.needs_indexing)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Make every subsequent call fail as if the backing database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn mark_clean_calls(&self) -> usize {
        self.mark_clean_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("in-memory store is unavailable");
        }
        Ok(())
    }

    fn read_rows(&self) -> RwLockReadGuard<'_, Vec<SceneRow>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rows(&self) -> RwLockWriteGuard<'_, Vec<SceneRow>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for InMemorySceneStore {
    async fn fetch_dirty(&self) -> Result<Vec<SceneRow>> {
        self.check_available()?;
        Ok(self
            .read_rows()
            .iter()
            .filter(|r| r.needs_indexing)
            .cloned()
            .collect())
    }

    async fn mark_clean(&self, marks: &[CleanMark]) -> Result<u64> {
        self.check_available()?;
        self.mark_clean_calls.fetch_add(1, Ordering::SeqCst);
        let mut changed = 0;
        for row in self.write_rows().iter_mut() {
            let marked = marks
                .iter()
                .any(|m| m.id == row.id && m.revision == row.revision);
            if row.needs_indexing && marked {
                row.needs_indexing = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl SceneRepository for InMemorySceneStore {
    async fn insert_scene(&self, row: &SceneRow) -> Result<()> {
        self.check_available()?;
        let mut rows = self.write_rows();
        if rows.iter().any(|r| r.id == row.id) {
            bail!("scene already exists: {}", row.id);
        }
        rows.push(row.clone());
        Ok(())
    }

    async fn update_scene(&self, row: &SceneRow) -> Result<()> {
        self.check_available()?;
        let mut rows = self.write_rows();
        // Rows stay in write order: an updated row moves to the back.
        match rows.iter().position(|r| r.id == row.id) {
            Some(pos) => {
                rows.remove(pos);
                rows.push(row.clone());
                Ok(())
            }
            None => bail!("scene not found: {}", row.id),
        }
    }

    async fn get_scene(&self, id: &str) -> Result<Option<SceneRow>> {
        self.check_available()?;
        Ok(self.row(id))
    }

    async fn list_scenes(&self, filter: &SceneFilter) -> Result<Vec<SceneRow>> {
        self.check_available()?;
        let mut rows: Vec<SceneRow> = self
            .read_rows()
            .iter()
            .filter(|r| {
                filter
                    .chapter_index
                    .map_or(true, |c| r.chapter_index == i64::from(c))
            })
            .filter(|r| !filter.dirty_only || r.needs_indexing)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.chapter_index, r.scene_index));
        Ok(rows)
    }

    async fn scene_indices(&self, chapter_index: u32) -> Result<Vec<u32>> {
        self.check_available()?;
        Ok(self
            .read_rows()
            .iter()
            .filter(|r| r.chapter_index == i64::from(chapter_index))
            .filter_map(|r| u32::try_from(r.scene_index).ok())
            .collect())
    }

    async fn chapters(&self) -> Result<Vec<Chapter>> {
        self.check_available()?;
        let mut grouped: BTreeMap<(u32, String), usize> = BTreeMap::new();
        for row in self.read_rows().iter() {
            let Ok(index) = u32::try_from(row.chapter_index) else {
                continue;
            };
            let title = row.chapter_title.clone().unwrap_or_default();
            if title.is_empty() {
                continue;
            }
            *grouped.entry((index, title)).or_default() += 1;
        }
        Ok(grouped
            .into_iter()
            .map(|((chapter_index, chapter_title), scene_count)| Chapter {
                chapter_index,
                chapter_title,
                scene_count,
            })
            .collect())
    }

    async fn characters(&self) -> Result<Vec<Character>> {
        self.check_available()?;
        let mut chars = self
            .characters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        chars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(chars)
    }

    async fn insert_character(&self, character: &Character) -> Result<()> {
        self.check_available()?;
        let mut chars = self
            .characters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if chars.iter().any(|c| c.name == character.name) {
            bail!("character already exists: {}", character.name);
        }
        chars.push(character.clone());
        Ok(())
    }
}
