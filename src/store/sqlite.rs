//! SQLite-backed scene store.
//!
//! Implements [`RecordStore`] and [`SceneRepository`] over the `scenes` and
//! `characters` tables, and keeps the `sync_runs` ledger used by `status`.
//! Id lists are stored as JSON arrays; legacy comma-separated values are
//! still accepted on read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{normalize_ids, Chapter, Character, SceneRow};

use super::{CleanMark, RecordStore, SceneFilter, SceneRepository};

/// Marks per `UPDATE` statement (two bound parameters each).
const MARK_CLEAN_CHUNK: usize = 200;

/// Next value of the store-wide write counter.
const NEXT_WRITE_SEQ: &str = "(SELECT COALESCE(MAX(write_seq), 0) + 1 FROM scenes)";

const SCENE_COLUMNS: &str = "id, chapter_index, chapter_title, scene_index, plot_text, location, mood, \
     related_characters, related_context_ids, needs_indexing, revision, created_at, updated_at";

pub struct SqliteSceneStore {
    pool: SqlitePool,
}

/// One row of the `sync_runs` ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRunRecord {
    pub started_at: i64,
    pub finished_at: i64,
    pub model: String,
    pub index_name: String,
    pub attempted: i64,
    pub synchronized: i64,
    pub failed: i64,
    pub first_error: Option<String>,
}

/// Row counts shown by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneCounts {
    pub scenes: i64,
    pub dirty: i64,
    pub characters: i64,
    pub index_entries: i64,
}

impl SqliteSceneStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn record_sync_run(&self, run: &SyncRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (started_at, finished_at, model, index_name,
                                   attempted, synchronized, failed, first_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.model)
        .bind(&run.index_name)
        .bind(run.attempted)
        .bind(run.synchronized)
        .bind(run.failed)
        .bind(&run.first_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_sync_run(&self) -> Result<Option<SyncRunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT started_at, finished_at, model, index_name, attempted,
                   synchronized, failed, first_error
            FROM sync_runs
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SyncRunRecord {
            started_at: r.get("started_at"),
            finished_at: r.get("finished_at"),
            model: r.get("model"),
            index_name: r.get("index_name"),
            attempted: r.get("attempted"),
            synchronized: r.get("synchronized"),
            failed: r.get("failed"),
            first_error: r.get("first_error"),
        }))
    }

    pub async fn counts(&self) -> Result<SceneCounts> {
        let scenes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scenes")
            .fetch_one(&self.pool)
            .await?;
        let dirty: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scenes WHERE needs_indexing = 1")
            .fetch_one(&self.pool)
            .await?;
        let characters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM characters")
            .fetch_one(&self.pool)
            .await?;
        let index_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(SceneCounts {
            scenes,
            dirty,
            characters,
            index_entries,
        })
    }
}

fn encode_ids(ids: &Option<Vec<String>>) -> Result<Option<String>> {
    ids.as_ref()
        .map(|v| serde_json::to_string(v).context("Failed to encode id list"))
        .transpose()
}

fn decode_ids(raw: Option<String>) -> Option<Vec<String>> {
    let raw = raw?;
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(ids) => Some(ids),
        Err(_) => Some(normalize_ids(raw.split(','))),
    }
}

fn scene_from_row(row: &SqliteRow) -> SceneRow {
    let needs_indexing: i64 = row.get("needs_indexing");
    SceneRow {
        id: row.get("id"),
        chapter_index: row.get("chapter_index"),
        chapter_title: row.get("chapter_title"),
        scene_index: row.get("scene_index"),
        plot_text: row.get("plot_text"),
        location: row.get("location"),
        mood: row.get("mood"),
        related_characters: decode_ids(row.get("related_characters")),
        related_context_ids: decode_ids(row.get("related_context_ids")),
        needs_indexing: needs_indexing != 0,
        revision: row.get("revision"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl RecordStore for SqliteSceneStore {
    async fn fetch_dirty(&self) -> Result<Vec<SceneRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scenes WHERE needs_indexing = 1 ORDER BY write_seq, rowid",
            SCENE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query dirty scenes")?;

        Ok(rows.iter().map(scene_from_row).collect())
    }

    async fn mark_clean(&self, marks: &[CleanMark]) -> Result<u64> {
        if marks.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;

        for chunk in marks.chunks(MARK_CLEAN_CHUNK) {
            let predicates = vec!["(id = ? AND revision = ?)"; chunk.len()].join(" OR ");
            let sql = format!(
                "UPDATE scenes SET needs_indexing = 0 WHERE needs_indexing = 1 AND ({})",
                predicates
            );
            let mut query = sqlx::query(&sql);
            for mark in chunk {
                query = query.bind(&mark.id).bind(mark.revision);
            }
            changed += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await.context("Failed to commit clean flags")?;
        Ok(changed)
    }
}

#[async_trait]
impl SceneRepository for SqliteSceneStore {
    async fn insert_scene(&self, row: &SceneRow) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO scenes (id, chapter_index, chapter_title, scene_index, plot_text,
                                location, mood, related_characters, related_context_ids,
                                needs_indexing, revision, created_at, updated_at, write_seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, {})
            "#,
            NEXT_WRITE_SEQ
        ))
        .bind(&row.id)
        .bind(row.chapter_index)
        .bind(&row.chapter_title)
        .bind(row.scene_index)
        .bind(&row.plot_text)
        .bind(&row.location)
        .bind(&row.mood)
        .bind(encode_ids(&row.related_characters)?)
        .bind(encode_ids(&row.related_context_ids)?)
        .bind(row.needs_indexing as i64)
        .bind(row.revision)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert scene {}", row.id))?;
        Ok(())
    }

    async fn update_scene(&self, row: &SceneRow) -> Result<()> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE scenes SET
                chapter_index = ?,
                chapter_title = ?,
                scene_index = ?,
                plot_text = ?,
                location = ?,
                mood = ?,
                related_characters = ?,
                related_context_ids = ?,
                needs_indexing = ?,
                revision = ?,
                updated_at = ?,
                write_seq = {}
            WHERE id = ?
            "#,
            NEXT_WRITE_SEQ
        ))
        .bind(row.chapter_index)
        .bind(&row.chapter_title)
        .bind(row.scene_index)
        .bind(&row.plot_text)
        .bind(&row.location)
        .bind(&row.mood)
        .bind(encode_ids(&row.related_characters)?)
        .bind(encode_ids(&row.related_context_ids)?)
        .bind(row.needs_indexing as i64)
        .bind(row.revision)
        .bind(row.updated_at)
        .bind(&row.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update scene {}", row.id))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("scene not found: {}", row.id);
        }
        Ok(())
    }

    async fn get_scene(&self, id: &str) -> Result<Option<SceneRow>> {
        let row = sqlx::query(&format!("SELECT {} FROM scenes WHERE id = ?", SCENE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(scene_from_row))
    }

    async fn list_scenes(&self, filter: &SceneFilter) -> Result<Vec<SceneRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM scenes
            WHERE (? IS NULL OR chapter_index = ?)
              AND (? = 0 OR needs_indexing = 1)
            ORDER BY chapter_index, scene_index, rowid
            "#,
            SCENE_COLUMNS
        ))
        .bind(filter.chapter_index.map(i64::from))
        .bind(filter.chapter_index.map(i64::from))
        .bind(filter.dirty_only as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(scene_from_row).collect())
    }

    async fn scene_indices(&self, chapter_index: u32) -> Result<Vec<u32>> {
        let indices: Vec<i64> =
            sqlx::query_scalar("SELECT scene_index FROM scenes WHERE chapter_index = ?")
                .bind(i64::from(chapter_index))
                .fetch_all(&self.pool)
                .await?;
        Ok(indices
            .into_iter()
            .filter_map(|i| u32::try_from(i).ok())
            .collect())
    }

    async fn chapters(&self) -> Result<Vec<Chapter>> {
        let rows = sqlx::query(
            r#"
            SELECT chapter_index, chapter_title, COUNT(*) AS scene_count
            FROM scenes
            WHERE chapter_title IS NOT NULL AND chapter_title != '' AND chapter_index >= 0
            GROUP BY chapter_index, chapter_title
            ORDER BY chapter_index, chapter_title
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let index: i64 = r.get("chapter_index");
                let count: i64 = r.get("scene_count");
                Chapter {
                    chapter_index: index as u32,
                    chapter_title: r.get("chapter_title"),
                    scene_count: count as usize,
                }
            })
            .collect())
    }

    async fn characters(&self) -> Result<Vec<Character>> {
        let rows = sqlx::query("SELECT id, name FROM characters ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Character {
                id: r.get("id"),
                name: r.get("name"),
            })
            .collect())
    }

    async fn insert_character(&self, character: &Character) -> Result<()> {
        sqlx::query("INSERT INTO characters (id, name) VALUES (?, ?)")
            .bind(&character.id)
            .bind(&character.name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert character '{}'", character.name))?;
        Ok(())
    }
}
