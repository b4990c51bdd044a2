use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Scene records. Content columns stay nullable so legacy rows can be
    // loaded and reported instead of rejected at the storage layer.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scenes (
            id TEXT PRIMARY KEY,
            chapter_index INTEGER NOT NULL,
            chapter_title TEXT,
            scene_index INTEGER NOT NULL,
            plot_text TEXT,
            location TEXT,
            mood TEXT,
            related_characters TEXT,
            related_context_ids TEXT,
            needs_indexing INTEGER NOT NULL DEFAULT 1,
            revision INTEGER NOT NULL DEFAULT 1,
            write_seq INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before write_seq existed: order their rows by rowid.
    let has_write_seq: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('scenes') WHERE name = 'write_seq'",
    )
    .fetch_one(pool)
    .await?;
    if has_write_seq == 0 {
        sqlx::query("ALTER TABLE scenes ADD COLUMN write_seq INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
        sqlx::query("UPDATE scenes SET write_seq = rowid")
            .execute(pool)
            .await?;
    }

    // Characters (read-only reference data for the synchronizer)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS characters (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Local vector index entries, keyed by external id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            digest_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per synchronization pass
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            model TEXT NOT NULL,
            index_name TEXT NOT NULL,
            attempted INTEGER NOT NULL,
            synchronized INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            first_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scenes_needs_indexing ON scenes(needs_indexing)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scenes_chapter ON scenes(chapter_index, scene_index)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
