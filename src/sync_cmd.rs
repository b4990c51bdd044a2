//! `scenesync sync`: run one synchronization pass against the configured
//! store, embedding provider and vector index, record it in `sync_runs`, and
//! print a summary on stdout.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::index;
use crate::progress::ProgressMode;
use crate::store::sqlite::{SqliteSceneStore, SyncRunRecord};
use crate::sync::{SyncOptions, SyncReport, Synchronizer};

pub async fn run_sync(config: &Config, dry_run: bool, progress: ProgressMode) -> Result<()> {
    if !dry_run && !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteSceneStore::new(pool.clone()));
    let embedder = embedding::create_provider(&config.embedding)?;
    let vector_index = index::create_index(&config.index, &pool)?;

    let synchronizer = Synchronizer::new(
        store.clone(),
        embedder,
        vector_index,
        SyncOptions::from_config(config),
    )
    .with_progress(progress.reporter());

    if dry_run {
        let plan = synchronizer.plan().await?;
        println!("sync (dry-run)");
        println!("  dirty scenes: {}", plan.attempted);
        println!("  ready to index: {}", plan.prepared.len());
        for scene in &plan.prepared {
            println!("    {}  {}", scene.external_id, scene.record_id);
        }
        if !plan.failures.is_empty() {
            println!("  skipped: {}", plan.failures.len());
            for failure in &plan.failures {
                println!("    {}  {}", failure.record_id, failure.error);
            }
        }
        pool.close().await;
        return Ok(());
    }

    let started_at = Utc::now().timestamp();
    let report = synchronizer.synchronize().await?;
    let finished_at = Utc::now().timestamp();

    store
        .record_sync_run(&SyncRunRecord {
            started_at,
            finished_at,
            model: report.model.clone(),
            index_name: synchronizer.index_name().to_string(),
            attempted: report.attempted as i64,
            synchronized: report.synchronized as i64,
            failed: report.failed() as i64,
            first_error: report.first_error().map(|e| e.to_string()),
        })
        .await?;

    print_report(&report, synchronizer.index_name());

    pool.close().await;
    Ok(())
}

fn print_report(report: &SyncReport, index_name: &str) {
    println!("sync");
    println!("  model: {}", report.model);
    println!("  index: {}", index_name);
    println!("  attempted: {}", report.attempted);
    println!("  synchronized: {}", report.synchronized);
    println!("  upserted: {}", report.upserted);
    if report.collisions > 0 {
        println!("  position collisions: {}", report.collisions);
    }
    if report.superseded > 0 {
        println!("  edited during sync (still dirty): {}", report.superseded);
    }
    println!("  failed: {}", report.failed());
    for failure in &report.failures {
        println!(
            "    {}  [{}] {}",
            failure.record_id,
            failure.error.kind(),
            failure.error
        );
    }
}
