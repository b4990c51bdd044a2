//! Database status overview.
//!
//! Summarizes what has been authored and what has reached the index: scene
//! counts, how many scenes are waiting to be synchronized, and the outcome of
//! the most recent `scenesync sync`. Used by `scenesync status`.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::store::sqlite::SqliteSceneStore;

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteSceneStore::new(pool.clone());

    let counts = store.counts().await?;
    let last_run = store.last_sync_run().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Scene Sync: Status");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Index:       {}", config.index.provider);
    println!();
    println!("  Scenes:      {}", counts.scenes);
    println!(
        "  Indexed:     {} / {} ({}%)",
        counts.scenes - counts.dirty,
        counts.scenes,
        if counts.scenes > 0 {
            ((counts.scenes - counts.dirty) * 100) / counts.scenes
        } else {
            0
        }
    );
    println!("  Dirty:       {}", counts.dirty);
    println!("  Characters:  {}", counts.characters);
    if config.index.provider == "sqlite" {
        println!("  Vectors:     {}", counts.index_entries);
    }

    println!();
    match last_run {
        Some(run) => {
            println!("  Last sync:   {}", format_ts_relative(run.finished_at));
            println!("    model:        {}", run.model);
            println!("    index:        {}", run.index_name);
            println!(
                "    synchronized: {} / {} ({} failed)",
                run.synchronized, run.attempted, run.failed
            );
            if let Some(err) = run.first_error {
                println!("    first error:  {}", err);
            }
        }
        None => println!("  Last sync:   never"),
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now ("3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_time_buckets() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
