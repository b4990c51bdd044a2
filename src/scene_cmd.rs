//! `scenesync scene …`, `scenesync chapters` and `scenesync character …`.

use anyhow::{bail, Result};
use serde_json::json;

use crate::config::Config;
use crate::db;
use crate::digest::{external_id, DigestFormat};
use crate::models::SceneRow;
use crate::mood::Mood;
use crate::scenes::{self, NewScene, ScenePatch};
use crate::store::sqlite::SqliteSceneStore;
use crate::store::SceneFilter;

/// Scene fields as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct SceneArgs {
    pub chapter: Option<u32>,
    pub title: Option<String>,
    pub scene: Option<u32>,
    pub plot: Option<String>,
    pub location: Option<String>,
    pub moods: Vec<String>,
    pub mood_note: Option<String>,
    pub characters: Vec<String>,
    pub context_ids: Vec<String>,
}

impl SceneArgs {
    fn mood(&self, config: &Config) -> Option<Mood> {
        if self.moods.is_empty() && self.mood_note.is_none() {
            return None;
        }
        let mood = Mood::new(self.moods.clone(), self.mood_note.clone());
        Some(mood.partition(&config.authoring.mood_options))
    }
}

async fn open_store(config: &Config) -> Result<SqliteSceneStore> {
    let pool = db::connect(config).await?;
    Ok(SqliteSceneStore::new(pool))
}

pub async fn run_scene_add(config: &Config, args: SceneArgs) -> Result<()> {
    let store = open_store(config).await?;
    let mood = args.mood(config).unwrap_or_default();

    let record = scenes::add_scene(
        &store,
        NewScene {
            chapter_index: args.chapter,
            chapter_title: args.title,
            scene_index: args.scene,
            plot_text: args.plot.unwrap_or_default(),
            location: args.location.unwrap_or_default(),
            mood,
            characters: args.characters,
            related_context_ids: args.context_ids,
        },
    )
    .await?;

    println!("scene added");
    println!("  id: {}", record.id);
    println!(
        "  position: {}",
        external_id(record.chapter_index, record.scene_index)
    );

    store.pool().close().await;
    Ok(())
}

pub async fn run_scene_edit(config: &Config, id: &str, args: SceneArgs) -> Result<()> {
    let store = open_store(config).await?;
    let mood = args.mood(config);

    let patch = ScenePatch {
        chapter_index: args.chapter,
        chapter_title: args.title,
        scene_index: args.scene,
        plot_text: args.plot,
        location: args.location,
        mood,
        characters: (!args.characters.is_empty()).then_some(args.characters),
        related_context_ids: (!args.context_ids.is_empty()).then_some(args.context_ids),
    };
    let record = scenes::edit_scene(&store, id, patch).await?;

    println!("scene updated");
    println!("  id: {}", record.id);
    println!("  revision: {}", record.revision);
    println!(
        "  position: {}",
        external_id(record.chapter_index, record.scene_index)
    );

    store.pool().close().await;
    Ok(())
}

pub async fn run_scene_list(config: &Config, chapter: Option<u32>, dirty_only: bool) -> Result<()> {
    let store = open_store(config).await?;
    let rows = scenes::list_scenes(
        &store,
        &SceneFilter {
            chapter_index: chapter,
            dirty_only,
        },
    )
    .await?;

    if rows.is_empty() {
        println!("No scenes.");
        store.pool().close().await;
        return Ok(());
    }

    println!(
        "{:<5} {:<5} {:<6} {:<16} {:<20} {}",
        "CH", "SCENE", "DIRTY", "LOCATION", "MOOD", "ID"
    );
    println!("{}", "-".repeat(90));
    for row in &rows {
        println!(
            "{:<5} {:<5} {:<6} {:<16} {:<20} {}",
            row.chapter_index,
            row.scene_index,
            if row.needs_indexing { "yes" } else { "" },
            truncate(row.location.as_deref().unwrap_or("(missing)"), 16),
            truncate(row.mood.as_deref().unwrap_or("(missing)"), 20),
            row.id
        );
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_scene_show(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let Some(row) = scenes::get_scene(&store, id).await? else {
        bail!("Scene not found: {}", id);
    };

    let output = scene_json(row, &DigestFormat::from(&config.digest), &config.authoring.mood_options);
    println!("{}", serde_json::to_string_pretty(&output)?);

    store.pool().close().await;
    Ok(())
}

pub async fn run_chapters(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let chapters = scenes::list_chapters(&store).await?;

    if chapters.is_empty() {
        println!("No chapters.");
        store.pool().close().await;
        return Ok(());
    }

    println!("{:<5} {:<30} {:>6} {:>10}", "CH", "TITLE", "SCENES", "NEXT SCENE");
    println!("{}", "-".repeat(56));
    for chapter in &chapters {
        let next = scenes::next_scene_index(&store, chapter.chapter_index).await?;
        println!(
            "{:<5} {:<30} {:>6} {:>10}",
            chapter.chapter_index,
            truncate(&chapter.chapter_title, 30),
            chapter.scene_count,
            next
        );
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_character_add(config: &Config, name: &str) -> Result<()> {
    let store = open_store(config).await?;
    let character = scenes::add_character(&store, name).await?;
    println!("character added");
    println!("  id: {}", character.id);
    println!("  name: {}", character.name);
    store.pool().close().await;
    Ok(())
}

pub async fn run_character_list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let characters = scenes::list_characters(&store).await?;

    if characters.is_empty() {
        println!("No characters.");
    } else {
        for c in &characters {
            println!("{:<38} {}", c.id, c.name);
        }
    }

    store.pool().close().await;
    Ok(())
}

/// JSON view of a stored scene. Incomplete rows are shown as stored, with
/// the validation error instead of a digest.
fn scene_json<S: AsRef<str>>(row: SceneRow, format: &DigestFormat, mood_options: &[S]) -> serde_json::Value {
    let id = row.id.clone();
    match row.clone().into_record() {
        Ok(record) => {
            let mood = Mood::decode(&record.mood).partition(mood_options);
            json!({
                "external_id": external_id(record.chapter_index, record.scene_index),
                "digest": format.for_record(&record),
                "mood_tags": mood.tags,
                "mood_note": mood.free_text,
                "scene": record,
            })
        }
        Err(e) => json!({
            "id": id,
            "chapter_index": row.chapter_index,
            "scene_index": row.scene_index,
            "plot_text": row.plot_text,
            "location": row.location,
            "mood": row.mood,
            "needs_indexing": row.needs_indexing,
            "error": e.to_string(),
        }),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
