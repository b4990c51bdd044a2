//! Scene authoring.
//!
//! Every write through this module sets `needs_indexing` and bumps the
//! scene's revision, so the next synchronization pass picks it up. The
//! functions work against any [`SceneRepository`].

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::models::{normalize_ids, Chapter, Character, SceneRecord, SceneRow};
use crate::mood::Mood;
use crate::store::{SceneFilter, SceneRepository};

/// Input for [`add_scene`].
#[derive(Debug, Clone, Default)]
pub struct NewScene {
    /// Explicit chapter. When absent, `chapter_title` must name an existing chapter.
    pub chapter_index: Option<u32>,
    pub chapter_title: Option<String>,
    /// Defaults to the next free index in the chapter.
    pub scene_index: Option<u32>,
    pub plot_text: String,
    pub location: String,
    pub mood: Mood,
    /// Character names or ids. Unknown tokens are kept as manual ids.
    pub characters: Vec<String>,
    pub related_context_ids: Vec<String>,
}

/// Fields to change in [`edit_scene`]. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct ScenePatch {
    pub chapter_index: Option<u32>,
    pub chapter_title: Option<String>,
    pub scene_index: Option<u32>,
    pub plot_text: Option<String>,
    pub location: Option<String>,
    pub mood: Option<Mood>,
    pub characters: Option<Vec<String>>,
    pub related_context_ids: Option<Vec<String>>,
}

/// Create a scene, marked for indexing.
pub async fn add_scene<R>(repo: &R, input: NewScene) -> Result<SceneRecord>
where
    R: SceneRepository + ?Sized,
{
    let chapters = repo.chapters().await?;
    let (chapter_index, chapter_title) =
        resolve_chapter(&chapters, input.chapter_index, input.chapter_title)?;

    let scene_index = match input.scene_index {
        Some(i) => i,
        None => next_scene_index(repo, chapter_index).await?,
    };

    let known = repo.characters().await?;
    let now = Utc::now().timestamp();
    let record = SceneRecord {
        id: Uuid::new_v4().to_string(),
        chapter_index,
        chapter_title,
        scene_index,
        plot_text: input.plot_text,
        location: input.location.trim().to_string(),
        mood: input.mood.encode(),
        related_characters: resolve_characters(&known, &input.characters),
        related_context_ids: normalize_ids(&input.related_context_ids),
        needs_indexing: true,
        revision: 1,
        created_at: now,
        updated_at: now,
    };

    repo.insert_scene(&SceneRow::from(&record))
        .await
        .with_context(|| format!("Failed to insert scene {}", record.id))?;
    tracing::debug!(id = %record.id, chapter = chapter_index, scene = scene_index, "scene added");
    Ok(record)
}

/// Apply `patch` to an existing scene and mark it for indexing.
///
/// Works on incomplete legacy rows too, as long as the patch fills in the
/// missing fields.
pub async fn edit_scene<R>(repo: &R, id: &str, patch: ScenePatch) -> Result<SceneRecord>
where
    R: SceneRepository + ?Sized,
{
    let mut row = repo
        .get_scene(id)
        .await?
        .with_context(|| format!("Scene not found: {}", id))?;

    if let Some(c) = patch.chapter_index {
        row.chapter_index = i64::from(c);
    }
    if let Some(title) = patch.chapter_title {
        row.chapter_title = Some(title.trim().to_string());
    }
    if let Some(s) = patch.scene_index {
        row.scene_index = i64::from(s);
    }
    if let Some(plot) = patch.plot_text {
        row.plot_text = Some(plot);
    }
    if let Some(location) = patch.location {
        row.location = Some(location.trim().to_string());
    }
    if let Some(mood) = patch.mood {
        row.mood = Some(mood.encode());
    }
    if let Some(characters) = patch.characters {
        let known = repo.characters().await?;
        row.related_characters = Some(resolve_characters(&known, &characters));
    }
    if let Some(ids) = patch.related_context_ids {
        row.related_context_ids = Some(normalize_ids(&ids));
    }

    row.needs_indexing = true;
    row.revision += 1;
    row.updated_at = Utc::now().timestamp();

    let record = row
        .clone()
        .into_record()
        .with_context(|| format!("Scene {} is still incomplete after the edit", id))?;
    repo.update_scene(&row)
        .await
        .with_context(|| format!("Failed to update scene {}", id))?;
    tracing::debug!(id, revision = record.revision, "scene edited");
    Ok(record)
}

pub async fn get_scene<R>(repo: &R, id: &str) -> Result<Option<SceneRow>>
where
    R: SceneRepository + ?Sized,
{
    repo.get_scene(id).await
}

pub async fn list_scenes<R>(repo: &R, filter: &SceneFilter) -> Result<Vec<SceneRow>>
where
    R: SceneRepository + ?Sized,
{
    repo.list_scenes(filter).await
}

/// Distinct chapters with a non-empty title.
pub async fn list_chapters<R>(repo: &R) -> Result<Vec<Chapter>>
where
    R: SceneRepository + ?Sized,
{
    repo.chapters().await
}

/// `max + 1` of the scene indices used in the chapter, or `0` for an empty chapter.
pub async fn next_scene_index<R>(repo: &R, chapter_index: u32) -> Result<u32>
where
    R: SceneRepository + ?Sized,
{
    let used = repo.scene_indices(chapter_index).await?;
    Ok(used.into_iter().max().map_or(0, |m| m.saturating_add(1)))
}

pub async fn add_character<R>(repo: &R, name: &str) -> Result<Character>
where
    R: SceneRepository + ?Sized,
{
    let name = name.trim();
    if name.is_empty() {
        bail!("character name must not be empty");
    }
    let character = Character {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
    };
    repo.insert_character(&character).await?;
    Ok(character)
}

pub async fn list_characters<R>(repo: &R) -> Result<Vec<Character>>
where
    R: SceneRepository + ?Sized,
{
    repo.characters().await
}

fn resolve_chapter(
    chapters: &[Chapter],
    chapter_index: Option<u32>,
    chapter_title: Option<String>,
) -> Result<(u32, String)> {
    let title = chapter_title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    match (chapter_index, title) {
        (Some(index), Some(title)) => Ok((index, title)),
        (Some(index), None) => {
            let existing = chapters
                .iter()
                .find(|c| c.chapter_index == index)
                .map(|c| c.chapter_title.clone())
                .unwrap_or_default();
            Ok((index, existing))
        }
        (None, Some(title)) => match chapters.iter().find(|c| c.chapter_title == title) {
            Some(chapter) => Ok((chapter.chapter_index, title)),
            None => bail!(
                "Unknown chapter '{}'; pass a chapter index to start a new chapter",
                title
            ),
        },
        (None, None) => bail!("A chapter index or an existing chapter title is required"),
    }
}

/// Map character names to ids; tokens that match no name are kept verbatim.
fn resolve_characters(known: &[Character], tokens: &[String]) -> Vec<String> {
    let resolved = tokens.iter().map(|token| {
        let token = token.trim();
        known
            .iter()
            .find(|c| c.name == token)
            .map_or_else(|| token.to_string(), |c| c.id.clone())
    });
    normalize_ids(resolved)
}
