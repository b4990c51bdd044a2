//! Core data models for scene records.
//!
//! [`SceneRow`] is what a record store hands back (nullable, as legacy rows
//! may be incomplete); [`SceneRecord`] is the validated form the
//! synchronizer and the authoring commands work with.

use serde::Serialize;

use crate::error::SyncError;

/// A validated scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneRecord {
    pub id: String,
    /// `0` is the prologue.
    pub chapter_index: u32,
    pub chapter_title: String,
    /// Narrative order within the chapter. Not guaranteed unique.
    pub scene_index: u32,
    pub plot_text: String,
    pub location: String,
    /// Mood as stored, `/`-joined. Kept verbatim so legacy free text reaches
    /// the digest unchanged; see [`crate::mood::Mood::decode`] for the tag view.
    pub mood: String,
    pub related_characters: Vec<String>,
    pub related_context_ids: Vec<String>,
    pub needs_indexing: bool,
    /// Incremented on every content write; lets the synchronizer clear the
    /// flag only for the revision it actually indexed.
    pub revision: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A scene as stored, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneRow {
    pub id: String,
    pub chapter_index: i64,
    pub chapter_title: Option<String>,
    pub scene_index: i64,
    pub plot_text: Option<String>,
    pub location: Option<String>,
    pub mood: Option<String>,
    pub related_characters: Option<Vec<String>>,
    pub related_context_ids: Option<Vec<String>>,
    pub needs_indexing: bool,
    pub revision: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SceneRow {
    /// Validate into a [`SceneRecord`].
    ///
    /// `plot_text`, `location` and `mood` are required (an empty string is
    /// fine, NULL is not). A missing chapter title or id list reads as empty.
    pub fn into_record(self) -> Result<SceneRecord, SyncError> {
        let missing = |field: &str| SyncError::InconsistentRecord {
            record_id: self.id.clone(),
            field: field.to_string(),
        };

        let chapter_index = u32::try_from(self.chapter_index).map_err(|_| missing("chapter_index"))?;
        let scene_index = u32::try_from(self.scene_index).map_err(|_| missing("scene_index"))?;
        let plot_text = self.plot_text.clone().ok_or_else(|| missing("plot_text"))?;
        let location = self.location.clone().ok_or_else(|| missing("location"))?;
        let mood = self.mood.clone().ok_or_else(|| missing("mood"))?;

        Ok(SceneRecord {
            id: self.id,
            chapter_index,
            chapter_title: self.chapter_title.unwrap_or_default(),
            scene_index,
            plot_text,
            location,
            mood,
            related_characters: self.related_characters.unwrap_or_default(),
            related_context_ids: self.related_context_ids.unwrap_or_default(),
            needs_indexing: self.needs_indexing,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<&SceneRecord> for SceneRow {
    fn from(record: &SceneRecord) -> Self {
        Self {
            id: record.id.clone(),
            chapter_index: i64::from(record.chapter_index),
            chapter_title: Some(record.chapter_title.clone()),
            scene_index: i64::from(record.scene_index),
            plot_text: Some(record.plot_text.clone()),
            location: Some(record.location.clone()),
            mood: Some(record.mood.clone()),
            related_characters: Some(record.related_characters.clone()),
            related_context_ids: Some(record.related_context_ids.clone()),
            needs_indexing: record.needs_indexing,
            revision: record.revision,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// A character that scenes can reference by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Character {
    pub id: String,
    pub name: String,
}

/// A chapter as seen across existing scenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub chapter_index: u32,
    pub chapter_title: String,
    pub scene_count: usize,
}

/// Normalize an id list: trim, drop blanks and duplicates, keep first-seen order.
pub fn normalize_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        let id = id.as_ref().trim();
        if !id.is_empty() && !out.iter().any(|existing| existing == id) {
            out.push(id.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> SceneRow {
        SceneRow {
            id: "r1".into(),
            chapter_index: 1,
            chapter_title: None,
            scene_index: 3,
            plot_text: Some("".into()),
            location: Some("庭".into()),
            mood: Some("切ない/雨".into()),
            related_characters: None,
            related_context_ids: Some(vec!["ctx-1".into()]),
            needs_indexing: true,
            revision: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn legacy_nulls_read_as_empty() {
        let rec = row().into_record().unwrap();
        assert_eq!(rec.chapter_title, "");
        assert_eq!(rec.plot_text, "");
        assert!(rec.related_characters.is_empty());
        assert_eq!(rec.mood, "切ない/雨");
    }

    #[test]
    fn legacy_mood_text_is_kept_verbatim() {
        let mut r = row();
        r.mood = Some("切ない//雨 ".into());
        let rec = r.into_record().unwrap();
        assert_eq!(rec.mood, "切ない//雨 ");
        assert_eq!(SceneRow::from(&rec).mood.as_deref(), Some("切ない//雨 "));
    }

    #[test]
    fn null_plot_text_is_inconsistent() {
        let mut r = row();
        r.plot_text = None;
        let err = r.into_record().unwrap_err();
        assert_eq!(
            err,
            SyncError::InconsistentRecord {
                record_id: "r1".into(),
                field: "plot_text".into()
            }
        );
    }

    #[test]
    fn negative_scene_index_is_inconsistent() {
        let mut r = row();
        r.scene_index = -1;
        assert_eq!(r.into_record().unwrap_err().kind(), "inconsistent_record");
    }

    #[test]
    fn normalize_ids_dedupes_in_order() {
        assert_eq!(
            normalize_ids([" b", "a", "", "b ", "c"]),
            vec!["b".to_string(), "a".into(), "c".into()]
        );
    }
}
