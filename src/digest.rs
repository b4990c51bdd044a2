//! Deterministic identity and embedding text for a scene.
//!
//! The vector-index key depends only on `(chapter_index, scene_index)`, so a
//! re-synchronized scene overwrites its previous vector. Two different records
//! placed at the same position share one key; the later one wins.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::config::DigestConfig;
use crate::models::SceneRecord;

/// Value of `content_kind` for scene plot vectors.
pub const CONTENT_KIND_PLOT: &str = "plot_text";

/// Vector-index key for a scene position.
///
/// ```rust
/// use scene_sync::digest::external_id;
/// assert_eq!(external_id(2, 5), "plot-ch2-5");
/// ```
pub fn external_id(chapter_index: u32, scene_index: u32) -> String {
    format!("plot-ch{}-{}", chapter_index, scene_index)
}

/// Labels placed before the location and mood lines of a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestFormat {
    pub location_label: String,
    pub mood_label: String,
}

impl Default for DigestFormat {
    fn default() -> Self {
        Self {
            location_label: "location".to_string(),
            mood_label: "mood".to_string(),
        }
    }
}

impl From<&DigestConfig> for DigestFormat {
    fn from(config: &DigestConfig) -> Self {
        Self {
            location_label: config.location_label.clone(),
            mood_label: config.mood_label.clone(),
        }
    }
}

impl DigestFormat {
    /// `plot_text\n{location_label}: location\n{mood_label}: mood`
    pub fn build(&self, plot_text: &str, location: &str, mood: &str) -> String {
        format!(
            "{}\n{}: {}\n{}: {}",
            plot_text, self.location_label, location, self.mood_label, mood
        )
    }

    pub fn for_record(&self, record: &SceneRecord) -> String {
        self.build(&record.plot_text, &record.location, &record.mood)
    }
}

/// Digest with the default `location` / `mood` labels.
pub fn build_digest(plot_text: &str, location: &str, mood: &str) -> String {
    DigestFormat::default().build(plot_text, location, mood)
}

/// Hex SHA-256 of a digest, stored next to local index entries.
pub fn digest_hash(digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digest.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Metadata stored with every scene vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub external_id: String,
    pub chapter_index: u32,
    pub scene_index: u32,
    pub chapter_title: String,
    pub digest: String,
    pub related_characters: Vec<String>,
    pub related_context_ids: Vec<String>,
    pub content_kind: String,
    pub embedding_model: String,
}

/// A dirty record reduced to what the synchronizer sends out.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedScene {
    pub record_id: String,
    pub revision: i64,
    pub external_id: String,
    pub digest: String,
    pub chapter_index: u32,
    pub scene_index: u32,
    pub chapter_title: String,
    pub related_characters: Vec<String>,
    pub related_context_ids: Vec<String>,
}

impl PreparedScene {
    pub fn from_record(record: &SceneRecord, format: &DigestFormat) -> Self {
        Self {
            record_id: record.id.clone(),
            revision: record.revision,
            external_id: external_id(record.chapter_index, record.scene_index),
            digest: format.for_record(record),
            chapter_index: record.chapter_index,
            scene_index: record.scene_index,
            chapter_title: record.chapter_title.clone(),
            related_characters: record.related_characters.clone(),
            related_context_ids: record.related_context_ids.clone(),
        }
    }

    pub fn metadata(&self, embedding_model: &str) -> IndexMetadata {
        IndexMetadata {
            external_id: self.external_id.clone(),
            chapter_index: self.chapter_index,
            scene_index: self.scene_index,
            chapter_title: self.chapter_title.clone(),
            digest: self.digest.clone(),
            related_characters: self.related_characters.clone(),
            related_context_ids: self.related_context_ids.clone(),
            content_kind: CONTENT_KIND_PLOT.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(plot: &str) -> SceneRecord {
        SceneRecord {
            id: "rec-1".into(),
            chapter_index: 0,
            chapter_title: String::new(),
            scene_index: 7,
            plot_text: plot.into(),
            location: "駅".into(),
            mood: "不安/夜明け前".into(),
            related_characters: vec!["c1".into()],
            related_context_ids: vec![],
            needs_indexing: true,
            revision: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn external_id_is_positional() {
        assert_eq!(external_id(2, 5), "plot-ch2-5");
        assert_eq!(external_id(2, 5), external_id(2, 5));
        assert_eq!(external_id(0, 0), "plot-ch0-0");
        assert_ne!(external_id(1, 23), external_id(12, 3));
    }

    #[test]
    fn digest_exact_format() {
        assert_eq!(
            build_digest("猫が鳴いた", "庭", "切ない"),
            "猫が鳴いた\nlocation: 庭\nmood: 切ない"
        );
    }

    #[test]
    fn digest_with_custom_labels() {
        let format = DigestFormat {
            location_label: "場所".into(),
            mood_label: "雰囲気".into(),
        };
        assert_eq!(
            format.build("猫が鳴いた", "庭", "切ない"),
            "猫が鳴いた\n場所: 庭\n雰囲気: 切ない"
        );
    }

    #[test]
    fn empty_plot_still_has_location_and_mood_lines() {
        let prepared = PreparedScene::from_record(&record(""), &DigestFormat::default());
        assert_eq!(prepared.digest, "\nlocation: 駅\nmood: 不安/夜明け前");
        assert_eq!(prepared.external_id, "plot-ch0-7");
    }

    #[test]
    fn digest_uses_stored_mood_text_unchanged() {
        let mut legacy = record("猫");
        legacy.location = "庭".into();
        legacy.mood = "切ない//雨".into();
        let prepared = PreparedScene::from_record(&legacy, &DigestFormat::default());
        assert_eq!(prepared.digest, "猫\nlocation: 庭\nmood: 切ない//雨");
        assert_eq!(prepared.metadata("m").digest, prepared.digest);
    }

    #[test]
    fn metadata_carries_empty_title_and_kind() {
        let prepared = PreparedScene::from_record(&record("x"), &DigestFormat::default());
        let meta = prepared.metadata("text-embedding-3-small");
        assert_eq!(meta.chapter_title, "");
        assert_eq!(meta.content_kind, "plot_text");
        assert_eq!(meta.external_id, "plot-ch0-7");
        assert_eq!(meta.embedding_model, "text-embedding-3-small");
    }

    #[test]
    fn digest_hash_is_stable() {
        assert_eq!(digest_hash("a"), digest_hash("a"));
        assert_ne!(digest_hash("a"), digest_hash("b"));
        assert_eq!(digest_hash("").len(), 64);
    }
}
