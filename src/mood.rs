//! Scene mood as a typed tag list.
//!
//! Storage keeps a single `/`-joined string (`"切ない/希望/rain at dusk"`);
//! everywhere else a mood is an ordered list of tags plus an optional
//! free-text tag that is not part of the authoring vocabulary.

use serde::Serialize;

/// Separator used by the storage encoding.
pub const MOOD_SEPARATOR: char = '/';

/// Vocabulary offered to authors when no `[authoring] mood_options` is configured.
pub const DEFAULT_MOOD_OPTIONS: &[&str] = &[
    "切ない",
    "悲しい",
    "怒り",
    "不安",
    "希望",
    "緊張感",
    "熱い",
    "ほのぼの",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mood {
    pub tags: Vec<String>,
    pub free_text: Option<String>,
}

impl Mood {
    pub fn new(tags: Vec<String>, free_text: Option<String>) -> Self {
        let tags = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let free_text = free_text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self { tags, free_text }
    }

    /// Decode the storage form. Every non-empty segment becomes a tag;
    /// use [`Mood::partition`] to separate vocabulary tags from free text.
    pub fn decode(encoded: &str) -> Self {
        Self {
            tags: encoded
                .split(MOOD_SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            free_text: None,
        }
    }

    /// Encode to the storage form: `tags ++ [free_text]` joined with `/`.
    pub fn encode(&self) -> String {
        let mut parts: Vec<&str> = self
            .tags
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(free) = self.free_text.as_deref().filter(|s| !s.is_empty()) {
            parts.push(free);
        }
        parts.join(&MOOD_SEPARATOR.to_string())
    }

    /// Split into tags known to `vocabulary` and a free-text remainder
    /// holding everything else, in original order.
    pub fn partition<S: AsRef<str>>(&self, vocabulary: &[S]) -> Mood {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        let all = self.tags.iter().chain(self.free_text.iter());
        for tag in all {
            if vocabulary.iter().any(|v| v.as_ref() == tag) {
                known.push(tag.clone());
            } else {
                unknown.push(tag.as_str());
            }
        }
        let free_text = if unknown.is_empty() {
            None
        } else {
            Some(unknown.join(&MOOD_SEPARATOR.to_string()))
        };
        Mood {
            tags: known,
            free_text,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.free_text.is_none()
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_free_text_last() {
        let mood = Mood::new(
            vec!["切ない".into(), "希望".into()],
            Some("雨上がり".into()),
        );
        assert_eq!(mood.encode(), "切ない/希望/雨上がり");
    }

    #[test]
    fn decode_keeps_storage_order() {
        let mood = Mood::decode("雨上がり/切ない");
        assert_eq!(mood.tags, vec!["雨上がり", "切ない"]);
        assert_eq!(mood.encode(), "雨上がり/切ない");
    }

    #[test]
    fn decode_drops_empty_segments() {
        assert!(Mood::decode("").is_empty());
        assert_eq!(Mood::decode("熱い//").encode(), "熱い");
    }

    #[test]
    fn partition_separates_vocabulary() {
        let mood = Mood::decode("切ない/rain/熱い/dusk");
        let split = mood.partition(DEFAULT_MOOD_OPTIONS);
        assert_eq!(split.tags, vec!["切ない", "熱い"]);
        assert_eq!(split.free_text.as_deref(), Some("rain/dusk"));
    }

    #[test]
    fn new_trims_and_drops_blank() {
        let mood = Mood::new(vec![" 不安 ".into(), "".into()], Some("  ".into()));
        assert_eq!(mood.tags, vec!["不安"]);
        assert_eq!(mood.free_text, None);
    }
}
