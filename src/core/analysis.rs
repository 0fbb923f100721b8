use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AnalysisError;

use super::markup;

pub const MAX_TAGS: usize = 5;
const MERGE_EXCERPT_CHARS: usize = 200;

/// Summary, tags and mood derived from a note's text. Never persisted as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mood: Option<String>,
}

impl AiAnalysis {
    /// Trim tags, drop blanks and repeats, keep at most [`MAX_TAGS`].
    pub fn normalized(mut self) -> Self {
        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags.drain(..) {
            let tag = tag.trim().trim_start_matches('#').to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags.truncate(MAX_TAGS);
        self.tags = tags;
        self.summary = self.summary.trim().to_string();
        self.mood = self.mood.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
        self
    }
}

/// Verdict of a merge analysis over recent notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSuggestion {
    #[serde(default)]
    pub should_merge: bool,
    #[serde(default)]
    pub note_ids: Vec<Uuid>,
    #[serde(default)]
    pub merged_title: Option<String>,
    #[serde(default)]
    pub merged_content: Option<String>,
}

impl MergeSuggestion {
    /// Only a suggestion naming at least two notes is worth acting on.
    pub fn is_actionable(&self) -> bool {
        self.should_merge && self.note_ids.len() > 1 && self.merged_content.is_some()
    }
}

/// Plain-text digest of a note sent for merge analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeCandidate {
    pub id: Uuid,
    pub title: String,
    pub content: String,
}

impl MergeCandidate {
    pub fn from_note(note: &super::note::Note) -> Self {
        Self {
            id: note.id,
            title: note.display_title().to_string(),
            content: markup::plain_text(&note.content)
                .chars()
                .take(MERGE_EXCERPT_CHARS)
                .collect(),
        }
    }
}

/// Parse model output as JSON after stripping code fences and any chatter
/// outside the outermost bracket pair.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, AnalysisError> {
    let text = raw.replace("```json", "").replace("```", "");
    let text = text.trim();

    let start = text.find(['{', '[']);
    let end = text.rfind(['}', ']']);
    let json_str = match (start, end) {
        (Some(s), Some(e)) if e >= s => &text[s..=e],
        _ => return Err(AnalysisError::Malformed(format!("no JSON object in: {}", raw))),
    };

    serde_json::from_str::<T>(json_str)
        .map_err(|e| AnalysisError::Malformed(format!("{} — raw: {}", e, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_output() {
        let raw = "```json\n{\"summary\": \"Weekly groceries\", \"tags\": [\"groceries\", \"shopping\"]}\n```";
        let a: AiAnalysis = parse_model_json(raw).unwrap();
        assert_eq!(a.summary, "Weekly groceries");
        assert_eq!(a.tags, vec!["groceries", "shopping"]);
        assert_eq!(a.mood, None);
    }

    #[test]
    fn ignores_chatter_around_object() {
        let raw = "Sure! Here you go: {\"summary\": \"s\", \"tags\": [], \"mood\": \"🙂\"} Hope it helps.";
        let a: AiAnalysis = parse_model_json(raw).unwrap();
        assert_eq!(a.mood.as_deref(), Some("🙂"));
    }

    #[test]
    fn malformed_output_is_an_error() {
        let err = parse_model_json::<AiAnalysis>("I cannot help with that").unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed(_)));
        assert!(parse_model_json::<AiAnalysis>("{\"summary\": ").is_err());
    }

    #[test]
    fn normalizes_tags() {
        let a = AiAnalysis {
            summary: "  s ".into(),
            tags: vec!["#work", " work", "", "a", "b", "c", "d", "e"]
                .into_iter()
                .map(String::from)
                .collect(),
            mood: Some(" ".into()),
        }
        .normalized();
        assert_eq!(a.tags, vec!["work", "a", "b", "c", "d"]);
        assert_eq!(a.summary, "s");
        assert_eq!(a.mood, None);
    }

    #[test]
    fn merge_suggestion_needs_two_notes() {
        let raw = r#"{"shouldMerge": true, "noteIds": ["6f1c1a52-3a43-4a44-8d3e-2f0a8a0b8a01"], "mergedContent": "x"}"#;
        let s: MergeSuggestion = parse_model_json(raw).unwrap();
        assert!(!s.is_actionable());
    }
}
