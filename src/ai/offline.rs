//! Keyword-frequency stand-in for the LLM, used when no API key is configured.

use std::collections::HashMap;

use super::Analyzer;
use crate::core::analysis::{AiAnalysis, MergeCandidate, MergeSuggestion, MAX_TAGS};
use crate::error::AnalysisError;

const SUMMARY_WORDS: usize = 10;
const MIN_TAG_LEN: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "from", "have", "into", "just",
    "more", "need", "only", "some", "than", "that", "their", "them", "then", "there",
    "these", "they", "this", "what", "when", "where", "which", "will", "with", "would",
    "your",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAnalyzer;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Most frequent non-trivial words, ties broken by first appearance.
fn keywords(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, w) in words(text).enumerate() {
        if w.chars().count() < MIN_TAG_LEN || STOPWORDS.contains(&w.as_str()) {
            continue;
        }
        counts.entry(w).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
    ranked.into_iter().take(MAX_TAGS).map(|(w, _)| w).collect()
}

impl Analyzer for OfflineAnalyzer {
    async fn analyze(&self, plain_text: &str) -> Result<AiAnalysis, AnalysisError> {
        let summary = plain_text
            .split_whitespace()
            .take(SUMMARY_WORDS)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(AiAnalysis {
            summary,
            tags: keywords(plain_text),
            mood: None,
        })
    }

    /// Suggests merging notes that share a title, ignoring case.
    async fn suggest_merge(
        &self,
        notes: &[MergeCandidate],
    ) -> Result<MergeSuggestion, AnalysisError> {
        for (i, note) in notes.iter().enumerate() {
            let same: Vec<&MergeCandidate> = notes[i..]
                .iter()
                .filter(|n| n.title.eq_ignore_ascii_case(&note.title) && n.title != "Untitled")
                .collect();
            if same.len() > 1 {
                return Ok(MergeSuggestion {
                    should_merge: true,
                    note_ids: same.iter().map(|n| n.id).collect(),
                    merged_title: Some(note.title.clone()),
                    merged_content: Some(
                        same.iter()
                            .map(|n| n.content.as_str())
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                });
            }
        }
        Ok(MergeSuggestion::default())
    }
}
