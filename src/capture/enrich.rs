use std::sync::Arc;

use crate::ai::Analyzer;
use crate::core::analysis::AiAnalysis;
use crate::core::markup;

/// An analysis result stamped with the buffer version that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub version: u64,
    pub analysis: AiAnalysis,
}

/// Requests summary/tags for settled content. Failures never surface.
pub struct Enricher<A> {
    analyzer: Arc<A>,
    min_chars: usize,
}

impl<A: Analyzer> Enricher<A> {
    pub fn new(analyzer: Arc<A>, min_chars: usize) -> Self {
        Self {
            analyzer,
            min_chars,
        }
    }

    /// Analyze the plain text of `content`. Returns `None` for fragments
    /// shorter than the minimum and for any failure.
    pub async fn request(&self, content: &str, version: u64) -> Option<Enrichment> {
        let text = markup::plain_text(content);
        let text = text.trim();
        if text.chars().count() < self.min_chars {
            log::debug!("Skipping analysis of short content (v{})", version);
            return None;
        }

        match self.analyzer.analyze(text).await {
            Ok(analysis) => {
                log::debug!(
                    "Analysis for v{}: {} tag(s), summary {:?}",
                    version,
                    analysis.tags.len(),
                    analysis.summary
                );
                Some(Enrichment { version, analysis })
            }
            Err(e) => {
                log::warn!("AI analysis failed: {}", e);
                None
            }
        }
    }
}
