pub mod gemini;
pub mod offline;

use std::future::Future;

use crate::core::analysis::{AiAnalysis, MergeCandidate, MergeSuggestion};
use crate::error::AnalysisError;

pub use gemini::GeminiClient;
pub use offline::OfflineAnalyzer;

/// The analysis endpoint: summarize/tag a note, or judge whether notes overlap.
pub trait Analyzer: Send + Sync + 'static {
    /// `plain_text` never contains markup.
    fn analyze(
        &self,
        plain_text: &str,
    ) -> impl Future<Output = Result<AiAnalysis, AnalysisError>> + Send;

    fn suggest_merge(
        &self,
        notes: &[MergeCandidate],
    ) -> impl Future<Output = Result<MergeSuggestion, AnalysisError>> + Send;
}
