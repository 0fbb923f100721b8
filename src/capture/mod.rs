//! Note capture: editor buffer, debounced auto-save, AI enrichment and save status.

pub mod debounce;
pub mod enrich;
pub mod session;
pub mod status;
pub mod upsert;

pub use session::{CaptureOptions, CaptureSession, SaveOutcome};
pub use status::{SaveStatus, SaveTracker};
pub use upsert::{SaveRequest, TagReport, Upserter};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::ai::Analyzer;
    use crate::core::analysis::{AiAnalysis, MergeCandidate, MergeSuggestion};
    use crate::error::AnalysisError;

    /// Analyzer returning a fixed answer after an optional delay, recording inputs.
    pub struct ScriptedAnalyzer {
        pub reply: Mutex<Result<AiAnalysis, AnalysisError>>,
        pub delay: Mutex<Duration>,
        pub calls: Mutex<Vec<String>>,
        pub merge: Mutex<MergeSuggestion>,
    }

    impl ScriptedAnalyzer {
        pub fn tags(summary: &str, tags: &[&str]) -> Self {
            Self {
                reply: Mutex::new(Ok(AiAnalysis {
                    summary: summary.into(),
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                    mood: None,
                })),
                delay: Mutex::new(Duration::ZERO),
                calls: Mutex::new(Vec::new()),
                merge: Mutex::new(MergeSuggestion::default()),
            }
        }

        pub fn failing() -> Self {
            let a = Self::tags("", &[]);
            *a.reply.lock().unwrap() = Err(AnalysisError::Http {
                status: 500,
                message: "boom".into(),
            });
            a
        }

        pub fn with_delay(self, delay: Duration) -> Self {
            *self.delay.lock().unwrap() = delay;
            self
        }

        pub fn with_merge(self, suggestion: MergeSuggestion) -> Self {
            *self.merge.lock().unwrap() = suggestion;
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Analyzer for ScriptedAnalyzer {
        async fn analyze(&self, plain_text: &str) -> Result<AiAnalysis, AnalysisError> {
            self.calls.lock().unwrap().push(plain_text.to_string());
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.reply.lock().unwrap().clone()
        }

        async fn suggest_merge(
            &self,
            _notes: &[MergeCandidate],
        ) -> Result<MergeSuggestion, AnalysisError> {
            Ok(self.merge.lock().unwrap().clone())
        }
    }
}
