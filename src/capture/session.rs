use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use super::debounce::Debouncer;
use super::enrich::{Enricher, Enrichment};
use super::status::{SaveStatus, SaveTracker};
use super::upsert::{SaveRequest, TagReport, Upserter};
use crate::ai::Analyzer;
use crate::config::ScribbleConfig;
use crate::core::analysis::AiAnalysis;
use crate::core::markup;
use crate::core::note::{Note, NoteMetadata};
use crate::error::CaptureError;
use crate::store::NoteStore;

/// Timing knobs for a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub save_debounce: Duration,
    pub analysis_debounce: Duration,
    pub saved_display: Duration,
    pub min_analysis_chars: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from(&ScribbleConfig::default())
    }
}

impl From<&ScribbleConfig> for CaptureOptions {
    fn from(cfg: &ScribbleConfig) -> Self {
        Self {
            save_debounce: cfg.save_debounce(),
            analysis_debounce: cfg.analysis_debounce(),
            saved_display: cfg.saved_display(),
            min_analysis_chars: cfg.min_analysis_chars,
        }
    }
}

/// Result of a save request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(Note),
    /// Nothing to write: the buffer was empty or already saved.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Debounce timer fired.
    Auto,
    /// Explicit save button.
    Manual,
    /// Leaving the editor.
    Exit,
}

#[derive(Default)]
struct Buffer {
    content: String,
    title: String,
    metadata: NoteMetadata,
    /// Bumped on every content change; enrichment results carry it.
    content_version: u64,
    /// Bumped on any change that needs persisting (content, title, metadata).
    revision: u64,
    saved_revision: Option<u64>,
    note_id: Option<Uuid>,
    /// Latest analysis whose version matched the buffer when it arrived.
    enrichment: Option<Enrichment>,
    /// Content version whose tags were already fanned out.
    tagged_version: Option<u64>,
    closed: bool,
}

impl Buffer {
    /// The cached analysis, if it still describes the current content.
    fn current_enrichment(&self) -> Option<&Enrichment> {
        self.enrichment
            .as_ref()
            .filter(|e| e.version == self.content_version)
    }

    fn has_untagged_enrichment(&self) -> bool {
        self.current_enrichment()
            .is_some_and(|e| self.tagged_version != Some(e.version) && !e.analysis.tags.is_empty())
    }
}

struct Snapshot {
    request: SaveRequest,
    revision: u64,
    enrichment: Option<Enrichment>,
}

struct Inner<S, A> {
    buffer: Mutex<Buffer>,
    /// Held for the whole of a persistence call: one write per note at a time.
    save_gate: tokio::sync::Mutex<()>,
    save_timer: Debouncer,
    analysis_timer: Debouncer,
    status: SaveTracker,
    upserter: Upserter<S>,
    enricher: Enricher<A>,
}

/// One editor's capture flow: buffer, debounced auto-save, enrichment and status.
///
/// Dropping the session (or calling [`close`](Self::close)) cancels both timers.
pub struct CaptureSession<S: NoteStore, A: Analyzer> {
    inner: Arc<Inner<S, A>>,
}

impl<S: NoteStore, A: Analyzer> CaptureSession<S, A> {
    pub fn start(store: Arc<S>, analyzer: Arc<A>, options: CaptureOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Buffer::default()),
                save_gate: tokio::sync::Mutex::new(()),
                save_timer: Debouncer::new(options.save_debounce),
                analysis_timer: Debouncer::new(options.analysis_debounce),
                status: SaveTracker::new(options.saved_display),
                upserter: Upserter::new(store),
                enricher: Enricher::new(analyzer, options.min_analysis_chars),
            }),
        }
    }

    /// Replace the editor content. Re-arms both the save and analysis timers.
    pub fn on_edit(&self, content: impl Into<String>) {
        let content = content.into();
        {
            let mut buf = self.inner.lock();
            if buf.closed || buf.content == content {
                return;
            }
            buf.content = content;
            buf.content_version += 1;
            buf.revision += 1;
            if markup::is_effectively_empty(&buf.content) {
                // Nothing left to describe; never carry old tags into a new note.
                buf.enrichment = None;
            }
        }
        self.arm_save();
        self.arm_analysis();
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        {
            let mut buf = self.inner.lock();
            if buf.closed || buf.title == title {
                return;
            }
            buf.title = title;
            buf.revision += 1;
        }
        self.arm_save();
    }

    /// Mood, ephemeral expiry or time-capsule lock for the note.
    pub fn set_metadata(&self, metadata: NoteMetadata) {
        {
            let mut buf = self.inner.lock();
            if buf.closed || buf.metadata == metadata {
                return;
            }
            buf.metadata = metadata;
            buf.revision += 1;
        }
        self.arm_save();
    }

    /// Explicit save. Cancels the pending auto-save and always writes
    /// non-empty content, waiting behind any save already in flight.
    pub async fn save_now(&self) -> Result<SaveOutcome, CaptureError> {
        self.inner.save_timer.cancel();
        self.inner.persist(Trigger::Manual).await
    }

    /// Leave the editor: one best-effort save that bypasses the debounce,
    /// then close the session.
    pub async fn save_and_exit(&self) -> Result<SaveOutcome, CaptureError> {
        self.inner.save_timer.cancel();
        self.inner.analysis_timer.cancel();
        let result = self.inner.persist(Trigger::Exit).await;
        self.close();
        result
    }

    /// Tear down: cancel timers and ignore results that arrive later.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.save_timer.cancel();
        self.inner.analysis_timer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn status(&self) -> SaveStatus {
        self.inner.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status.subscribe()
    }

    pub fn note_id(&self) -> Option<Uuid> {
        self.inner.lock().note_id
    }

    pub fn content(&self) -> String {
        self.inner.lock().content.clone()
    }

    pub fn title(&self) -> String {
        self.inner.lock().title.clone()
    }

    /// The analysis matching the current content, if any.
    pub fn analysis(&self) -> Option<AiAnalysis> {
        self.inner
            .lock()
            .current_enrichment()
            .map(|e| e.analysis.clone())
    }

    pub fn word_count(&self) -> usize {
        markup::word_count(&self.inner.lock().content)
    }

    fn arm_save(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.save_timer.arm(move || auto_save(weak));
    }

    fn arm_analysis(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.analysis_timer.arm(move || analyze(weak));
    }
}

impl<S: NoteStore, A: Analyzer> Drop for CaptureSession<S, A> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn auto_save<S: NoteStore, A: Analyzer>(weak: Weak<Inner<S, A>>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if let Err(e) = inner.persist(Trigger::Auto).await {
        log::warn!("Auto-save failed: {}", e);
    }
}

async fn analyze<S: NoteStore, A: Analyzer>(weak: Weak<Inner<S, A>>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    // Read the buffer now, not when the timer was armed.
    let (content, version) = {
        let buf = inner.lock();
        if buf.closed {
            return;
        }
        (buf.content.clone(), buf.content_version)
    };

    let Some(enrichment) = inner.enricher.request(&content, version).await else {
        return;
    };

    let mut buf = inner.lock();
    if buf.closed {
        return;
    }
    if enrichment.version == buf.content_version {
        buf.enrichment = Some(enrichment);
    } else {
        log::debug!(
            "Discarding analysis for v{} (buffer is at v{})",
            enrichment.version,
            buf.content_version
        );
    }
}

impl<S: NoteStore, A: Analyzer> Inner<S, A> {
    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide what (if anything) to write, reading the buffer as it is now.
    fn snapshot(&self, trigger: Trigger) -> Result<Option<Snapshot>, CaptureError> {
        let buf = self.lock();
        if buf.closed && trigger != Trigger::Exit {
            return Err(CaptureError::Closed);
        }
        if markup::is_effectively_empty(&buf.content) {
            return match trigger {
                Trigger::Manual => Err(CaptureError::EmptyContent),
                Trigger::Auto | Trigger::Exit => Ok(None),
            };
        }

        let unchanged = buf.saved_revision == Some(buf.revision);
        let skip = match trigger {
            Trigger::Auto => unchanged,
            Trigger::Exit => unchanged && !buf.has_untagged_enrichment(),
            Trigger::Manual => false,
        };
        if skip {
            return Ok(None);
        }

        let enrichment = buf.current_enrichment().cloned();
        let mut metadata = buf.metadata.clone();
        if metadata.mood.is_none() {
            metadata.mood = enrichment.as_ref().and_then(|e| e.analysis.mood.clone());
        }
        let title = Some(buf.title.trim().to_string()).filter(|t| !t.is_empty());

        Ok(Some(Snapshot {
            request: SaveRequest {
                id: buf.note_id,
                content: buf.content.clone(),
                title,
                summary: enrichment
                    .as_ref()
                    .map(|e| e.analysis.summary.clone())
                    .filter(|s| !s.is_empty()),
                metadata,
            },
            revision: buf.revision,
            enrichment,
        }))
    }

    async fn persist(&self, trigger: Trigger) -> Result<SaveOutcome, CaptureError> {
        let _gate = self.save_gate.lock().await;

        let Some(snapshot) = self.snapshot(trigger)? else {
            return Ok(SaveOutcome::Skipped);
        };

        self.status.begin();
        let note = match self.upserter.save(snapshot.request).await {
            Ok(note) => note,
            Err(e) => {
                // The buffer is left as-is so the user can retry.
                log::error!("Save failed: {}", e);
                if !self.lock().closed || trigger == Trigger::Exit {
                    self.status.fail(e.to_string());
                }
                return Err(e.into());
            }
        };

        let tags_to_apply = {
            let mut buf = self.lock();
            match buf.note_id {
                None => buf.note_id = Some(note.id),
                Some(id) if id != note.id => {
                    log::warn!("Store returned note {} for cached id {}", note.id, id);
                }
                Some(_) => {}
            }
            if buf.saved_revision.is_none_or(|r| r < snapshot.revision) {
                buf.saved_revision = Some(snapshot.revision);
            }
            if buf.closed && trigger != Trigger::Exit {
                log::debug!("Session closed while saving; ignoring result");
                return Ok(SaveOutcome::Saved(note));
            }
            match snapshot.enrichment {
                Some(e) if buf.tagged_version != Some(e.version) && !e.analysis.tags.is_empty() => {
                    buf.tagged_version = Some(e.version);
                    Some(e.analysis.tags)
                }
                _ => None,
            }
        };

        if let Some(tags) = tags_to_apply {
            let TagReport { applied, failed } = self.upserter.apply_tags(note.id, &tags).await;
            log::info!(
                "Tagged note {}: {} applied, {} failed",
                note.id,
                applied.len(),
                failed.len()
            );
        }

        self.status.succeed();
        Ok(SaveOutcome::Saved(note))
    }
}
