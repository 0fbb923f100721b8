use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use uuid::Uuid;

use crate::core::note::{Note, NoteMetadata, NoteWrite, OptionalColumn};
use crate::core::tag::{NoteTag, Tag};
use crate::error::StoreError;
use crate::store::NoteStore;

/// What a capture session wants persisted.
#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    /// Cached id from an earlier save; `None` takes the insert path.
    pub id: Option<Uuid>,
    pub content: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub metadata: NoteMetadata,
}

/// Outcome of fanning tags out to a note.
#[derive(Debug, Default)]
pub struct TagReport {
    pub applied: Vec<Tag>,
    pub failed: Vec<(String, StoreError)>,
}

/// Writes notes to the store, tolerating optional columns the schema lacks.
pub struct Upserter<S> {
    store: Arc<S>,
    /// Optional columns the remote rejected; later writes leave them out up front.
    missing: Mutex<HashSet<OptionalColumn>>,
}

impl<S: NoteStore> Upserter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            missing: Mutex::new(HashSet::new()),
        }
    }

    pub fn missing_columns(&self) -> Vec<OptionalColumn> {
        self.missing
            .lock()
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Resolve the principal, then upsert the note.
    pub async fn save(&self, req: SaveRequest) -> Result<Note, StoreError> {
        let user_id = self.store.current_user().await?;
        let write = NoteWrite::full(
            req.id,
            user_id,
            req.content,
            req.title,
            req.summary,
            &req.metadata,
        );
        self.write(write).await
    }

    /// Upsert `write`. A rejection naming an optional column is retried once
    /// with that column dropped; mandatory columns are never dropped.
    pub async fn write(&self, mut write: NoteWrite) -> Result<Note, StoreError> {
        for column in self.missing_columns() {
            write.omit(column);
        }

        let mut dropped: HashSet<OptionalColumn> = HashSet::new();
        loop {
            match self.store.upsert_note(&write).await {
                Ok(note) => {
                    if write.is_insert() {
                        log::info!("Created note {}", note.id);
                    } else {
                        log::debug!("Updated note {}", note.id);
                    }
                    return Ok(note);
                }
                Err(StoreError::MissingColumn(name)) => {
                    let Some(column) = OptionalColumn::from_name(&name) else {
                        log::error!("Store rejected required column '{}'", name);
                        return Err(StoreError::MissingColumn(name));
                    };
                    if !dropped.insert(column) || !write.omit(column) {
                        return Err(StoreError::MissingColumn(name));
                    }
                    log::warn!("Remote schema has no '{}' column, retrying without it", name);
                    if let Ok(mut missing) = self.missing.lock() {
                        missing.insert(column);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Look up or create each tag and link it to the note.
    ///
    /// Tags are independent: one failing does not stop the rest.
    pub async fn apply_tags(&self, note_id: Uuid, names: &[String]) -> TagReport {
        let results = join_all(names.iter().map(|name| self.apply_tag(note_id, name))).await;

        let mut report = TagReport::default();
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(tag) => report.applied.push(tag),
                Err(e) => {
                    log::warn!("Failed to tag note {} with '{}': {}", note_id, name, e);
                    report.failed.push((name.clone(), e));
                }
            }
        }
        report
    }

    async fn apply_tag(&self, note_id: Uuid, name: &str) -> Result<Tag, StoreError> {
        // Lookup-then-insert is not atomic; two writers may both create the tag.
        let tag = match self.store.find_tag(name).await? {
            Some(tag) => tag,
            None => self.store.insert_tag(name).await?,
        };
        self.store
            .upsert_note_tag(NoteTag {
                note_id,
                tag_id: tag.id,
            })
            .await?;
        Ok(tag)
    }
}
