//! In-process note store used by offline mode and tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::{NoteStore, SEARCH_LIMIT};
use crate::core::note::{Note, NoteWrite};
use crate::core::tag::{NoteTag, Tag};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    user: Option<Uuid>,
    notes: HashMap<Uuid, Note>,
    tags: Vec<Tag>,
    links: Vec<NoteTag>,
    missing_columns: HashSet<String>,
    failing_upserts: usize,
    failing_tags: HashSet<String>,
    upserts: Vec<serde_json::Value>,
    tag_lookups: Vec<String>,
}

/// A [`NoteStore`] kept in memory.
///
/// Besides plain storage it can pretend columns are missing, fail writes, add
/// latency, and it records every upsert payload it receives.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    latency: Arc<Mutex<Option<Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with a signed-in user.
    pub fn with_user(user: Uuid) -> Self {
        let store = Self::default();
        store.lock().user = Some(user);
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sign_out(&self) {
        self.lock().user = None;
    }

    /// Reject writes naming `column` as if the schema lacked it.
    pub fn drop_column(&self, column: &str) {
        self.lock().missing_columns.insert(column.to_string());
    }

    /// Fail the next `n` upserts with a server error.
    pub fn fail_next_upserts(&self, n: usize) {
        self.lock().failing_upserts = n;
    }

    /// Fail every lookup of the given tag name.
    pub fn fail_tag(&self, name: &str) {
        self.lock().failing_tags.insert(name.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.latency.lock() {
            *l = Some(latency);
        }
    }

    /// Every upsert payload received, in order, including rejected ones.
    pub fn upserts(&self) -> Vec<serde_json::Value> {
        self.lock().upserts.clone()
    }

    pub fn tag_lookups(&self) -> Vec<String> {
        self.lock().tag_lookups.clone()
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.lock().tags.clone()
    }

    pub fn links(&self) -> Vec<NoteTag> {
        self.lock().links.clone()
    }

    pub fn notes(&self) -> Vec<Note> {
        let inner = self.lock();
        inner.notes.values().map(|n| with_tags(&inner, n)).collect()
    }

    /// Highest number of upserts that were running at the same time.
    pub fn max_concurrent_upserts(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Seed a note directly, bypassing the write path.
    pub fn insert_raw(&self, note: Note) {
        self.lock().notes.insert(note.id, note);
    }

    async fn delay(&self) {
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
    }

    fn update<F: FnOnce(&mut Note)>(&self, id: Uuid, f: F) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let note = inner.notes.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        f(note);
        note.updated_at = Utc::now();
        Ok(())
    }

    fn apply_write(&self, write: &NoteWrite) -> Result<Note, StoreError> {
        let payload = serde_json::to_value(write)?;
        let mut inner = self.lock();
        inner.upserts.push(payload.clone());

        if let Some(obj) = payload.as_object() {
            if let Some(column) = obj.keys().find(|k| inner.missing_columns.contains(*k)) {
                return Err(StoreError::MissingColumn(column.clone()));
            }
        }
        if inner.failing_upserts > 0 {
            inner.failing_upserts -= 1;
            return Err(StoreError::Http {
                status: 503,
                message: "service unavailable".into(),
            });
        }

        let id = write.id.unwrap_or_else(Uuid::new_v4);
        let note = inner
            .notes
            .entry(id)
            .or_insert_with(|| {
                let mut n = Note::new(write.user_id, "");
                n.id = id;
                n
            });
        note.content = write.content.clone();
        note.user_id = write.user_id;
        note.updated_at = write.updated_at;
        if let Some(title) = &write.title {
            note.title = title.clone();
        }
        if let Some(summary) = &write.summary {
            note.summary = summary.clone();
        }
        if let Some(mood) = &write.mood {
            note.mood = mood.clone();
        }
        if let Some(expires_at) = write.expires_at {
            note.expires_at = expires_at;
        }
        if let Some(locked_until) = write.locked_until {
            note.locked_until = locked_until;
        }
        let note = note.clone();
        Ok(with_tags(&inner, &note))
    }

    fn sorted(mut notes: Vec<Note>) -> Vec<Note> {
        notes.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.created_at.cmp(&a.created_at))
        });
        notes
    }

    fn select<P: Fn(&Note) -> bool>(&self, pred: P) -> Vec<Note> {
        let inner = self.lock();
        let notes = inner
            .notes
            .values()
            .filter(|n| pred(n))
            .map(|n| with_tags(&inner, n))
            .collect();
        Self::sorted(notes)
    }
}

fn with_tags(inner: &Inner, note: &Note) -> Note {
    let mut note = note.clone();
    note.tags = inner
        .links
        .iter()
        .filter(|l| l.note_id == note.id)
        .filter_map(|l| inner.tags.iter().find(|t| t.id == l.tag_id))
        .map(|t| t.name.clone())
        .collect();
    note
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NoteStore for MemoryStore {
    async fn current_user(&self) -> Result<Uuid, StoreError> {
        self.lock().user.ok_or(StoreError::Unauthenticated)
    }

    async fn upsert_note(&self, write: &NoteWrite) -> Result<Note, StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.delay().await;
        self.apply_write(write)
    }

    async fn insert_note(&self, write: &NoteWrite) -> Result<Note, StoreError> {
        self.delay().await;
        self.apply_write(write)
    }

    async fn get_note(&self, id: Uuid) -> Result<Note, StoreError> {
        let inner = self.lock();
        inner
            .notes
            .get(&id)
            .map(|n| with_tags(&inner, n))
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_feed(&self) -> Result<Vec<Note>, StoreError> {
        Ok(self.select(|n| !n.is_archived))
    }

    async fn list_pinned(&self) -> Result<Vec<Note>, StoreError> {
        Ok(self.select(|n| n.is_pinned && !n.is_archived))
    }

    async fn search(&self, query: &str) -> Result<Vec<Note>, StoreError> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits = self.select(|n| {
            !n.is_archived
                && (n.content.to_lowercase().contains(&q)
                    || n.title.as_deref().is_some_and(|t| t.to_lowercase().contains(&q)))
        });
        hits.truncate(SEARCH_LIMIT);
        Ok(hits)
    }

    async fn set_pinned(&self, id: Uuid, pinned: bool) -> Result<(), StoreError> {
        self.update(id, |n| n.is_pinned = pinned)
    }

    async fn archive(&self, id: Uuid) -> Result<(), StoreError> {
        self.update(id, |n| n.is_archived = true)
    }

    async fn delete_note(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.notes.remove(&id);
        inner.links.retain(|l| l.note_id != id);
        Ok(())
    }

    async fn delete_notes(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for id in ids {
            inner.notes.remove(id);
        }
        inner.links.retain(|l| !ids.contains(&l.note_id));
        Ok(())
    }

    async fn find_tag(&self, name: &str) -> Result<Option<Tag>, StoreError> {
        let mut inner = self.lock();
        inner.tag_lookups.push(name.to_string());
        if inner.failing_tags.contains(name) {
            return Err(StoreError::Request(format!("lookup of '{}' failed", name)));
        }
        Ok(inner.tags.iter().find(|t| t.name == name).cloned())
    }

    async fn insert_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let tag = Tag {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.lock().tags.push(tag.clone());
        Ok(tag)
    }

    async fn upsert_note_tag(&self, link: NoteTag) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.links.contains(&link) {
            inner.links.push(link);
        }
        Ok(())
    }
}
