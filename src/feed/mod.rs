//! The note feed: one keyed copy of every note, patched by remote changes and
//! optimistic local mutations.

pub mod merge;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::note::Note;
use crate::error::StoreError;
use crate::store::NoteStore;

/// A row-level change observed on the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Upsert(Note),
    Delete(Uuid),
}

/// Handle for an optimistic mutation awaiting the store's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingMutation(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Pinned,
    Archived,
}

impl Field {
    fn get(self, note: &Note) -> bool {
        match self {
            Field::Pinned => note.is_pinned,
            Field::Archived => note.is_archived,
        }
    }

    fn set(self, note: &mut Note, value: bool) {
        match self {
            Field::Pinned => note.is_pinned = value,
            Field::Archived => note.is_archived = value,
        }
    }
}

#[derive(Debug, Clone)]
struct Pending {
    note_id: Uuid,
    field: Field,
    value: bool,
    /// Value to restore on rollback; follows remote rows that arrive meanwhile.
    previous: bool,
    at: DateTime<Utc>,
    /// A newer remote row took over the field; rollback leaves it alone.
    superseded: bool,
}

/// Keyed feed state. Every view (feed, bookmarks, tag filter) reads from here.
#[derive(Debug, Default)]
pub struct FeedState {
    notes: HashMap<Uuid, Note>,
    pending: HashMap<u64, Pending>,
    next_token: u64,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with a fresh snapshot, keeping pending mutations.
    pub fn load(&mut self, snapshot: Vec<Note>) {
        self.notes.clear();
        for note in snapshot {
            self.upsert(note);
        }
    }

    pub fn apply_remote(&mut self, change: ChangeEvent) {
        match change {
            ChangeEvent::Upsert(note) => self.upsert(note),
            ChangeEvent::Delete(id) => {
                self.notes.remove(&id);
                self.pending.retain(|_, p| p.note_id != id);
            }
        }
    }

    pub fn pin(&mut self, id: Uuid) -> Option<PendingMutation> {
        self.mutate(id, Field::Pinned, true)
    }

    pub fn unpin(&mut self, id: Uuid) -> Option<PendingMutation> {
        self.mutate(id, Field::Pinned, false)
    }

    pub fn archive(&mut self, id: Uuid) -> Option<PendingMutation> {
        self.mutate(id, Field::Archived, true)
    }

    /// The store accepted the mutation.
    pub fn confirm(&mut self, token: PendingMutation) -> bool {
        self.pending.remove(&token.0).is_some()
    }

    /// The store rejected the mutation: put the field back.
    pub fn rollback(&mut self, token: PendingMutation) -> bool {
        let Some(p) = self.pending.remove(&token.0) else {
            return false;
        };
        if !p.superseded {
            if let Some(note) = self.notes.get_mut(&p.note_id) {
                p.field.set(note, p.previous);
            }
        }
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Note> {
        self.notes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Non-archived, non-expired notes, pinned first, then newest first.
    pub fn visible(&self, now: DateTime<Utc>, tag_filter: Option<&str>) -> Vec<&Note> {
        let mut notes: Vec<&Note> = self
            .notes
            .values()
            .filter(|n| !n.is_archived && !n.is_expired(now))
            .filter(|n| tag_filter.is_none_or(|t| n.has_tag(t)))
            .collect();
        notes.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.created_at.cmp(&a.created_at))
                .then(a.id.cmp(&b.id))
        });
        notes
    }

    /// Visible pinned notes.
    pub fn bookmarks(&self, now: DateTime<Utc>) -> Vec<&Note> {
        self.visible(now, None)
            .into_iter()
            .filter(|n| n.is_pinned)
            .collect()
    }

    /// Every tag name on a visible note, sorted.
    pub fn tag_names(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut names: Vec<String> = self
            .visible(now, None)
            .into_iter()
            .flat_map(|n| n.tags.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn mutate(&mut self, id: Uuid, field: Field, value: bool) -> Option<PendingMutation> {
        let note = self.notes.get_mut(&id)?;
        let previous = field.get(note);
        field.set(note, value);

        self.next_token += 1;
        let token = self.next_token;
        self.pending.insert(
            token,
            Pending {
                note_id: id,
                field,
                value,
                previous,
                at: Utc::now(),
                superseded: false,
            },
        );
        Some(PendingMutation(token))
    }

    fn upsert(&mut self, mut note: Note) {
        // Oldest mutation first so the latest local value wins.
        let mut pending: Vec<&mut Pending> = self
            .pending
            .values_mut()
            .filter(|p| p.note_id == note.id && !p.superseded)
            .collect();
        pending.sort_by_key(|p| p.at);

        for p in pending {
            let remote = p.field.get(&note);
            if note.updated_at > p.at {
                log::debug!("Remote row for {} overrides pending {:?}", note.id, p.field);
                p.superseded = true;
            } else {
                p.previous = remote;
                p.field.set(&mut note, p.value);
            }
        }
        self.notes.insert(note.id, note);
    }

    /// Optimistically pin or unpin, then persist. Rolls back on failure.
    pub async fn set_pinned<S: NoteStore>(
        &mut self,
        store: &S,
        id: Uuid,
        pinned: bool,
    ) -> Result<(), StoreError> {
        let token = if pinned { self.pin(id) } else { self.unpin(id) };
        let result = store.set_pinned(id, pinned).await;
        self.settle(token, &result);
        result
    }

    /// Optimistically archive, then persist. Rolls back on failure.
    pub async fn archive_note<S: NoteStore>(&mut self, store: &S, id: Uuid) -> Result<(), StoreError> {
        let token = self.archive(id);
        let result = store.archive(id).await;
        self.settle(token, &result);
        result
    }

    pub async fn delete_note<S: NoteStore>(&mut self, store: &S, id: Uuid) -> Result<(), StoreError> {
        store.delete_note(id).await?;
        self.apply_remote(ChangeEvent::Delete(id));
        Ok(())
    }

    fn settle(&mut self, token: Option<PendingMutation>, result: &Result<(), StoreError>) {
        let Some(token) = token else {
            return;
        };
        match result {
            Ok(()) => {
                self.confirm(token);
            }
            Err(e) => {
                log::warn!("Rolling back local change: {}", e);
                self.rollback(token);
            }
        }
    }
}

/// Polls the feed and forwards the difference from the last poll until
/// dropped. Notes that vanish from the feed (deleted or archived elsewhere)
/// arrive as `Delete`; new rows and any changed field or tag as `Upsert`.
pub struct FeedWatcher {
    handle: JoinHandle<()>,
}

impl FeedWatcher {
    /// Start watching. `known` is the snapshot the caller already shows.
    pub fn spawn<S: NoteStore>(
        store: Arc<S>,
        known: Vec<Note>,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move {
            let mut seen: HashMap<Uuid, Note> = known.into_iter().map(|n| (n.id, n)).collect();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let fresh = match store.list_feed().await {
                    Ok(rows) => rows,
                    Err(e) => {
                        log::warn!("Feed poll failed: {}", e);
                        continue;
                    }
                };
                let changes = diff(&seen, &fresh);
                if !changes.is_empty() {
                    log::debug!("Feed poll: {} change(s)", changes.len());
                }
                seen = fresh.into_iter().map(|n| (n.id, n)).collect();
                for change in changes {
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
            }
        });
        (Self { handle }, rx)
    }
}

/// Events that turn `seen` into `fresh`: upserts in feed order, then deletes.
fn diff(seen: &HashMap<Uuid, Note>, fresh: &[Note]) -> Vec<ChangeEvent> {
    let mut changes: Vec<ChangeEvent> = fresh
        .iter()
        .filter(|n| seen.get(&n.id) != Some(*n))
        .cloned()
        .map(ChangeEvent::Upsert)
        .collect();
    let mut gone: Vec<Uuid> = seen
        .keys()
        .filter(|id| !fresh.iter().any(|n| n.id == **id))
        .copied()
        .collect();
    gone.sort();
    changes.extend(gone.into_iter().map(ChangeEvent::Delete));
    changes
}

impl Drop for FeedWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
