pub mod memory;
pub mod supabase;

use std::future::Future;

use uuid::Uuid;

use crate::core::note::{Note, NoteWrite};
use crate::core::tag::{NoteTag, Tag};
use crate::error::StoreError;

pub use memory::MemoryStore;

pub const SEARCH_LIMIT: usize = 20;
pub use supabase::SupabaseClient;

/// Row access to `notes`, `tags` and `note_tags`.
///
/// Implementations are handed to the components that need them; there is no
/// process-wide client.
pub trait NoteStore: Send + Sync + 'static {
    /// The signed-in principal, or [`StoreError::Unauthenticated`].
    fn current_user(&self) -> impl Future<Output = Result<Uuid, StoreError>> + Send;

    /// Insert (no id) or update (id present) a note and return the stored row.
    fn upsert_note(
        &self,
        write: &NoteWrite,
    ) -> impl Future<Output = Result<Note, StoreError>> + Send;

    /// Plain insert; the store assigns the id unless the write carries one.
    fn insert_note(
        &self,
        write: &NoteWrite,
    ) -> impl Future<Output = Result<Note, StoreError>> + Send;

    /// A single note with its tag names.
    fn get_note(&self, id: Uuid) -> impl Future<Output = Result<Note, StoreError>> + Send;

    /// Non-archived notes, pinned first, newest first.
    fn list_feed(&self) -> impl Future<Output = Result<Vec<Note>, StoreError>> + Send;

    /// Pinned, non-archived notes.
    fn list_pinned(&self) -> impl Future<Output = Result<Vec<Note>, StoreError>> + Send;

    /// Case-insensitive substring match on title or content, at most
    /// [`SEARCH_LIMIT`] rows.
    fn search(&self, query: &str) -> impl Future<Output = Result<Vec<Note>, StoreError>> + Send;

    fn set_pinned(
        &self,
        id: Uuid,
        pinned: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn archive(&self, id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_note(&self, id: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_notes(&self, ids: &[Uuid]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Exact (case-sensitive) tag lookup.
    fn find_tag(&self, name: &str)
    -> impl Future<Output = Result<Option<Tag>, StoreError>> + Send;

    fn insert_tag(&self, name: &str) -> impl Future<Output = Result<Tag, StoreError>> + Send;

    /// Idempotent: an existing (note, tag) pair is left alone.
    fn upsert_note_tag(
        &self,
        link: NoteTag,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
