//! Smart merge: ask the analyzer whether recent notes overlap, then fold them
//! into one.

use std::collections::HashSet;

use crate::ai::Analyzer;
use crate::core::analysis::{MergeCandidate, MergeSuggestion};
use crate::core::markup;
use crate::core::note::{Note, NoteMetadata, NoteWrite, OptionalColumn};
use crate::error::MergeError;
use crate::store::NoteStore;

/// How many of the newest notes are offered for merging.
pub const MERGE_WINDOW: usize = 10;

/// Candidates for a merge check: the newest non-archived notes.
pub fn candidates(notes: &[Note]) -> Vec<MergeCandidate> {
    let mut recent: Vec<&Note> = notes.iter().filter(|n| !n.is_archived).collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent
        .into_iter()
        .take(MERGE_WINDOW)
        .map(MergeCandidate::from_note)
        .collect()
}

/// Ask for a merge over the recent notes. Returns `None` unless the answer is
/// actionable once ids outside the candidate set are dropped.
pub async fn suggest<A: Analyzer>(
    analyzer: &A,
    notes: &[Note],
) -> Result<Option<MergeSuggestion>, MergeError> {
    let candidates = candidates(notes);
    if candidates.len() < 2 {
        return Ok(None);
    }

    let mut suggestion = analyzer.suggest_merge(&candidates).await?;
    let before = suggestion.note_ids.len();
    suggestion
        .note_ids
        .retain(|id| candidates.iter().any(|c| c.id == *id));
    let mut named = HashSet::new();
    suggestion.note_ids.retain(|id| named.insert(*id));
    if suggestion.note_ids.len() != before {
        log::warn!(
            "Merge suggestion named {} unknown or repeated note id(s)",
            before - suggestion.note_ids.len()
        );
    }

    Ok(Some(suggestion).filter(MergeSuggestion::is_actionable))
}

/// Insert the merged note, then delete the originals.
///
/// If the delete fails the merged note stays; the originals are left for the
/// user to clean up.
pub async fn execute<S: NoteStore>(
    store: &S,
    suggestion: &MergeSuggestion,
) -> Result<Note, MergeError> {
    if !suggestion.is_actionable() {
        return Err(MergeError::NotActionable);
    }
    let content = suggestion.merged_content.as_deref().unwrap_or_default();

    let user_id = store.current_user().await?;
    let mut write = NoteWrite::full(
        None,
        user_id,
        markup::plain_to_html(content),
        suggestion.merged_title.clone(),
        None,
        &NoteMetadata::default(),
    );
    for column in [
        OptionalColumn::Mood,
        OptionalColumn::ExpiresAt,
        OptionalColumn::LockedUntil,
    ] {
        write.omit(column);
    }

    let merged = store.insert_note(&write).await?;
    if let Err(e) = store.delete_notes(&suggestion.note_ids).await {
        log::error!("Merged into {} but failed to delete originals: {}", merged.id, e);
        return Err(e.into());
    }
    log::info!(
        "Merged {} notes into {}",
        suggestion.note_ids.len(),
        merged.id
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::OfflineAnalyzer;
    use crate::capture::testing::ScriptedAnalyzer;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn titled(title: &str, content: &str, minutes_ago: i64) -> Note {
        let mut n = Note::new(Uuid::nil(), content);
        n.title = Some(title.into());
        n.created_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        n
    }

    #[test]
    fn only_the_newest_ten_are_candidates() {
        let notes: Vec<Note> = (0..15).map(|i| titled("t", "<p>x</p>", i)).collect();
        let picked = candidates(&notes);
        assert_eq!(picked.len(), MERGE_WINDOW);
        assert_eq!(picked[0].id, notes[0].id);
        assert!(picked.iter().all(|c| notes[..10].iter().any(|n| n.id == c.id)));
    }

    #[tokio::test]
    async fn suggest_needs_at_least_two_notes() {
        let one = vec![titled("Groceries", "<p>milk</p>", 1)];
        assert_eq!(suggest(&OfflineAnalyzer, &one).await, Ok(None));
    }

    #[tokio::test]
    async fn suggest_and_execute_fold_duplicates() {
        let store = MemoryStore::with_user(Uuid::nil());
        let a = titled("Groceries", "<p>milk</p>", 1);
        let b = titled("groceries", "<p>eggs</p>", 2);
        let c = titled("Work", "<p>report</p>", 3);
        for n in [&a, &b, &c] {
            store.insert_raw(n.clone());
        }

        let notes = store.list_feed().await.unwrap();
        let suggestion = suggest(&OfflineAnalyzer, &notes).await.unwrap().unwrap();
        assert_eq!(suggestion.note_ids, vec![a.id, b.id]);

        let merged = execute(&store, &suggestion).await.unwrap();
        assert_eq!(merged.content, "<p>milk<br>eggs</p>");
        assert_eq!(merged.title.as_deref(), Some("Groceries"));

        let left: Vec<Uuid> = store.list_feed().await.unwrap().iter().map(|n| n.id).collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&merged.id));
        assert!(left.contains(&c.id));
    }

    #[tokio::test]
    async fn repeated_ids_are_folded_once() {
        let a = titled("Groceries", "<p>milk</p>", 1);
        let b = titled("Shopping", "<p>eggs</p>", 2);
        let analyzer = ScriptedAnalyzer::tags("", &[]).with_merge(MergeSuggestion {
            should_merge: true,
            note_ids: vec![a.id, b.id, a.id],
            merged_title: Some("Groceries".into()),
            merged_content: Some("milk\neggs".into()),
        });

        let suggestion = suggest(&analyzer, &[a.clone(), b.clone()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(suggestion.note_ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn execute_rejects_single_note_suggestions() {
        let store = MemoryStore::with_user(Uuid::nil());
        let suggestion = MergeSuggestion {
            should_merge: true,
            note_ids: vec![Uuid::new_v4()],
            merged_title: None,
            merged_content: Some("x".into()),
        };
        assert_eq!(
            execute(&store, &suggestion).await,
            Err(MergeError::NotActionable)
        );
        assert!(store.notes().is_empty());
    }

    #[tokio::test]
    async fn execute_requires_a_user() {
        let store = MemoryStore::new();
        let suggestion = MergeSuggestion {
            should_merge: true,
            note_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            merged_title: None,
            merged_content: Some("x".into()),
        };
        assert_eq!(
            execute(&store, &suggestion).await,
            Err(MergeError::Store(StoreError::Unauthenticated))
        );
    }
}
