use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::markup;

/// A row of the `notes` table, with its tag names flattened in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(
        default,
        rename(deserialize = "note_tags"),
        deserialize_with = "embedded_tag_names",
        skip_serializing
    )]
    pub tags: Vec<String>,
}

/// `note_tags(tags(name))` embeds as `[{ "tags": { "name": "..." } }, ...]`.
fn embedded_tag_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct TagName {
        name: Option<String>,
    }
    #[derive(Deserialize)]
    struct Link {
        tags: Option<TagName>,
    }

    let links: Option<Vec<Link>> = Option::deserialize(deserializer)?;
    Ok(links
        .unwrap_or_default()
        .into_iter()
        .filter_map(|l| l.tags.and_then(|t| t.name))
        .collect())
}

impl Note {
    pub fn new(user_id: Uuid, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: None,
            content: content.into(),
            user_id,
            created_at: now,
            updated_at: now,
            is_pinned: false,
            is_archived: false,
            mood: None,
            expires_at: None,
            locked_until: None,
            summary: None,
            tags: Vec::new(),
        }
    }

    /// Ephemeral notes drop out of the feed once their expiry passes.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    /// Time-capsule notes keep their content hidden until the lock passes.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|t| t > now)
    }

    /// Sanitized markup for display, or `None` while the note is locked.
    pub fn visible_content(&self, now: DateTime<Utc>) -> Option<String> {
        if self.is_locked(now) {
            None
        } else {
            Some(markup::sanitize_html(&self.content))
        }
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => "Untitled",
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Columns a write may drop when the remote schema does not have them yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalColumn {
    Title,
    Summary,
    Mood,
    ExpiresAt,
    LockedUntil,
}

impl OptionalColumn {
    pub const ALL: [OptionalColumn; 5] = [
        Self::Title,
        Self::Summary,
        Self::Mood,
        Self::ExpiresAt,
        Self::LockedUntil,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Summary => "summary",
            Self::Mood => "mood",
            Self::ExpiresAt => "expires_at",
            Self::LockedUntil => "locked_until",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// Caller-supplied extras for a captured note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteMetadata {
    pub mood: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl NoteMetadata {
    /// Expire `hours` after `now`; zero or less clears the expiry. Returns
    /// false and leaves the field alone when the instant is out of range.
    pub fn expire_in_hours(&mut self, now: DateTime<Utc>, hours: i64) -> bool {
        set_offset(&mut self.expires_at, now, hours, TimeDelta::try_hours)
    }

    /// Lock for `days` after `now`; zero or less unlocks.
    pub fn lock_for_days(&mut self, now: DateTime<Utc>, days: i64) -> bool {
        set_offset(&mut self.locked_until, now, days, TimeDelta::try_days)
    }
}

fn set_offset(
    field: &mut Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    n: i64,
    delta: fn(i64) -> Option<TimeDelta>,
) -> bool {
    if n <= 0 {
        *field = None;
        return true;
    }
    match delta(n).and_then(|d| now.checked_add_signed(d)) {
        Some(at) => {
            *field = Some(at);
            true
        }
        None => false,
    }
}

/// Upsert payload for `notes`.
///
/// `content`, `user_id` and `updated_at` are always sent. The optional columns
/// serialize only when present so an omitted column never reaches the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub content: String,
    pub user_id: Uuid,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<Option<DateTime<Utc>>>,
}

impl NoteWrite {
    /// A write carrying the user-controlled optional columns (explicit nulls
    /// included). `summary` is only sent when there is one, so a later save
    /// without fresh analysis does not erase it.
    pub fn full(
        id: Option<Uuid>,
        user_id: Uuid,
        content: impl Into<String>,
        title: Option<String>,
        summary: Option<String>,
        meta: &NoteMetadata,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            user_id,
            updated_at: Utc::now(),
            title: Some(title.filter(|t| !t.trim().is_empty())),
            summary: summary.map(Some),
            mood: Some(meta.mood.clone()),
            expires_at: Some(meta.expires_at),
            locked_until: Some(meta.locked_until),
        }
    }

    /// Drop one optional column. Returns false when it was already absent.
    pub fn omit(&mut self, column: OptionalColumn) -> bool {
        match column {
            OptionalColumn::Title => self.title.take().is_some(),
            OptionalColumn::Summary => self.summary.take().is_some(),
            OptionalColumn::Mood => self.mood.take().is_some(),
            OptionalColumn::ExpiresAt => self.expires_at.take().is_some(),
            OptionalColumn::LockedUntil => self.locked_until.take().is_some(),
        }
    }

    pub fn is_insert(&self) -> bool {
        self.id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decodes_feed_row_with_embedded_tags() {
        let row = serde_json::json!({
            "id": "6f1c1a52-3a43-4a44-8d3e-2f0a8a0b8a01",
            "title": null,
            "content": "<p>Buy milk</p>",
            "user_id": "0b7c2b55-1111-4b9a-9c1e-aaaaaaaaaaaa",
            "created_at": "2026-02-01T10:00:00+00:00",
            "updated_at": "2026-02-01T10:05:00+00:00",
            "is_pinned": true,
            "is_archived": false,
            "note_tags": [
                { "tags": { "name": "groceries" } },
                { "tags": null }
            ]
        });
        let note: Note = serde_json::from_value(row).unwrap();
        assert!(note.is_pinned);
        assert_eq!(note.tags, vec!["groceries"]);
        assert_eq!(note.mood, None);
        assert_eq!(note.display_title(), "Untitled");
    }

    #[test]
    fn write_omits_absent_columns_but_keeps_explicit_nulls() {
        let meta = NoteMetadata::default();
        let mut write = NoteWrite::full(None, Uuid::nil(), "<p>x</p>", None, None, &meta);
        let json = serde_json::to_value(&write).unwrap();
        assert!(json.get("id").is_none());
        assert!(json["mood"].is_null());
        assert!(json.as_object().unwrap().contains_key("mood"));

        assert!(write.omit(OptionalColumn::Mood));
        assert!(!write.omit(OptionalColumn::Mood));
        let json = serde_json::to_value(&write).unwrap();
        assert!(!json.as_object().unwrap().contains_key("mood"));
        assert_eq!(json["content"], "<p>x</p>");
    }

    #[test]
    fn ephemeral_and_capsule_windows() {
        let now = Utc::now();
        let mut note = Note::new(Uuid::nil(), "<p>secret</p>");
        note.expires_at = Some(now - Duration::minutes(1));
        assert!(note.is_expired(now));

        note.locked_until = Some(now + Duration::days(30));
        assert!(note.is_locked(now));
        assert_eq!(note.visible_content(now), None);
        assert_eq!(
            note.visible_content(now + Duration::days(31)).as_deref(),
            Some("<p>secret</p>")
        );
    }

    #[test]
    fn metadata_offsets_reject_out_of_range_values() {
        let now = Utc::now();
        let mut meta = NoteMetadata::default();
        assert!(meta.expire_in_hours(now, 24));
        assert_eq!(meta.expires_at, Some(now + Duration::hours(24)));

        assert!(!meta.expire_in_hours(now, i64::MAX));
        assert!(!meta.lock_for_days(now, 99_999_999_999));
        assert_eq!(meta.expires_at, Some(now + Duration::hours(24)));
        assert_eq!(meta.locked_until, None);

        assert!(meta.lock_for_days(now, 7));
        assert_eq!(meta.locked_until, Some(now + Duration::days(7)));
        assert!(meta.expire_in_hours(now, 0));
        assert_eq!(meta.expires_at, None);
    }

    #[test]
    fn optional_column_names_round_trip() {
        for c in OptionalColumn::ALL {
            assert_eq!(OptionalColumn::from_name(c.as_str()), Some(c));
        }
        assert_eq!(OptionalColumn::from_name("content"), None);
    }
}
