use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row of `tags`. Names are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

/// A row of `note_tags`, unique per (note, tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteTag {
    pub note_id: Uuid,
    pub tag_id: Uuid,
}
