//! Note models and DTOs
//!
//! A note is free markdown text referencing entries through
//! `[[type:value|alias]]` links. Its relations and access vector are derived
//! asynchronously after the note row is committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::access::AccessVector;
use crate::entries::{Entry, EntryClass};

// ============================================================================
// Core Enums
// ============================================================================

/// Processing status of a note
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoteStatus {
    /// Committed, deferred stages pending
    #[default]
    Processing,
    /// Every stage completed
    Healthy,
    /// A deferred stage failed after retries; see `status_cause`
    Warning,
    /// Rejected before commit; never stored
    Invalid,
}

impl NoteStatus {
    /// One-directional transitions. Edits re-enter `Processing` through a new commit.
    pub fn can_transition_to(&self, next: NoteStatus) -> bool {
        matches!(
            (self, next),
            (Self::Processing, Self::Healthy) | (Self::Processing, Self::Warning)
        )
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

impl FromStr for NoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "processing" => Ok(Self::Processing),
            "healthy" => Ok(Self::Healthy),
            "warning" => Ok(Self::Warning),
            "invalid" => Ok(Self::Invalid),
            _ => Err(format!("Unknown note status: {}", s)),
        }
    }
}

// ============================================================================
// Note
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: Uuid,
    pub author: Uuid,
    pub content: String,
    /// Bumped by every commit; deferred work is tied to the revision it was scheduled for
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: NoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_cause: Option<String>,
    pub access_vector: AccessVector,
    /// Referenced entries
    #[serde(default)]
    pub entries: BTreeSet<Uuid>,
    /// Linked stored files
    #[serde(default)]
    pub files: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Note {
    pub fn new(id: Uuid, author: Uuid, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            author,
            content: content.into(),
            revision: 0,
            title: None,
            description: None,
            status: NoteStatus::Processing,
            status_cause: None,
            access_vector: AccessVector::sentinel(),
            entries: BTreeSet::new(),
            files: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Edge between two entries mentioned together in a note
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub id: Uuid,
    pub note_id: Uuid,
    /// Smaller entry id
    pub src: Uuid,
    /// Larger entry id
    pub dst: Uuid,
    pub access_vector: AccessVector,
}

impl Relation {
    /// Endpoints are ordered; the id is stable for a given (note, src, dst).
    pub fn new(note_id: Uuid, a: Uuid, b: Uuid, access_vector: AccessVector) -> Self {
        let (src, dst) = if a <= b { (a, b) } else { (b, a) };
        let name = format!("{}:{}", src, dst);
        Self {
            id: Uuid::new_v5(&note_id, name.as_bytes()),
            note_id,
            src,
            dst,
            access_vector,
        }
    }

    pub fn touches(&self, entry_id: Uuid) -> bool {
        self.src == entry_id || self.dst == entry_id
    }
}

/// File known to the (external) file storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredFile {
    pub id: Uuid,
    /// Location as referenced from note text
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            location: location.into(),
            mime_type: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Request / commit DTOs
// ============================================================================

/// Request to create a note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub content: String,
}

/// Request to replace a note's content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditNoteRequest {
    pub note_id: Uuid,
    pub content: String,
}

/// Everything written by the pre-commit phase, applied atomically
#[derive(Debug, Clone)]
pub struct NoteCommit {
    pub note: Note,
    /// Referenced classes; get-or-create
    pub classes: Vec<EntryClass>,
    /// Referenced entries; get-or-create by `(class_key, name)`
    pub entries: Vec<Entry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            NoteStatus::Processing,
            NoteStatus::Healthy,
            NoteStatus::Warning,
            NoteStatus::Invalid,
        ] {
            assert_eq!(status.to_string().parse::<NoteStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(serde_json::from_str::<NoteStatus>(&json).unwrap(), status);
        }
    }

    #[test]
    fn test_status_transitions_are_one_directional() {
        assert!(NoteStatus::Processing.can_transition_to(NoteStatus::Healthy));
        assert!(NoteStatus::Processing.can_transition_to(NoteStatus::Warning));
        assert!(!NoteStatus::Healthy.can_transition_to(NoteStatus::Processing));
        assert!(!NoteStatus::Warning.can_transition_to(NoteStatus::Healthy));
        assert!(!NoteStatus::Processing.can_transition_to(NoteStatus::Invalid));
    }

    #[test]
    fn test_relation_endpoints_ordered_and_id_stable() {
        let note = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let r1 = Relation::new(note, a, b, AccessVector::empty());
        let r2 = Relation::new(note, b, a, AccessVector::empty());
        assert!(r1.src <= r1.dst);
        assert_eq!(r1.id, r2.id);
        assert!(r1.touches(a) && r1.touches(b));
    }

    #[test]
    fn test_new_note_defaults() {
        let note = Note::new(Uuid::new_v4(), Uuid::new_v4(), "text");
        assert_eq!(note.status, NoteStatus::Processing);
        assert_eq!(note.access_vector, AccessVector::sentinel());
        assert_eq!(note.revision, 0);
        assert!(note.completed_at.is_none());
    }
}
