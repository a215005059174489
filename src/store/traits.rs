//! KnowledgeStore trait definition
//!
//! Persistence primitives the pipeline relies on: atomic note commits,
//! get-or-create for entries and classes, bulk replacement of derived rows,
//! and serialized access-vector offset assignment.

use crate::access::AccessVector;
use crate::entries::{Entry, EntryClass};
use crate::notes::{Note, NoteCommit, NoteStatus, Relation, StoredFile};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Abstract interface for knowledge-base persistence.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    // ========================================================================
    // Entry class operations
    // ========================================================================

    /// Get a class by key
    async fn get_entry_class(&self, key: &str) -> Result<Option<EntryClass>>;

    /// Insert the class unless one with the same key exists; returns the stored one
    async fn get_or_create_entry_class(&self, class: EntryClass) -> Result<EntryClass>;

    /// List all classes
    async fn list_entry_classes(&self) -> Result<Vec<EntryClass>>;

    /// Rename a class and repoint its entries. Returns the number of entries moved.
    async fn rename_entry_class(&self, old_key: &str, new_key: &str) -> Result<usize>;

    // ========================================================================
    // Entry operations
    // ========================================================================

    /// Get an entry by ID
    async fn get_entry(&self, id: Uuid) -> Result<Option<Entry>>;

    /// Find an entry by `(class_key, name)`
    async fn find_entry(&self, class_key: &str, name: &str) -> Result<Option<Entry>>;

    /// Insert the entry unless `(class_key, name)` is taken; returns the stored one
    async fn get_or_create_entry(&self, entry: Entry) -> Result<Entry>;

    /// List all entries
    async fn list_entries(&self) -> Result<Vec<Entry>>;

    /// Give the entry the smallest unused offset in `1..=max_offset`.
    ///
    /// Serialized against concurrent callers. Returns the existing offset when
    /// one is already assigned, `None` when every offset is taken.
    async fn assign_acvec_offset(&self, entry_id: Uuid, max_offset: u32) -> Result<Option<u32>>;

    /// Mark an entry public and release its offset. Returns the released offset.
    async fn make_entry_public(&self, entry_id: Uuid) -> Result<u32>;

    /// Record aliases on an entry
    async fn add_entry_aliases(&self, entry_id: Uuid, aliases: Vec<String>) -> Result<()>;

    // ========================================================================
    // Note operations
    // ========================================================================

    /// Atomically get-or-create the referenced classes and entries and upsert
    /// the note. The stored note's `entries` are the resolved entry ids.
    ///
    /// `note.revision` must be 0 for a new note and the stored revision plus
    /// one for an existing note; anything else is a concurrent edit and fails.
    async fn commit_note(&self, commit: NoteCommit) -> Result<Note>;

    /// Get a note by ID
    async fn get_note(&self, id: Uuid) -> Result<Option<Note>>;

    /// List all notes
    async fn list_notes(&self) -> Result<Vec<Note>>;

    /// Move a note to `status` if [`NoteStatus::can_transition_to`] allows it
    /// and, when given, `revision` is still the stored one. Returns whether
    /// the status changed.
    async fn update_note_status(
        &self,
        id: Uuid,
        status: NoteStatus,
        cause: Option<String>,
        revision: Option<u64>,
    ) -> Result<bool>;

    /// Update inferred title/description
    async fn update_note_metadata(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<()>;

    /// Rewrite note content without re-entering the pipeline
    async fn update_note_content(&self, id: Uuid, content: String) -> Result<()>;

    /// Set the access vector, mark healthy and stamp completion. A no-op
    /// returning `false` when `revision` is stale or the note is not processing.
    async fn finalize_note(
        &self,
        id: Uuid,
        revision: u64,
        access_vector: AccessVector,
    ) -> Result<bool>;

    /// Set the access vector only
    async fn set_note_access_vector(&self, id: Uuid, access_vector: AccessVector) -> Result<()>;

    /// Notes referencing an entry
    async fn notes_referencing(&self, entry_id: Uuid) -> Result<Vec<Note>>;

    // ========================================================================
    // Relation operations
    // ========================================================================

    /// Replace every relation produced by a note with `relations`, atomically.
    /// Every relation must belong to `note_id`; on error the old set is kept.
    async fn replace_note_relations(&self, note_id: Uuid, relations: Vec<Relation>) -> Result<()>;

    /// Relations produced by a note
    async fn list_note_relations(&self, note_id: Uuid) -> Result<Vec<Relation>>;

    /// List all relations
    async fn list_relations(&self) -> Result<Vec<Relation>>;

    /// Relations with the entry as an endpoint
    async fn relations_referencing(&self, entry_id: Uuid) -> Result<Vec<Relation>>;

    /// Set a relation's access vector
    async fn set_relation_access_vector(&self, id: Uuid, access_vector: AccessVector)
        -> Result<()>;

    // ========================================================================
    // File operations
    // ========================================================================

    /// Register a stored file
    async fn register_file(&self, file: StoredFile) -> Result<StoredFile>;

    /// Find a stored file by the location notes reference it with
    async fn find_file(&self, location: &str) -> Result<Option<StoredFile>>;

    /// Replace the files linked to a note
    async fn replace_note_files(&self, note_id: Uuid, file_ids: Vec<Uuid>) -> Result<()>;

    /// Files linked to a note
    async fn list_note_files(&self, note_id: Uuid) -> Result<Vec<StoredFile>>;
}
