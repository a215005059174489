//! Note ingestion entry point
//!
//! Runs the pre-commit stages against a prefetched view of the store,
//! commits the note with everything they resolved in one batch, then hands
//! the deferred units to the [`WorkQueue`] as one ordered chain.
//!
//! The committed access vector already covers every resolved entry, so a
//! note is never readable more widely while it is processing than after.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::WorkQueue;
use super::stages::{default_stages, KnownEntries, NoteDraft, Stage};
use super::units::WorkUnit;
use crate::access::{AccessVector, Principal};
use crate::entries::Entry;
use crate::error::{IngestError, IngestResult};
use crate::events::{EntityType, EventEmitter};
use crate::linker::collect_links;
use crate::notes::{CreateNoteRequest, EditNoteRequest, Note, NoteCommit};
use crate::store::KnowledgeStore;
use crate::IngestConfig;

pub struct NoteIngestor {
    store: Arc<dyn KnowledgeStore>,
    queue: Arc<WorkQueue>,
    stages: Vec<Box<dyn Stage>>,
    events: Arc<dyn EventEmitter>,
}

impl NoteIngestor {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        queue: Arc<WorkQueue>,
        events: Arc<dyn EventEmitter>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            store,
            queue,
            stages: default_stages(config),
            events,
        }
    }

    /// Ingest a new note. On error nothing is stored.
    pub async fn create_note(
        &self,
        author: &Principal,
        request: CreateNoteRequest,
    ) -> IngestResult<Note> {
        let note = Note::new(Uuid::new_v4(), author.id, request.content);
        self.ingest(author, note).await
    }

    /// Re-ingest an existing note with new content
    pub async fn edit_note(
        &self,
        author: &Principal,
        request: EditNoteRequest,
    ) -> IngestResult<Note> {
        let existing = self
            .store
            .get_note(request.note_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("note {}", request.note_id)))?;

        if !author.can_write(&existing.access_vector) {
            return Err(IngestError::Forbidden {
                key: "note".into(),
                value: existing.id.to_string(),
            });
        }

        let mut note = Note::new(existing.id, existing.author, request.content);
        note.revision = existing.revision + 1;
        // Old references stay guarded until finalize recomputes the vector
        note.access_vector = existing.access_vector;
        note.title = existing.title;
        note.description = existing.description;
        self.ingest(author, note).await
    }

    async fn ingest(&self, author: &Principal, mut note: Note) -> IngestResult<Note> {
        let draft = NoteDraft {
            note_id: note.id,
            revision: note.revision,
            author: author.clone(),
            links: collect_links(&note.content),
            content: note.content.clone(),
        };

        let (units, known) = match self.run_stages(&draft).await {
            Ok(result) => result,
            Err(err) => {
                warn!(note_id = %draft.note_id, error = %err, "Note rejected");
                return Err(err);
            }
        };

        let entries = known.entries_for(&draft.links);
        let pending = pending_vector(&entries);
        note.access_vector = if note.revision == 0 {
            pending
        } else {
            note.access_vector | pending
        };

        let committed = self
            .store
            .commit_note(NoteCommit {
                note,
                classes: known.classes_for(&draft.links),
                entries,
            })
            .await?;

        info!(
            note_id = %committed.id,
            revision = committed.revision,
            entries = committed.entries.len(),
            units = units.len(),
            "Note committed"
        );
        self.events.emit_created(
            EntityType::Note,
            committed.id.to_string(),
            serde_json::json!({ "status": committed.status, "entries": committed.entries }),
        );

        self.queue.submit(units).await?;
        Ok(committed)
    }

    async fn run_stages(&self, draft: &NoteDraft) -> IngestResult<(Vec<WorkUnit>, KnownEntries)> {
        let mut known = self.prefetch(draft).await?;
        let mut units = Vec::new();
        for stage in &self.stages {
            let output = stage.run(draft, known)?;
            debug!(note_id = %draft.note_id, stage = stage.name(), "Stage passed");
            units.extend(output.unit);
            known = output.known;
        }
        Ok((units, known))
    }

    /// Classes and entries the draft links to that already exist
    async fn prefetch(&self, draft: &NoteDraft) -> IngestResult<KnownEntries> {
        let mut known = KnownEntries::default();
        for link in &draft.links {
            if !known.classes.contains_key(&link.key) {
                if let Some(class) = self.store.get_entry_class(&link.key).await? {
                    known.classes.insert(class.key.clone(), class);
                }
            }
            if let Some(entry) = self.store.find_entry(&link.key, &link.value).await? {
                known.entries.insert(entry.identity(), entry);
            }
        }
        Ok(known)
    }
}

/// Vector a note carries from commit until finalize
fn pending_vector(entries: &[Entry]) -> AccessVector {
    // A restricted entry without an offset has no bit to test yet
    if entries
        .iter()
        .any(|e| e.is_restricted() && e.acvec_offset == 0)
    {
        return AccessVector::full();
    }
    AccessVector::composite(entries.iter().map(|e| e.acvec_offset))
}
