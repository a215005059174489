//! In-memory implementation of KnowledgeStore.
//!
//! Every table sits behind one `tokio::sync::RwLock`, so each trait call is
//! a single atomic transaction: commits, get-or-create and offset assignment
//! are serialized against each other.

use crate::access::AccessVector;
use crate::entries::{Entry, EntryClass};
use crate::notes::{Note, NoteCommit, NoteStatus, Relation, StoredFile};
use crate::store::traits::KnowledgeStore;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    classes: HashMap<String, EntryClass>,
    entries: HashMap<Uuid, Entry>,
    entry_index: HashMap<(String, String), Uuid>,
    notes: HashMap<Uuid, Note>,
    relations: HashMap<Uuid, Relation>,
    note_relations: HashMap<Uuid, Vec<Uuid>>,
    files: HashMap<Uuid, StoredFile>,
    file_index: HashMap<String, Uuid>,
}

impl Tables {
    fn get_or_create_class(&mut self, class: EntryClass) -> EntryClass {
        self.classes
            .entry(class.key.clone())
            .or_insert(class)
            .clone()
    }

    fn get_or_create_entry(&mut self, entry: Entry) -> Entry {
        let identity = entry.identity();
        if let Some(existing) = self
            .entry_index
            .get(&identity)
            .and_then(|id| self.entries.get(id))
        {
            return existing.clone();
        }
        self.entry_index.insert(identity, entry.id);
        self.entries.insert(entry.id, entry.clone());
        entry
    }

    fn note_mut(&mut self, id: Uuid) -> Result<&mut Note> {
        self.notes
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Note not found: {}", id))
    }

    fn entry_mut(&mut self, id: Uuid) -> Result<&mut Entry> {
        self.entries
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Entry not found: {}", id))
    }
}

/// In-memory knowledge store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    // ========================================================================
    // Entry class operations
    // ========================================================================

    async fn get_entry_class(&self, key: &str) -> Result<Option<EntryClass>> {
        Ok(self.tables.read().await.classes.get(key).cloned())
    }

    async fn get_or_create_entry_class(&self, class: EntryClass) -> Result<EntryClass> {
        Ok(self.tables.write().await.get_or_create_class(class))
    }

    async fn list_entry_classes(&self) -> Result<Vec<EntryClass>> {
        let tables = self.tables.read().await;
        let mut classes: Vec<EntryClass> = tables.classes.values().cloned().collect();
        classes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(classes)
    }

    async fn rename_entry_class(&self, old_key: &str, new_key: &str) -> Result<usize> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        if tables.classes.contains_key(new_key) {
            bail!("Entry class already exists: {}", new_key);
        }
        let mut class = tables
            .classes
            .remove(old_key)
            .ok_or_else(|| anyhow!("Entry class not found: {}", old_key))?;
        class.key = new_key.to_string();
        class.updated_at = Utc::now();
        tables.classes.insert(new_key.to_string(), class);

        let moved: Vec<Uuid> = tables
            .entries
            .values()
            .filter(|e| e.class_key == old_key)
            .map(|e| e.id)
            .collect();
        for id in &moved {
            if let Some(entry) = tables.entries.get_mut(id) {
                let old_identity = entry.identity();
                entry.class_key = new_key.to_string();
                let new_identity = entry.identity();
                tables.entry_index.remove(&old_identity);
                tables.entry_index.insert(new_identity, *id);
            }
        }
        Ok(moved.len())
    }

    // ========================================================================
    // Entry operations
    // ========================================================================

    async fn get_entry(&self, id: Uuid) -> Result<Option<Entry>> {
        Ok(self.tables.read().await.entries.get(&id).cloned())
    }

    async fn find_entry(&self, class_key: &str, name: &str) -> Result<Option<Entry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .entry_index
            .get(&(class_key.to_string(), name.to_string()))
            .and_then(|id| tables.entries.get(id))
            .cloned())
    }

    async fn get_or_create_entry(&self, entry: Entry) -> Result<Entry> {
        let mut tables = self.tables.write().await;
        if !tables.classes.contains_key(&entry.class_key) {
            bail!("Entry class not found: {}", entry.class_key);
        }
        Ok(tables.get_or_create_entry(entry))
    }

    async fn list_entries(&self) -> Result<Vec<Entry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<Entry> = tables.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.identity().cmp(&b.identity()));
        Ok(entries)
    }

    async fn assign_acvec_offset(&self, entry_id: Uuid, max_offset: u32) -> Result<Option<u32>> {
        let mut tables = self.tables.write().await;
        let current = tables.entry_mut(entry_id)?.acvec_offset;
        if current != 0 {
            return Ok(Some(current));
        }

        let used: BTreeSet<u32> = tables
            .entries
            .values()
            .map(|e| e.acvec_offset)
            .filter(|o| *o != 0)
            .collect();
        let Some(offset) = (1..=max_offset).find(|o| !used.contains(o)) else {
            return Ok(None);
        };

        tables.entry_mut(entry_id)?.acvec_offset = offset;
        Ok(Some(offset))
    }

    async fn make_entry_public(&self, entry_id: Uuid) -> Result<u32> {
        let mut tables = self.tables.write().await;
        let entry = tables.entry_mut(entry_id)?;
        let released = entry.acvec_offset;
        entry.is_public = true;
        entry.acvec_offset = 0;
        Ok(released)
    }

    async fn add_entry_aliases(&self, entry_id: Uuid, aliases: Vec<String>) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.entry_mut(entry_id)?.aliases.extend(aliases);
        Ok(())
    }

    // ========================================================================
    // Note operations
    // ========================================================================

    async fn commit_note(&self, commit: NoteCommit) -> Result<Note> {
        let mut tables = self.tables.write().await;

        // Validate before writing anything so a failed commit leaves no trace
        let expected = tables
            .notes
            .get(&commit.note.id)
            .map_or(0, |existing| existing.revision + 1);
        if commit.note.revision != expected {
            bail!(
                "Note {} was modified concurrently: revision {} expected, got {}",
                commit.note.id,
                expected,
                commit.note.revision
            );
        }
        for entry in &commit.entries {
            let known = tables.classes.contains_key(&entry.class_key)
                || commit.classes.iter().any(|c| c.key == entry.class_key);
            if !known {
                bail!("Entry class not found: {}", entry.class_key);
            }
        }
        for class in commit.classes {
            tables.get_or_create_class(class);
        }

        let mut note = commit.note;
        note.entries = commit
            .entries
            .into_iter()
            .map(|entry| tables.get_or_create_entry(entry).id)
            .collect();
        note.updated_at = Utc::now();

        if let Some(existing) = tables.notes.get(&note.id) {
            note.created_at = existing.created_at;
            note.files = existing.files.clone();
        }
        tables.notes.insert(note.id, note.clone());
        Ok(note)
    }

    async fn get_note(&self, id: Uuid) -> Result<Option<Note>> {
        Ok(self.tables.read().await.notes.get(&id).cloned())
    }

    async fn list_notes(&self) -> Result<Vec<Note>> {
        let tables = self.tables.read().await;
        let mut notes: Vec<Note> = tables.notes.values().cloned().collect();
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(notes)
    }

    async fn update_note_status(
        &self,
        id: Uuid,
        status: NoteStatus,
        cause: Option<String>,
        revision: Option<u64>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let note = tables.note_mut(id)?;
        if revision.is_some_and(|r| r != note.revision) || !note.status.can_transition_to(status) {
            return Ok(false);
        }
        note.status = status;
        note.status_cause = cause;
        note.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_note_metadata(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let note = tables.note_mut(id)?;
        note.title = title;
        note.description = description;
        note.updated_at = Utc::now();
        Ok(())
    }

    async fn update_note_content(&self, id: Uuid, content: String) -> Result<()> {
        let mut tables = self.tables.write().await;
        let note = tables.note_mut(id)?;
        note.content = content;
        note.updated_at = Utc::now();
        Ok(())
    }

    async fn finalize_note(
        &self,
        id: Uuid,
        revision: u64,
        access_vector: AccessVector,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let note = tables.note_mut(id)?;
        if note.revision != revision || !note.status.can_transition_to(NoteStatus::Healthy) {
            return Ok(false);
        }
        let now = Utc::now();
        note.access_vector = access_vector;
        note.status = NoteStatus::Healthy;
        note.status_cause = None;
        note.completed_at = Some(now);
        note.updated_at = now;
        Ok(true)
    }

    async fn set_note_access_vector(&self, id: Uuid, access_vector: AccessVector) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.note_mut(id)?.access_vector = access_vector;
        Ok(())
    }

    async fn notes_referencing(&self, entry_id: Uuid) -> Result<Vec<Note>> {
        let tables = self.tables.read().await;
        Ok(tables
            .notes
            .values()
            .filter(|n| n.entries.contains(&entry_id))
            .cloned()
            .collect())
    }

    // ========================================================================
    // Relation operations
    // ========================================================================

    async fn replace_note_relations(&self, note_id: Uuid, relations: Vec<Relation>) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.notes.contains_key(&note_id) {
            bail!("Note not found: {}", note_id);
        }
        if let Some(foreign) = relations.iter().find(|r| r.note_id != note_id) {
            bail!(
                "Relation {} belongs to note {}, not {}",
                foreign.id,
                foreign.note_id,
                note_id
            );
        }

        if let Some(old) = tables.note_relations.remove(&note_id) {
            for id in old {
                tables.relations.remove(&id);
            }
        }
        let mut ids = Vec::with_capacity(relations.len());
        for relation in relations {
            if tables.relations.insert(relation.id, relation.clone()).is_none() {
                ids.push(relation.id);
            }
        }
        tables.note_relations.insert(note_id, ids);
        Ok(())
    }

    async fn list_note_relations(&self, note_id: Uuid) -> Result<Vec<Relation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .note_relations
            .get(&note_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.relations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_relations(&self) -> Result<Vec<Relation>> {
        Ok(self.tables.read().await.relations.values().cloned().collect())
    }

    async fn relations_referencing(&self, entry_id: Uuid) -> Result<Vec<Relation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .relations
            .values()
            .filter(|r| r.touches(entry_id))
            .cloned()
            .collect())
    }

    async fn set_relation_access_vector(
        &self,
        id: Uuid,
        access_vector: AccessVector,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let relation = tables
            .relations
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Relation not found: {}", id))?;
        relation.access_vector = access_vector;
        Ok(())
    }

    // ========================================================================
    // File operations
    // ========================================================================

    async fn register_file(&self, file: StoredFile) -> Result<StoredFile> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .file_index
            .get(&file.location)
            .and_then(|id| tables.files.get(id))
        {
            return Ok(existing.clone());
        }
        tables.file_index.insert(file.location.clone(), file.id);
        tables.files.insert(file.id, file.clone());
        Ok(file)
    }

    async fn find_file(&self, location: &str) -> Result<Option<StoredFile>> {
        let tables = self.tables.read().await;
        Ok(tables
            .file_index
            .get(location)
            .and_then(|id| tables.files.get(id))
            .cloned())
    }

    async fn replace_note_files(&self, note_id: Uuid, file_ids: Vec<Uuid>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let known: Vec<Uuid> = file_ids
            .into_iter()
            .filter(|id| tables.files.contains_key(id))
            .collect();
        tables.note_mut(note_id)?.files = known;
        Ok(())
    }

    async fn list_note_files(&self, note_id: Uuid) -> Result<Vec<StoredFile>> {
        let tables = self.tables.read().await;
        let note = tables
            .notes
            .get(&note_id)
            .ok_or_else(|| anyhow!("Note not found: {}", note_id))?;
        Ok(note
            .files
            .iter()
            .filter_map(|id| tables.files.get(id).cloned())
            .collect())
    }
}
