//! Entry and class management outside note ingestion
//!
//! Every operation that moves an access-vector offset schedules a
//! [`WorkUnit::RecomputeAccess`] fan-out instead of rewriting vectors inline.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::models::{Entry, EntryClass, EntryKind};
use crate::access::{AccessEngine, Principal};
use crate::error::{IngestError, IngestResult};
use crate::events::{EntityType, EventEmitter};
use crate::notes::{Note, Relation};
use crate::pipeline::{WorkQueue, WorkUnit};
use crate::store::KnowledgeStore;

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn KnowledgeStore>,
    access: AccessEngine,
    queue: Arc<WorkQueue>,
    events: Arc<dyn EventEmitter>,
}

impl Catalog {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        access: AccessEngine,
        queue: Arc<WorkQueue>,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            store,
            access,
            queue,
            events,
        }
    }

    pub async fn create_entry_class(
        &self,
        key: &str,
        kind: EntryKind,
        description: Option<String>,
    ) -> IngestResult<EntryClass> {
        let key = validate_class_key(key)?;
        if self.store.get_entry_class(&key).await?.is_some() {
            return Err(IngestError::Validation(format!(
                "entry class already exists: {}",
                key
            )));
        }

        let mut class = EntryClass::new(key, kind);
        class.description = description;
        let class = self.store.get_or_create_entry_class(class).await?;

        info!(class = %class.key, kind = %class.kind, "Entry class created");
        self.events.emit_created(
            EntityType::EntryClass,
            class.key.clone(),
            serde_json::json!({ "kind": class.kind }),
        );
        Ok(class)
    }

    /// Create an entry. Restricted entities get their offset right away.
    pub async fn create_entry(
        &self,
        class_key: &str,
        name: &str,
        is_public: bool,
    ) -> IngestResult<Entry> {
        let class_key = class_key.trim().to_lowercase();
        let name = name.trim();
        if name.is_empty() {
            return Err(IngestError::Validation("entry name is empty".into()));
        }
        let class = self
            .store
            .get_entry_class(&class_key)
            .await?
            .ok_or_else(|| IngestError::Reference {
                key: class_key.clone(),
                value: name.to_string(),
            })?;
        if self.store.find_entry(&class.key, name).await?.is_some() {
            return Err(IngestError::Validation(format!(
                "entry already exists: {}:{}",
                class.key, name
            )));
        }

        let mut entry = Entry::new(&class, name);
        if class.kind == EntryKind::Entity {
            entry.is_public = is_public;
        }
        let mut entry = self.store.get_or_create_entry(entry).await?;

        if entry.is_restricted() {
            entry.acvec_offset = self.access.ensure_offset(&entry).await?;
            self.queue
                .submit(vec![WorkUnit::RecomputeAccess { entry_id: entry.id }])
                .await?;
        }

        info!(
            entry_id = %entry.id,
            class = %entry.class_key,
            offset = entry.acvec_offset,
            "Entry created"
        );
        self.events.emit_created(
            EntityType::Entry,
            entry.id.to_string(),
            serde_json::json!({ "class": entry.class_key, "name": entry.name }),
        );
        Ok(entry)
    }

    /// Release an entry's offset; referencing notes and relations widen
    /// once the fan-out runs.
    pub async fn make_public(&self, entry_id: Uuid) -> IngestResult<Entry> {
        let entry = self
            .store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("entry {}", entry_id)))?;
        if entry.is_public {
            return Ok(entry);
        }

        let released = self.store.make_entry_public(entry_id).await?;
        self.queue
            .submit(vec![WorkUnit::RecomputeAccess { entry_id }])
            .await?;

        info!(entry_id = %entry_id, released, "Entry made public");
        self.events.emit_updated(
            EntityType::Entry,
            entry_id.to_string(),
            serde_json::json!({ "is_public": true, "released_offset": released }),
        );

        self.store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("entry {}", entry_id)))
    }

    /// Rename a class. Entries follow immediately; note text is remapped in
    /// the background. Access vectors are left alone.
    pub async fn rename_entry_class(&self, old_key: &str, new_key: &str) -> IngestResult<usize> {
        let old_key = old_key.trim().to_lowercase();
        let new_key = validate_class_key(new_key)?;
        if old_key == new_key {
            return Ok(0);
        }
        if self.store.get_entry_class(&old_key).await?.is_none() {
            return Err(IngestError::NotFound(format!("entry class {}", old_key)));
        }
        if self.store.get_entry_class(&new_key).await?.is_some() {
            return Err(IngestError::Validation(format!(
                "entry class already exists: {}",
                new_key
            )));
        }

        let moved = self.store.rename_entry_class(&old_key, &new_key).await?;
        self.queue
            .submit(vec![WorkUnit::RemapNotes {
                old_key: old_key.clone(),
                new_key: new_key.clone(),
            }])
            .await?;

        info!(old_key = %old_key, new_key = %new_key, entries = moved, "Entry class renamed");
        self.events.emit_updated(
            EntityType::EntryClass,
            new_key.clone(),
            serde_json::json!({ "renamed_from": old_key, "entries": moved }),
        );
        Ok(moved)
    }

    pub async fn visible_notes(&self, principal: &Principal) -> IngestResult<Vec<Note>> {
        self.access.visible_notes(principal).await
    }

    pub async fn visible_relations(&self, principal: &Principal) -> IngestResult<Vec<Relation>> {
        self.access.visible_relations(principal).await
    }
}

/// Lowercased key usable inside `[[key:value]]`
fn validate_class_key(key: &str) -> IngestResult<String> {
    let key = key.trim().to_lowercase();
    if key.is_empty() {
        return Err(IngestError::Validation("entry class key is empty".into()));
    }
    if key.chars().any(|c| matches!(c, ':' | '|' | '[' | ']') || c.is_whitespace()) {
        return Err(IngestError::Validation(format!(
            "entry class key contains reserved characters: {}",
            key
        )));
    }
    Ok(key)
}
