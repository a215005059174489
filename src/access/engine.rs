//! Offset assignment and vector (re)computation against the store.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::vector::{AccessVector, MAX_OFFSET};
use super::Principal;
use crate::entries::Entry;
use crate::error::{IngestError, IngestResult};
use crate::notes::{Note, Relation};
use crate::store::KnowledgeStore;

/// Rows touched by one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub notes: usize,
    pub relations: usize,
}

#[derive(Clone)]
pub struct AccessEngine {
    store: Arc<dyn KnowledgeStore>,
}

impl AccessEngine {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }

    /// Offset of `entry`, assigning the smallest free one on first need.
    ///
    /// Public entries and artifacts always answer 0.
    pub async fn ensure_offset(&self, entry: &Entry) -> IngestResult<u32> {
        if !entry.is_restricted() {
            return Ok(0);
        }
        if entry.acvec_offset != 0 {
            return Ok(entry.acvec_offset);
        }
        match self.store.assign_acvec_offset(entry.id, MAX_OFFSET).await? {
            Some(offset) => {
                debug!(entry_id = %entry.id, offset, "Assigned access offset");
                Ok(offset)
            }
            None => Err(IngestError::AccessCapacity { max: MAX_OFFSET }),
        }
    }

    /// Single-bit vector of an entry; empty when public
    pub fn entry_vector(entry: &Entry) -> AccessVector {
        AccessVector::single_bit(entry.acvec_offset).unwrap_or_default()
    }

    /// OR of both endpoints' bits
    pub fn relation_vector(src: &Entry, dst: &Entry) -> AccessVector {
        Self::entry_vector(src) | Self::entry_vector(dst)
    }

    /// Composite vector over the entries a note references
    pub async fn note_vector(&self, entry_ids: impl IntoIterator<Item = Uuid>) -> IngestResult<AccessVector> {
        let mut offsets = Vec::new();
        for id in entry_ids {
            if let Some(entry) = self.store.get_entry(id).await? {
                offsets.push(entry.acvec_offset);
            }
        }
        Ok(AccessVector::composite(offsets))
    }

    /// Recompute and store one note's vector
    pub async fn recompute_note(&self, note_id: Uuid) -> IngestResult<AccessVector> {
        let note = self
            .store
            .get_note(note_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("note {}", note_id)))?;
        let vector = self.note_vector(note.entries.iter().copied()).await?;
        self.store.set_note_access_vector(note_id, vector).await?;
        Ok(vector)
    }

    /// Recompute and store one relation's vector
    pub async fn recompute_relation(&self, relation: &Relation) -> IngestResult<AccessVector> {
        let src = self.store.get_entry(relation.src).await?;
        let dst = self.store.get_entry(relation.dst).await?;
        let vector = match (src, dst) {
            (Some(src), Some(dst)) => Self::relation_vector(&src, &dst),
            _ => {
                return Err(IngestError::NotFound(format!(
                    "endpoint of relation {}",
                    relation.id
                )))
            }
        };
        self.store
            .set_relation_access_vector(relation.id, vector)
            .await?;
        Ok(vector)
    }

    /// Recompute every note and relation that references `entry_id`
    pub async fn recompute_for_entry(&self, entry_id: Uuid) -> IngestResult<FanOut> {
        let notes = self.store.notes_referencing(entry_id).await?;
        try_join_all(notes.iter().map(|note| self.recompute_note(note.id))).await?;

        let relations = self.store.relations_referencing(entry_id).await?;
        try_join_all(relations.iter().map(|r| self.recompute_relation(r))).await?;

        let fan_out = FanOut {
            notes: notes.len(),
            relations: relations.len(),
        };

        info!(
            entry_id = %entry_id,
            notes = fan_out.notes,
            relations = fan_out.relations,
            "Access vectors recomputed"
        );
        Ok(fan_out)
    }

    pub async fn visible_notes(&self, principal: &Principal) -> IngestResult<Vec<Note>> {
        Ok(self
            .store
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| principal.can_read(&n.access_vector))
            .collect())
    }

    pub async fn visible_relations(&self, principal: &Principal) -> IngestResult<Vec<Relation>> {
        Ok(self
            .store
            .list_relations()
            .await?
            .into_iter()
            .filter(|r| principal.can_read(&r.access_vector))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::EntryClass;
    use crate::notes::NoteCommit;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, AccessEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = AccessEngine::new(store.clone());
        (store, engine)
    }

    #[tokio::test]
    async fn test_ensure_offset_only_for_restricted() {
        let (store, engine) = setup().await;
        let ip = store
            .get_or_create_entry_class(EntryClass::artifact("ip"))
            .await
            .unwrap();
        let actor = store
            .get_or_create_entry_class(EntryClass::entity("actor"))
            .await
            .unwrap();
        let artifact = store
            .get_or_create_entry(Entry::new(&ip, "1.1.1.1"))
            .await
            .unwrap();
        let entity = store
            .get_or_create_entry(Entry::new(&actor, "apt28"))
            .await
            .unwrap();

        assert_eq!(engine.ensure_offset(&artifact).await.unwrap(), 0);
        assert_eq!(engine.ensure_offset(&entity).await.unwrap(), 1);

        let stored = store.get_entry(entity.id).await.unwrap().unwrap();
        assert_eq!(stored.acvec_offset, 1);
        assert_eq!(engine.ensure_offset(&stored).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_relation_vector_is_or_of_endpoints() {
        let actor = EntryClass::entity("actor");
        let mut a = Entry::new(&actor, "a");
        a.acvec_offset = 3;
        let mut b = Entry::new(&actor, "b");
        b.acvec_offset = 8;
        let ip = Entry::new(&EntryClass::artifact("ip"), "1.1.1.1");

        assert_eq!(AccessEngine::relation_vector(&a, &b).bits(), vec![3, 8]);
        assert_eq!(AccessEngine::relation_vector(&a, &ip).bits(), vec![3]);
        assert!(AccessEngine::relation_vector(&ip, &ip).is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_after_entry_goes_public() {
        let (store, engine) = setup().await;
        let actor = store
            .get_or_create_entry_class(EntryClass::entity("actor"))
            .await
            .unwrap();
        let entity = store
            .get_or_create_entry(Entry::new(&actor, "apt28"))
            .await
            .unwrap();
        engine.ensure_offset(&entity).await.unwrap();

        let note = store
            .commit_note(NoteCommit {
                note: Note::new(Uuid::new_v4(), Uuid::new_v4(), "[[actor:apt28]]"),
                classes: vec![],
                entries: vec![entity.clone()],
            })
            .await
            .unwrap();
        let vector = engine.recompute_note(note.id).await.unwrap();
        assert_eq!(vector.bits(), vec![1]);

        store.make_entry_public(entity.id).await.unwrap();
        let fan_out = engine.recompute_for_entry(entity.id).await.unwrap();
        assert_eq!(fan_out, FanOut { notes: 1, relations: 0 });

        let note = store.get_note(note.id).await.unwrap().unwrap();
        assert_eq!(note.access_vector, AccessVector::sentinel());
    }
}
