//! Serializable post-commit work units and their execution

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::NoteLocks;
use super::metadata::infer_metadata;
use crate::access::{AccessEngine, AccessVector};
use crate::entries::Entry;
use crate::error::{IngestError, IngestResult};
use crate::events::{EntityType, EventAction, EventEmitter, KnowledgeEvent};
use crate::linker::{self, Link, LinkTreeBuilder, Tokenizer};
use crate::notes::{Note, Relation};
use crate::store::KnowledgeStore;
use crate::IngestConfig;

/// Everything a unit needs to run
pub struct WorkerContext {
    pub store: Arc<dyn KnowledgeStore>,
    pub access: AccessEngine,
    pub locks: Arc<NoteLocks>,
    pub events: Arc<dyn EventEmitter>,
    pub max_clique_size: usize,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum WorkUnit {
    /// Replace the note's relation set (single-flight per note)
    SmartLink { note_id: Uuid },
    /// Link referenced stored files
    LinkFiles { note_id: Uuid },
    /// Title/description from content
    InferMetadata { note_id: Uuid },
    /// Record `[[type:value|alias]]` aliases on entries
    ReconcileAliases { note_id: Uuid },
    /// Access vector, HEALTHY, completion stamp; skipped once `revision` is stale
    Finalize { note_id: Uuid, revision: u64 },
    /// Fan-out after an entry's offset changed
    RecomputeAccess { entry_id: Uuid },
    /// Rewrite `[[old_key:` to `[[new_key:` in every note
    RemapNotes { old_key: String, new_key: String },
}

impl WorkUnit {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SmartLink { .. } => "smart_link",
            Self::LinkFiles { .. } => "link_files",
            Self::InferMetadata { .. } => "infer_metadata",
            Self::ReconcileAliases { .. } => "reconcile_aliases",
            Self::Finalize { .. } => "finalize",
            Self::RecomputeAccess { .. } => "recompute_access",
            Self::RemapNotes { .. } => "remap_notes",
        }
    }

    /// The note whose status reflects this unit's outcome
    pub fn note_id(&self) -> Option<Uuid> {
        match self {
            Self::SmartLink { note_id }
            | Self::LinkFiles { note_id }
            | Self::InferMetadata { note_id }
            | Self::ReconcileAliases { note_id }
            | Self::Finalize { note_id, .. } => Some(*note_id),
            Self::RecomputeAccess { .. } | Self::RemapNotes { .. } => None,
        }
    }

    /// Note revision the unit was scheduled for
    pub fn revision(&self) -> Option<u64> {
        match self {
            Self::Finalize { revision, .. } => Some(*revision),
            _ => None,
        }
    }

    /// Run the unit. Returns follow-up units to run after the current chain.
    pub async fn execute(&self, ctx: &WorkerContext) -> IngestResult<Vec<WorkUnit>> {
        match self {
            Self::SmartLink { note_id } => smart_link(ctx, *note_id).await,
            Self::LinkFiles { note_id } => link_files(ctx, *note_id).await.map(|_| Vec::new()),
            Self::InferMetadata { note_id } => {
                update_metadata(ctx, *note_id).await.map(|_| Vec::new())
            }
            Self::ReconcileAliases { note_id } => {
                reconcile_aliases(ctx, *note_id).await.map(|_| Vec::new())
            }
            Self::Finalize { note_id, revision } => finalize(ctx, *note_id, *revision).await,
            Self::RecomputeAccess { entry_id } => {
                recompute_access(ctx, *entry_id).await.map(|_| Vec::new())
            }
            Self::RemapNotes { old_key, new_key } => {
                remap_notes(ctx, old_key, new_key).await.map(|_| Vec::new())
            }
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecomputeAccess { entry_id } => write!(f, "{}({})", self.name(), entry_id),
            Self::RemapNotes { old_key, new_key } => {
                write!(f, "{}({} -> {})", self.name(), old_key, new_key)
            }
            _ => match self.note_id() {
                Some(id) => write!(f, "{}({})", self.name(), id),
                None => write!(f, "{}", self.name()),
            },
        }
    }
}

async fn load_note(ctx: &WorkerContext, note_id: Uuid) -> IngestResult<Note> {
    ctx.store
        .get_note(note_id)
        .await?
        .ok_or_else(|| IngestError::NotFound(format!("note {}", note_id)))
}

/// Offset of `entry`, queueing a fan-out when this call assigned it
async fn entry_offset(
    ctx: &WorkerContext,
    entry: &Entry,
    fan_out: &mut Vec<WorkUnit>,
) -> IngestResult<u32> {
    let unassigned = entry.is_restricted() && entry.acvec_offset == 0;
    let offset = ctx.access.ensure_offset(entry).await?;
    if unassigned {
        fan_out.push(WorkUnit::RecomputeAccess { entry_id: entry.id });
    }
    Ok(offset)
}

/// Resolve links to stored entries, assigning offsets to restricted ones
async fn resolve_links<'a>(
    ctx: &WorkerContext,
    links: impl IntoIterator<Item = &'a Link>,
    fan_out: &mut Vec<WorkUnit>,
) -> IngestResult<HashMap<Link, Entry>> {
    let mut resolved = HashMap::new();
    for link in links {
        match ctx.store.find_entry(&link.key, &link.value).await? {
            Some(mut entry) => {
                entry.acvec_offset = entry_offset(ctx, &entry, fan_out).await?;
                resolved.insert(link.clone(), entry);
            }
            None => warn!(link = %link, "Link has no entry, skipped"),
        }
    }
    Ok(resolved)
}

async fn smart_link(ctx: &WorkerContext, note_id: Uuid) -> IngestResult<Vec<WorkUnit>> {
    let _guard = ctx.locks.acquire(note_id).await?;
    let note = load_note(ctx, note_id).await?;

    let extraction = linker::extract(&note.content, ctx.max_clique_size)?;
    let mut fan_out = Vec::new();
    let entries = resolve_links(ctx, &extraction.links, &mut fan_out).await?;

    let mut relations: BTreeMap<(Uuid, Uuid), Relation> = BTreeMap::new();
    for (a, b) in &extraction.relations {
        let (Some(src), Some(dst)) = (entries.get(a), entries.get(b)) else {
            continue;
        };
        if src.id == dst.id {
            continue;
        }
        let relation = Relation::new(
            note_id,
            src.id,
            dst.id,
            AccessEngine::relation_vector(src, dst),
        );
        relations.insert((relation.src, relation.dst), relation);
    }

    let count = relations.len();
    ctx.store
        .replace_note_relations(note_id, relations.into_values().collect())
        .await?;

    debug!(note_id = %note_id, relations = count, "Relations replaced");
    ctx.events.emit(
        KnowledgeEvent::new(EntityType::Note, EventAction::Linked, note_id.to_string())
            .with_payload(serde_json::json!({ "relations": count })),
    );
    Ok(fan_out)
}

async fn link_files(ctx: &WorkerContext, note_id: Uuid) -> IngestResult<()> {
    let note = load_note(ctx, note_id).await?;
    let document = LinkTreeBuilder::build(Tokenizer::new().tokenize(&note.content));

    let mut file_ids = Vec::new();
    for reference in document.files {
        match ctx.store.find_file(&reference.url).await? {
            Some(file) if !file_ids.contains(&file.id) => file_ids.push(file.id),
            Some(_) => {}
            None => debug!(note_id = %note_id, url = %reference.url, "Not a stored file"),
        }
    }

    ctx.store.replace_note_files(note_id, file_ids).await?;
    Ok(())
}

async fn update_metadata(ctx: &WorkerContext, note_id: Uuid) -> IngestResult<()> {
    let note = load_note(ctx, note_id).await?;
    let meta = infer_metadata(
        &note.content,
        ctx.ingest.title_max_len,
        ctx.ingest.description_max_len,
    );
    ctx.store
        .update_note_metadata(note_id, meta.title, meta.description)
        .await?;
    Ok(())
}

async fn reconcile_aliases(ctx: &WorkerContext, note_id: Uuid) -> IngestResult<()> {
    let note = load_note(ctx, note_id).await?;

    for (link, aliases) in linker::collect_aliases(&note.content) {
        let Some(entry) = ctx.store.find_entry(&link.key, &link.value).await? else {
            continue;
        };
        let new: Vec<String> = aliases
            .into_iter()
            .filter(|a| *a != entry.name && !entry.aliases.contains(a))
            .collect();
        if new.is_empty() {
            continue;
        }
        debug!(entry_id = %entry.id, aliases = ?new, "Recording aliases");
        ctx.store.add_entry_aliases(entry.id, new).await?;
    }
    Ok(())
}

async fn finalize(ctx: &WorkerContext, note_id: Uuid, revision: u64) -> IngestResult<Vec<WorkUnit>> {
    let note = load_note(ctx, note_id).await?;
    if note.revision != revision {
        debug!(note_id = %note_id, revision, current = note.revision, "Stale finalize skipped");
        return Ok(Vec::new());
    }

    let mut fan_out = Vec::new();
    let mut offsets = Vec::with_capacity(note.entries.len());
    for entry_id in &note.entries {
        if let Some(entry) = ctx.store.get_entry(*entry_id).await? {
            offsets.push(entry_offset(ctx, &entry, &mut fan_out).await?);
        }
    }
    let vector = AccessVector::composite(offsets);

    if !ctx.store.finalize_note(note_id, revision, vector).await? {
        debug!(note_id = %note_id, revision, "Note no longer processing, finalize skipped");
        return Ok(fan_out);
    }
    info!(note_id = %note_id, bits = ?vector.bits(), "Note finalized");
    ctx.events.emit_updated(
        EntityType::Note,
        note_id.to_string(),
        serde_json::json!({ "status": "healthy", "revision": revision }),
    );
    Ok(fan_out)
}

async fn recompute_access(ctx: &WorkerContext, entry_id: Uuid) -> IngestResult<()> {
    let fan_out = ctx.access.recompute_for_entry(entry_id).await?;
    ctx.events.emit(
        KnowledgeEvent::new(EntityType::Entry, EventAction::Recomputed, entry_id.to_string())
            .with_payload(serde_json::json!({
                "notes": fan_out.notes,
                "relations": fan_out.relations,
            })),
    );
    Ok(())
}

async fn remap_notes(ctx: &WorkerContext, old_key: &str, new_key: &str) -> IngestResult<()> {
    let pattern = Regex::new(&format!(r"(?i)\[\[{}:", regex::escape(old_key)))
        .map_err(|e| IngestError::Validation(format!("invalid class key {}: {}", old_key, e)))?;
    let replacement = format!("[[{}:", new_key);

    let mut remapped = 0usize;
    for note in ctx.store.list_notes().await? {
        if !pattern.is_match(&note.content) {
            continue;
        }
        let content = pattern
            .replace_all(&note.content, regex::NoExpand(&replacement))
            .into_owned();
        ctx.store.update_note_content(note.id, content).await?;
        ctx.events.emit_updated(
            EntityType::Note,
            note.id.to_string(),
            serde_json::json!({ "remapped": { "from": old_key, "to": new_key } }),
        );
        remapped += 1;
    }

    info!(old_key, new_key, notes = remapped, "Notes remapped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::EntryClass;
    use crate::notes::{NoteCommit, NoteStatus, StoredFile};
    use crate::test_helpers::{restricted_entity, worker_context};

    /// Commit a note whose links are all artifacts
    async fn commit(ctx: &WorkerContext, content: &str) -> Note {
        let links = linker::collect_links(content);
        let classes: Vec<EntryClass> = links
            .iter()
            .map(|l| EntryClass::artifact(l.key.clone()))
            .collect();
        let entries = links
            .iter()
            .map(|l| Entry::new(&EntryClass::artifact(l.key.clone()), l.value.clone()))
            .collect();
        ctx.store
            .commit_note(NoteCommit {
                note: Note::new(Uuid::new_v4(), Uuid::new_v4(), content),
                classes,
                entries,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_smart_link_replaces_relations() {
        let ctx = worker_context();
        let note = commit(&ctx, "# H1\n[[ip:1.1.1.1]] [[domain:a.com]]").await;
        let unit = WorkUnit::SmartLink { note_id: note.id };

        unit.execute(&ctx).await.unwrap();
        unit.execute(&ctx).await.unwrap();

        let relations = ctx.store.list_note_relations(note.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert!(relations[0].access_vector.is_empty());
    }

    #[tokio::test]
    async fn test_smart_link_relation_carries_entity_bit() {
        let ctx = worker_context();
        let actor = restricted_entity(ctx.store.as_ref(), "actor", "apt28").await;
        let ip_class = EntryClass::artifact("ip");
        let note = ctx
            .store
            .commit_note(NoteCommit {
                note: Note::new(Uuid::new_v4(), Uuid::new_v4(), "[[actor:apt28]] [[ip:1.1.1.1]]"),
                classes: vec![ip_class.clone()],
                entries: vec![actor.clone(), Entry::new(&ip_class, "1.1.1.1")],
            })
            .await
            .unwrap();

        WorkUnit::SmartLink { note_id: note.id }
            .execute(&ctx)
            .await
            .unwrap();

        let relations = ctx.store.list_note_relations(note.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert!(relations[0].touches(actor.id));
        assert_eq!(relations[0].access_vector.bits(), vec![actor.acvec_offset]);
    }

    #[tokio::test]
    async fn test_finalize_sets_sentinel_without_entities() {
        let ctx = worker_context();
        let note = commit(&ctx, "[[ip:1.1.1.1]]").await;

        WorkUnit::Finalize {
            note_id: note.id,
            revision: note.revision,
        }
        .execute(&ctx)
        .await
        .unwrap();

        let stored = ctx.store.get_note(note.id).await.unwrap().unwrap();
        assert_eq!(stored.access_vector, AccessVector::sentinel());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_finalize_for_older_revision_leaves_note_processing() {
        let ctx = worker_context();
        let note = commit(&ctx, "[[ip:1.1.1.1]]").await;
        let mut edit = Note::new(note.id, note.author, "[[ip:2.2.2.2]]");
        edit.revision = note.revision + 1;
        ctx.store
            .commit_note(NoteCommit {
                note: edit,
                classes: vec![EntryClass::artifact("ip")],
                entries: vec![Entry::new(&EntryClass::artifact("ip"), "2.2.2.2")],
            })
            .await
            .unwrap();

        WorkUnit::Finalize {
            note_id: note.id,
            revision: note.revision,
        }
        .execute(&ctx)
        .await
        .unwrap();
        let stored = ctx.store.get_note(note.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NoteStatus::Processing);
        assert!(stored.completed_at.is_none());

        WorkUnit::Finalize {
            note_id: note.id,
            revision: note.revision + 1,
        }
        .execute(&ctx)
        .await
        .unwrap();
        let stored = ctx.store.get_note(note.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NoteStatus::Healthy);
    }

    #[tokio::test]
    async fn test_first_offset_assignment_yields_fan_out() {
        let ctx = worker_context();
        let actor_class = ctx
            .store
            .get_or_create_entry_class(EntryClass::entity("actor"))
            .await
            .unwrap();
        let actor = ctx
            .store
            .get_or_create_entry(Entry::new(&actor_class, "apt28"))
            .await
            .unwrap();
        assert_eq!(actor.acvec_offset, 0);
        let note = ctx
            .store
            .commit_note(NoteCommit {
                note: Note::new(Uuid::new_v4(), Uuid::new_v4(), "[[actor:apt28]]"),
                classes: vec![],
                entries: vec![actor.clone()],
            })
            .await
            .unwrap();

        let unit = WorkUnit::Finalize {
            note_id: note.id,
            revision: note.revision,
        };
        let follow_ups = unit.execute(&ctx).await.unwrap();
        assert_eq!(follow_ups, vec![WorkUnit::RecomputeAccess { entry_id: actor.id }]);

        // Already assigned: nothing more to fan out
        let again = WorkUnit::SmartLink { note_id: note.id }
            .execute(&ctx)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_aliases_records_new_only() {
        let ctx = worker_context();
        let note = commit(&ctx, "[[actor:apt28|Fancy Bear]] and [[actor:apt28|apt28]]").await;

        WorkUnit::ReconcileAliases { note_id: note.id }
            .execute(&ctx)
            .await
            .unwrap();

        let entry = ctx.store.find_entry("actor", "apt28").await.unwrap().unwrap();
        assert_eq!(entry.aliases.len(), 1);
        assert!(entry.aliases.contains("Fancy Bear"));
    }

    #[tokio::test]
    async fn test_link_files_only_known_files() {
        let ctx = worker_context();
        let file = ctx
            .store
            .register_file(StoredFile::new("files/report.pdf"))
            .await
            .unwrap();
        let note = commit(
            &ctx,
            "See [report](files/report.pdf) and [site](https://example.com) and ![again](files/report.pdf)",
        )
        .await;

        WorkUnit::LinkFiles { note_id: note.id }
            .execute(&ctx)
            .await
            .unwrap();

        let files = ctx.store.list_note_files(note.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, file.id);
    }

    #[tokio::test]
    async fn test_remap_notes_rewrites_only_old_key() {
        let ctx = worker_context();
        let note = commit(&ctx, "[[Actor:apt28]] near [[actors:x]] and [[ip:1.1.1.1]]").await;
        let vector = note.access_vector;

        WorkUnit::RemapNotes {
            old_key: "actor".into(),
            new_key: "threat_actor".into(),
        }
        .execute(&ctx)
        .await
        .unwrap();

        let stored = ctx.store.get_note(note.id).await.unwrap().unwrap();
        assert_eq!(
            stored.content,
            "[[threat_actor:apt28]] near [[actors:x]] and [[ip:1.1.1.1]]"
        );
        assert_eq!(stored.access_vector, vector);
    }

    #[tokio::test]
    async fn test_units_on_missing_note_fail() {
        let ctx = worker_context();
        let err = WorkUnit::Finalize {
            note_id: Uuid::new_v4(),
            revision: 0,
        }
        .execute(&ctx)
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[test]
    fn test_unit_serde_is_tagged() {
        let unit = WorkUnit::RemapNotes {
            old_key: "actor".into(),
            new_key: "threat_actor".into(),
        };
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["unit"], "remap_notes");
        assert_eq!(json["new_key"], "threat_actor");

        let back: WorkUnit = serde_json::from_value(json).unwrap();
        assert_eq!(back, unit);
    }

    #[test]
    fn test_note_id_only_for_note_units() {
        let note_id = Uuid::new_v4();
        let finalize = WorkUnit::Finalize {
            note_id,
            revision: 3,
        };
        assert_eq!(finalize.note_id(), Some(note_id));
        assert_eq!(finalize.revision(), Some(3));
        assert_eq!(
            WorkUnit::RecomputeAccess {
                entry_id: Uuid::new_v4()
            }
            .note_id(),
            None
        );
    }

    #[test]
    fn test_display_names_target() {
        let note_id = Uuid::new_v4();
        assert_eq!(
            WorkUnit::SmartLink { note_id }.to_string(),
            format!("smart_link({})", note_id)
        );
    }
}
