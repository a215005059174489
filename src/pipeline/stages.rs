//! Ingestion stages
//!
//! Each stage is a pure function of the draft note and the entries known so
//! far. Stages never touch the store, the queue or each other: the
//! [`NoteIngestor`](super::NoteIngestor) prefetches what they need, runs them
//! in order, commits their combined result and dispatches the units they
//! yield.
//!
//! Order:
//! 1. content validation
//! 2. write-access check
//! 3. entry-class resolution
//! 4. entry resolution
//! 5. smart link (deferred)
//! 6. file linking (deferred)
//! 7. metadata inference (deferred)
//! 8. alias reconciliation (deferred)
//! 9. finalize (deferred)

use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::units::WorkUnit;
use crate::access::{AccessVector, Principal};
use crate::entries::{Entry, EntryClass, EntryKind};
use crate::error::{IngestError, IngestResult};
use crate::linker::Link;
use crate::IngestConfig;

/// A note on its way in: nothing about it is persisted yet
#[derive(Debug, Clone)]
pub struct NoteDraft {
    pub note_id: Uuid,
    /// Revision the commit will store
    pub revision: u64,
    pub author: Principal,
    pub content: String,
    pub links: BTreeSet<Link>,
}

/// Classes and entries resolved for a draft, keyed the way links name them
#[derive(Debug, Clone, Default)]
pub struct KnownEntries {
    pub classes: BTreeMap<String, EntryClass>,
    pub entries: BTreeMap<(String, String), Entry>,
}

impl KnownEntries {
    pub fn entry(&self, link: &Link) -> Option<&Entry> {
        self.entries.get(&(link.key.clone(), link.value.clone()))
    }

    /// Classes named by `links`, in key order
    pub fn classes_for(&self, links: &BTreeSet<Link>) -> Vec<EntryClass> {
        let keys: BTreeSet<&str> = links.iter().map(|l| l.key.as_str()).collect();
        keys.into_iter()
            .filter_map(|k| self.classes.get(k).cloned())
            .collect()
    }

    /// Entries named by `links`, in link order
    pub fn entries_for(&self, links: &BTreeSet<Link>) -> Vec<Entry> {
        links.iter().filter_map(|l| self.entry(l).cloned()).collect()
    }
}

pub struct StageOutput {
    /// Work to run after the note is committed
    pub unit: Option<WorkUnit>,
    pub known: KnownEntries,
}

impl StageOutput {
    fn pass(known: KnownEntries) -> Self {
        Self { unit: None, known }
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, draft: &NoteDraft, known: KnownEntries) -> IngestResult<StageOutput>;
}

/// The nine stages, in order
pub fn default_stages(config: &IngestConfig) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(ValidateContent {
            min_references: config.min_references,
        }),
        Box::new(CheckWriteAccess),
        Box::new(ResolveClasses {
            auto_create: config.auto_create_classes,
        }),
        Box::new(ResolveEntries),
        Box::new(Defer::SMART_LINK),
        Box::new(Defer::LINK_FILES),
        Box::new(Defer::INFER_METADATA),
        Box::new(Defer::RECONCILE_ALIASES),
        Box::new(Defer::FINALIZE),
    ]
}

// ============================================================================
// Pre-commit stages
// ============================================================================

pub struct ValidateContent {
    pub min_references: usize,
}

impl Stage for ValidateContent {
    fn name(&self) -> &'static str {
        "validate_content"
    }

    fn run(&self, draft: &NoteDraft, known: KnownEntries) -> IngestResult<StageOutput> {
        if draft.content.trim().is_empty() {
            return Err(IngestError::Validation("note content is empty".into()));
        }
        if draft.links.len() < self.min_references {
            return Err(IngestError::Validation(format!(
                "note references {} entries, at least {} required",
                draft.links.len(),
                self.min_references
            )));
        }
        Ok(StageOutput::pass(known))
    }
}

/// The author must hold the write bit of every restricted entry referenced
pub struct CheckWriteAccess;

impl Stage for CheckWriteAccess {
    fn name(&self) -> &'static str {
        "check_write_access"
    }

    fn run(&self, draft: &NoteDraft, known: KnownEntries) -> IngestResult<StageOutput> {
        for link in &draft.links {
            let Some(entry) = known.entry(link) else {
                continue;
            };
            if !entry.is_restricted() {
                continue;
            }
            let Some(required) = AccessVector::single_bit(entry.acvec_offset) else {
                continue;
            };
            if !draft.author.can_write(&required) {
                return Err(IngestError::Forbidden {
                    key: link.key.clone(),
                    value: link.value.clone(),
                });
            }
        }
        Ok(StageOutput::pass(known))
    }
}

/// Unknown classes are created as artifact classes, or rejected
pub struct ResolveClasses {
    pub auto_create: bool,
}

impl Stage for ResolveClasses {
    fn name(&self) -> &'static str {
        "resolve_classes"
    }

    fn run(&self, draft: &NoteDraft, mut known: KnownEntries) -> IngestResult<StageOutput> {
        for link in &draft.links {
            if known.classes.contains_key(&link.key) {
                continue;
            }
            if !self.auto_create {
                return Err(IngestError::Reference {
                    key: link.key.clone(),
                    value: link.value.clone(),
                });
            }
            known
                .classes
                .insert(link.key.clone(), EntryClass::artifact(link.key.clone()));
        }
        Ok(StageOutput::pass(known))
    }
}

/// Missing artifacts are created; missing entities are fatal
pub struct ResolveEntries;

impl Stage for ResolveEntries {
    fn name(&self) -> &'static str {
        "resolve_entries"
    }

    fn run(&self, draft: &NoteDraft, mut known: KnownEntries) -> IngestResult<StageOutput> {
        for link in &draft.links {
            if known.entry(link).is_some() {
                continue;
            }
            let missing = || IngestError::Reference {
                key: link.key.clone(),
                value: link.value.clone(),
            };
            let class = known.classes.get(&link.key).ok_or_else(missing)?;
            match class.kind {
                EntryKind::Artifact => {
                    let entry = Entry::new(class, link.value.clone());
                    known.entries.insert(entry.identity(), entry);
                }
                EntryKind::Entity => return Err(missing()),
            }
        }
        Ok(StageOutput::pass(known))
    }
}

// ============================================================================
// Deferred stages
// ============================================================================

/// Stage whose whole effect is a post-commit work unit
pub struct Defer {
    name: &'static str,
    unit: fn(&NoteDraft) -> WorkUnit,
}

impl Defer {
    pub const SMART_LINK: Defer = Defer {
        name: "smart_link",
        unit: |d| WorkUnit::SmartLink { note_id: d.note_id },
    };
    pub const LINK_FILES: Defer = Defer {
        name: "link_files",
        unit: |d| WorkUnit::LinkFiles { note_id: d.note_id },
    };
    pub const INFER_METADATA: Defer = Defer {
        name: "infer_metadata",
        unit: |d| WorkUnit::InferMetadata { note_id: d.note_id },
    };
    pub const RECONCILE_ALIASES: Defer = Defer {
        name: "reconcile_aliases",
        unit: |d| WorkUnit::ReconcileAliases { note_id: d.note_id },
    };
    pub const FINALIZE: Defer = Defer {
        name: "finalize",
        unit: |d| WorkUnit::Finalize {
            note_id: d.note_id,
            revision: d.revision,
        },
    };
}

impl Stage for Defer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, draft: &NoteDraft, known: KnownEntries) -> IngestResult<StageOutput> {
        Ok(StageOutput {
            unit: Some((self.unit)(draft)),
            known,
        })
    }
}
