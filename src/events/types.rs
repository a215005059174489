//! Knowledge-base event types

use serde::{Deserialize, Serialize};

/// The kind of object an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Note,
    Entry,
    EntryClass,
    Relation,
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Row written for the first time
    Created,
    /// Row changed (status, metadata, access vector, rename)
    Updated,
    /// Derived relations of a note replaced
    Linked,
    /// Access vectors recomputed after an offset change
    Recomputed,
}

/// A knowledge-base event emitted after a successful mutation
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEvent {
    pub entity_type: EntityType,
    pub action: EventAction,
    pub entity_id: String,
    /// Optional payload (new status, counts, keys)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl KnowledgeEvent {
    /// Create a new event with the current timestamp
    pub fn new(entity_type: EntityType, action: EventAction, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            action,
            entity_id: entity_id.into(),
            payload: serde_json::Value::Null,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Sink for knowledge events. Emitting never blocks and never fails.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: KnowledgeEvent);

    fn emit_created(&self, entity_type: EntityType, id: String, payload: serde_json::Value) {
        self.emit(KnowledgeEvent::new(entity_type, EventAction::Created, id).with_payload(payload));
    }

    fn emit_updated(&self, entity_type: EntityType, id: String, payload: serde_json::Value) {
        self.emit(KnowledgeEvent::new(entity_type, EventAction::Updated, id).with_payload(payload));
    }
}

/// Emitter that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: KnowledgeEvent) {}
}
