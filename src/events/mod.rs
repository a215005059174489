//! Knowledge-base event system
//!
//! This module provides:
//! - `KnowledgeEvent`: typed events emitted after every mutation
//! - `EventBus`: broadcast channel for distributing events to subscribers

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{EntityType, EventAction, EventEmitter, KnowledgeEvent, NoopEmitter};
