//! Test helper factories and in-memory state builders
//!
//! Provides convenience functions for creating test objects with sensible defaults,
//! and helpers for building AppState / WorkerContext instances with fast timings.
#![allow(dead_code)]

use crate::access::{AccessEngine, Principal};
use crate::entries::{Entry, EntryClass};
use crate::events::NoopEmitter;
use crate::pipeline::{NoteLocks, WorkerContext};
use crate::store::{KnowledgeStore, MemoryStore};
use crate::{AppState, Config, IngestConfig, LockConfig, QueueConfig};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Config
// ============================================================================

/// Millisecond-scale timings so failure paths finish quickly
pub fn fast_config() -> Config {
    Config {
        queue: QueueConfig {
            workers: 2,
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            multiplier: 2.0,
        },
        locks: fast_locks(),
        ..Config::default()
    }
}

pub fn fast_locks() -> LockConfig {
    LockConfig {
        timeout_ms: 10,
        retries: 1,
        retry_delay_ms: 1,
    }
}

// ============================================================================
// State builders
// ============================================================================

/// AppState over an empty MemoryStore
pub fn test_state() -> AppState {
    AppState::new(fast_config())
}

/// Worker context over an empty MemoryStore with events discarded
pub fn worker_context() -> WorkerContext {
    worker_context_with(Arc::new(MemoryStore::new()))
}

pub fn worker_context_with(store: Arc<dyn KnowledgeStore>) -> WorkerContext {
    WorkerContext {
        access: AccessEngine::new(store.clone()),
        store,
        locks: Arc::new(NoteLocks::new(&fast_locks())),
        events: Arc::new(NoopEmitter),
        max_clique_size: crate::linker::DEFAULT_MAX_CLIQUE_SIZE,
        ingest: IngestConfig::default(),
    }
}

// ============================================================================
// Factories
// ============================================================================

pub fn user() -> Principal {
    Principal::new(Uuid::new_v4())
}

pub fn admin() -> Principal {
    Principal::superuser(Uuid::new_v4())
}

/// Store an entity class and a restricted entity with its offset assigned
pub async fn restricted_entity(store: &dyn KnowledgeStore, class: &str, name: &str) -> Entry {
    let class = store
        .get_or_create_entry_class(EntryClass::entity(class))
        .await
        .unwrap();
    let mut entry = store
        .get_or_create_entry(Entry::new(&class, name))
        .await
        .unwrap();
    entry.acvec_offset = store
        .assign_acvec_offset(entry.id, crate::access::MAX_OFFSET)
        .await
        .unwrap()
        .unwrap();
    entry
}
