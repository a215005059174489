//! Cradle Notes
//!
//! Knowledge-base note ingestion:
//! - `linker`: markdown → link tree → compressed tree → entity relations
//! - `access`: 2048-bit access vectors and offset management
//! - `pipeline`: staged ingestion with a background work queue
//! - `store`: persistence trait and its in-memory implementation
//! - `entries`: entry classes, entries and catalog operations

pub mod access;
pub mod entries;
pub mod error;
pub mod events;
pub mod linker;
pub mod notes;
pub mod pipeline;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::access::AccessEngine;
use crate::entries::Catalog;
use crate::events::{EventBus, EventEmitter};
use crate::pipeline::{NoteIngestor, NoteLocks, WorkQueue, WorkerContext};
use crate::store::{KnowledgeStore, MemoryStore};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub linker: LinkerConfig,
    pub queue: QueueConfig,
    pub locks: LockConfig,
    pub ingest: IngestConfig,
}

/// Link-tree compression
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Subtrees with at most this many links collapse into one clique
    pub max_clique_size: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            max_clique_size: linker::DEFAULT_MAX_CLIQUE_SIZE,
        }
    }
}

/// Background work queue
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    /// Attempts per unit, first run included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Per-note smart-link locks
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retries: 3,
            retry_delay_ms: 100,
        }
    }
}

/// Ingestion stages
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Unknown `[[type:...]]` keys become artifact classes instead of errors
    pub auto_create_classes: bool,
    pub title_max_len: usize,
    pub description_max_len: usize,
    /// Notes must reference at least this many entries
    pub min_references: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            auto_create_classes: true,
            title_max_len: 200,
            description_max_len: 400,
            min_references: 0,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub linker: LinkerConfig,
    pub queue: QueueConfig,
    pub locks: LockConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "cradle.yaml" in CWD.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let mut config = Self {
            linker: yaml.linker,
            queue: yaml.queue,
            locks: yaml.locks,
            ingest: yaml.ingest,
        };

        if let Some(v) = env_parse("CRADLE_MAX_CLIQUE_SIZE") {
            config.linker.max_clique_size = v;
        }
        if let Some(v) = env_parse("CRADLE_QUEUE_WORKERS") {
            config.queue.workers = v;
        }
        if let Some(v) = env_parse("CRADLE_QUEUE_MAX_ATTEMPTS") {
            config.queue.max_attempts = v;
        }
        if let Some(v) = env_parse("CRADLE_LOCK_TIMEOUT_MS") {
            config.locks.timeout_ms = v;
        }
        if let Some(v) = env_parse("CRADLE_AUTO_CREATE_CLASSES") {
            config.ingest.auto_create_classes = v;
        }

        Ok(config)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("cradle.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={}", var, raw);
            None
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KnowledgeStore>,
    pub events: EventBus,
    pub access: AccessEngine,
    pub locks: Arc<NoteLocks>,
    pub queue: Arc<WorkQueue>,
    pub ingestor: Arc<NoteIngestor>,
    pub catalog: Catalog,
    pub config: Arc<Config>,
}

impl AppState {
    /// State backed by a fresh [`MemoryStore`]. Must run inside a tokio runtime.
    pub fn new(config: Config) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Wire every service around `store` and start the worker pool
    pub fn with_store(store: Arc<dyn KnowledgeStore>, config: Config) -> Self {
        let events = EventBus::default();
        let emitter: Arc<dyn EventEmitter> = Arc::new(events.clone());
        let access = AccessEngine::new(store.clone());
        let locks = Arc::new(NoteLocks::new(&config.locks));

        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            access: access.clone(),
            locks: locks.clone(),
            events: emitter.clone(),
            max_clique_size: config.linker.max_clique_size,
            ingest: config.ingest.clone(),
        });
        let queue = Arc::new(WorkQueue::start(ctx, config.queue.clone()));

        let ingestor = Arc::new(NoteIngestor::new(
            store.clone(),
            queue.clone(),
            emitter.clone(),
            &config.ingest,
        ));
        let catalog = Catalog::new(store.clone(), access.clone(), queue.clone(), emitter);

        Self {
            store,
            events,
            access,
            locks,
            queue,
            ingestor,
            catalog,
            config: Arc::new(config),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
