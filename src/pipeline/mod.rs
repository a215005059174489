//! Note ingestion pipeline
//!
//! - `stages`: pure pre-commit checks and the deferred-unit schedule
//! - `ingest`: [`NoteIngestor`]: prefetch, run stages, commit, dispatch
//! - `units`: serializable post-commit work
//! - `queue`: worker pool with per-unit retry and backoff
//! - `locks`: per-note single-flight for relation replacement

pub mod backoff;
pub mod ingest;
pub mod locks;
pub mod metadata;
pub mod queue;
pub mod stages;
pub mod units;

pub use backoff::Backoff;
pub use ingest::NoteIngestor;
pub use locks::{NoteLockGuard, NoteLocks};
pub use metadata::{infer_metadata, NoteMetadata};
pub use queue::WorkQueue;
pub use stages::{default_stages, KnownEntries, NoteDraft, Stage, StageOutput};
pub use units::{WorkUnit, WorkerContext};
