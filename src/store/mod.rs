//! Persistence collaborator
//!
//! [`KnowledgeStore`] is the seam; [`MemoryStore`] is the in-process
//! implementation used by the CLI and the tests.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::KnowledgeStore;
