//! Entries and entry classes
//!
//! Reference targets of `[[type:value]]` links, plus the [`Catalog`]
//! operations that change them outside of note ingestion.

mod catalog;
pub mod models;

pub use catalog::Catalog;
pub use models::*;
