//! Notes
//!
//! Note, relation and file models. Ingestion lives in [`crate::pipeline`].

pub mod models;

pub use models::*;
