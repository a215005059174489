//! Entry and entry-class models
//!
//! An entry class is the `type` half of a `[[type:value]]` link; an entry is
//! one concrete `(class, name)` reference target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::linker::Link;

// ============================================================================
// Core Enums
// ============================================================================

/// Whether entries of a class are curated or auto-vivified
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Curated reference target; may be access-restricted
    Entity,
    /// Observable (ip, domain, hash...); created on first mention, always public
    #[default]
    Artifact,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Artifact => write!(f, "artifact"),
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "entity" => Ok(Self::Entity),
            "artifact" => Ok(Self::Artifact),
            _ => Err(format!("Unknown entry kind: {}", s)),
        }
    }
}

// ============================================================================
// Entry class
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryClass {
    /// Subtype key as written in links (lowercase)
    pub key: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntryClass {
    pub fn new(key: impl Into<String>, kind: EntryKind) -> Self {
        let now = Utc::now();
        Self {
            key: key.into().to_lowercase(),
            kind,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn artifact(key: impl Into<String>) -> Self {
        Self::new(key, EntryKind::Artifact)
    }

    pub fn entity(key: impl Into<String>) -> Self {
        Self::new(key, EntryKind::Entity)
    }
}

// ============================================================================
// Entry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub id: Uuid,
    pub class_key: String,
    pub kind: EntryKind,
    pub name: String,
    pub is_public: bool,
    /// Bit position in access vectors; 0 = no bit (public)
    pub acvec_offset: u32,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(class: &EntryClass, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_key: class.key.clone(),
            kind: class.kind,
            name: name.into(),
            is_public: class.kind == EntryKind::Artifact,
            acvec_offset: 0,
            aliases: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Entities not marked public need an access-vector bit
    pub fn is_restricted(&self) -> bool {
        self.kind == EntryKind::Entity && !self.is_public
    }

    pub fn identity(&self) -> (String, String) {
        (self.class_key.clone(), self.name.clone())
    }

    pub fn link(&self) -> Link {
        Link::new(self.class_key.clone(), self.name.clone())
    }
}
