//! Bit-vector access control
//!
//! Every restricted entity owns one bit. A note or relation requires the bits
//! of the restricted entities it references; a principal sees an object iff it
//! holds every required bit (superusers see everything).

pub mod engine;
pub mod vector;

pub use engine::{AccessEngine, FanOut};
pub use vector::{AccessVector, MAX_OFFSET, SENTINEL_BIT, WIDTH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The acting user as seen by the access model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub read: AccessVector,
    pub write: AccessVector,
    #[serde(default)]
    pub superuser: bool,
}

impl Principal {
    /// Regular user: holds the sentinel, so notes without restricted
    /// references are visible, but no entity bits.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            read: AccessVector::sentinel(),
            write: AccessVector::sentinel(),
            superuser: false,
        }
    }

    pub fn superuser(id: Uuid) -> Self {
        Self {
            id,
            read: AccessVector::full(),
            write: AccessVector::full(),
            superuser: true,
        }
    }

    /// Grant read and write on the entity at `offset`
    pub fn grant(mut self, offset: u32) -> Self {
        self.read.set(offset);
        self.write.set(offset);
        self
    }

    /// Grant read only on the entity at `offset`
    pub fn grant_read(mut self, offset: u32) -> Self {
        self.read.set(offset);
        self
    }

    pub fn can_read(&self, object: &AccessVector) -> bool {
        is_accessible(self, &self.read, object)
    }

    pub fn can_write(&self, object: &AccessVector) -> bool {
        is_accessible(self, &self.write, object)
    }
}

/// `(object & !privileges) == 0`, bypassed for superusers
pub fn is_accessible(principal: &Principal, privileges: &AccessVector, object: &AccessVector) -> bool {
    principal.superuser || object.covered_by(privileges)
}
