use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-unique, serialization-stable identity of an entity.
///
/// Drawn from 64 random bits. Zero is never produced so that files can use it
/// as the "no parent" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn new() -> Self {
        loop {
            let (high, _) = Uuid::new_v4().as_u64_pair();
            if high != 0 {
                return Self(high);
            }
        }
    }

    /// Wrap an id read from a file. Returns `None` for the reserved zero.
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
