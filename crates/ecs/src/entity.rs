use slotmap::{Key, new_key_type};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

new_key_type! {
    /// Slot in a registry. The version half invalidates stale keys.
    pub struct EntityKey;
}

/// Identifies the registry an entity handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(u64);

impl SceneId {
    /// A scene id never handed out before in this process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Capability handle to an entity: a registry slot plus the owning scene.
///
/// Handles own nothing. Dropping one has no effect on the entity, and a
/// handle outlives the entity it names without becoming dangerous: every
/// registry operation checks it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    key: EntityKey,
    scene: SceneId,
}

impl Entity {
    pub(crate) fn new(key: EntityKey, scene: SceneId) -> Self {
        Self { key, scene }
    }

    pub fn key(self) -> EntityKey {
        self.key
    }

    pub fn scene(self) -> SceneId {
        self.scene
    }

    pub fn index(self) -> u32 {
        (self.key.data().as_ffi() & 0xffff_ffff) as u32
    }

    /// Bumped every time the slot is reused.
    pub fn generation(self) -> u32 {
        (self.key.data().as_ffi() >> 32) as u32
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn scene_ids_are_unique() {
        assert_ne!(SceneId::next(), SceneId::next());
    }

    #[test]
    fn reused_slot_bumps_generation() {
        let mut slots: SlotMap<EntityKey, ()> = SlotMap::with_key();
        let scene = SceneId::next();
        let first = Entity::new(slots.insert(()), scene);
        slots.remove(first.key());
        let second = Entity::new(slots.insert(()), scene);

        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert_ne!(first, second);
    }
}
