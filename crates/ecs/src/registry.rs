use slotmap::{SecondaryMap, SlotMap};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;

use crate::EcsError;
use crate::entity::{Entity, EntityKey, SceneId};

/// Anything storable in a registry column.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Type-erased column so the registry can drop an entity's components
/// without knowing their types.
trait Column: Any + Send + Sync {
    fn remove_entity(&mut self, key: EntityKey);
    fn contains(&self, key: EntityKey) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> Column for SecondaryMap<EntityKey, T> {
    fn remove_entity(&mut self, key: EntityKey) {
        self.remove(key);
    }

    fn contains(&self, key: EntityKey) -> bool {
        self.contains_key(key)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Entity slots plus one sparse column per component type.
///
/// Iteration follows slot order, which is stable while no entity is created
/// or destroyed.
pub struct Registry {
    scene: SceneId,
    entities: SlotMap<EntityKey, ()>,
    columns: HashMap<TypeId, Box<dyn Column>>,
}

impl Registry {
    pub fn new(scene: SceneId) -> Self {
        Self {
            scene,
            entities: SlotMap::with_key(),
            columns: HashMap::new(),
        }
    }

    pub fn scene(&self) -> SceneId {
        self.scene
    }

    pub fn create(&mut self) -> Entity {
        Entity::new(self.entities.insert(()), self.scene)
    }

    /// Free the entity's slot and drop all of its components.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.check(entity)?;
        for column in self.columns.values_mut() {
            column.remove_entity(entity.key());
        }
        self.entities.remove(entity.key());
        Ok(())
    }

    pub fn contains(&self, entity: Entity) -> bool {
        entity.scene() == self.scene && self.entities.contains_key(entity.key())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        let scene = self.scene;
        self.entities.keys().map(move |key| Entity::new(key, scene))
    }

    /// Attach `value`, replacing any previous component of the same type.
    pub fn emplace<T: Component>(&mut self, entity: Entity, value: T) -> Result<&mut T, EcsError> {
        self.check(entity)?;
        let column = self.column_or_insert::<T>();
        column.insert(entity.key(), value);
        column
            .get_mut(entity.key())
            .ok_or(EcsError::InvalidHandle(entity))
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Result<&T, EcsError> {
        self.check(entity)?;
        self.column::<T>()
            .and_then(|column| column.get(entity.key()))
            .ok_or_else(|| not_found::<T>(entity))
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, EcsError> {
        self.check(entity)?;
        self.column_mut::<T>()
            .and_then(|column| column.get_mut(entity.key()))
            .ok_or_else(|| not_found::<T>(entity))
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.contains(entity)
            && self
                .columns
                .get(&TypeId::of::<T>())
                .is_some_and(|column| column.contains(entity.key()))
    }

    /// Detach and return the component, `None` if it was not attached.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<Option<T>, EcsError> {
        self.check(entity)?;
        Ok(self
            .column_mut::<T>()
            .and_then(|column| column.remove(entity.key())))
    }

    /// Every entity carrying a `T`, in slot order.
    pub fn view<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        let scene = self.scene;
        self.column::<T>()
            .into_iter()
            .flat_map(move |column| column.iter().map(move |(key, c)| (Entity::new(key, scene), c)))
    }

    pub fn view_mut<T: Component>(&mut self) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        let scene = self.scene;
        self.column_mut::<T>().into_iter().flat_map(move |column| {
            column
                .iter_mut()
                .map(move |(key, c)| (Entity::new(key, scene), c))
        })
    }

    /// Drop every entity. Old handles stay invalid.
    pub fn clear(&mut self) {
        let count = self.entities.len();
        self.columns.clear();
        self.entities.clear();
        tracing::debug!(scene = self.scene.raw(), count, "registry cleared");
    }

    fn check(&self, entity: Entity) -> Result<(), EcsError> {
        if self.contains(entity) {
            Ok(())
        } else {
            Err(EcsError::InvalidHandle(entity))
        }
    }

    fn column<T: Component>(&self) -> Option<&SecondaryMap<EntityKey, T>> {
        self.columns
            .get(&TypeId::of::<T>())
            .and_then(|column| column.as_any().downcast_ref())
    }

    fn column_mut<T: Component>(&mut self) -> Option<&mut SecondaryMap<EntityKey, T>> {
        self.columns
            .get_mut(&TypeId::of::<T>())
            .and_then(|column| column.as_any_mut().downcast_mut())
    }

    fn column_or_insert<T: Component>(&mut self) -> &mut SecondaryMap<EntityKey, T> {
        let column = self
            .columns
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SecondaryMap::<EntityKey, T>::new()));
        match column.as_any_mut().downcast_mut() {
            Some(column) => column,
            None => unreachable!("column registered under the TypeId of another type"),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("scene", &self.scene)
            .field("entities", &self.entities.len())
            .field("columns", &self.columns.len())
            .finish()
    }
}

fn not_found<T>(entity: Entity) -> EcsError {
    EcsError::NotFound {
        component: short_type_name::<T>(),
        entity,
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Health(u32);

    #[derive(Debug, PartialEq)]
    struct Label(&'static str);

    fn registry() -> Registry {
        Registry::new(SceneId::next())
    }

    #[test]
    fn emplace_and_get() {
        let mut reg = registry();
        let e = reg.create();
        reg.emplace(e, Health(10)).unwrap().0 += 5;
        assert_eq!(reg.get::<Health>(e).unwrap(), &Health(15));
        assert!(reg.has::<Health>(e));
        assert!(!reg.has::<Label>(e));
    }

    #[test]
    fn missing_component_is_not_found() {
        let mut reg = registry();
        let e = reg.create();
        match reg.get::<Label>(e) {
            Err(EcsError::NotFound { component, entity }) => {
                assert_eq!(component, "Label");
                assert_eq!(entity, e);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn destroyed_entity_is_invalid() {
        let mut reg = registry();
        let e = reg.create();
        reg.emplace(e, Health(1)).unwrap();
        reg.destroy(e).unwrap();

        assert!(!reg.contains(e));
        assert!(!reg.has::<Health>(e));
        assert!(matches!(reg.destroy(e), Err(EcsError::InvalidHandle(_))));
        assert!(matches!(reg.get::<Health>(e), Err(EcsError::InvalidHandle(_))));
        assert!(matches!(reg.emplace(e, Health(2)), Err(EcsError::InvalidHandle(_))));
    }

    #[test]
    fn reused_slot_does_not_inherit_components() {
        let mut reg = registry();
        let old = reg.create();
        reg.emplace(old, Health(1)).unwrap();
        reg.destroy(old).unwrap();
        let new = reg.create();

        assert_eq!(old.index(), new.index());
        assert!(!reg.has::<Health>(new));
    }

    #[test]
    fn handle_from_other_registry_is_rejected() {
        let mut a = registry();
        let b = registry();
        let e = a.create();
        assert!(!b.contains(e));
        assert!(matches!(b.get::<Health>(e), Err(EcsError::InvalidHandle(_))));
    }

    #[test]
    fn view_visits_only_carriers() {
        let mut reg = registry();
        let a = reg.create();
        let b = reg.create();
        let c = reg.create();
        reg.emplace(a, Health(1)).unwrap();
        reg.emplace(c, Health(3)).unwrap();
        reg.emplace(b, Label("b")).unwrap();

        let seen: Vec<_> = reg.view::<Health>().map(|(e, h)| (e, h.0)).collect();
        assert_eq!(seen, vec![(a, 1), (c, 3)]);

        for (_, h) in reg.view_mut::<Health>() {
            h.0 *= 10;
        }
        assert_eq!(reg.get::<Health>(c).unwrap().0, 30);
        assert_eq!(reg.view::<u64>().count(), 0);
    }

    #[test]
    fn remove_returns_component() {
        let mut reg = registry();
        let e = reg.create();
        reg.emplace(e, Label("x")).unwrap();
        assert_eq!(reg.remove::<Label>(e).unwrap(), Some(Label("x")));
        assert_eq!(reg.remove::<Label>(e).unwrap(), None);
    }

    #[test]
    fn clear_invalidates_handles() {
        let mut reg = registry();
        let e = reg.create();
        reg.emplace(e, Health(1)).unwrap();
        reg.clear();
        assert!(reg.is_empty());
        assert!(!reg.contains(e));
        let fresh = reg.create();
        assert_ne!(fresh, e);
        assert_eq!(reg.entities().collect::<Vec<_>>(), vec![fresh]);
    }
}
