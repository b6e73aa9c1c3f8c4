use std::fmt::{self, Write as _};

use orrery_common::EntityId;
use orrery_ecs::{DirectionalLight, Entity, ModelComponent, PointLight, RigidBody, SpotLight};
use orrery_scene::{ComponentKind, Property, Scene};

/// Scene inspector for developer tooling.
///
/// Read-only queries against a scene for debugging and the editor UI.
pub struct SceneInspector;

impl SceneInspector {
    pub fn summary(scene: &Scene) -> SceneSummary {
        let registry = scene.registry();
        SceneSummary {
            name: scene.name().to_string(),
            entity_count: scene.entity_count(),
            root_count: scene.roots().len(),
            directional_lights: registry.view::<DirectionalLight>().count(),
            point_lights: registry.view::<PointLight>().count(),
            spot_lights: registry.view::<SpotLight>().count(),
            models: registry.view::<ModelComponent>().count(),
            loaded_models: registry
                .view::<ModelComponent>()
                .filter(|(_, mc)| mc.model.is_some())
                .count(),
            rigid_bodies: registry.view::<RigidBody>().count(),
        }
    }

    /// Every component of `entity` with its displayable fields.
    pub fn inspect_entity(scene: &Scene, entity: Entity) -> Option<EntityInfo> {
        let id = scene.entity_id(entity).ok()?;
        let name = scene.entity_name(entity).ok()?.to_string();
        let components = scene
            .component_kinds(entity)
            .into_iter()
            .map(|kind| ComponentReport {
                kind,
                properties: kind.properties(scene.registry(), entity),
            })
            .collect();
        Some(EntityInfo {
            id,
            name,
            components,
        })
    }

    pub fn inspect_id(scene: &Scene, id: EntityId) -> Option<EntityInfo> {
        scene
            .find_by_id(id)
            .and_then(|entity| Self::inspect_entity(scene, entity))
    }

    pub fn list_entities(scene: &Scene) -> Vec<EntityId> {
        scene
            .entities()
            .into_iter()
            .filter_map(|e| scene.entity_id(e).ok())
            .collect()
    }

    /// Indented entity tree, two spaces per level, roots in registry order.
    ///
    /// Each line names the entity and its non-builtin components.
    pub fn hierarchy(scene: &Scene) -> String {
        let mut out = String::new();
        for root in scene.roots() {
            write_subtree(scene, root, 0, &mut out);
        }
        out
    }
}

fn write_subtree(scene: &Scene, entity: Entity, depth: usize, out: &mut String) {
    let name = scene.entity_name(entity).unwrap_or("<unnamed>");
    let kinds: Vec<&str> = scene
        .component_kinds(entity)
        .into_iter()
        .filter(|k| !k.is_builtin())
        .map(ComponentKind::label)
        .collect();
    let _ = write!(out, "{:indent$}- {name}", "", indent = depth * 2);
    if !kinds.is_empty() {
        let _ = write!(out, " ({})", kinds.join(", "));
    }
    out.push('\n');

    let children = scene.children(entity).map(<[Entity]>::to_vec).unwrap_or_default();
    for child in children {
        if !scene.contains(child) {
            tracing::warn!(%entity, %child, "hierarchy lists a destroyed child");
            continue;
        }
        write_subtree(scene, child, depth + 1, out);
    }
}

/// Counts of what a scene holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSummary {
    pub name: String,
    pub entity_count: usize,
    pub root_count: usize,
    pub directional_lights: usize,
    pub point_lights: usize,
    pub spot_lights: usize,
    pub models: usize,
    pub loaded_models: usize,
    pub rigid_bodies: usize,
}

impl SceneSummary {
    pub fn light_count(&self) -> usize {
        self.directional_lights + self.point_lights + self.spot_lights
    }
}

impl fmt::Display for SceneSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scene '{}': entities={} roots={} lights={} (dir={} point={} spot={}) models={}/{} bodies={}",
            self.name,
            self.entity_count,
            self.root_count,
            self.light_count(),
            self.directional_lights,
            self.point_lights,
            self.spot_lights,
            self.loaded_models,
            self.models,
            self.rigid_bodies,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentReport {
    pub kind: ComponentKind,
    pub properties: Vec<Property>,
}

/// Detailed info about a single entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub id: EntityId,
    pub name: String,
    pub components: Vec<ComponentReport>,
}

impl EntityInfo {
    pub fn property(&self, kind: ComponentKind, name: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|c| c.kind == kind)?
            .properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Entity '{}' [{}]", self.name, self.id)?;
        for component in &self.components {
            writeln!(f, "  {}", component.kind.label())?;
            for property in &component.properties {
                writeln!(f, "    {}: {}", property.name, property.value)?;
            }
        }
        Ok(())
    }
}
