use glam::Vec3;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use orrery_assets::{AssetError, Model, ModelLibrary};
use orrery_common::{EntityId, ShadowConfig};
use orrery_ecs::{
    CameraComponent, Component, DirectionalLight, Entity, Identity, ModelComponent, PointLight,
    Registry, Relationship, RigidBody, SceneId, SpotLight, Tag, Transform,
};
use orrery_gpu::{BufferId, BufferInfo, GpuBackend, SamplerId, SamplerInfo};
use orrery_physics::PhysicsBackend;

use crate::SceneError;
use crate::lights::{LightBuffer, LightCounts};
use crate::shadow::ShadowPipelines;

/// Geometry the render passes draw: a loaded model and the device address
/// of its entity's transform buffer.
#[derive(Debug, Clone)]
pub struct Renderable {
    pub entity: Entity,
    pub model: Arc<Model>,
    pub transform_address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// Billboard marker for a light, drawn by the overlay pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightGizmo {
    pub entity: Entity,
    pub kind: LightKind,
    pub position: Vec3,
    pub color: Vec3,
}

/// An editable world: entities, their components and the GPU and physics
/// resources derived from them.
pub struct Scene {
    pub(crate) name: String,
    pub(crate) registry: Registry,
    pub(crate) device: Arc<dyn GpuBackend>,
    pub(crate) physics: Box<dyn PhysicsBackend>,
    pub(crate) library: Option<Arc<ModelLibrary>>,
    pub(crate) shadows: ShadowConfig,
    pub(crate) light_buffer: BufferId,
    pub(crate) pipelines: ShadowPipelines,
    pub(crate) pcf_sampler: SamplerId,
    pub(crate) light_counts: LightCounts,
    /// Set when the packed light buffer no longer matches the registry for a
    /// reason the dirty flags cannot express (a light was destroyed).
    pub(crate) lights_stale: bool,
}

impl Scene {
    /// Scene with the default shadow map configuration.
    pub fn new(
        name: impl Into<String>,
        device: Arc<dyn GpuBackend>,
        physics: Box<dyn PhysicsBackend>,
    ) -> Result<Self, SceneError> {
        Self::with_config(name, device, physics, ShadowConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        device: Arc<dyn GpuBackend>,
        physics: Box<dyn PhysicsBackend>,
        shadows: ShadowConfig,
    ) -> Result<Self, SceneError> {
        let name = name.into();
        let light_buffer = device.create_buffer(&BufferInfo::device_local(
            std::mem::size_of::<LightBuffer>() as u64,
            "light buffer",
        ))?;
        let pipelines = ShadowPipelines::create(device.as_ref())?;
        let pcf_sampler = device.create_sampler(&SamplerInfo::pcf("pcf sampler"))?;
        tracing::info!(scene = %name, "scene created");
        Ok(Self {
            name,
            registry: Registry::new(SceneId::next()),
            device,
            physics,
            library: None,
            shadows,
            light_buffer,
            pipelines,
            pcf_sampler,
            light_counts: LightCounts::default(),
            lights_stale: true,
        })
    }

    /// Library used to resolve model paths, including those read from files.
    pub fn set_model_library(&mut self, library: Arc<ModelLibrary>) {
        self.library = Some(library);
    }

    pub fn model_library(&self) -> Option<&Arc<ModelLibrary>> {
        self.library.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Identifies the current registry. Changes when a file is loaded.
    pub fn id(&self) -> SceneId {
        self.registry.scene()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn device(&self) -> &Arc<dyn GpuBackend> {
        &self.device
    }

    pub fn physics(&self) -> &dyn PhysicsBackend {
        self.physics.as_ref()
    }

    pub fn shadow_config(&self) -> ShadowConfig {
        self.shadows
    }

    pub fn light_buffer(&self) -> BufferId {
        self.light_buffer
    }

    pub fn pcf_sampler(&self) -> SamplerId {
        self.pcf_sampler
    }

    pub fn shadow_pipelines(&self) -> &ShadowPipelines {
        &self.pipelines
    }

    /// Lights packed by the last light pass.
    pub fn light_counts(&self) -> LightCounts {
        self.light_counts
    }

    // --- Entities ---

    pub fn create_entity(&mut self, name: &str) -> Entity {
        self.create_entity_with_id(name, EntityId::new())
    }

    /// Create an entity with a caller-chosen identity, as file loading does.
    pub fn create_entity_with_id(&mut self, name: &str, id: EntityId) -> Entity {
        spawn(&mut self.registry, name, id)
    }

    pub fn create_child_entity(&mut self, name: &str, parent: Entity) -> Result<Entity, SceneError> {
        self.check(parent)?;
        let child = self.create_entity(name);
        self.set_parent(child, Some(parent))?;
        Ok(child)
    }

    /// Destroy `entity` and, first, all of its descendants.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), SceneError> {
        self.check(entity)?;
        let children = self
            .registry
            .get::<Relationship>(entity)
            .map(|rc| rc.children.clone())
            .unwrap_or_default();
        for child in children {
            if self.registry.contains(child) {
                self.destroy_entity(child)?;
            }
        }

        self.unlink_from_parent(entity)?;
        self.release_entity_resources(entity);
        self.registry.destroy(entity)?;
        tracing::debug!(%entity, "entity destroyed");
        Ok(())
    }

    /// Move `child` under `parent`, or to the top level for `None`.
    ///
    /// Fails with `InvalidOperation` if `parent` is `child` or one of its
    /// descendants.
    pub fn set_parent(&mut self, child: Entity, parent: Option<Entity>) -> Result<(), SceneError> {
        self.check(child)?;
        if let Some(parent) = parent {
            self.check(parent)?;
            if self.is_ancestor_or_self(child, parent) {
                return Err(SceneError::InvalidOperation(format!(
                    "cannot parent {child} under its own descendant {parent}"
                )));
            }
        }

        self.unlink_from_parent(child)?;
        if !self.registry.has::<Relationship>(child) {
            self.registry.emplace(child, Relationship::default())?;
        }
        self.registry.get_mut::<Relationship>(child)?.parent = parent;
        if let Some(parent) = parent {
            if !self.registry.has::<Relationship>(parent) {
                self.registry.emplace(parent, Relationship::default())?;
            }
            self.registry
                .get_mut::<Relationship>(parent)?
                .children
                .push(child);
        }
        Ok(())
    }

    /// Whether `ancestor` is `entity` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: Entity, entity: Entity) -> bool {
        let mut current = Some(entity);
        let mut steps = 0usize;
        while let Some(e) = current {
            if e == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.registry.len() {
                tracing::warn!(%entity, "parent chain does not terminate");
                return false;
            }
            current = self
                .registry
                .get::<Relationship>(e)
                .ok()
                .and_then(|rc| rc.parent);
        }
        false
    }

    pub fn parent(&self, entity: Entity) -> Result<Option<Entity>, SceneError> {
        Ok(self.registry.get::<Relationship>(entity)?.parent)
    }

    pub fn children(&self, entity: Entity) -> Result<&[Entity], SceneError> {
        Ok(&self.registry.get::<Relationship>(entity)?.children)
    }

    /// Live entities that carry a tag, in registry order.
    pub fn entities(&self) -> Vec<Entity> {
        self.registry
            .entities()
            .filter(|e| self.registry.has::<Tag>(*e))
            .collect()
    }

    /// Call `f` once per tagged entity, in registry order.
    pub fn iterate(&self, mut f: impl FnMut(Entity)) {
        for entity in self.entities() {
            f(entity);
        }
    }

    /// Top-level entities, in registry order.
    pub fn roots(&self) -> Vec<Entity> {
        self.entities()
            .into_iter()
            .filter(|e| matches!(self.parent(*e), Ok(None)))
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.registry.contains(entity)
    }

    pub fn entity_id(&self, entity: Entity) -> Result<EntityId, SceneError> {
        Ok(self.registry.get::<Identity>(entity)?.id)
    }

    pub fn entity_name(&self, entity: Entity) -> Result<&str, SceneError> {
        Ok(&self.registry.get::<Tag>(entity)?.name)
    }

    pub fn find_by_id(&self, id: EntityId) -> Option<Entity> {
        find_by_id(&self.registry, id)
    }

    /// First entity with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<Entity> {
        self.registry
            .view::<Tag>()
            .find(|(_, tag)| tag.name == name)
            .map(|(e, _)| e)
    }

    // --- Components ---

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<&mut T, SceneError> {
        if let Some(mut old) = self.registry.remove::<T>(entity)? {
            self.release_component(entity, &mut old);
        }
        let added: &dyn Any = &value;
        if added.is::<Tag>() && is_light(&self.registry, entity) {
            // A retagged light rejoins the packed set.
            self.lights_stale = true;
        }
        if added.is::<CameraComponent>() {
            // The new camera only picks up its pose from a dirty transform.
            if let Ok(tc) = self.registry.get_mut::<Transform>(entity) {
                tc.dirty = true;
            }
        }
        Ok(self.registry.emplace(entity, value)?)
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T, SceneError> {
        Ok(self.registry.get::<T>(entity)?)
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, SceneError> {
        Ok(self.registry.get_mut::<T>(entity)?)
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.registry.has::<T>(entity)
    }

    /// Detach a component, releasing the GPU and physics objects it owns.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<Option<T>, SceneError> {
        let mut removed = self.registry.remove::<T>(entity)?;
        if let Some(component) = removed.as_mut() {
            self.release_component(entity, component);
        }
        Ok(removed)
    }

    /// Load the model at `path` through the scene's library and attach it.
    pub fn load_model(&mut self, entity: Entity, path: impl AsRef<Path>) -> Result<(), SceneError> {
        self.check(entity)?;
        let path = path.as_ref();
        let library = self.library.clone().ok_or_else(|| {
            SceneError::InvalidOperation("no model library attached to the scene".into())
        })?;
        if !path.exists() {
            return Err(AssetError::NotFound(path.to_path_buf()).into());
        }
        let model = library.load(path)?;
        self.add_component(entity, ModelComponent::loaded(path, model))?;
        Ok(())
    }

    /// Loaded models with an uploaded transform, in registry order.
    pub fn renderables(&self) -> Vec<Renderable> {
        let mut out = Vec::new();
        for entity in self.entities() {
            let Ok(mc) = self.registry.get::<ModelComponent>(entity) else {
                continue;
            };
            let Some(model) = mc.model.as_ref() else {
                continue;
            };
            let Ok(tc) = self.registry.get::<Transform>(entity) else {
                continue;
            };
            if tc.buffer.is_empty() {
                continue;
            }
            match self.device.device_address(tc.buffer) {
                Ok(transform_address) => out.push(Renderable {
                    entity,
                    model: model.clone(),
                    transform_address,
                }),
                Err(err) => tracing::warn!(%entity, %err, "transform buffer has no address"),
            }
        }
        out
    }

    pub fn light_gizmos(&self) -> Vec<LightGizmo> {
        let mut out = Vec::new();
        for entity in self.entities() {
            let Ok(tc) = self.registry.get::<Transform>(entity) else {
                continue;
            };
            let mut push = |kind, color| {
                out.push(LightGizmo {
                    entity,
                    kind,
                    position: tc.position,
                    color,
                })
            };
            if let Ok(light) = self.registry.get::<DirectionalLight>(entity) {
                push(LightKind::Directional, light.color);
            }
            if let Ok(light) = self.registry.get::<PointLight>(entity) {
                push(LightKind::Point, light.color);
            }
            if let Ok(light) = self.registry.get::<SpotLight>(entity) {
                push(LightKind::Spot, light.color);
            }
        }
        out
    }

    /// First entity carrying a camera, with its camera.
    pub fn primary_camera(&self) -> Option<(Entity, &CameraComponent)> {
        self.registry.view::<CameraComponent>().next()
    }

    /// Advance the simulation. Transforms follow on the next `update`.
    pub fn step_physics(&mut self, delta_time: f32) {
        self.physics.step(delta_time);
    }

    /// Drop every entity and the resources they own.
    pub fn reset(&mut self) {
        release_all(&mut self.registry, self.device.as_ref(), self.physics.as_mut());
        self.registry.clear();
        self.lights_stale = true;
        tracing::info!(scene = %self.name, "scene reset");
    }

    /// Swap in a fully built registry, releasing everything the old one owned.
    pub(crate) fn replace_registry(&mut self, registry: Registry) {
        release_all(&mut self.registry, self.device.as_ref(), self.physics.as_mut());
        self.registry = registry;
        self.lights_stale = true;
    }

    fn check(&self, entity: Entity) -> Result<(), SceneError> {
        if self.registry.contains(entity) {
            Ok(())
        } else {
            Err(SceneError::InvalidHandle(entity))
        }
    }

    fn unlink_from_parent(&mut self, entity: Entity) -> Result<(), SceneError> {
        let Ok(rc) = self.registry.get_mut::<Relationship>(entity) else {
            return Ok(());
        };
        let Some(parent) = rc.parent.take() else {
            return Ok(());
        };
        if let Ok(parent_rc) = self.registry.get_mut::<Relationship>(parent) {
            parent_rc.children.retain(|c| *c != entity);
        }
        Ok(())
    }

    fn release_entity_resources(&mut self, entity: Entity) {
        release_owned(&mut self.registry, entity, self.device.as_ref(), self.physics.as_mut());
        if is_light(&self.registry, entity) {
            self.lights_stale = true;
        }
    }

    fn release_component(&mut self, entity: Entity, component: &mut dyn Any) {
        let device = self.device.as_ref();
        if let Some(tc) = component.downcast_mut::<Transform>() {
            release_transform(device, tc);
            if is_light(&self.registry, entity) {
                self.lights_stale = true;
            }
        } else if component.is::<Tag>() {
            if is_light(&self.registry, entity) {
                self.lights_stale = true;
            }
        } else if let Some(rb) = component.downcast_mut::<RigidBody>() {
            release_body(self.physics.as_mut(), rb);
        } else if let Some(light) = component.downcast_mut::<DirectionalLight>() {
            release_shadow_images(device, &mut light.shadow_info);
            self.lights_stale = true;
        } else if let Some(light) = component.downcast_mut::<SpotLight>() {
            release_shadow_images(device, &mut light.shadow_info);
            self.lights_stale = true;
        } else if component.is::<PointLight>() {
            self.lights_stale = true;
        }
        tracing::trace!(%entity, "component released");
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        release_all(&mut self.registry, self.device.as_ref(), self.physics.as_mut());
        self.device.destroy_buffer_deferred(self.light_buffer);
        self.device.wait_idle();
        self.pipelines.destroy(self.device.as_ref());
        self.device.destroy_sampler(self.pcf_sampler);
        tracing::info!(scene = %self.name, "scene destroyed");
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("light_counts", &self.light_counts)
            .finish()
    }
}

/// Create an entity with the components every scene entity starts with.
pub(crate) fn spawn(registry: &mut Registry, name: &str, id: EntityId) -> Entity {
    let entity = registry.create();
    // A freshly created handle is always valid for its own registry.
    let _ = registry.emplace(entity, Identity { id });
    let _ = registry.emplace(entity, Tag::new(name));
    let _ = registry.emplace(entity, Relationship::default());
    entity
}

pub(crate) fn find_by_id(registry: &Registry, id: EntityId) -> Option<Entity> {
    registry
        .view::<Identity>()
        .find(|(_, identity)| identity.id == id)
        .map(|(e, _)| e)
}

fn is_light(registry: &Registry, entity: Entity) -> bool {
    registry.has::<DirectionalLight>(entity)
        || registry.has::<PointLight>(entity)
        || registry.has::<SpotLight>(entity)
}

fn release_all(registry: &mut Registry, device: &dyn GpuBackend, physics: &mut dyn PhysicsBackend) {
    let entities: Vec<Entity> = registry.entities().collect();
    for entity in entities {
        release_owned(registry, entity, device, physics);
    }
}

/// Release the GPU and physics objects owned by `entity`'s components and
/// clear the handles so a second release is a no-op.
fn release_owned(
    registry: &mut Registry,
    entity: Entity,
    device: &dyn GpuBackend,
    physics: &mut dyn PhysicsBackend,
) {
    if let Ok(tc) = registry.get_mut::<Transform>(entity) {
        release_transform(device, tc);
    }
    if let Ok(rb) = registry.get_mut::<RigidBody>(entity) {
        release_body(physics, rb);
    }
    if let Ok(light) = registry.get_mut::<DirectionalLight>(entity) {
        release_shadow_images(device, &mut light.shadow_info);
    }
    if let Ok(light) = registry.get_mut::<SpotLight>(entity) {
        release_shadow_images(device, &mut light.shadow_info);
    }
}

fn release_transform(device: &dyn GpuBackend, tc: &mut Transform) {
    if !tc.buffer.is_empty() {
        device.destroy_buffer_deferred(tc.buffer);
        tc.buffer = BufferId::EMPTY;
        tc.dirty = true;
    }
}

fn release_shadow_images(device: &dyn GpuBackend, shadow: &mut orrery_ecs::ShadowInfo) {
    for image in shadow.images() {
        device.destroy_image_deferred(image);
    }
    shadow.forget_images();
}

pub(crate) fn release_body(physics: &mut dyn PhysicsBackend, rb: &mut RigidBody) {
    if let Some(body) = rb.body.take() {
        if let Err(err) = physics.remove_from_world(body) {
            tracing::warn!(%err, "rigid body was not in the world");
        }
        physics.release_body(body);
    }
    if let Some(shape) = rb.shape.take() {
        physics.release_shape(shape);
    }
    if let Some(material) = rb.material.take() {
        physics.release_material(material);
    }
    rb.synced_pose = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scene;

    fn assert_links_consistent(scene: &Scene) {
        for entity in scene.entities() {
            for child in scene.children(entity).unwrap() {
                assert_eq!(scene.parent(*child).unwrap(), Some(entity));
            }
            if let Some(parent) = scene.parent(entity).unwrap() {
                assert!(scene.children(parent).unwrap().contains(&entity));
            }
        }
    }

    #[test]
    fn new_entity_has_base_components() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("pog");
        assert_eq!(scene.entity_name(e).unwrap(), "pog");
        assert!(scene.has_component::<Identity>(e));
        assert!(scene.has_component::<Relationship>(e));
        assert!(!scene.has_component::<Transform>(e));
        assert_eq!(scene.find_by_id(scene.entity_id(e).unwrap()), Some(e));
    }

    #[test]
    fn children_keep_creation_order() {
        let (_device, mut scene) = scene("test");
        let parent = scene.create_entity("parent");
        let a = scene.create_child_entity("a", parent).unwrap();
        let b = scene.create_child_entity("b", parent).unwrap();
        assert_eq!(scene.children(parent).unwrap(), &[a, b]);
        assert_eq!(scene.roots(), vec![parent]);
        assert_links_consistent(&scene);
    }

    #[test]
    fn destroy_cascades_to_descendants() {
        let (_device, mut scene) = scene("test");
        let root = scene.create_entity("root");
        let keep = scene.create_entity("keep");
        let child = scene.create_child_entity("child", root).unwrap();
        let grandchild = scene.create_child_entity("grandchild", child).unwrap();
        let other = scene.create_child_entity("other", keep).unwrap();

        scene.destroy_entity(child).unwrap();
        assert!(!scene.contains(child));
        assert!(!scene.contains(grandchild));
        assert!(scene.children(root).unwrap().is_empty());
        assert_eq!(scene.entity_count(), 3);

        scene.destroy_entity(root).unwrap();
        assert_eq!(scene.entities(), vec![keep, other]);
        assert_links_consistent(&scene);
    }

    #[test]
    fn destroying_twice_is_invalid_handle() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("e");
        scene.destroy_entity(e).unwrap();
        assert!(matches!(scene.destroy_entity(e), Err(SceneError::InvalidHandle(_))));
    }

    #[test]
    fn reparent_rejects_cycles() {
        let (_device, mut scene) = scene("test");
        let a = scene.create_entity("a");
        let b = scene.create_child_entity("b", a).unwrap();
        let c = scene.create_child_entity("c", b).unwrap();

        assert!(matches!(
            scene.set_parent(a, Some(c)),
            Err(SceneError::InvalidOperation(_))
        ));
        assert!(matches!(
            scene.set_parent(a, Some(a)),
            Err(SceneError::InvalidOperation(_))
        ));
        assert_eq!(scene.parent(a).unwrap(), None);

        scene.set_parent(c, Some(a)).unwrap();
        assert_eq!(scene.children(a).unwrap(), &[b, c]);
        assert!(scene.children(b).unwrap().is_empty());
        scene.set_parent(c, None).unwrap();
        assert_eq!(scene.parent(c).unwrap(), None);
        assert_links_consistent(&scene);
    }

    #[test]
    fn untagged_entities_are_not_iterated() {
        let (_device, mut scene) = scene("test");
        let a = scene.create_entity("a");
        let b = scene.create_entity("b");
        scene.remove_component::<Tag>(b).unwrap();
        let mut seen = Vec::new();
        scene.iterate(|e| seen.push(e));
        assert_eq!(seen, vec![a]);
        assert_eq!(scene.entity_count(), 2);
    }

    #[test]
    fn missing_component_is_not_found() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("e");
        assert!(matches!(
            scene.get_component::<Transform>(e),
            Err(SceneError::NotFound { component: "Transform", .. })
        ));
    }

    #[test]
    fn removing_transform_releases_buffer() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("e");
        scene.add_component(e, Transform::default()).unwrap();
        scene.update().unwrap();
        let buffer = scene.get_component::<Transform>(e).unwrap().buffer;
        assert!(device.is_buffer_alive(buffer));

        scene.remove_component::<Transform>(e).unwrap();
        device.wait_idle();
        assert!(!device.is_buffer_alive(buffer));
    }

    #[test]
    fn load_model_without_library_is_invalid() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("e");
        assert!(matches!(
            scene.load_model(e, "missing.gltf"),
            Err(SceneError::InvalidOperation(_))
        ));
    }

    #[test]
    fn drop_releases_scene_resources() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("e");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, SpotLight::default()).unwrap();
        scene.update().unwrap();
        assert!(device.live_images() >= 3);

        drop(scene);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_samplers(), 0);
        assert!(device.violations().is_empty());
    }
}
