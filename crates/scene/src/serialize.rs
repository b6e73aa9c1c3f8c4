//! YAML scene documents.
//!
//! ```yaml
//! Scene: Test
//! Entities:
//!   - Entity: 8129481230918
//!     TagComponent:
//!       Tag: pog
//!     RelationshipComponent:
//!       Parent: 0
//!       Children: [2093810923, 120398123]
//!     TransformComponent:
//!       Position: [1.0, 2.0, 3.0]
//!       Rotation: [80.0, 60.0, 20.0]
//!       Scale: [1.0, 1.0, 1.0]
//! ```
//!
//! Loading parses into a fresh registry in two passes (entities and plain
//! components first, parent and child links second) and only replaces the
//! scene contents once the whole document resolved.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use orrery_assets::ModelLibrary;
use orrery_common::{EntityId, ShadowConfig};
use orrery_ecs::{
    CameraComponent, DirectionalLight, Entity, GeometryKind, Identity, ModelComponent, PointLight,
    Registry, Relationship, RigidBody, SceneId, SpotLight, Tag, Transform,
};
use orrery_physics::BodyType;

use crate::kinds::ComponentKind;
use crate::scene::{find_by_id, spawn};
use crate::{Scene, SceneError};

#[derive(Debug, Serialize, Deserialize)]
struct SceneDoc {
    #[serde(rename = "Scene")]
    name: Option<String>,
    #[serde(rename = "Entities", default, skip_serializing_if = "Option::is_none")]
    entities: Option<Vec<EntityDoc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct EntityDoc {
    #[serde(rename = "Entity")]
    id: u64,
    #[serde(rename = "TagComponent", skip_serializing_if = "Option::is_none")]
    tag: Option<TagDoc>,
    #[serde(rename = "RelationshipComponent", skip_serializing_if = "Option::is_none")]
    relationship: Option<RelationshipDoc>,
    #[serde(rename = "TransformComponent", skip_serializing_if = "Option::is_none")]
    transform: Option<TransformDoc>,
    #[serde(rename = "CameraComponent", skip_serializing_if = "Option::is_none")]
    camera: Option<CameraDoc>,
    #[serde(rename = "ModelComponent", skip_serializing_if = "Option::is_none")]
    model: Option<ModelDoc>,
    #[serde(rename = "DirectionalLightComponent", skip_serializing_if = "Option::is_none")]
    directional_light: Option<LightDoc>,
    #[serde(rename = "PointLightComponent", skip_serializing_if = "Option::is_none")]
    point_light: Option<LightDoc>,
    #[serde(rename = "SpotLightComponent", skip_serializing_if = "Option::is_none")]
    spot_light: Option<SpotLightDoc>,
    #[serde(rename = "RigidBodyComponent", skip_serializing_if = "Option::is_none")]
    rigid_body: Option<RigidBodyDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TagDoc {
    #[serde(rename = "Tag")]
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RelationshipDoc {
    parent: u64,
    children: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TransformDoc {
    position: [f32; 3],
    rotation: [f32; 3],
    scale: [f32; 3],
}

#[derive(Debug, Serialize, Deserialize)]
struct CameraDoc {
    #[serde(rename = "FOV")]
    fov: f32,
    #[serde(rename = "Aspect")]
    aspect: f32,
    #[serde(rename = "NearPlane")]
    near_plane: f32,
    #[serde(rename = "FarPlane")]
    far_plane: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelDoc {
    #[serde(rename = "Filepath")]
    file_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LightDoc {
    color: [f32; 3],
    intensity: f32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpotLightDoc {
    color: [f32; 3],
    intensity: f32,
    cut_off: f32,
    outer_cut_off: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BodyTypeDoc {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GeometryDoc {
    Sphere,
    Capsule,
    Box,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RigidBodyDoc {
    #[serde(rename = "Type")]
    body_type: BodyTypeDoc,
    geometry: GeometryDoc,
    radius: f32,
    half_height: f32,
    half_extent: [f32; 3],
    density: f32,
    static_friction: f32,
    dynamic_friction: f32,
    restitution: f32,
}

/// What component loaders need besides the document.
struct LoadContext<'a> {
    shadows: ShadowConfig,
    library: Option<&'a Arc<ModelLibrary>>,
}

impl ComponentKind {
    /// Copy this kind's component of `entity` into `doc`.
    fn save(self, registry: &Registry, entity: Entity, doc: &mut EntityDoc) {
        match self {
            Self::Tag => {
                doc.tag = registry.get::<Tag>(entity).ok().map(|t| TagDoc {
                    name: t.name.clone(),
                });
            }
            Self::Relationship => {
                doc.relationship = registry.get::<Relationship>(entity).ok().map(|rc| {
                    RelationshipDoc {
                        parent: rc.parent.map_or(0, |p| identity_of(registry, p)),
                        children: rc.children.iter().map(|c| identity_of(registry, *c)).collect(),
                    }
                });
            }
            Self::Transform => {
                doc.transform = registry.get::<Transform>(entity).ok().map(|tc| TransformDoc {
                    position: tc.position.to_array(),
                    rotation: tc.rotation.to_array(),
                    scale: tc.scale.to_array(),
                });
            }
            Self::Camera => {
                doc.camera = registry.get::<CameraComponent>(entity).ok().map(|cc| CameraDoc {
                    fov: cc.camera.fov,
                    aspect: cc.camera.aspect,
                    near_plane: cc.camera.near_clip,
                    far_plane: cc.camera.far_clip,
                });
            }
            Self::Model => {
                doc.model = registry.get::<ModelComponent>(entity).ok().map(|mc| ModelDoc {
                    file_path: mc.file_path.clone(),
                });
            }
            Self::DirectionalLight => {
                doc.directional_light =
                    registry.get::<DirectionalLight>(entity).ok().map(|l| LightDoc {
                        color: l.color.to_array(),
                        intensity: l.intensity,
                    });
            }
            Self::PointLight => {
                doc.point_light = registry.get::<PointLight>(entity).ok().map(|l| LightDoc {
                    color: l.color.to_array(),
                    intensity: l.intensity,
                });
            }
            Self::SpotLight => {
                doc.spot_light = registry.get::<SpotLight>(entity).ok().map(|l| SpotLightDoc {
                    color: l.color.to_array(),
                    intensity: l.intensity,
                    cut_off: l.cut_off,
                    outer_cut_off: l.outer_cut_off,
                });
            }
            Self::RigidBody => {
                doc.rigid_body = registry.get::<RigidBody>(entity).ok().map(rigid_body_doc);
            }
        }
    }

    /// Attach this kind's component from `doc` to `entity`. Tag and
    /// relationship are handled by the loader passes.
    fn load(
        self,
        doc: &EntityDoc,
        registry: &mut Registry,
        entity: Entity,
        ctx: &LoadContext<'_>,
    ) -> Result<(), SceneError> {
        match self {
            Self::Tag | Self::Relationship => {}
            Self::Transform => {
                if let Some(t) = &doc.transform {
                    let tc = Transform::new(
                        Vec3::from_array(t.position),
                        Vec3::from_array(t.rotation),
                        Vec3::from_array(t.scale),
                    );
                    registry.emplace(entity, tc)?;
                }
            }
            Self::Camera => {
                if let Some(c) = &doc.camera {
                    let mut cc = CameraComponent::default();
                    cc.camera.fov = c.fov;
                    cc.camera.aspect = c.aspect;
                    cc.camera.near_clip = c.near_plane;
                    cc.camera.far_clip = c.far_plane;
                    registry.emplace(entity, cc)?;
                }
            }
            Self::Model => {
                if let Some(m) = &doc.model {
                    registry.emplace(entity, load_model(&m.file_path, ctx)?)?;
                }
            }
            Self::DirectionalLight => {
                if let Some(l) = &doc.directional_light {
                    let shadows = ctx.shadows;
                    let mut light = DirectionalLight::with_shadow(
                        shadows.directional_size,
                        shadows.directional_clip_space,
                    );
                    light.color = Vec3::from_array(l.color);
                    light.intensity = l.intensity;
                    registry.emplace(entity, light)?;
                }
            }
            Self::PointLight => {
                if let Some(l) = &doc.point_light {
                    let light = PointLight {
                        color: Vec3::from_array(l.color),
                        intensity: l.intensity,
                        ..Default::default()
                    };
                    registry.emplace(entity, light)?;
                }
            }
            Self::SpotLight => {
                if let Some(l) = &doc.spot_light {
                    let shadows = ctx.shadows;
                    let mut light =
                        SpotLight::with_shadow(shadows.spot_size, shadows.spot_clip_space);
                    light.color = Vec3::from_array(l.color);
                    light.intensity = l.intensity;
                    light.cut_off = l.cut_off;
                    light.outer_cut_off = l.outer_cut_off;
                    registry.emplace(entity, light)?;
                }
            }
            Self::RigidBody => {
                if let Some(rb) = &doc.rigid_body {
                    registry.emplace(entity, rigid_body_from_doc(rb))?;
                }
            }
        }
        Ok(())
    }
}

impl Scene {
    pub fn serialize_to_string(&self) -> Result<String, SceneError> {
        let entities = self
            .entities()
            .into_iter()
            .map(|entity| {
                let mut doc = EntityDoc {
                    id: identity_of(&self.registry, entity),
                    ..Default::default()
                };
                for kind in ComponentKind::ALL {
                    kind.save(&self.registry, entity, &mut doc);
                }
                doc
            })
            .collect();
        let doc = SceneDoc {
            name: Some(self.name.clone()),
            entities: Some(entities),
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        std::fs::write(path, self.serialize_to_string()?)?;
        tracing::info!(scene = %self.name, path = %path.display(), "scene saved");
        Ok(())
    }

    /// Replace the scene contents with the document in `text`. On error the
    /// scene is left untouched.
    pub fn deserialize_str(&mut self, text: &str) -> Result<(), SceneError> {
        let doc: SceneDoc =
            serde_yaml::from_str(text).map_err(|err| SceneError::CorruptFile(err.to_string()))?;
        let name = doc
            .name
            .ok_or_else(|| SceneError::CorruptFile("missing top-level `Scene` key".into()))?;
        let entities = doc.entities.unwrap_or_default();

        let ctx = LoadContext {
            shadows: self.shadows,
            library: self.library.as_ref(),
        };
        let registry = build_registry(&entities, &ctx)?;
        let count = registry.len();
        self.replace_registry(registry);
        self.name = name;
        tracing::info!(scene = %self.name, entities = count, "scene loaded");
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        self.deserialize_str(&text)
    }
}

fn build_registry(entities: &[EntityDoc], ctx: &LoadContext<'_>) -> Result<Registry, SceneError> {
    let mut registry = Registry::new(SceneId::next());
    let mut seen = HashSet::with_capacity(entities.len());

    for doc in entities {
        let id = EntityId::from_raw(doc.id)
            .ok_or_else(|| SceneError::CorruptFile("entity without an `Entity` id".into()))?;
        if !seen.insert(id) {
            return Err(SceneError::CorruptFile(format!("duplicate entity id {}", doc.id)));
        }
        let name = doc.tag.as_ref().map_or(Tag::DEFAULT_NAME, |t| t.name.as_str());
        let entity = spawn(&mut registry, name, id);
        for kind in ComponentKind::ALL {
            kind.load(doc, &mut registry, entity, ctx)?;
        }
    }

    for doc in entities {
        let Some(rel) = &doc.relationship else {
            continue;
        };
        let entity = resolve(&registry, doc.id)?;
        let parent = match rel.parent {
            0 => None,
            id => Some(resolve(&registry, id)?),
        };
        let children = rel
            .children
            .iter()
            .map(|id| resolve(&registry, *id))
            .collect::<Result<Vec<_>, _>>()?;
        let rc = registry.get_mut::<Relationship>(entity)?;
        rc.parent = parent;
        rc.children = children;
    }

    validate_hierarchy(&registry)?;
    Ok(registry)
}

fn resolve(registry: &Registry, raw: u64) -> Result<Entity, SceneError> {
    EntityId::from_raw(raw)
        .and_then(|id| find_by_id(registry, id))
        .ok_or_else(|| SceneError::CorruptFile(format!("unknown entity id {raw}")))
}

/// Parent and child lists must agree, and following parents must end at a
/// root.
fn validate_hierarchy(registry: &Registry) -> Result<(), SceneError> {
    for (entity, rc) in registry.view::<Relationship>() {
        for child in &rc.children {
            let parent = registry.get::<Relationship>(*child)?.parent;
            if parent != Some(entity) {
                return Err(SceneError::CorruptFile(format!(
                    "{} lists {} as a child but its parent differs",
                    identity_of(registry, entity),
                    identity_of(registry, *child)
                )));
            }
        }
        if let Some(parent) = rc.parent {
            if !registry.get::<Relationship>(parent)?.children.contains(&entity) {
                return Err(SceneError::CorruptFile(format!(
                    "{} is missing from the children of its parent",
                    identity_of(registry, entity)
                )));
            }
        }

        let mut cursor = rc.parent;
        let mut steps = 0;
        while let Some(ancestor) = cursor {
            steps += 1;
            if ancestor == entity || steps > registry.len() {
                return Err(SceneError::CorruptFile(format!(
                    "parent cycle through entity {}",
                    identity_of(registry, entity)
                )));
            }
            cursor = registry.get::<Relationship>(ancestor)?.parent;
        }
    }
    Ok(())
}

fn load_model(path: &Path, ctx: &LoadContext<'_>) -> Result<ModelComponent, SceneError> {
    let Some(library) = ctx.library else {
        tracing::debug!(path = %path.display(), "no model library, model left unloaded");
        return Ok(ModelComponent::new(path));
    };
    if !path.exists() {
        tracing::warn!(path = %path.display(), "model file not found, model left unloaded");
        return Ok(ModelComponent::new(path));
    }
    let model = library.load(path)?;
    Ok(ModelComponent::loaded(path, model))
}

fn identity_of(registry: &Registry, entity: Entity) -> u64 {
    registry.get::<Identity>(entity).map_or(0, |i| i.id.raw())
}

fn rigid_body_doc(rb: &RigidBody) -> RigidBodyDoc {
    RigidBodyDoc {
        body_type: match rb.body_type {
            BodyType::Static => BodyTypeDoc::Static,
            BodyType::Dynamic => BodyTypeDoc::Dynamic,
        },
        geometry: match rb.geometry_kind {
            GeometryKind::Sphere => GeometryDoc::Sphere,
            GeometryKind::Capsule => GeometryDoc::Capsule,
            GeometryKind::Box => GeometryDoc::Box,
        },
        radius: rb.radius,
        half_height: rb.half_height,
        half_extent: rb.half_extent.to_array(),
        density: rb.density,
        static_friction: rb.static_friction,
        dynamic_friction: rb.dynamic_friction,
        restitution: rb.restitution,
    }
}

fn rigid_body_from_doc(doc: &RigidBodyDoc) -> RigidBody {
    RigidBody {
        body_type: match doc.body_type {
            BodyTypeDoc::Static => BodyType::Static,
            BodyTypeDoc::Dynamic => BodyType::Dynamic,
        },
        geometry_kind: match doc.geometry {
            GeometryDoc::Sphere => GeometryKind::Sphere,
            GeometryDoc::Capsule => GeometryKind::Capsule,
            GeometryDoc::Box => GeometryKind::Box,
        },
        radius: doc.radius,
        half_height: doc.half_height,
        half_extent: Vec3::from_array(doc.half_extent),
        density: doc.density,
        static_friction: doc.static_friction,
        dynamic_friction: doc.dynamic_friction,
        restitution: doc.restitution,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scene;

    #[test]
    fn missing_scene_key_is_corrupt() {
        let (_device, mut scene) = scene("test");
        let err = scene.deserialize_str("Entities: []\n").unwrap_err();
        assert!(matches!(err, SceneError::CorruptFile(_)));
    }

    #[test]
    fn garbage_is_corrupt() {
        let (_device, mut scene) = scene("test");
        assert!(matches!(
            scene.deserialize_str("- just\n- a list\n"),
            Err(SceneError::CorruptFile(_))
        ));
    }

    #[test]
    fn empty_scene_loads() {
        let (_device, mut scene) = scene("old");
        scene.create_entity("gone");
        scene.deserialize_str("Scene: fresh\n").unwrap();
        assert_eq!(scene.name(), "fresh");
        assert_eq!(scene.entity_count(), 0);
    }

    #[test]
    fn document_uses_component_keys() {
        let (_device, mut scene) = scene("Test");
        let e = scene.create_entity("sun");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, DirectionalLight::default()).unwrap();
        let text = scene.serialize_to_string().unwrap();
        assert!(text.starts_with("Scene: Test"));
        for key in ["Entity:", "TagComponent", "Tag: sun", "TransformComponent", "Position:"] {
            assert!(text.contains(key), "{key} missing from\n{text}");
        }
        assert!(text.contains("DirectionalLightComponent"));
        assert!(!text.contains("SpotLightComponent"));
    }

    #[test]
    fn unknown_child_is_corrupt_and_scene_is_kept() {
        let (_device, mut scene) = scene("kept");
        let keep = scene.create_entity("keep");
        let text = "Scene: broken\nEntities:\n  - Entity: 5\n    TagComponent:\n      Tag: a\n    RelationshipComponent:\n      Parent: 0\n      Children: [99]\n";
        assert!(matches!(scene.deserialize_str(text), Err(SceneError::CorruptFile(_))));
        assert_eq!(scene.name(), "kept");
        assert!(scene.contains(keep));
    }

    #[test]
    fn disagreeing_links_are_corrupt() {
        let (_device, mut scene) = scene("test");
        let text = "Scene: s\nEntities:\n  - Entity: 1\n    RelationshipComponent:\n      Parent: 0\n      Children: [2]\n  - Entity: 2\n    RelationshipComponent:\n      Parent: 0\n      Children: []\n";
        assert!(matches!(scene.deserialize_str(text), Err(SceneError::CorruptFile(_))));
    }

    #[test]
    fn parent_cycle_is_corrupt() {
        let (_device, mut scene) = scene("test");
        let text = "Scene: s\nEntities:\n  - Entity: 1\n    RelationshipComponent:\n      Parent: 2\n      Children: [2]\n  - Entity: 2\n    RelationshipComponent:\n      Parent: 1\n      Children: [1]\n";
        assert!(matches!(scene.deserialize_str(text), Err(SceneError::CorruptFile(_))));
    }

    #[test]
    fn duplicate_ids_are_corrupt() {
        let (_device, mut scene) = scene("test");
        let text = "Scene: s\nEntities:\n  - Entity: 1\n  - Entity: 1\n";
        assert!(matches!(scene.deserialize_str(text), Err(SceneError::CorruptFile(_))));
    }

    #[test]
    fn missing_model_file_stays_unloaded() {
        let (_device, mut scene) = scene("test");
        let text = "Scene: s\nEntities:\n  - Entity: 1\n    TagComponent:\n      Tag: ship\n    ModelComponent:\n      Filepath: does/not/exist.gltf\n";
        scene.deserialize_str(text).unwrap();
        let ship = scene.find_by_name("ship").unwrap();
        let mc = scene.get_component::<ModelComponent>(ship).unwrap();
        assert_eq!(mc.file_path, PathBuf::from("does/not/exist.gltf"));
        assert!(mc.model.is_none());
    }

    #[test]
    fn lights_take_configured_shadow_sizes() {
        let (_device, mut scene) = scene("test");
        let text = "Scene: s\nEntities:\n  - Entity: 1\n    SpotLightComponent:\n      Color: [1.0, 0.5, 0.0]\n      Intensity: 2.0\n      CutOff: 10.0\n      OuterCutOff: 15.0\n";
        scene.deserialize_str(text).unwrap();
        let e = scene.find_by_id(EntityId::from_raw(1).unwrap()).unwrap();
        let light = scene.get_component::<SpotLight>(e).unwrap();
        assert_eq!(light.shadow_info.image_size.x, scene.shadow_config().spot_size);
        assert_eq!(light.outer_cut_off, 15.0);
        assert_eq!(light.color, Vec3::new(1.0, 0.5, 0.0));
        assert!(light.dirty);
    }
}
