//! Entity handles, the component registry and the scene's component types.
//!
//! # Invariants
//! - A handle is only honored by the registry of the scene that issued it,
//!   and only while its slot generation matches.
//! - Destroying an entity drops every component attached to it.
//! - Component access on a missing component fails with `NotFound`; callers
//!   that want a cheap probe use `Registry::has`.

mod camera;
pub mod components;
mod entity;
mod registry;

pub use camera::Camera3D;
pub use components::{
    CameraComponent, DirectionalLight, GeometryKind, Identity, ModelComponent, PointLight,
    Relationship, RigidBody, ShadowInfo, SpotLight, Tag, Transform, TransformInfo,
};
pub use entity::{Entity, EntityKey, SceneId};
pub use registry::{Component, Registry};

/// Registry access errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    #[error("entity {entity} has no {component} component")]
    NotFound {
        component: &'static str,
        entity: Entity,
    },
    #[error("invalid entity handle {0}")]
    InvalidHandle(Entity),
}

pub fn crate_info() -> &'static str {
    "orrery-ecs v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("ecs"));
    }

    #[test]
    fn error_messages_name_the_component() {
        let mut registry = Registry::new(SceneId::next());
        let entity = registry.create();
        let err = registry.get::<Tag>(entity).unwrap_err();
        assert!(err.to_string().contains("Tag"));
    }
}
