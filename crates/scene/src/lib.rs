//! Scene lifecycle and the per-frame update pass.
//!
//! A [`Scene`] owns the component registry, the physics world, the packed
//! light buffer and the shadow pipelines. [`Scene::update`] brings every
//! piece of derived state up to date in a fixed order:
//!
//! 1. physics sync: rebuild dirty rigid bodies, push edited transforms into
//!    the simulation, pull simulated poses back into transforms;
//! 2. light collection, when a light or a light-bearing transform changed;
//! 3. matrices and transform buffers of dirty transforms.
//!
//! Shadow maps are rendered by [`Scene::record_shadow_passes`], which the
//! render driver calls once per frame.
//!
//! # Invariants
//! - `b` is in `a`'s children exactly when `b`'s parent is `a`, and the
//!   parent graph is acyclic.
//! - After `update` returns `Ok`, no transform, camera or light is dirty.
//! - Entity-owned GPU resources are released through deferred destruction,
//!   never while a submitted command list may still reference them.
//! - A failed load leaves the scene as it was.

mod kinds;
mod lights;
mod scene;
mod serialize;
mod shadow;
mod update;

use orrery_assets::AssetError;
use orrery_ecs::{EcsError, Entity};
use orrery_gpu::GpuError;
use orrery_physics::PhysicsError;

pub use kinds::{ComponentKind, Property};
pub use lights::{
    DirectionalLightData, LightBuffer, LightCounts, MAX_DIRECTIONAL_LIGHTS, MAX_POINT_LIGHTS,
    MAX_SPOT_LIGHTS, PointLightData, SpotLightData,
};
pub use scene::{LightGizmo, LightKind, Renderable, Scene};
pub use shadow::{GaussPush, ShadowPipelines, ShadowPush};
pub use update::UpdateReport;

/// Errors from scene operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("entity {entity} has no {component} component")]
    NotFound {
        component: &'static str,
        entity: Entity,
    },
    #[error("invalid entity handle {0}")]
    InvalidHandle(Entity),
    #[error("corrupt scene file: {0}")]
    CorruptFile(String),
    #[error("too many {kind} lights, capacity is {capacity}")]
    ResourceExhausted { kind: &'static str, capacity: usize },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("physics error: {0}")]
    Physics(#[from] PhysicsError),
    #[error("asset error: {0}")]
    Asset(#[from] AssetError),
    #[error("scene encode error: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EcsError> for SceneError {
    fn from(err: EcsError) -> Self {
        match err {
            EcsError::NotFound { component, entity } => Self::NotFound { component, entity },
            EcsError::InvalidHandle(entity) => Self::InvalidHandle(entity),
        }
    }
}

pub fn crate_info() -> &'static str {
    "orrery-scene v0.1.0"
}
