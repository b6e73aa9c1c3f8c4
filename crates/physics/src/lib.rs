//! Physics collaborator.
//!
//! The scene drives rigid bodies through [`PhysicsBackend`] only. Handles are
//! generational keys, so a released handle never aliases a newer object.
//! [`SimplePhysics`] is the built-in backend: gravity on dynamic bodies,
//! no collision response.

mod backend;
mod simple;

pub use backend::{
    BodyHandle, BodyType, Geometry, MaterialDesc, MaterialHandle, PhysicsBackend, PhysicsError,
    Pose, ShapeHandle,
};
pub use simple::SimplePhysics;

pub fn crate_info() -> &'static str {
    "orrery-physics v0.1.0"
}
