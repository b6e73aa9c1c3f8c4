use glam::{Quat, Vec3};
use slotmap::new_key_type;

new_key_type! {
    pub struct MaterialHandle;
    pub struct ShapeHandle;
    pub struct BodyHandle;
}

#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("unknown rigid body {0:?}")]
    UnknownBody(BodyHandle),
    #[error("unknown shape {0:?}")]
    UnknownShape(ShapeHandle),
    #[error("unknown material {0:?}")]
    UnknownMaterial(MaterialHandle),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BodyType {
    #[default]
    Static,
    Dynamic,
}

/// Collision geometry, sizes in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    Sphere { radius: f32 },
    Capsule { radius: f32, half_height: f32 },
    Box { half_extent: Vec3 },
}

impl Geometry {
    pub fn volume(&self) -> f32 {
        use std::f32::consts::PI;
        match *self {
            Self::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Self::Capsule {
                radius,
                half_height,
            } => PI * radius * radius * 2.0 * half_height + 4.0 / 3.0 * PI * radius.powi(3),
            Self::Box { half_extent } => 8.0 * half_extent.x * half_extent.y * half_extent.z,
        }
    }

    pub fn validate(&self) -> Result<(), PhysicsError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let ok = match *self {
            Self::Sphere { radius } => positive(radius),
            Self::Capsule {
                radius,
                half_height,
            } => positive(radius) && positive(half_height),
            Self::Box { half_extent } => half_extent.to_array().into_iter().all(positive),
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidGeometry(format!("{self:?}")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialDesc {
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
}

/// World-space position and orientation of a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Operations the scene performs on the physics engine.
pub trait PhysicsBackend: Send {
    fn create_material(&mut self, desc: MaterialDesc) -> Result<MaterialHandle, PhysicsError>;
    fn create_shape(
        &mut self,
        geometry: Geometry,
        material: MaterialHandle,
    ) -> Result<ShapeHandle, PhysicsError>;
    fn create_rigid_body(&mut self, body_type: BodyType, pose: Pose)
    -> Result<BodyHandle, PhysicsError>;
    fn attach_shape(&mut self, body: BodyHandle, shape: ShapeHandle) -> Result<(), PhysicsError>;
    /// Derive mass from the attached shapes. Only meaningful for dynamic bodies.
    fn update_mass_and_inertia(&mut self, body: BodyHandle, density: f32)
    -> Result<(), PhysicsError>;

    fn set_global_pose(&mut self, body: BodyHandle, pose: Pose) -> Result<(), PhysicsError>;
    fn global_pose(&self, body: BodyHandle) -> Result<Pose, PhysicsError>;

    fn add_to_world(&mut self, body: BodyHandle) -> Result<(), PhysicsError>;
    fn remove_from_world(&mut self, body: BodyHandle) -> Result<(), PhysicsError>;

    fn release_body(&mut self, body: BodyHandle);
    fn release_shape(&mut self, shape: ShapeHandle);
    fn release_material(&mut self, material: MaterialHandle);

    /// Advance every body in the world by `delta_time` seconds.
    fn step(&mut self, delta_time: f32);
    fn gravity(&self) -> Vec3;
    fn set_gravity(&mut self, gravity: Vec3);
}
