//! Component data attached to scene entities.
//!
//! Components are plain data. Derived state (matrices, GPU copies, physics
//! objects) is refreshed by the scene update pass whenever the owning
//! component's `dirty` flag is set, so every edit path must raise the flag.

use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Quat, UVec2, Vec3};
use std::path::PathBuf;
use std::sync::Arc;

use orrery_assets::Model;
use orrery_common::EntityId;
use orrery_gpu::{BufferId, ImageId};
use orrery_physics::{BodyHandle, BodyType, Geometry, MaterialDesc, MaterialHandle, Pose, ShapeHandle};

use crate::camera::Camera3D;
use crate::entity::Entity;

/// Stable identity, never changed after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub const DEFAULT_NAME: &'static str = "Empty Entity";

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }
}

/// Editor hierarchy links. If `a` is listed in `b.children` then
/// `a.parent == Some(b)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationship {
    pub parent: Option<Entity>,
    pub children: Vec<Entity>,
}

/// Model and normal matrix in the layout the geometry shaders read.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformInfo {
    pub model_matrix: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
}

/// Position, Euler rotation in degrees and scale, plus the derived matrices.
///
/// Matrices are local: the hierarchy is an editor concept and parents do not
/// contribute to a child's model matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    pub model_matrix: Mat4,
    pub normal_matrix: Mat4,
    pub dirty: bool,
    /// Device copy of [`TransformInfo`], created on the first update.
    pub buffer: BufferId,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            model_matrix: Mat4::IDENTITY,
            normal_matrix: Mat4::IDENTITY,
            dirty: true,
            buffer: BufferId::EMPTY,
        }
    }
}

impl Transform {
    pub fn new(position: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
            ..Default::default()
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
        self.dirty = true;
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    /// Orientation from the Euler angles: X applied first, then Y, then Z.
    pub fn rotation_quat(&self) -> Quat {
        euler_degrees_to_quat(self.rotation)
    }

    /// `T(position) * R(rotation) * S(scale)`.
    pub fn compute_model_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_quat(self.rotation_quat())
            * Mat4::from_scale(self.scale)
    }

    /// Refresh both matrices and clear the dirty flag.
    pub fn update_matrices(&mut self) {
        self.model_matrix = self.compute_model_matrix();
        self.normal_matrix = self.model_matrix.inverse().transpose();
        self.dirty = false;
    }

    /// Facing of a light or camera mounted on this transform: `-Y` rotated
    /// by the orientation.
    pub fn direction(&self) -> Vec3 {
        self.rotation_quat() * Vec3::NEG_Y
    }

    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: self.rotation_quat(),
        }
    }

    /// Adopt a simulated pose and mark the transform for upload.
    pub fn apply_pose(&mut self, pose: Pose) {
        self.position = pose.position;
        self.rotation = quat_to_euler_degrees(pose.rotation);
        self.dirty = true;
    }

    pub fn gpu_info(&self) -> TransformInfo {
        TransformInfo {
            model_matrix: self.model_matrix.to_cols_array_2d(),
            normal_matrix: self.normal_matrix.to_cols_array_2d(),
        }
    }
}

/// Euler degrees (x, y, z) to a quaternion equal to `qz * qy * qx`.
pub fn euler_degrees_to_quat(degrees: Vec3) -> Quat {
    let r = degrees * (std::f32::consts::PI / 180.0);
    Quat::from_euler(EulerRot::ZYX, r.z, r.y, r.x)
}

pub fn quat_to_euler_degrees(rotation: Quat) -> Vec3 {
    let (z, y, x) = rotation.to_euler(EulerRot::ZYX);
    Vec3::new(x, y, z) * (180.0 / std::f32::consts::PI)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraComponent {
    pub camera: Camera3D,
    pub dirty: bool,
}

impl Default for CameraComponent {
    fn default() -> Self {
        Self {
            camera: Camera3D::default(),
            dirty: true,
        }
    }
}

/// Mesh reference. `model` is `None` until the file has been loaded.
#[derive(Debug, Clone, Default)]
pub struct ModelComponent {
    pub file_path: PathBuf,
    pub model: Option<Arc<Model>>,
}

impl ModelComponent {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            model: None,
        }
    }

    pub fn loaded(file_path: impl Into<PathBuf>, model: Arc<Model>) -> Self {
        Self {
            file_path: file_path.into(),
            model: Some(model),
        }
    }
}

/// Shadow caster state. Images are created lazily by the light pass and
/// released with the owning light.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowInfo {
    pub view: Mat4,
    pub projection: Mat4,
    pub image_size: UVec2,
    /// Half extent of the light frustum: ortho box for directional lights,
    /// far plane for spot lights.
    pub clip_space: f32,
    pub depth_image: ImageId,
    pub shadow_image: ImageId,
    pub temp_shadow_image: ImageId,
}

impl ShadowInfo {
    pub fn new(size: u32, clip_space: f32) -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            image_size: UVec2::splat(size),
            clip_space,
            depth_image: ImageId::EMPTY,
            shadow_image: ImageId::EMPTY,
            temp_shadow_image: ImageId::EMPTY,
        }
    }

    pub fn light_matrix(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Non-empty image handles, for release.
    pub fn images(&self) -> impl Iterator<Item = ImageId> {
        [self.depth_image, self.shadow_image, self.temp_shadow_image]
            .into_iter()
            .filter(|image| !image.is_empty())
    }

    pub fn forget_images(&mut self) {
        self.depth_image = ImageId::EMPTY;
        self.shadow_image = ImageId::EMPTY;
        self.temp_shadow_image = ImageId::EMPTY;
    }
}

pub const DIRECTIONAL_SHADOW_SIZE: u32 = 2048;
pub const DIRECTIONAL_CLIP_SPACE: f32 = 20.0;
pub const SPOT_SHADOW_SIZE: u32 = 1024;
pub const SPOT_CLIP_SPACE: f32 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    pub shadow_info: ShadowInfo,
    pub dirty: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::with_shadow(DIRECTIONAL_SHADOW_SIZE, DIRECTIONAL_CLIP_SPACE)
    }
}

impl DirectionalLight {
    pub fn with_shadow(size: u32, clip_space: f32) -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            shadow_info: ShadowInfo::new(size, clip_space),
            dirty: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
    pub dirty: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            dirty: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotLight {
    pub color: Vec3,
    pub intensity: f32,
    /// Inner cone half angle in degrees.
    pub cut_off: f32,
    /// Outer cone half angle in degrees, also the shadow frustum angle.
    pub outer_cut_off: f32,
    pub shadow_info: ShadowInfo,
    pub dirty: bool,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self::with_shadow(SPOT_SHADOW_SIZE, SPOT_CLIP_SPACE)
    }
}

impl SpotLight {
    pub fn with_shadow(size: u32, clip_space: f32) -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            cut_off: 12.5,
            outer_cut_off: 17.5,
            shadow_info: ShadowInfo::new(size, clip_space),
            dirty: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeometryKind {
    #[default]
    Sphere,
    Capsule,
    Box,
}

/// Physical parameters plus the physics objects built from them. The
/// handles are rebuilt whenever `dirty` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub body_type: BodyType,
    pub geometry_kind: GeometryKind,
    pub radius: f32,
    pub half_height: f32,
    pub half_extent: Vec3,
    pub density: f32,
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
    pub material: Option<MaterialHandle>,
    pub shape: Option<ShapeHandle>,
    pub body: Option<BodyHandle>,
    pub dirty: bool,
    /// Pose last exchanged with the simulation, used to notice movement.
    pub synced_pose: Option<Pose>,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            geometry_kind: GeometryKind::Sphere,
            radius: 0.5,
            half_height: 0.5,
            half_extent: Vec3::splat(0.5),
            density: 10.0,
            static_friction: 0.5,
            dynamic_friction: 0.5,
            restitution: 0.6,
            material: None,
            shape: None,
            body: None,
            dirty: true,
            synced_pose: None,
        }
    }
}

impl RigidBody {
    pub fn sphere(body_type: BodyType, radius: f32) -> Self {
        Self {
            body_type,
            geometry_kind: GeometryKind::Sphere,
            radius,
            ..Default::default()
        }
    }

    pub fn capsule(body_type: BodyType, radius: f32, half_height: f32) -> Self {
        Self {
            body_type,
            geometry_kind: GeometryKind::Capsule,
            radius,
            half_height,
            ..Default::default()
        }
    }

    pub fn cuboid(body_type: BodyType, half_extent: Vec3) -> Self {
        Self {
            body_type,
            geometry_kind: GeometryKind::Box,
            half_extent,
            ..Default::default()
        }
    }

    pub fn geometry(&self) -> Geometry {
        match self.geometry_kind {
            GeometryKind::Sphere => Geometry::Sphere {
                radius: self.radius,
            },
            GeometryKind::Capsule => Geometry::Capsule {
                radius: self.radius,
                half_height: self.half_height,
            },
            GeometryKind::Box => Geometry::Box {
                half_extent: self.half_extent,
            },
        }
    }

    pub fn material_desc(&self) -> MaterialDesc {
        MaterialDesc {
            static_friction: self.static_friction,
            dynamic_friction: self.dynamic_friction,
            restitution: self.restitution,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }
}
