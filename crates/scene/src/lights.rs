use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use orrery_ecs::{DirectionalLight, PointLight, ShadowInfo, SpotLight, Transform};
use orrery_gpu::{Format, GpuBackend, ImageInfo, ImageUsage, SamplerId};

use crate::SceneError;

pub const MAX_DIRECTIONAL_LIGHTS: usize = 8;
pub const MAX_POINT_LIGHTS: usize = 64;
pub const MAX_SPOT_LIGHTS: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightData {
    pub direction: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    pub _pad0: f32,
    pub shadow_image: u64,
    pub shadow_sampler: u64,
    pub light_matrix: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLightData {
    pub position: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    pub _pad0: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SpotLightData {
    pub position: [f32; 3],
    pub intensity: f32,
    pub direction: [f32; 3],
    /// Cosine of the inner cone angle.
    pub cut_off: f32,
    pub color: [f32; 3],
    /// Cosine of the outer cone angle.
    pub outer_cut_off: f32,
    pub shadow_image: u64,
    pub shadow_sampler: u64,
    pub light_matrix: [[f32; 4]; 4],
}

/// Every light of the scene, as the composition pass reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightBuffer {
    pub directional_lights: [DirectionalLightData; MAX_DIRECTIONAL_LIGHTS],
    pub point_lights: [PointLightData; MAX_POINT_LIGHTS],
    pub spot_lights: [SpotLightData; MAX_SPOT_LIGHTS],
    pub num_directional_lights: u32,
    pub num_point_lights: u32,
    pub num_spot_lights: u32,
    pub _pad0: u32,
}

impl LightBuffer {
    pub fn empty() -> Self {
        Self::zeroed()
    }

    pub fn counts(&self) -> LightCounts {
        LightCounts {
            directional: self.num_directional_lights as usize,
            point: self.num_point_lights as usize,
            spot: self.num_spot_lights as usize,
        }
    }

    pub fn push_directional(&mut self, light: DirectionalLightData) -> Result<(), SceneError> {
        let slot = self.num_directional_lights as usize;
        let target = self
            .directional_lights
            .get_mut(slot)
            .ok_or_else(|| exhausted("directional", MAX_DIRECTIONAL_LIGHTS))?;
        *target = light;
        self.num_directional_lights += 1;
        Ok(())
    }

    pub fn push_point(&mut self, light: PointLightData) -> Result<(), SceneError> {
        let slot = self.num_point_lights as usize;
        let target = self
            .point_lights
            .get_mut(slot)
            .ok_or_else(|| exhausted("point", MAX_POINT_LIGHTS))?;
        *target = light;
        self.num_point_lights += 1;
        Ok(())
    }

    pub fn push_spot(&mut self, light: SpotLightData) -> Result<(), SceneError> {
        let slot = self.num_spot_lights as usize;
        let target = self
            .spot_lights
            .get_mut(slot)
            .ok_or_else(|| exhausted("spot", MAX_SPOT_LIGHTS))?;
        *target = light;
        self.num_spot_lights += 1;
        Ok(())
    }
}

/// Number of packed lights of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightCounts {
    pub directional: usize,
    pub point: usize,
    pub spot: usize,
}

impl LightCounts {
    /// Fail before anything is packed if a kind is over capacity.
    pub fn check_capacity(&self) -> Result<(), SceneError> {
        if self.directional > MAX_DIRECTIONAL_LIGHTS {
            return Err(exhausted("directional", MAX_DIRECTIONAL_LIGHTS));
        }
        if self.point > MAX_POINT_LIGHTS {
            return Err(exhausted("point", MAX_POINT_LIGHTS));
        }
        if self.spot > MAX_SPOT_LIGHTS {
            return Err(exhausted("spot", MAX_SPOT_LIGHTS));
        }
        Ok(())
    }

    pub fn total(&self) -> usize {
        self.directional + self.point + self.spot
    }
}

fn exhausted(kind: &'static str, capacity: usize) -> SceneError {
    SceneError::ResourceExhausted { kind, capacity }
}

/// `look_at` from `position` along `direction`. Falls back to `+Z` as the
/// up vector when the direction is parallel to `up`.
pub(crate) fn light_view(position: Vec3, direction: Vec3, up: Vec3) -> Mat4 {
    let up = if direction.cross(up).length_squared() < 1e-8 {
        Vec3::Z
    } else {
        up
    };
    Mat4::look_at_rh(position, position + direction, up)
}

/// Refresh the shadow matrices of a directional light and create its shadow
/// map on first use.
pub(crate) fn prepare_directional(
    device: &dyn GpuBackend,
    light: &mut DirectionalLight,
    transform: &Transform,
    name: &str,
) -> Result<Vec3, SceneError> {
    let direction = transform.direction();
    let shadow = &mut light.shadow_info;
    let c = shadow.clip_space;
    shadow.projection = Mat4::orthographic_rh(-c, c, -c, c, -c, c);
    shadow.view = light_view(transform.position, direction, Vec3::NEG_Y);

    if shadow.shadow_image.is_empty() {
        shadow.shadow_image = device.create_image(&ImageInfo {
            format: Format::D16Unorm,
            size: shadow.image_size,
            mip_levels: 1,
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SHADER_READ,
            name: format!("directional shadow - {name}"),
        })?;
        tracing::debug!(image = %shadow.shadow_image, name, "directional shadow map created");
    }
    Ok(direction)
}

/// Refresh the shadow matrices of a spot light and create its depth, shadow
/// and blur images on first use.
pub(crate) fn prepare_spot(
    device: &dyn GpuBackend,
    light: &mut SpotLight,
    transform: &Transform,
    name: &str,
) -> Result<Vec3, SceneError> {
    let direction = transform.direction();
    let outer = light.outer_cut_off;
    let shadow = &mut light.shadow_info;
    let mut projection =
        Mat4::perspective_rh(outer.to_radians(), 1.0, 0.1, shadow.clip_space);
    projection.y_axis.y *= -1.0;
    shadow.projection = projection;
    shadow.view = light_view(transform.position, direction, Vec3::Y);

    if shadow.shadow_image.is_empty() {
        create_spot_images(device, shadow, name)?;
        tracing::debug!(image = %shadow.shadow_image, name, "spot shadow maps created");
    }
    Ok(direction)
}

fn create_spot_images(
    device: &dyn GpuBackend,
    shadow: &mut ShadowInfo,
    name: &str,
) -> Result<(), SceneError> {
    let size = shadow.image_size;
    let color = |label: &str| ImageInfo {
        format: Format::R16G16Unorm,
        size,
        mip_levels: 1,
        usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SHADER_READ,
        name: format!("{label} - {name}"),
    };
    let depth = ImageInfo {
        format: Format::D16Unorm,
        size,
        mip_levels: 1,
        usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT,
        name: format!("spot shadow depth - {name}"),
    };
    shadow.depth_image = device.create_image(&depth)?;
    shadow.shadow_image = device.create_image(&color("spot shadow"))?;
    shadow.temp_shadow_image = device.create_image(&color("spot shadow blur"))?;
    Ok(())
}

pub(crate) fn pack_directional(
    light: &DirectionalLight,
    direction: Vec3,
    sampler: SamplerId,
) -> DirectionalLightData {
    DirectionalLightData {
        direction: direction.to_array(),
        intensity: light.intensity,
        color: light.color.to_array(),
        _pad0: 0.0,
        shadow_image: light.shadow_info.shadow_image.raw(),
        shadow_sampler: sampler.raw(),
        light_matrix: light.shadow_info.light_matrix().to_cols_array_2d(),
    }
}

pub(crate) fn pack_point(light: &PointLight, position: Vec3) -> PointLightData {
    PointLightData {
        position: position.to_array(),
        intensity: light.intensity,
        color: light.color.to_array(),
        _pad0: 0.0,
    }
}

pub(crate) fn pack_spot(
    light: &SpotLight,
    position: Vec3,
    direction: Vec3,
    sampler: SamplerId,
) -> SpotLightData {
    SpotLightData {
        position: position.to_array(),
        intensity: light.intensity,
        direction: direction.to_array(),
        cut_off: light.cut_off.to_radians().cos(),
        color: light.color.to_array(),
        outer_cut_off: light.outer_cut_off.to_radians().cos(),
        shadow_image: light.shadow_info.shadow_image.raw(),
        shadow_sampler: sampler.raw(),
        light_matrix: light.shadow_info.light_matrix().to_cols_array_2d(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_gpu::HeadlessDevice;

    #[test]
    fn buffer_layout_has_no_padding() {
        assert_eq!(std::mem::size_of::<DirectionalLightData>(), 112);
        assert_eq!(std::mem::size_of::<PointLightData>(), 32);
        assert_eq!(std::mem::size_of::<SpotLightData>(), 128);
        assert_eq!(
            std::mem::size_of::<LightBuffer>(),
            112 * MAX_DIRECTIONAL_LIGHTS + 32 * MAX_POINT_LIGHTS + 128 * MAX_SPOT_LIGHTS + 16
        );
    }

    #[test]
    fn push_past_capacity_fails() {
        let mut buffer = LightBuffer::empty();
        for _ in 0..MAX_DIRECTIONAL_LIGHTS {
            buffer.push_directional(DirectionalLightData::zeroed()).unwrap();
        }
        assert!(matches!(
            buffer.push_directional(DirectionalLightData::zeroed()),
            Err(SceneError::ResourceExhausted {
                kind: "directional",
                capacity: MAX_DIRECTIONAL_LIGHTS
            })
        ));
        assert_eq!(buffer.counts().directional, MAX_DIRECTIONAL_LIGHTS);
    }

    #[test]
    fn capacity_check_names_the_kind() {
        let counts = LightCounts {
            directional: 1,
            point: MAX_POINT_LIGHTS,
            spot: MAX_SPOT_LIGHTS + 1,
        };
        assert!(matches!(
            counts.check_capacity(),
            Err(SceneError::ResourceExhausted { kind: "spot", .. })
        ));
    }

    #[test]
    fn view_survives_parallel_up() {
        let view = light_view(Vec3::ZERO, Vec3::NEG_Y, Vec3::NEG_Y);
        assert!(view.is_finite());
        assert_ne!(view, Mat4::IDENTITY);
    }

    #[test]
    fn spot_cutoffs_are_cosines() {
        let light = SpotLight::default();
        let data = pack_spot(&light, Vec3::ZERO, Vec3::NEG_Y, SamplerId(1));
        assert!((data.cut_off - 12.5f32.to_radians().cos()).abs() < 1e-6);
        assert!((data.outer_cut_off - 17.5f32.to_radians().cos()).abs() < 1e-6);
        assert!(data.cut_off > data.outer_cut_off);
    }

    #[test]
    fn spot_images_are_created_once() {
        let device = HeadlessDevice::new();
        let mut light = SpotLight::default();
        let transform = Transform::default();
        prepare_spot(&device, &mut light, &transform, "spot").unwrap();
        let first = light.shadow_info.clone();
        prepare_spot(&device, &mut light, &transform, "spot").unwrap();

        assert_eq!(first.images().count(), 3);
        assert_eq!(light.shadow_info.shadow_image, first.shadow_image);
        assert_eq!(device.live_images(), 3);
        assert!(light.shadow_info.projection.y_axis.y < 0.0);
    }
}
