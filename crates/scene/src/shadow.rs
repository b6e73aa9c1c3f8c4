use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2};

use orrery_ecs::{DirectionalLight, SpotLight};
use orrery_gpu::{
    Attachment, CommandList, CullMode, DepthState, Format, GpuBackend, ImageId, ImageLayout,
    PipelineId, RasterPipelineInfo, RenderPassInfo,
};

use crate::{Scene, SceneError};

/// Per-draw constants of the shadow geometry passes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowPush {
    pub light_matrix: [[f32; 4]; 4],
    pub transform_buffer: u64,
    pub _pad0: u64,
}

/// Constants of one separable gaussian blur step.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GaussPush {
    pub src_image: u64,
    pub blur_scale: [f32; 2],
}

/// Pipelines shared by every shadow caster of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPipelines {
    /// Depth only, for directional lights.
    pub normal_shadow: PipelineId,
    /// Depth moments into an R16G16 target, for spot lights.
    pub variance_shadow: PipelineId,
    pub filter_gauss: PipelineId,
}

impl ShadowPipelines {
    pub fn create(device: &dyn GpuBackend) -> Result<Self, SceneError> {
        let depth = Some(DepthState {
            format: Format::D16Unorm,
            test: true,
            write: true,
        });
        let normal_shadow = device.create_raster_pipeline(&RasterPipelineInfo {
            name: "normal_shadow".into(),
            shader: "shadows/normal_shadow".into(),
            color_formats: Vec::new(),
            depth,
            cull: CullMode::None,
            push_constant_size: std::mem::size_of::<ShadowPush>() as u32,
        })?;
        let variance_shadow = device.create_raster_pipeline(&RasterPipelineInfo {
            name: "variance_shadow".into(),
            shader: "shadows/variance_shadow".into(),
            color_formats: vec![Format::R16G16Unorm],
            depth,
            cull: CullMode::None,
            push_constant_size: std::mem::size_of::<ShadowPush>() as u32,
        })?;
        let filter_gauss = device.create_raster_pipeline(&RasterPipelineInfo {
            name: "filter_gauss".into(),
            shader: "shadows/filter_gauss".into(),
            color_formats: vec![Format::R16G16Unorm],
            depth: None,
            cull: CullMode::None,
            push_constant_size: std::mem::size_of::<GaussPush>() as u32,
        })?;
        Ok(Self {
            normal_shadow,
            variance_shadow,
            filter_gauss,
        })
    }

    pub fn destroy(&self, device: &dyn GpuBackend) {
        device.destroy_pipeline(self.normal_shadow);
        device.destroy_pipeline(self.variance_shadow);
        device.destroy_pipeline(self.filter_gauss);
    }
}

const WHITE: [f32; 4] = [1.0; 4];

impl Scene {
    /// Record the shadow map passes of every light whose maps exist. Lights
    /// get their maps from the light pass in [`Scene::update`].
    ///
    /// Every shadow image ends in `ReadOnlyOptimal`, ready for composition.
    /// Returns the number of render passes recorded.
    pub fn record_shadow_passes(&self, cmd: &mut CommandList) -> Result<usize, SceneError> {
        let renderables = self.renderables();
        let mut passes = 0;

        for entity in self.entities() {
            if let Ok(light) = self.registry.get::<DirectionalLight>(entity) {
                if !light.shadow_info.shadow_image.is_empty() {
                    self.directional_pass(cmd, light, &renderables)?;
                    passes += 1;
                }
            }
            if let Ok(light) = self.registry.get::<SpotLight>(entity) {
                if !light.shadow_info.shadow_image.is_empty() {
                    self.spot_passes(cmd, light, &renderables)?;
                    passes += 3;
                }
            }
        }
        if passes > 0 {
            tracing::debug!(passes, casters = renderables.len(), "shadow passes recorded");
        }
        Ok(passes)
    }

    fn directional_pass(
        &self,
        cmd: &mut CommandList,
        light: &DirectionalLight,
        renderables: &[crate::Renderable],
    ) -> Result<(), SceneError> {
        let shadow = &light.shadow_info;
        let image = shadow.shadow_image;
        cmd.transition(image, ImageLayout::Undefined, ImageLayout::AttachmentOptimal);
        cmd.begin_renderpass(RenderPassInfo {
            name: "directional shadow".into(),
            color_attachments: Vec::new(),
            depth_attachment: Some(Attachment::clear_depth(image, 1.0)),
            render_area: shadow.image_size,
        })?;
        cmd.set_pipeline(self.pipelines.normal_shadow);
        draw_casters(cmd, shadow.light_matrix(), renderables);
        cmd.end_renderpass()?;
        cmd.transition(image, ImageLayout::AttachmentOptimal, ImageLayout::ReadOnlyOptimal);
        Ok(())
    }

    /// Variance pass into the shadow image, then a horizontal blur into the
    /// temporary image and a vertical blur back.
    fn spot_passes(
        &self,
        cmd: &mut CommandList,
        light: &SpotLight,
        renderables: &[crate::Renderable],
    ) -> Result<(), SceneError> {
        let shadow = &light.shadow_info;
        let size = shadow.image_size;
        for image in [shadow.depth_image, shadow.shadow_image, shadow.temp_shadow_image] {
            cmd.transition(image, ImageLayout::Undefined, ImageLayout::AttachmentOptimal);
        }

        cmd.begin_renderpass(RenderPassInfo {
            name: "spot shadow".into(),
            color_attachments: vec![Attachment::clear_color(shadow.shadow_image, WHITE)],
            depth_attachment: Some(Attachment::clear_depth(shadow.depth_image, 1.0)),
            render_area: size,
        })?;
        cmd.set_pipeline(self.pipelines.variance_shadow);
        draw_casters(cmd, shadow.light_matrix(), renderables);
        cmd.end_renderpass()?;

        cmd.transition(
            shadow.shadow_image,
            ImageLayout::AttachmentOptimal,
            ImageLayout::ReadOnlyOptimal,
        );
        self.blur_pass(
            cmd,
            "spot shadow blur horizontal",
            shadow.shadow_image,
            shadow.temp_shadow_image,
            size,
            [1.0 / size.x as f32, 0.0],
        )?;

        cmd.transition(
            shadow.temp_shadow_image,
            ImageLayout::AttachmentOptimal,
            ImageLayout::ReadOnlyOptimal,
        );
        cmd.transition(
            shadow.shadow_image,
            ImageLayout::ReadOnlyOptimal,
            ImageLayout::AttachmentOptimal,
        );
        self.blur_pass(
            cmd,
            "spot shadow blur vertical",
            shadow.temp_shadow_image,
            shadow.shadow_image,
            size,
            [0.0, 1.0 / size.y as f32],
        )?;
        cmd.transition(
            shadow.shadow_image,
            ImageLayout::AttachmentOptimal,
            ImageLayout::ReadOnlyOptimal,
        );
        Ok(())
    }

    fn blur_pass(
        &self,
        cmd: &mut CommandList,
        name: &str,
        src: ImageId,
        dst: ImageId,
        size: UVec2,
        blur_scale: [f32; 2],
    ) -> Result<(), SceneError> {
        cmd.begin_renderpass(RenderPassInfo {
            name: name.into(),
            color_attachments: vec![Attachment::clear_color(dst, WHITE)],
            depth_attachment: None,
            render_area: size,
        })?;
        cmd.set_pipeline(self.pipelines.filter_gauss);
        cmd.push_constant(&GaussPush {
            src_image: src.raw(),
            blur_scale,
        });
        cmd.draw(3);
        cmd.end_renderpass()?;
        Ok(())
    }
}

fn draw_casters(cmd: &mut CommandList, light_matrix: Mat4, renderables: &[crate::Renderable]) {
    let light_matrix = light_matrix.to_cols_array_2d();
    for renderable in renderables {
        let push = ShadowPush {
            light_matrix,
            transform_buffer: renderable.transform_address,
            _pad0: 0,
        };
        renderable
            .model
            .draw(cmd, |cmd, _, _| cmd.push_constant(&push));
    }
}
