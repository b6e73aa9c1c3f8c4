use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::UVec2;

use orrery_assets::Material;
use orrery_gpu::{
    Attachment, CommandList, CullMode, DepthState, Format, GpuBackend, GpuError, ImageId,
    ImageInfo, ImageLayout, ImageUsage, PipelineId, RasterPipelineInfo, RenderPassInfo, SamplerId,
};
use orrery_scene::Renderable;

/// Image and sampler pair, as shaders address a texture.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct TextureRef {
    pub image: u64,
    pub sampler: u64,
}

impl TextureRef {
    pub fn new(image: ImageId, sampler: SamplerId) -> Self {
        Self {
            image: image.raw(),
            sampler: sampler.raw(),
        }
    }

    fn from_material(slot: Option<(ImageId, SamplerId)>) -> Self {
        slot.map(|(image, sampler)| Self::new(image, sampler))
            .unwrap_or_default()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DepthPrepassPush {
    pub camera_info: u64,
    pub transform_buffer: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawPush {
    pub camera_info: u64,
    pub transform_buffer: u64,
    pub light_buffer: u64,
    pub albedo: TextureRef,
    pub normal_map: TextureRef,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CompositionPush {
    pub albedo: TextureRef,
    pub normal: TextureRef,
    pub depth: TextureRef,
    pub ssao: TextureRef,
    pub light_buffer: u64,
    pub camera_info: u64,
    pub ambient: f32,
    pub _pad: [f32; 3],
}

const ALBEDO_FORMAT: Format = Format::R8G8B8A8Srgb;
const NORMAL_FORMAT: Format = Format::R16G16B16A16Sfloat;
pub(crate) const COLOR_FORMAT: Format = Format::R8G8B8A8Srgb;
pub(crate) const DEPTH_FORMAT: Format = Format::D32Sfloat;
pub(crate) const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.05, 1.0];

/// G-buffer targets, the lit color target and the geometry pipelines.
pub struct DeferredRenderer {
    device: Arc<dyn GpuBackend>,
    depth_prepass: PipelineId,
    gbuffer: PipelineId,
    composition: PipelineId,
    pub albedo_image: ImageId,
    pub normal_image: ImageId,
    pub render_image: ImageId,
    pub depth_image: ImageId,
    size: UVec2,
}

impl DeferredRenderer {
    pub fn new(device: Arc<dyn GpuBackend>, size: UVec2) -> Result<Self, GpuError> {
        let depth_prepass = device.create_raster_pipeline(&RasterPipelineInfo {
            name: "depth_prepass_pipeline".into(),
            shader: "depth_prepass".into(),
            color_formats: Vec::new(),
            depth: Some(DepthState {
                format: DEPTH_FORMAT,
                test: true,
                write: true,
            }),
            cull: CullMode::Front,
            push_constant_size: std::mem::size_of::<DepthPrepassPush>() as u32,
        })?;
        let gbuffer = device.create_raster_pipeline(&RasterPipelineInfo {
            name: "deferred_pipeline".into(),
            shader: "deferred".into(),
            color_formats: vec![ALBEDO_FORMAT, NORMAL_FORMAT],
            depth: Some(DepthState {
                format: DEPTH_FORMAT,
                test: true,
                write: false,
            }),
            cull: CullMode::Front,
            push_constant_size: std::mem::size_of::<DrawPush>() as u32,
        })?;
        let composition = device.create_raster_pipeline(&RasterPipelineInfo {
            name: "composition_pipeline".into(),
            shader: "composition".into(),
            color_formats: vec![COLOR_FORMAT],
            depth: None,
            cull: CullMode::None,
            push_constant_size: std::mem::size_of::<CompositionPush>() as u32,
        })?;

        let mut renderer = Self {
            device,
            depth_prepass,
            gbuffer,
            composition,
            albedo_image: ImageId::EMPTY,
            normal_image: ImageId::EMPTY,
            render_image: ImageId::EMPTY,
            depth_image: ImageId::EMPTY,
            size,
        };
        renderer.create_targets()?;
        Ok(renderer)
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Replace every size-dependent target. The old ones are released once
    /// the work already submitted has completed.
    pub fn resize(&mut self, size: UVec2) -> Result<(), GpuError> {
        if size == self.size {
            return Ok(());
        }
        for image in self.targets() {
            self.device.destroy_image_deferred(image);
        }
        self.size = size;
        self.create_targets()?;
        tracing::debug!(width = size.x, height = size.y, "G-buffer resized");
        Ok(())
    }

    /// Depth prepass and G-buffer fill. Leaves albedo, normal and depth in
    /// `ReadOnlyOptimal` and the render image in `AttachmentOptimal`.
    pub fn render_gbuffer(
        &self,
        cmd: &mut CommandList,
        renderables: &[Renderable],
        camera_info: u64,
        light_buffer: u64,
    ) -> Result<(), GpuError> {
        for image in self.targets() {
            cmd.transition(image, ImageLayout::Undefined, ImageLayout::AttachmentOptimal);
        }

        cmd.begin_renderpass(RenderPassInfo {
            name: "depth prepass".into(),
            color_attachments: Vec::new(),
            depth_attachment: Some(Attachment::clear_depth(self.depth_image, 1.0)),
            render_area: self.size,
        })?;
        cmd.set_pipeline(self.depth_prepass);
        for renderable in renderables {
            let push = DepthPrepassPush {
                camera_info,
                transform_buffer: renderable.transform_address,
            };
            renderable
                .model
                .draw(cmd, |cmd, _, _| cmd.push_constant(&push));
        }
        cmd.end_renderpass()?;

        cmd.begin_renderpass(RenderPassInfo {
            name: "gbuffer".into(),
            color_attachments: vec![
                Attachment::clear_color(self.albedo_image, CLEAR_COLOR),
                Attachment::clear_color(self.normal_image, [0.0, 0.0, 0.0, 1.0]),
            ],
            depth_attachment: Some(Attachment::load(self.depth_image)),
            render_area: self.size,
        })?;
        cmd.set_pipeline(self.gbuffer);
        for renderable in renderables {
            renderable.model.draw(cmd, |cmd, _, material: &Material| {
                cmd.push_constant(&DrawPush {
                    camera_info,
                    transform_buffer: renderable.transform_address,
                    light_buffer,
                    albedo: TextureRef::from_material(material.albedo),
                    normal_map: TextureRef::from_material(material.normal_map),
                })
            });
        }
        cmd.end_renderpass()?;

        for image in [self.albedo_image, self.normal_image, self.depth_image] {
            cmd.transition(image, ImageLayout::AttachmentOptimal, ImageLayout::ReadOnlyOptimal);
        }
        Ok(())
    }

    /// Full-screen lighting pass into the render image.
    pub fn render_composition(
        &self,
        cmd: &mut CommandList,
        sampler: SamplerId,
        ssao_image: ImageId,
        camera_info: u64,
        light_buffer: u64,
        ambient: f32,
    ) -> Result<(), GpuError> {
        cmd.begin_renderpass(RenderPassInfo {
            name: "composition".into(),
            color_attachments: vec![Attachment::clear_color(self.render_image, CLEAR_COLOR)],
            depth_attachment: None,
            render_area: self.size,
        })?;
        cmd.set_pipeline(self.composition);
        cmd.push_constant(&CompositionPush {
            albedo: TextureRef::new(self.albedo_image, sampler),
            normal: TextureRef::new(self.normal_image, sampler),
            depth: TextureRef::new(self.depth_image, sampler),
            ssao: TextureRef::new(ssao_image, sampler),
            light_buffer,
            camera_info,
            ambient,
            _pad: [0.0; 3],
        });
        cmd.draw(3);
        cmd.end_renderpass()
    }

    fn targets(&self) -> [ImageId; 4] {
        [
            self.render_image,
            self.depth_image,
            self.albedo_image,
            self.normal_image,
        ]
    }

    fn create_targets(&mut self) -> Result<(), GpuError> {
        let color = |format, name: &str| ImageInfo {
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SHADER_READ | ImageUsage::TRANSFER_DST,
            ..ImageInfo::render_target(format, self.size, name)
        };
        self.albedo_image = self.device.create_image(&color(ALBEDO_FORMAT, "albedo_image"))?;
        self.normal_image = self.device.create_image(&color(NORMAL_FORMAT, "normal_image"))?;
        self.render_image = self.device.create_image(&color(COLOR_FORMAT, "render_image"))?;
        self.depth_image = self.device.create_image(&ImageInfo::render_target(
            DEPTH_FORMAT,
            self.size,
            "depth_image",
        ))?;
        Ok(())
    }
}

impl Drop for DeferredRenderer {
    fn drop(&mut self) {
        for image in self.targets() {
            self.device.destroy_image_deferred(image);
        }
        for pipeline in [self.depth_prepass, self.gbuffer, self.composition] {
            self.device.destroy_pipeline(pipeline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_gpu::{HeadlessDevice, SubmitInfo};

    fn renderer(size: UVec2) -> (Arc<HeadlessDevice>, DeferredRenderer) {
        let device = Arc::new(HeadlessDevice::new());
        let backend: Arc<dyn GpuBackend> = device.clone();
        let renderer = DeferredRenderer::new(backend, size).unwrap();
        (device, renderer)
    }

    #[test]
    fn push_constants_have_no_padding() {
        assert_eq!(std::mem::size_of::<DrawPush>(), 56);
        assert_eq!(std::mem::size_of::<CompositionPush>(), 96);
    }

    #[test]
    fn targets_match_viewport() {
        let (device, renderer) = renderer(UVec2::new(640, 360));
        let albedo = device.image_info(renderer.albedo_image).unwrap();
        assert_eq!(albedo.size, UVec2::new(640, 360));
        assert_eq!(albedo.format, Format::R8G8B8A8Srgb);
        let depth = device.image_info(renderer.depth_image).unwrap();
        assert_eq!(depth.format, Format::D32Sfloat);
        assert_eq!(device.live_images(), 4);
    }

    #[test]
    fn gbuffer_leaves_targets_readable() {
        let (device, renderer) = renderer(UVec2::new(64, 64));
        let mut cmd = CommandList::new("frame");
        renderer.render_gbuffer(&mut cmd, &[], 0, 0).unwrap();
        renderer
            .render_composition(&mut cmd, SamplerId::EMPTY, renderer.albedo_image, 0, 0, 0.1)
            .unwrap();
        assert_eq!(cmd.render_pass_names(), vec!["depth prepass", "gbuffer", "composition"]);
        cmd.complete().unwrap();
        device.submit(SubmitInfo::commands(vec![cmd])).unwrap();

        assert!(device.violations().is_empty(), "{:?}", device.violations());
        for image in [renderer.albedo_image, renderer.normal_image, renderer.depth_image] {
            assert_eq!(device.image_layout(image), Some(ImageLayout::ReadOnlyOptimal));
        }
        assert_eq!(
            device.image_layout(renderer.render_image),
            Some(ImageLayout::AttachmentOptimal)
        );
    }

    #[test]
    fn resize_defers_release_of_old_targets() {
        let (device, mut renderer) = renderer(UVec2::new(64, 64));
        let old = renderer.albedo_image;
        let mut cmd = CommandList::new("frame");
        renderer.render_gbuffer(&mut cmd, &[], 0, 0).unwrap();
        cmd.complete().unwrap();
        device.submit(SubmitInfo::commands(vec![cmd])).unwrap();

        renderer.resize(UVec2::new(128, 32)).unwrap();
        assert_ne!(renderer.albedo_image, old);
        assert!(device.is_image_alive(old));
        assert_eq!(
            device.image_info(renderer.normal_image).unwrap().size,
            UVec2::new(128, 32)
        );

        device.wait_idle();
        assert!(!device.is_image_alive(old));
        assert_eq!(device.live_images(), 4);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn same_size_keeps_targets() {
        let (_device, mut renderer) = renderer(UVec2::new(64, 64));
        let before = renderer.targets();
        renderer.resize(UVec2::new(64, 64)).unwrap();
        assert_eq!(renderer.targets(), before);
    }
}
