use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::UVec2;

use orrery_gpu::{
    Attachment, CommandList, CullMode, Format, GpuBackend, GpuError, ImageId, ImageInfo,
    ImageLayout, PipelineId, RasterPipelineInfo, RenderPassInfo, SamplerId,
};

use crate::deferred::TextureRef;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SsaoGenerationPush {
    pub normal: TextureRef,
    pub depth: TextureRef,
    pub camera_info: u64,
    pub _pad: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SsaoBlurPush {
    pub ssao: TextureRef,
}

/// Half resolution ambient occlusion and its blur.
pub struct SsaoRenderer {
    device: Arc<dyn GpuBackend>,
    generation: PipelineId,
    blur: PipelineId,
    pub ssao_image: ImageId,
    pub ssao_blur_image: ImageId,
    size: UVec2,
}

impl SsaoRenderer {
    /// `size` is the full viewport; targets are half of it.
    pub fn new(device: Arc<dyn GpuBackend>, size: UVec2) -> Result<Self, GpuError> {
        let pipeline = |name: &str, shader: &str, push: usize| RasterPipelineInfo {
            name: name.into(),
            shader: shader.into(),
            color_formats: vec![Format::R8Unorm],
            depth: None,
            cull: CullMode::None,
            push_constant_size: push as u32,
        };
        let generation = device.create_raster_pipeline(&pipeline(
            "ssao_generation_pipeline",
            "ssao_generation",
            std::mem::size_of::<SsaoGenerationPush>(),
        ))?;
        let blur = device.create_raster_pipeline(&pipeline(
            "ssao_blur_pipeline",
            "ssao_blur",
            std::mem::size_of::<SsaoBlurPush>(),
        ))?;
        let mut ssao = Self {
            device,
            generation,
            blur,
            ssao_image: ImageId::EMPTY,
            ssao_blur_image: ImageId::EMPTY,
            size,
        };
        ssao.create_targets()?;
        Ok(ssao)
    }

    pub fn target_size(&self) -> UVec2 {
        half(self.size)
    }

    /// The blurred term composition samples.
    pub fn output(&self) -> ImageId {
        self.ssao_blur_image
    }

    pub fn resize(&mut self, size: UVec2) -> Result<(), GpuError> {
        if size == self.size {
            return Ok(());
        }
        self.device.destroy_image_deferred(self.ssao_image);
        self.device.destroy_image_deferred(self.ssao_blur_image);
        self.size = size;
        self.create_targets()
    }

    /// Generation then blur. The G-buffer normal and depth images must be
    /// in `ReadOnlyOptimal`; both SSAO targets end there too.
    pub fn render(
        &self,
        cmd: &mut CommandList,
        normal_image: ImageId,
        depth_image: ImageId,
        sampler: SamplerId,
        camera_info: u64,
    ) -> Result<(), GpuError> {
        let area = self.target_size();
        cmd.transition(self.ssao_image, ImageLayout::Undefined, ImageLayout::AttachmentOptimal);
        cmd.transition(
            self.ssao_blur_image,
            ImageLayout::Undefined,
            ImageLayout::AttachmentOptimal,
        );

        cmd.begin_renderpass(RenderPassInfo {
            name: "ssao".into(),
            color_attachments: vec![Attachment::clear_color(self.ssao_image, [1.0, 0.0, 0.0, 1.0])],
            depth_attachment: None,
            render_area: area,
        })?;
        cmd.set_pipeline(self.generation);
        cmd.push_constant(&SsaoGenerationPush {
            normal: TextureRef::new(normal_image, sampler),
            depth: TextureRef::new(depth_image, sampler),
            camera_info,
            _pad: 0,
        });
        cmd.draw(3);
        cmd.end_renderpass()?;
        cmd.transition(
            self.ssao_image,
            ImageLayout::AttachmentOptimal,
            ImageLayout::ReadOnlyOptimal,
        );

        cmd.begin_renderpass(RenderPassInfo {
            name: "ssao blur".into(),
            color_attachments: vec![Attachment::clear_color(
                self.ssao_blur_image,
                [0.0, 0.0, 0.0, 1.0],
            )],
            depth_attachment: None,
            render_area: area,
        })?;
        cmd.set_pipeline(self.blur);
        cmd.push_constant(&SsaoBlurPush {
            ssao: TextureRef::new(self.ssao_image, sampler),
        });
        cmd.draw(3);
        cmd.end_renderpass()?;
        cmd.transition(
            self.ssao_blur_image,
            ImageLayout::AttachmentOptimal,
            ImageLayout::ReadOnlyOptimal,
        );
        Ok(())
    }

    fn create_targets(&mut self) -> Result<(), GpuError> {
        let size = self.target_size();
        self.ssao_image = self
            .device
            .create_image(&ImageInfo::render_target(Format::R8Unorm, size, "ssao_image"))?;
        self.ssao_blur_image = self.device.create_image(&ImageInfo::render_target(
            Format::R8Unorm,
            size,
            "ssao_blur_image",
        ))?;
        Ok(())
    }
}

impl Drop for SsaoRenderer {
    fn drop(&mut self) {
        self.device.destroy_image_deferred(self.ssao_image);
        self.device.destroy_image_deferred(self.ssao_blur_image);
        self.device.destroy_pipeline(self.generation);
        self.device.destroy_pipeline(self.blur);
    }
}

fn half(size: UVec2) -> UVec2 {
    (size / 2).max(UVec2::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_gpu::{Command, HeadlessDevice, SubmitInfo};

    fn ssao(size: UVec2) -> (Arc<HeadlessDevice>, SsaoRenderer) {
        let device = Arc::new(HeadlessDevice::new());
        let backend: Arc<dyn GpuBackend> = device.clone();
        (device, SsaoRenderer::new(backend, size).unwrap())
    }

    #[test]
    fn targets_are_half_resolution() {
        let (device, ssao) = ssao(UVec2::new(1280, 720));
        let info = device.image_info(ssao.ssao_image).unwrap();
        assert_eq!(info.size, UVec2::new(640, 360));
        assert_eq!(info.format, Format::R8Unorm);
        assert_eq!(ssao.output(), ssao.ssao_blur_image);
    }

    #[test]
    fn tiny_viewport_keeps_one_pixel() {
        assert_eq!(half(UVec2::new(1, 3)), UVec2::new(1, 1));
    }

    #[test]
    fn blur_samples_generated_term() {
        let (device, ssao) = ssao(UVec2::new(64, 64));
        let mut cmd = CommandList::new("ssao");
        ssao.render(&mut cmd, ImageId::EMPTY, ImageId::EMPTY, SamplerId(9), 0)
            .unwrap();
        assert_eq!(cmd.render_pass_names(), vec!["ssao", "ssao blur"]);

        let blur_push = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::PushConstant(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .nth(1)
            .unwrap();
        let push: SsaoBlurPush = bytemuck::pod_read_unaligned(&blur_push);
        assert_eq!(push.ssao, TextureRef::new(ssao.ssao_image, SamplerId(9)));

        cmd.complete().unwrap();
        device.submit(SubmitInfo::commands(vec![cmd])).unwrap();
        assert!(device.violations().is_empty());
        assert_eq!(
            device.image_layout(ssao.output()),
            Some(ImageLayout::ReadOnlyOptimal)
        );
    }
}
