use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::UVec2;

use orrery_common::RenderConfig;
use orrery_gpu::{
    Attachment, ClearValue, CommandList, CullMode, Format, GpuBackend, GpuError, ImageId,
    ImageLayout, PipelineId, PresentInfo, RasterPipelineInfo, RenderPassInfo, SamplerId,
    SamplerInfo, SubmitInfo, Swapchain,
};
use orrery_scene::{Scene, UpdateReport};

use crate::RenderError;
use crate::camera::{CameraBuffer, RenderView};
use crate::deferred::{DeferredRenderer, TextureRef};
use crate::overlay::OverlayRenderer;
use crate::ssao::SsaoRenderer;

/// What happened to a requested frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    Presented {
        image: ImageId,
        update: UpdateReport,
    },
    /// The surface had no presentable image. Nothing was submitted.
    Skipped,
}

/// Inputs of the UI step of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiFrame {
    /// Swapchain image, in `AttachmentOptimal`, already cleared.
    pub target: ImageId,
    pub size: UVec2,
    pub format: Format,
    /// The rendered scene, in `ReadOnlyOptimal`.
    pub viewport_image: ImageId,
    pub sampler: SamplerId,
}

/// Immediate-mode UI drawn over the swapchain image each frame.
pub trait UiRenderer {
    /// Record the UI. The target must be left in `AttachmentOptimal` with no
    /// render pass open.
    fn record(&mut self, cmd: &mut CommandList, frame: &UiFrame) -> Result<(), RenderError>;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct ViewportPush {
    image: TextureRef,
}

/// UI that only shows the rendered scene, stretched over the whole surface.
pub struct ViewportBlit {
    device: Arc<dyn GpuBackend>,
    pipeline: PipelineId,
}

impl ViewportBlit {
    pub fn new(device: Arc<dyn GpuBackend>, format: Format) -> Result<Self, GpuError> {
        let pipeline = device.create_raster_pipeline(&RasterPipelineInfo {
            name: "viewport_pipeline".into(),
            shader: "viewport".into(),
            color_formats: vec![format],
            depth: None,
            cull: CullMode::None,
            push_constant_size: std::mem::size_of::<ViewportPush>() as u32,
        })?;
        Ok(Self { device, pipeline })
    }
}

impl UiRenderer for ViewportBlit {
    fn record(&mut self, cmd: &mut CommandList, frame: &UiFrame) -> Result<(), RenderError> {
        cmd.begin_renderpass(RenderPassInfo {
            name: "ui".into(),
            color_attachments: vec![Attachment::load(frame.target)],
            depth_attachment: None,
            render_area: frame.size,
        })?;
        cmd.set_pipeline(self.pipeline);
        cmd.push_constant(&ViewportPush {
            image: TextureRef::new(frame.viewport_image, frame.sampler),
        });
        cmd.draw(3);
        cmd.end_renderpass()?;
        Ok(())
    }
}

impl Drop for ViewportBlit {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.pipeline);
    }
}

const SURFACE_CLEAR: [f32; 4] = [0.00368, 0.00368, 0.00368, 1.0];

/// Owns the render targets and records, submits and presents frames.
pub struct FrameDriver {
    device: Arc<dyn GpuBackend>,
    swapchain: Box<dyn Swapchain>,
    deferred: DeferredRenderer,
    ssao: SsaoRenderer,
    overlay: OverlayRenderer,
    camera: CameraBuffer,
    sampler: SamplerId,
    ambient: f32,
    frames: u64,
}

impl FrameDriver {
    pub fn new(
        device: Arc<dyn GpuBackend>,
        swapchain: Box<dyn Swapchain>,
        viewport: UVec2,
        config: &RenderConfig,
    ) -> Result<Self, RenderError> {
        let viewport = viewport.max(UVec2::ONE);
        let deferred = DeferredRenderer::new(device.clone(), viewport)?;
        let ssao = SsaoRenderer::new(device.clone(), viewport)?;
        let overlay = OverlayRenderer::new(device.clone())?;
        let camera = CameraBuffer::new(device.as_ref())?;
        let sampler = device.create_sampler(&SamplerInfo::linear_repeat(0.0, "frame sampler"))?;
        tracing::info!(
            width = viewport.x,
            height = viewport.y,
            surface = ?swapchain.size(),
            "frame driver created"
        );
        Ok(Self {
            device,
            swapchain,
            deferred,
            ssao,
            overlay,
            camera,
            sampler,
            ambient: config.ambient,
            frames: 0,
        })
    }

    pub fn viewport_size(&self) -> UVec2 {
        self.deferred.size()
    }

    pub fn surface_size(&self) -> UVec2 {
        self.swapchain.size()
    }

    pub fn deferred(&self) -> &DeferredRenderer {
        &self.deferred
    }

    pub fn ssao(&self) -> &SsaoRenderer {
        &self.ssao
    }

    /// Overlay state, for queueing debug lines.
    pub fn overlay_mut(&mut self) -> &mut OverlayRenderer {
        &mut self.overlay
    }

    pub fn camera_buffer(&self) -> &CameraBuffer {
        &self.camera
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Recreate the size-dependent targets. A zero-sized viewport keeps the
    /// current ones.
    pub fn resize_viewport(&mut self, size: UVec2) -> Result<(), RenderError> {
        if size.x == 0 || size.y == 0 {
            tracing::debug!(?size, "ignoring empty viewport");
            return Ok(());
        }
        self.deferred.resize(size)?;
        self.ssao.resize(size)?;
        Ok(())
    }

    pub fn resize_surface(&mut self, size: UVec2) -> Result<(), RenderError> {
        self.swapchain.resize(size)?;
        tracing::debug!(?size, "surface resized");
        Ok(())
    }

    /// Update `scene`, then render and present one frame of it seen through
    /// `view`.
    pub fn draw_frame(
        &mut self,
        scene: &mut Scene,
        view: &RenderView,
        ui: &mut dyn UiRenderer,
    ) -> Result<FrameOutcome, RenderError> {
        let target = match self.swapchain.acquire_next_image() {
            Ok(image) => image,
            Err(GpuError::SurfaceUnready) => {
                tracing::debug!("no presentable image, frame skipped");
                return Ok(FrameOutcome::Skipped);
            }
            Err(err) => return Err(err.into()),
        };

        let update = scene.update()?;

        let mut cmd = CommandList::new(format!("frame {}", self.frames));
        self.record_scene(&mut cmd, scene, view)?;
        self.record_ui(&mut cmd, target, ui)?;
        cmd.complete()?;

        self.device.submit(SubmitInfo {
            command_lists: vec![cmd],
            wait_binary_semaphores: vec![self.swapchain.acquire_semaphore()],
            signal_binary_semaphores: vec![self.swapchain.present_semaphore()],
            signal_timeline_semaphores: vec![(
                self.swapchain.gpu_timeline_semaphore(),
                self.swapchain.cpu_timeline_value(),
            )],
        })?;
        self.device.present(PresentInfo {
            image: target,
            wait_binary_semaphores: vec![self.swapchain.present_semaphore()],
        })?;
        self.frames += 1;
        Ok(FrameOutcome::Presented {
            image: target,
            update,
        })
    }

    /// Everything up to the render image being ready for sampling.
    fn record_scene(
        &mut self,
        cmd: &mut CommandList,
        scene: &Scene,
        view: &RenderView,
    ) -> Result<(), RenderError> {
        self.camera.upload(self.device.as_ref(), cmd, view)?;
        self.overlay.prepare(cmd)?;

        let camera_info = self.camera.address();
        let light_buffer = self.device.device_address(scene.light_buffer())?;
        let renderables = scene.renderables();
        let deferred = &self.deferred;

        deferred.render_gbuffer(cmd, &renderables, camera_info, light_buffer)?;
        scene.record_shadow_passes(cmd)?;
        self.ssao.render(
            cmd,
            deferred.normal_image,
            deferred.depth_image,
            self.sampler,
            camera_info,
        )?;
        deferred.render_composition(
            cmd,
            self.sampler,
            self.ssao.output(),
            camera_info,
            light_buffer,
            self.ambient,
        )?;

        cmd.transition(
            deferred.depth_image,
            ImageLayout::ReadOnlyOptimal,
            ImageLayout::AttachmentOptimal,
        );
        self.overlay.render(
            cmd,
            deferred.render_image,
            deferred.depth_image,
            deferred.size(),
            scene,
            camera_info,
        )?;
        cmd.transition(
            deferred.render_image,
            ImageLayout::AttachmentOptimal,
            ImageLayout::ReadOnlyOptimal,
        );
        tracing::trace!(draws = renderables.len(), "scene passes recorded");
        Ok(())
    }

    fn record_ui(
        &self,
        cmd: &mut CommandList,
        target: ImageId,
        ui: &mut dyn UiRenderer,
    ) -> Result<(), RenderError> {
        cmd.transition(target, ImageLayout::Undefined, ImageLayout::TransferDstOptimal);
        cmd.clear_image(
            target,
            ImageLayout::TransferDstOptimal,
            ClearValue::Color(SURFACE_CLEAR),
        );
        cmd.transition(
            target,
            ImageLayout::TransferDstOptimal,
            ImageLayout::AttachmentOptimal,
        );
        ui.record(
            cmd,
            &UiFrame {
                target,
                size: self.swapchain.size(),
                format: self.swapchain.format(),
                viewport_image: self.deferred.render_image,
                sampler: self.sampler,
            },
        )?;
        cmd.transition(target, ImageLayout::AttachmentOptimal, ImageLayout::PresentSrc);
        Ok(())
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        self.device.wait_idle();
        self.camera.destroy(self.device.as_ref());
        self.device.destroy_sampler(self.sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_gpu::{HeadlessDevice, HeadlessSwapchain};
    use orrery_physics::SimplePhysics;

    struct NoUi;

    impl UiRenderer for NoUi {
        fn record(&mut self, _: &mut CommandList, _: &UiFrame) -> Result<(), RenderError> {
            Ok(())
        }
    }

    fn driver(device: &Arc<HeadlessDevice>) -> FrameDriver {
        let backend: Arc<dyn GpuBackend> = device.clone();
        let swapchain = HeadlessSwapchain::new(device.clone(), UVec2::new(320, 180), 2).unwrap();
        FrameDriver::new(
            backend,
            Box::new(swapchain),
            UVec2::new(320, 180),
            &RenderConfig::default(),
        )
        .unwrap()
    }

    fn scene(device: &Arc<HeadlessDevice>) -> Scene {
        let backend: Arc<dyn GpuBackend> = device.clone();
        Scene::new("frame", backend, Box::new(SimplePhysics::default())).unwrap()
    }

    #[test]
    fn empty_scene_presents() {
        let device = Arc::new(HeadlessDevice::new());
        let mut driver = driver(&device);
        let mut scene = scene(&device);
        let outcome = driver
            .draw_frame(&mut scene, &RenderView::default(), &mut NoUi)
            .unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        assert_eq!(device.stats().presents, 1);
        assert_eq!(driver.frames_presented(), 1);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn frame_waits_on_acquire_and_signals_present() {
        let device = Arc::new(HeadlessDevice::new());
        let mut driver = driver(&device);
        let mut scene = scene(&device);
        driver
            .draw_frame(&mut scene, &RenderView::default(), &mut NoUi)
            .unwrap();
        let last = device.last_submission().unwrap();
        assert_eq!(last.command_lists[0].name(), "frame 0");
        assert_eq!(last.wait_binary_semaphores.len(), 1);
        assert_eq!(last.signal_binary_semaphores.len(), 1);
        assert_eq!(last.signal_timeline_semaphores[0].1, 1);
    }

    #[test]
    fn viewport_blit_draws_into_surface() {
        let device = Arc::new(HeadlessDevice::new());
        let mut driver = driver(&device);
        let mut scene = scene(&device);
        let backend: Arc<dyn GpuBackend> = device.clone();
        let mut ui = ViewportBlit::new(backend, Format::B8G8R8A8Srgb).unwrap();
        driver
            .draw_frame(&mut scene, &RenderView::default(), &mut ui)
            .unwrap();
        let names: Vec<String> = device.last_submission().unwrap().command_lists[0]
            .render_pass_names()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names.last().map(String::as_str), Some("ui"));
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn zero_viewport_keeps_targets() {
        let device = Arc::new(HeadlessDevice::new());
        let mut driver = driver(&device);
        let before = driver.deferred().albedo_image;
        driver.resize_viewport(UVec2::new(0, 100)).unwrap();
        assert_eq!(driver.deferred().albedo_image, before);
        assert_eq!(driver.viewport_size(), UVec2::new(320, 180));
    }

    #[test]
    fn dropping_driver_releases_targets() {
        let device = Arc::new(HeadlessDevice::new());
        let d = driver(&device);
        // Four G-buffer targets, two SSAO targets, two swapchain images.
        assert_eq!(device.live_images(), 8);
        drop(d);
        device.wait_idle();
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_samplers(), 0);
    }
}
