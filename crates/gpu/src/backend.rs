use glam::UVec2;

use crate::command::CommandList;
use crate::desc::{BufferInfo, Format, ImageInfo, RasterPipelineInfo, SamplerInfo};
use crate::handles::{
    BinarySemaphore, BufferId, ImageId, PipelineId, SamplerId, TimelineSemaphore,
};

/// Errors reported by a GPU backend.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),
    #[error("unknown image {0}")]
    UnknownImage(ImageId),
    #[error("unknown sampler {0}")]
    UnknownSampler(SamplerId),
    #[error("unknown pipeline {0}")]
    UnknownPipeline(PipelineId),
    #[error("write of {len} bytes at offset {offset} exceeds buffer {buffer} of {size} bytes")]
    OutOfBounds {
        buffer: BufferId,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("buffer {0} is not host visible")]
    NotHostVisible(BufferId),
    #[error("unbalanced render pass: {0}")]
    UnbalancedRenderPass(String),
    #[error("command list '{0}' submitted before completion")]
    IncompleteCommandList(String),
    #[error("no presentable image available")]
    SurfaceUnready,
}

/// One queue submission.
#[derive(Debug, Default)]
pub struct SubmitInfo {
    pub command_lists: Vec<CommandList>,
    pub wait_binary_semaphores: Vec<BinarySemaphore>,
    pub signal_binary_semaphores: Vec<BinarySemaphore>,
    pub signal_timeline_semaphores: Vec<(TimelineSemaphore, u64)>,
}

impl SubmitInfo {
    /// Submission with no semaphore hand-off.
    pub fn commands(command_lists: Vec<CommandList>) -> Self {
        Self {
            command_lists,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresentInfo {
    pub image: ImageId,
    pub wait_binary_semaphores: Vec<BinarySemaphore>,
}

/// Device operations the engine depends on.
///
/// Methods take `&self`: implementations synchronize internally so that
/// loader threads can create resources and record uploads concurrently.
pub trait GpuBackend: Send + Sync {
    fn create_buffer(&self, info: &BufferInfo) -> Result<BufferId, GpuError>;
    /// Immediate release. The caller guarantees no in-flight work uses it.
    fn destroy_buffer(&self, buffer: BufferId);
    /// Release once all work submitted so far has completed.
    fn destroy_buffer_deferred(&self, buffer: BufferId);
    /// Write into host-visible memory.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError>;
    fn device_address(&self, buffer: BufferId) -> Result<u64, GpuError>;

    fn create_image(&self, info: &ImageInfo) -> Result<ImageId, GpuError>;
    fn destroy_image(&self, image: ImageId);
    fn destroy_image_deferred(&self, image: ImageId);
    fn image_info(&self, image: ImageId) -> Result<ImageInfo, GpuError>;

    fn create_sampler(&self, info: &SamplerInfo) -> Result<SamplerId, GpuError>;
    fn destroy_sampler(&self, sampler: SamplerId);

    fn create_raster_pipeline(&self, info: &RasterPipelineInfo) -> Result<PipelineId, GpuError>;
    fn destroy_pipeline(&self, pipeline: PipelineId);

    fn submit(&self, info: SubmitInfo) -> Result<(), GpuError>;
    fn present(&self, info: PresentInfo) -> Result<(), GpuError>;
    /// Block until all submitted work has completed.
    fn wait_idle(&self);
}

/// Presentable image chain of a surface.
pub trait Swapchain {
    /// Next image to render into, or `GpuError::SurfaceUnready` when the
    /// surface has nothing presentable (minimized, transiently out of date).
    fn acquire_next_image(&mut self) -> Result<ImageId, GpuError>;
    fn acquire_semaphore(&self) -> BinarySemaphore;
    fn present_semaphore(&self) -> BinarySemaphore;
    fn gpu_timeline_semaphore(&self) -> TimelineSemaphore;
    /// Timeline value the current frame's submission signals.
    fn cpu_timeline_value(&self) -> u64;
    fn size(&self) -> UVec2;
    fn format(&self) -> Format;
    fn resize(&mut self, size: UVec2) -> Result<(), GpuError>;
}

/// Copy `bytes` into the device-local `dst` through a host-visible staging
/// buffer that `cmd` releases once it has executed.
pub fn stage_upload(
    device: &dyn GpuBackend,
    cmd: &mut CommandList,
    dst: BufferId,
    bytes: &[u8],
    name: &str,
) -> Result<(), GpuError> {
    let size = bytes.len() as u64;
    let staging = device.create_buffer(&BufferInfo::staging(size, format!("staging - {name}")))?;
    cmd.destroy_buffer_deferred(staging);
    device.write_buffer(staging, 0, bytes)?;
    cmd.copy_buffer_to_buffer(staging, dst, size);
    tracing::trace!(%dst, size, name, "staged upload");
    Ok(())
}
