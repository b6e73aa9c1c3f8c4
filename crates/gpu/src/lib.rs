//! GPU backend collaborator.
//!
//! The scene and the render driver talk to the device only through the
//! [`GpuBackend`] and [`Swapchain`] traits and through recorded
//! [`CommandList`]s. Resource handles are plain `Copy` ids.
//!
//! # Invariants
//! - A zero handle is the empty handle; backends never hand it out.
//! - Resources referenced by submitted work are released through the
//!   deferred path (`destroy_*_deferred` or a command list's deferred list),
//!   never while that work is in flight.
//! - A completed command list has no open render pass.

mod backend;
mod command;
mod desc;
mod handles;
pub mod headless;

pub use backend::{GpuBackend, GpuError, PresentInfo, SubmitInfo, Swapchain, stage_upload};
pub use command::{
    Attachment, ClearValue, Command, CommandList, ImageBarrier, LoadOp, RenderPassInfo,
};
pub use desc::{
    AddressMode, BorderColor, BufferInfo, CompareOp, CullMode, DepthState, Filter, Format,
    ImageInfo, ImageLayout, ImageUsage, MemoryLocation, RasterPipelineInfo, SamplerInfo,
};
pub use handles::{BinarySemaphore, BufferId, ImageId, PipelineId, SamplerId, TimelineSemaphore};
pub use headless::{DeviceStats, HeadlessDevice, HeadlessSwapchain, SubmissionRecord, Violation};

pub fn crate_info() -> &'static str {
    "orrery-gpu v0.1.0"
}
