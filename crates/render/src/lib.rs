//! Deferred render driver.
//!
//! [`FrameDriver::draw_frame`] records one frame as a fixed pass sequence:
//! depth prepass, G-buffer, shadow maps, SSAO and its blur, composition,
//! forward overlay, then UI onto the swapchain image and present.
//!
//! # Invariants
//! - The scene update is submitted before the frame's render list, in a
//!   separate submission.
//! - Every image is transitioned into the layout of its next use before the
//!   pass that uses it.
//! - Size-dependent targets replaced on resize are released by deferred
//!   destruction, never while the last frame that wrote them may be running.
//! - A surface with nothing presentable skips the frame before anything is
//!   submitted.

mod camera;
mod deferred;
mod frame;
mod overlay;
mod ssao;

use orrery_gpu::GpuError;
use orrery_scene::SceneError;

pub use camera::{
    CameraBuffer, CameraInfo, ControlledCamera3D, Key, Keybinds, MoveFlags, RenderView,
};
pub use deferred::{CompositionPush, DeferredRenderer, DepthPrepassPush, DrawPush, TextureRef};
pub use frame::{FrameDriver, FrameOutcome, UiFrame, UiRenderer, ViewportBlit};
pub use overlay::{
    AtmospherePush, DebugLines, GizmoPush, LinePush, LineVertex, OverlayRenderer, grid_lines,
};
pub use ssao::{SsaoBlurPush, SsaoGenerationPush, SsaoRenderer};

/// Errors from recording or submitting a frame.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),
}

pub fn crate_info() -> &'static str {
    "orrery-render v0.1.0"
}
