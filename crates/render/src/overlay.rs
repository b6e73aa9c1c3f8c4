use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec3};

use orrery_ecs::{DirectionalLight, Transform};
use orrery_gpu::{
    Attachment, BufferId, BufferInfo, CommandList, CullMode, DepthState, GpuBackend, GpuError,
    ImageId, PipelineId, RasterPipelineInfo, RenderPassInfo, stage_upload,
};
use orrery_scene::{LightKind, Scene};

use crate::deferred::{COLOR_FORMAT, DEPTH_FORMAT};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LinePush {
    pub camera_info: u64,
    pub vertex_buffer: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GizmoPush {
    pub camera_info: u64,
    pub position: [f32; 3],
    /// 0 directional, 1 point, 2 spot. Selects the icon.
    pub kind: u32,
    pub color: [f32; 3],
    pub scale: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AtmospherePush {
    pub camera_info: u64,
    pub sun_direction: [f32; 3],
    pub sun_intensity: f32,
}

const GRID_COLOR: [f32; 4] = [0.4, 0.4, 0.4, 1.0];
const GIZMO_SCALE: f32 = 0.5;

/// Line list of a square grid on the XZ plane, `2 * half_extent + 1` lines
/// along each axis.
pub fn grid_lines(half_extent: i32, spacing: f32) -> Vec<LineVertex> {
    let mut verts = Vec::new();
    let extent = half_extent as f32 * spacing;
    for i in -half_extent..=half_extent {
        let offset = i as f32 * spacing;
        // along X
        verts.push(LineVertex {
            position: [-extent, 0.0, offset],
            color: GRID_COLOR,
        });
        verts.push(LineVertex {
            position: [extent, 0.0, offset],
            color: GRID_COLOR,
        });
        // along Z
        verts.push(LineVertex {
            position: [offset, 0.0, -extent],
            color: GRID_COLOR,
        });
        verts.push(LineVertex {
            position: [offset, 0.0, extent],
            color: GRID_COLOR,
        });
    }
    verts
}

/// Debug line geometry: a persistent grid plus lines queued for a single
/// frame, kept in a device buffer that grows as needed.
pub struct DebugLines {
    buffer: BufferId,
    capacity: u64,
    grid: Vec<LineVertex>,
    transient: Vec<LineVertex>,
    /// Vertex count of the buffer when it holds exactly the grid.
    uploaded_grid: Option<u32>,
    vertex_count: u32,
}

impl DebugLines {
    pub fn new(grid: Vec<LineVertex>) -> Self {
        Self {
            buffer: BufferId::EMPTY,
            capacity: 0,
            grid,
            transient: Vec::new(),
            uploaded_grid: None,
            vertex_count: 0,
        }
    }

    pub fn set_grid(&mut self, grid: Vec<LineVertex>) {
        self.grid = grid;
        self.uploaded_grid = None;
    }

    /// Queue a line for the next frame only.
    pub fn push_line(&mut self, from: Vec3, to: Vec3, color: [f32; 4]) {
        self.transient.push(LineVertex {
            position: from.to_array(),
            color,
        });
        self.transient.push(LineVertex {
            position: to.to_array(),
            color,
        });
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Upload the lines for this frame, skipped when the buffer already
    /// holds them. Returns whether an upload was recorded.
    pub fn upload(&mut self, device: &dyn GpuBackend, cmd: &mut CommandList) -> Result<bool, GpuError> {
        if self.transient.is_empty() && self.uploaded_grid.is_some() {
            return Ok(false);
        }
        let mut vertices = self.grid.clone();
        vertices.append(&mut self.transient);
        self.vertex_count = vertices.len() as u32;
        self.uploaded_grid = (vertices.len() == self.grid.len()).then_some(self.vertex_count);
        if vertices.is_empty() {
            return Ok(false);
        }

        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let needed = bytes.len() as u64;
        if needed > self.capacity {
            if !self.buffer.is_empty() {
                cmd.destroy_buffer_deferred(self.buffer);
            }
            let capacity = needed.next_power_of_two();
            self.buffer = device.create_buffer(&BufferInfo::device_local(capacity, "debug lines"))?;
            self.capacity = capacity;
            tracing::debug!(capacity, "debug line buffer grown");
        }
        stage_upload(device, cmd, self.buffer, bytes, "debug lines")?;
        Ok(true)
    }

    fn destroy(&mut self, device: &dyn GpuBackend) {
        if !self.buffer.is_empty() {
            device.destroy_buffer_deferred(self.buffer);
            self.buffer = BufferId::EMPTY;
        }
    }
}

/// Forward pass drawn over the composed image: sky, debug lines and light
/// gizmos, depth tested against the G-buffer depth.
pub struct OverlayRenderer {
    device: Arc<dyn GpuBackend>,
    atmosphere: PipelineId,
    lines_pipeline: PipelineId,
    gizmo: PipelineId,
    pub lines: DebugLines,
}

impl OverlayRenderer {
    pub fn new(device: Arc<dyn GpuBackend>) -> Result<Self, GpuError> {
        let pipeline = |name: &str, push: usize| RasterPipelineInfo {
            name: format!("{name}_pipeline"),
            shader: format!("overlay/{name}"),
            color_formats: vec![COLOR_FORMAT],
            depth: Some(DepthState {
                format: DEPTH_FORMAT,
                test: true,
                write: false,
            }),
            cull: CullMode::None,
            push_constant_size: push as u32,
        };
        let atmosphere = device.create_raster_pipeline(&pipeline(
            "atmosphere",
            std::mem::size_of::<AtmospherePush>(),
        ))?;
        let lines_pipeline = device
            .create_raster_pipeline(&pipeline("debug_lines", std::mem::size_of::<LinePush>()))?;
        let gizmo = device
            .create_raster_pipeline(&pipeline("light_gizmo", std::mem::size_of::<GizmoPush>()))?;
        Ok(Self {
            device,
            atmosphere,
            lines_pipeline,
            gizmo,
            lines: DebugLines::new(grid_lines(50, 1.0)),
        })
    }

    /// Copies this frame needs. Must be recorded outside any render pass.
    pub fn prepare(&mut self, cmd: &mut CommandList) -> Result<(), GpuError> {
        self.lines.upload(self.device.as_ref(), cmd)?;
        Ok(())
    }

    /// Record the overlay pass with one gizmo per light of `scene`. `color`
    /// and `depth` must already be in `AttachmentOptimal`.
    pub fn render(
        &self,
        cmd: &mut CommandList,
        color: ImageId,
        depth: ImageId,
        size: UVec2,
        scene: &Scene,
        camera_info: u64,
    ) -> Result<(), GpuError> {
        let gizmos = scene.light_gizmos();
        cmd.begin_renderpass(RenderPassInfo {
            name: "forward overlay".into(),
            color_attachments: vec![Attachment::load(color)],
            depth_attachment: Some(Attachment::load(depth)),
            render_area: size,
        })?;

        cmd.set_pipeline(self.atmosphere);
        cmd.push_constant(&AtmospherePush {
            camera_info,
            sun_direction: sun_direction(scene).to_array(),
            sun_intensity: 1.0,
        });
        cmd.draw(3);

        if self.lines.vertex_count() > 0 {
            cmd.set_pipeline(self.lines_pipeline);
            cmd.push_constant(&LinePush {
                camera_info,
                vertex_buffer: self.device.device_address(self.lines.buffer())?,
            });
            cmd.draw(self.lines.vertex_count());
        }

        if !gizmos.is_empty() {
            cmd.set_pipeline(self.gizmo);
            for gizmo in &gizmos {
                cmd.push_constant(&GizmoPush {
                    camera_info,
                    position: gizmo.position.to_array(),
                    kind: gizmo_kind(gizmo.kind),
                    color: gizmo.color.to_array(),
                    scale: GIZMO_SCALE,
                });
                cmd.draw(6);
            }
        }
        cmd.end_renderpass()
    }
}

impl Drop for OverlayRenderer {
    fn drop(&mut self) {
        self.lines.destroy(self.device.as_ref());
        for pipeline in [self.atmosphere, self.lines_pipeline, self.gizmo] {
            self.device.destroy_pipeline(pipeline);
        }
    }
}

fn gizmo_kind(kind: LightKind) -> u32 {
    match kind {
        LightKind::Directional => 0,
        LightKind::Point => 1,
        LightKind::Spot => 2,
    }
}

/// Facing of the scene's first directional light, straight down without one.
fn sun_direction(scene: &Scene) -> Vec3 {
    let registry = scene.registry();
    registry
        .view::<DirectionalLight>()
        .find_map(|(entity, _)| registry.get::<Transform>(entity).ok())
        .map(Transform::direction)
        .unwrap_or(Vec3::NEG_Y)
}
