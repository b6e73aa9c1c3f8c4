use bytemuck::Pod;
use glam::UVec2;

use crate::backend::GpuError;
use crate::desc::ImageLayout;
use crate::handles::{BufferId, ImageId, PipelineId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    Depth(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Load,
    Clear(ClearValue),
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attachment {
    pub image: ImageId,
    pub load_op: LoadOp,
}

impl Attachment {
    pub fn clear_color(image: ImageId, color: [f32; 4]) -> Self {
        Self {
            image,
            load_op: LoadOp::Clear(ClearValue::Color(color)),
        }
    }

    pub fn clear_depth(image: ImageId, depth: f32) -> Self {
        Self {
            image,
            load_op: LoadOp::Clear(ClearValue::Depth(depth)),
        }
    }

    pub fn load(image: ImageId) -> Self {
        Self {
            image,
            load_op: LoadOp::Load,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassInfo {
    pub name: String,
    pub color_attachments: Vec<Attachment>,
    pub depth_attachment: Option<Attachment>,
    pub render_area: UVec2,
}

impl RenderPassInfo {
    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.color_attachments.iter().chain(self.depth_attachment.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageId,
    pub before: ImageLayout,
    pub after: ImageLayout,
}

/// One recorded GPU operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ImageBarrier(ImageBarrier),
    CopyBufferToBuffer {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
    CopyBufferToImage {
        src: BufferId,
        dst: ImageId,
        mip_level: u32,
        extent: UVec2,
    },
    /// Downsample `src_mip` into `dst_mip` of the same image.
    BlitImage {
        image: ImageId,
        src_mip: u32,
        dst_mip: u32,
    },
    ClearImage {
        image: ImageId,
        layout: ImageLayout,
        value: ClearValue,
    },
    BeginRenderPass(RenderPassInfo),
    EndRenderPass,
    SetPipeline(PipelineId),
    PushConstant(Vec<u8>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_buffer: BufferId,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

/// A recorded sequence of commands plus the resources it releases once the
/// GPU has finished with it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandList {
    name: String,
    commands: Vec<Command>,
    deferred_buffers: Vec<BufferId>,
    deferred_images: Vec<ImageId>,
    open_pass: Option<String>,
    complete: bool,
}

impl CommandList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            deferred_buffers: Vec::new(),
            deferred_images: Vec::new(),
            open_pass: None,
            complete: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn deferred_buffers(&self) -> &[BufferId] {
        &self.deferred_buffers
    }

    pub fn deferred_images(&self) -> &[ImageId] {
        &self.deferred_images
    }

    pub fn pipeline_barrier_image_transition(&mut self, barrier: ImageBarrier) {
        self.commands.push(Command::ImageBarrier(barrier));
    }

    pub fn transition(&mut self, image: ImageId, before: ImageLayout, after: ImageLayout) {
        self.pipeline_barrier_image_transition(ImageBarrier {
            image,
            before,
            after,
        });
    }

    pub fn copy_buffer_to_buffer(&mut self, src: BufferId, dst: BufferId, size: u64) {
        self.commands
            .push(Command::CopyBufferToBuffer { src, dst, size });
    }

    pub fn copy_buffer_to_image(&mut self, src: BufferId, dst: ImageId, mip_level: u32, extent: UVec2) {
        self.commands.push(Command::CopyBufferToImage {
            src,
            dst,
            mip_level,
            extent,
        });
    }

    pub fn blit_image(&mut self, image: ImageId, src_mip: u32, dst_mip: u32) {
        self.commands.push(Command::BlitImage {
            image,
            src_mip,
            dst_mip,
        });
    }

    pub fn clear_image(&mut self, image: ImageId, layout: ImageLayout, value: ClearValue) {
        self.commands.push(Command::ClearImage {
            image,
            layout,
            value,
        });
    }

    pub fn begin_renderpass(&mut self, info: RenderPassInfo) -> Result<(), GpuError> {
        if let Some(open) = &self.open_pass {
            return Err(GpuError::UnbalancedRenderPass(format!(
                "'{}' begun while '{open}' is open",
                info.name
            )));
        }
        self.open_pass = Some(info.name.clone());
        self.commands.push(Command::BeginRenderPass(info));
        Ok(())
    }

    pub fn end_renderpass(&mut self) -> Result<(), GpuError> {
        if self.open_pass.take().is_none() {
            return Err(GpuError::UnbalancedRenderPass(format!(
                "end without begin in '{}'",
                self.name
            )));
        }
        self.commands.push(Command::EndRenderPass);
        Ok(())
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.commands.push(Command::SetPipeline(pipeline));
    }

    pub fn push_constant<T: Pod>(&mut self, value: &T) {
        self.commands
            .push(Command::PushConstant(bytemuck::bytes_of(value).to_vec()));
    }

    pub fn draw(&mut self, vertex_count: u32) {
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_buffer: BufferId,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        self.commands.push(Command::DrawIndexed {
            index_buffer,
            index_count,
            first_index,
            vertex_offset,
        });
    }

    /// Release `buffer` once this list has finished executing.
    pub fn destroy_buffer_deferred(&mut self, buffer: BufferId) {
        self.deferred_buffers.push(buffer);
    }

    pub fn destroy_image_deferred(&mut self, image: ImageId) {
        self.deferred_images.push(image);
    }

    /// Seal the list for submission.
    pub fn complete(&mut self) -> Result<(), GpuError> {
        if let Some(open) = &self.open_pass {
            return Err(GpuError::UnbalancedRenderPass(format!(
                "'{open}' still open when completing '{}'",
                self.name
            )));
        }
        self.complete = true;
        Ok(())
    }

    /// Names of the render passes in recording order.
    pub fn render_pass_names(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::BeginRenderPass(info) => Some(info.name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn barriers(&self) -> impl Iterator<Item = &ImageBarrier> {
        self.commands.iter().filter_map(|c| match c {
            Command::ImageBarrier(b) => Some(b),
            _ => None,
        })
    }

    pub fn count_buffer_copies(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::CopyBufferToBuffer { .. }))
            .count()
    }
}
