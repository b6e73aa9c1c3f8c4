//! Headless device: executes command lists on host memory.
//!
//! Buffer copies really move bytes, images only track their layout. Work
//! stays "in flight" for a configurable number of submissions, the way a
//! real queue lags behind the CPU, so deferred destruction and layout
//! bookkeeping can be checked without a GPU. Misuse is recorded as a
//! [`Violation`] instead of failing the submission.

use glam::UVec2;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::backend::{GpuBackend, GpuError, PresentInfo, SubmitInfo, Swapchain};
use crate::command::{Command, CommandList};
use crate::desc::{
    BufferInfo, Format, ImageInfo, ImageLayout, ImageUsage, MemoryLocation, RasterPipelineInfo,
    SamplerInfo,
};
use crate::handles::{
    BinarySemaphore, BufferId, ImageId, PipelineId, SamplerId, TimelineSemaphore,
};

/// Counters accumulated over the device lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub submissions: u64,
    pub command_lists: u64,
    pub buffer_uploads: u64,
    pub image_uploads: u64,
    pub blits: u64,
    pub barriers: u64,
    pub render_passes: u64,
    pub draws: u64,
    pub presents: u64,
    pub wait_idles: u64,
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub images_created: u64,
    pub images_destroyed: u64,
    pub samplers_created: u64,
    pub samplers_destroyed: u64,
    pub pipelines_created: u64,
}

/// Misuse observed while executing submitted work.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// A barrier claimed a `before` layout the image was not in.
    LayoutMismatch {
        image: ImageId,
        expected: ImageLayout,
        actual: ImageLayout,
    },
    /// A render pass used an image that was not in an attachment layout.
    AttachmentLayout {
        image: ImageId,
        pass: String,
        actual: ImageLayout,
    },
    /// A resource was destroyed immediately while in-flight work used it.
    DestroyedInFlight { resource: String },
    /// Submitted work referenced a resource that no longer exists.
    UseAfterDestroy { resource: String },
}

/// What one submission contained, kept for inspection.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub serial: u64,
    pub command_lists: Vec<CommandList>,
    pub wait_binary_semaphores: Vec<BinarySemaphore>,
    pub signal_binary_semaphores: Vec<BinarySemaphore>,
    pub signal_timeline_semaphores: Vec<(TimelineSemaphore, u64)>,
}

impl SubmissionRecord {
    pub fn render_pass_names(&self) -> Vec<String> {
        self.command_lists
            .iter()
            .flat_map(|l| l.render_pass_names().into_iter().map(str::to_string))
            .collect()
    }
}

struct BufferSlot {
    info: BufferInfo,
    data: Vec<u8>,
}

struct ImageSlot {
    info: ImageInfo,
    layout: ImageLayout,
}

#[derive(Default)]
struct InFlight {
    serial: u64,
    buffers: BTreeSet<BufferId>,
    images: BTreeSet<ImageId>,
    release_buffers: Vec<BufferId>,
    release_images: Vec<ImageId>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    serial: u64,
    buffers: HashMap<BufferId, BufferSlot>,
    images: HashMap<ImageId, ImageSlot>,
    samplers: HashMap<SamplerId, SamplerInfo>,
    pipelines: HashMap<PipelineId, RasterPipelineInfo>,
    in_flight: VecDeque<InFlight>,
    /// Device-level deferred releases, tagged with the last serial they wait for.
    pending_buffers: Vec<(u64, BufferId)>,
    pending_images: Vec<(u64, ImageId)>,
    stats: DeviceStats,
    violations: Vec<Violation>,
    history: Vec<SubmissionRecord>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer_in_flight(&self, buffer: BufferId) -> bool {
        self.in_flight.iter().any(|f| f.buffers.contains(&buffer))
    }

    fn image_in_flight(&self, image: ImageId) -> bool {
        self.in_flight.iter().any(|f| f.images.contains(&image))
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            self.stats.buffers_destroyed += 1;
        }
    }

    fn release_image(&mut self, image: ImageId) {
        if self.images.remove(&image).is_some() {
            self.stats.images_destroyed += 1;
        }
    }

    /// Complete the oldest submissions until at most `keep` remain in flight.
    fn retire(&mut self, keep: usize) {
        while self.in_flight.len() > keep {
            let Some(done) = self.in_flight.pop_front() else {
                break;
            };
            for buffer in done.release_buffers {
                self.release_buffer(buffer);
            }
            for image in done.release_images {
                self.release_image(image);
            }
        }
        let oldest_pending = self.in_flight.front().map(|f| f.serial);
        let ready = |serial: u64| oldest_pending.is_none_or(|oldest| serial < oldest);

        let (ready_buffers, waiting): (Vec<_>, Vec<_>) =
            self.pending_buffers.drain(..).partition(|(s, _)| ready(*s));
        self.pending_buffers = waiting;
        for (_, buffer) in ready_buffers {
            self.release_buffer(buffer);
        }
        let (ready_images, waiting): (Vec<_>, Vec<_>) =
            self.pending_images.drain(..).partition(|(s, _)| ready(*s));
        self.pending_images = waiting;
        for (_, image) in ready_images {
            self.release_image(image);
        }
    }

    fn execute(&mut self, list: &CommandList, flight: &mut InFlight) -> Result<(), GpuError> {
        let mut current_pass = String::new();
        for command in list.commands() {
            match command {
                Command::ImageBarrier(barrier) => {
                    self.stats.barriers += 1;
                    flight.images.insert(barrier.image);
                    let Some(slot) = self.images.get_mut(&barrier.image) else {
                        self.violations.push(Violation::UseAfterDestroy {
                            resource: barrier.image.to_string(),
                        });
                        continue;
                    };
                    if barrier.before != ImageLayout::Undefined && barrier.before != slot.layout {
                        self.violations.push(Violation::LayoutMismatch {
                            image: barrier.image,
                            expected: barrier.before,
                            actual: slot.layout,
                        });
                    }
                    slot.layout = barrier.after;
                }
                Command::CopyBufferToBuffer { src, dst, size } => {
                    self.stats.buffer_uploads += 1;
                    flight.buffers.insert(*src);
                    flight.buffers.insert(*dst);
                    let Some(bytes) = self.buffers.get(src).map(|s| s.data.clone()) else {
                        self.violations.push(Violation::UseAfterDestroy {
                            resource: src.to_string(),
                        });
                        continue;
                    };
                    let Some(target) = self.buffers.get_mut(dst) else {
                        self.violations.push(Violation::UseAfterDestroy {
                            resource: dst.to_string(),
                        });
                        continue;
                    };
                    let len = *size as usize;
                    if len > bytes.len() || len > target.data.len() {
                        return Err(GpuError::OutOfBounds {
                            buffer: *dst,
                            offset: 0,
                            len: *size,
                            size: target.info.size,
                        });
                    }
                    target.data[..len].copy_from_slice(&bytes[..len]);
                }
                Command::CopyBufferToImage { src, dst, .. } => {
                    self.stats.image_uploads += 1;
                    flight.buffers.insert(*src);
                    flight.images.insert(*dst);
                    self.expect_layout(*dst, ImageLayout::TransferDstOptimal);
                }
                Command::BlitImage { image, .. } => {
                    self.stats.blits += 1;
                    flight.images.insert(*image);
                    if !self.images.contains_key(image) {
                        self.violations.push(Violation::UseAfterDestroy {
                            resource: image.to_string(),
                        });
                    }
                }
                Command::ClearImage { image, layout, .. } => {
                    flight.images.insert(*image);
                    self.expect_layout(*image, *layout);
                }
                Command::BeginRenderPass(info) => {
                    self.stats.render_passes += 1;
                    current_pass.clone_from(&info.name);
                    for attachment in info.attachments() {
                        flight.images.insert(attachment.image);
                        match self.images.get(&attachment.image) {
                            None => self.violations.push(Violation::UseAfterDestroy {
                                resource: attachment.image.to_string(),
                            }),
                            Some(slot)
                                if !matches!(
                                    slot.layout,
                                    ImageLayout::AttachmentOptimal | ImageLayout::General
                                ) =>
                            {
                                self.violations.push(Violation::AttachmentLayout {
                                    image: attachment.image,
                                    pass: current_pass.clone(),
                                    actual: slot.layout,
                                })
                            }
                            Some(_) => {}
                        }
                    }
                }
                Command::EndRenderPass => current_pass.clear(),
                Command::SetPipeline(pipeline) => {
                    if !self.pipelines.contains_key(pipeline) {
                        return Err(GpuError::UnknownPipeline(*pipeline));
                    }
                }
                Command::PushConstant(_) => {}
                Command::Draw { .. } => self.stats.draws += 1,
                Command::DrawIndexed { index_buffer, .. } => {
                    self.stats.draws += 1;
                    flight.buffers.insert(*index_buffer);
                }
            }
        }
        flight.release_buffers.extend_from_slice(list.deferred_buffers());
        flight.release_images.extend_from_slice(list.deferred_images());
        Ok(())
    }

    fn expect_layout(&mut self, image: ImageId, expected: ImageLayout) {
        match self.images.get(&image) {
            None => self.violations.push(Violation::UseAfterDestroy {
                resource: image.to_string(),
            }),
            Some(slot) if slot.layout != expected => {
                self.violations.push(Violation::LayoutMismatch {
                    image,
                    expected,
                    actual: slot.layout,
                })
            }
            Some(_) => {}
        }
    }
}

/// Host-memory implementation of [`GpuBackend`].
pub struct HeadlessDevice {
    state: Mutex<State>,
    frames_in_flight: usize,
}

impl HeadlessDevice {
    /// Device that keeps the last two submissions in flight.
    pub fn new() -> Self {
        Self::with_frames_in_flight(2)
    }

    pub fn with_frames_in_flight(frames_in_flight: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            frames_in_flight,
        }
    }

    pub fn stats(&self) -> DeviceStats {
        self.state.lock().stats
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.state.lock().violations.clone()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().history.clone()
    }

    pub fn last_submission(&self) -> Option<SubmissionRecord> {
        self.state.lock().history.last().cloned()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).map(|s| s.data.clone())
    }

    pub fn buffer_info(&self, buffer: BufferId) -> Option<BufferInfo> {
        self.state.lock().buffers.get(&buffer).map(|s| s.info.clone())
    }

    pub fn image_layout(&self, image: ImageId) -> Option<ImageLayout> {
        self.state.lock().images.get(&image).map(|s| s.layout)
    }

    pub fn is_buffer_alive(&self, buffer: BufferId) -> bool {
        self.state.lock().buffers.contains_key(&buffer)
    }

    pub fn is_image_alive(&self, image: ImageId) -> bool {
        self.state.lock().images.contains_key(&image)
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_samplers(&self) -> usize {
        self.state.lock().samplers.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Fresh semaphore id. Headless semaphores carry no state.
    pub fn create_semaphore_id(&self) -> u64 {
        self.state.lock().next_id()
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HeadlessDevice {
    fn create_buffer(&self, info: &BufferInfo) -> Result<BufferId, GpuError> {
        let mut state = self.state.lock();
        let id = BufferId(state.next_id());
        state.buffers.insert(
            id,
            BufferSlot {
                info: info.clone(),
                data: vec![0; info.size as usize],
            },
        );
        state.stats.buffers_created += 1;
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let mut state = self.state.lock();
        if state.buffer_in_flight(buffer) {
            state.violations.push(Violation::DestroyedInFlight {
                resource: buffer.to_string(),
            });
        }
        state.release_buffer(buffer);
    }

    fn destroy_buffer_deferred(&self, buffer: BufferId) {
        let mut state = self.state.lock();
        let serial = state.serial;
        state.pending_buffers.push((serial, buffer));
        state.retire(self.frames_in_flight);
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        let slot = state
            .buffers
            .get_mut(&buffer)
            .ok_or(GpuError::UnknownBuffer(buffer))?;
        if slot.info.memory != MemoryLocation::HostVisible {
            return Err(GpuError::NotHostVisible(buffer));
        }
        let end = offset + data.len() as u64;
        if end > slot.info.size {
            return Err(GpuError::OutOfBounds {
                buffer,
                offset,
                len: data.len() as u64,
                size: slot.info.size,
            });
        }
        slot.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn device_address(&self, buffer: BufferId) -> Result<u64, GpuError> {
        let state = self.state.lock();
        if !state.buffers.contains_key(&buffer) {
            return Err(GpuError::UnknownBuffer(buffer));
        }
        Ok(buffer.raw() << 20)
    }

    fn create_image(&self, info: &ImageInfo) -> Result<ImageId, GpuError> {
        let mut state = self.state.lock();
        let id = ImageId(state.next_id());
        state.images.insert(
            id,
            ImageSlot {
                info: info.clone(),
                layout: ImageLayout::Undefined,
            },
        );
        state.stats.images_created += 1;
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        let mut state = self.state.lock();
        if state.image_in_flight(image) {
            state.violations.push(Violation::DestroyedInFlight {
                resource: image.to_string(),
            });
        }
        state.release_image(image);
    }

    fn destroy_image_deferred(&self, image: ImageId) {
        let mut state = self.state.lock();
        let serial = state.serial;
        state.pending_images.push((serial, image));
        state.retire(self.frames_in_flight);
    }

    fn image_info(&self, image: ImageId) -> Result<ImageInfo, GpuError> {
        self.state
            .lock()
            .images
            .get(&image)
            .map(|s| s.info.clone())
            .ok_or(GpuError::UnknownImage(image))
    }

    fn create_sampler(&self, info: &SamplerInfo) -> Result<SamplerId, GpuError> {
        let mut state = self.state.lock();
        let id = SamplerId(state.next_id());
        state.samplers.insert(id, info.clone());
        state.stats.samplers_created += 1;
        Ok(id)
    }

    fn destroy_sampler(&self, sampler: SamplerId) {
        let mut state = self.state.lock();
        if state.samplers.remove(&sampler).is_some() {
            state.stats.samplers_destroyed += 1;
        }
    }

    fn create_raster_pipeline(&self, info: &RasterPipelineInfo) -> Result<PipelineId, GpuError> {
        let mut state = self.state.lock();
        let id = PipelineId(state.next_id());
        state.pipelines.insert(id, info.clone());
        state.stats.pipelines_created += 1;
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        self.state.lock().pipelines.remove(&pipeline);
    }

    fn submit(&self, info: SubmitInfo) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        if let Some(list) = info.command_lists.iter().find(|l| !l.is_complete()) {
            return Err(GpuError::IncompleteCommandList(list.name().to_string()));
        }
        state.serial += 1;
        let serial = state.serial;
        let mut flight = InFlight {
            serial,
            ..Default::default()
        };
        for (i, list) in info.command_lists.iter().enumerate() {
            if let Err(err) = state.execute(list, &mut flight) {
                // Work already executed stays in flight. Deferred releases of
                // the failed list and the ones behind it ride along with it.
                for rest in &info.command_lists[i..] {
                    flight.release_buffers.extend_from_slice(rest.deferred_buffers());
                    flight.release_images.extend_from_slice(rest.deferred_images());
                }
                state.in_flight.push_back(flight);
                state.retire(self.frames_in_flight);
                return Err(err);
            }
            state.stats.command_lists += 1;
        }
        state.stats.submissions += 1;
        state.in_flight.push_back(flight);
        state.history.push(SubmissionRecord {
            serial,
            command_lists: info.command_lists,
            wait_binary_semaphores: info.wait_binary_semaphores,
            signal_binary_semaphores: info.signal_binary_semaphores,
            signal_timeline_semaphores: info.signal_timeline_semaphores,
        });
        state.retire(self.frames_in_flight);
        Ok(())
    }

    fn present(&self, info: PresentInfo) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        state.expect_layout(info.image, ImageLayout::PresentSrc);
        state.stats.presents += 1;
        Ok(())
    }

    fn wait_idle(&self) {
        let mut state = self.state.lock();
        state.stats.wait_idles += 1;
        state.retire(0);
    }
}

/// Swapchain over headless images.
pub struct HeadlessSwapchain {
    device: Arc<HeadlessDevice>,
    images: Vec<ImageId>,
    next: usize,
    size: UVec2,
    format: Format,
    unready: bool,
    acquire_semaphore: BinarySemaphore,
    present_semaphore: BinarySemaphore,
    timeline: TimelineSemaphore,
    cpu_timeline: u64,
}

impl HeadlessSwapchain {
    pub fn new(device: Arc<HeadlessDevice>, size: UVec2, image_count: u32) -> Result<Self, GpuError> {
        let acquire_semaphore = BinarySemaphore(device.create_semaphore_id());
        let present_semaphore = BinarySemaphore(device.create_semaphore_id());
        let timeline = TimelineSemaphore(device.create_semaphore_id());
        let mut swapchain = Self {
            device,
            images: Vec::new(),
            next: 0,
            size,
            format: Format::B8G8R8A8Srgb,
            unready: false,
            acquire_semaphore,
            present_semaphore,
            timeline,
            cpu_timeline: 0,
        };
        swapchain.create_images(image_count.max(1))?;
        Ok(swapchain)
    }

    /// Simulate a minimized or out-of-date surface.
    pub fn set_unready(&mut self, unready: bool) {
        self.unready = unready;
    }

    pub fn images(&self) -> &[ImageId] {
        &self.images
    }

    fn create_images(&mut self, count: u32) -> Result<(), GpuError> {
        for i in 0..count {
            let image = self.device.create_image(&ImageInfo {
                format: self.format,
                size: self.size,
                mip_levels: 1,
                usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                name: format!("swapchain image {i}"),
            })?;
            self.images.push(image);
        }
        Ok(())
    }
}

impl Drop for HeadlessSwapchain {
    fn drop(&mut self) {
        for image in self.images.drain(..) {
            self.device.destroy_image_deferred(image);
        }
    }
}

impl Swapchain for HeadlessSwapchain {
    fn acquire_next_image(&mut self) -> Result<ImageId, GpuError> {
        if self.unready || self.size.x == 0 || self.size.y == 0 {
            return Err(GpuError::SurfaceUnready);
        }
        let image = self.images[self.next % self.images.len()];
        self.next = (self.next + 1) % self.images.len();
        self.cpu_timeline += 1;
        Ok(image)
    }

    fn acquire_semaphore(&self) -> BinarySemaphore {
        self.acquire_semaphore
    }

    fn present_semaphore(&self) -> BinarySemaphore {
        self.present_semaphore
    }

    fn gpu_timeline_semaphore(&self) -> TimelineSemaphore {
        self.timeline
    }

    fn cpu_timeline_value(&self) -> u64 {
        self.cpu_timeline
    }

    fn size(&self) -> UVec2 {
        self.size
    }

    fn format(&self) -> Format {
        self.format
    }

    fn resize(&mut self, size: UVec2) -> Result<(), GpuError> {
        if size == self.size {
            return Ok(());
        }
        let count = self.images.len() as u32;
        for image in self.images.drain(..) {
            self.device.destroy_image_deferred(image);
        }
        self.size = size;
        self.next = 0;
        self.create_images(count)
    }
}
