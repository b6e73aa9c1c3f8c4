use bytemuck::{Pod, Zeroable};
use std::path::Path;
use std::sync::Arc;

use orrery_gpu::{
    BufferId, BufferInfo, CommandList, GpuBackend, GpuError, ImageId, SamplerId, SubmitInfo,
    stage_upload,
};

use crate::AssetError;
use crate::channel::ChannelPolicy;
use crate::import::{MeshData, read_gltf};
use crate::pool::LoadPool;
use crate::texture::Texture;

/// Interleaved vertex as the geometry passes read it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// A draw range inside the model's shared vertex and index buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Primitive {
    pub first_index: u32,
    pub first_vertex: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    pub material_index: u32,
}

/// Resolved material bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Material {
    pub albedo: Option<(ImageId, SamplerId)>,
    pub normal_map: Option<(ImageId, SamplerId)>,
    pub metallic: Option<(ImageId, SamplerId)>,
    pub roughness: Option<(ImageId, SamplerId)>,
    pub metallic_roughness_combined: bool,
}

/// GPU-resident mesh with its textures.
pub struct Model {
    device: Arc<dyn GpuBackend>,
    pub name: String,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub textures: Vec<Texture>,
    pub materials: Vec<Material>,
    pub primitives: Vec<Primitive>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl Model {
    /// Import a glTF file and upload it.
    pub fn load(
        device: &Arc<dyn GpuBackend>,
        path: impl AsRef<Path>,
        policy: &ChannelPolicy,
        pool: &LoadPool,
    ) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let data = read_gltf(path, policy)?;
        let model = Self::from_mesh(device, path.display().to_string(), data, pool)?;
        tracing::info!(
            path = %path.display(),
            primitives = model.primitives.len(),
            textures = model.textures.len(),
            "model loaded"
        );
        Ok(model)
    }

    /// Upload already imported mesh data.
    ///
    /// Textures decode on `pool`. Every upload list is submitted and the
    /// device is idled before this returns, so material bindings are valid
    /// for the first draw.
    pub fn from_mesh(
        device: &Arc<dyn GpuBackend>,
        name: impl Into<String>,
        data: MeshData,
        pool: &LoadPool,
    ) -> Result<Self, AssetError> {
        let name = name.into();
        let jobs: Vec<_> = data
            .textures
            .iter()
            .cloned()
            .map(|request| {
                let device = device.clone();
                move || Texture::load(&device, &request.source, request.format)
            })
            .collect();
        let loaded = pool.run_all(jobs)?;

        let mut textures = Vec::with_capacity(loaded.len());
        let mut lists = Vec::with_capacity(loaded.len() + 1);
        let mut first_error = None;
        for result in loaded {
            match result {
                Ok((texture, cmd)) => {
                    textures.push(texture);
                    lists.push(cmd);
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            // Lists are never submitted: release their staging buffers now.
            for cmd in &lists {
                discard_staging(device.as_ref(), cmd);
            }
            return Err(err);
        }

        let (vertex_buffer, index_buffer) = upload_geometry(device.as_ref(), &name, &data, lists)?;
        let texture_count = textures.len();
        device.wait_idle();
        tracing::debug!(model = %name, textures = texture_count, "uploads complete");

        let binding = |slot: Option<usize>| {
            slot.and_then(|i| textures.get(i))
                .map(|t: &Texture| (t.image, t.sampler))
        };
        let materials = data
            .materials
            .iter()
            .map(|m| Material {
                albedo: binding(m.albedo),
                normal_map: binding(m.normal_map),
                metallic: binding(m.metallic),
                roughness: binding(m.roughness),
                metallic_roughness_combined: m.metallic_roughness_combined,
            })
            .collect();

        Ok(Self {
            device: device.clone(),
            name,
            vertex_buffer,
            index_buffer,
            textures,
            materials,
            primitives: data.primitives,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
        })
    }

    /// Record one indexed draw per primitive. `before_draw` runs ahead of
    /// each draw so callers can push per-primitive constants.
    pub fn draw(
        &self,
        cmd: &mut CommandList,
        mut before_draw: impl FnMut(&mut CommandList, &Primitive, &Material),
    ) {
        let fallback = Material::default();
        for primitive in &self.primitives {
            let material = self
                .materials
                .get(primitive.material_index as usize)
                .unwrap_or(&fallback);
            before_draw(cmd, primitive, material);
            cmd.draw_indexed(
                self.index_buffer,
                primitive.index_count,
                primitive.first_index,
                primitive.first_vertex as i32,
            );
        }
    }
}

/// Create the geometry buffers and submit them after `lists`.
///
/// On failure nothing created here outlives the call: unsubmitted staging
/// is released at once and the geometry buffers once submitted work retires.
fn upload_geometry(
    device: &dyn GpuBackend,
    name: &str,
    data: &MeshData,
    mut lists: Vec<CommandList>,
) -> Result<(BufferId, BufferId), GpuError> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);
    let vertex_buffer = match device.create_buffer(&BufferInfo::device_local(
        vertex_bytes.len().max(1) as u64,
        format!("vertex buffer - {name}"),
    )) {
        Ok(buffer) => buffer,
        Err(err) => {
            lists.iter().for_each(|cmd| discard_staging(device, cmd));
            return Err(err);
        }
    };
    let index_buffer = match device.create_buffer(&BufferInfo::device_local(
        index_bytes.len().max(1) as u64,
        format!("index buffer - {name}"),
    )) {
        Ok(buffer) => buffer,
        Err(err) => {
            device.destroy_buffer(vertex_buffer);
            lists.iter().for_each(|cmd| discard_staging(device, cmd));
            return Err(err);
        }
    };

    let mut cmd = CommandList::new(format!("upload mesh {name}"));
    let recorded = (|| {
        if !vertex_bytes.is_empty() {
            stage_upload(device, &mut cmd, vertex_buffer, vertex_bytes, name)?;
        }
        if !index_bytes.is_empty() {
            stage_upload(device, &mut cmd, index_buffer, index_bytes, name)?;
        }
        cmd.complete()
    })();
    let submitted = match recorded {
        Ok(()) => {
            lists.push(cmd);
            submit_each(device, lists)
        }
        Err(err) => {
            discard_staging(device, &cmd);
            lists.iter().for_each(|cmd| discard_staging(device, cmd));
            Err(err)
        }
    };
    if let Err(err) = submitted {
        device.destroy_buffer_deferred(vertex_buffer);
        device.destroy_buffer_deferred(index_buffer);
        return Err(err);
    }
    Ok((vertex_buffer, index_buffer))
}

/// Submit each list on its own. Lists behind a failed submission never
/// reach the queue, so their staging is released here.
fn submit_each(device: &dyn GpuBackend, lists: Vec<CommandList>) -> Result<(), GpuError> {
    let mut lists = lists.into_iter();
    while let Some(list) = lists.next() {
        if let Err(err) = device.submit(SubmitInfo::commands(vec![list])) {
            lists.for_each(|cmd| discard_staging(device, &cmd));
            return Err(err);
        }
    }
    Ok(())
}

fn discard_staging(device: &dyn GpuBackend, cmd: &CommandList) {
    for buffer in cmd.deferred_buffers() {
        device.destroy_buffer(*buffer);
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        self.device.destroy_buffer_deferred(self.vertex_buffer);
        self.device.destroy_buffer_deferred(self.index_buffer);
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .field("primitives", &self.primitives.len())
            .field("textures", &self.textures.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::tests::write_triangle;
    use orrery_gpu::{
        Command, HeadlessDevice, ImageInfo, ImageLayout, PipelineId, PresentInfo,
        RasterPipelineInfo, SamplerInfo,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn devices() -> (Arc<HeadlessDevice>, Arc<dyn GpuBackend>) {
        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn GpuBackend> = headless.clone();
        (headless, device)
    }

    /// Headless device whose queue accepts `accepted` submissions and then
    /// fails every later one.
    struct RejectingQueue {
        inner: Arc<HeadlessDevice>,
        accepted: AtomicUsize,
    }

    impl GpuBackend for RejectingQueue {
        fn create_buffer(&self, info: &BufferInfo) -> Result<BufferId, GpuError> {
            self.inner.create_buffer(info)
        }
        fn destroy_buffer(&self, buffer: BufferId) {
            self.inner.destroy_buffer(buffer)
        }
        fn destroy_buffer_deferred(&self, buffer: BufferId) {
            self.inner.destroy_buffer_deferred(buffer)
        }
        fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
            self.inner.write_buffer(buffer, offset, data)
        }
        fn device_address(&self, buffer: BufferId) -> Result<u64, GpuError> {
            self.inner.device_address(buffer)
        }
        fn create_image(&self, info: &ImageInfo) -> Result<ImageId, GpuError> {
            self.inner.create_image(info)
        }
        fn destroy_image(&self, image: ImageId) {
            self.inner.destroy_image(image)
        }
        fn destroy_image_deferred(&self, image: ImageId) {
            self.inner.destroy_image_deferred(image)
        }
        fn image_info(&self, image: ImageId) -> Result<ImageInfo, GpuError> {
            self.inner.image_info(image)
        }
        fn create_sampler(&self, info: &SamplerInfo) -> Result<SamplerId, GpuError> {
            self.inner.create_sampler(info)
        }
        fn destroy_sampler(&self, sampler: SamplerId) {
            self.inner.destroy_sampler(sampler)
        }
        fn create_raster_pipeline(&self, info: &RasterPipelineInfo) -> Result<PipelineId, GpuError> {
            self.inner.create_raster_pipeline(info)
        }
        fn destroy_pipeline(&self, pipeline: PipelineId) {
            self.inner.destroy_pipeline(pipeline)
        }
        fn submit(&self, info: SubmitInfo) -> Result<(), GpuError> {
            let accepted = self.accepted.load(Ordering::SeqCst);
            if accepted == 0 {
                return Err(GpuError::IncompleteCommandList("queue lost".into()));
            }
            self.accepted.store(accepted - 1, Ordering::SeqCst);
            self.inner.submit(info)
        }
        fn present(&self, info: PresentInfo) -> Result<(), GpuError> {
            self.inner.present(info)
        }
        fn wait_idle(&self) {
            self.inner.wait_idle()
        }
    }

    fn rejecting(accepted: usize) -> (Arc<HeadlessDevice>, Arc<dyn GpuBackend>) {
        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn GpuBackend> = Arc::new(RejectingQueue {
            inner: headless.clone(),
            accepted: AtomicUsize::new(accepted),
        });
        (headless, device)
    }

    #[test]
    fn cube_uploads_geometry() {
        let (headless, device) = devices();
        let pool = LoadPool::new(2, None);
        let model = Model::from_mesh(&device, "cube", MeshData::unit_cube(), &pool).unwrap();

        let expected = MeshData::unit_cube();
        let vertices = headless.buffer_contents(model.vertex_buffer).unwrap();
        assert_eq!(vertices, bytemuck::cast_slice::<_, u8>(&expected.vertices));
        let indices = headless.buffer_contents(model.index_buffer).unwrap();
        assert_eq!(indices, bytemuck::cast_slice::<_, u8>(&expected.indices));
        assert_eq!(headless.stats().wait_idles, 1);
        assert_eq!(headless.in_flight(), 0);
    }

    #[test]
    fn gltf_with_texture_is_ready_after_load() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]))
            .save(dir.path().join("albedo.png"))
            .unwrap();
        let material = r#"{ "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } } }"#;
        let textures = r#""images": [{ "uri": "albedo.png" }], "textures": [{ "source": 0 }],"#;
        let path = write_triangle(dir.path(), Some(material), textures);

        let (headless, device) = devices();
        let pool = LoadPool::new(2, None);
        let model = Model::load(&device, &path, &ChannelPolicy::default(), &pool).unwrap();

        assert_eq!(model.textures.len(), 1);
        let (image, _) = model.materials[0].albedo.unwrap();
        assert_eq!(headless.image_layout(image), Some(ImageLayout::ReadOnlyOptimal));
        assert_eq!(headless.stats().submissions, 2);
        assert!(headless.violations().is_empty());
    }

    #[test]
    fn missing_texture_fails_without_leaking_staging() {
        let dir = tempfile::tempdir().unwrap();
        let material = r#"{ "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } } }"#;
        let textures = r#""images": [{ "uri": "absent.png" }], "textures": [{ "source": 0 }],"#;
        let path = write_triangle(dir.path(), Some(material), textures);

        let (headless, device) = devices();
        let pool = LoadPool::new(1, None);
        let result = Model::load(&device, &path, &ChannelPolicy::default(), &pool);
        assert!(matches!(result, Err(AssetError::NotFound(_))));
        assert_eq!(headless.live_buffers(), 0);
    }

    #[test]
    fn rejected_mesh_upload_releases_geometry() {
        let (headless, device) = rejecting(0);
        let pool = LoadPool::new(1, None);
        let result = Model::from_mesh(&device, "cube", MeshData::unit_cube(), &pool);
        assert!(matches!(result, Err(AssetError::Gpu(_))));
        headless.wait_idle();
        assert_eq!(headless.live_buffers(), 0);
    }

    #[test]
    fn mesh_rejected_after_texture_upload_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]))
            .save(dir.path().join("albedo.png"))
            .unwrap();
        let material = r#"{ "pbrMetallicRoughness": { "baseColorTexture": { "index": 0 } } }"#;
        let textures = r#""images": [{ "uri": "albedo.png" }], "textures": [{ "source": 0 }],"#;
        let path = write_triangle(dir.path(), Some(material), textures);

        let (headless, device) = rejecting(1);
        let pool = LoadPool::new(1, None);
        let result = Model::load(&device, &path, &ChannelPolicy::default(), &pool);
        assert!(matches!(result, Err(AssetError::Gpu(_))));
        assert_eq!(headless.stats().submissions, 1);
        headless.wait_idle();
        assert_eq!(headless.live_buffers(), 0);
        assert_eq!(headless.live_images(), 0);
    }

    #[test]
    fn draw_records_one_call_per_primitive() {
        let (_headless, device) = devices();
        let pool = LoadPool::new(1, None);
        let model = Model::from_mesh(&device, "cube", MeshData::unit_cube(), &pool).unwrap();
        let mut cmd = CommandList::new("draw");
        let mut seen = 0;
        model.draw(&mut cmd, |_, _, _| seen += 1);
        assert_eq!(seen, 1);
        assert!(matches!(
            cmd.commands()[0],
            Command::DrawIndexed { index_count: 36, .. }
        ));
    }

    #[test]
    fn drop_releases_buffers() {
        let (headless, device) = devices();
        let pool = LoadPool::new(1, None);
        let model = Model::from_mesh(&device, "cube", MeshData::unit_cube(), &pool).unwrap();
        drop(model);
        device.wait_idle();
        assert_eq!(headless.live_buffers(), 0);
    }
}
