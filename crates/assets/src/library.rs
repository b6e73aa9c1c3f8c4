use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use orrery_gpu::GpuBackend;

use crate::channel::ChannelPolicy;
use crate::import::MeshData;
use crate::model::Model;
use crate::pool::LoadPool;
use crate::{AssetError, AssetId};

/// Shared, deduplicated models.
///
/// Every entity that references the same file receives the same
/// `Arc<Model>`. The library keeps a strong reference until
/// [`ModelLibrary::evict_unused`] or [`ModelLibrary::clear`].
pub struct ModelLibrary {
    device: Arc<dyn GpuBackend>,
    pool: LoadPool,
    policy: ChannelPolicy,
    models: Mutex<HashMap<AssetId, Arc<Model>>>,
}

impl ModelLibrary {
    pub fn new(device: Arc<dyn GpuBackend>, pool: LoadPool, policy: ChannelPolicy) -> Self {
        Self {
            device,
            pool,
            policy,
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &ChannelPolicy {
        &self.policy
    }

    /// Cached model for `path`, importing it on first use.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Arc<Model>, AssetError> {
        let path = path.as_ref();
        let id = AssetId::for_path(path);
        if let Some(model) = self.models.lock().get(&id) {
            return Ok(model.clone());
        }
        let model = Arc::new(Model::load(&self.device, path, &self.policy, &self.pool)?);
        self.models.lock().insert(id, model.clone());
        Ok(model)
    }

    /// Upload in-memory mesh data under a synthetic name.
    pub fn insert_mesh(&self, name: &str, data: MeshData) -> Result<Arc<Model>, AssetError> {
        let id = AssetId::for_bytes(name.as_bytes());
        if let Some(model) = self.models.lock().get(&id) {
            return Ok(model.clone());
        }
        let model = Arc::new(Model::from_mesh(&self.device, name, data, &self.pool)?);
        self.models.lock().insert(id, model.clone());
        Ok(model)
    }

    pub fn get(&self, id: AssetId) -> Option<Arc<Model>> {
        self.models.lock().get(&id).cloned()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.models.lock().contains_key(&AssetId::for_path(path))
    }

    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.lock().is_empty()
    }

    /// Drop models no entity references any more. Returns how many went.
    pub fn evict_unused(&self) -> usize {
        let mut models = self.models.lock();
        let before = models.len();
        models.retain(|_, model| Arc::strong_count(model) > 1);
        let evicted = before - models.len();
        if evicted > 0 {
            tracing::debug!(evicted, "unused models evicted");
        }
        evicted
    }

    pub fn clear(&self) {
        self.models.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::tests::write_triangle;
    use orrery_gpu::HeadlessDevice;

    fn library() -> (Arc<HeadlessDevice>, ModelLibrary) {
        let headless = Arc::new(HeadlessDevice::new());
        let library = ModelLibrary::new(
            headless.clone(),
            LoadPool::new(1, None),
            ChannelPolicy::default(),
        );
        (headless, library)
    }

    #[test]
    fn same_path_is_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_triangle(dir.path(), None, "");
        let (headless, library) = library();

        let a = library.load(&path).unwrap();
        let b = library.load(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(library.len(), 1);
        assert_eq!(headless.stats().wait_idles, 1);
        assert!(library.contains(&path));
    }

    #[test]
    fn evict_drops_unreferenced_models() {
        let (_headless, library) = library();
        let cube = library.insert_mesh("cube", MeshData::unit_cube()).unwrap();
        library.insert_mesh("other", MeshData::unit_cube()).unwrap();
        assert_eq!(library.evict_unused(), 1);
        assert_eq!(library.len(), 1);
        drop(cube);
        assert_eq!(library.evict_unused(), 1);
        assert!(library.is_empty());
    }

    #[test]
    fn missing_file_is_not_cached() {
        let (_headless, library) = library();
        assert!(library.load("missing.gltf").is_err());
        assert!(library.is_empty());
    }
}
