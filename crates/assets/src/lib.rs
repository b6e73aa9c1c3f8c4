//! Asset loading: textures, glTF meshes and the shared model library.
//!
//! Importing is split in two stages. [`import::read_gltf`] parses a file into
//! CPU-side [`MeshData`] and applies the [`ChannelPolicy`]. [`Model::load`]
//! then decodes the requested textures on the [`LoadPool`], submits every
//! upload and waits for the device before the model is handed out, so a
//! returned model never references a texture that is still uploading.
//!
//! Loaded models are shared through [`ModelLibrary`], keyed by an [`AssetId`]
//! derived from the canonical file path.

mod channel;
pub mod import;
mod library;
mod model;
mod pool;
mod texture;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use orrery_gpu::GpuError;

pub use channel::{ChannelAction, ChannelPolicy, TextureChannel};
pub use import::{MaterialSlots, MeshData, TextureRequest};
pub use library::ModelLibrary;
pub use model::{Material, Model, Primitive, Vertex};
pub use pool::LoadPool;
pub use texture::{Texture, TextureSource, mip_level_count};

/// Content id of an asset, the first 8 bytes of a SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u64);

impl AssetId {
    /// Id of the file at `path`. Paths that name the same file map to the
    /// same id when the file exists.
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self::for_bytes(canonical.to_string_lossy().as_bytes())
    }

    pub fn for_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let result = hasher.finalize();
        let mut id = [0u8; 8];
        id.copy_from_slice(&result[..8]);
        Self(u64::from_le_bytes(id))
    }
}

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(PathBuf),
    #[error("unsupported {channel} texture in {path}")]
    UnsupportedChannel {
        channel: TextureChannel,
        path: String,
    },
    #[error("import error: {0}")]
    Import(String),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("a loading worker exited before finishing its job")]
    WorkerLost,
}

pub fn crate_info() -> &'static str {
    "orrery-assets v0.1.0"
}
