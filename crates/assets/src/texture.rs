use glam::UVec2;
use std::path::PathBuf;
use std::sync::Arc;

use orrery_gpu::{
    BufferInfo, CommandList, Format, GpuBackend, ImageId, ImageInfo, ImageLayout, ImageUsage,
    SamplerId, SamplerInfo,
};

use crate::AssetError;

/// Where texture bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureSource {
    File(PathBuf),
    /// Encoded image embedded in another file.
    Memory { name: String, bytes: Vec<u8> },
}

impl TextureSource {
    pub fn name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory { name, .. } => name.clone(),
        }
    }
}

/// Number of mips in a full chain down to 1x1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    width.max(height).max(1).ilog2() + 1
}

/// A sampled image with its sampler. Released through deferred destruction
/// on drop.
pub struct Texture {
    device: Arc<dyn GpuBackend>,
    pub image: ImageId,
    pub sampler: SamplerId,
    pub size: UVec2,
    pub mip_levels: u32,
    pub format: Format,
    pub name: String,
}

impl Texture {
    /// Decode `source` and record its upload.
    ///
    /// The returned command list copies mip 0 from a staging buffer, blits
    /// the remaining mips and leaves the image in `ReadOnlyOptimal`. The
    /// caller submits it; the texture is unusable until that work completes.
    pub fn load(
        device: &Arc<dyn GpuBackend>,
        source: &TextureSource,
        format: Format,
    ) -> Result<(Self, CommandList), AssetError> {
        let rgba = match source {
            TextureSource::File(path) => {
                if !path.exists() {
                    return Err(AssetError::NotFound(path.clone()));
                }
                image::open(path)?.to_rgba8()
            }
            TextureSource::Memory { bytes, .. } => image::load_from_memory(bytes)?.to_rgba8(),
        };
        let name = source.name();
        let (width, height) = rgba.dimensions();
        let size = UVec2::new(width, height);
        let mip_levels = mip_level_count(width, height);

        let image = device.create_image(&ImageInfo {
            format,
            size,
            mip_levels,
            usage: ImageUsage::SHADER_READ | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
            name: name.clone(),
        })?;
        let sampler = device.create_sampler(&SamplerInfo::linear_repeat(
            mip_levels as f32,
            format!("sampler - {name}"),
        ))?;
        let texture = Self {
            device: device.clone(),
            image,
            sampler,
            size,
            mip_levels,
            format,
            name,
        };

        let pixels = rgba.as_raw();
        let staging = device.create_buffer(&BufferInfo::staging(
            pixels.len() as u64,
            format!("staging - {}", texture.name),
        ))?;
        let mut cmd = CommandList::new(format!("upload {}", texture.name));
        cmd.destroy_buffer_deferred(staging);
        device.write_buffer(staging, 0, pixels)?;

        cmd.transition(image, ImageLayout::Undefined, ImageLayout::TransferDstOptimal);
        cmd.copy_buffer_to_image(staging, image, 0, size);
        for mip in 1..mip_levels {
            cmd.blit_image(image, mip - 1, mip);
        }
        cmd.transition(
            image,
            ImageLayout::TransferDstOptimal,
            ImageLayout::ReadOnlyOptimal,
        );
        cmd.complete()?;

        tracing::debug!(texture = %texture.name, width, height, mip_levels, "texture decoded");
        Ok((texture, cmd))
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.device.destroy_image_deferred(self.image);
        self.device.destroy_sampler(self.sampler);
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("size", &self.size)
            .field("mip_levels", &self.mip_levels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_gpu::{HeadlessDevice, SubmitInfo};

    #[test]
    fn mip_counts() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(4, 4), 3);
        assert_eq!(mip_level_count(1024, 512), 11);
        assert_eq!(mip_level_count(300, 7), 9);
    }

    #[test]
    fn load_png_records_upload_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("albedo.png");
        image::RgbaImage::from_pixel(8, 4, image::Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn GpuBackend> = headless.clone();
        let (texture, cmd) =
            Texture::load(&device, &TextureSource::File(path), Format::R8G8B8A8Srgb).unwrap();
        assert_eq!(texture.mip_levels, 4);
        assert_eq!(texture.size, UVec2::new(8, 4));

        device.submit(SubmitInfo::commands(vec![cmd])).unwrap();
        device.wait_idle();
        assert_eq!(
            headless.image_layout(texture.image),
            Some(ImageLayout::ReadOnlyOptimal)
        );
        assert_eq!(headless.stats().image_uploads, 1);
        assert_eq!(headless.stats().blits, 3);
        assert!(headless.violations().is_empty());
    }

    #[test]
    fn missing_file_is_not_found() {
        let device: Arc<dyn GpuBackend> = Arc::new(HeadlessDevice::new());
        let result = Texture::load(
            &device,
            &TextureSource::File("does/not/exist.png".into()),
            Format::R8G8B8A8Unorm,
        );
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }

    #[test]
    fn drop_releases_image() {
        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn GpuBackend> = headless.clone();
        let mut bytes = Vec::new();
        image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 0, 255]))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let source = TextureSource::Memory {
            name: "embedded".into(),
            bytes,
        };
        let (texture, cmd) = Texture::load(&device, &source, Format::R8G8B8A8Unorm).unwrap();
        device.submit(SubmitInfo::commands(vec![cmd])).unwrap();
        let image = texture.image;
        drop(texture);
        device.wait_idle();
        assert!(!headless.is_image_alive(image));
        assert_eq!(headless.live_samplers(), 0);
    }
}
