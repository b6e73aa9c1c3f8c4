use bitflags::bitflags;
use glam::UVec2;

/// Texel formats used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Srgb,
    R16G16Unorm,
    R16G16B16A16Sfloat,
    D16Unorm,
    D32Sfloat,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D16Unorm | Self::D32Sfloat)
    }

    /// Bytes per texel.
    pub fn texel_size(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::D16Unorm => 2,
            Self::R8G8B8A8Unorm
            | Self::R8G8B8A8Srgb
            | Self::B8G8R8A8Srgb
            | Self::R16G16Unorm
            | Self::D32Sfloat => 4,
            Self::R16G16B16A16Sfloat => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Fast device memory, filled through staging copies.
    DeviceLocal,
    /// Mappable memory, written directly with `write_buffer`.
    HostVisible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: u64,
    pub memory: MemoryLocation,
    pub name: String,
}

impl BufferInfo {
    pub fn device_local(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            memory: MemoryLocation::DeviceLocal,
            name: name.into(),
        }
    }

    pub fn staging(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            memory: MemoryLocation::HostVisible,
            name: name.into(),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const COLOR_ATTACHMENT = 1 << 0;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 1;
        const SHADER_READ = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: Format,
    pub size: UVec2,
    pub mip_levels: u32,
    pub usage: ImageUsage,
    pub name: String,
}

impl ImageInfo {
    /// Single-mip render target sampled by later passes.
    pub fn render_target(format: Format, size: UVec2, name: impl Into<String>) -> Self {
        let attachment = if format.is_depth() {
            ImageUsage::DEPTH_STENCIL_ATTACHMENT
        } else {
            ImageUsage::COLOR_ATTACHMENT
        };
        Self {
            format,
            size,
            mip_levels: 1,
            usage: attachment | ImageUsage::SHADER_READ,
            name: name.into(),
        }
    }
}

/// Layout an image is in between uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    AttachmentOptimal,
    ReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    PresentSrc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    LessOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode: AddressMode,
    pub max_anisotropy: Option<f32>,
    pub compare: Option<CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: BorderColor,
    pub name: String,
}

impl SamplerInfo {
    /// Linear, repeating sampler for material textures.
    pub fn linear_repeat(max_lod: f32, name: impl Into<String>) -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_filter: Filter::Linear,
            address_mode: AddressMode::Repeat,
            max_anisotropy: None,
            compare: None,
            min_lod: 0.0,
            max_lod,
            border_color: BorderColor::TransparentBlack,
            name: name.into(),
        }
    }

    /// Comparison sampler for percentage-closer filtering of shadow maps.
    /// Samples outside the map read as lit.
    pub fn pcf(name: impl Into<String>) -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_filter: Filter::Linear,
            address_mode: AddressMode::ClampToBorder,
            max_anisotropy: Some(16.0),
            compare: Some(CompareOp::Less),
            min_lod: 0.0,
            max_lod: 1.0,
            border_color: BorderColor::OpaqueWhite,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub format: Format,
    pub test: bool,
    pub write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPipelineInfo {
    pub name: String,
    /// Shader source identifier, resolved by the backend.
    pub shader: String,
    pub color_formats: Vec<Format>,
    pub depth: Option<DepthState>,
    pub cull: CullMode,
    pub push_constant_size: u32,
}
