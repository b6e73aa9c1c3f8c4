//! glTF 2.0 import into CPU-side mesh data.

use glam::{Mat3, Mat4, Vec3};
use std::collections::HashMap;
use std::path::Path;

use orrery_gpu::Format;

use crate::channel::{ChannelAction, ChannelPolicy, TextureChannel};
use crate::model::{Primitive, Vertex};
use crate::texture::TextureSource;
use crate::AssetError;

/// A texture the importer wants decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRequest {
    pub source: TextureSource,
    pub format: Format,
}

/// Texture slots of one material, as indices into [`MeshData::textures`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterialSlots {
    pub albedo: Option<usize>,
    pub normal_map: Option<usize>,
    pub metallic: Option<usize>,
    pub roughness: Option<usize>,
    /// Metalness and roughness share one image.
    pub metallic_roughness_combined: bool,
}

/// Interleaved geometry plus material table, ready for upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub primitives: Vec<Primitive>,
    /// The last entry is the default material used by primitives without one.
    pub materials: Vec<MaterialSlots>,
    pub textures: Vec<TextureRequest>,
}

impl MeshData {
    /// Axis-aligned cube of edge 1 centered on the origin, one material.
    pub fn unit_cube() -> Self {
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::NEG_Y, Vec3::NEG_Z, Vec3::X),
            (Vec3::Z, Vec3::Y, Vec3::NEG_X),
            (Vec3::NEG_Z, Vec3::Y, Vec3::X),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up, right) in faces {
            let base = vertices.len() as u32;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let position = normal * 0.5 + right * (u - 0.5) + up * (v - 0.5);
                vertices.push(Vertex {
                    position: position.to_array(),
                    normal: normal.to_array(),
                    uv: [u, v],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self {
            primitives: vec![Primitive {
                first_index: 0,
                first_vertex: 0,
                index_count: indices.len() as u32,
                vertex_count: vertices.len() as u32,
                material_index: 0,
            }],
            vertices,
            indices,
            materials: vec![MaterialSlots::default()],
            textures: Vec::new(),
        }
    }
}

/// Parse a `.gltf`/`.glb` file. Texture channels are resolved through
/// `policy`; a rejected channel fails the whole import.
pub fn read_gltf(path: impl AsRef<Path>, policy: &ChannelPolicy) -> Result<MeshData, AssetError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AssetError::NotFound(path.to_path_buf()));
    }
    let reader = std::io::BufReader::new(std::fs::File::open(path)?);
    let gltf = gltf::Gltf::from_reader_without_validation(reader)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let buffers = load_buffers(&gltf, base)?;
    let display = path.display().to_string();

    for extension in gltf.extensions_used() {
        let channel = match extension {
            "KHR_materials_specular" => TextureChannel::Specular,
            "KHR_materials_sheen" => TextureChannel::Sheen,
            "KHR_materials_clearcoat" => TextureChannel::Clearcoat,
            "KHR_materials_transmission" => TextureChannel::Transmission,
            _ => continue,
        };
        if policy.action(channel) == ChannelAction::Reject {
            return Err(AssetError::UnsupportedChannel {
                channel,
                path: format!("{display} ({extension})"),
            });
        }
    }

    let mut data = MeshData::default();
    let mut texture_index: HashMap<String, usize> = HashMap::new();
    for material in gltf.materials() {
        let pbr = material.pbr_metallic_roughness();
        let mut found: Vec<(TextureChannel, gltf::Texture)> = Vec::new();
        if let Some(info) = pbr.base_color_texture() {
            found.push((TextureChannel::Diffuse, info.texture()));
            found.push((TextureChannel::BaseColor, info.texture()));
        }
        if let Some(normal) = material.normal_texture() {
            found.push((TextureChannel::Normals, normal.texture()));
        }
        if let Some(info) = pbr.metallic_roughness_texture() {
            found.push((TextureChannel::Metalness, info.texture()));
            found.push((TextureChannel::Roughness, info.texture()));
        }
        if let Some(occlusion) = material.occlusion_texture() {
            found.push((TextureChannel::Lightmap, occlusion.texture()));
        }
        if let Some(info) = material.emissive_texture() {
            found.push((TextureChannel::Emissive, info.texture()));
        }

        let mut slots = MaterialSlots::default();
        for (channel, texture) in found {
            let (key, source) = texture_source(&texture, base, &buffers, &display)?;
            let format = match policy.action(channel) {
                ChannelAction::Load(format) => format,
                ChannelAction::Ignore => {
                    tracing::trace!(%channel, texture = %key, "texture channel ignored");
                    continue;
                }
                ChannelAction::Reject => {
                    return Err(AssetError::UnsupportedChannel { channel, path: key });
                }
            };
            let index = *texture_index.entry(key).or_insert_with(|| {
                data.textures.push(TextureRequest { source, format });
                data.textures.len() - 1
            });
            match channel {
                TextureChannel::Diffuse => slots.albedo = Some(index),
                TextureChannel::Normals => slots.normal_map = Some(index),
                TextureChannel::Metalness => slots.metallic = Some(index),
                TextureChannel::Roughness => slots.roughness = Some(index),
                _ => {}
            }
        }
        slots.metallic_roughness_combined =
            slots.metallic.is_some() && slots.metallic == slots.roughness;
        data.materials.push(slots);
    }
    let default_material = data.materials.len() as u32;
    data.materials.push(MaterialSlots::default());

    let roots: Vec<gltf::Node> = match gltf.default_scene().or_else(|| gltf.scenes().next()) {
        Some(scene) => scene.nodes().collect(),
        None => gltf.nodes().collect(),
    };
    for node in roots {
        read_node(&node, Mat4::IDENTITY, &buffers, default_material, &mut data)?;
    }

    tracing::debug!(
        path = %path.display(),
        vertices = data.vertices.len(),
        indices = data.indices.len(),
        primitives = data.primitives.len(),
        textures = data.textures.len(),
        "glTF imported"
    );
    Ok(data)
}

fn load_buffers(gltf: &gltf::Gltf, base: &Path) -> Result<Vec<Vec<u8>>, AssetError> {
    let mut buffers = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => {
                let blob = gltf
                    .blob
                    .as_deref()
                    .ok_or_else(|| AssetError::Import("missing GLB binary chunk".into()))?;
                buffers.push(blob.to_vec());
            }
            gltf::buffer::Source::Uri(uri) => {
                if uri.starts_with("data:") {
                    return Err(AssetError::Import("embedded data URIs are not supported".into()));
                }
                let buffer_path = base.join(uri);
                if !buffer_path.exists() {
                    return Err(AssetError::NotFound(buffer_path));
                }
                buffers.push(std::fs::read(buffer_path)?);
            }
        }
    }
    Ok(buffers)
}

fn texture_source(
    texture: &gltf::Texture,
    base: &Path,
    buffers: &[Vec<u8>],
    display: &str,
) -> Result<(String, TextureSource), AssetError> {
    let image = texture.source();
    match image.source() {
        gltf::image::Source::Uri { uri, .. } => {
            let path = base.join(uri);
            Ok((path.display().to_string(), TextureSource::File(path)))
        }
        gltf::image::Source::View { view, .. } => {
            let start = view.offset();
            let end = start + view.length();
            let bytes = buffers
                .get(view.buffer().index())
                .and_then(|b| b.get(start..end))
                .ok_or_else(|| AssetError::Import(format!("image {} out of bounds", image.index())))?;
            let name = format!("{display}#image{}", image.index());
            Ok((
                name.clone(),
                TextureSource::Memory {
                    name,
                    bytes: bytes.to_vec(),
                },
            ))
        }
    }
}

fn read_node(
    node: &gltf::Node,
    parent: Mat4,
    buffers: &[Vec<u8>],
    default_material: u32,
    data: &mut MeshData,
) -> Result<(), AssetError> {
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        let normal_matrix = Mat3::from_mat4(world).inverse().transpose();
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                return Err(AssetError::Import(format!(
                    "mesh {} uses unsupported primitive mode {:?}",
                    mesh.index(),
                    primitive.mode()
                )));
            }
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .ok_or_else(|| AssetError::Import(format!("mesh {} has no positions", mesh.index())))?
                .collect();
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|n| n.collect())
                .unwrap_or_else(|| vec![[0.0; 3]; positions.len()]);
            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|t| t.into_f32().collect())
                .unwrap_or_else(|| vec![[0.0; 2]; positions.len()]);
            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };

            let first_vertex = data.vertices.len() as u32;
            let first_index = data.indices.len() as u32;
            for (i, position) in positions.iter().enumerate() {
                let normal = normals.get(i).copied().unwrap_or([0.0; 3]);
                let normal = (normal_matrix * Vec3::from(normal)).normalize_or_zero();
                data.vertices.push(Vertex {
                    position: world.transform_point3(Vec3::from(*position)).to_array(),
                    normal: normal.to_array(),
                    uv: uvs.get(i).copied().unwrap_or([0.0; 2]),
                });
            }
            data.indices.extend_from_slice(&indices);
            data.primitives.push(Primitive {
                first_index,
                first_vertex,
                index_count: indices.len() as u32,
                vertex_count: positions.len() as u32,
                material_index: primitive
                    .material()
                    .index()
                    .map_or(default_material, |i| i as u32),
            });
        }
    }
    for child in node.children() {
        read_node(&child, world, buffers, default_material, data)?;
    }
    Ok(())
}
