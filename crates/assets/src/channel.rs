use std::collections::HashMap;
use std::fmt;

use orrery_gpu::Format;

/// Kind of texture a material can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureChannel {
    Diffuse,
    Specular,
    Ambient,
    Emissive,
    Height,
    Normals,
    Shininess,
    Opacity,
    Displacement,
    Lightmap,
    Reflection,
    BaseColor,
    NormalCamera,
    EmissionColor,
    Metalness,
    Roughness,
    AmbientOcclusion,
    Sheen,
    Clearcoat,
    Transmission,
}

impl TextureChannel {
    pub const ALL: [TextureChannel; 20] = [
        Self::Diffuse,
        Self::Specular,
        Self::Ambient,
        Self::Emissive,
        Self::Height,
        Self::Normals,
        Self::Shininess,
        Self::Opacity,
        Self::Displacement,
        Self::Lightmap,
        Self::Reflection,
        Self::BaseColor,
        Self::NormalCamera,
        Self::EmissionColor,
        Self::Metalness,
        Self::Roughness,
        Self::AmbientOcclusion,
        Self::Sheen,
        Self::Clearcoat,
        Self::Transmission,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Diffuse => "diffuse",
            Self::Specular => "specular",
            Self::Ambient => "ambient",
            Self::Emissive => "emissive",
            Self::Height => "height",
            Self::Normals => "normals",
            Self::Shininess => "shininess",
            Self::Opacity => "opacity",
            Self::Displacement => "displacement",
            Self::Lightmap => "lightmap",
            Self::Reflection => "reflection",
            Self::BaseColor => "base color",
            Self::NormalCamera => "camera-space normals",
            Self::EmissionColor => "emission color",
            Self::Metalness => "metalness",
            Self::Roughness => "roughness",
            Self::AmbientOcclusion => "ambient occlusion",
            Self::Sheen => "sheen",
            Self::Clearcoat => "clearcoat",
            Self::Transmission => "transmission",
        }
    }
}

impl fmt::Display for TextureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the importer does with a channel it finds on a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    /// Decode the texture into an image of this format.
    Load(Format),
    /// Accept the material but drop the texture.
    Ignore,
    /// Fail the import with `AssetError::UnsupportedChannel`.
    Reject,
}

/// Per-channel import decisions.
///
/// The default rejects every channel the renderer cannot shade, so that an
/// asset relying on one fails loudly. Lightmaps (which glTF occlusion
/// textures import as) and base color (which duplicates diffuse) are the
/// tolerated exceptions.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPolicy {
    actions: HashMap<TextureChannel, ChannelAction>,
}

impl ChannelPolicy {
    pub fn action(&self, channel: TextureChannel) -> ChannelAction {
        self.actions
            .get(&channel)
            .copied()
            .unwrap_or(ChannelAction::Reject)
    }

    pub fn with(mut self, channel: TextureChannel, action: ChannelAction) -> Self {
        self.actions.insert(channel, action);
        self
    }

    pub fn set(&mut self, channel: TextureChannel, action: ChannelAction) {
        self.actions.insert(channel, action);
    }
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        let mut actions: HashMap<_, _> = TextureChannel::ALL
            .into_iter()
            .map(|c| (c, ChannelAction::Reject))
            .collect();
        actions.insert(TextureChannel::Diffuse, ChannelAction::Load(Format::R8G8B8A8Srgb));
        actions.insert(TextureChannel::Normals, ChannelAction::Load(Format::R8G8B8A8Unorm));
        actions.insert(TextureChannel::Metalness, ChannelAction::Load(Format::R8G8B8A8Unorm));
        actions.insert(TextureChannel::Roughness, ChannelAction::Load(Format::R8G8B8A8Unorm));
        actions.insert(TextureChannel::Lightmap, ChannelAction::Ignore);
        actions.insert(TextureChannel::BaseColor, ChannelAction::Ignore);
        Self { actions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let policy = ChannelPolicy::default();
        assert_eq!(
            policy.action(TextureChannel::Diffuse),
            ChannelAction::Load(Format::R8G8B8A8Srgb)
        );
        assert_eq!(
            policy.action(TextureChannel::Roughness),
            ChannelAction::Load(Format::R8G8B8A8Unorm)
        );
        assert_eq!(policy.action(TextureChannel::Lightmap), ChannelAction::Ignore);
        assert_eq!(policy.action(TextureChannel::BaseColor), ChannelAction::Ignore);
        for channel in [
            TextureChannel::Specular,
            TextureChannel::Emissive,
            TextureChannel::AmbientOcclusion,
            TextureChannel::Transmission,
        ] {
            assert_eq!(policy.action(channel), ChannelAction::Reject, "{channel}");
        }
    }

    #[test]
    fn override_channel() {
        let policy = ChannelPolicy::default()
            .with(TextureChannel::Emissive, ChannelAction::Load(Format::R8G8B8A8Srgb));
        assert_eq!(
            policy.action(TextureChannel::Emissive),
            ChannelAction::Load(Format::R8G8B8A8Srgb)
        );
    }
}
