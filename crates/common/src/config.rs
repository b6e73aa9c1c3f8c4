//! Engine configuration, read from YAML.
//!
//! Every section carries `#[serde(default)]`, so a config file only needs the
//! keys it wants to override and an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub viewport: ViewportConfig,
    pub shadows: ShadowConfig,
    pub render: RenderConfig,
    pub physics: PhysicsConfig,
    pub assets: AssetConfig,
    pub log: LogConfig,
}

impl EngineConfig {
    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml_str(&text)?;
        tracing::info!(path = %path.as_ref().display(), "engine config loaded");
        Ok(config)
    }

    /// Parse a configuration document. Blank input yields the defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Initial viewport size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Shadow map sizes and light frustum extents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub directional_size: u32,
    pub directional_clip_space: f32,
    pub spot_size: u32,
    pub spot_clip_space: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            directional_size: 2048,
            directional_clip_space: 20.0,
            spot_size: 1024,
            spot_clip_space: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Ambient term fed to the composition pass.
    pub ambient: f32,
    pub swapchain_images: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ambient: 0.1,
            swapchain_images: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Vertical gravity in m/s².
    pub gravity: f32,
    pub fixed_timestep: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: -9.81,
            fixed_timestep: 1.0 / 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Loader threads. `None` uses the available hardware concurrency.
    pub worker_threads: Option<usize>,
}

impl AssetConfig {
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads
            .filter(|n| *n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `orrery_scene=debug`.
    pub filter: String,
    /// Number of records kept for the editor console.
    pub history_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            history_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = EngineConfig::from_yaml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.viewport.height, 720);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = EngineConfig::from_yaml_str("shadows:\n  spot_size: 512\n").unwrap();
        assert_eq!(config.shadows.spot_size, 512);
        assert_eq!(config.shadows.directional_size, 2048);
        assert_eq!(config.physics.gravity, -9.81);
    }

    #[test]
    fn malformed_document_is_parse_error() {
        let err = EngineConfig::from_yaml_str("viewport: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut config = EngineConfig::default();
        config.render.ambient = 0.25;
        config.assets.worker_threads = Some(2);
        std::fs::write(tmp.path(), config.to_yaml_string().unwrap()).unwrap();

        let loaded = EngineConfig::load(tmp.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn worker_threads_fall_back_to_hardware() {
        let config = AssetConfig {
            worker_threads: Some(0),
        };
        assert!(config.resolved_worker_threads() >= 1);
        let fixed = AssetConfig {
            worker_threads: Some(3),
        };
        assert_eq!(fixed.resolved_worker_threads(), 3);
    }
}
