//! Shared foundations: stable identities, configuration, logging.
//!
//! # Invariants
//! - An `EntityId` is never zero. Zero is reserved for "no entity" in files.
//! - Configuration sections always have a usable default.
//! - Logging state is owned by an explicit `LogContext`, never a static.

pub mod config;
pub mod logging;
mod types;

pub use config::{
    AssetConfig, ConfigError, EngineConfig, LogConfig, PhysicsConfig, RenderConfig,
    ShadowConfig, ViewportConfig,
};
pub use logging::{LogContext, LogError, LogRecord, LogSource};
pub use types::EntityId;

pub fn crate_info() -> &'static str {
    "orrery-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
