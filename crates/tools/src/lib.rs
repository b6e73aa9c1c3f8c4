//! Developer tooling: scene inspector.
//!
//! # Invariants
//! - Tools only read the scene; nothing here raises a dirty flag.

mod inspector;

pub use inspector::{ComponentReport, EntityInfo, SceneInspector, SceneSummary};

pub fn crate_info() -> &'static str {
    "orrery-tools v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("tools"));
    }
}
