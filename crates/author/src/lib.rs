//! Scene authoring: undoable editing commands.
//!
//! # Invariants
//! - Every command the [`Editor`] applies can be undone and redone.
//! - Commands name entities by [`orrery_common::EntityId`], so they stay
//!   valid across a create/undo/redo cycle that hands out new handles.

mod editor;

pub use editor::{EditCommand, EditError, Editor, Placement};

pub fn crate_info() -> &'static str {
    "orrery-author v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("author"));
    }
}
