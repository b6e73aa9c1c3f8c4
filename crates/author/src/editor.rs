use glam::Vec3;
use orrery_common::EntityId;
use orrery_ecs::{Entity, Tag, Transform};
use orrery_scene::{Scene, SceneError};

/// Position, Euler rotation in degrees and scale of a transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Placement {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    fn of(transform: &Transform) -> Self {
        Self {
            position: transform.position,
            rotation: transform.rotation,
            scale: transform.scale,
        }
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// An editing command applied to a scene.
///
/// Each command carries enough context to undo itself.
#[derive(Debug, Clone, PartialEq)]
pub enum EditCommand {
    /// Create an entity. Undo destroys it along with anything parented
    /// under it since.
    Create {
        id: EntityId,
        name: String,
        parent: Option<EntityId>,
    },
    Rename {
        id: EntityId,
        old: String,
        new: String,
    },
    /// Move an entity. `old` is `None` when it had no transform before.
    SetTransform {
        id: EntityId,
        old: Option<Placement>,
        new: Placement,
    },
    Reparent {
        id: EntityId,
        old: Option<EntityId>,
        new: Option<EntityId>,
    },
}

impl EditCommand {
    pub fn target(&self) -> EntityId {
        match self {
            Self::Create { id, .. }
            | Self::Rename { id, .. }
            | Self::SetTransform { id, .. }
            | Self::Reparent { id, .. } => *id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Rename { .. } => "rename",
            Self::SetTransform { .. } => "set transform",
            Self::Reparent { .. } => "reparent",
        }
    }
}

/// Errors from edit operations.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Undo/redo stacks over the edits made to a scene.
///
/// The editor does not own the scene. Edits made to the scene behind its
/// back are fine as long as they do not destroy entities a recorded command
/// refers to; replaying such a command fails with `EntityNotFound` and leaves
/// the stacks as they were.
pub struct Editor {
    undo_stack: Vec<EditCommand>,
    redo_stack: Vec<EditCommand>,
}

impl Editor {
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    /// Create an entity, at the top level or under `parent`.
    pub fn create(
        &mut self,
        scene: &mut Scene,
        name: &str,
        parent: Option<EntityId>,
    ) -> Result<EntityId, EditError> {
        let cmd = EditCommand::Create {
            id: EntityId::new(),
            name: name.to_string(),
            parent,
        };
        apply(scene, &cmd)?;
        Ok(self.record(cmd))
    }

    pub fn rename(&mut self, scene: &mut Scene, id: EntityId, name: &str) -> Result<(), EditError> {
        let entity = resolve(scene, id)?;
        let old = scene.entity_name(entity)?.to_string();
        let cmd = EditCommand::Rename {
            id,
            old,
            new: name.to_string(),
        };
        apply(scene, &cmd)?;
        self.record(cmd);
        Ok(())
    }

    /// Move an entity, giving it a transform if it had none.
    pub fn set_transform(
        &mut self,
        scene: &mut Scene,
        id: EntityId,
        new: Placement,
    ) -> Result<(), EditError> {
        let entity = resolve(scene, id)?;
        let old = scene.get_component::<Transform>(entity).ok().map(Placement::of);
        let cmd = EditCommand::SetTransform { id, old, new };
        apply(scene, &cmd)?;
        self.record(cmd);
        Ok(())
    }

    /// Move an entity under `parent`, or to the top level for `None`.
    ///
    /// Parenting under a descendant fails with the scene's
    /// `InvalidOperation` and records nothing.
    pub fn reparent(
        &mut self,
        scene: &mut Scene,
        id: EntityId,
        parent: Option<EntityId>,
    ) -> Result<(), EditError> {
        let entity = resolve(scene, id)?;
        let old = match scene.parent(entity)? {
            Some(p) => Some(scene.entity_id(p)?),
            None => None,
        };
        let cmd = EditCommand::Reparent {
            id,
            old,
            new: parent,
        };
        apply(scene, &cmd)?;
        self.record(cmd);
        Ok(())
    }

    /// Undo the last edit. Returns `Ok(false)` when there is nothing to undo.
    pub fn undo(&mut self, scene: &mut Scene) -> Result<bool, EditError> {
        let Some(cmd) = self.undo_stack.last() else {
            return Ok(false);
        };
        revert(scene, cmd)?;
        tracing::debug!(command = cmd.label(), id = %cmd.target(), "edit undone");
        if let Some(cmd) = self.undo_stack.pop() {
            self.redo_stack.push(cmd);
        }
        Ok(true)
    }

    /// Redo the last undone edit. Returns `Ok(false)` when there is nothing
    /// to redo.
    pub fn redo(&mut self, scene: &mut Scene) -> Result<bool, EditError> {
        let Some(cmd) = self.redo_stack.last() else {
            return Ok(false);
        };
        apply(scene, cmd)?;
        tracing::debug!(command = cmd.label(), id = %cmd.target(), "edit redone");
        if let Some(cmd) = self.redo_stack.pop() {
            self.undo_stack.push(cmd);
        }
        Ok(true)
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Recorded edits, oldest first.
    pub fn history(&self) -> &[EditCommand] {
        &self.undo_stack
    }

    /// Forget every recorded edit, e.g. after the scene was reloaded.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn record(&mut self, cmd: EditCommand) -> EntityId {
        let id = cmd.target();
        tracing::debug!(command = cmd.label(), %id, "edit applied");
        self.undo_stack.push(cmd);
        self.redo_stack.clear();
        id
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(scene: &Scene, id: EntityId) -> Result<Entity, EditError> {
    scene.find_by_id(id).ok_or(EditError::EntityNotFound(id))
}

fn resolve_parent(scene: &Scene, parent: Option<EntityId>) -> Result<Option<Entity>, EditError> {
    parent.map(|id| resolve(scene, id)).transpose()
}

fn apply(scene: &mut Scene, cmd: &EditCommand) -> Result<(), EditError> {
    match cmd {
        EditCommand::Create { id, name, parent } => {
            let parent = resolve_parent(scene, *parent)?;
            let entity = scene.create_entity_with_id(name, *id);
            if let Err(err) = scene.set_parent(entity, parent) {
                scene.destroy_entity(entity)?;
                return Err(err.into());
            }
        }
        EditCommand::Rename { id, new, .. } => set_name(scene, *id, new)?,
        EditCommand::SetTransform { id, new, .. } => place(scene, *id, *new)?,
        EditCommand::Reparent { id, new, .. } => {
            let entity = resolve(scene, *id)?;
            let parent = resolve_parent(scene, *new)?;
            scene.set_parent(entity, parent)?;
        }
    }
    Ok(())
}

fn revert(scene: &mut Scene, cmd: &EditCommand) -> Result<(), EditError> {
    match cmd {
        EditCommand::Create { id, .. } => {
            let entity = resolve(scene, *id)?;
            scene.destroy_entity(entity)?;
        }
        EditCommand::Rename { id, old, .. } => set_name(scene, *id, old)?,
        EditCommand::SetTransform { id, old, .. } => match old {
            Some(old) => place(scene, *id, *old)?,
            None => {
                let entity = resolve(scene, *id)?;
                scene.remove_component::<Transform>(entity)?;
            }
        },
        EditCommand::Reparent { id, old, .. } => {
            let entity = resolve(scene, *id)?;
            let parent = resolve_parent(scene, *old)?;
            scene.set_parent(entity, parent)?;
        }
    }
    Ok(())
}

fn set_name(scene: &mut Scene, id: EntityId, name: &str) -> Result<(), EditError> {
    let entity = resolve(scene, id)?;
    if scene.has_component::<Tag>(entity) {
        scene.get_component_mut::<Tag>(entity)?.name = name.to_string();
    } else {
        scene.add_component(entity, Tag::new(name))?;
    }
    Ok(())
}

fn place(scene: &mut Scene, id: EntityId, placement: Placement) -> Result<(), EditError> {
    let entity = resolve(scene, id)?;
    if scene.has_component::<Transform>(entity) {
        let transform = scene.get_component_mut::<Transform>(entity)?;
        transform.set_position(placement.position);
        transform.set_rotation(placement.rotation);
        transform.set_scale(placement.scale);
    } else {
        scene.add_component(
            entity,
            Transform::new(placement.position, placement.rotation, placement.scale),
        )?;
    }
    Ok(())
}
