use glam::Vec3;

use orrery_ecs::{
    CameraComponent, DirectionalLight, Entity, GeometryKind, ModelComponent, PointLight, Registry,
    Relationship, RigidBody, SpotLight, Tag, Transform,
};
use orrery_physics::BodyType;

use crate::Scene;

/// Every component kind an entity can carry in a scene file, in the order
/// they are written and listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Tag,
    Relationship,
    Transform,
    Camera,
    Model,
    DirectionalLight,
    PointLight,
    SpotLight,
    RigidBody,
}

/// One labelled value of a component, formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: &'static str,
    pub value: String,
}

impl Property {
    fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

impl ComponentKind {
    pub const ALL: [Self; 9] = [
        Self::Tag,
        Self::Relationship,
        Self::Transform,
        Self::Camera,
        Self::Model,
        Self::DirectionalLight,
        Self::PointLight,
        Self::SpotLight,
        Self::RigidBody,
    ];

    /// Key of the component's map in a scene file.
    pub fn name(self) -> &'static str {
        match self {
            Self::Tag => "TagComponent",
            Self::Relationship => "RelationshipComponent",
            Self::Transform => "TransformComponent",
            Self::Camera => "CameraComponent",
            Self::Model => "ModelComponent",
            Self::DirectionalLight => "DirectionalLightComponent",
            Self::PointLight => "PointLightComponent",
            Self::SpotLight => "SpotLightComponent",
            Self::RigidBody => "RigidBodyComponent",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Tag => "Tag",
            Self::Relationship => "Relationship",
            Self::Transform => "Transform",
            Self::Camera => "Camera",
            Self::Model => "Model",
            Self::DirectionalLight => "Directional Light",
            Self::PointLight => "Point Light",
            Self::SpotLight => "Spot Light",
            Self::RigidBody => "Rigid Body",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Tag and relationship come with every entity and cannot be removed.
    pub fn is_builtin(self) -> bool {
        matches!(self, Self::Tag | Self::Relationship)
    }

    pub fn is_light(self) -> bool {
        matches!(self, Self::DirectionalLight | Self::PointLight | Self::SpotLight)
    }

    pub fn has(self, registry: &Registry, entity: Entity) -> bool {
        match self {
            Self::Tag => registry.has::<Tag>(entity),
            Self::Relationship => registry.has::<Relationship>(entity),
            Self::Transform => registry.has::<Transform>(entity),
            Self::Camera => registry.has::<CameraComponent>(entity),
            Self::Model => registry.has::<ModelComponent>(entity),
            Self::DirectionalLight => registry.has::<DirectionalLight>(entity),
            Self::PointLight => registry.has::<PointLight>(entity),
            Self::SpotLight => registry.has::<SpotLight>(entity),
            Self::RigidBody => registry.has::<RigidBody>(entity),
        }
    }

    /// Displayable fields of the component, empty when `entity` lacks it.
    pub fn properties(self, registry: &Registry, entity: Entity) -> Vec<Property> {
        match self {
            Self::Tag => registry
                .get::<Tag>(entity)
                .map(|tag| vec![Property::new("Tag", tag.name.clone())])
                .unwrap_or_default(),
            Self::Relationship => registry
                .get::<Relationship>(entity)
                .map(|rc| relationship_properties(registry, rc))
                .unwrap_or_default(),
            Self::Transform => registry
                .get::<Transform>(entity)
                .map(|tc| {
                    vec![
                        Property::new("Position", vec3(tc.position)),
                        Property::new("Rotation", vec3(tc.rotation)),
                        Property::new("Scale", vec3(tc.scale)),
                    ]
                })
                .unwrap_or_default(),
            Self::Camera => registry
                .get::<CameraComponent>(entity)
                .map(|cc| {
                    vec![
                        Property::new("FOV", scalar(cc.camera.fov)),
                        Property::new("Aspect", scalar(cc.camera.aspect)),
                        Property::new("Near Plane", scalar(cc.camera.near_clip)),
                        Property::new("Far Plane", scalar(cc.camera.far_clip)),
                    ]
                })
                .unwrap_or_default(),
            Self::Model => registry
                .get::<ModelComponent>(entity)
                .map(|mc| {
                    let state = match &mc.model {
                        Some(model) => format!("{} primitives", model.primitives.len()),
                        None => "not loaded".to_string(),
                    };
                    vec![
                        Property::new("File Path", mc.file_path.display().to_string()),
                        Property::new("State", state),
                    ]
                })
                .unwrap_or_default(),
            Self::DirectionalLight => registry
                .get::<DirectionalLight>(entity)
                .map(|l| light_properties(l.color, l.intensity))
                .unwrap_or_default(),
            Self::PointLight => registry
                .get::<PointLight>(entity)
                .map(|l| light_properties(l.color, l.intensity))
                .unwrap_or_default(),
            Self::SpotLight => registry
                .get::<SpotLight>(entity)
                .map(|l| {
                    let mut props = light_properties(l.color, l.intensity);
                    props.push(Property::new("Cut Off", scalar(l.cut_off)));
                    props.push(Property::new("Outer Cut Off", scalar(l.outer_cut_off)));
                    props
                })
                .unwrap_or_default(),
            Self::RigidBody => registry
                .get::<RigidBody>(entity)
                .map(rigid_body_properties)
                .unwrap_or_default(),
        }
    }
}

impl Scene {
    /// Kinds present on `entity`, in [`ComponentKind::ALL`] order.
    pub fn component_kinds(&self, entity: Entity) -> Vec<ComponentKind> {
        ComponentKind::ALL
            .into_iter()
            .filter(|k| k.has(&self.registry, entity))
            .collect()
    }
}

pub(crate) fn body_type_name(body_type: BodyType) -> &'static str {
    match body_type {
        BodyType::Static => "static",
        BodyType::Dynamic => "dynamic",
    }
}

pub(crate) fn geometry_name(kind: GeometryKind) -> &'static str {
    match kind {
        GeometryKind::Box => "box",
        GeometryKind::Sphere => "sphere",
        GeometryKind::Capsule => "capsule",
    }
}

fn relationship_properties(registry: &Registry, rc: &Relationship) -> Vec<Property> {
    let name = |e: Entity| {
        registry
            .get::<Tag>(e)
            .map(|t| t.name.clone())
            .unwrap_or_else(|_| e.to_string())
    };
    let parent = rc.parent.map(name).unwrap_or_else(|| "none".to_string());
    let children: Vec<String> = rc.children.iter().copied().map(name).collect();
    vec![
        Property::new("Parent", parent),
        Property::new("Children", children.join(", ")),
    ]
}

fn light_properties(color: Vec3, intensity: f32) -> Vec<Property> {
    vec![
        Property::new("Intensity", scalar(intensity)),
        Property::new("Color", vec3(color)),
    ]
}

fn rigid_body_properties(rb: &RigidBody) -> Vec<Property> {
    let mut props = vec![Property::new("RigidBody Type", body_type_name(rb.body_type))];
    if rb.is_dynamic() {
        props.push(Property::new("Density", scalar(rb.density)));
    }
    props.push(Property::new("Static Friction", scalar(rb.static_friction)));
    props.push(Property::new("Dynamic Friction", scalar(rb.dynamic_friction)));
    props.push(Property::new("Restitution", scalar(rb.restitution)));
    props.push(Property::new("Geometry Type", geometry_name(rb.geometry_kind)));
    match rb.geometry_kind {
        GeometryKind::Sphere => props.push(Property::new("Radius", scalar(rb.radius))),
        GeometryKind::Capsule => {
            props.push(Property::new("Radius", scalar(rb.radius)));
            props.push(Property::new("Half Height", scalar(rb.half_height)));
        }
        GeometryKind::Box => props.push(Property::new("Half Extent", vec3(rb.half_extent))),
    }
    props
}

fn scalar(v: f32) -> String {
    format!("{v:.3}")
}

fn vec3(v: Vec3) -> String {
    format!("({:.3}, {:.3}, {:.3})", v.x, v.y, v.z)
}
