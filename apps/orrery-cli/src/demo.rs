use glam::Vec3;
use orrery_author::{Editor, Placement};
use orrery_common::ShadowConfig;
use orrery_ecs::{CameraComponent, DirectionalLight, PointLight, RigidBody, SpotLight};
use orrery_physics::BodyType;
use orrery_scene::Scene;

/// Fill `scene` with a small lit playground: a static floor, a few falling
/// bodies, one light of each kind and a camera.
pub fn populate(scene: &mut Scene, shadows: &ShadowConfig) -> anyhow::Result<()> {
    let mut editor = Editor::new();

    let floor = editor.create(scene, "Floor", None)?;
    editor.set_transform(
        scene,
        floor,
        Placement {
            position: Vec3::new(0.0, -1.0, 0.0),
            scale: Vec3::new(20.0, 1.0, 20.0),
            ..Placement::default()
        },
    )?;

    let props = editor.create(scene, "Props", None)?;
    let bodies = [
        ("Ball", Vec3::new(0.0, 6.0, 0.0), RigidBody::sphere(BodyType::Dynamic, 0.5)),
        (
            "Pill",
            Vec3::new(2.0, 8.0, 0.0),
            RigidBody::capsule(BodyType::Dynamic, 0.3, 0.6),
        ),
        (
            "Crate",
            Vec3::new(-2.0, 10.0, 1.0),
            RigidBody::cuboid(BodyType::Dynamic, Vec3::splat(0.5)),
        ),
    ];
    for (name, position, body) in bodies {
        let id = editor.create(scene, name, Some(props))?;
        editor.set_transform(scene, id, Placement::at(position))?;
        attach(scene, id, body)?;
    }
    attach(
        scene,
        floor,
        RigidBody::cuboid(BodyType::Static, Vec3::new(10.0, 0.5, 10.0)),
    )?;

    let sun = editor.create(scene, "Sun", None)?;
    editor.set_transform(
        scene,
        sun,
        Placement {
            position: Vec3::new(0.0, 15.0, 0.0),
            rotation: Vec3::new(-60.0, 30.0, 0.0),
            ..Placement::default()
        },
    )?;
    attach(
        scene,
        sun,
        DirectionalLight::with_shadow(shadows.directional_size, shadows.directional_clip_space),
    )?;

    let lamp = editor.create(scene, "Lamp", Some(props))?;
    editor.set_transform(scene, lamp, Placement::at(Vec3::new(3.0, 2.0, 3.0)))?;
    attach(
        scene,
        lamp,
        PointLight {
            color: Vec3::new(1.0, 0.8, 0.6),
            intensity: 4.0,
            ..PointLight::default()
        },
    )?;

    let spot = editor.create(scene, "Spot", None)?;
    editor.set_transform(
        scene,
        spot,
        Placement {
            position: Vec3::new(-4.0, 6.0, -4.0),
            rotation: Vec3::new(-45.0, 45.0, 0.0),
            ..Placement::default()
        },
    )?;
    attach(
        scene,
        spot,
        SpotLight::with_shadow(shadows.spot_size, shadows.spot_clip_space),
    )?;

    let camera = editor.create(scene, "Camera", None)?;
    editor.set_transform(
        scene,
        camera,
        Placement {
            position: Vec3::new(0.0, 4.0, 12.0),
            rotation: Vec3::new(-15.0, 0.0, 0.0),
            ..Placement::default()
        },
    )?;
    attach(scene, camera, CameraComponent::default())?;

    tracing::info!(
        entities = scene.entity_count(),
        edits = editor.undo_count(),
        "demo scene built"
    );
    Ok(())
}

fn attach<T: orrery_ecs::Component>(
    scene: &mut Scene,
    id: orrery_common::EntityId,
    component: T,
) -> anyhow::Result<()> {
    let entity = scene
        .find_by_id(id)
        .ok_or_else(|| anyhow::anyhow!("entity {id} vanished while building the demo"))?;
    scene.add_component(entity, component)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use orrery_gpu::{GpuBackend, HeadlessDevice};
    use orrery_physics::SimplePhysics;
    use orrery_tools::SceneInspector;

    fn scene() -> Scene {
        let device: Arc<dyn GpuBackend> = Arc::new(HeadlessDevice::new());
        Scene::new("demo", device, Box::new(SimplePhysics::default())).unwrap()
    }

    #[test]
    fn demo_has_every_light_kind() {
        let mut scene = scene();
        populate(&mut scene, &ShadowConfig::default()).unwrap();

        let summary = SceneInspector::summary(&scene);
        assert_eq!(summary.entity_count, 9);
        assert_eq!(
            (summary.directional_lights, summary.point_lights, summary.spot_lights),
            (1, 1, 1)
        );
        assert_eq!(summary.rigid_bodies, 4);
        scene.update().unwrap();
        assert!(scene.primary_camera().is_some());
    }

    #[test]
    fn demo_survives_a_file_round_trip() {
        let mut scene = scene();
        populate(&mut scene, &ShadowConfig::default()).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        scene.save(file.path()).unwrap();

        let mut loaded = self::scene();
        loaded.load(file.path()).unwrap();
        assert_eq!(
            SceneInspector::hierarchy(&loaded),
            SceneInspector::hierarchy(&scene)
        );
    }
}
