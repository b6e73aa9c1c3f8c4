use orrery_ecs::{
    CameraComponent, DirectionalLight, Entity, Identity, PointLight, Registry, RigidBody,
    SpotLight, Tag, Transform,
};
use orrery_gpu::{BufferInfo, CommandList, GpuBackend, SubmitInfo, stage_upload};
use orrery_physics::{PhysicsBackend, Pose};

use crate::lights::{self, LightBuffer, LightCounts};
use crate::scene::release_body;
use crate::{Scene, SceneError};

/// What one [`Scene::update`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Rigid bodies (re)built from their component parameters.
    pub bodies_created: usize,
    /// Edited transforms pushed into the simulation.
    pub poses_pushed: usize,
    /// Simulated poses copied back into transforms.
    pub poses_pulled: usize,
    pub lights_packed: bool,
    pub transform_uploads: usize,
    pub submissions: usize,
}

impl Scene {
    /// Bring physics, lights and transform buffers in line with the
    /// components.
    ///
    /// On error the offending state stays dirty so the next call retries it,
    /// and staging buffers of unsubmitted uploads are released immediately.
    pub fn update(&mut self) -> Result<UpdateReport, SceneError> {
        let mut report = UpdateReport::default();
        self.sync_bodies(&mut report)?;
        self.update_lights(&mut report)?;
        self.update_transforms(&mut report)?;
        tracing::trace!(scene = %self.name, ?report, "scene updated");
        Ok(report)
    }

    /// Only the physics phase of [`Scene::update`]. Transforms moved by the
    /// simulation come back dirty.
    pub fn sync_physics(&mut self) -> Result<UpdateReport, SceneError> {
        let mut report = UpdateReport::default();
        self.sync_bodies(&mut report)?;
        Ok(report)
    }

    fn sync_bodies(&mut self, report: &mut UpdateReport) -> Result<(), SceneError> {
        let bodies: Vec<Entity> = self.registry.view::<RigidBody>().map(|(e, _)| e).collect();
        for entity in bodies {
            let Ok(tc) = self.registry.get::<Transform>(entity) else {
                continue;
            };
            let (pose, edited) = (tc.pose(), tc.dirty);
            let physics = self.physics.as_mut();
            let rb = self.registry.get_mut::<RigidBody>(entity)?;

            let pulled = match rb.body {
                Some(body) if !rb.dirty => {
                    if edited {
                        physics.set_global_pose(body, pose)?;
                        rb.synced_pose = Some(pose);
                        report.poses_pushed += 1;
                        None
                    } else if rb.is_dynamic() {
                        let current = physics.global_pose(body)?;
                        if rb.synced_pose == Some(current) {
                            None
                        } else {
                            rb.synced_pose = Some(current);
                            Some(current)
                        }
                    } else {
                        None
                    }
                }
                _ => {
                    rebuild_body(physics, rb, pose)?;
                    tracing::debug!(%entity, body_type = ?rb.body_type, "rigid body built");
                    report.bodies_created += 1;
                    None
                }
            };

            if let Some(pose) = pulled {
                self.registry.get_mut::<Transform>(entity)?.apply_pose(pose);
                report.poses_pulled += 1;
            }
        }
        Ok(())
    }

    /// Repack the light buffer when any light or light-bearing transform
    /// changed. Capacity is checked before anything is touched.
    fn update_lights(&mut self, report: &mut UpdateReport) -> Result<(), SceneError> {
        let lit: Vec<Entity> = self
            .entities()
            .into_iter()
            .filter(|e| self.registry.has::<Transform>(*e) && has_light(&self.registry, *e))
            .collect();
        let changed = self.lights_stale
            || lit.iter().any(|e| light_changed(&self.registry, *e))
            || any_light_dirty(&self.registry);
        if !changed {
            return Ok(());
        }

        let mut counts = LightCounts::default();
        for &entity in &lit {
            counts.directional += usize::from(self.registry.has::<DirectionalLight>(entity));
            counts.point += usize::from(self.registry.has::<PointLight>(entity));
            counts.spot += usize::from(self.registry.has::<SpotLight>(entity));
        }
        counts.check_capacity()?;

        let device = self.device.clone();
        let sampler = self.pcf_sampler;
        let mut buffer = LightBuffer::empty();
        for &entity in &lit {
            let tc = self.registry.get::<Transform>(entity)?.clone();
            let name = self
                .registry
                .get::<Tag>(entity)
                .map(|t| t.name.clone())
                .unwrap_or_else(|_| entity.to_string());
            if let Ok(light) = self.registry.get_mut::<DirectionalLight>(entity) {
                let direction = lights::prepare_directional(device.as_ref(), light, &tc, &name)?;
                buffer.push_directional(lights::pack_directional(light, direction, sampler))?;
            }
            if let Ok(light) = self.registry.get::<PointLight>(entity) {
                buffer.push_point(lights::pack_point(light, tc.position))?;
            }
            if let Ok(light) = self.registry.get_mut::<SpotLight>(entity) {
                let direction = lights::prepare_spot(device.as_ref(), light, &tc, &name)?;
                buffer.push_spot(lights::pack_spot(light, tc.position, direction, sampler))?;
            }
        }

        let mut cmd = CommandList::new("light update");
        if let Err(err) = stage_upload(
            device.as_ref(),
            &mut cmd,
            self.light_buffer,
            bytemuck::bytes_of(&buffer),
            "light buffer",
        ) {
            discard(device.as_ref(), &cmd);
            return Err(err.into());
        }
        submit(device.as_ref(), cmd)?;
        report.submissions += 1;

        clear_light_flags(&mut self.registry);
        self.light_counts = buffer.counts();
        self.lights_stale = false;
        report.lights_packed = true;
        tracing::debug!(
            directional = counts.directional,
            point = counts.point,
            spot = counts.spot,
            "lights packed"
        );
        Ok(())
    }

    /// Recompute dirty cameras and transforms, uploading every changed
    /// transform in a single submission.
    fn update_transforms(&mut self, report: &mut UpdateReport) -> Result<(), SceneError> {
        for (_, cc) in self.registry.view_mut::<CameraComponent>() {
            if cc.dirty {
                cc.camera.update_projection();
                cc.dirty = false;
            }
        }

        let device = self.device.clone();
        let mut cmd = CommandList::new("scene update");
        let uploaded = match self.record_transform_uploads(device.as_ref(), &mut cmd) {
            Ok(uploaded) => uploaded,
            Err(err) => {
                discard(device.as_ref(), &cmd);
                return Err(err);
            }
        };
        if uploaded.is_empty() {
            return Ok(());
        }
        submit(device.as_ref(), cmd)?;
        report.submissions += 1;
        report.transform_uploads = uploaded.len();

        for entity in uploaded {
            if let Ok(tc) = self.registry.get_mut::<Transform>(entity) {
                tc.dirty = false;
            }
        }
        Ok(())
    }

    /// Flags stay set until the batch is submitted.
    fn record_transform_uploads(
        &mut self,
        device: &dyn GpuBackend,
        cmd: &mut CommandList,
    ) -> Result<Vec<Entity>, SceneError> {
        let dirty: Vec<Entity> = self
            .registry
            .view::<Transform>()
            .filter(|(_, tc)| tc.dirty)
            .map(|(e, _)| e)
            .collect();

        for &entity in &dirty {
            let label = match self.registry.get::<Identity>(entity) {
                Ok(identity) => identity.id.to_string(),
                Err(_) => entity.to_string(),
            };
            let tc = self.registry.get_mut::<Transform>(entity)?;
            tc.update_matrices();
            if tc.buffer.is_empty() {
                tc.buffer = device.create_buffer(&BufferInfo::device_local(
                    std::mem::size_of::<orrery_ecs::TransformInfo>() as u64,
                    format!("transform buffer - {label}"),
                ))?;
            }
            let info = tc.gpu_info();
            let (buffer, position, rotation) = (tc.buffer, tc.position, tc.rotation_quat());
            stage_upload(
                device,
                cmd,
                buffer,
                bytemuck::bytes_of(&info),
                &format!("transform - {label}"),
            )?;

            if let Ok(cc) = self.registry.get_mut::<CameraComponent>(entity) {
                cc.camera.set_pos(position);
                cc.camera.set_orientation(rotation);
            }
        }
        Ok(dirty)
    }
}

fn rebuild_body(
    physics: &mut dyn PhysicsBackend,
    rb: &mut RigidBody,
    pose: Pose,
) -> Result<(), SceneError> {
    release_body(physics, rb);
    let geometry = rb.geometry();
    geometry.validate()?;
    let material = physics.create_material(rb.material_desc())?;
    rb.material = Some(material);
    let shape = physics.create_shape(geometry, material)?;
    rb.shape = Some(shape);
    let body = physics.create_rigid_body(rb.body_type, pose)?;
    rb.body = Some(body);
    physics.attach_shape(body, shape)?;
    if rb.is_dynamic() {
        physics.update_mass_and_inertia(body, rb.density)?;
    }
    physics.set_global_pose(body, pose)?;
    physics.add_to_world(body)?;
    rb.synced_pose = Some(pose);
    rb.dirty = false;
    Ok(())
}

fn has_light(registry: &Registry, entity: Entity) -> bool {
    registry.has::<DirectionalLight>(entity)
        || registry.has::<PointLight>(entity)
        || registry.has::<SpotLight>(entity)
}

fn light_changed(registry: &Registry, entity: Entity) -> bool {
    registry.get::<Transform>(entity).is_ok_and(|tc| tc.dirty)
}

fn any_light_dirty(registry: &Registry) -> bool {
    registry.view::<DirectionalLight>().any(|(_, l)| l.dirty)
        || registry.view::<PointLight>().any(|(_, l)| l.dirty)
        || registry.view::<SpotLight>().any(|(_, l)| l.dirty)
}

fn clear_light_flags(registry: &mut Registry) {
    for (_, light) in registry.view_mut::<DirectionalLight>() {
        light.dirty = false;
    }
    for (_, light) in registry.view_mut::<PointLight>() {
        light.dirty = false;
    }
    for (_, light) in registry.view_mut::<SpotLight>() {
        light.dirty = false;
    }
}

/// Release the staging buffers of a list that will never be submitted.
fn discard(device: &dyn GpuBackend, cmd: &CommandList) {
    for buffer in cmd.deferred_buffers() {
        device.destroy_buffer(*buffer);
    }
}

fn submit(device: &dyn GpuBackend, mut cmd: CommandList) -> Result<(), SceneError> {
    if let Err(err) = cmd.complete() {
        discard(device, &cmd);
        return Err(err.into());
    }
    device.submit(SubmitInfo::commands(vec![cmd]))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scene;
    use crate::{DirectionalLightData, MAX_DIRECTIONAL_LIGHTS};
    use glam::Vec3;
    use orrery_gpu::HeadlessDevice;
    use orrery_physics::BodyType;

    fn light_buffer(device: &HeadlessDevice, scene: &Scene) -> LightBuffer {
        let bytes = device.buffer_contents(scene.light_buffer()).unwrap();
        bytemuck::pod_read_unaligned(&bytes)
    }

    #[test]
    fn second_update_uploads_nothing() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("cube");
        scene.add_component(e, Transform::default()).unwrap();
        let first = scene.update().unwrap();
        assert_eq!(first.transform_uploads, 1);
        assert!(first.lights_packed);

        let uploads = device.stats().buffer_uploads;
        let second = scene.update().unwrap();
        assert_eq!(second, UpdateReport::default());
        assert_eq!(device.stats().buffer_uploads, uploads);
    }

    #[test]
    fn transform_buffer_holds_matrices() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("cube");
        let tc = Transform::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::splat(2.0));
        scene.add_component(e, tc).unwrap();
        scene.update().unwrap();

        let tc = scene.get_component::<Transform>(e).unwrap();
        assert!(!tc.dirty);
        let bytes = device.buffer_contents(tc.buffer).unwrap();
        let info: orrery_ecs::TransformInfo = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(info.model_matrix, tc.model_matrix.to_cols_array_2d());
        assert_eq!(info.model_matrix[3][..3], [1.0, 2.0, 3.0]);
        assert_eq!(
            device.buffer_info(tc.buffer).unwrap().name,
            format!("transform buffer - {e}")
        );
    }

    #[test]
    fn uploads_share_one_submission() {
        let (device, mut scene) = scene("test");
        for name in ["a", "b", "c"] {
            let e = scene.create_entity(name);
            scene.add_component(e, Transform::default()).unwrap();
        }
        scene.update().unwrap();
        let last = device.last_submission().unwrap();
        assert_eq!(last.command_lists.len(), 1);
        assert_eq!(last.command_lists[0].name(), "scene update");
        assert_eq!(last.command_lists[0].count_buffer_copies(), 3);
    }

    #[test]
    fn transform_buffer_is_named_by_identity() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("cube");
        scene.add_component(e, Transform::default()).unwrap();
        scene.update().unwrap();

        let id = scene.entity_id(e).unwrap();
        let buffer = scene.get_component::<Transform>(e).unwrap().buffer;
        let info = device.buffer_info(buffer).unwrap();
        assert_eq!(info.name, format!("transform buffer - {id}"));
    }

    #[test]
    fn camera_follows_its_transform() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("camera");
        scene
            .add_component(e, Transform::new(Vec3::new(0.0, 5.0, 0.0), Vec3::ZERO, Vec3::ONE))
            .unwrap();
        scene.add_component(e, CameraComponent::default()).unwrap();
        scene.update().unwrap();

        let cc = scene.get_component::<CameraComponent>(e).unwrap();
        assert!(!cc.dirty);
        assert!(cc.camera.proj_mat.y_axis.y < 0.0);
        assert_eq!(cc.camera.vtrn_mat.w_axis.y, 5.0);
    }

    #[test]
    fn directional_light_is_packed() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("sun");
        scene.add_component(e, Transform::default()).unwrap();
        scene
            .add_component(e, DirectionalLight { intensity: 3.0, ..Default::default() })
            .unwrap();
        scene.update().unwrap();

        let packed = light_buffer(&device, &scene);
        assert_eq!(packed.num_directional_lights, 1);
        let light: DirectionalLightData = packed.directional_lights[0];
        assert_eq!(light.intensity, 3.0);
        assert_eq!(light.direction, [0.0, -1.0, 0.0]);
        assert_ne!(light.shadow_image, 0);
        assert_eq!(light.shadow_sampler, scene.pcf_sampler().raw());
        let stored = scene.get_component::<DirectionalLight>(e).unwrap();
        assert!(!stored.dirty);
        assert_eq!(light.light_matrix, stored.shadow_info.light_matrix().to_cols_array_2d());
    }

    #[test]
    fn moving_a_light_repacks() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("bulb");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, PointLight::default()).unwrap();
        scene.update().unwrap();

        scene
            .get_component_mut::<Transform>(e)
            .unwrap()
            .set_position(Vec3::new(4.0, 0.0, 0.0));
        let report = scene.update().unwrap();
        assert!(report.lights_packed);
        assert_eq!(light_buffer(&device, &scene).point_lights[0].position, [4.0, 0.0, 0.0]);
    }

    #[test]
    fn destroying_a_light_repacks() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("bulb");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, PointLight::default()).unwrap();
        scene.update().unwrap();
        assert_eq!(scene.light_counts().point, 1);

        scene.destroy_entity(e).unwrap();
        assert!(scene.update().unwrap().lights_packed);
        assert_eq!(scene.light_counts().total(), 0);
    }

    #[test]
    fn removing_a_lights_transform_unpacks_it() {
        let (device, mut scene) = scene("test");
        let e = scene.create_entity("bulb");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, PointLight::default()).unwrap();
        scene.update().unwrap();
        assert_eq!(scene.light_counts().point, 1);

        scene.remove_component::<Transform>(e).unwrap();
        assert!(scene.update().unwrap().lights_packed);
        assert_eq!(scene.light_counts().point, 0);
        assert_eq!(light_buffer(&device, &scene).num_point_lights, 0);
    }

    #[test]
    fn untagged_light_is_unpacked_until_retagged() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("bulb");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, PointLight::default()).unwrap();
        scene.update().unwrap();

        scene.remove_component::<Tag>(e).unwrap();
        assert!(scene.update().unwrap().lights_packed);
        assert_eq!(scene.light_counts().point, 0);

        scene.add_component(e, Tag::new("bulb")).unwrap();
        assert!(scene.update().unwrap().lights_packed);
        assert_eq!(scene.light_counts().point, 1);
    }

    #[test]
    fn camera_added_to_a_clean_transform_takes_its_pose() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("camera");
        scene
            .add_component(e, Transform::new(Vec3::new(0.0, 0.0, 7.0), Vec3::ZERO, Vec3::ONE))
            .unwrap();
        scene.update().unwrap();

        scene.add_component(e, CameraComponent::default()).unwrap();
        scene.update().unwrap();
        let cc = scene.get_component::<CameraComponent>(e).unwrap();
        assert_eq!(cc.camera.vtrn_mat.w_axis.z, 7.0);
    }

    #[test]
    fn too_many_lights_leaves_flags_set() {
        let (device, mut scene) = scene("test");
        for i in 0..=MAX_DIRECTIONAL_LIGHTS {
            let e = scene.create_entity(&format!("sun {i}"));
            scene.add_component(e, Transform::default()).unwrap();
            scene.add_component(e, DirectionalLight::default()).unwrap();
        }
        let images = device.live_images();
        let err = scene.update().unwrap_err();
        assert!(matches!(
            err,
            SceneError::ResourceExhausted { kind: "directional", capacity: MAX_DIRECTIONAL_LIGHTS }
        ));
        assert_eq!(device.live_images(), images);
        assert!(scene
            .registry()
            .view::<DirectionalLight>()
            .all(|(_, l)| l.dirty));
    }

    #[test]
    fn dynamic_body_falls_under_gravity() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("ball");
        scene
            .add_component(e, Transform::new(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::ONE))
            .unwrap();
        scene.add_component(e, RigidBody::sphere(BodyType::Dynamic, 0.5)).unwrap();
        let first = scene.update().unwrap();
        assert_eq!(first.bodies_created, 1);

        for _ in 0..10 {
            scene.step_physics(1.0 / 60.0);
        }
        let report = scene.update().unwrap();
        assert_eq!(report.poses_pulled, 1);
        assert_eq!(report.transform_uploads, 1);
        let tc = scene.get_component::<Transform>(e).unwrap();
        assert!(tc.position.y < 10.0);
        assert!(!tc.dirty);
    }

    #[test]
    fn pulled_pose_marks_transform_dirty() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("ball");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, RigidBody::sphere(BodyType::Dynamic, 2.0)).unwrap();
        scene.update().unwrap();
        assert!(!scene.get_component::<Transform>(e).unwrap().dirty);

        scene.step_physics(0.5);
        assert_eq!(scene.sync_physics().unwrap().poses_pulled, 1);
        let tc = scene.get_component::<Transform>(e).unwrap();
        assert!(tc.dirty);
        assert!(tc.position.y < 0.0);
    }

    #[test]
    fn static_body_stays_put() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("floor");
        scene.add_component(e, Transform::default()).unwrap();
        scene
            .add_component(e, RigidBody::cuboid(BodyType::Static, Vec3::new(10.0, 0.1, 10.0)))
            .unwrap();
        scene.update().unwrap();
        scene.step_physics(1.0);
        let report = scene.update().unwrap();
        assert_eq!(report.poses_pulled, 0);
        assert_eq!(scene.get_component::<Transform>(e).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn edited_transform_moves_body() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("ball");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, RigidBody::sphere(BodyType::Dynamic, 0.5)).unwrap();
        scene.update().unwrap();

        scene
            .get_component_mut::<Transform>(e)
            .unwrap()
            .set_position(Vec3::new(0.0, 3.0, 0.0));
        let report = scene.update().unwrap();
        assert_eq!(report.poses_pushed, 1);
        let body = scene.get_component::<RigidBody>(e).unwrap().body.unwrap();
        assert_eq!(scene.physics().global_pose(body).unwrap().position, Vec3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn dirty_body_is_rebuilt() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("ball");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, RigidBody::sphere(BodyType::Dynamic, 0.5)).unwrap();
        scene.update().unwrap();
        let old = scene.get_component::<RigidBody>(e).unwrap().body;

        let rb = scene.get_component_mut::<RigidBody>(e).unwrap();
        rb.radius = 2.0;
        rb.dirty = true;
        assert_eq!(scene.update().unwrap().bodies_created, 1);
        assert_ne!(scene.get_component::<RigidBody>(e).unwrap().body, old);
    }

    #[test]
    fn invalid_geometry_is_reported() {
        let (_device, mut scene) = scene("test");
        let e = scene.create_entity("ball");
        scene.add_component(e, Transform::default()).unwrap();
        scene.add_component(e, RigidBody::sphere(BodyType::Dynamic, 0.0)).unwrap();
        assert!(matches!(scene.update(), Err(SceneError::Physics(_))));
        assert!(scene.get_component::<RigidBody>(e).unwrap().dirty);
    }
}
