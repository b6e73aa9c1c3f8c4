use glam::Vec3;
use slotmap::SlotMap;

use crate::backend::{
    BodyHandle, BodyType, Geometry, MaterialDesc, MaterialHandle, PhysicsBackend, PhysicsError,
    Pose, ShapeHandle,
};

struct Shape {
    geometry: Geometry,
}

struct Body {
    body_type: BodyType,
    pose: Pose,
    velocity: Vec3,
    shapes: Vec<ShapeHandle>,
    mass: f32,
    in_world: bool,
}

/// Semi-implicit Euler integration of dynamic bodies under gravity.
pub struct SimplePhysics {
    materials: SlotMap<MaterialHandle, MaterialDesc>,
    shapes: SlotMap<ShapeHandle, Shape>,
    bodies: SlotMap<BodyHandle, Body>,
    gravity: Vec3,
}

impl SimplePhysics {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            materials: SlotMap::with_key(),
            shapes: SlotMap::with_key(),
            bodies: SlotMap::with_key(),
            gravity,
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn bodies_in_world(&self) -> usize {
        self.bodies.values().filter(|b| b.in_world).count()
    }

    pub fn mass(&self, body: BodyHandle) -> Result<f32, PhysicsError> {
        Ok(self.body(body)?.mass)
    }

    pub fn velocity(&self, body: BodyHandle) -> Result<Vec3, PhysicsError> {
        Ok(self.body(body)?.velocity)
    }

    fn body(&self, body: BodyHandle) -> Result<&Body, PhysicsError> {
        self.bodies.get(body).ok_or(PhysicsError::UnknownBody(body))
    }

    fn body_mut(&mut self, body: BodyHandle) -> Result<&mut Body, PhysicsError> {
        self.bodies.get_mut(body).ok_or(PhysicsError::UnknownBody(body))
    }
}

impl Default for SimplePhysics {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

impl PhysicsBackend for SimplePhysics {
    fn create_material(&mut self, desc: MaterialDesc) -> Result<MaterialHandle, PhysicsError> {
        Ok(self.materials.insert(desc))
    }

    fn create_shape(
        &mut self,
        geometry: Geometry,
        material: MaterialHandle,
    ) -> Result<ShapeHandle, PhysicsError> {
        geometry.validate()?;
        if !self.materials.contains_key(material) {
            return Err(PhysicsError::UnknownMaterial(material));
        }
        Ok(self.shapes.insert(Shape { geometry }))
    }

    fn create_rigid_body(
        &mut self,
        body_type: BodyType,
        pose: Pose,
    ) -> Result<BodyHandle, PhysicsError> {
        let handle = self.bodies.insert(Body {
            body_type,
            pose,
            velocity: Vec3::ZERO,
            shapes: Vec::new(),
            mass: 0.0,
            in_world: false,
        });
        tracing::debug!(?handle, ?body_type, "rigid body created");
        Ok(handle)
    }

    fn attach_shape(&mut self, body: BodyHandle, shape: ShapeHandle) -> Result<(), PhysicsError> {
        if !self.shapes.contains_key(shape) {
            return Err(PhysicsError::UnknownShape(shape));
        }
        self.body_mut(body)?.shapes.push(shape);
        Ok(())
    }

    fn update_mass_and_inertia(
        &mut self,
        body: BodyHandle,
        density: f32,
    ) -> Result<(), PhysicsError> {
        let shapes = self.body(body)?.shapes.clone();
        let volume: f32 = shapes
            .iter()
            .filter_map(|s| self.shapes.get(*s))
            .map(|s| s.geometry.volume())
            .sum();
        self.body_mut(body)?.mass = volume * density;
        Ok(())
    }

    fn set_global_pose(&mut self, body: BodyHandle, pose: Pose) -> Result<(), PhysicsError> {
        self.body_mut(body)?.pose = pose;
        Ok(())
    }

    fn global_pose(&self, body: BodyHandle) -> Result<Pose, PhysicsError> {
        Ok(self.body(body)?.pose)
    }

    fn add_to_world(&mut self, body: BodyHandle) -> Result<(), PhysicsError> {
        self.body_mut(body)?.in_world = true;
        Ok(())
    }

    fn remove_from_world(&mut self, body: BodyHandle) -> Result<(), PhysicsError> {
        let b = self.body_mut(body)?;
        b.in_world = false;
        b.velocity = Vec3::ZERO;
        Ok(())
    }

    fn release_body(&mut self, body: BodyHandle) {
        self.bodies.remove(body);
    }

    fn release_shape(&mut self, shape: ShapeHandle) {
        self.shapes.remove(shape);
    }

    fn release_material(&mut self, material: MaterialHandle) {
        self.materials.remove(material);
    }

    fn step(&mut self, delta_time: f32) {
        let gravity = self.gravity;
        for body in self.bodies.values_mut() {
            if !body.in_world || body.body_type != BodyType::Dynamic {
                continue;
            }
            body.velocity += gravity * delta_time;
            body.pose.position += body.velocity * delta_time;
        }
    }

    fn gravity(&self) -> Vec3 {
        self.gravity
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_in_world(physics: &mut SimplePhysics, body_type: BodyType) -> BodyHandle {
        let material = physics
            .create_material(MaterialDesc {
                static_friction: 0.5,
                dynamic_friction: 0.5,
                restitution: 0.6,
            })
            .unwrap();
        let shape = physics
            .create_shape(Geometry::Sphere { radius: 2.0 }, material)
            .unwrap();
        let body = physics
            .create_rigid_body(body_type, Pose::default())
            .unwrap();
        physics.attach_shape(body, shape).unwrap();
        if body_type == BodyType::Dynamic {
            physics.update_mass_and_inertia(body, 10.0).unwrap();
        }
        physics.add_to_world(body).unwrap();
        body
    }

    #[test]
    fn dynamic_body_falls() {
        let mut physics = SimplePhysics::default();
        let body = body_in_world(&mut physics, BodyType::Dynamic);
        physics.step(0.1);
        physics.step(0.1);
        let pose = physics.global_pose(body).unwrap();
        assert!(pose.position.y < 0.0);
        assert!((pose.position.y - (-9.81 * 0.01 * 3.0)).abs() < 1e-4);
    }

    #[test]
    fn static_body_stays() {
        let mut physics = SimplePhysics::default();
        let body = body_in_world(&mut physics, BodyType::Static);
        physics.step(1.0);
        assert_eq!(physics.global_pose(body).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn mass_follows_density_and_volume() {
        let mut physics = SimplePhysics::default();
        let body = body_in_world(&mut physics, BodyType::Dynamic);
        let expected = Geometry::Sphere { radius: 2.0 }.volume() * 10.0;
        assert!((physics.mass(body).unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn removed_body_does_not_move() {
        let mut physics = SimplePhysics::default();
        let body = body_in_world(&mut physics, BodyType::Dynamic);
        physics.remove_from_world(body).unwrap();
        physics.step(1.0);
        assert_eq!(physics.global_pose(body).unwrap().position, Vec3::ZERO);
        assert_eq!(physics.bodies_in_world(), 0);
    }

    #[test]
    fn released_handles_are_unknown() {
        let mut physics = SimplePhysics::default();
        let body = body_in_world(&mut physics, BodyType::Dynamic);
        physics.release_body(body);
        assert!(matches!(
            physics.global_pose(body),
            Err(PhysicsError::UnknownBody(_))
        ));
    }

    #[test]
    fn shape_requires_live_material() {
        let mut physics = SimplePhysics::default();
        let material = physics
            .create_material(MaterialDesc {
                static_friction: 0.5,
                dynamic_friction: 0.5,
                restitution: 0.6,
            })
            .unwrap();
        physics.release_material(material);
        assert!(matches!(
            physics.create_shape(Geometry::Sphere { radius: 1.0 }, material),
            Err(PhysicsError::UnknownMaterial(_))
        ));
    }
}
