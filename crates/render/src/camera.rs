use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use orrery_ecs::Camera3D;
use orrery_gpu::{BufferId, BufferInfo, CommandList, GpuBackend, GpuError, stage_upload};

/// Keys the fly camera reacts to. Window layers map their own key codes
/// onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    W,
    A,
    S,
    D,
    Space,
    LeftControl,
    LeftShift,
    RightAlt,
    Other,
}

/// Which key drives which movement axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keybinds {
    pub move_pz: Key,
    pub move_nz: Key,
    pub move_px: Key,
    pub move_nx: Key,
    pub move_py: Key,
    pub move_ny: Key,
    pub toggle_pause: Key,
    pub toggle_sprint: Key,
}

impl Default for Keybinds {
    fn default() -> Self {
        Self {
            move_pz: Key::W,
            move_nz: Key::S,
            move_px: Key::A,
            move_nx: Key::D,
            move_py: Key::Space,
            move_ny: Key::LeftControl,
            toggle_pause: Key::RightAlt,
            toggle_sprint: Key::LeftShift,
        }
    }
}

bitflags! {
    /// Movement keys currently held.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MoveFlags: u8 {
        const PX = 1 << 0;
        const PY = 1 << 1;
        const PZ = 1 << 2;
        const NX = 1 << 3;
        const NY = 1 << 4;
        const NZ = 1 << 5;
        const SPRINT = 1 << 6;
    }
}

const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2;

/// Editor fly camera. `position` is the view translation, so moving "up"
/// decreases its Y.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlledCamera3D {
    pub camera: Camera3D,
    pub keybinds: Keybinds,
    pub position: Vec3,
    /// Yaw in `x`, pitch in `y`, radians.
    pub rotation: Vec3,
    pub speed: f32,
    pub mouse_sens: f32,
    pub sprint_speed: f32,
    pub moving: MoveFlags,
    sin_rot_x: f32,
    cos_rot_x: f32,
}

impl Default for ControlledCamera3D {
    fn default() -> Self {
        let mut camera = Camera3D::default();
        camera.update_projection();
        Self {
            camera,
            keybinds: Keybinds::default(),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            speed: 30.0,
            mouse_sens: 0.25,
            sprint_speed: 8.0,
            moving: MoveFlags::empty(),
            sin_rot_x: 0.0,
            cos_rot_x: 1.0,
        }
    }
}

impl ControlledCamera3D {
    /// Apply held movement keys for `dt` seconds and refresh the view.
    pub fn update(&mut self, dt: f32) {
        let mut delta = self.speed * dt;
        if self.moving.contains(MoveFlags::SPRINT) {
            delta *= self.sprint_speed;
        }
        let (sin, cos) = (self.sin_rot_x, self.cos_rot_x);
        if self.moving.contains(MoveFlags::PX) {
            self.position.z += sin * delta;
            self.position.x += cos * delta;
        }
        if self.moving.contains(MoveFlags::NX) {
            self.position.z -= sin * delta;
            self.position.x -= cos * delta;
        }
        if self.moving.contains(MoveFlags::PZ) {
            self.position.x -= sin * delta;
            self.position.z += cos * delta;
        }
        if self.moving.contains(MoveFlags::NZ) {
            self.position.x += sin * delta;
            self.position.z -= cos * delta;
        }
        if self.moving.contains(MoveFlags::PY) {
            self.position.y -= delta;
        }
        if self.moving.contains(MoveFlags::NY) {
            self.position.y += delta;
        }
        self.rotation.y = self.rotation.y.clamp(-MAX_PITCH, MAX_PITCH);

        self.camera.set_pos(self.position);
        self.camera.set_rot(self.rotation.x, self.rotation.y);
    }

    pub fn on_key(&mut self, key: Key, pressed: bool) {
        let binds = self.keybinds;
        let table = [
            (binds.move_pz, MoveFlags::PZ),
            (binds.move_nz, MoveFlags::NZ),
            (binds.move_px, MoveFlags::PX),
            (binds.move_nx, MoveFlags::NX),
            (binds.move_py, MoveFlags::PY),
            (binds.move_ny, MoveFlags::NY),
            (binds.toggle_sprint, MoveFlags::SPRINT),
        ];
        for (bound, flag) in table {
            if bound == key {
                self.moving.set(flag, pressed);
            }
        }
    }

    /// Mouse motion in pixels. Scaled by the field of view so narrow lenses
    /// turn slower.
    pub fn on_mouse_move(&mut self, delta_x: f32, delta_y: f32) {
        let scale = self.mouse_sens * 0.0001 * self.camera.fov;
        self.rotation.x += delta_x * scale;
        self.rotation.y -= delta_y * scale;
        self.sin_rot_x = self.rotation.x.sin();
        self.cos_rot_x = self.rotation.x.cos();
    }

    pub fn render_view(&self) -> RenderView {
        RenderView::from_camera(&self.camera)
    }
}

/// Matrices a frame is rendered with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderView {
    pub view: Mat4,
    pub projection: Mat4,
    /// Eye position in world space.
    pub position: Vec3,
}

impl Default for RenderView {
    fn default() -> Self {
        Self::from_camera(&Camera3D::default())
    }
}

impl RenderView {
    pub fn from_camera(camera: &Camera3D) -> Self {
        let view = camera.view();
        Self {
            view,
            projection: camera.projection(),
            position: view.inverse().w_axis.truncate(),
        }
    }

    pub fn camera_info(&self) -> CameraInfo {
        let view_projection = self.projection * self.view;
        CameraInfo {
            view: self.view.to_cols_array_2d(),
            projection: self.projection.to_cols_array_2d(),
            inv_view_projection: view_projection.inverse().to_cols_array_2d(),
            position: self.position.extend(1.0).to_array(),
        }
    }
}

/// GPU layout of the per-frame camera record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraInfo {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inv_view_projection: [[f32; 4]; 4],
    pub position: [f32; 4],
}

/// Device-local camera record, rewritten through staging every frame.
#[derive(Debug)]
pub struct CameraBuffer {
    buffer: BufferId,
    address: u64,
}

impl CameraBuffer {
    pub fn new(device: &dyn GpuBackend) -> Result<Self, GpuError> {
        let buffer = device.create_buffer(&BufferInfo::device_local(
            std::mem::size_of::<CameraInfo>() as u64,
            "camera buffer",
        ))?;
        let address = device.device_address(buffer)?;
        Ok(Self { buffer, address })
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn upload(
        &self,
        device: &dyn GpuBackend,
        cmd: &mut CommandList,
        view: &RenderView,
    ) -> Result<(), GpuError> {
        stage_upload(
            device,
            cmd,
            self.buffer,
            bytemuck::bytes_of(&view.camera_info()),
            "camera buffer",
        )
    }

    pub fn destroy(&self, device: &dyn GpuBackend) {
        device.destroy_buffer(self.buffer);
    }
}
