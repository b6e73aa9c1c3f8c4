use glam::{Mat4, Quat, Vec3};

/// Perspective camera. The view is `vrot * vtrn`, kept as two factors so a
/// fly camera can drive rotation and translation independently.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera3D {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub proj_mat: Mat4,
    pub vtrn_mat: Mat4,
    pub vrot_mat: Mat4,
}

impl Default for Camera3D {
    fn default() -> Self {
        Self {
            fov: 90.0,
            aspect: 1.0,
            near_clip: 0.1,
            far_clip: 1000.0,
            proj_mat: Mat4::IDENTITY,
            vtrn_mat: Mat4::IDENTITY,
            vrot_mat: Mat4::IDENTITY,
        }
    }
}

impl Camera3D {
    /// Recompute the projection from the lens parameters. Clip space has Y
    /// pointing down, so the Y axis of the projection is flipped.
    pub fn update_projection(&mut self) {
        let mut proj = Mat4::perspective_rh(
            self.fov.to_radians(),
            self.aspect,
            self.near_clip,
            self.far_clip,
        );
        proj.y_axis.y *= -1.0;
        self.proj_mat = proj;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.aspect = width as f32 / height as f32;
        self.update_projection();
    }

    pub fn set_pos(&mut self, position: Vec3) {
        self.vtrn_mat = Mat4::from_translation(position);
    }

    /// Yaw `x` and pitch `y`, in radians.
    pub fn set_rot(&mut self, x: f32, y: f32) {
        self.vrot_mat = Mat4::from_rotation_x(y) * Mat4::from_rotation_y(x);
    }

    pub fn set_orientation(&mut self, rotation: Quat) {
        self.vrot_mat = Mat4::from_quat(rotation);
    }

    pub fn projection(&self) -> Mat4 {
        self.proj_mat
    }

    pub fn view(&self) -> Mat4 {
        self.vrot_mat * self.vtrn_mat
    }

    pub fn view_projection(&self) -> Mat4 {
        self.proj_mat * self.view()
    }
}
