use glam::{Mat4, Vec3};

/// View and projection of the eye being rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            Vec3::Y,
            60f32.to_radians(),
            1.0,
            0.01,
            100.0,
        )
    }
}

impl Camera {
    /// A perspective camera at `position` looking at `target`.
    /// `fov_y` is in radians.
    #[must_use]
    pub fn look_at(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            position,
            view: Mat4::look_at_rh(position, target, up),
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
        }
    }

    #[inline]
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}
