//! Lights
//!
//! The subset of a light that affects shader selection, the lighting block
//! and shadow rendering. Shadow state written during preprocessing (array
//! layer, light-space projection) lives in `Cell`s so passes can update it
//! through the shared `Rc<Light>` handed out by the scene.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3};

static NEXT_LIGHT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Ambient,
    Directional,
    Omni,
    Spot,
}

impl LightKind {
    /// Only directional and spot lights have a single light-space
    /// projection and can render into the shadow array.
    #[inline]
    #[must_use]
    pub fn supports_shadows(self) -> bool {
        matches!(self, Self::Directional | Self::Spot)
    }
}

#[derive(Debug)]
pub struct Light {
    id: u64,
    kind: LightKind,

    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
    pub direction: Vec3,
    /// Distance at which omni and spot falloff begins.
    pub attenuation_start: f32,
    /// Distance at which omni and spot lights no longer contribute.
    pub attenuation_end: f32,
    /// Full-intensity half angle of a spot cone, radians.
    pub inner_angle: f32,
    /// Zero-intensity half angle of a spot cone, radians.
    pub outer_angle: f32,

    casts_shadow: bool,
    /// Requested resolution of this light's shadow layer.
    pub shadow_map_size: u32,
    pub shadow_bias: f32,
    /// Half extent of the orthographic shadow volume of directional lights.
    pub shadow_ortho_size: f32,
    /// Center of the orthographic shadow volume of directional lights.
    pub shadow_ortho_center: Vec3,
    pub shadow_near: f32,
    pub shadow_far: f32,

    shadow_map_index: Cell<Option<u32>>,
    shadow_view_projection: Cell<Mat4>,
}

impl Light {
    fn with_kind(kind: LightKind) -> Self {
        Self {
            id: NEXT_LIGHT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            color: Vec3::ONE,
            intensity: 1.0,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            attenuation_start: 2.0,
            attenuation_end: 10.0,
            inner_angle: 0.0,
            outer_angle: std::f32::consts::FRAC_PI_4,
            casts_shadow: false,
            shadow_map_size: 1024,
            shadow_bias: 0.005,
            shadow_ortho_size: 20.0,
            shadow_ortho_center: Vec3::ZERO,
            shadow_near: 0.1,
            shadow_far: 20.0,
            shadow_map_index: Cell::new(None),
            shadow_view_projection: Cell::new(Mat4::IDENTITY),
        }
    }

    #[must_use]
    pub fn ambient(color: Vec3) -> Self {
        Self {
            color,
            ..Self::with_kind(LightKind::Ambient)
        }
    }

    #[must_use]
    pub fn directional(direction: Vec3) -> Self {
        Self {
            direction: direction.normalize_or(Vec3::NEG_Z),
            ..Self::with_kind(LightKind::Directional)
        }
    }

    #[must_use]
    pub fn omni(position: Vec3) -> Self {
        Self {
            position,
            ..Self::with_kind(LightKind::Omni)
        }
    }

    /// A spot light; angles are half angles in radians.
    #[must_use]
    pub fn spot(position: Vec3, direction: Vec3, inner_angle: f32, outer_angle: f32) -> Self {
        Self {
            position,
            direction: direction.normalize_or(Vec3::NEG_Z),
            inner_angle,
            outer_angle: outer_angle.max(inner_angle),
            ..Self::with_kind(LightKind::Spot)
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    #[must_use]
    pub fn with_shadows(mut self, map_size: u32) -> Self {
        self.casts_shadow = true;
        self.shadow_map_size = map_size;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> LightKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn casts_shadow(&self) -> bool {
        self.casts_shadow
    }

    /// Any kind may be flagged; the shadow preprocess rejects kinds without
    /// [`LightKind::supports_shadows`].
    pub fn set_casts_shadow(&mut self, casts: bool) {
        self.casts_shadow = casts;
    }

    /// Layer of the shared shadow array assigned this frame.
    #[inline]
    #[must_use]
    pub fn shadow_map_index(&self) -> Option<u32> {
        self.shadow_map_index.get()
    }

    pub fn set_shadow_map_index(&self, index: Option<u32>) {
        self.shadow_map_index.set(index);
    }

    #[inline]
    #[must_use]
    pub fn shadow_view_projection(&self) -> Mat4 {
        self.shadow_view_projection.get()
    }

    pub fn set_shadow_view_projection(&self, matrix: Mat4) {
        self.shadow_view_projection.set(matrix);
    }

    /// Light-space view-projection used to render and sample this light's
    /// shadow layer.
    #[must_use]
    pub fn compute_shadow_view_projection(&self) -> Mat4 {
        let direction = self.direction.normalize_or(Vec3::NEG_Z);
        let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };

        match self.kind {
            LightKind::Directional => {
                let eye = self.shadow_ortho_center - direction * (self.shadow_far * 0.5);
                let view = Mat4::look_at_rh(eye, self.shadow_ortho_center, up);
                let s = self.shadow_ortho_size;
                let projection = Mat4::orthographic_rh(-s, s, -s, s, self.shadow_near, self.shadow_far);
                projection * view
            }
            LightKind::Spot => {
                let view = Mat4::look_at_rh(self.position, self.position + direction, up);
                let fov = (self.outer_angle * 2.0).clamp(0.01, std::f32::consts::PI - 0.01);
                let projection = Mat4::perspective_rh(fov, 1.0, self.shadow_near, self.shadow_far);
                projection * view
            }
            LightKind::Ambient | LightKind::Omni => Mat4::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_support_by_kind() {
        assert!(LightKind::Directional.supports_shadows());
        assert!(LightKind::Spot.supports_shadows());
        assert!(!LightKind::Ambient.supports_shadows());
        assert!(!LightKind::Omni.supports_shadows());
    }

    #[test]
    fn test_directional_projection_centers_volume() {
        let mut light = Light::directional(Vec3::NEG_Y);
        light.shadow_ortho_center = Vec3::new(3.0, 0.0, -2.0);
        let clip = light
            .compute_shadow_view_projection()
            .project_point3(light.shadow_ortho_center);
        assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5, "center maps to {clip:?}");
        assert!(clip.z > 0.0 && clip.z < 1.0);
    }

    #[test]
    fn test_spot_projection_covers_cone() {
        let light = Light::spot(Vec3::ZERO, Vec3::NEG_Z, 0.2, 0.5);
        let vp = light.compute_shadow_view_projection();

        let inside = vp.project_point3(Vec3::new(5.0 * 0.4f32.tan(), 0.0, -5.0));
        assert!(inside.x.abs() < 1.0, "point inside cone projects to {inside:?}");
        let outside = vp.project_point3(Vec3::new(5.0 * 0.6f32.tan(), 0.0, -5.0));
        assert!(outside.x.abs() > 1.0, "point outside cone projects to {outside:?}");
    }
}
