//! Render Context
//!
//! Per-frame state shared by preprocess tasks, passes and material bindings:
//! the camera and eye, the feature switches configured by the choreographer,
//! and the global texture slots preprocess tasks publish.
//!
//! | Slot             | Written by        | Read by                    |
//! |------------------|-------------------|----------------------------|
//! | `shadow_map`     | shadow preprocess | receiving surface programs |
//! | `irradiance_map` | IBL preprocess    | PBR surface programs       |
//! | `prefiltered_map`| IBL preprocess    | PBR surface programs       |
//! | `brdf_map`       | IBL preprocess    | PBR surface programs       |

use std::cell::RefCell;
use std::rc::Rc;

use crate::renderer::core::{RenderTarget, TextureHandle};
use crate::renderer::pipeline::lighting::LightingUboCache;
use crate::renderer::pipeline::texture_ref::GlobalTexture;
use crate::scene::camera::Camera;

/// Eye being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Eye {
    #[default]
    Mono,
    Left,
    Right,
}

impl Eye {
    /// Value fed to stereo modifiers, selecting the right half of a stereo
    /// texture for the right eye.
    #[inline]
    #[must_use]
    pub fn stereo_index(self) -> f32 {
        match self {
            Self::Right => 1.0,
            Self::Mono | Self::Left => 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct RenderContext {
    frame: u64,
    eye: Eye,
    camera: Camera,

    hdr: bool,
    pbr: bool,
    shadows: bool,
    bloom_output: bool,
    tone_mapping_mask: bool,

    shadow_map: Option<Rc<RenderTarget>>,
    irradiance_map: Option<Rc<RenderTarget>>,
    prefiltered_map: Option<Rc<RenderTarget>>,
    brdf_map: Option<Rc<RenderTarget>>,
    prefilter_max_lod: f32,

    lighting_cache: RefCell<LightingUboCache>,
}

impl RenderContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self, frame: u64, camera: Camera) {
        self.frame = frame;
        self.camera = camera;
    }

    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    #[inline]
    #[must_use]
    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn set_eye(&mut self, eye: Eye) {
        self.eye = eye;
    }

    // ========================================================================
    // Feature switches
    // ========================================================================

    #[must_use]
    pub fn hdr_enabled(&self) -> bool {
        self.hdr
    }

    pub fn set_hdr_enabled(&mut self, enabled: bool) {
        self.hdr = enabled;
    }

    #[must_use]
    pub fn pbr_enabled(&self) -> bool {
        self.pbr
    }

    pub fn set_pbr_enabled(&mut self, enabled: bool) {
        self.pbr = enabled;
    }

    #[must_use]
    pub fn shadows_enabled(&self) -> bool {
        self.shadows
    }

    pub fn set_shadows_enabled(&mut self, enabled: bool) {
        self.shadows = enabled;
    }

    /// Surface programs write a second, bloom-threshold color output.
    #[must_use]
    pub fn bloom_output(&self) -> bool {
        self.bloom_output
    }

    pub fn set_bloom_output(&mut self, enabled: bool) {
        self.bloom_output = enabled;
    }

    /// Surface programs write a tone-mapping mask output.
    #[must_use]
    pub fn tone_mapping_mask(&self) -> bool {
        self.tone_mapping_mask
    }

    pub fn set_tone_mapping_mask(&mut self, enabled: bool) {
        self.tone_mapping_mask = enabled;
    }

    // ========================================================================
    // Global textures
    // ========================================================================

    #[must_use]
    pub fn shadow_map(&self) -> Option<&Rc<RenderTarget>> {
        self.shadow_map.as_ref()
    }

    pub fn set_shadow_map(&mut self, target: Option<Rc<RenderTarget>>) {
        self.shadow_map = target;
    }

    #[must_use]
    pub fn irradiance_map(&self) -> Option<&Rc<RenderTarget>> {
        self.irradiance_map.as_ref()
    }

    pub fn set_irradiance_map(&mut self, target: Option<Rc<RenderTarget>>) {
        self.irradiance_map = target;
    }

    #[must_use]
    pub fn prefiltered_map(&self) -> Option<&Rc<RenderTarget>> {
        self.prefiltered_map.as_ref()
    }

    pub fn set_prefiltered_map(&mut self, target: Option<Rc<RenderTarget>>) {
        self.prefiltered_map = target;
    }

    #[must_use]
    pub fn brdf_map(&self) -> Option<&Rc<RenderTarget>> {
        self.brdf_map.as_ref()
    }

    pub fn set_brdf_map(&mut self, target: Option<Rc<RenderTarget>>) {
        self.brdf_map = target;
    }

    /// Highest mip of the prefiltered map, sampled at roughness 1.
    #[must_use]
    pub fn prefilter_max_lod(&self) -> f32 {
        self.prefilter_max_lod
    }

    pub fn set_prefilter_max_lod(&mut self, lod: f32) {
        self.prefilter_max_lod = lod;
    }

    /// The handle currently published in a global slot. Targets from a lost
    /// context resolve to `None`.
    #[must_use]
    pub fn global_texture(&self, slot: GlobalTexture) -> Option<TextureHandle> {
        let target = match slot {
            GlobalTexture::ShadowMap => self.shadow_map.as_ref(),
            GlobalTexture::IrradianceMap => self.irradiance_map.as_ref(),
            GlobalTexture::PrefilteredMap => self.prefiltered_map.as_ref(),
            GlobalTexture::BrdfMap => self.brdf_map.as_ref(),
        }?;
        if !target.is_valid() {
            return None;
        }
        match slot {
            GlobalTexture::ShadowMap => target.depth_texture(),
            _ => target.texture(0),
        }
    }

    /// Lighting blocks shared by every lit draw, keyed by light set.
    #[must_use]
    pub fn lighting_cache(&self) -> &RefCell<LightingUboCache> {
        &self.lighting_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::{Driver, HeadlessDriver, RenderTargetDesc, RenderTargetType};

    #[test]
    fn test_global_texture_resolves_published_maps() {
        let mut driver = HeadlessDriver::new(8, 8).unwrap();
        let mut ctx = RenderContext::new();
        assert_eq!(ctx.global_texture(GlobalTexture::ShadowMap), None);

        let shadow = driver
            .new_render_target(
                &RenderTargetDesc::new("shadow", RenderTargetType::DepthTextureArray, 64, 64)
                    .with_slices(2),
            )
            .unwrap();
        ctx.set_shadow_map(Some(shadow.clone()));
        assert_eq!(ctx.global_texture(GlobalTexture::ShadowMap), shadow.depth_texture());

        driver.lose_context();
        assert_eq!(ctx.global_texture(GlobalTexture::ShadowMap), None);
    }

    #[test]
    fn test_right_eye_selects_second_half() {
        assert_eq!(Eye::Right.stereo_index(), 1.0);
        assert_eq!(Eye::Left.stereo_index(), 0.0);
    }
}
