//! Materials
//!
//! Only the parts of a material that influence program selection and
//! uniform binding live here. Properties that change the capability key are
//! private and go through setters that bump [`Material::shader_version`];
//! texture assignments additionally bump [`Material::texture_version`] so the
//! cached bindings reload their texture references.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec3, Vec4};

use crate::renderer::core::{BlendMode, CullMode};
use crate::renderer::pipeline::capabilities::LightingModel;
use crate::renderer::pipeline::modifier::{ShaderModifier, modifier_keys};
use crate::renderer::pipeline::substrate::MaterialSubstrate;
use crate::resources::texture::Texture;

static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(1);

/// Texture slots a material can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialTextureSlot {
    Diffuse,
    Specular,
    Normal,
    Reflective,
    Roughness,
    Metalness,
    AmbientOcclusion,
}

impl MaterialTextureSlot {
    pub const COUNT: usize = 7;

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug)]
pub struct Material {
    id: u64,
    lighting_model: LightingModel,
    textures: [Option<Rc<Texture>>; MaterialTextureSlot::COUNT],
    bloom_enabled: bool,
    receives_shadows: bool,
    shadow_catcher: bool,
    chroma_key: Option<Vec3>,
    modifiers: Vec<Rc<ShaderModifier>>,

    pub diffuse_color: Vec4,
    pub shininess: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub ambient_occlusion: f32,
    pub alpha: f32,
    pub bloom_threshold: f32,
    pub chroma_key_tolerance: f32,
    /// 1.0 when the tone mapper should process this surface, 0.0 to pass it through.
    pub tone_mapped: bool,
    pub blend_mode: BlendMode,
    pub cull_mode: CullMode,
    pub writes_to_depth: bool,
    pub reads_from_depth: bool,
    /// Primary sort priority; lower renders first.
    pub rendering_order: u32,

    shader_version: u64,
    texture_version: u64,
    substrate: RefCell<Option<MaterialSubstrate>>,
}

impl Default for Material {
    fn default() -> Self {
        Self::new(LightingModel::Blinn)
    }
}

impl Material {
    #[must_use]
    pub fn new(lighting_model: LightingModel) -> Self {
        Self {
            id: NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed),
            lighting_model,
            textures: Default::default(),
            bloom_enabled: false,
            receives_shadows: true,
            shadow_catcher: false,
            chroma_key: None,
            modifiers: Vec::new(),
            diffuse_color: Vec4::ONE,
            shininess: 32.0,
            roughness: 0.5,
            metalness: 0.0,
            ambient_occlusion: 1.0,
            alpha: 1.0,
            bloom_threshold: 1.0,
            chroma_key_tolerance: 0.2,
            tone_mapped: true,
            blend_mode: BlendMode::Alpha,
            cull_mode: CullMode::Back,
            writes_to_depth: true,
            reads_from_depth: true,
            rendering_order: 0,
            shader_version: 0,
            texture_version: 0,
            substrate: RefCell::new(None),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn shader_version(&self) -> u64 {
        self.shader_version
    }

    #[inline]
    #[must_use]
    pub fn texture_version(&self) -> u64 {
        self.texture_version
    }

    // ========================================================================
    // Capability-affecting properties
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn lighting_model(&self) -> LightingModel {
        self.lighting_model
    }

    pub fn set_lighting_model(&mut self, model: LightingModel) {
        if self.lighting_model != model {
            self.lighting_model = model;
            self.shader_version += 1;
        }
    }

    #[inline]
    #[must_use]
    pub fn texture(&self, slot: MaterialTextureSlot) -> Option<&Rc<Texture>> {
        self.textures[slot.index()].as_ref()
    }

    #[inline]
    #[must_use]
    pub fn has_texture(&self, slot: MaterialTextureSlot) -> bool {
        self.textures[slot.index()].is_some()
    }

    /// Assigned textures in slot order.
    pub fn textures(&self) -> impl Iterator<Item = &Rc<Texture>> {
        self.textures.iter().flatten()
    }

    /// Assigns a texture. The shader version changes only when the swap
    /// changes the capability key (presence, kind, content or stereo mode).
    pub fn set_texture(&mut self, slot: MaterialTextureSlot, texture: Option<Rc<Texture>>) {
        let current = &self.textures[slot.index()];
        let same_identity = match (current, &texture) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same_identity {
            return;
        }
        let signature = |t: &Option<Rc<Texture>>| t.as_ref().map(|t| (t.kind(), t.content(), t.stereo_mode()));
        if signature(current) != signature(&texture) {
            self.shader_version += 1;
        }
        self.textures[slot.index()] = texture;
        self.texture_version += 1;
    }

    #[inline]
    #[must_use]
    pub fn bloom_enabled(&self) -> bool {
        self.bloom_enabled
    }

    pub fn set_bloom_enabled(&mut self, enabled: bool) {
        if self.bloom_enabled != enabled {
            self.bloom_enabled = enabled;
            self.shader_version += 1;
        }
    }

    #[inline]
    #[must_use]
    pub fn receives_shadows(&self) -> bool {
        self.receives_shadows
    }

    pub fn set_receives_shadows(&mut self, receives: bool) {
        if self.receives_shadows != receives {
            self.receives_shadows = receives;
            self.shader_version += 1;
        }
    }

    #[inline]
    #[must_use]
    pub fn shadow_catcher(&self) -> bool {
        self.shadow_catcher
    }

    /// Renders only the shadows received by this surface, for AR planes.
    pub fn set_shadow_catcher(&mut self, enabled: bool) {
        if self.shadow_catcher != enabled {
            self.shadow_catcher = enabled;
            if enabled {
                self.blend_mode = BlendMode::Alpha;
            }
            self.shader_version += 1;
        }
    }

    #[inline]
    #[must_use]
    pub fn chroma_key(&self) -> Option<Vec3> {
        self.chroma_key
    }

    pub fn set_chroma_key(&mut self, color: Option<Vec3>) {
        if self.chroma_key != color {
            self.chroma_key = color;
            self.shader_version += 1;
        }
    }

    #[inline]
    #[must_use]
    pub fn modifiers(&self) -> &[Rc<ShaderModifier>] {
        &self.modifiers
    }

    pub fn add_modifier(&mut self, modifier: Rc<ShaderModifier>) {
        self.modifiers.push(modifier);
        self.shader_version += 1;
    }

    pub fn remove_modifier(&mut self, modifier: &Rc<ShaderModifier>) -> bool {
        let before = self.modifiers.len();
        self.modifiers.retain(|m| !Rc::ptr_eq(m, modifier));
        let removed = self.modifiers.len() != before;
        if removed {
            self.shader_version += 1;
        }
        removed
    }

    /// Identity string of the custom modifiers.
    #[must_use]
    pub fn modifier_keys(&self) -> String {
        modifier_keys(&self.modifiers)
    }

    // ========================================================================
    // GPU substrate
    // ========================================================================

    /// The cached per-lighting bindings of this material.
    #[must_use]
    pub fn substrate(&self) -> &RefCell<Option<MaterialSubstrate>> {
        &self.substrate
    }

    /// Drops the cached bindings; the next draw rebuilds them.
    pub fn reset_substrate(&self) {
        self.substrate.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::TextureKind;
    use crate::resources::texture::TextureContent;

    fn texture(content: TextureContent) -> Rc<Texture> {
        Rc::new(Texture::new("t", TextureKind::Texture2D, content))
    }

    #[test]
    fn test_swapping_equivalent_texture_keeps_shader_version() {
        let mut material = Material::default();
        material.set_texture(MaterialTextureSlot::Diffuse, Some(texture(TextureContent::Image)));
        let shader_version = material.shader_version();
        let texture_version = material.texture_version();

        material.set_texture(MaterialTextureSlot::Diffuse, Some(texture(TextureContent::Image)));
        assert_eq!(material.shader_version(), shader_version);
        assert_eq!(material.texture_version(), texture_version + 1);

        material.set_texture(MaterialTextureSlot::Diffuse, Some(texture(TextureContent::YCbCr)));
        assert_eq!(material.shader_version(), shader_version + 1);
    }

    #[test]
    fn test_setters_ignore_unchanged_values() {
        let mut material = Material::default();
        material.set_receives_shadows(true);
        material.set_bloom_enabled(false);
        assert_eq!(material.shader_version(), 0);

        material.set_receives_shadows(false);
        assert_eq!(material.shader_version(), 1);
    }
}
