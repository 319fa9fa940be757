//! Shader Capability Keys
//!
//! Two small comparable structs summarise everything that decides which
//! program renders a draw:
//!
//! - [`MaterialCapabilities`]: derived from a [`Material`] alone.
//! - [`LightingCapabilities`]: derived from the active lights and the frame's
//!   [`RenderContext`].
//!
//! Derivation is pure and deterministic; callers cache the results. Two
//! materials with equal keys under equal lighting are rendered by the same
//! cached [`ShaderProgram`](super::program::ShaderProgram).

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::renderer::core::TextureKind;
use crate::renderer::graph::context::RenderContext;
use crate::resources::material::{Material, MaterialTextureSlot};
use crate::resources::shader_defines::ShaderDefines;
use crate::resources::texture::TextureContent;
use crate::scene::light::Light;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingModel {
    /// Unlit; the surface shows its diffuse color.
    Constant,
    Lambert,
    #[default]
    Blinn,
    Phong,
    PhysicallyBased,
}

impl LightingModel {
    #[must_use]
    pub fn define_value(self) -> &'static str {
        match self {
            Self::Constant => "CONSTANT",
            Self::Lambert => "LAMBERT",
            Self::Blinn => "BLINN",
            Self::Phong => "PHONG",
            Self::PhysicallyBased => "PBR",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_lit(self) -> bool {
        self != Self::Constant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DiffuseTextureKind {
    #[default]
    None,
    /// Plain 2D image.
    Normal,
    /// Two-plane video frame (luma + chroma).
    YCbCr,
    Cube,
    /// Glyph atlas with coverage in the red channel.
    Text,
}

impl DiffuseTextureKind {
    #[must_use]
    pub fn define_value(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Normal => "2D",
            Self::YCbCr => "YCBCR",
            Self::Cube => "CUBE",
            Self::Text => "TEXT",
        }
    }
}

/// Layout of a stereoscopic image packed into one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoMode {
    #[default]
    None,
    LeftRight,
    RightLeft,
    TopBottom,
    BottomTop,
}

/// GPU-relevant snapshot of a material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MaterialCapabilities {
    pub lighting_model: LightingModel,
    pub diffuse_texture: DiffuseTextureKind,
    pub diffuse_stereo: StereoMode,
    pub specular_texture: bool,
    pub normal_texture: bool,
    pub reflective_texture: bool,
    pub roughness_map: bool,
    pub metalness_map: bool,
    pub ao_map: bool,
    pub bloom: bool,
    pub receives_shadows: bool,
    /// Only the received shadow is drawn (AR ground planes).
    pub shadow_catcher: bool,
    /// Chroma-key color as `f32::to_bits`, so the key stays `Ord` and `Hash`.
    pub chroma_key: Option<[u32; 3]>,
    /// Identity of the material's custom modifiers, `"m<id>_m<id>..."`.
    pub additional_modifier_keys: String,
}

/// Snapshot of the lighting environment of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LightingCapabilities {
    pub shadows: bool,
    pub hdr: bool,
    pub pbr: bool,
    pub diffuse_irradiance: bool,
    pub specular_irradiance: bool,
    /// The scene target carries a bloom attachment.
    pub bloom: bool,
    /// The scene target carries a tone-mapping mask attachment.
    pub tone_mapping_mask: bool,
}

impl LightingCapabilities {
    /// Number of color outputs a surface program must write.
    #[must_use]
    pub fn color_outputs(&self) -> u32 {
        1 + u32::from(self.bloom) + u32::from(self.tone_mapping_mask)
    }
}

/// Derives the material key.
#[must_use]
pub fn derive_material_capabilities(material: &Material) -> MaterialCapabilities {
    let diffuse = material.texture(MaterialTextureSlot::Diffuse);
    let diffuse_texture = match diffuse {
        None => DiffuseTextureKind::None,
        Some(texture) if texture.kind() == TextureKind::Cube => DiffuseTextureKind::Cube,
        Some(texture) => match texture.content() {
            TextureContent::Image => DiffuseTextureKind::Normal,
            TextureContent::YCbCr => DiffuseTextureKind::YCbCr,
            TextureContent::Text => DiffuseTextureKind::Text,
        },
    };
    let diffuse_stereo = diffuse.map_or(StereoMode::None, |texture| texture.stereo_mode());

    MaterialCapabilities {
        lighting_model: material.lighting_model(),
        diffuse_texture,
        diffuse_stereo,
        specular_texture: material.has_texture(MaterialTextureSlot::Specular),
        normal_texture: material.has_texture(MaterialTextureSlot::Normal),
        reflective_texture: material.has_texture(MaterialTextureSlot::Reflective),
        roughness_map: material.has_texture(MaterialTextureSlot::Roughness),
        metalness_map: material.has_texture(MaterialTextureSlot::Metalness),
        ao_map: material.has_texture(MaterialTextureSlot::AmbientOcclusion),
        bloom: material.bloom_enabled(),
        receives_shadows: material.receives_shadows(),
        shadow_catcher: material.shadow_catcher(),
        chroma_key: material
            .chroma_key()
            .map(|c| [c.x.to_bits(), c.y.to_bits(), c.z.to_bits()]),
        additional_modifier_keys: material.modifier_keys(),
    }
}

/// Derives the lighting key. With no lights the key reports no shadows and
/// surfaces take the ambient-only path.
#[must_use]
pub fn derive_lighting_capabilities(lights: &[Rc<Light>], ctx: &RenderContext) -> LightingCapabilities {
    let casts_shadows = lights.iter().any(|light| light.casts_shadow());

    LightingCapabilities {
        shadows: casts_shadows && ctx.shadows_enabled() && ctx.shadow_map().is_some(),
        hdr: ctx.hdr_enabled(),
        pbr: ctx.pbr_enabled(),
        diffuse_irradiance: ctx.irradiance_map().is_some(),
        specular_irradiance: ctx.prefiltered_map().is_some() && ctx.brdf_map().is_some(),
        bloom: ctx.bloom_output(),
        tone_mapping_mask: ctx.tone_mapping_mask(),
    }
}

/// Lighting model actually compiled for `material` under `lighting`.
#[must_use]
pub fn effective_lighting_model(
    material: &MaterialCapabilities,
    lighting: &LightingCapabilities,
) -> LightingModel {
    match material.lighting_model {
        LightingModel::PhysicallyBased if !lighting.pbr => LightingModel::Blinn,
        model => model,
    }
}

/// Lowers a key pair into the template defines of the surface program.
#[must_use]
pub fn surface_defines(material: &MaterialCapabilities, lighting: &LightingCapabilities) -> ShaderDefines {
    let model = effective_lighting_model(material, lighting);
    let mut defines = ShaderDefines::new();
    defines.set("LIGHTING_MODEL", model.define_value());
    defines.set("DIFFUSE_TEXTURE", material.diffuse_texture.define_value());
    defines.enable_if("USE_LIGHTING", model.is_lit() || material.shadow_catcher);
    defines.enable_if("HDR", lighting.hdr);
    defines.enable_if("BLOOM_OUTPUT", lighting.bloom);
    if lighting.tone_mapping_mask {
        defines.enable("TONE_MAPPING_MASK");
        defines.set("MASK_LOCATION", if lighting.bloom { "2" } else { "1" });
    }
    defines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbr_falls_back_without_pbr_lighting() {
        let material = MaterialCapabilities {
            lighting_model: LightingModel::PhysicallyBased,
            ..Default::default()
        };
        let mut lighting = LightingCapabilities::default();
        assert_eq!(effective_lighting_model(&material, &lighting), LightingModel::Blinn);

        lighting.pbr = true;
        assert_eq!(
            effective_lighting_model(&material, &lighting),
            LightingModel::PhysicallyBased
        );
    }

    #[test]
    fn test_keys_are_totally_ordered() {
        let a = MaterialCapabilities {
            chroma_key: Some([0.0f32.to_bits(), 1.0f32.to_bits(), 0.0f32.to_bits()]),
            ..Default::default()
        };
        let b = MaterialCapabilities::default();
        assert_ne!(a, b);
        assert!(b < a, "None sorts before Some");
    }

    #[test]
    fn test_color_outputs_follow_attachments() {
        let mut lighting = LightingCapabilities::default();
        assert_eq!(lighting.color_outputs(), 1);
        lighting.bloom = true;
        lighting.tone_mapping_mask = true;
        assert_eq!(lighting.color_outputs(), 3);

        let defines = surface_defines(&MaterialCapabilities::default(), &lighting);
        assert_eq!(defines.get("MASK_LOCATION"), Some("2".to_string()));
    }

    #[test]
    fn test_constant_model_skips_lighting_block() {
        let material = MaterialCapabilities {
            lighting_model: LightingModel::Constant,
            ..Default::default()
        };
        let defines = surface_defines(&material, &LightingCapabilities::default());
        assert!(!defines.contains("USE_LIGHTING"));
        assert_eq!(defines.get("LIGHTING_MODEL"), Some("CONSTANT".to_string()));
    }
}
