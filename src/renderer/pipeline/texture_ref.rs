//! Texture References
//!
//! A sampler of a surface program is fed either by a texture the material
//! owns or by one of the frame-global maps produced by preprocess tasks. The
//! global maps change identity from frame to frame, so they are named here
//! and resolved against the [`RenderContext`] at bind time.

use std::rc::Rc;

use crate::renderer::core::{TextureHandle, TextureKind};
use crate::renderer::graph::context::RenderContext;
use crate::resources::material::{Material, MaterialTextureSlot};
use crate::resources::texture::Texture;

/// Frame-global texture slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalTexture {
    ShadowMap,
    IrradianceMap,
    PrefilteredMap,
    BrdfMap,
}

impl GlobalTexture {
    #[must_use]
    pub fn sampler_name(self) -> &'static str {
        match self {
            Self::ShadowMap => "shadow_map",
            Self::IrradianceMap => "irradiance_map",
            Self::PrefilteredMap => "prefiltered_map",
            Self::BrdfMap => "brdf_map",
        }
    }

    #[must_use]
    pub fn from_sampler_name(name: &str) -> Option<Self> {
        match name {
            "shadow_map" => Some(Self::ShadowMap),
            "irradiance_map" => Some(Self::IrradianceMap),
            "prefiltered_map" => Some(Self::PrefilteredMap),
            "brdf_map" => Some(Self::BrdfMap),
            _ => None,
        }
    }

    /// Kind of the placeholder bound while the map does not exist.
    #[must_use]
    pub fn kind(self) -> TextureKind {
        match self {
            Self::ShadowMap => TextureKind::DepthArray,
            Self::IrradianceMap | Self::PrefilteredMap => TextureKind::Cube,
            Self::BrdfMap => TextureKind::Texture2D,
        }
    }
}

/// Source of one sampler unit.
#[derive(Debug, Clone)]
pub enum TextureReference {
    /// A plane of a texture owned by the material.
    Local { texture: Rc<Texture>, plane: usize },
    /// A map looked up in the render context each frame.
    Global(GlobalTexture),
}

impl TextureReference {
    #[must_use]
    pub fn local(texture: Rc<Texture>, plane: usize) -> Self {
        Self::Local { texture, plane }
    }

    #[must_use]
    pub fn global(slot: GlobalTexture) -> Self {
        Self::Global(slot)
    }

    #[inline]
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global(_))
    }

    #[must_use]
    pub fn kind(&self) -> TextureKind {
        match self {
            Self::Local { texture, .. } => texture.kind(),
            Self::Global(slot) => slot.kind(),
        }
    }

    /// The GPU handle to bind, or `None` when the substrate does not exist
    /// (yet); the caller binds a placeholder of [`TextureReference::kind`].
    #[must_use]
    pub fn resolve(&self, ctx: &RenderContext) -> Option<TextureHandle> {
        match self {
            Self::Local { texture, plane } => texture.plane(*plane),
            Self::Global(slot) => ctx.global_texture(*slot),
        }
    }

    /// Matches a sampler name declared by a surface program to its source.
    /// Names without a known source yield `None`; those units are left for
    /// the owner of the custom modifier to bind.
    #[must_use]
    pub fn for_sampler(name: &str, material: &Material) -> Option<Self> {
        if let Some(slot) = GlobalTexture::from_sampler_name(name) {
            return Some(Self::Global(slot));
        }
        let (slot, plane) = match name {
            "diffuse_texture" | "diffuse_texture_y" => (MaterialTextureSlot::Diffuse, 0),
            "diffuse_texture_cbcr" => (MaterialTextureSlot::Diffuse, 1),
            "specular_texture" => (MaterialTextureSlot::Specular, 0),
            "normal_texture" => (MaterialTextureSlot::Normal, 0),
            "reflect_texture" => (MaterialTextureSlot::Reflective, 0),
            "roughness_map" => (MaterialTextureSlot::Roughness, 0),
            "metalness_map" => (MaterialTextureSlot::Metalness, 0),
            "ao_map" => (MaterialTextureSlot::AmbientOcclusion, 0),
            _ => return None,
        };
        material
            .texture(slot)
            .map(|texture| Self::local(texture.clone(), plane))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::texture::TextureContent;

    #[test]
    fn test_sampler_names_resolve_to_sources() {
        let mut material = Material::default();
        let video = Rc::new(Texture::new("video", TextureKind::Texture2D, TextureContent::YCbCr));
        material.set_texture(MaterialTextureSlot::Diffuse, Some(video));

        match TextureReference::for_sampler("diffuse_texture_cbcr", &material) {
            Some(TextureReference::Local { plane, .. }) => assert_eq!(plane, 1),
            other => panic!("expected local chroma plane, got {other:?}"),
        }
        assert!(matches!(
            TextureReference::for_sampler("brdf_map", &material),
            Some(TextureReference::Global(GlobalTexture::BrdfMap))
        ));
        assert!(TextureReference::for_sampler("normal_texture", &material).is_none());
        assert!(TextureReference::for_sampler("user_noise", &material).is_none());
    }
}
