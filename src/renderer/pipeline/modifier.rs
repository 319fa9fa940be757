//! Shader Modifiers
//!
//! A [`ShaderModifier`] is a fragment of WGSL injected into a program
//! template at one of the fixed [`ShaderEntryPoint`]s, together with the
//! uniforms, samplers and defines that fragment needs.
//!
//! Built-in modifiers are stateless and shared: the [`ModifierRegistry`]
//! builds each one on first use and hands out the same `Rc` afterwards. The
//! registry is owned by the [`ShaderFactory`](super::factory::ShaderFactory)
//! and therefore lives exactly as long as the GPU context.
//!
//! # Template variables visible to bodies
//!
//! | Entry point     | Stage    | Mutable locals                         |
//! |-----------------|----------|----------------------------------------|
//! | `Vertex`        | vertex   | `position`, `normal`, `uv`             |
//! | `Geometry`      | vertex   | `uv`                                   |
//! | `Surface`       | fragment | `surface`                              |
//! | `LightingModel` | fragment | `lighting` (after the light loop)      |
//! | `Fragment`      | fragment | `color`, `bloom`                       |
//! | `Image`         | fragment | `color` (image programs)               |

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use rustc_hash::FxHashMap;

use super::binding::UniformBindInput;
use super::capabilities::{
    DiffuseTextureKind, LightingCapabilities, LightingModel, MaterialCapabilities, StereoMode,
    effective_lighting_model,
};
use crate::renderer::core::{SamplerDecl, TextureKind, UniformDecl, UniformType, UniformValue};
use crate::resources::shader_defines::ShaderDefines;

static NEXT_MODIFIER_ID: AtomicU32 = AtomicU32::new(1);

/// Injection point of a modifier body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderEntryPoint {
    Vertex,
    Geometry,
    Surface,
    LightingModel,
    Fragment,
    Image,
}

impl ShaderEntryPoint {
    /// Key under which bodies are exposed to templates (`modifiers.<key>`).
    #[must_use]
    pub fn template_key(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Surface => "surface",
            Self::LightingModel => "lighting_model",
            Self::Fragment => "fragment",
            Self::Image => "image",
        }
    }

    #[must_use]
    pub fn all() -> &'static [ShaderEntryPoint] {
        &[
            Self::Vertex,
            Self::Geometry,
            Self::Surface,
            Self::LightingModel,
            Self::Fragment,
            Self::Image,
        ]
    }
}

/// When a uniform is (re)bound during a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingPhase {
    /// Camera and eye data, once per view.
    View,
    /// Material properties.
    Material,
    /// Per-draw transform data.
    Geometry,
}

/// Computes the value of a modifier uniform for one draw.
pub type UniformBinder = Rc<dyn Fn(&UniformBindInput<'_>) -> Option<UniformValue>>;

#[derive(Clone)]
pub struct ModifierUniform {
    pub decl: UniformDecl,
    pub phase: BindingPhase,
    pub binder: Option<UniformBinder>,
}

impl fmt::Debug for ModifierUniform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierUniform")
            .field("decl", &self.decl)
            .field("phase", &self.phase)
            .field("binder", &self.binder.is_some())
            .finish()
    }
}

/// A WGSL fragment injected into a program template.
#[derive(Debug)]
pub struct ShaderModifier {
    id: u32,
    name: String,
    entry: ShaderEntryPoint,
    body: String,
    uniforms: Vec<ModifierUniform>,
    samplers: Vec<SamplerDecl>,
    defines: ShaderDefines,
}

impl ShaderModifier {
    #[must_use]
    pub fn new(name: impl Into<String>, entry: ShaderEntryPoint, body: impl Into<String>) -> Self {
        Self {
            id: NEXT_MODIFIER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            entry,
            body: body.into(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            defines: ShaderDefines::new(),
        }
    }

    /// Declares a uniform filled by `binder` during the given phase.
    #[must_use]
    pub fn with_uniform(
        mut self,
        name: &str,
        ty: UniformType,
        phase: BindingPhase,
        binder: impl Fn(&UniformBindInput<'_>) -> Option<UniformValue> + 'static,
    ) -> Self {
        self.uniforms.push(ModifierUniform {
            decl: UniformDecl::new(name, ty),
            phase,
            binder: Some(Rc::new(binder)),
        });
        self
    }

    /// Declares a uniform the caller sets manually.
    #[must_use]
    pub fn with_unbound_uniform(mut self, name: &str, ty: UniformType) -> Self {
        self.uniforms.push(ModifierUniform {
            decl: UniformDecl::new(name, ty),
            phase: BindingPhase::Geometry,
            binder: None,
        });
        self
    }

    #[must_use]
    pub fn with_sampler(mut self, name: &str, kind: TextureKind) -> Self {
        self.samplers.push(SamplerDecl::new(name, kind));
        self
    }

    #[must_use]
    pub fn with_define(mut self, key: &str, value: &str) -> Self {
        self.defines.set(key, value);
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn entry(&self) -> ShaderEntryPoint {
        self.entry
    }

    #[inline]
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[inline]
    #[must_use]
    pub fn uniforms(&self) -> &[ModifierUniform] {
        &self.uniforms
    }

    #[inline]
    #[must_use]
    pub fn samplers(&self) -> &[SamplerDecl] {
        &self.samplers
    }

    #[inline]
    #[must_use]
    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }
}

/// Identity string of a modifier list, `"m<id>_m<id>..."`.
#[must_use]
pub fn modifier_keys(modifiers: &[Rc<ShaderModifier>]) -> String {
    modifiers
        .iter()
        .map(|m| format!("m{}", m.id()))
        .collect::<Vec<_>>()
        .join("_")
}

// ============================================================================
// Built-ins
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinModifier {
    YCbCr,
    Stereo(StereoMode),
    Text,
    NormalMap,
    SpecularMap,
    Reflective,
    ShadowLighting,
    RoughnessMap,
    MetalnessMap,
    AoMap,
    DiffuseIrradiance,
    SpecularIrradiance,
    BloomOutput,
    ChromaKey,
    Gamma,
    ShadowCatcherSurface,
}

/// Lazily constructed, context-scoped set of shared built-in modifiers.
#[derive(Debug, Default)]
pub struct ModifierRegistry {
    modifiers: FxHashMap<BuiltinModifier, Rc<ShaderModifier>>,
}

impl ModifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared instance of `which`, built on first request.
    pub fn get(&mut self, which: BuiltinModifier) -> Rc<ShaderModifier> {
        self.modifiers
            .entry(which)
            .or_insert_with(|| {
                debug!("Building builtin modifier {which:?}");
                Rc::new(build_builtin(which))
            })
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Built-in modifiers a surface program needs for a key pair, in
    /// injection order.
    pub fn surface_modifiers(
        &mut self,
        material: &MaterialCapabilities,
        lighting: &LightingCapabilities,
        srgb_framebuffer: bool,
    ) -> Vec<Rc<ShaderModifier>> {
        let model = effective_lighting_model(material, lighting);
        let pbr = model == LightingModel::PhysicallyBased;
        let mut wanted = Vec::new();

        match material.diffuse_texture {
            DiffuseTextureKind::YCbCr => wanted.push(BuiltinModifier::YCbCr),
            DiffuseTextureKind::Text => wanted.push(BuiltinModifier::Text),
            _ => {}
        }
        if material.diffuse_stereo != StereoMode::None {
            wanted.push(BuiltinModifier::Stereo(material.diffuse_stereo));
        }
        if material.normal_texture && model.is_lit() {
            wanted.push(BuiltinModifier::NormalMap);
        }
        if material.specular_texture && model.is_lit() {
            wanted.push(BuiltinModifier::SpecularMap);
        }
        if material.roughness_map && pbr {
            wanted.push(BuiltinModifier::RoughnessMap);
        }
        if material.metalness_map && pbr {
            wanted.push(BuiltinModifier::MetalnessMap);
        }
        if material.ao_map && model.is_lit() {
            wanted.push(BuiltinModifier::AoMap);
        }
        if material.reflective_texture {
            wanted.push(BuiltinModifier::Reflective);
        }
        if material.receives_shadows && lighting.shadows && (model.is_lit() || material.shadow_catcher) {
            wanted.push(BuiltinModifier::ShadowLighting);
        }
        if pbr && lighting.diffuse_irradiance {
            wanted.push(BuiltinModifier::DiffuseIrradiance);
        }
        if pbr && lighting.specular_irradiance {
            wanted.push(BuiltinModifier::SpecularIrradiance);
        }
        if material.chroma_key.is_some() {
            wanted.push(BuiltinModifier::ChromaKey);
        }
        if material.shadow_catcher {
            wanted.push(BuiltinModifier::ShadowCatcherSurface);
        }
        if material.bloom && lighting.bloom {
            wanted.push(BuiltinModifier::BloomOutput);
        }
        if !lighting.hdr && !srgb_framebuffer {
            wanted.push(BuiltinModifier::Gamma);
        }

        wanted.into_iter().map(|which| self.get(which)).collect()
    }
}

fn build_builtin(which: BuiltinModifier) -> ShaderModifier {
    use BuiltinModifier as B;
    use ShaderEntryPoint as E;

    match which {
        B::YCbCr => ShaderModifier::new(
            "ycbcr",
            E::Surface,
            "let ycbcr_y = textureSample(diffuse_texture_y, diffuse_texture_y_sampler, uv).r;\n\
             let ycbcr_c = textureSample(diffuse_texture_cbcr, diffuse_texture_cbcr_sampler, uv).rg - vec2<f32>(0.5, 0.5);\n\
             let ycbcr_rgb = vec3<f32>(ycbcr_y + 1.402 * ycbcr_c.y, ycbcr_y - 0.344136 * ycbcr_c.x - 0.714136 * ycbcr_c.y, ycbcr_y + 1.772 * ycbcr_c.x);\n\
             surface.diffuse_color = surface.diffuse_color * vec4<f32>(ycbcr_rgb, 1.0);",
        )
        .with_sampler("diffuse_texture_y", TextureKind::Texture2D)
        .with_sampler("diffuse_texture_cbcr", TextureKind::Texture2D),

        B::Stereo(mode) => {
            let body = match mode {
                StereoMode::LeftRight | StereoMode::None => {
                    "uv = vec2<f32>(uv.x * 0.5 + 0.5 * u.stereo_eye, uv.y);"
                }
                StereoMode::RightLeft => "uv = vec2<f32>(uv.x * 0.5 + 0.5 * (1.0 - u.stereo_eye), uv.y);",
                StereoMode::TopBottom => "uv = vec2<f32>(uv.x, uv.y * 0.5 + 0.5 * u.stereo_eye);",
                StereoMode::BottomTop => "uv = vec2<f32>(uv.x, uv.y * 0.5 + 0.5 * (1.0 - u.stereo_eye));",
            };
            ShaderModifier::new(format!("stereo_{mode:?}").to_lowercase(), E::Geometry, body).with_uniform(
                "stereo_eye",
                UniformType::Float,
                BindingPhase::View,
                |input| Some(UniformValue::Float(input.ctx.eye().stereo_index())),
            )
        }

        B::Text => ShaderModifier::new(
            "text",
            E::Surface,
            "surface.diffuse_color = vec4<f32>(surface.diffuse_color.rgb, surface.diffuse_color.a * textureSample(diffuse_texture, diffuse_texture_sampler, uv).r);",
        )
        .with_sampler("diffuse_texture", TextureKind::Texture2D),

        B::NormalMap => ShaderModifier::new(
            "normal_map",
            E::Surface,
            "let nm_sample = textureSample(normal_texture, normal_texture_sampler, uv).xyz * 2.0 - vec3<f32>(1.0);\n\
             let nm_dp1 = dpdx(in.world_position);\n\
             let nm_dp2 = dpdy(in.world_position);\n\
             let nm_duv1 = dpdx(uv);\n\
             let nm_duv2 = dpdy(uv);\n\
             let nm_t = normalize(nm_dp1 * nm_duv2.y - nm_dp2 * nm_duv1.y);\n\
             let nm_b = normalize(cross(surface.normal, nm_t));\n\
             surface.normal = normalize(mat3x3<f32>(nm_t, nm_b, surface.normal) * nm_sample);",
        )
        .with_sampler("normal_texture", TextureKind::Texture2D),

        B::SpecularMap => ShaderModifier::new(
            "specular_map",
            E::Surface,
            "surface.specular_color = surface.specular_color * textureSample(specular_texture, specular_texture_sampler, uv).rgb;",
        )
        .with_sampler("specular_texture", TextureKind::Texture2D),

        B::Reflective => ShaderModifier::new(
            "reflective",
            E::LightingModel,
            "let refl_dir = reflect(-view_dir, surface.normal);\n\
             lighting.specular = lighting.specular + textureSample(reflect_texture, reflect_texture_sampler, refl_dir).rgb * surface.specular_color;",
        )
        .with_sampler("reflect_texture", TextureKind::Cube),

        B::ShadowLighting => ShaderModifier::new("shadow_lighting", E::LightingModel, "")
            .with_sampler("shadow_map", TextureKind::DepthArray)
            .with_define("RECEIVE_SHADOWS", "1"),

        B::RoughnessMap => ShaderModifier::new(
            "roughness_map",
            E::Surface,
            "surface.roughness = surface.roughness * textureSample(roughness_map, roughness_map_sampler, uv).g;",
        )
        .with_sampler("roughness_map", TextureKind::Texture2D),

        B::MetalnessMap => ShaderModifier::new(
            "metalness_map",
            E::Surface,
            "surface.metalness = surface.metalness * textureSample(metalness_map, metalness_map_sampler, uv).b;",
        )
        .with_sampler("metalness_map", TextureKind::Texture2D),

        B::AoMap => ShaderModifier::new(
            "ao_map",
            E::Surface,
            "surface.ao = surface.ao * textureSample(ao_map, ao_map_sampler, uv).r;",
        )
        .with_sampler("ao_map", TextureKind::Texture2D),

        B::DiffuseIrradiance => ShaderModifier::new(
            "diffuse_irradiance",
            E::LightingModel,
            "lighting.ambient = textureSample(irradiance_map, irradiance_map_sampler, surface.normal).rgb;",
        )
        .with_sampler("irradiance_map", TextureKind::Cube),

        B::SpecularIrradiance => ShaderModifier::new(
            "specular_irradiance",
            E::LightingModel,
            "let ibl_r = reflect(-view_dir, surface.normal);\n\
             let ibl_n_dot_v = max(dot(surface.normal, view_dir), 0.0);\n\
             let ibl_prefiltered = textureSampleLevel(prefiltered_map, prefiltered_map_sampler, ibl_r, surface.roughness * u.prefilter_max_lod).rgb;\n\
             let ibl_brdf = textureSample(brdf_map, brdf_map_sampler, vec2<f32>(ibl_n_dot_v, surface.roughness)).rg;\n\
             let ibl_f0 = mix(vec3<f32>(0.04), surface.diffuse_color.rgb, surface.metalness);\n\
             lighting.specular = lighting.specular + ibl_prefiltered * (ibl_f0 * ibl_brdf.x + ibl_brdf.y);",
        )
        .with_sampler("prefiltered_map", TextureKind::Cube)
        .with_sampler("brdf_map", TextureKind::Texture2D)
        .with_uniform("prefilter_max_lod", UniformType::Float, BindingPhase::View, |input| {
            Some(UniformValue::Float(input.ctx.prefilter_max_lod()))
        }),

        B::BloomOutput => ShaderModifier::new(
            "bloom_output",
            E::Fragment,
            "let bloom_luma = dot(color.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));\n\
             bloom = select(vec4<f32>(0.0, 0.0, 0.0, 1.0), vec4<f32>(color.rgb, 1.0), bloom_luma > u.bloom_threshold);",
        )
        .with_uniform("bloom_threshold", UniformType::Float, BindingPhase::Material, |input| {
            Some(UniformValue::Float(input.material.bloom_threshold))
        }),

        B::ChromaKey => ShaderModifier::new(
            "chroma_key",
            E::Fragment,
            "if (distance(color.rgb, u.chroma_key_color) < u.chroma_key_tolerance) {\n    discard;\n}",
        )
        .with_uniform("chroma_key_color", UniformType::Vec3, BindingPhase::Material, |input| {
            input.material.chroma_key().map(UniformValue::Vec3)
        })
        .with_uniform("chroma_key_tolerance", UniformType::Float, BindingPhase::Material, |input| {
            Some(UniformValue::Float(input.material.chroma_key_tolerance))
        }),

        B::Gamma => ShaderModifier::new(
            "gamma",
            E::Fragment,
            "color = vec4<f32>(pow(max(color.rgb, vec3<f32>(0.0)), vec3<f32>(1.0 / 2.2)), color.a);",
        ),

        B::ShadowCatcherSurface => ShaderModifier::new(
            "shadow_catcher",
            E::Fragment,
            "color = vec4<f32>(0.0, 0.0, 0.0, (1.0 - lighting.shadow) * surface.alpha);",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_shares_instances() {
        let mut registry = ModifierRegistry::new();
        let a = registry.get(BuiltinModifier::NormalMap);
        let b = registry.get(BuiltinModifier::NormalMap);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        let left = registry.get(BuiltinModifier::Stereo(StereoMode::LeftRight));
        let top = registry.get(BuiltinModifier::Stereo(StereoMode::TopBottom));
        assert_ne!(left.id(), top.id());
    }

    #[test]
    fn test_modifier_keys_format() {
        let a = Rc::new(ShaderModifier::new("a", ShaderEntryPoint::Surface, ""));
        let b = Rc::new(ShaderModifier::new("b", ShaderEntryPoint::Fragment, ""));
        let keys = modifier_keys(&[a.clone(), b.clone()]);
        assert_eq!(keys, format!("m{}_m{}", a.id(), b.id()));
        assert_eq!(modifier_keys(&[]), "");
    }

    #[test]
    fn test_shadow_modifier_requires_receiver() {
        let mut registry = ModifierRegistry::new();
        let lighting = LightingCapabilities {
            shadows: true,
            ..Default::default()
        };
        let receiver = MaterialCapabilities {
            receives_shadows: true,
            ..Default::default()
        };
        let non_receiver = MaterialCapabilities::default();

        let with = registry.surface_modifiers(&receiver, &lighting, true);
        let without = registry.surface_modifiers(&non_receiver, &lighting, true);

        assert!(with.iter().any(|m| m.name() == "shadow_lighting"));
        assert!(!without.iter().any(|m| m.name() == "shadow_lighting"));
    }

    #[test]
    fn test_gamma_only_without_hw_srgb() {
        let mut registry = ModifierRegistry::new();
        let material = MaterialCapabilities::default();
        let ldr = LightingCapabilities::default();

        assert!(registry.surface_modifiers(&material, &ldr, false).iter().any(|m| m.name() == "gamma"));
        assert!(!registry.surface_modifiers(&material, &ldr, true).iter().any(|m| m.name() == "gamma"));
    }
}
