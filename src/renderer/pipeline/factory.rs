//! Shader Factory
//!
//! Program cache keyed by capability pairs. The factory synthesises WGSL for
//! a key the first time it is requested and hands out the same
//! [`ShaderProgram`] for every later request with an equal key, so materials
//! with equal capabilities share one compiled program.
//!
//! Programs are returned uncompiled; they hydrate when first bound. Nothing
//! is evicted during a session. [`ShaderFactory::clear`] drops everything on
//! context loss and bumps [`ShaderFactory::epoch`] so material substrates
//! rebuild their bindings.

use std::rc::Rc;

use log::debug;
use minijinja::Environment;
use rustc_hash::FxHashMap;

use super::capabilities::{
    DiffuseTextureKind, LightingCapabilities, MaterialCapabilities, effective_lighting_model,
    surface_defines,
};
use super::modifier::{ModifierRegistry, ShaderModifier, modifier_keys};
use super::program::ShaderProgram;
use super::shader_gen::{ProgramTemplate, ShaderGenerator};
use super::shader_manager::build_env;
use crate::errors::Result;
use crate::renderer::core::{SamplerDecl, TextureKind, UniformDecl, UniformType, VertexLayout};
use crate::utils::interner;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SurfaceKey {
    material: MaterialCapabilities,
    lighting: LightingCapabilities,
    modifiers: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ImageKey {
    template: &'static str,
    name: String,
    defines: u64,
    modifiers: String,
}

pub struct ShaderFactory {
    env: Environment<'static>,
    registry: ModifierRegistry,
    srgb_framebuffer: bool,
    surface_programs: FxHashMap<SurfaceKey, Rc<ShaderProgram>>,
    image_programs: FxHashMap<ImageKey, Rc<ShaderProgram>>,
    epoch: u64,
}

impl std::fmt::Debug for ShaderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderFactory")
            .field("surface_programs", &self.surface_programs.len())
            .field("image_programs", &self.image_programs.len())
            .field("builtin_modifiers", &self.registry.len())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl ShaderFactory {
    /// `srgb_framebuffer` decides whether LDR surface programs encode gamma
    /// themselves.
    pub fn new(srgb_framebuffer: bool) -> Result<Self> {
        interner::preload_shader_defines();
        Ok(Self {
            env: build_env()?,
            registry: ModifierRegistry::new(),
            srgb_framebuffer,
            surface_programs: FxHashMap::default(),
            image_programs: FxHashMap::default(),
            epoch: 0,
        })
    }

    /// The surface program for a capability pair plus the material's
    /// custom modifiers.
    pub fn get_shader(
        &mut self,
        material: &MaterialCapabilities,
        lighting: &LightingCapabilities,
        modifiers: &[Rc<ShaderModifier>],
    ) -> Result<Rc<ShaderProgram>> {
        let key = SurfaceKey {
            material: material.clone(),
            lighting: *lighting,
            modifiers: modifier_keys(modifiers),
        };
        if let Some(program) = self.surface_programs.get(&key) {
            return Ok(program.clone());
        }

        let model = effective_lighting_model(material, lighting);
        let name = format!(
            "surface_{}_{}",
            model.define_value().to_lowercase(),
            self.surface_programs.len()
        );
        debug!("Shader cache miss, generating '{name}' for {material:?} / {lighting:?}");

        let mut uniforms = vec![
            UniformDecl::new("model", UniformType::Mat4),
            UniformDecl::new("view_projection", UniformType::Mat4),
            UniformDecl::new("normal_matrix", UniformType::Mat4),
            UniformDecl::new("camera_position", UniformType::Vec3),
            UniformDecl::new("diffuse_color", UniformType::Vec4),
            UniformDecl::new("shininess", UniformType::Float),
            UniformDecl::new("roughness", UniformType::Float),
            UniformDecl::new("metalness", UniformType::Float),
            UniformDecl::new("ao", UniformType::Float),
            UniformDecl::new("alpha", UniformType::Float),
        ];
        if lighting.tone_mapping_mask {
            uniforms.push(UniformDecl::new("tone_map_mask", UniformType::Float));
        }

        let mut samplers = Vec::new();
        match material.diffuse_texture {
            DiffuseTextureKind::Normal => {
                samplers.push(SamplerDecl::new("diffuse_texture", TextureKind::Texture2D));
            }
            DiffuseTextureKind::Cube => {
                samplers.push(SamplerDecl::new("diffuse_texture", TextureKind::Cube));
            }
            _ => {}
        }

        let mut all_modifiers = self
            .registry
            .surface_modifiers(material, lighting, self.srgb_framebuffer);
        all_modifiers.extend(modifiers.iter().cloned());

        let defines = surface_defines(material, lighting);
        let uses_lighting = defines.contains("USE_LIGHTING");
        let template = ProgramTemplate {
            template: "surface",
            name,
            defines,
            uniforms,
            samplers,
            modifiers: all_modifiers.clone(),
            vertex_layout: VertexLayout::Mesh,
            uses_lighting,
            color_outputs: lighting.color_outputs(),
        };

        let source = ShaderGenerator::generate(&self.env, &template)?;
        let program = Rc::new(ShaderProgram::with_modifiers(source, all_modifiers));
        self.surface_programs.insert(key, program.clone());
        Ok(program)
    }

    /// A program rendered from an arbitrary template (image passes, shadow
    /// depth, portal silhouettes), cached by template, name, defines and
    /// modifiers.
    pub fn image_program(&mut self, template: ProgramTemplate) -> Result<Rc<ShaderProgram>> {
        let key = ImageKey {
            template: template.template,
            name: template.name.clone(),
            defines: template.defines.content_hash(),
            modifiers: modifier_keys(&template.modifiers),
        };
        if let Some(program) = self.image_programs.get(&key) {
            return Ok(program.clone());
        }

        debug!("Generating image program '{}'", template.name);
        let source = ShaderGenerator::generate(&self.env, &template)?;
        let program = Rc::new(ShaderProgram::with_modifiers(source, template.modifiers));
        self.image_programs.insert(key, program.clone());
        Ok(program)
    }

    /// Context-scoped built-in modifiers.
    pub fn registry(&mut self) -> &mut ModifierRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn srgb_framebuffer(&self) -> bool {
        self.srgb_framebuffer
    }

    /// Drops every program and built-in modifier.
    pub fn clear(&mut self) {
        debug!(
            "Clearing shader factory ({} surface, {} image programs)",
            self.surface_programs.len(),
            self.image_programs.len()
        );
        self.surface_programs.clear();
        self.image_programs.clear();
        self.registry = ModifierRegistry::new();
        self.epoch += 1;
    }

    /// Incremented by every [`ShaderFactory::clear`].
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn program_count(&self) -> usize {
        self.surface_programs.len() + self.image_programs.len()
    }
}
