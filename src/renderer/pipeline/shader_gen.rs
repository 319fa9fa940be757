//! Shader Code Generator
//!
//! Turns a [`ProgramTemplate`] (template name, defines, declared uniforms and
//! samplers, modifiers) into a complete [`ShaderSource`]. The generator owns
//! the binding layout shared by every backend:
//!
//! - `@group(0) @binding(0)`: the program's uniform struct `u`
//! - `@group(0) @binding(1)`: the lighting block (lit programs only)
//! - `@group(1) @binding(2i)` / `@binding(2i + 1)`: texture and sampler of unit `i`

use std::collections::BTreeMap;
use std::fmt::Write;
use std::rc::Rc;

use minijinja::Environment;
use minijinja::value::Value;
use serde::Serialize;

use super::modifier::{ShaderEntryPoint, ShaderModifier};
use super::shader_manager::LocationAllocator;
use crate::errors::Result;
use crate::renderer::core::{SamplerDecl, ShaderSource, UniformDecl, VertexLayout};
use crate::resources::shader_defines::ShaderDefines;

/// Everything needed to render one program from a template.
#[derive(Debug, Clone)]
pub struct ProgramTemplate {
    pub template: &'static str,
    pub name: String,
    pub defines: ShaderDefines,
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<SamplerDecl>,
    pub modifiers: Vec<Rc<ShaderModifier>>,
    pub vertex_layout: VertexLayout,
    pub uses_lighting: bool,
    pub color_outputs: u32,
}

impl ProgramTemplate {
    /// A fullscreen image program with one color output.
    #[must_use]
    pub fn image(template: &'static str, name: impl Into<String>) -> Self {
        Self {
            template,
            name: name.into(),
            defines: ShaderDefines::new(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            modifiers: Vec::new(),
            vertex_layout: VertexLayout::Fullscreen,
            uses_lighting: false,
            color_outputs: 1,
        }
    }

    #[must_use]
    pub fn with_defines(mut self, defines: ShaderDefines) -> Self {
        self.defines.merge(&defines);
        self
    }

    #[must_use]
    pub fn with_uniforms(mut self, uniforms: impl IntoIterator<Item = UniformDecl>) -> Self {
        self.uniforms.extend(uniforms);
        self
    }

    #[must_use]
    pub fn with_samplers(mut self, samplers: impl IntoIterator<Item = SamplerDecl>) -> Self {
        self.samplers.extend(samplers);
        self
    }

    #[must_use]
    pub fn with_modifiers(mut self, modifiers: impl IntoIterator<Item = Rc<ShaderModifier>>) -> Self {
        self.modifiers.extend(modifiers);
        self
    }
}

#[derive(Serialize)]
struct ShaderContext<'a> {
    #[serde(flatten)]
    defines: BTreeMap<String, String>,
    binding_code: &'a str,
    modifiers: BTreeMap<&'static str, String>,
    loc: Value,
}

pub struct ShaderGenerator;

impl ShaderGenerator {
    /// Renders `program` into a [`ShaderSource`]. Modifier uniforms, samplers
    /// and defines are merged after the template's own; duplicates by name
    /// are declared once.
    pub fn generate(env: &Environment<'static>, program: &ProgramTemplate) -> Result<ShaderSource> {
        let mut defines = program.defines.clone();
        let mut uniforms = program.uniforms.clone();
        let mut samplers = program.samplers.clone();
        let mut bodies: BTreeMap<&'static str, String> = ShaderEntryPoint::all()
            .iter()
            .map(|entry| (entry.template_key(), String::new()))
            .collect();

        for modifier in &program.modifiers {
            defines.merge(modifier.defines());
            for uniform in modifier.uniforms() {
                if !uniforms.iter().any(|u| u.name == uniform.decl.name) {
                    uniforms.push(uniform.decl.clone());
                }
            }
            for sampler in modifier.samplers() {
                if !samplers.iter().any(|s| s.name == sampler.name) {
                    samplers.push(sampler.clone());
                }
            }
            if let Some(body) = bodies.get_mut(modifier.entry().template_key()) {
                if !body.is_empty() {
                    body.push('\n');
                }
                let _ = write!(body, "// modifier {}\n{}", modifier.name(), modifier.body());
            }
        }

        let binding_code = Self::binding_code(&uniforms, &samplers);
        let ctx = ShaderContext {
            defines: defines.to_map(),
            binding_code: &binding_code,
            modifiers: bodies,
            loc: Value::from_object(LocationAllocator::new()),
        };

        let template = env.get_template(program.template)?;
        let source = template.render(&ctx)?;

        Ok(ShaderSource {
            name: program.name.clone(),
            wgsl: format!("// === Generated program {} ===\n{source}", program.name),
            uniforms,
            samplers,
            vertex_layout: program.vertex_layout,
            uses_lighting: program.uses_lighting,
            color_outputs: program.color_outputs,
        })
    }

    /// WGSL declarations for the uniform struct and the sampler units.
    #[must_use]
    pub fn binding_code(uniforms: &[UniformDecl], samplers: &[SamplerDecl]) -> String {
        let mut code = String::from("struct Uniforms {\n");
        if uniforms.is_empty() {
            code.push_str("    _unused: vec4<f32>,\n");
        }
        for uniform in uniforms {
            let _ = writeln!(code, "    {}: {},", uniform.name, uniform.ty.wgsl());
        }
        code.push_str("};\n@group(0) @binding(0) var<uniform> u: Uniforms;\n");

        for (unit, sampler) in samplers.iter().enumerate() {
            let _ = writeln!(
                code,
                "@group(1) @binding({}) var {}: {};\n@group(1) @binding({}) var {}_sampler: {};",
                unit * 2,
                sampler.name,
                sampler.kind.wgsl_texture_type(),
                unit * 2 + 1,
                sampler.name,
                sampler.kind.wgsl_sampler_type(),
            );
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::{TextureKind, UniformType};
    use crate::renderer::pipeline::shader_manager::build_env;

    #[test]
    fn test_binding_code_layout() {
        let code = ShaderGenerator::binding_code(
            &[UniformDecl::new("exposure", UniformType::Float)],
            &[
                SamplerDecl::new("source", TextureKind::Texture2D),
                SamplerDecl::new("shadow_map", TextureKind::DepthArray),
            ],
        );
        assert!(code.contains("exposure: f32,"));
        assert!(code.contains("@group(1) @binding(0) var source: texture_2d<f32>;"));
        assert!(code.contains("@group(1) @binding(3) var shadow_map_sampler: sampler_comparison;"));
    }

    #[test]
    fn test_modifier_bodies_and_uniforms_are_merged() {
        let env = build_env().unwrap();
        let modifier = Rc::new(
            ShaderModifier::new("tint", ShaderEntryPoint::Image, "color = color * u.tint;")
                .with_unbound_uniform("tint", UniformType::Vec4),
        );
        let program = ProgramTemplate::image("blit", "blit_tint")
            .with_samplers([SamplerDecl::new("source", TextureKind::Texture2D)])
            .with_modifiers([modifier]);

        let source = ShaderGenerator::generate(&env, &program).unwrap();
        assert!(source.wgsl.contains("color = color * u.tint;"));
        assert!(source.uniforms.iter().any(|u| u.name == "tint"));
        assert!(source.wgsl.contains("@fragment"));
    }
}
