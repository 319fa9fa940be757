//! Shader Pipeline
//!
//! From material to bound program:
//! - [`capabilities`]: capability keys derived from materials and lights
//! - [`modifier`]: WGSL snippets injected at fixed entry points
//! - [`shader_manager`] / [`shader_gen`]: embedded templates and code generation
//! - [`factory`]: the program cache, owned by the driver
//! - [`program`]: lazily hydrated programs
//! - [`texture_ref`]: where a sampler's texture comes from
//! - [`binding`] / [`substrate`]: per-material bindings and `render_material`
//! - [`lighting`]: the lighting uniform block cache

pub mod binding;
pub mod capabilities;
pub mod factory;
pub mod lighting;
pub mod modifier;
pub mod program;
pub mod shader_gen;
pub mod shader_manager;
pub mod substrate;
pub mod texture_ref;

pub use binding::{GeometryUniforms, MaterialShaderBinding, render_material, resolve_program};
pub use capabilities::{
    DiffuseTextureKind, LightingCapabilities, LightingModel, MaterialCapabilities, StereoMode,
    derive_lighting_capabilities, derive_material_capabilities,
};
pub use factory::ShaderFactory;
pub use lighting::LightingUboCache;
pub use modifier::{BuiltinModifier, ModifierRegistry, ShaderEntryPoint, ShaderModifier};
pub use program::ShaderProgram;
pub use shader_gen::ProgramTemplate;
pub use substrate::MaterialSubstrate;
pub use texture_ref::{GlobalTexture, TextureReference};
