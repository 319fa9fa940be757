//! Material Shader Bindings
//!
//! A [`MaterialShaderBinding`] connects one program to one material under one
//! lighting key. Construction resolves every uniform the program declares to
//! its slot and every sampler to a [`TextureReference`]; binding is then a
//! matter of walking those tables. Uniforms are split into three phases so
//! callers can skip the ones that did not change between draws:
//!
//! | Phase    | Contents                                             |
//! |----------|------------------------------------------------------|
//! | View     | view-projection, camera position, eye-dependent data |
//! | Material | colors and scalar properties of the material         |
//! | Geometry | model and normal matrices, per-draw modifier values  |

use std::rc::Rc;

use glam::Mat4;
use log::warn;

use super::capabilities::{LightingCapabilities, derive_lighting_capabilities};
use super::modifier::{BindingPhase, UniformBinder};
use super::program::ShaderProgram;
use super::texture_ref::{GlobalTexture, TextureReference};
use crate::errors::Result;
use crate::renderer::core::{Driver, UniformSlot, UniformValue};
use crate::renderer::graph::context::RenderContext;
use crate::resources::material::Material;
use crate::scene::light::Light;

/// Per-draw transform data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryUniforms {
    pub model: Mat4,
}

impl GeometryUniforms {
    #[must_use]
    pub fn new(model: Mat4) -> Self {
        Self { model }
    }

    /// Inverse transpose of the model matrix.
    #[must_use]
    pub fn normal_matrix(&self) -> Mat4 {
        self.model.inverse().transpose()
    }
}

impl Default for GeometryUniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

/// Everything a modifier uniform binder may read.
pub struct UniformBindInput<'a> {
    pub material: &'a Material,
    pub ctx: &'a RenderContext,
    pub geometry: &'a GeometryUniforms,
}

struct BoundUniform {
    slot: UniformSlot,
    phase: BindingPhase,
    binder: UniformBinder,
}

#[derive(Debug, Default, Clone, Copy)]
struct BuiltinSlots {
    view_projection: Option<UniformSlot>,
    camera_position: Option<UniformSlot>,
    model: Option<UniformSlot>,
    normal_matrix: Option<UniformSlot>,
    diffuse_color: Option<UniformSlot>,
    shininess: Option<UniformSlot>,
    roughness: Option<UniformSlot>,
    metalness: Option<UniformSlot>,
    ao: Option<UniformSlot>,
    alpha: Option<UniformSlot>,
    tone_map_mask: Option<UniformSlot>,
}

/// Program-to-material binding, cached per lighting key on the material's
/// [`MaterialSubstrate`](super::substrate::MaterialSubstrate).
pub struct MaterialShaderBinding {
    program: Rc<ShaderProgram>,
    lighting: LightingCapabilities,
    slots: BuiltinSlots,
    modifier_uniforms: Vec<BoundUniform>,
    textures: Vec<(u32, TextureReference)>,
    receives_shadows: bool,
}

impl std::fmt::Debug for MaterialShaderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialShaderBinding")
            .field("program", &self.program.name())
            .field("lighting", &self.lighting)
            .field("modifier_uniforms", &self.modifier_uniforms.len())
            .field("textures", &self.textures)
            .finish_non_exhaustive()
    }
}

impl MaterialShaderBinding {
    #[must_use]
    pub fn new(program: Rc<ShaderProgram>, lighting: LightingCapabilities, material: &Material) -> Self {
        let slot = |name: &str| program.uniform_slot(name);
        let slots = BuiltinSlots {
            view_projection: slot("view_projection"),
            camera_position: slot("camera_position"),
            model: slot("model"),
            normal_matrix: slot("normal_matrix"),
            diffuse_color: slot("diffuse_color"),
            shininess: slot("shininess"),
            roughness: slot("roughness"),
            metalness: slot("metalness"),
            ao: slot("ao"),
            alpha: slot("alpha"),
            tone_map_mask: slot("tone_map_mask"),
        };

        let modifier_uniforms = program
            .modifiers()
            .iter()
            .flat_map(|m| m.uniforms())
            .filter_map(|uniform| {
                let binder = uniform.binder.clone()?;
                let slot = program.uniform_slot(&uniform.decl.name)?;
                Some(BoundUniform {
                    slot,
                    phase: uniform.phase,
                    binder,
                })
            })
            .collect();

        let mut binding = Self {
            program,
            lighting,
            slots,
            modifier_uniforms,
            textures: Vec::new(),
            receives_shadows: material.receives_shadows(),
        };
        binding.load_textures(material);
        binding
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> &Rc<ShaderProgram> {
        &self.program
    }

    #[inline]
    #[must_use]
    pub fn lighting(&self) -> &LightingCapabilities {
        &self.lighting
    }

    /// Sampler units and their sources, in unit order.
    #[must_use]
    pub fn textures(&self) -> &[(u32, TextureReference)] {
        &self.textures
    }

    /// Rebuilds the texture references from the material's current
    /// assignments. Calling it again without changes yields the same table.
    pub fn load_textures(&mut self, material: &Material) {
        self.receives_shadows = material.receives_shadows();
        self.textures = self
            .program
            .samplers()
            .iter()
            .enumerate()
            .filter_map(|(unit, sampler)| {
                TextureReference::for_sampler(&sampler.name, material).map(|r| (unit as u32, r))
            })
            .collect();
    }

    pub fn bind_view_uniforms(
        &self,
        driver: &mut dyn Driver,
        material: &Material,
        ctx: &RenderContext,
        geometry: &GeometryUniforms,
    ) {
        let camera = ctx.camera();
        set(driver, self.slots.view_projection, UniformValue::Mat4(camera.view_projection()));
        set(driver, self.slots.camera_position, UniformValue::Vec3(camera.position));
        self.bind_modifier_uniforms(driver, BindingPhase::View, material, ctx, geometry);
    }

    pub fn bind_material_uniforms(
        &self,
        driver: &mut dyn Driver,
        material: &Material,
        ctx: &RenderContext,
        geometry: &GeometryUniforms,
    ) {
        set(driver, self.slots.diffuse_color, UniformValue::Vec4(material.diffuse_color));
        set(driver, self.slots.shininess, UniformValue::Float(material.shininess));
        set(driver, self.slots.roughness, UniformValue::Float(material.roughness));
        set(driver, self.slots.metalness, UniformValue::Float(material.metalness));
        set(driver, self.slots.ao, UniformValue::Float(material.ambient_occlusion));
        set(driver, self.slots.alpha, UniformValue::Float(material.alpha));
        set(
            driver,
            self.slots.tone_map_mask,
            UniformValue::Float(if material.tone_mapped { 1.0 } else { 0.0 }),
        );
        self.bind_modifier_uniforms(driver, BindingPhase::Material, material, ctx, geometry);
    }

    pub fn bind_geometry_uniforms(
        &self,
        driver: &mut dyn Driver,
        material: &Material,
        ctx: &RenderContext,
        geometry: &GeometryUniforms,
    ) {
        set(driver, self.slots.model, UniformValue::Mat4(geometry.model));
        set(driver, self.slots.normal_matrix, UniformValue::Mat4(geometry.normal_matrix()));
        self.bind_modifier_uniforms(driver, BindingPhase::Geometry, material, ctx, geometry);
    }

    fn bind_modifier_uniforms(
        &self,
        driver: &mut dyn Driver,
        phase: BindingPhase,
        material: &Material,
        ctx: &RenderContext,
        geometry: &GeometryUniforms,
    ) {
        let input = UniformBindInput {
            material,
            ctx,
            geometry,
        };
        for uniform in self.modifier_uniforms.iter().filter(|u| u.phase == phase) {
            if let Some(value) = (uniform.binder)(&input) {
                driver.set_uniform(uniform.slot, value);
            }
        }
    }

    /// Binds every resolved sampler unit. Missing substrates are replaced by
    /// a blank texture of the expected kind. The shadow map is never bound
    /// for a material that does not receive shadows.
    pub fn bind_textures(&self, driver: &mut dyn Driver, ctx: &RenderContext) {
        for (unit, reference) in &self.textures {
            let skip_shadow = !self.receives_shadows
                && matches!(reference, TextureReference::Global(GlobalTexture::ShadowMap));
            let handle = if skip_shadow {
                None
            } else {
                reference.resolve(ctx)
            };
            let handle = match handle {
                Some(handle) => handle,
                None => driver.blank_texture(reference.kind()),
            };
            driver.bind_texture(*unit, handle);
        }
    }
}

#[inline]
fn set(driver: &mut dyn Driver, slot: Option<UniformSlot>, value: UniformValue) {
    if let Some(slot) = slot {
        driver.set_uniform(slot, value);
    }
}

/// The program that renders `material` under `lights` this frame, building
/// the binding if needed.
pub fn resolve_program(
    material: &Material,
    lights: &[Rc<Light>],
    ctx: &RenderContext,
    driver: &mut dyn Driver,
) -> Result<Rc<ShaderProgram>> {
    let lighting = derive_lighting_capabilities(lights, ctx);
    let mut substrate = material.substrate().borrow_mut();
    let substrate = substrate.get_or_insert_with(Default::default);
    Ok(substrate.binding(material, lighting, driver)?.program().clone())
}

/// Prepares the driver to draw with `material`: binds the program, the
/// lighting block, fixed-function state, the three uniform phases and the
/// textures.
///
/// Returns `Ok(false)` when the program is unusable; the caller skips the
/// draw.
pub fn render_material(
    material: &Material,
    lights: &[Rc<Light>],
    ctx: &RenderContext,
    geometry: &GeometryUniforms,
    driver: &mut dyn Driver,
) -> Result<bool> {
    let lighting = derive_lighting_capabilities(lights, ctx);
    let mut substrate = material.substrate().borrow_mut();
    let substrate = substrate.get_or_insert_with(Default::default);
    let binding = substrate.binding(material, lighting, driver)?;

    let program = binding.program();
    if !program.bind(driver) {
        warn!("Skipping draw: program '{}' is unavailable", program.name());
        return Ok(false);
    }

    if program.source().uses_lighting {
        let buffer = ctx
            .lighting_cache()
            .borrow_mut()
            .bind(lights, driver, ctx.frame());
        driver.bind_lighting_buffer(Some(buffer));
    } else {
        driver.bind_lighting_buffer(None);
    }

    driver.set_blending_mode(material.blend_mode);
    driver.set_cull_mode(material.cull_mode);
    driver.set_depth_writing_enabled(material.writes_to_depth);
    driver.set_depth_reading_enabled(material.reads_from_depth);

    binding.bind_view_uniforms(driver, material, ctx, geometry);
    binding.bind_material_uniforms(driver, material, ctx, geometry);
    binding.bind_geometry_uniforms(driver, material, ctx, geometry);
    binding.bind_textures(driver, ctx);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::HeadlessDriver;
    use crate::renderer::core::TextureKind;
    use crate::renderer::pipeline::capabilities::{LightingModel, derive_material_capabilities};
    use crate::resources::material::MaterialTextureSlot;
    use crate::resources::texture::{Texture, TextureContent};

    #[test]
    fn test_normal_matrix_is_inverse_transpose() {
        let model = Mat4::from_scale(glam::Vec3::new(2.0, 1.0, 1.0));
        let geometry = GeometryUniforms::new(model);
        let expected = Mat4::from_scale(glam::Vec3::new(0.5, 1.0, 1.0));
        assert!(geometry.normal_matrix().abs_diff_eq(expected, 1e-6));
    }

    fn textured_blinn(name: &str) -> Material {
        let mut material = Material::new(LightingModel::Blinn);
        material.set_texture(
            MaterialTextureSlot::Diffuse,
            Some(Rc::new(Texture::new(format!("{name}_diffuse"), TextureKind::Texture2D, TextureContent::Image))),
        );
        material.set_texture(
            MaterialTextureSlot::Normal,
            Some(Rc::new(Texture::new(format!("{name}_normal"), TextureKind::Texture2D, TextureContent::Image))),
        );
        material.set_bloom_enabled(true);
        material
    }

    #[test]
    fn test_materials_with_equal_keys_share_one_program() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let ctx = RenderContext::new();
        let brick = textured_blinn("brick");
        let stone = textured_blinn("stone");
        assert_ne!(brick.id(), stone.id());
        assert_eq!(derive_material_capabilities(&brick), derive_material_capabilities(&stone));

        let a = resolve_program(&brick, &[], &ctx, &mut driver).unwrap();
        let b = resolve_program(&stone, &[], &ctx, &mut driver).unwrap();

        assert!(Rc::ptr_eq(&a, &b), "equal keys must reuse the cached program");
        assert_eq!(driver.shader_factory().program_count(), 1);

        let matte = Material::new(LightingModel::Lambert);
        let c = resolve_program(&matte, &[], &ctx, &mut driver).unwrap();
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(driver.shader_factory().program_count(), 2);
    }

    #[test]
    fn test_load_textures_is_idempotent() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let ctx = RenderContext::new();
        let mut material = Material::default();
        material.set_texture(
            MaterialTextureSlot::Diffuse,
            Some(Rc::new(Texture::new("d", TextureKind::Texture2D, TextureContent::Image))),
        );

        let program = resolve_program(&material, &[], &ctx, &mut driver).unwrap();
        let mut binding = MaterialShaderBinding::new(program, LightingCapabilities::default(), &material);
        let first: Vec<u32> = binding.textures().iter().map(|(unit, _)| *unit).collect();
        binding.load_textures(&material);
        binding.load_textures(&material);
        let again: Vec<u32> = binding.textures().iter().map(|(unit, _)| *unit).collect();

        assert_eq!(first, again);
        assert_eq!(first, vec![0]);
    }

    #[test]
    fn test_missing_substrate_binds_placeholder() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let display = driver.display();
        driver.bind_render_target(&display, Default::default());
        let ctx = RenderContext::new();
        let mut material = Material::default();
        material.set_texture(
            MaterialTextureSlot::Diffuse,
            Some(Rc::new(Texture::new("pending", TextureKind::Texture2D, TextureContent::Image))),
        );

        assert!(render_material(&material, &[], &ctx, &GeometryUniforms::default(), &mut driver).unwrap());
        driver.draw(&crate::renderer::core::DrawCall::fullscreen());

        let draw = driver.draws().last().unwrap();
        let bound = draw.textures[0].expect("unit 0 bound");
        assert!(driver.is_blank(bound));
    }
}
