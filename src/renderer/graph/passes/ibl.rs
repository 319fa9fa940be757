//! IBL Convolution Passes
//!
//! The four image passes of the image-based lighting chain. Each writes a
//! target the IBL preprocess allocates and publishes on [`Channel::Output`]
//! before running the pass:
//!
//! | Pass                                | Source        | Writes                       |
//! |-------------------------------------|---------------|------------------------------|
//! | [`EquirectangularToCubeRenderPass`] | `EC_Input` 2D | 6 faces of the environment   |
//! | [`IrradianceRenderPass`]            | `IR_Input`    | 6 faces of the irradiance map|
//! | [`PrefilterRenderPass`]             | `PF_Input`    | 6 faces × every mip          |
//! | [`BrdfRenderPass`]                  | n/a           | the 2D BRDF LUT              |

use std::rc::Rc;

use log::warn;

use crate::errors::{MirageError, Result};
use crate::renderer::core::{
    Driver, RenderTarget, RenderTargetSelection, SamplerDecl, TextureHandle, TextureKind,
    UniformDecl, UniformType, UniformValue,
};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::image_post::ImagePostProcess;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::RenderPass;
use crate::renderer::pipeline::shader_gen::ProgramTemplate;
use crate::scene::Scene;

pub const CUBE_FACES: u32 = 6;

fn output_target(pass: &dyn RenderPass, io: &RenderPassIo) -> Result<Rc<RenderTarget>> {
    pass.input(io, Channel::Output)?
        .target()
        .cloned()
        .ok_or_else(|| MirageError::InvariantViolation(format!("'{}' output must be a render target", pass.name())))
}

/// Source texture of a convolution, or a placeholder of `kind` while the
/// source has no GPU substrate.
fn source_texture(
    pass: &dyn RenderPass,
    io: &RenderPassIo,
    channel: Channel,
    kind: TextureKind,
    driver: &mut dyn Driver,
) -> Result<TextureHandle> {
    Ok(match pass.input(io, channel)?.texture_handle() {
        Some(handle) => handle,
        None => driver.blank_texture(kind),
    })
}

fn cube_program(
    driver: &mut dyn Driver,
    template: &'static str,
    source_kind: TextureKind,
    extra: &[UniformDecl],
) -> Result<ImagePostProcess> {
    let program = driver.shader_factory().image_program(
        ProgramTemplate::image(template, template)
            .with_uniforms([UniformDecl::new("face", UniformType::Int)])
            .with_uniforms(extra.iter().cloned())
            .with_samplers([SamplerDecl::new("source", source_kind)]),
    )?;
    Ok(driver.new_image_post_process(program))
}

/// Draws every face of `mip`, calling `per_face` after the program is bound.
fn render_faces(
    post: &ImagePostProcess,
    target: &RenderTarget,
    mip: u32,
    source: TextureHandle,
    driver: &mut dyn Driver,
    per_face: &dyn Fn(&ImagePostProcess, &mut dyn Driver),
) -> bool {
    for face in 0..CUBE_FACES {
        if !post.bind(driver, target, RenderTargetSelection::face_mip(face, mip)) {
            warn!("IBL program '{}' unavailable", post.program().name());
            return false;
        }
        post.set_uniform(driver, "face", UniformValue::Int(face as i32));
        per_face(post, driver);
        post.draw_textures(driver, &[source]);
    }
    true
}

// ============================================================================
// Equirectangular → cube
// ============================================================================

#[derive(Debug, Default)]
pub struct EquirectangularToCubeRenderPass;

impl RenderPass for EquirectangularToCubeRenderPass {
    fn name(&self) -> &'static str {
        "equirect_to_cube"
    }

    fn inputs(&self) -> &'static [Channel] {
        &[Channel::EquirectInput, Channel::Output]
    }

    fn render(
        &mut self,
        _scene: &dyn Scene,
        _outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        _ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let target = output_target(self, io)?;
        let source = source_texture(self, io, Channel::EquirectInput, TextureKind::Texture2D, driver)?;
        let post = cube_program(driver, "equirect_to_cube", TextureKind::Texture2D, &[])?;
        render_faces(&post, &target, 0, source, driver, &|_, _| {});
        io.set_target(Channel::Output, target);
        Ok(())
    }
}

// ============================================================================
// Diffuse irradiance
// ============================================================================

#[derive(Debug, Default)]
pub struct IrradianceRenderPass;

impl RenderPass for IrradianceRenderPass {
    fn name(&self) -> &'static str {
        "irradiance"
    }

    fn inputs(&self) -> &'static [Channel] {
        &[Channel::IrradianceInput, Channel::Output]
    }

    fn render(
        &mut self,
        _scene: &dyn Scene,
        _outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        _ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let target = output_target(self, io)?;
        let source = source_texture(self, io, Channel::IrradianceInput, TextureKind::Cube, driver)?;
        let post = cube_program(driver, "irradiance", TextureKind::Cube, &[])?;
        render_faces(&post, &target, 0, source, driver, &|_, _| {});
        io.set_target(Channel::Output, target);
        Ok(())
    }
}

// ============================================================================
// Specular prefilter
// ============================================================================

#[derive(Debug)]
pub struct PrefilterRenderPass {
    mip_levels: u32,
}

impl PrefilterRenderPass {
    #[must_use]
    pub fn new(mip_levels: u32) -> Self {
        Self {
            mip_levels: mip_levels.max(1),
        }
    }

    /// Roughness convolved into `mip`, 0 at mip 0 and 1 at the last mip.
    #[must_use]
    pub fn roughness(&self, mip: u32) -> f32 {
        if self.mip_levels <= 1 {
            0.0
        } else {
            mip as f32 / (self.mip_levels - 1) as f32
        }
    }
}

impl RenderPass for PrefilterRenderPass {
    fn name(&self) -> &'static str {
        "prefilter"
    }

    fn inputs(&self) -> &'static [Channel] {
        &[Channel::PrefilterInput, Channel::Output]
    }

    fn render(
        &mut self,
        _scene: &dyn Scene,
        _outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        _ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let target = output_target(self, io)?;
        let source = source_texture(self, io, Channel::PrefilterInput, TextureKind::Cube, driver)?;
        let post = cube_program(
            driver,
            "prefilter",
            TextureKind::Cube,
            &[UniformDecl::new("roughness", UniformType::Float)],
        )?;

        let mips = self.mip_levels.min(target.desc().mip_levels);
        for mip in 0..mips {
            let roughness = self.roughness(mip);
            let ok = render_faces(&post, &target, mip, source, driver, &|post, driver| {
                post.set_uniform(driver, "roughness", UniformValue::Float(roughness));
            });
            if !ok {
                break;
            }
        }
        io.set_target(Channel::Output, target);
        Ok(())
    }
}

// ============================================================================
// BRDF integration LUT
// ============================================================================

#[derive(Debug, Default)]
pub struct BrdfRenderPass;

impl RenderPass for BrdfRenderPass {
    fn name(&self) -> &'static str {
        "brdf_lut"
    }

    fn inputs(&self) -> &'static [Channel] {
        &[Channel::Output]
    }

    fn render(
        &mut self,
        _scene: &dyn Scene,
        _outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        _ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let target = output_target(self, io)?;
        let program = driver
            .shader_factory()
            .image_program(ProgramTemplate::image("brdf_lut", "brdf_lut"))?;
        let post = driver.new_image_post_process(program);
        if !post.blit(driver, &[], &target) {
            warn!("BRDF LUT program unavailable");
        }
        io.set_target(Channel::Output, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefilter_roughness_spans_mips() {
        let pass = PrefilterRenderPass::new(5);
        assert_eq!(pass.roughness(0), 0.0);
        assert_eq!(pass.roughness(2), 0.5);
        assert_eq!(pass.roughness(4), 1.0);
        assert_eq!(PrefilterRenderPass::new(1).roughness(0), 0.0);
    }
}
