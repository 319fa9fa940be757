//! Tone Mapping Pass
//!
//! Resolves the HDR scene color (`TM_Input`) into the LDR `RT_Output` target.
//!
//! The operator, the optional per-pixel mask and software gamma are compile-time
//! choices, so each combination is a distinct cached program. Exposure and
//! white point are plain uniforms and may change every frame without a
//! rebuild.

use std::rc::Rc;

use log::warn;

use crate::errors::{MirageError, Result};
use crate::renderer::core::{
    Driver, RenderTargetSelection, SamplerDecl, TextureHandle, TextureKind, UniformDecl,
    UniformType, UniformValue,
};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::RenderPass;
use crate::renderer::pipeline::modifier::ShaderModifier;
use crate::renderer::pipeline::program::ShaderProgram;
use crate::renderer::pipeline::shader_gen::ProgramTemplate;
use crate::resources::shader_defines::ShaderDefines;
use crate::resources::tone_mapping::ToneMappingSettings;
use crate::scene::Scene;

const INPUTS: &[Channel] = &[Channel::ToneMappingInput, Channel::ToneMappingMask, Channel::Output];

#[derive(Debug)]
pub struct ToneMappingRenderPass {
    settings: ToneMappingSettings,
    modifiers: Vec<Rc<ShaderModifier>>,
}

impl ToneMappingRenderPass {
    #[must_use]
    pub fn new(settings: ToneMappingSettings) -> Self {
        Self {
            settings,
            modifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ToneMappingSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ToneMappingSettings) {
        self.settings = settings;
    }

    /// Image modifiers applied after the curve.
    pub fn set_modifiers(&mut self, modifiers: Vec<Rc<ShaderModifier>>) {
        self.modifiers = modifiers;
    }

    /// Defines for the current settings. `masked` is true when a mask texture
    /// is present this frame.
    #[must_use]
    pub fn defines(&self, masked: bool, srgb_framebuffer: bool) -> ShaderDefines {
        let mut defines = ShaderDefines::new();
        self.settings.method.apply_to_defines(&mut defines);
        defines.enable_if("USE_MASK", masked);
        defines.enable_if(
            "GAMMA_CORRECT",
            self.settings.needs_software_gamma(srgb_framebuffer),
        );
        defines
    }

    fn program(&self, driver: &mut dyn Driver, masked: bool) -> Result<Rc<ShaderProgram>> {
        let srgb = driver.capabilities().srgb_framebuffer;
        let mut samplers = vec![SamplerDecl::new("source", TextureKind::Texture2D)];
        if masked {
            samplers.push(SamplerDecl::new("tone_mapping_mask", TextureKind::Texture2D));
        }
        driver.shader_factory().image_program(
            ProgramTemplate::image("tone_mapping", "tone_mapping")
                .with_defines(self.defines(masked, srgb))
                .with_uniforms([
                    UniformDecl::new("exposure", UniformType::Float),
                    UniformDecl::new("white_point", UniformType::Float),
                ])
                .with_samplers(samplers)
                .with_modifiers(self.modifiers.iter().cloned()),
        )
    }
}

impl RenderPass for ToneMappingRenderPass {
    fn name(&self) -> &'static str {
        "tone_mapping"
    }

    fn inputs(&self) -> &'static [Channel] {
        INPUTS
    }

    fn render(
        &mut self,
        _scene: &dyn Scene,
        _outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        _ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let source = match self.input(io, Channel::ToneMappingInput)?.texture_handle() {
            Some(handle) => handle,
            None => driver.blank_texture(TextureKind::Texture2D),
        };
        let output = self
            .input(io, Channel::Output)?
            .target()
            .cloned()
            .ok_or_else(|| MirageError::InvariantViolation("tone mapping output must be a render target".to_string()))?;

        let mask: Option<TextureHandle> = if self.settings.masking {
            io.get(Channel::ToneMappingMask).and_then(|r| r.texture_handle())
        } else {
            None
        };

        let program = self.program(driver, mask.is_some())?;
        let post = driver.new_image_post_process(program);
        if post.bind(driver, &output, RenderTargetSelection::default()) {
            post.set_uniform(driver, "exposure", UniformValue::Float(self.settings.exposure));
            post.set_uniform(driver, "white_point", UniformValue::Float(self.settings.white_point));
            match mask {
                Some(mask) => post.draw_textures(driver, &[source, mask]),
                None => post.draw_textures(driver, &[source]),
            }
        } else {
            warn!("Tone mapping program unavailable, frame left unresolved");
        }

        io.set_target(Channel::Output, output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tone_mapping::ToneMappingMethod;

    #[test]
    fn test_defines_follow_settings() {
        let pass = ToneMappingRenderPass::new(ToneMappingSettings {
            method: ToneMappingMethod::Reinhard,
            ..Default::default()
        });

        let defines = pass.defines(false, true);
        assert_eq!(defines.get("TONE_MAPPING_METHOD"), Some("REINHARD".to_string()));
        assert!(!defines.contains("USE_MASK"));
        assert!(!defines.contains("GAMMA_CORRECT"), "sRGB framebuffer encodes gamma in hardware");

        let defines = pass.defines(true, false);
        assert!(defines.contains("USE_MASK"));
        assert!(defines.contains("GAMMA_CORRECT"));
    }
}
