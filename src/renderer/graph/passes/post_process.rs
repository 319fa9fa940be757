//! Post-Process Effect Chain
//!
//! Applies the user-selected [`PostProcessEffect`]s to the tone-mapped image
//! in the order they were enabled. Each effect is one draw of the
//! `post_effect` template with its `EFFECT` define; consecutive effects
//! ping-pong between two same-sized targets owned by the choreographer.

use std::rc::Rc;

use glam::Vec2;
use log::{debug, warn};

use crate::errors::Result;
use crate::renderer::core::{
    Driver, RenderTarget, RenderTargetSelection, SamplerDecl, TextureKind, UniformDecl,
    UniformType, UniformValue,
};
use crate::renderer::graph::image_post::ImagePostProcess;
use crate::renderer::pipeline::shader_gen::ProgramTemplate;
use crate::resources::post_process::PostProcessEffect;
use crate::resources::shader_defines::ShaderDefines;

#[derive(Debug, Default, Clone)]
pub struct PostProcessEffectFactory {
    effects: Vec<PostProcessEffect>,
}

impl PostProcessEffectFactory {
    #[must_use]
    pub fn new(effects: &[PostProcessEffect]) -> Self {
        let mut factory = Self::default();
        for effect in effects {
            factory.enable(*effect);
        }
        factory
    }

    /// Appends `effect` to the chain. Returns `false` if it was already
    /// enabled.
    pub fn enable(&mut self, effect: PostProcessEffect) -> bool {
        if self.effects.contains(&effect) {
            return false;
        }
        debug!("Enabling post-process effect '{effect}'");
        self.effects.push(effect);
        true
    }

    pub fn disable(&mut self, effect: PostProcessEffect) -> bool {
        let before = self.effects.len();
        self.effects.retain(|e| *e != effect);
        before != self.effects.len()
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    #[must_use]
    pub fn effects(&self) -> &[PostProcessEffect] {
        &self.effects
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    fn program(driver: &mut dyn Driver, effect: PostProcessEffect) -> Result<ImagePostProcess> {
        let mut defines = ShaderDefines::new();
        defines.set("EFFECT", effect.define_value());
        let program = driver.shader_factory().image_program(
            ProgramTemplate::image("post_effect", format!("post_effect_{}", effect.name()))
                .with_defines(defines)
                .with_uniforms([UniformDecl::new("texel_size", UniformType::Vec2)])
                .with_samplers([SamplerDecl::new("source", TextureKind::Texture2D)]),
        )?;
        Ok(driver.new_image_post_process(program))
    }

    /// Runs every enabled effect starting from `input`, alternating between
    /// `ping` and `pong`. Returns the target holding the final image, which
    /// is `input` itself when the chain is empty or no effect could draw.
    pub fn handle_post_processing(
        &self,
        input: &Rc<RenderTarget>,
        ping: &Rc<RenderTarget>,
        pong: &Rc<RenderTarget>,
        driver: &mut dyn Driver,
    ) -> Result<Rc<RenderTarget>> {
        let mut current = input.clone();
        for effect in &self.effects {
            let dst = if Rc::ptr_eq(&current, ping) { pong } else { ping };
            let Some(source) = current.texture(0) else {
                warn!("Post-process input '{}' has no color texture", current.label());
                break;
            };

            let post = Self::program(driver, *effect)?;
            if !post.bind(driver, dst, RenderTargetSelection::default()) {
                warn!("Post-process effect '{effect}' unavailable, skipped");
                continue;
            }
            let texel = Vec2::new(1.0 / dst.width() as f32, 1.0 / dst.height() as f32);
            post.set_uniform(driver, "texel_size", UniformValue::Vec2(texel));
            post.draw_textures(driver, &[source]);
            current = dst.clone();
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_preserves_order_and_deduplicates() {
        let mut factory = PostProcessEffectFactory::default();
        assert!(factory.enable(PostProcessEffect::Sepia));
        assert!(factory.enable(PostProcessEffect::Toon));
        assert!(!factory.enable(PostProcessEffect::Sepia));
        assert_eq!(factory.effects(), &[PostProcessEffect::Sepia, PostProcessEffect::Toon]);

        assert!(factory.disable(PostProcessEffect::Sepia));
        assert!(!factory.disable(PostProcessEffect::Sepia));
        assert_eq!(factory.effects(), &[PostProcessEffect::Toon]);

        factory.clear();
        assert!(factory.is_empty());
    }
}
