//! Image Post Processes
//!
//! A fullscreen program drawn from one or more input textures into a target.
//! Used by every image pass: blur, bloom combine, tone mapping, effects,
//! IBL convolutions and the final blit.

use std::rc::Rc;

use crate::renderer::core::{
    BlendMode, CullMode, DrawCall, Driver, RenderTarget, RenderTargetSelection, TextureHandle,
    UniformValue,
};
use crate::renderer::pipeline::program::ShaderProgram;

#[derive(Debug, Clone)]
pub struct ImagePostProcess {
    program: Rc<ShaderProgram>,
}

impl ImagePostProcess {
    #[must_use]
    pub fn new(program: Rc<ShaderProgram>) -> Self {
        Self { program }
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> &Rc<ShaderProgram> {
        &self.program
    }

    /// Binds `output` and the fullscreen state. Returns `false` when the
    /// program is unusable; nothing should be drawn then.
    pub fn bind(
        &self,
        driver: &mut dyn Driver,
        output: &RenderTarget,
        selection: RenderTargetSelection,
    ) -> bool {
        driver.bind_render_target(output, selection);
        driver.set_depth_reading_enabled(false);
        driver.set_depth_writing_enabled(false);
        driver.set_blending_mode(BlendMode::None);
        driver.set_cull_mode(CullMode::None);
        driver.set_stencil_test_enabled(false);
        driver.set_color_writing_enabled(true);
        self.program.bind(driver)
    }

    /// Sets a uniform on the bound program by name.
    pub fn set_uniform(&self, driver: &mut dyn Driver, name: &str, value: UniformValue) {
        self.program.set_uniform(driver, name, value);
    }

    /// Binds `inputs` to units 0.. and draws the fullscreen triangle.
    pub fn draw_textures(&self, driver: &mut dyn Driver, inputs: &[TextureHandle]) {
        for (unit, texture) in inputs.iter().enumerate() {
            driver.bind_texture(unit as u32, *texture);
        }
        driver.draw(&DrawCall::fullscreen());
    }

    /// Bind and draw in one step, into mip 0 / slice 0 of `output`.
    pub fn blit(&self, driver: &mut dyn Driver, inputs: &[TextureHandle], output: &RenderTarget) -> bool {
        if !self.bind(driver, output, RenderTargetSelection::default()) {
            return false;
        }
        self.draw_textures(driver, inputs);
        true
    }
}
