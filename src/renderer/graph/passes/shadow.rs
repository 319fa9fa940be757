//! Shadow Map Pass
//!
//! Renders the depth of every shadow caster from one light into that light's
//! layer of the shared shadow array. The light's projection is computed by
//! the shadow preprocess before the pass runs.

use std::rc::Rc;

use log::warn;

use crate::errors::{MirageError, Result};
use crate::renderer::core::{
    ClearFlags, CullMode, Driver, RenderTargetSelection, UniformDecl, UniformType, UniformValue,
    VertexLayout,
};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::RenderPass;
use crate::renderer::pipeline::program::ShaderProgram;
use crate::renderer::pipeline::shader_gen::ProgramTemplate;
use crate::scene::Scene;
use crate::scene::light::Light;

const INPUTS: &[Channel] = &[Channel::ShadowTarget];

#[derive(Debug)]
pub struct ShadowMapRenderPass {
    light: Rc<Light>,
    layer: u32,
}

impl ShadowMapRenderPass {
    #[must_use]
    pub fn new(light: Rc<Light>, layer: u32) -> Self {
        Self { light, layer }
    }

    #[inline]
    #[must_use]
    pub fn light(&self) -> &Rc<Light> {
        &self.light
    }

    #[inline]
    #[must_use]
    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn set_layer(&mut self, layer: u32) {
        self.layer = layer;
    }

    fn depth_program(driver: &mut dyn Driver) -> Result<Rc<ShaderProgram>> {
        let mut template = ProgramTemplate::image("shadow_depth", "shadow_depth").with_uniforms([
            UniformDecl::new("light_view_projection", UniformType::Mat4),
            UniformDecl::new("model", UniformType::Mat4),
        ]);
        template.vertex_layout = VertexLayout::Mesh;
        template.color_outputs = 0;
        driver.shader_factory().image_program(template)
    }
}

impl RenderPass for ShadowMapRenderPass {
    fn name(&self) -> &'static str {
        "shadow_map"
    }

    fn inputs(&self) -> &'static [Channel] {
        INPUTS
    }

    fn render(
        &mut self,
        scene: &dyn Scene,
        _outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        _ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let target = self
            .input(io, Channel::ShadowTarget)?
            .target()
            .cloned()
            .ok_or_else(|| MirageError::InvariantViolation("shadow target must be a render target".to_string()))?;

        driver.bind_render_target(&target, RenderTargetSelection::slice(self.layer));
        driver.reset_state();
        driver.set_color_writing_enabled(false);
        driver.clear(ClearFlags::DEPTH, [0.0; 4]);
        driver.set_cull_mode(CullMode::Front);

        let program = Self::depth_program(driver)?;
        if program.bind(driver) {
            program.set_uniform(
                driver,
                "light_view_projection",
                UniformValue::Mat4(self.light.shadow_view_projection()),
            );
            for caster in scene.shadow_casters() {
                program.set_uniform(driver, "model", UniformValue::Mat4(caster.transform));
                let call = caster.draw_call(driver);
                driver.draw(&call);
            }
        } else {
            warn!("Shadow depth program unavailable, layer {} left empty", self.layer);
        }

        io.set_target(Channel::Output, target);
        Ok(())
    }
}
