//! Portal Tree Pass
//!
//! Renders a tree of nested portals into one target using the stencil
//! buffer as a recursion-level mask. Depth first, siblings front to back:
//!
//! 1. **Mask**: the child's silhouette increments the stencil where it equals
//!    the parent level, so a child can never open outside its parent.
//! 2. **Recurse**: the child's own children, background and content draw
//!    where the stencil is at least the child level.
//! 3. **Erase**: the silhouette decrements the child level back to the parent
//!    level before the next sibling is masked.
//! 4. **Frame**: the visible doorway geometry.
//! 5. **Seal**: the silhouette writes depth only, so parent content behind
//!    the opening is occluded.
//!
//! After its children, a portal draws its background and then its content
//! sorted by [`SortKey`]. Every increment is matched by an erase, so the
//! stencil is back to zero when the pass finishes.

use std::rc::Rc;

use log::warn;

use crate::errors::{MirageError, Result};
use crate::renderer::core::{
    ClearFlags, CullMode, Driver, RenderTargetSelection, SamplerDecl, StencilFunc, StencilOp,
    TextureKind, UniformDecl, UniformType, UniformValue, VertexLayout,
};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::frame::SortKey;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::RenderPass;
use crate::renderer::pipeline::binding::render_material;
use crate::renderer::pipeline::program::ShaderProgram;
use crate::renderer::pipeline::shader_gen::ProgramTemplate;
use crate::resources::material::MaterialTextureSlot;
use crate::scene::light::Light;
use crate::scene::node::Renderable;
use crate::scene::portal::Portal;
use crate::scene::Scene;

const INPUTS: &[Channel] = &[Channel::Output];

/// Silhouette fragments below this alpha leave the stencil untouched.
const SILHOUETTE_ALPHA_CUTOFF: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SilhouetteStep {
    Mask,
    Erase,
    Seal,
}

pub struct PortalTreeRenderPass {
    clear_color: [f32; 4],
}

impl PortalTreeRenderPass {
    #[must_use]
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self { clear_color }
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn silhouette_program(driver: &mut dyn Driver) -> Result<Rc<ShaderProgram>> {
        let mut template = ProgramTemplate::image("portal_silhouette", "portal_silhouette")
            .with_uniforms([
                UniformDecl::new("view_projection", UniformType::Mat4),
                UniformDecl::new("model", UniformType::Mat4),
                UniformDecl::new("alpha_cutoff", UniformType::Float),
            ])
            .with_samplers([SamplerDecl::new("diffuse_texture", TextureKind::Texture2D)]);
        template.vertex_layout = VertexLayout::Mesh;
        driver.shader_factory().image_program(template)
    }

    /// Draws a silhouette for one stencil step at parent `level`. Returns
    /// `false` when the silhouette program is unusable.
    fn draw_silhouette(
        silhouette: &Renderable,
        step: SilhouetteStep,
        level: u8,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<bool> {
        let program = Self::silhouette_program(driver)?;
        if !program.bind(driver) {
            return Ok(false);
        }

        driver.set_cull_mode(CullMode::None);
        driver.set_stencil_test_enabled(true);
        driver.set_stencil_write_mask(0xFF);
        driver.set_color_writing_enabled(false);
        match step {
            SilhouetteStep::Mask => {
                driver.set_stencil_func(StencilFunc::Equal, level, 0xFF);
                driver.set_stencil_ops(StencilOp::Keep, StencilOp::Keep, StencilOp::IncrementClamp);
                driver.set_depth_reading_enabled(true);
                driver.set_depth_writing_enabled(false);
            }
            SilhouetteStep::Erase => {
                driver.set_stencil_func(StencilFunc::Equal, level.saturating_add(1), 0xFF);
                driver.set_stencil_ops(StencilOp::Keep, StencilOp::Keep, StencilOp::DecrementClamp);
                driver.set_depth_reading_enabled(false);
                driver.set_depth_writing_enabled(false);
            }
            SilhouetteStep::Seal => {
                driver.set_stencil_func(StencilFunc::LessEqual, level, 0xFF);
                driver.set_stencil_ops(StencilOp::Keep, StencilOp::Keep, StencilOp::Keep);
                driver.set_depth_reading_enabled(true);
                driver.set_depth_writing_enabled(true);
            }
        }

        program.set_uniform(
            driver,
            "view_projection",
            UniformValue::Mat4(ctx.camera().view_projection()),
        );
        program.set_uniform(driver, "model", UniformValue::Mat4(silhouette.transform));
        program.set_uniform(driver, "alpha_cutoff", UniformValue::Float(SILHOUETTE_ALPHA_CUTOFF));

        let mask = silhouette
            .material
            .texture(MaterialTextureSlot::Diffuse)
            .and_then(|t| t.plane(0));
        let mask = match mask {
            Some(handle) => handle,
            None => driver.blank_texture(TextureKind::Texture2D),
        };
        driver.bind_texture(0, mask);

        let call = silhouette.draw_call(driver);
        driver.draw(&call);
        Ok(true)
    }

    /// Draws a surface where the stencil is at least `level`.
    fn draw_surface(
        renderable: &Renderable,
        lights: &[Rc<Light>],
        level: u8,
        depth_write: Option<bool>,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        if !render_material(
            &renderable.material,
            lights,
            ctx,
            &renderable.geometry_uniforms(),
            driver,
        )? {
            return Ok(());
        }
        driver.set_color_writing_enabled(true);
        driver.set_stencil_test_enabled(true);
        driver.set_stencil_func(StencilFunc::LessEqual, level, 0xFF);
        driver.set_stencil_ops(StencilOp::Keep, StencilOp::Keep, StencilOp::Keep);
        if let Some(enabled) = depth_write {
            driver.set_depth_writing_enabled(enabled);
        }
        let call = renderable.draw_call(driver);
        driver.draw(&call);
        Ok(())
    }

    fn draw_content(
        portal: &Portal,
        level: u8,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let mut keyed = Vec::with_capacity(portal.content.len());
        for renderable in &portal.content {
            let key = SortKey::for_renderable(
                renderable,
                &portal.lights,
                u32::from(level),
                portal.id() as u32,
                ctx,
                driver,
            )?;
            keyed.push((key, renderable));
        }
        keyed.sort_by_key(|(key, _)| *key);

        for (_, renderable) in keyed {
            Self::draw_surface(renderable, &portal.lights, level, None, ctx, driver)?;
        }
        Ok(())
    }

    fn render_portal(
        portal: &Portal,
        level: u8,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        for child in portal.children_front_to_back() {
            let Some(silhouette) = &child.silhouette else {
                warn!("Portal '{}' has no silhouette, skipping", child.name);
                continue;
            };
            if level == u8::MAX {
                warn!("Portal '{}' exceeds the stencil depth, skipping", child.name);
                continue;
            }

            if !Self::draw_silhouette(silhouette, SilhouetteStep::Mask, level, ctx, driver)? {
                warn!("Silhouette program unavailable, portal '{}' not rendered", child.name);
                continue;
            }
            Self::render_portal(child, level + 1, ctx, driver)?;
            Self::draw_silhouette(silhouette, SilhouetteStep::Erase, level, ctx, driver)?;

            if let Some(frame) = &child.frame {
                Self::draw_surface(frame, &portal.lights, level, None, ctx, driver)?;
            }
            Self::draw_silhouette(silhouette, SilhouetteStep::Seal, level, ctx, driver)?;
        }

        if let Some(background) = &portal.background {
            Self::draw_surface(background, &portal.lights, level, Some(false), ctx, driver)?;
        }
        Self::draw_content(portal, level, ctx, driver)
    }
}

impl RenderPass for PortalTreeRenderPass {
    fn name(&self) -> &'static str {
        "portal_tree"
    }

    fn inputs(&self) -> &'static [Channel] {
        INPUTS
    }

    fn render(
        &mut self,
        scene: &dyn Scene,
        outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let target = self.input(io, Channel::Output)?.target().cloned().ok_or_else(|| {
            MirageError::InvariantViolation("portal tree output must be a render target".to_string())
        })?;

        driver.bind_render_target(&target, RenderTargetSelection::default());
        driver.reset_state();
        driver.clear(
            ClearFlags::COLOR | ClearFlags::DEPTH | ClearFlags::STENCIL,
            self.clear_color,
        );

        // Backgrounds of both scenes share the frame during a transition.
        if let Some(outgoing) = outgoing {
            let root = outgoing.portal_tree().root();
            if let Some(background) = &root.background {
                Self::draw_surface(background, &root.lights, 0, Some(false), ctx, driver)?;
            }
        }

        Self::render_portal(scene.portal_tree().root(), 0, ctx, driver)?;

        if let Some(outgoing) = outgoing {
            Self::draw_content(outgoing.portal_tree().root(), 0, ctx, driver)?;
        }

        driver.set_stencil_test_enabled(false);
        io.set_target(Channel::Output, target);
        Ok(())
    }
}
