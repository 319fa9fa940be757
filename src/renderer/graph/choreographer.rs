//! Choreographer
//!
//! Owns the ordered per-frame pipeline and every size-dependent render target
//! it needs:
//!
//! ```text
//!                  ┌────────── HDR ──────────────────────────────────────┐
//! portal tree ───► │ scene (MRT) ─► blur A/B ─► additive combine ─► tone │ ─► effects ─► blit ─► display
//!                  └─────────────────────────────────────────────────────┘
//! ```
//!
//! In LDR mode the portal pass writes the final color directly. Without
//! effects, blit mode or a render-to-texture callback, the last stage writes
//! the display; otherwise it writes the intermediate blit target, which is
//! then copied to the display.
//!
//! # Target lifetime
//!
//! Targets are created lazily on the first frame that needs them and kept
//! until the viewport size or a toggle affecting them changes. Each toggle
//! drops only the targets whose description it changes. Setting the same
//! viewport size again is a no-op.

use std::fmt;
use std::rc::Rc;

use log::{debug, warn};

use crate::errors::Result;
use crate::renderer::core::{
    Driver, RenderTarget, RenderTargetDesc, RenderTargetSelection, RenderTargetType,
    SamplerDecl, TextureKind, UniformDecl, UniformType, UniformValue,
};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::image_post::ImagePostProcess;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::run_pass;
use crate::renderer::graph::passes::{
    GaussianBlurRenderPass, PortalTreeRenderPass, PostProcessEffectFactory, ToneMappingRenderPass,
};
use crate::renderer::pipeline::modifier::{ShaderEntryPoint, ShaderModifier};
use crate::renderer::pipeline::shader_gen::ProgramTemplate;
use crate::renderer::settings::RendererSettings;
use crate::resources::bloom::BloomSettings;
use crate::resources::post_process::PostProcessEffect;
use crate::resources::tone_mapping::ToneMappingSettings;
use crate::scene::Scene;

/// Attachment of the HDR scene target holding the bloom bright pass.
pub const BLOOM_ATTACHMENT: usize = 1;

/// Receives the flipped final image each frame.
pub type RenderToTextureCallback = Box<dyn FnMut(&Rc<RenderTarget>)>;

#[derive(Default)]
struct Targets {
    scene: Option<Rc<RenderTarget>>,
    blur_a: Option<Rc<RenderTarget>>,
    blur_b: Option<Rc<RenderTarget>>,
    composite: Option<Rc<RenderTarget>>,
    blit: Option<Rc<RenderTarget>>,
    effect_a: Option<Rc<RenderTarget>>,
    effect_b: Option<Rc<RenderTarget>>,
    capture: Option<Rc<RenderTarget>>,
}

impl Targets {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

pub struct Choreographer {
    settings: RendererSettings,
    width: u32,
    height: u32,
    targets: Targets,
    allocations: u64,

    portal_pass: PortalTreeRenderPass,
    blur_pass: GaussianBlurRenderPass,
    tone_mapping_pass: ToneMappingRenderPass,
    effects: PostProcessEffectFactory,
    flip: Rc<ShaderModifier>,
    render_to_texture: Option<RenderToTextureCallback>,
}

impl fmt::Debug for Choreographer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Choreographer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("hdr", &self.settings.hdr_enabled)
            .field("bloom", &self.settings.bloom_active())
            .field("use_blit", &self.settings.use_blit)
            .field("effects", &self.effects.effects())
            .field("allocations", &self.allocations)
            .finish_non_exhaustive()
    }
}

impl Choreographer {
    pub fn new(settings: &RendererSettings, width: u32, height: u32) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: settings.clone(),
            width: width.max(1),
            height: height.max(1),
            targets: Targets::default(),
            allocations: 0,
            portal_pass: PortalTreeRenderPass::new(settings.clear_color),
            blur_pass: GaussianBlurRenderPass::new(&settings.bloom)?,
            tone_mapping_pass: ToneMappingRenderPass::new(settings.tone_mapping),
            effects: PostProcessEffectFactory::new(&settings.post_process_effects),
            flip: Rc::new(ShaderModifier::new(
                "vertical_flip",
                ShaderEntryPoint::Image,
                "color = textureSample(source, source_sampler, vec2<f32>(in.uv.x, 1.0 - in.uv.y));",
            )),
            render_to_texture: None,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[must_use]
    pub fn viewport_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of render targets this choreographer has allocated so far.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocations
    }

    /// Resizes the pipeline. Returns `false` without touching any target
    /// when the size is unchanged.
    pub fn set_viewport_size(&mut self, width: u32, height: u32) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.width, self.height) {
            return false;
        }
        debug!("Viewport {}x{} -> {width}x{height}", self.width, self.height);
        self.width = width;
        self.height = height;
        self.targets.clear();
        true
    }

    // ------------------------------------------------------------------
    // Toggles
    // ------------------------------------------------------------------

    pub fn set_hdr_enabled(&mut self, enabled: bool) {
        if self.settings.hdr_enabled == enabled {
            return;
        }
        self.settings.hdr_enabled = enabled;
        self.drop_hdr_targets();
    }

    pub fn set_bloom_enabled(&mut self, enabled: bool) {
        if self.settings.bloom_enabled == enabled {
            return;
        }
        self.settings.bloom_enabled = enabled;
        self.drop_hdr_targets();
    }

    pub fn set_pbr_enabled(&mut self, enabled: bool) {
        self.settings.pbr_enabled = enabled;
    }

    pub fn set_shadows_enabled(&mut self, enabled: bool) {
        self.settings.shadows_enabled = enabled;
    }

    pub fn set_use_blit(&mut self, enabled: bool) {
        self.settings.use_blit = enabled;
        if !self.needs_intermediate() {
            self.targets.blit = None;
        }
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.settings.clear_color = color;
        self.portal_pass.set_clear_color(color);
    }

    /// Replaces the blur kernel. The blur targets are kept unless the
    /// downscale factor changes.
    pub fn set_bloom_settings(&mut self, bloom: BloomSettings) -> Result<()> {
        self.blur_pass = GaussianBlurRenderPass::new(&bloom)?;
        if bloom.downscale != self.settings.bloom.downscale {
            self.targets.blur_a = None;
            self.targets.blur_b = None;
        }
        self.settings.bloom = bloom;
        Ok(())
    }

    /// Forwards tone mapping parameters. Toggling the mask reallocates the
    /// scene target, since the mask is one of its attachments.
    pub fn set_tone_mapping(&mut self, tone_mapping: ToneMappingSettings) {
        if tone_mapping.masking != self.settings.tone_mapping.masking {
            self.targets.scene = None;
        }
        self.settings.tone_mapping = tone_mapping;
        self.tone_mapping_pass.set_settings(tone_mapping);
    }

    pub fn set_post_process_effects(&mut self, effects: &[PostProcessEffect]) {
        self.effects = PostProcessEffectFactory::new(effects);
        self.settings.post_process_effects = self.effects.effects().to_vec();
        if self.effects.is_empty() {
            self.targets.effect_a = None;
            self.targets.effect_b = None;
        }
        if !self.needs_intermediate() {
            self.targets.blit = None;
        }
    }

    pub fn enable_effect(&mut self, effect: PostProcessEffect) {
        let mut effects = self.effects.effects().to_vec();
        effects.push(effect);
        self.set_post_process_effects(&effects);
    }

    pub fn disable_effect(&mut self, effect: PostProcessEffect) {
        let effects: Vec<_> = self.effects.effects().iter().copied().filter(|e| *e != effect).collect();
        self.set_post_process_effects(&effects);
    }

    /// Registers a callback receiving a vertically flipped copy of every
    /// final frame.
    pub fn set_render_to_texture_callback(&mut self, callback: Option<RenderToTextureCallback>) {
        self.render_to_texture = callback;
        if self.render_to_texture.is_none() {
            self.targets.capture = None;
            if !self.needs_intermediate() {
                self.targets.blit = None;
            }
        }
    }

    /// Publishes the pipeline flags materials read when deriving their
    /// lighting keys.
    pub fn configure_context(&self, ctx: &mut RenderContext, driver: &dyn Driver) {
        let hdr = self.hdr_active(driver);
        ctx.set_hdr_enabled(hdr);
        ctx.set_pbr_enabled(self.settings.pbr_enabled);
        ctx.set_shadows_enabled(self.settings.shadows_enabled);
        ctx.set_bloom_output(hdr && self.settings.bloom_enabled);
        ctx.set_tone_mapping_mask(hdr && self.settings.tone_mapping.masking);
    }

    fn hdr_active(&self, driver: &dyn Driver) -> bool {
        self.settings.hdr_enabled && driver.capabilities().hdr
    }

    fn needs_intermediate(&self) -> bool {
        self.settings.use_blit || !self.effects.is_empty() || self.render_to_texture.is_some()
    }

    fn drop_hdr_targets(&mut self) {
        self.targets.scene = None;
        self.targets.blur_a = None;
        self.targets.blur_b = None;
        self.targets.composite = None;
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    fn mask_attachment(&self) -> usize {
        BLOOM_ATTACHMENT + usize::from(self.settings.bloom_enabled)
    }

    fn ensure(
        slot: &mut Option<Rc<RenderTarget>>,
        allocations: &mut u64,
        desc: RenderTargetDesc,
        driver: &mut dyn Driver,
    ) -> Result<Rc<RenderTarget>> {
        if let Some(target) = slot.as_ref().filter(|t| t.is_valid() && *t.desc() == desc) {
            return Ok(target.clone());
        }
        let target = driver.new_render_target(&desc)?;
        *allocations += 1;
        *slot = Some(target.clone());
        Ok(target)
    }

    fn scene_target(&mut self, hdr: bool, driver: &mut dyn Driver) -> Result<Rc<RenderTarget>> {
        let desc = if hdr {
            let mut attachments = 1;
            if self.settings.bloom_enabled {
                attachments += 1;
            }
            if self.settings.tone_mapping.masking {
                attachments += 1;
            }
            RenderTargetDesc::new("scene_hdr", RenderTargetType::ColorTextureHdr16, self.width, self.height)
                .with_attachments(attachments)
                .with_depth_stencil(true, true)
        } else {
            let ty = RenderTargetType::ldr_color(driver.capabilities().srgb_framebuffer);
            RenderTargetDesc::new("scene_ldr", ty, self.width, self.height)
                .with_depth_stencil(true, true)
        };
        Self::ensure(&mut self.targets.scene, &mut self.allocations, desc, driver)
    }

    fn ldr_target(
        slot: &mut Option<Rc<RenderTarget>>,
        allocations: &mut u64,
        label: &str,
        width: u32,
        height: u32,
        driver: &mut dyn Driver,
    ) -> Result<Rc<RenderTarget>> {
        let ty = RenderTargetType::ldr_color(driver.capabilities().srgb_framebuffer);
        let desc = RenderTargetDesc::new(label, ty, width, height);
        Self::ensure(slot, allocations, desc, driver)
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Renders one frame of `scene`, with `outgoing` composited during a
    /// transition.
    pub fn render(
        &mut self,
        scene: &dyn Scene,
        outgoing: Option<&dyn Scene>,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let hdr = self.hdr_active(driver);
        let intermediate = self.needs_intermediate();
        let mut io = RenderPassIo::new();

        let resolved = if hdr {
            let scene_target = self.scene_target(true, driver)?;
            io.set_target(Channel::Output, scene_target.clone());
            run_pass(&mut self.portal_pass, scene, outgoing, &mut io, ctx, driver)?;

            let tone_input = if self.settings.bloom_enabled {
                self.bloom(&scene_target, scene, ctx, driver)?
            } else {
                scene_target.clone()
            };

            io.clear();
            io.set_target(Channel::ToneMappingInput, tone_input);
            if self.settings.tone_mapping.masking {
                io.set_attachment(Channel::ToneMappingMask, scene_target, self.mask_attachment());
            }
            let dst = if intermediate {
                Self::ldr_target(
                    &mut self.targets.blit,
                    &mut self.allocations,
                    "blit",
                    self.width,
                    self.height,
                    driver,
                )?
            } else {
                driver.display()
            };
            io.set_target(Channel::Output, dst);
            run_pass(&mut self.tone_mapping_pass, scene, None, &mut io, ctx, driver)?;
            io.output().cloned()
        } else {
            // Outside HDR the scene target holds the final LDR image.
            let dst = if intermediate {
                self.scene_target(false, driver)?
            } else {
                driver.display()
            };
            io.set_target(Channel::Output, dst);
            run_pass(&mut self.portal_pass, scene, outgoing, &mut io, ctx, driver)?;
            io.output().cloned()
        };

        let Some(mut image) = resolved else {
            return Ok(());
        };

        if !self.effects.is_empty() {
            let a = Self::ldr_target(
                &mut self.targets.effect_a,
                &mut self.allocations,
                "effect_a",
                self.width,
                self.height,
                driver,
            )?;
            let b = Self::ldr_target(
                &mut self.targets.effect_b,
                &mut self.allocations,
                "effect_b",
                self.width,
                self.height,
                driver,
            )?;
            image = self.effects.handle_post_processing(&image, &a, &b, driver)?;
        }

        if image.is_display() {
            return Ok(());
        }

        if self.render_to_texture.is_some() {
            let capture = Self::ldr_target(
                &mut self.targets.capture,
                &mut self.allocations,
                "capture",
                self.width,
                self.height,
                driver,
            )?;
            self.copy(&image, &capture, true, driver)?;
            if let Some(callback) = self.render_to_texture.as_mut() {
                callback(&capture);
            }
        }

        let display = driver.display();
        self.copy(&image, &display, false, driver)
    }

    /// Blurs the bright-pass attachment of `scene_target` and adds it back
    /// onto the scene color. Returns the combined target.
    fn bloom(
        &mut self,
        scene_target: &Rc<RenderTarget>,
        scene: &dyn Scene,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<Rc<RenderTarget>> {
        let (bw, bh) = self.settings.bloom.blur_extent(self.width, self.height);
        let blur_desc = |label: &str| RenderTargetDesc::new(label, RenderTargetType::ColorTextureHdr16, bw, bh);
        let a = Self::ensure(&mut self.targets.blur_a, &mut self.allocations, blur_desc("blur_a"), driver)?;
        let b = Self::ensure(&mut self.targets.blur_b, &mut self.allocations, blur_desc("blur_b"), driver)?;
        let composite = Self::ensure(
            &mut self.targets.composite,
            &mut self.allocations,
            RenderTargetDesc::new("bloom_composite", RenderTargetType::ColorTextureHdr16, self.width, self.height),
            driver,
        )?;

        let mut io = RenderPassIo::new();
        io.set_attachment(Channel::GaussianInput, scene_target.clone(), BLOOM_ATTACHMENT);
        io.set_target(Channel::GaussianPingPongA, a);
        io.set_target(Channel::GaussianPingPongB, b);
        run_pass(&mut self.blur_pass, scene, None, &mut io, ctx, driver)?;

        let (Some(base), Some(blurred)) = (
            scene_target.texture(0),
            io.output().and_then(|t| t.texture(0)),
        ) else {
            warn!("Bloom inputs missing, combine skipped");
            return Ok(scene_target.clone());
        };

        let program = driver.shader_factory().image_program(
            ProgramTemplate::image("additive_blend", "bloom_combine")
                .with_uniforms([UniformDecl::new("intensity", UniformType::Float)])
                .with_samplers([
                    SamplerDecl::new("base", TextureKind::Texture2D),
                    SamplerDecl::new("addition", TextureKind::Texture2D),
                ]),
        )?;
        let post = driver.new_image_post_process(program);
        if !post.bind(driver, &composite, RenderTargetSelection::default()) {
            warn!("Bloom combine program unavailable, bloom skipped");
            return Ok(scene_target.clone());
        }
        post.set_uniform(driver, "intensity", UniformValue::Float(1.0));
        post.draw_textures(driver, &[base, blurred]);
        Ok(composite)
    }

    fn blit_program(&self, driver: &mut dyn Driver, flip: bool) -> Result<ImagePostProcess> {
        let mut template = ProgramTemplate::image("blit", if flip { "blit_flipped" } else { "blit" })
            .with_samplers([SamplerDecl::new("source", TextureKind::Texture2D)]);
        if flip {
            template = template.with_modifiers([self.flip.clone()]);
        }
        let program = driver.shader_factory().image_program(template)?;
        Ok(driver.new_image_post_process(program))
    }

    fn copy(
        &self,
        source: &RenderTarget,
        destination: &RenderTarget,
        flip: bool,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let Some(texture) = source.texture(0) else {
            warn!("Blit source '{}' has no color texture", source.label());
            return Ok(());
        };
        let post = self.blit_program(driver, flip)?;
        if !post.blit(driver, &[texture], destination) {
            warn!("Blit program unavailable, '{}' not copied", source.label());
        }
        Ok(())
    }
}
