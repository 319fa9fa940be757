//! IBL Preprocess
//!
//! Derives the image-based lighting maps from the scene's lighting
//! environment, one stage per frame so the cost is spread out:
//!
//! ```text
//! Idle ─► CubeConvert ─► IrradianceConvolution ─► PrefilterConvolution ─► BrdfConvolution ─► Idle
//! ```
//!
//! - A new environment (by identity) restarts at `CubeConvert`, even in the
//!   middle of a computation.
//! - Cube environments are used as-is; their `CubeConvert` frame draws
//!   nothing.
//! - The BRDF LUT does not depend on the environment and is computed once
//!   per context.
//! - The three maps are published together when the BRDF stage completes.
//!   Removing the environment unpublishes them at once.
//! - Losing the context invalidates every map and restarts the chain.
//! - A map that cannot be allocated abandons the chain for the current
//!   environment. Nothing is published and the preprocess stays `Idle`
//!   until the environment changes.

use std::rc::Rc;

use log::{debug, warn};

use super::Preprocess;
use crate::errors::{MirageError, Result};
use crate::renderer::core::{Driver, RenderTarget, RenderTargetDesc, RenderTargetType, TextureKind};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::run_pass;
use crate::renderer::graph::passes::{
    BrdfRenderPass, EquirectangularToCubeRenderPass, IrradianceRenderPass, PrefilterRenderPass,
};
use crate::renderer::settings::IblSettings;
use crate::resources::texture::Texture;
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IblPhase {
    #[default]
    Idle,
    CubeConvert,
    IrradianceConvolution,
    PrefilterConvolution,
    BrdfConvolution,
}

#[derive(Debug)]
pub struct IblPreprocess {
    settings: IblSettings,
    phase: IblPhase,
    environment: Option<Rc<Texture>>,

    cube: Option<Rc<RenderTarget>>,
    irradiance: Option<Rc<RenderTarget>>,
    prefiltered: Option<Rc<RenderTarget>>,
    brdf: Option<Rc<RenderTarget>>,
    brdf_computations: u32,

    equirect_pass: EquirectangularToCubeRenderPass,
    irradiance_pass: IrradianceRenderPass,
    prefilter_pass: PrefilterRenderPass,
    brdf_pass: BrdfRenderPass,
}

impl IblPreprocess {
    #[must_use]
    pub fn new(settings: IblSettings) -> Self {
        Self {
            settings,
            phase: IblPhase::Idle,
            environment: None,
            cube: None,
            irradiance: None,
            prefiltered: None,
            brdf: None,
            brdf_computations: 0,
            equirect_pass: EquirectangularToCubeRenderPass,
            irradiance_pass: IrradianceRenderPass,
            prefilter_pass: PrefilterRenderPass::new(settings.prefilter_mip_levels),
            brdf_pass: BrdfRenderPass,
        }
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> IblPhase {
        self.phase
    }

    /// How many times the BRDF LUT has been rendered.
    #[inline]
    #[must_use]
    pub fn brdf_computations(&self) -> u32 {
        self.brdf_computations
    }

    fn targets_lost(&self) -> bool {
        [&self.cube, &self.irradiance, &self.prefiltered, &self.brdf]
            .into_iter()
            .flatten()
            .any(|target| !target.is_valid())
    }

    fn unpublish(ctx: &mut RenderContext) {
        ctx.set_irradiance_map(None);
        ctx.set_prefiltered_map(None);
        ctx.set_brdf_map(None);
    }

    fn publish(&self, ctx: &mut RenderContext) {
        ctx.set_irradiance_map(self.irradiance.clone());
        ctx.set_prefiltered_map(self.prefiltered.clone());
        ctx.set_brdf_map(self.brdf.clone());
        ctx.set_prefilter_max_lod(self.settings.prefilter_mip_levels.saturating_sub(1) as f32);
    }

    fn ensure(
        slot: &mut Option<Rc<RenderTarget>>,
        desc: RenderTargetDesc,
        driver: &mut dyn Driver,
    ) -> Result<Rc<RenderTarget>> {
        if let Some(target) = slot.as_ref().filter(|t| t.is_valid() && *t.desc() == desc) {
            return Ok(target.clone());
        }
        let target = driver.new_render_target(&desc)?;
        *slot = Some(target.clone());
        Ok(target)
    }

    /// Publishes the cube the convolutions sample on `channel`.
    fn set_cube_source(&self, io: &mut RenderPassIo, channel: Channel, environment: &Rc<Texture>) {
        match &self.cube {
            Some(cube) if environment.kind() != TextureKind::Cube => io.set_target(channel, cube.clone()),
            _ => io.set_texture(channel, environment.clone()),
        }
    }

    fn step(
        &mut self,
        environment: &Rc<Texture>,
        scene: &dyn Scene,
        ctx: &mut RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let mut io = RenderPassIo::new();
        match self.phase {
            IblPhase::Idle => {}
            IblPhase::CubeConvert => {
                if environment.kind() == TextureKind::Cube {
                    debug!("Environment '{}' is already a cube map", environment.label());
                    self.cube = None;
                } else {
                    let size = self.settings.cube_size;
                    let cube = Self::ensure(
                        &mut self.cube,
                        RenderTargetDesc::new("ibl_environment", RenderTargetType::CubeTextureHdr16, size, size),
                        driver,
                    )?;
                    io.set_texture(Channel::EquirectInput, environment.clone());
                    io.set_target(Channel::Output, cube);
                    run_pass(&mut self.equirect_pass, scene, None, &mut io, ctx, driver)?;
                }
                self.phase = IblPhase::IrradianceConvolution;
            }
            IblPhase::IrradianceConvolution => {
                let size = self.settings.irradiance_size;
                let target = Self::ensure(
                    &mut self.irradiance,
                    RenderTargetDesc::new("ibl_irradiance", RenderTargetType::CubeTextureHdr16, size, size),
                    driver,
                )?;
                self.set_cube_source(&mut io, Channel::IrradianceInput, environment);
                io.set_target(Channel::Output, target);
                run_pass(&mut self.irradiance_pass, scene, None, &mut io, ctx, driver)?;
                self.phase = IblPhase::PrefilterConvolution;
            }
            IblPhase::PrefilterConvolution => {
                let size = self.settings.prefilter_size;
                let target = Self::ensure(
                    &mut self.prefiltered,
                    RenderTargetDesc::new("ibl_prefiltered", RenderTargetType::CubeTextureHdr16, size, size)
                        .with_mip_levels(self.settings.prefilter_mip_levels),
                    driver,
                )?;
                self.set_cube_source(&mut io, Channel::PrefilterInput, environment);
                io.set_target(Channel::Output, target);
                run_pass(&mut self.prefilter_pass, scene, None, &mut io, ctx, driver)?;
                self.phase = IblPhase::BrdfConvolution;
            }
            IblPhase::BrdfConvolution => {
                if self.brdf.is_none() {
                    let size = self.settings.brdf_lut_size;
                    let target = Self::ensure(
                        &mut self.brdf,
                        RenderTargetDesc::new("ibl_brdf", RenderTargetType::ColorTextureRg16, size, size),
                        driver,
                    )?;
                    io.set_target(Channel::Output, target);
                    run_pass(&mut self.brdf_pass, scene, None, &mut io, ctx, driver)?;
                    self.brdf_computations += 1;
                }
                self.publish(ctx);
                self.phase = IblPhase::Idle;
            }
        }
        Ok(())
    }
}

impl Preprocess for IblPreprocess {
    fn name(&self) -> &'static str {
        "ibl"
    }

    fn execute(&mut self, scene: &dyn Scene, ctx: &mut RenderContext, driver: &mut dyn Driver) -> Result<()> {
        let environment = scene.lighting_environment();

        if self.targets_lost() {
            debug!("IBL maps lost with the context, recomputing");
            self.cube = None;
            self.irradiance = None;
            self.prefiltered = None;
            self.brdf = None;
            Self::unpublish(ctx);
            self.phase = if environment.is_some() {
                IblPhase::CubeConvert
            } else {
                IblPhase::Idle
            };
        }

        let Some(environment) = environment else {
            if self.environment.take().is_some() {
                debug!("Lighting environment removed");
                Self::unpublish(ctx);
            }
            self.phase = IblPhase::Idle;
            return Ok(());
        };

        let changed = self
            .environment
            .as_ref()
            .is_none_or(|current| !Rc::ptr_eq(current, &environment));
        if changed {
            debug!("Lighting environment '{}' changed, restarting IBL", environment.label());
            self.environment = Some(environment.clone());
            Self::unpublish(ctx);
            self.phase = IblPhase::CubeConvert;
        }

        match self.step(&environment, scene, ctx, driver) {
            Err(MirageError::RenderTargetCreation { label, width, height, reason }) => {
                warn!(
                    "IBL map '{label}' ({width}x{height}) could not be allocated ({reason}), image-based lighting disabled for '{}'",
                    environment.label()
                );
                self.cube = None;
                self.irradiance = None;
                self.prefiltered = None;
                Self::unpublish(ctx);
                self.phase = IblPhase::Idle;
                Ok(())
            }
            result => result,
        }
    }
}
