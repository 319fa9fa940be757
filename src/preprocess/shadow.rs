//! Shadow Preprocess
//!
//! Allocates one depth array shared by every shadow-casting light and
//! renders each light into its own layer.
//!
//! # Allocation
//!
//! The array is sized for the largest request among the casters, capped by
//! [`ShadowSettings::max_map_size`]. When allocation fails the size is halved
//! down to [`ShadowSettings::min_map_size`]. The first size that succeeds
//! below the request becomes a ceiling for the rest of the session, so later
//! frames do not retry sizes the device already refused. If even the minimum
//! fails, shadows are skipped for that frame.

use std::rc::Rc;

use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use super::Preprocess;
use crate::errors::{MirageError, Result};
use crate::renderer::core::{Driver, RenderTarget, RenderTargetDesc, RenderTargetType};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::run_pass;
use crate::renderer::graph::passes::ShadowMapRenderPass;
use crate::renderer::settings::ShadowSettings;
use crate::scene::Scene;
use crate::scene::light::Light;

#[derive(Debug)]
pub struct ShadowPreprocess {
    settings: ShadowSettings,
    max_supported_size: Option<u32>,
    target: Option<Rc<RenderTarget>>,
    passes: FxHashMap<u64, ShadowMapRenderPass>,
}

impl ShadowPreprocess {
    #[must_use]
    pub fn new(settings: ShadowSettings) -> Self {
        Self {
            settings,
            max_supported_size: None,
            target: None,
            passes: FxHashMap::default(),
        }
    }

    /// Session ceiling learned from allocation failures.
    #[must_use]
    pub fn max_supported_size(&self) -> Option<u32> {
        self.max_supported_size
    }

    /// The current shadow array, if shadows rendered last frame.
    #[must_use]
    pub fn target(&self) -> Option<&Rc<RenderTarget>> {
        self.target.as_ref()
    }

    /// Casters in scene order, limited to the layer budget.
    fn collect_casters(&self, scene: &dyn Scene) -> Result<Vec<Rc<Light>>> {
        let lights = scene.lights();
        for light in &lights {
            light.set_shadow_map_index(None);
        }

        let mut casters = Vec::new();
        for light in lights.into_iter().filter(|l| l.casts_shadow()) {
            if !light.kind().supports_shadows() {
                return Err(MirageError::InvariantViolation(format!(
                    "{:?} light {} cannot cast shadows",
                    light.kind(),
                    light.id()
                )));
            }
            casters.push(light);
        }

        let budget = self.settings.max_shadow_lights as usize;
        if casters.len() > budget {
            warn!(
                "{} shadow-casting lights exceed the budget of {budget}, extra lights cast no shadow",
                casters.len()
            );
            casters.truncate(budget);
        }
        Ok(casters)
    }

    /// Size the array should have for `casters`.
    fn requested_size(&self, casters: &[Rc<Light>]) -> u32 {
        let wanted = casters.iter().map(|l| l.shadow_map_size).max().unwrap_or(0);
        let cap = self
            .max_supported_size
            .unwrap_or(self.settings.max_map_size)
            .min(self.settings.max_map_size);
        wanted.min(cap).max(1)
    }

    fn allocate(&mut self, requested: u32, layers: u32, driver: &mut dyn Driver) -> Option<Rc<RenderTarget>> {
        if let Some(target) = &self.target
            && target.is_valid()
            && target.width() == requested
            && target.desc().slices == layers
        {
            return Some(target.clone());
        }

        let mut size = requested;
        loop {
            let desc = RenderTargetDesc::new("shadow_map", RenderTargetType::DepthTextureArray, size, size)
                .with_slices(layers);
            match driver.new_render_target(&desc) {
                Ok(target) => {
                    if size < requested {
                        info!("Shadow maps limited to {size}px for this session ({requested}px refused)");
                        self.max_supported_size = Some(size);
                    }
                    self.target = Some(target.clone());
                    return Some(target);
                }
                Err(err) => {
                    let next = size / 2;
                    if next < self.settings.min_map_size || next == 0 {
                        warn!("Shadow map allocation failed at the minimum size, shadows skipped: {err}");
                        self.target = None;
                        return None;
                    }
                    debug!("Shadow map allocation failed at {size}px, retrying at {next}px");
                    size = next;
                }
            }
        }
    }

    fn disable(&mut self, ctx: &mut RenderContext) {
        ctx.set_shadow_map(None);
    }
}

impl Preprocess for ShadowPreprocess {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn execute(&mut self, scene: &dyn Scene, ctx: &mut RenderContext, driver: &mut dyn Driver) -> Result<()> {
        if !ctx.shadows_enabled() {
            for light in scene.lights() {
                light.set_shadow_map_index(None);
            }
            self.disable(ctx);
            return Ok(());
        }

        let casters = self.collect_casters(scene)?;
        self.passes.retain(|id, _| casters.iter().any(|l| l.id() == *id));
        if casters.is_empty() {
            self.disable(ctx);
            return Ok(());
        }

        let requested = self.requested_size(&casters);
        let Some(target) = self.allocate(requested, casters.len() as u32, driver) else {
            self.disable(ctx);
            return Ok(());
        };

        let mut io = RenderPassIo::new();
        for (layer, light) in casters.iter().enumerate() {
            let layer = layer as u32;
            light.set_shadow_map_index(Some(layer));
            light.set_shadow_view_projection(light.compute_shadow_view_projection());

            let pass = self
                .passes
                .entry(light.id())
                .or_insert_with(|| ShadowMapRenderPass::new(light.clone(), layer));
            pass.set_layer(layer);

            io.clear();
            io.set_target(Channel::ShadowTarget, target.clone());
            run_pass(pass, scene, None, &mut io, ctx, driver)?;
        }

        ctx.set_shadow_map(Some(target));
        Ok(())
    }
}
