//! Preprocess Tasks
//!
//! Work that runs once per frame before the choreographer and publishes its
//! results on the [`RenderContext`]: shadow maps and the image-based lighting
//! maps.

pub mod ibl;
pub mod shadow;

pub use ibl::{IblPhase, IblPreprocess};
pub use shadow::ShadowPreprocess;

use crate::errors::Result;
use crate::renderer::core::Driver;
use crate::renderer::graph::context::RenderContext;
use crate::scene::Scene;

pub trait Preprocess {
    fn name(&self) -> &'static str;

    fn execute(&mut self, scene: &dyn Scene, ctx: &mut RenderContext, driver: &mut dyn Driver) -> Result<()>;
}

/// Observer of the frame sequence, invoked synchronously.
pub trait FrameListener {
    fn on_frame_will_render(&mut self, _ctx: &RenderContext) {}

    fn on_frame_did_render(&mut self, _ctx: &RenderContext) {}
}
