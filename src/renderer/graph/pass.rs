//! Render Pass Trait
//!
//! A pass reads the channels it declares from a [`RenderPassIo`], configures
//! every piece of driver state it relies on, draws, and publishes its result
//! on [`Channel::Output`]. A pass that draws into a destination the caller
//! placed on `Output` republishes it once it has written it.
//!
//! # Contract
//! - No assumptions about the state left behind by the previous pass
//! - Reads only the channels listed by [`RenderPass::inputs`]
//! - `outgoing` scene backgrounds may be drawn alongside the incoming ones,
//!   outgoing content only as a separate later step

use log::trace;

use super::context::RenderContext;
use super::io::{Channel, PassResource, RenderPassIo};
use crate::errors::{MirageError, Result};
use crate::renderer::core::Driver;
use crate::scene::Scene;

pub trait RenderPass {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Channels this pass reads.
    fn inputs(&self) -> &'static [Channel];

    fn render(
        &mut self,
        scene: &dyn Scene,
        outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()>;

    /// Reads a declared input.
    fn input<'io>(&self, io: &'io RenderPassIo, channel: Channel) -> Result<&'io PassResource> {
        if !self.inputs().contains(&channel) {
            return Err(MirageError::InvariantViolation(format!(
                "pass '{}' read undeclared channel {channel}",
                self.name()
            )));
        }
        io.get(channel).ok_or(MirageError::MissingPassInput {
            pass: self.name(),
            channel: channel.key(),
        })
    }
}

/// Runs `pass` and checks that it published an output.
pub fn run_pass(
    pass: &mut dyn RenderPass,
    scene: &dyn Scene,
    outgoing: Option<&dyn Scene>,
    io: &mut RenderPassIo,
    ctx: &RenderContext,
    driver: &mut dyn Driver,
) -> Result<()> {
    trace!("render pass '{}'", pass.name());
    io.reset_output_published();
    pass.render(scene, outgoing, io, ctx, driver)?;
    if !io.output_published() {
        return Err(MirageError::InvariantViolation(format!(
            "pass '{}' did not write {}",
            pass.name(),
            Channel::Output
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::HeadlessDriver;
    use crate::scene::{BasicScene, Portal};

    /// Draws into the caller's destination; republishes it only when asked.
    struct InPlace {
        republish: bool,
    }

    impl RenderPass for InPlace {
        fn name(&self) -> &'static str {
            "in_place"
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
            _driver: &mut dyn Driver,
        ) -> Result<()> {
            let target = self.input(io, Channel::Output)?.target().cloned();
            if let (true, Some(target)) = (self.republish, target) {
                io.set_target(Channel::Output, target);
            }
            Ok(())
        }
    }

    #[test]
    fn test_destination_from_caller_is_not_an_output() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let scene = BasicScene::new(Portal::new("root"));
        let ctx = RenderContext::new();

        for republish in [false, true] {
            let mut io = RenderPassIo::new();
            io.set_target(Channel::Output, driver.display());
            let result = run_pass(&mut InPlace { republish }, &scene, None, &mut io, &ctx, &mut driver);
            assert_eq!(result.is_ok(), republish, "republish {republish}: {result:?}");
            if !republish {
                assert!(matches!(result, Err(MirageError::InvariantViolation(_))));
            }
        }
    }

    #[test]
    fn test_undeclared_channel_is_rejected() {
        let io = RenderPassIo::new();
        let pass = InPlace { republish: false };
        assert!(matches!(
            pass.input(&io, Channel::GaussianInput),
            Err(MirageError::InvariantViolation(_))
        ));
        assert!(matches!(
            pass.input(&io, Channel::Output),
            Err(MirageError::MissingPassInput { .. })
        ));
    }
}
