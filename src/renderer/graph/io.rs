//! Pass Inputs and Outputs
//!
//! Passes exchange targets and textures through named channels. Each
//! channel has one producer and one consumer:
//!
//! | Channel              | Key           | Producer → consumer                    |
//! |----------------------|---------------|----------------------------------------|
//! | `Output`             | `RT_Output`   | every pass → next stage                |
//! | `GaussianInput`      | `G_Input`     | choreographer → gaussian blur          |
//! | `GaussianPingPongA`  | `G_PingPongA` | choreographer → gaussian blur          |
//! | `GaussianPingPongB`  | `G_PingPongB` | choreographer → gaussian blur          |
//! | `ToneMappingInput`   | `TM_Input`    | base pass or bloom combine → tone map  |
//! | `ToneMappingMask`    | `TM_Mask`     | base pass → tone map                   |
//! | `EquirectInput`      | `EC_Input`    | IBL preprocess → equirect-to-cube      |
//! | `IrradianceInput`    | `IR_Input`    | cube conversion → irradiance           |
//! | `PrefilterInput`     | `PF_Input`    | cube conversion → prefilter            |
//! | `ShadowTarget`       | `SM_Target`   | shadow preprocess → shadow map pass    |

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::renderer::core::{RenderTarget, TextureHandle};
use crate::resources::texture::Texture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Output,
    GaussianInput,
    GaussianPingPongA,
    GaussianPingPongB,
    ToneMappingInput,
    ToneMappingMask,
    EquirectInput,
    IrradianceInput,
    PrefilterInput,
    ShadowTarget,
}

impl Channel {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Output => "RT_Output",
            Self::GaussianInput => "G_Input",
            Self::GaussianPingPongA => "G_PingPongA",
            Self::GaussianPingPongB => "G_PingPongB",
            Self::ToneMappingInput => "TM_Input",
            Self::ToneMappingMask => "TM_Mask",
            Self::EquirectInput => "EC_Input",
            Self::IrradianceInput => "IR_Input",
            Self::PrefilterInput => "PF_Input",
            Self::ShadowTarget => "SM_Target",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What a channel carries.
#[derive(Debug, Clone)]
pub enum PassResource {
    /// A render target; readers sample `attachment`.
    Target {
        target: Rc<RenderTarget>,
        attachment: usize,
    },
    /// A texture owned by the scene.
    Texture(Rc<Texture>),
}

impl PassResource {
    /// The target, for resources that are one.
    #[must_use]
    pub fn target(&self) -> Option<&Rc<RenderTarget>> {
        match self {
            Self::Target { target, .. } => Some(target),
            Self::Texture(_) => None,
        }
    }

    /// The handle a reader samples.
    #[must_use]
    pub fn texture_handle(&self) -> Option<TextureHandle> {
        match self {
            Self::Target { target, attachment } => target.texture(*attachment),
            Self::Texture(texture) => texture.plane(0),
        }
    }
}

/// Channel map handed from pass to pass.
#[derive(Debug, Default, Clone)]
pub struct RenderPassIo {
    channels: FxHashMap<Channel, PassResource>,
    /// Set whenever [`Channel::Output`] is written.
    output_published: bool,
}

impl RenderPassIo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&mut self, channel: Channel, target: Rc<RenderTarget>) {
        self.set_attachment(channel, target, 0);
    }

    pub fn set_attachment(&mut self, channel: Channel, target: Rc<RenderTarget>, attachment: usize) {
        self.output_published |= channel == Channel::Output;
        self.channels
            .insert(channel, PassResource::Target { target, attachment });
    }

    pub fn set_texture(&mut self, channel: Channel, texture: Rc<Texture>) {
        self.output_published |= channel == Channel::Output;
        self.channels.insert(channel, PassResource::Texture(texture));
    }

    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<&PassResource> {
        self.channels.get(&channel)
    }

    #[must_use]
    pub fn target(&self, channel: Channel) -> Option<&Rc<RenderTarget>> {
        self.get(channel).and_then(PassResource::target)
    }

    /// The target written by the last pass.
    #[must_use]
    pub fn output(&self) -> Option<&Rc<RenderTarget>> {
        self.target(Channel::Output)
    }

    pub fn remove(&mut self, channel: Channel) -> Option<PassResource> {
        if channel == Channel::Output {
            self.output_published = false;
        }
        self.channels.remove(&channel)
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.output_published = false;
    }

    /// Whether [`Channel::Output`] was written since the last
    /// [`RenderPassIo::reset_output_published`]. A destination handed in by
    /// the caller counts only once the pass republishes it.
    #[must_use]
    pub fn output_published(&self) -> bool {
        self.output_published && self.contains(Channel::Output)
    }

    pub fn reset_output_published(&mut self) {
        self.output_published = false;
    }

    #[must_use]
    pub fn contains(&self, channel: Channel) -> bool {
        self.channels.contains_key(&channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::{Driver, HeadlessDriver, RenderTargetDesc, RenderTargetType};

    #[test]
    fn test_attachment_selects_sampled_texture() {
        let mut driver = HeadlessDriver::new(8, 8).unwrap();
        let target = driver
            .new_render_target(
                &RenderTargetDesc::new("mrt", RenderTargetType::ColorTextureHdr16, 8, 8)
                    .with_attachments(2),
            )
            .unwrap();

        let mut io = RenderPassIo::new();
        io.set_attachment(Channel::GaussianInput, target.clone(), 1);
        let resource = io.get(Channel::GaussianInput).unwrap();
        assert_eq!(resource.texture_handle(), target.texture(1));
        assert!(io.output().is_none());
    }

    #[test]
    fn test_channel_keys_are_distinct() {
        let all = [
            Channel::Output,
            Channel::GaussianInput,
            Channel::GaussianPingPongA,
            Channel::GaussianPingPongB,
            Channel::ToneMappingInput,
            Channel::ToneMappingMask,
            Channel::EquirectInput,
            Channel::IrradianceInput,
            Channel::PrefilterInput,
            Channel::ShadowTarget,
        ];
        let keys: rustc_hash::FxHashSet<&str> = all.iter().map(|c| c.key()).collect();
        assert_eq!(keys.len(), all.len());
    }
}
