//! Frame Pipeline
//!
//! - [`RenderContext`]: per-frame state shared by passes and preprocess tasks
//! - [`SortKey`]: draw order inside one portal
//! - [`RenderPassIo`]: named channels handed from pass to pass
//! - [`RenderPass`]: the pass contract, with concrete passes in [`passes`]
//! - [`ImagePostProcess`]: fullscreen program helper
//! - [`Choreographer`]: the ordered pipeline and its render targets

pub mod choreographer;
pub mod context;
pub mod frame;
pub mod image_post;
pub mod io;
pub mod pass;
pub mod passes;

pub use choreographer::{Choreographer, RenderToTextureCallback};
pub use context::{Eye, RenderContext};
pub use frame::SortKey;
pub use image_post::ImagePostProcess;
pub use io::{Channel, PassResource, RenderPassIo};
pub use pass::{RenderPass, run_pass};
