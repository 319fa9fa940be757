#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod preprocess;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod utils;

pub use errors::{MirageError, Result};
pub use preprocess::{FrameListener, IblPreprocess, Preprocess, ShadowPreprocess};
pub use renderer::Renderer;
pub use renderer::core::{Driver, HeadlessDriver, RenderTarget, WgpuDriver};
pub use renderer::graph::{Choreographer, RenderContext, RenderPass, RenderPassIo, SortKey};
pub use renderer::pipeline::{ShaderFactory, ShaderProgram};
pub use renderer::settings::RendererSettings;
pub use resources::{Material, PostProcessEffect, ShaderDefines, Texture};
pub use scene::{BasicScene, Camera, Light, Portal, PortalTree, Renderable, Scene};
pub use utils::interner;
