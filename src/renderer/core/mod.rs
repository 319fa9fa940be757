//! Backend Core
//!
//! - [`Driver`]: the single interface between passes and a GPU backend
//! - [`GpuContext`] / [`ContextRef`]: liveness tokens checked before deletion
//! - [`RenderTarget`]: owned framebuffer handle
//! - [`HeadlessDriver`] and [`WgpuDriver`]: the two backends

pub mod context;
pub mod driver;
pub mod headless;
pub mod pipeline_key;
pub mod target;
pub mod types;
pub mod wgpu_driver;

pub use context::{ContextRef, GpuContext, GpuResource, ResourceStats};
pub use driver::{Driver, TextureDesc, TextureFormat};
pub use headless::{DrawRecord, DriverCommand, HeadlessDriver};
pub use target::RenderTarget;
pub use types::*;
pub use wgpu_driver::WgpuDriver;
