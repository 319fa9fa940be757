//! Backend Interface
//!
//! [`Driver`] is the single seam between the render-pass pipeline and a GPU
//! backend. Passes, bindings and preprocess tasks only ever see
//! `&mut dyn Driver`; the backend is selected once at startup.
//!
//! The interface is immediate-mode: state setters mutate the current
//! pipeline state and [`Driver::draw`] consumes it. A pass must configure
//! every piece of state it depends on and must not assume anything about the
//! state left behind by the previous pass.

use std::rc::Rc;

use super::context::GpuContext;
use super::target::RenderTarget;
use super::types::{
    BlendMode, BufferHandle, ClearFlags, CullMode, DrawCall, DriverCapabilities, GeometryData,
    GeometryHandle, RenderTargetDesc, RenderTargetSelection, ShaderHandle, ShaderSource,
    StencilFunc, StencilOp, TextureHandle, TextureKind, UniformSlot, UniformValue, Viewport,
};
use crate::errors::Result;
use crate::renderer::graph::image_post::ImagePostProcess;
use crate::renderer::pipeline::factory::ShaderFactory;
use crate::renderer::pipeline::program::ShaderProgram;

/// Pixel format of an uploaded texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba8Srgb,
    /// Single channel, used for text glyph atlases and YCbCr luma.
    R8,
    /// Two channels, used for YCbCr chroma.
    Rg8,
    Rgba16Float,
}

impl TextureFormat {
    #[must_use]
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rg8 => 2,
            Self::Rgba8 | Self::Rgba8Srgb => 4,
            Self::Rgba16Float => 8,
        }
    }
}

/// Description of a sampled texture created outside a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

/// A GPU backend.
pub trait Driver {
    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Liveness token shared with every object this driver allocates.
    fn context(&self) -> &GpuContext;

    fn capabilities(&self) -> DriverCapabilities;

    fn begin_frame(&mut self, frame: u64);

    fn end_frame(&mut self);

    /// Executes deletions queued by dropped GPU objects.
    fn collect_garbage(&mut self);

    // ------------------------------------------------------------------
    // Render targets
    // ------------------------------------------------------------------

    fn new_render_target(&mut self, desc: &RenderTargetDesc) -> Result<Rc<RenderTarget>>;

    /// The presentable target.
    fn display(&self) -> Rc<RenderTarget>;

    /// Directs subsequent clears and draws at one slice and mip of `target`.
    /// Also resets the viewport to the size of that mip.
    fn bind_render_target(&mut self, target: &RenderTarget, selection: RenderTargetSelection);

    fn set_viewport(&mut self, viewport: Viewport);

    /// Clears the bound target. Color writes honour the color-write flag;
    /// stencil clears honour the stencil write mask.
    fn clear(&mut self, flags: ClearFlags, color: [f32; 4]);

    // ------------------------------------------------------------------
    // Shaders
    // ------------------------------------------------------------------

    /// Compiles a program. On failure returns the backend's error log.
    fn compile_shader(&mut self, source: &ShaderSource) -> std::result::Result<ShaderHandle, String>;

    fn bind_shader(&mut self, shader: ShaderHandle);

    fn unbind_shader(&mut self);

    /// Sets a uniform of the bound program. Values persist per program.
    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue);

    // ------------------------------------------------------------------
    // Textures, geometry, buffers
    // ------------------------------------------------------------------

    /// Creates a texture, optionally uploading `data` into mip 0 of every
    /// layer.
    fn new_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> TextureHandle;

    /// Binds `texture` to the program's sampler at `unit`.
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    /// A 1×1 placeholder of the given kind, shared for the context lifetime.
    fn blank_texture(&mut self, kind: TextureKind) -> TextureHandle;

    fn new_geometry(&mut self, data: &GeometryData) -> GeometryHandle;

    fn new_uniform_buffer(&mut self, size: u64) -> BufferHandle;

    fn write_uniform_buffer(&mut self, buffer: BufferHandle, data: &[u8]);

    /// Binds the lighting block read by lit programs.
    fn bind_lighting_buffer(&mut self, buffer: Option<BufferHandle>);

    // ------------------------------------------------------------------
    // Fixed-function state
    // ------------------------------------------------------------------

    fn set_depth_writing_enabled(&mut self, enabled: bool);

    fn set_depth_reading_enabled(&mut self, enabled: bool);

    fn set_blending_mode(&mut self, mode: BlendMode);

    fn set_cull_mode(&mut self, mode: CullMode);

    fn set_color_writing_enabled(&mut self, enabled: bool);

    fn set_stencil_test_enabled(&mut self, enabled: bool);

    fn set_stencil_func(&mut self, func: StencilFunc, reference: u8, read_mask: u8);

    fn set_stencil_ops(&mut self, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp);

    fn set_stencil_write_mask(&mut self, mask: u8);

    // ------------------------------------------------------------------
    // Draw
    // ------------------------------------------------------------------

    fn draw(&mut self, call: &DrawCall);

    // ------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------

    /// The program cache. Owned by the driver so it lives exactly as long as
    /// the GPU context.
    fn shader_factory(&mut self) -> &mut ShaderFactory;

    fn new_image_post_process(&mut self, program: Rc<ShaderProgram>) -> ImagePostProcess {
        ImagePostProcess::new(program)
    }

    /// Resets fixed-function state to the pipeline defaults: depth read and
    /// write on, no blending, back-face culling, color writes on, stencil off.
    fn reset_state(&mut self) {
        self.set_depth_reading_enabled(true);
        self.set_depth_writing_enabled(true);
        self.set_blending_mode(BlendMode::None);
        self.set_cull_mode(CullMode::Back);
        self.set_color_writing_enabled(true);
        self.set_stencil_test_enabled(false);
        self.set_stencil_write_mask(0xFF);
    }
}
