use smallvec::SmallVec;

use super::context::{ContextRef, GpuResource};
use super::types::{RenderTargetDesc, RenderTargetHandle, RenderTargetType, TextureHandle};

/// A framebuffer allocated by a [`Driver`](super::Driver).
///
/// Render targets are shared through `Rc`; the GPU object is released when
/// the last owner drops it. Passes compare targets by `Rc::ptr_eq` or by
/// [`handle`](Self::handle) to detect reallocation.
#[derive(Debug)]
pub struct RenderTarget {
    handle: RenderTargetHandle,
    desc: RenderTargetDesc,
    color_textures: SmallVec<[TextureHandle; 4]>,
    depth_texture: Option<TextureHandle>,
    context: ContextRef,
    display: bool,
}

impl RenderTarget {
    /// Wraps backend handles. Only drivers construct targets.
    #[must_use]
    pub fn new(
        handle: RenderTargetHandle,
        desc: RenderTargetDesc,
        color_textures: SmallVec<[TextureHandle; 4]>,
        depth_texture: Option<TextureHandle>,
        context: ContextRef,
    ) -> Self {
        let display = desc.ty == RenderTargetType::Display;
        Self {
            handle,
            desc,
            color_textures,
            depth_texture,
            context,
            display,
        }
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> RenderTargetHandle {
        self.handle
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &RenderTargetDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.desc.label
    }

    #[inline]
    #[must_use]
    pub fn ty(&self) -> RenderTargetType {
        self.desc.ty
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    #[inline]
    #[must_use]
    pub fn attachment_count(&self) -> u32 {
        self.color_textures.len() as u32
    }

    /// Texture of color attachment `index`.
    #[inline]
    #[must_use]
    pub fn texture(&self, index: usize) -> Option<TextureHandle> {
        self.color_textures.get(index).copied()
    }

    #[inline]
    #[must_use]
    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth_texture
    }

    #[inline]
    #[must_use]
    pub fn is_display(&self) -> bool {
        self.display
    }

    /// Whether the context that allocated this target is still alive and in
    /// the same generation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.context.is_valid()
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if !self.display {
            self.context.release(GpuResource::RenderTarget(self.handle));
        }
    }
}
