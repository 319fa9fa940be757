//! Textures
//!
//! A [`Texture`] is the host-side identity of a sampled image. Its GPU
//! substrate (one handle per plane) may arrive later than the texture
//! itself, for example when a video frame has not been decoded yet. Until
//! then [`Texture::plane`] returns `None` and bindings substitute a blank
//! placeholder of the same kind.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::renderer::core::{
    ContextRef, Driver, GpuResource, TextureDesc, TextureFormat, TextureHandle, TextureKind,
};
use crate::renderer::pipeline::capabilities::StereoMode;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// How the texels are interpreted by surface programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureContent {
    #[default]
    Image,
    /// Luma in plane 0, chroma in plane 1.
    YCbCr,
    /// Coverage in the red channel.
    Text,
}

impl TextureContent {
    #[must_use]
    pub fn plane_count(self) -> usize {
        match self {
            Self::YCbCr => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Default)]
struct Substrate {
    planes: SmallVec<[TextureHandle; 2]>,
    context: ContextRef,
    width: u32,
    height: u32,
}

impl Substrate {
    fn release(&mut self) {
        for plane in self.planes.drain(..) {
            self.context.release(GpuResource::Texture(plane));
        }
    }
}

#[derive(Debug)]
pub struct Texture {
    id: u64,
    label: String,
    kind: TextureKind,
    content: TextureContent,
    stereo_mode: StereoMode,
    substrate: RefCell<Substrate>,
}

impl Texture {
    /// A texture without GPU storage yet.
    #[must_use]
    pub fn new(label: impl Into<String>, kind: TextureKind, content: TextureContent) -> Self {
        Self {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            kind,
            content,
            stereo_mode: StereoMode::None,
            substrate: RefCell::new(Substrate::default()),
        }
    }

    #[must_use]
    pub fn with_stereo_mode(mut self, mode: StereoMode) -> Self {
        self.stereo_mode = mode;
        self
    }

    /// Creates a texture and immediately allocates its GPU planes.
    pub fn create(
        driver: &mut dyn Driver,
        label: impl Into<String>,
        kind: TextureKind,
        content: TextureContent,
        width: u32,
        height: u32,
    ) -> Self {
        let texture = Self::new(label, kind, content);
        texture.upload(driver, width, height, &[]);
        texture
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn content(&self) -> TextureContent {
        self.content
    }

    #[inline]
    #[must_use]
    pub fn stereo_mode(&self) -> StereoMode {
        self.stereo_mode
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        let substrate = self.substrate.borrow();
        (substrate.width, substrate.height)
    }

    /// (Re)allocates GPU storage. `planes` holds the texel data of each
    /// plane; missing entries leave the plane uninitialised.
    pub fn upload(&self, driver: &mut dyn Driver, width: u32, height: u32, planes: &[&[u8]]) {
        let mut substrate = self.substrate.borrow_mut();
        substrate.release();

        let formats: &[TextureFormat] = match self.content {
            TextureContent::Image => &[TextureFormat::Rgba8],
            TextureContent::YCbCr => &[TextureFormat::R8, TextureFormat::Rg8],
            TextureContent::Text => &[TextureFormat::R8],
        };
        for (i, &format) in formats.iter().enumerate() {
            // Chroma is stored at half resolution.
            let (w, h) = if i == 0 { (width, height) } else { ((width / 2).max(1), (height / 2).max(1)) };
            let desc = TextureDesc {
                label: format!("{}#{i}", self.label),
                kind: self.kind,
                format,
                width: w,
                height: h,
            };
            let handle = driver.new_texture(&desc, planes.get(i).copied());
            substrate.planes.push(handle);
        }
        substrate.context = driver.context().downgrade();
        substrate.width = width;
        substrate.height = height;
    }

    /// Drops the GPU storage; bindings fall back to placeholders.
    pub fn evict(&self) {
        self.substrate.borrow_mut().release();
    }

    /// Handle of `plane`, if the substrate exists and belongs to a live
    /// context.
    #[must_use]
    pub fn plane(&self, plane: usize) -> Option<TextureHandle> {
        let substrate = self.substrate.borrow();
        if !substrate.context.is_valid() {
            return None;
        }
        substrate.planes.get(plane).copied()
    }

    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.plane(0).is_some()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.substrate.get_mut().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::HeadlessDriver;

    #[test]
    fn test_texture_without_substrate_is_not_resident() {
        let texture = Texture::new("video", TextureKind::Texture2D, TextureContent::YCbCr);
        assert!(!texture.is_resident());
        assert_eq!(texture.plane(1), None);
    }

    #[test]
    fn test_ycbcr_allocates_two_planes() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let texture = Texture::create(
            &mut driver,
            "video",
            TextureKind::Texture2D,
            TextureContent::YCbCr,
            64,
            32,
        );
        assert!(texture.plane(0).is_some());
        assert!(texture.plane(1).is_some());
        assert_ne!(texture.plane(0), texture.plane(1));
    }

    #[test]
    fn test_context_loss_drops_residency() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let texture = Texture::create(
            &mut driver,
            "image",
            TextureKind::Texture2D,
            TextureContent::Image,
            8,
            8,
        );
        driver.lose_context();
        assert!(!texture.is_resident());
    }
}
