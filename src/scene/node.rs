//! Renderable Nodes
//!
//! A [`Renderable`] is one draw of the scene: geometry, material, transform
//! and the screen footprint used by emulating backends. Geometry uploads
//! lazily and re-uploads after context loss.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Mat4;

use crate::renderer::core::{
    ContextRef, DrawCall, Driver, GeometryData, GeometryHandle, GpuResource, ScreenRect,
};
use crate::renderer::pipeline::binding::GeometryUniforms;
use crate::resources::material::Material;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct GeometrySubstrate {
    handle: Option<GeometryHandle>,
    context: ContextRef,
}

/// Vertex data plus its GPU upload.
#[derive(Debug, Default)]
pub struct Geometry {
    data: GeometryData,
    substrate: RefCell<GeometrySubstrate>,
}

impl Geometry {
    #[must_use]
    pub fn new(data: GeometryData) -> Self {
        Self {
            data,
            substrate: RefCell::default(),
        }
    }

    #[must_use]
    pub fn data(&self) -> &GeometryData {
        &self.data
    }

    /// The uploaded geometry, uploading it first if needed.
    pub fn handle(&self, driver: &mut dyn Driver) -> GeometryHandle {
        let mut substrate = self.substrate.borrow_mut();
        if let Some(handle) = substrate.handle
            && substrate.context.is_valid()
        {
            return handle;
        }
        let handle = driver.new_geometry(&self.data);
        substrate.handle = Some(handle);
        substrate.context = driver.context().downgrade();
        handle
    }
}

impl Drop for Geometry {
    fn drop(&mut self) {
        let substrate = self.substrate.get_mut();
        if let Some(handle) = substrate.handle.take() {
            substrate.context.release(GpuResource::Geometry(handle));
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderable {
    id: u64,
    pub name: String,
    pub geometry: Rc<Geometry>,
    pub material: Rc<Material>,
    pub transform: Mat4,
    /// Screen footprint, `None` = whole target.
    pub coverage: Option<ScreenRect>,
    /// Normalized depth of the footprint, 0 = near.
    pub depth: f32,
    /// Identifies this renderable in emulated color buffers.
    pub tag: u32,
    /// Index of the drawn element within a multi-element node.
    pub element_index: u32,
    pub casts_shadow: bool,
}

impl Renderable {
    #[must_use]
    pub fn new(name: impl Into<String>, geometry: Rc<Geometry>, material: Rc<Material>) -> Self {
        Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            geometry,
            material,
            transform: Mat4::IDENTITY,
            coverage: None,
            depth: 0.5,
            tag: 0,
            element_index: 0,
            casts_shadow: true,
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn with_coverage(mut self, rect: ScreenRect) -> Self {
        self.coverage = Some(rect);
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    #[must_use]
    pub fn with_casts_shadow(mut self, casts: bool) -> Self {
        self.casts_shadow = casts;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn geometry_uniforms(&self) -> GeometryUniforms {
        GeometryUniforms::new(self.transform)
    }

    /// The draw submission for this renderable.
    pub fn draw_call(&self, driver: &mut dyn Driver) -> DrawCall {
        let mut call = DrawCall::geometry(self.geometry.handle(driver))
            .with_depth(self.depth)
            .with_tag(self.tag);
        call.coverage = self.coverage;
        call
    }
}
