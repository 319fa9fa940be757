//! GPU Context Liveness
//!
//! [`GpuContext`] is the token every driver-tied object keeps a weak reference
//! to. When an object is dropped it enqueues its GPU deletion only if the
//! context that created it is still alive and has not been recreated since;
//! host-side accounting is updated either way.
//!
//! The driver drains the queue once per frame in
//! [`Driver::collect_garbage`](super::Driver::collect_garbage), on the thread
//! that owns the context.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::debug;

use super::types::{BufferHandle, GeometryHandle, RenderTargetHandle, ShaderHandle, TextureHandle};

/// A GPU object awaiting deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuResource {
    RenderTarget(RenderTargetHandle),
    Texture(TextureHandle),
    Shader(ShaderHandle),
    Buffer(BufferHandle),
    Geometry(GeometryHandle),
}

/// Host-side resource accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub render_targets: u32,
    pub shaders: u32,
    pub buffers: u32,
    pub textures: u32,
    /// Total render-target allocations ever performed.
    pub render_target_allocations: u64,
    /// Total successful shader compilations ever performed.
    pub shader_compilations: u64,
    /// Deletions dropped because the owning context was gone.
    pub skipped_deletions: u64,
}

#[derive(Debug, Default)]
struct ContextState {
    generation: u64,
    alive: bool,
    pending: Vec<GpuResource>,
    stats: ResourceStats,
}

/// Shared liveness token of one GPU context.
#[derive(Debug, Clone)]
pub struct GpuContext {
    state: Rc<RefCell<ContextState>>,
}

impl Default for GpuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ContextState {
                alive: true,
                ..Default::default()
            })),
        }
    }

    /// Weak reference stamped with the current generation.
    #[must_use]
    pub fn downgrade(&self) -> ContextRef {
        ContextRef {
            state: Rc::downgrade(&self.state),
            generation: self.generation(),
        }
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state.borrow().alive
    }

    /// Marks the context lost. Objects created before this point will not
    /// issue deletions; the pending queue is discarded.
    pub fn invalidate(&self) {
        let mut state = self.state.borrow_mut();
        state.alive = false;
        state.pending.clear();
    }

    /// Starts a fresh generation after the backend recreated its context.
    pub fn restore(&self) {
        let mut state = self.state.borrow_mut();
        state.generation += 1;
        state.alive = true;
        state.pending.clear();
        debug!("GPU context restored, generation {}", state.generation);
    }

    /// Takes all pending deletions.
    #[must_use]
    pub fn drain_pending(&self) -> Vec<GpuResource> {
        std::mem::take(&mut self.state.borrow_mut().pending)
    }

    #[must_use]
    pub fn stats(&self) -> ResourceStats {
        self.state.borrow().stats
    }

    /// Records a new allocation in the host-side accounting.
    pub fn track_allocation(&self, resource: GpuResource) {
        let mut state = self.state.borrow_mut();
        let stats = &mut state.stats;
        match resource {
            GpuResource::RenderTarget(_) => {
                stats.render_targets += 1;
                stats.render_target_allocations += 1;
            }
            GpuResource::Shader(_) => {
                stats.shaders += 1;
                stats.shader_compilations += 1;
            }
            GpuResource::Buffer(_) => stats.buffers += 1,
            GpuResource::Texture(_) => stats.textures += 1,
            GpuResource::Geometry(_) => {}
        }
    }
}

/// Non-owning, generation-stamped handle to a [`GpuContext`].
#[derive(Debug, Clone, Default)]
pub struct ContextRef {
    state: Weak<RefCell<ContextState>>,
    generation: u64,
}

impl ContextRef {
    /// True while the context exists, is alive and is still in the
    /// generation this reference was taken in.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state.upgrade().is_some_and(|state| {
            let state = state.borrow();
            state.alive && state.generation == self.generation
        })
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Same context as `ctx`, in any generation.
    #[must_use]
    pub fn belongs_to(&self, ctx: &GpuContext) -> bool {
        self.state.upgrade().is_some_and(|state| Rc::ptr_eq(&state, &ctx.state))
    }

    /// Releases a GPU object. The deletion is queued only if the context is
    /// still valid; accounting is updated in every case where the context
    /// itself still exists.
    pub fn release(&self, resource: GpuResource) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = state.borrow_mut();
        let queue = state.alive && state.generation == self.generation;

        let stats = &mut state.stats;
        match resource {
            GpuResource::RenderTarget(_) => stats.render_targets = stats.render_targets.saturating_sub(1),
            GpuResource::Shader(_) => stats.shaders = stats.shaders.saturating_sub(1),
            GpuResource::Buffer(_) => stats.buffers = stats.buffers.saturating_sub(1),
            GpuResource::Texture(_) => stats.textures = stats.textures.saturating_sub(1),
            GpuResource::Geometry(_) => {}
        }

        if queue {
            state.pending.push(resource);
        } else {
            state.stats.skipped_deletions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn shader_handle() -> ShaderHandle {
        let mut map: SlotMap<ShaderHandle, ()> = SlotMap::with_key();
        map.insert(())
    }

    #[test]
    fn test_release_queues_while_alive() {
        let ctx = GpuContext::new();
        let handle = shader_handle();
        ctx.track_allocation(GpuResource::Shader(handle));

        let weak = ctx.downgrade();
        weak.release(GpuResource::Shader(handle));

        assert_eq!(ctx.drain_pending(), vec![GpuResource::Shader(handle)]);
        assert_eq!(ctx.stats().shaders, 0);
    }

    #[test]
    fn test_release_after_context_loss_is_skipped() {
        let ctx = GpuContext::new();
        let handle = shader_handle();
        ctx.track_allocation(GpuResource::Shader(handle));
        let weak = ctx.downgrade();

        ctx.invalidate();
        weak.release(GpuResource::Shader(handle));

        assert!(ctx.drain_pending().is_empty());
        assert_eq!(ctx.stats().skipped_deletions, 1);
        assert_eq!(ctx.stats().shaders, 0, "accounting still updated");
    }

    #[test]
    fn test_old_generation_is_invalid() {
        let ctx = GpuContext::new();
        let weak = ctx.downgrade();
        assert!(weak.is_valid());

        ctx.restore();
        assert!(!weak.is_valid());
        assert!(weak.belongs_to(&ctx));
        assert!(ctx.downgrade().is_valid());
    }

    #[test]
    fn test_dropped_context_is_noop() {
        let weak = {
            let ctx = GpuContext::new();
            ctx.downgrade()
        };
        assert!(!weak.is_valid());
        weak.release(GpuResource::Shader(shader_handle()));
    }
}
