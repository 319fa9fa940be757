//! Shader Programs
//!
//! A [`ShaderProgram`] is created from generated source without touching
//! the GPU. It is compiled ("hydrated") the first time it is bound, because
//! the factory may build programs before a context exists. Hydration is
//! repeated when the context generation changes; a compile failure is
//! permanent and turns every later bind into a no-op returning `false`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use super::modifier::ShaderModifier;
use crate::renderer::core::{
    ContextRef, Driver, GpuResource, SamplerDecl, ShaderHandle, ShaderSource, UniformDecl,
    UniformSlot, UniformValue,
};

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
enum ProgramState {
    Uncompiled,
    Compiled { handle: ShaderHandle, context: ContextRef },
    Failed(String),
}

/// A generated program and its lazily created GPU object.
#[derive(Debug)]
pub struct ShaderProgram {
    id: u64,
    source: ShaderSource,
    modifiers: Vec<Rc<ShaderModifier>>,
    state: RefCell<ProgramState>,
}

impl ShaderProgram {
    #[must_use]
    pub fn new(source: ShaderSource) -> Self {
        Self::with_modifiers(source, Vec::new())
    }

    /// A program generated with `modifiers`; their uniform binders are
    /// picked up by [`MaterialShaderBinding`](super::binding::MaterialShaderBinding).
    #[must_use]
    pub fn with_modifiers(source: ShaderSource, modifiers: Vec<Rc<ShaderModifier>>) -> Self {
        Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            source,
            modifiers,
            state: RefCell::new(ProgramState::Uncompiled),
        }
    }

    /// Process-unique id, used in sort keys.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.source.name
    }

    #[inline]
    #[must_use]
    pub fn source(&self) -> &ShaderSource {
        &self.source
    }

    #[inline]
    #[must_use]
    pub fn modifiers(&self) -> &[Rc<ShaderModifier>] {
        &self.modifiers
    }

    #[inline]
    #[must_use]
    pub fn uniforms(&self) -> &[UniformDecl] {
        &self.source.uniforms
    }

    #[inline]
    #[must_use]
    pub fn samplers(&self) -> &[SamplerDecl] {
        &self.source.samplers
    }

    /// Stable slot of the uniform called `name`.
    #[must_use]
    pub fn uniform_slot(&self, name: &str) -> Option<UniformSlot> {
        self.source
            .uniforms
            .iter()
            .position(|u| u.name == name)
            .map(|i| UniformSlot(i as u32))
    }

    /// Texture unit of the sampler called `name`.
    #[must_use]
    pub fn sampler_unit(&self, name: &str) -> Option<u32> {
        self.source
            .samplers
            .iter()
            .position(|s| s.name == name)
            .map(|i| i as u32)
    }

    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        match &*self.state.borrow() {
            ProgramState::Compiled { context, .. } => context.is_valid(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(&*self.state.borrow(), ProgramState::Failed(_))
    }

    /// Compiler log of a failed program.
    #[must_use]
    pub fn failure_log(&self) -> Option<String> {
        match &*self.state.borrow() {
            ProgramState::Failed(log) => Some(log.clone()),
            _ => None,
        }
    }

    /// Compiles the program if it has no valid GPU object yet. Returns
    /// whether the program is usable.
    pub fn hydrate(&self, driver: &mut dyn Driver) -> bool {
        let mut state = self.state.borrow_mut();
        match &*state {
            ProgramState::Failed(_) => return false,
            ProgramState::Compiled { context, .. } if context.is_valid() => return true,
            _ => {}
        }

        match driver.compile_shader(&self.source) {
            Ok(handle) => {
                debug!("Hydrated program '{}'", self.source.name);
                *state = ProgramState::Compiled {
                    handle,
                    context: driver.context().downgrade(),
                };
                true
            }
            Err(log) => {
                warn!("Program '{}' failed to compile: {log}", self.source.name);
                *state = ProgramState::Failed(log);
                false
            }
        }
    }

    /// Hydrates and binds. Returns `false` when the program cannot be used;
    /// the caller skips its draw.
    pub fn bind(&self, driver: &mut dyn Driver) -> bool {
        if !self.hydrate(driver) {
            return false;
        }
        match &*self.state.borrow() {
            ProgramState::Compiled { handle, .. } => {
                driver.bind_shader(*handle);
                true
            }
            _ => false,
        }
    }

    /// Convenience for image passes: sets a uniform by name on the bound
    /// program. Unknown names are ignored.
    pub fn set_uniform(&self, driver: &mut dyn Driver, name: &str, value: UniformValue) {
        if let Some(slot) = self.uniform_slot(name) {
            driver.set_uniform(slot, value);
        }
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        if let ProgramState::Compiled { handle, context } = self.state.get_mut() {
            context.release(GpuResource::Shader(*handle));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::{HeadlessDriver, UniformType, VertexLayout};

    fn source(name: &str) -> ShaderSource {
        ShaderSource {
            name: name.to_string(),
            wgsl: "@fragment fn fs_main() {}".to_string(),
            uniforms: vec![
                UniformDecl::new("a", UniformType::Float),
                UniformDecl::new("b", UniformType::Vec4),
            ],
            samplers: Vec::new(),
            vertex_layout: VertexLayout::Fullscreen,
            uses_lighting: false,
            color_outputs: 1,
        }
    }

    #[test]
    fn test_hydration_is_deferred_until_bind() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let program = ShaderProgram::new(source("deferred"));
        assert!(!program.is_hydrated());
        assert_eq!(driver.live_shaders(), 0);

        assert!(program.bind(&mut driver));
        assert!(program.is_hydrated());
        assert!(program.bind(&mut driver));
        assert_eq!(driver.live_shaders(), 1, "second bind must not recompile");
    }

    #[test]
    fn test_failure_is_permanent() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        driver.fail_shaders_named("broken");
        let program = ShaderProgram::new(source("broken_program"));

        assert!(!program.bind(&mut driver));
        assert!(program.is_failed());
        assert!(program.failure_log().is_some());
        assert!(!program.bind(&mut driver));
    }

    #[test]
    fn test_context_loss_rehydrates() {
        let mut driver = HeadlessDriver::new(4, 4).unwrap();
        let program = ShaderProgram::new(source("survivor"));
        assert!(program.bind(&mut driver));

        driver.lose_context();
        assert!(!program.is_hydrated());
        assert!(program.bind(&mut driver));
        assert!(program.is_hydrated());
    }

    #[test]
    fn test_slots_follow_declaration_order() {
        let program = ShaderProgram::new(source("slots"));
        assert_eq!(program.uniform_slot("b"), Some(UniformSlot(1)));
        assert_eq!(program.uniform_slot("missing"), None);
    }
}
