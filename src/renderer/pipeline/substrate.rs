//! Material Substrate
//!
//! The GPU-side state of a material: one [`MaterialShaderBinding`] per
//! lighting key it has been rendered under. The substrate watches three
//! versions and rebuilds only what each one invalidates:
//!
//! - material shader version: capability key, all bindings dropped
//! - factory epoch (context loss): all bindings dropped
//! - material texture version: texture references reloaded in place

use std::collections::hash_map::Entry;

use log::debug;
use rustc_hash::FxHashMap;

use super::binding::MaterialShaderBinding;
use super::capabilities::{LightingCapabilities, MaterialCapabilities, derive_material_capabilities};
use crate::errors::Result;
use crate::renderer::core::Driver;
use crate::resources::material::Material;

#[derive(Debug, Default)]
pub struct MaterialSubstrate {
    capabilities: Option<MaterialCapabilities>,
    shader_version: u64,
    texture_version: u64,
    factory_epoch: u64,
    bindings: FxHashMap<LightingCapabilities, MaterialShaderBinding>,
}

impl MaterialSubstrate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The binding for `lighting`, created on first use.
    pub fn binding(
        &mut self,
        material: &Material,
        lighting: LightingCapabilities,
        driver: &mut dyn Driver,
    ) -> Result<&MaterialShaderBinding> {
        let epoch = driver.shader_factory().epoch();
        if self.capabilities.is_none()
            || self.shader_version != material.shader_version()
            || self.factory_epoch != epoch
        {
            if !self.bindings.is_empty() {
                debug!("Material {} changed capabilities, dropping bindings", material.id());
            }
            self.bindings.clear();
            self.capabilities = Some(derive_material_capabilities(material));
            self.shader_version = material.shader_version();
            self.texture_version = material.texture_version();
            self.factory_epoch = epoch;
        }

        if self.texture_version != material.texture_version() {
            for binding in self.bindings.values_mut() {
                binding.load_textures(material);
            }
            self.texture_version = material.texture_version();
        }

        let binding = match self.bindings.entry(lighting) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let capabilities = self
                    .capabilities
                    .get_or_insert_with(|| derive_material_capabilities(material));
                let program = driver
                    .shader_factory()
                    .get_shader(capabilities, &lighting, material.modifiers())?;
                entry.insert(MaterialShaderBinding::new(program, lighting, material))
            }
        };
        Ok(binding)
    }

    /// Derived key of the material, once it has been rendered.
    #[must_use]
    pub fn capabilities(&self) -> Option<&MaterialCapabilities> {
        self.capabilities.as_ref()
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}
