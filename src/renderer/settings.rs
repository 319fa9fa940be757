//! Renderer Settings
//!
//! Configuration for the frame pipeline assembled by the
//! [`Choreographer`](crate::renderer::graph::Choreographer) and the preprocess
//! tasks. Settings are plain data, serializable with serde so they can be
//! loaded from JSON configuration:
//!
//! ```rust,ignore
//! use mirage::renderer::settings::RendererSettings;
//!
//! let settings = RendererSettings::from_json_str(r#"{ "bloom_enabled": false }"#)?;
//! assert!(settings.hdr_enabled);
//! ```
//!
//! # Pipeline Topology
//!
//! | Flag            | Off                                  | On                                             |
//! |-----------------|--------------------------------------|------------------------------------------------|
//! | `hdr_enabled`   | scene renders straight to the output | scene renders to a float target, tone mapped   |
//! | `bloom_enabled` | n/a                                  | bright-pass attachment, blur, additive combine |
//! | `use_blit`      | final pass writes the display        | final pass writes a capture target, then blits |
//!
//! Bloom requires HDR; it is ignored when `hdr_enabled` is off.

use serde::{Deserialize, Serialize};

use crate::errors::{MirageError, Result};
use crate::resources::bloom::BloomSettings;
use crate::resources::post_process::PostProcessEffect;
use crate::resources::tone_mapping::ToneMappingSettings;

/// Shadow-map allocation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Upper bound on the shared shadow array resolution.
    ///
    /// Default: `2048`
    pub max_map_size: u32,

    /// Resolution floor for allocation retries. Allocation failures below
    /// this size disable shadows for the frame.
    ///
    /// Default: `256`
    pub min_map_size: u32,

    /// Number of layers in the shared shadow array; lights beyond this
    /// count do not cast shadows.
    ///
    /// Default: `8`
    pub max_shadow_lights: u32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            max_map_size: 2048,
            min_map_size: 256,
            max_shadow_lights: 8,
        }
    }
}

/// Target sizes of the image-based lighting precompute chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IblSettings {
    /// Face size of the cube map reprojected from an equirectangular source.
    pub cube_size: u32,
    /// Face size of the diffuse irradiance cube.
    pub irradiance_size: u32,
    /// Face size of mip 0 of the prefiltered specular cube.
    pub prefilter_size: u32,
    /// Number of roughness levels in the prefiltered cube.
    pub prefilter_mip_levels: u32,
    /// Edge length of the BRDF integration LUT.
    pub brdf_lut_size: u32,
}

impl Default for IblSettings {
    fn default() -> Self {
        Self {
            cube_size: 512,
            irradiance_size: 32,
            prefilter_size: 128,
            prefilter_mip_levels: 5,
            brdf_lut_size: 512,
        }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Render the scene into floating-point targets and tone map.
    pub hdr_enabled: bool,
    /// Allow physically based lighting models.
    pub pbr_enabled: bool,
    /// Enable the bloom chain (requires HDR).
    pub bloom_enabled: bool,
    /// Enable shadow-map preprocessing.
    pub shadows_enabled: bool,
    /// Route the final image through an intermediate capture target.
    pub use_blit: bool,
    /// Color the scene target is cleared to each frame.
    pub clear_color: [f32; 4],

    pub shadows: ShadowSettings,
    pub bloom: BloomSettings,
    pub tone_mapping: ToneMappingSettings,
    pub ibl: IblSettings,

    /// User effects applied in order to the tone-mapped image.
    pub post_process_effects: Vec<PostProcessEffect>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            hdr_enabled: true,
            pbr_enabled: true,
            bloom_enabled: true,
            shadows_enabled: true,
            use_blit: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shadows: ShadowSettings::default(),
            bloom: BloomSettings::default(),
            tone_mapping: ToneMappingSettings::default(),
            ibl: IblSettings::default(),
            post_process_effects: Vec::new(),
        }
    }
}

impl RendererSettings {
    /// Parses and validates settings from JSON. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.bloom.validate()?;

        if self.shadows.min_map_size == 0 || self.shadows.min_map_size > self.shadows.max_map_size {
            return Err(MirageError::InvalidSettings(format!(
                "shadow min size {} must be in 1..={}",
                self.shadows.min_map_size, self.shadows.max_map_size
            )));
        }
        if self.shadows.max_shadow_lights == 0 {
            return Err(MirageError::InvalidSettings(
                "max_shadow_lights must be at least 1".to_string(),
            ));
        }
        if self.ibl.prefilter_mip_levels == 0 {
            return Err(MirageError::InvalidSettings(
                "prefilter_mip_levels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the bloom chain actually runs.
    #[inline]
    #[must_use]
    pub fn bloom_active(&self) -> bool {
        self.hdr_enabled && self.bloom_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = RendererSettings::from_json_str(
            r#"{ "bloom_enabled": false, "shadows": { "max_map_size": 1024 } }"#,
        )
        .unwrap();

        assert!(settings.hdr_enabled);
        assert!(!settings.bloom_enabled);
        assert_eq!(settings.shadows.max_map_size, 1024);
        assert_eq!(settings.shadows.min_map_size, 256);
    }

    #[test]
    fn test_effects_by_name() {
        let settings =
            RendererSettings::from_json_str(r#"{ "post_process_effects": ["sepia", "toon"] }"#)
                .unwrap();
        assert_eq!(
            settings.post_process_effects,
            vec![PostProcessEffect::Sepia, PostProcessEffect::Toon]
        );
    }

    #[test]
    fn test_validation_rejects_odd_blur_iterations() {
        let result = RendererSettings::from_json_str(r#"{ "bloom": { "iterations": 5 } }"#);
        assert!(matches!(result, Err(MirageError::InvalidSettings(_))));
    }

    #[test]
    fn test_bloom_requires_hdr() {
        let settings = RendererSettings {
            hdr_enabled: false,
            ..Default::default()
        };
        assert!(!settings.bloom_active());
    }
}
