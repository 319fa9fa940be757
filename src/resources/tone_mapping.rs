//! Tone Mapping Configuration
//!
//! Tone mapping methods and their parameters as pure data. The render pass
//! in [`crate::renderer::graph::passes::tone_mapping`] turns these into
//! shader defines and uniforms.

use serde::{Deserialize, Serialize};

use crate::resources::shader_defines::ShaderDefines;

/// Tone mapping operator applied when resolving the HDR target.
///
/// - [`Disabled`](ToneMappingMethod::Disabled): HDR values are clamped
/// - [`Linear`](ToneMappingMethod::Linear): exposure scale only
/// - [`Reinhard`](ToneMappingMethod::Reinhard): classic soft highlight rolloff
/// - [`Hable`](ToneMappingMethod::Hable): filmic curve applied per channel
/// - [`HableLuminanceOnly`](ToneMappingMethod::HableLuminanceOnly): filmic curve on luminance, preserving hue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMappingMethod {
    Disabled,
    Linear,
    Reinhard,
    #[default]
    Hable,
    HableLuminanceOnly,
}

impl ToneMappingMethod {
    /// Sets the `TONE_MAPPING_METHOD` define consumed by the tone mapping template.
    pub fn apply_to_defines(self, defines: &mut ShaderDefines) {
        let method = match self {
            Self::Disabled => "DISABLED",
            Self::Linear => "LINEAR",
            Self::Reinhard => "REINHARD",
            Self::Hable => "HABLE",
            Self::HableLuminanceOnly => "HABLE_LUMINANCE",
        };
        defines.set("TONE_MAPPING_METHOD", method);
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Linear => "Linear",
            Self::Reinhard => "Reinhard",
            Self::Hable => "Hable",
            Self::HableLuminanceOnly => "Hable (luminance)",
        }
    }

    #[must_use]
    pub fn all() -> &'static [ToneMappingMethod] {
        &[
            Self::Disabled,
            Self::Linear,
            Self::Reinhard,
            Self::Hable,
            Self::HableLuminanceOnly,
        ]
    }
}

/// Tone mapping parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMappingSettings {
    /// Selected operator
    pub method: ToneMappingMethod,
    /// Exposure multiplier applied before the curve
    pub exposure: f32,
    /// Linear white point of the filmic curves
    pub white_point: f32,
    /// Forces (`Some(true)`) or suppresses (`Some(false)`) gamma correction in
    /// the shader. `None` follows the driver: software gamma is applied only
    /// when the display target is not an sRGB framebuffer.
    pub software_gamma: Option<bool>,
    /// Scene surfaces write a per-pixel mask selecting which pixels are tone
    /// mapped; unmasked pixels pass through unchanged.
    pub masking: bool,
}

impl Default for ToneMappingSettings {
    fn default() -> Self {
        Self {
            method: ToneMappingMethod::default(),
            exposure: 1.5,
            white_point: 11.2,
            software_gamma: None,
            masking: false,
        }
    }
}

impl ToneMappingSettings {
    /// Resolves whether the tone mapping shader must encode gamma itself.
    #[must_use]
    pub fn needs_software_gamma(&self, srgb_framebuffer: bool) -> bool {
        self.software_gamma.unwrap_or(!srgb_framebuffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_defines() {
        let mut defines = ShaderDefines::new();
        ToneMappingMethod::Reinhard.apply_to_defines(&mut defines);
        assert_eq!(defines.get("TONE_MAPPING_METHOD"), Some("REINHARD".to_string()));

        ToneMappingMethod::HableLuminanceOnly.apply_to_defines(&mut defines);
        assert_eq!(
            defines.get("TONE_MAPPING_METHOD"),
            Some("HABLE_LUMINANCE".to_string())
        );
    }

    #[test]
    fn test_software_gamma_follows_framebuffer() {
        let settings = ToneMappingSettings::default();
        assert!(settings.needs_software_gamma(false));
        assert!(!settings.needs_software_gamma(true));

        let forced = ToneMappingSettings {
            software_gamma: Some(true),
            ..Default::default()
        };
        assert!(forced.needs_software_gamma(true));
    }
}
