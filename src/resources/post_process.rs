//! Post-Process Effect Catalogue
//!
//! User-selectable full-screen effects applied to the tone-mapped image,
//! before the final blit. Effects are identified by stable lowercase names so they can
//! be toggled from configuration files and bridge layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::MirageError;

/// A built-in image effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcessEffect {
    Grayscale,
    Sepia,
    SinCity,
    BarrelDistortion,
    PincushionDistortion,
    ThermalVision,
    CrossHatching,
    Toon,
    Emboss,
}

impl PostProcessEffect {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Sepia => "sepia",
            Self::SinCity => "sin_city",
            Self::BarrelDistortion => "barrel_distortion",
            Self::PincushionDistortion => "pincushion_distortion",
            Self::ThermalVision => "thermal_vision",
            Self::CrossHatching => "cross_hatching",
            Self::Toon => "toon",
            Self::Emboss => "emboss",
        }
    }

    /// Value of the `EFFECT` define selecting the branch in `post_effect.wgsl`.
    #[must_use]
    pub fn define_value(self) -> &'static str {
        match self {
            Self::Grayscale => "GRAYSCALE",
            Self::Sepia => "SEPIA",
            Self::SinCity => "SIN_CITY",
            Self::BarrelDistortion => "BARREL",
            Self::PincushionDistortion => "PINCUSHION",
            Self::ThermalVision => "THERMAL",
            Self::CrossHatching => "CROSS_HATCH",
            Self::Toon => "TOON",
            Self::Emboss => "EMBOSS",
        }
    }

    #[must_use]
    pub fn all() -> &'static [PostProcessEffect] {
        &[
            Self::Grayscale,
            Self::Sepia,
            Self::SinCity,
            Self::BarrelDistortion,
            Self::PincushionDistortion,
            Self::ThermalVision,
            Self::CrossHatching,
            Self::Toon,
            Self::Emboss,
        ]
    }
}

impl fmt::Display for PostProcessEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PostProcessEffect {
    type Err = MirageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::all()
            .iter()
            .copied()
            .find(|effect| effect.name() == normalized || effect.name().replace('_', "") == normalized)
            .ok_or_else(|| MirageError::UnknownPostProcessEffect(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("grayscale".parse::<PostProcessEffect>().ok(), Some(PostProcessEffect::Grayscale));
        assert_eq!("Sin City".parse::<PostProcessEffect>().ok(), Some(PostProcessEffect::SinCity));
        assert_eq!("thermalvision".parse::<PostProcessEffect>().ok(), Some(PostProcessEffect::ThermalVision));
        assert!("vignette".parse::<PostProcessEffect>().is_err());
    }

    #[test]
    fn test_names_round_trip() {
        for effect in PostProcessEffect::all() {
            assert_eq!(effect.name().parse::<PostProcessEffect>().ok(), Some(*effect));
        }
    }
}
