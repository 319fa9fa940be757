//! Bloom Configuration
//!
//! Bloom is produced by a separable gaussian blur over the bright-pass
//! attachment written by bloom-enabled materials, followed by an additive
//! combine with the scene color. This module holds the tunables as pure data;
//! the weights themselves are generated numerically by
//! [`GaussianKernel::calculate`](crate::renderer::graph::passes::gaussian_blur::GaussianKernel::calculate).

use serde::{Deserialize, Serialize};

use crate::errors::{MirageError, Result};

/// Gaussian bloom parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    /// Number of taps of the full (unhalved) kernel. Must be odd.
    ///
    /// Default: `21`
    pub kernel_size: u32,

    /// Standard deviation of the sampled gaussian, in texels.
    ///
    /// Default: `5.0`
    pub sigma: f32,

    /// Number of separable blur passes (horizontal, vertical, ...).
    /// Must be even so the result lands in the second ping-pong buffer.
    ///
    /// Default: `4`
    pub iterations: u32,

    /// Collapse adjacent taps into single bilinear fetches.
    ///
    /// Default: `true`
    pub bilinear: bool,

    /// Blur targets are allocated at `viewport / downscale`.
    ///
    /// Default: `1`
    pub downscale: u32,

    /// Luminance above which bloom-enabled materials write into the bright-pass
    /// attachment.
    ///
    /// Default: `1.0`
    pub threshold: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            kernel_size: 21,
            sigma: 5.0,
            iterations: 4,
            bilinear: true,
            downscale: 1,
            threshold: 1.0,
        }
    }
}

impl BloomSettings {
    /// Checks the structural constraints of the blur chain.
    pub fn validate(&self) -> Result<()> {
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(MirageError::InvalidKernel(format!(
                "kernel size must be odd, got {}",
                self.kernel_size
            )));
        }
        if self.sigma <= 0.0 {
            return Err(MirageError::InvalidKernel(format!(
                "sigma must be positive, got {}",
                self.sigma
            )));
        }
        if self.iterations == 0 || self.iterations % 2 != 0 {
            return Err(MirageError::InvalidSettings(format!(
                "bloom blur iterations must be a positive even number, got {}",
                self.iterations
            )));
        }
        if self.downscale == 0 {
            return Err(MirageError::InvalidSettings(
                "bloom downscale must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Size of one blur target for a given viewport.
    #[must_use]
    pub fn blur_extent(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = self.downscale.max(1);
        ((width / scale).max(1), (height / scale).max(1))
    }
}
