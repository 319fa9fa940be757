//! Gaussian Blur Pass
//!
//! Separable blur used by the bloom chain.
//!
//! # Kernel
//!
//! Weights are generated numerically rather than hand-authored. Each tap
//! integrates the continuous gaussian over its one-texel bin with Simpson's
//! rule at sub-bin resolution. Weights are optionally normalized and are
//! rounded to 6 decimals so the generated shader constants are stable.
//! Only the center and the right half are kept; the shader mirrors them.
//!
//! With bilinear sampling, adjacent taps `(1, 2), (3, 4), ...` collapse into
//! one fetch placed between them, weighted so the hardware interpolation
//! reproduces both taps.
//!
//! # Ping-pong
//!
//! ```text
//! G_Input ─H─► A ─V─► B ─H─► A ─V─► B  (RT_Output)
//! ```
//!
//! The iteration count must be even so the result lands in `G_PingPongB`.

use std::fmt::Write;
use std::rc::Rc;

use glam::Vec2;
use log::warn;

use crate::errors::{MirageError, Result};
use crate::renderer::core::{
    Driver, RenderTarget, RenderTargetSelection, SamplerDecl, TextureHandle, TextureKind,
    UniformDecl, UniformType, UniformValue,
};
use crate::renderer::graph::context::RenderContext;
use crate::renderer::graph::image_post::ImagePostProcess;
use crate::renderer::graph::io::{Channel, RenderPassIo};
use crate::renderer::graph::pass::RenderPass;
use crate::renderer::pipeline::shader_gen::ProgramTemplate;
use crate::resources::bloom::BloomSettings;
use crate::resources::shader_defines::ShaderDefines;
use crate::scene::Scene;

/// Total number of Simpson samples spread over the whole kernel.
const KERNEL_SAMPLES: u32 = 1000;

/// Half of a symmetric gaussian kernel: center first.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    pub weights: Vec<f32>,
    /// Offsets in texels from the center; integral unless bilinear.
    pub offsets: Vec<f32>,
}

impl GaussianKernel {
    /// Generates the kernel for `size` taps (odd) and standard deviation
    /// `sigma` in texels.
    pub fn calculate(size: u32, sigma: f32, normalized: bool, bilinear: bool) -> Result<Self> {
        if size == 0 || size % 2 == 0 {
            return Err(MirageError::InvalidKernel(format!(
                "kernel size must be odd, got {size}"
            )));
        }
        if sigma <= 0.0 || !sigma.is_finite() {
            return Err(MirageError::InvalidKernel(format!(
                "sigma must be positive, got {sigma}"
            )));
        }

        let mut samples_per_bin = KERNEL_SAMPLES.div_ceil(size);
        if samples_per_bin % 2 == 0 {
            samples_per_bin += 1;
        }

        let sigma = f64::from(sigma);
        let gaussian = |x: f64| {
            (-(x * x) / (2.0 * sigma * sigma)).exp() / ((2.0 * std::f64::consts::PI).sqrt() * sigma)
        };

        let half = f64::from(size / 2);
        let mut full: Vec<f64> = (0..size)
            .map(|tap| {
                let left = f64::from(tap) - half - 0.5;
                simpson(&gaussian, left, left + 1.0, samples_per_bin)
            })
            .collect();

        if normalized {
            let sum: f64 = full.iter().sum();
            for w in &mut full {
                *w /= sum;
            }
        }
        let mut right: Vec<f64> = full[(size / 2) as usize..].iter().map(|w| quantize(*w)).collect();
        if normalized {
            // The center absorbs the rounding residue so the mirrored kernel sums to one.
            let rest: f64 = right.iter().skip(1).sum();
            right[0] = quantize(1.0 - 2.0 * rest);
        }

        let (weights, offsets) = if bilinear {
            collapse_bilinear(&right)
        } else {
            let offsets = (0..right.len()).map(|i| i as f64).collect();
            (right, offsets)
        };

        Ok(Self {
            weights: weights.into_iter().map(|w| w as f32).collect(),
            offsets: offsets.into_iter().map(|o| o as f32).collect(),
        })
    }

    #[inline]
    #[must_use]
    pub fn tap_count(&self) -> usize {
        self.weights.len()
    }

    /// Center weight plus both mirrored halves.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        let rest: f64 = self.weights.iter().skip(1).map(|w| f64::from(*w)).sum();
        self.weights.first().map_or(0.0, |w| f64::from(*w)) + 2.0 * rest
    }

    /// Shader defines consumed by the `gaussian_blur` template.
    #[must_use]
    pub fn defines(&self, horizontal: bool) -> ShaderDefines {
        let list = |values: &[f32]| {
            let mut out = String::new();
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{v:.6}");
            }
            out
        };
        let mut defines = ShaderDefines::new();
        defines.set("TAP_COUNT", &self.tap_count().to_string());
        defines.set("WEIGHTS", &list(&self.weights));
        defines.set("OFFSETS", &list(&self.offsets));
        defines.enable_if("HORIZONTAL", horizontal);
        defines
    }
}

/// Rounds to 6 decimals so the weights are stable as shader constants.
fn quantize(w: f64) -> f64 {
    (w * 1e6).round() / 1e6
}

/// Composite Simpson integration of `f` over `[a, b]` with `samples` points
/// (odd).
fn simpson(f: &dyn Fn(f64) -> f64, a: f64, b: f64, samples: u32) -> f64 {
    let intervals = samples - 1;
    let h = (b - a) / f64::from(intervals);
    let mut sum = f(a) + f(b);
    for i in 1..intervals {
        let x = a + f64::from(i) * h;
        sum += if i % 2 == 1 { 4.0 * f(x) } else { 2.0 * f(x) };
    }
    sum * h / 3.0
}

fn collapse_bilinear(right: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut weights = vec![right[0]];
    let mut offsets = vec![0.0];
    let mut i = 1;
    while i < right.len() {
        if i + 1 < right.len() {
            let (w1, w2) = (right[i], right[i + 1]);
            let w = w1 + w2;
            let offset = if w > 0.0 {
                (i as f64 * w1 + (i + 1) as f64 * w2) / w
            } else {
                i as f64
            };
            weights.push(w);
            offsets.push(offset);
            i += 2;
        } else {
            weights.push(right[i]);
            offsets.push(i as f64);
            i += 1;
        }
    }
    (weights, offsets)
}

const INPUTS: &[Channel] = &[
    Channel::GaussianInput,
    Channel::GaussianPingPongA,
    Channel::GaussianPingPongB,
];

#[derive(Debug)]
pub struct GaussianBlurRenderPass {
    kernel: GaussianKernel,
    iterations: u32,
}

impl GaussianBlurRenderPass {
    pub fn new(settings: &BloomSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            kernel: GaussianKernel::calculate(settings.kernel_size, settings.sigma, true, settings.bilinear)?,
            iterations: settings.iterations,
        })
    }

    #[must_use]
    pub fn kernel(&self) -> &GaussianKernel {
        &self.kernel
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn program(&self, driver: &mut dyn Driver, horizontal: bool) -> Result<ImagePostProcess> {
        let name = if horizontal { "gaussian_blur_h" } else { "gaussian_blur_v" };
        let program = driver.shader_factory().image_program(
            ProgramTemplate::image("gaussian_blur", name)
                .with_defines(self.kernel.defines(horizontal))
                .with_uniforms([UniformDecl::new("texel_size", UniformType::Vec2)])
                .with_samplers([SamplerDecl::new("source", TextureKind::Texture2D)]),
        )?;
        Ok(driver.new_image_post_process(program))
    }

    fn target(&self, io: &RenderPassIo, channel: Channel) -> Result<Rc<RenderTarget>> {
        self.input(io, channel)?
            .target()
            .cloned()
            .ok_or_else(|| MirageError::InvariantViolation(format!("{channel} must be a render target")))
    }
}

impl RenderPass for GaussianBlurRenderPass {
    fn name(&self) -> &'static str {
        "gaussian_blur"
    }

    fn inputs(&self) -> &'static [Channel] {
        INPUTS
    }

    fn render(
        &mut self,
        _scene: &dyn Scene,
        _outgoing: Option<&dyn Scene>,
        io: &mut RenderPassIo,
        _ctx: &RenderContext,
        driver: &mut dyn Driver,
    ) -> Result<()> {
        let input = match self.input(io, Channel::GaussianInput)?.texture_handle() {
            Some(handle) => handle,
            None => driver.blank_texture(TextureKind::Texture2D),
        };
        let ping = self.target(io, Channel::GaussianPingPongA)?;
        let pong = self.target(io, Channel::GaussianPingPongB)?;
        let horizontal = self.program(driver, true)?;
        let vertical = self.program(driver, false)?;

        let mut source: TextureHandle = input;
        for i in 0..self.iterations {
            let is_horizontal = i % 2 == 0;
            let (post, dst) = if is_horizontal {
                (&horizontal, &ping)
            } else {
                (&vertical, &pong)
            };
            if !post.bind(driver, dst, RenderTargetSelection::default()) {
                warn!("Blur program '{}' unavailable, bloom skipped", post.program().name());
                break;
            }
            let texel = Vec2::new(1.0 / dst.width() as f32, 1.0 / dst.height() as f32);
            post.set_uniform(driver, "texel_size", UniformValue::Vec2(texel));
            post.draw_textures(driver, &[source]);

            source = match dst.texture(0) {
                Some(handle) => handle,
                None => driver.blank_texture(TextureKind::Texture2D),
            };
        }

        io.set_target(Channel::Output, pong);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_five_gives_three_decreasing_weights() {
        let kernel = GaussianKernel::calculate(5, 1.0, true, false).unwrap();
        assert_eq!(kernel.weights.len(), 3);
        assert!(kernel.weights[0] > kernel.weights[1]);
        assert!(kernel.weights[1] > kernel.weights[2]);
        assert_eq!(kernel.offsets, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_normalized_kernels_sum_to_one() {
        for size in (1..=63).step_by(2) {
            for sigma in [0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0] {
                for bilinear in [false, true] {
                    let kernel = GaussianKernel::calculate(size, sigma, true, bilinear).unwrap();
                    let total = kernel.total_weight();
                    assert!(
                        (total - 1.0).abs() < 1e-5,
                        "size {size}, sigma {sigma}, bilinear {bilinear}: total {total}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_weights_are_rounded_to_six_decimals() {
        for (size, sigma) in [(9, 2.0), (51, 20.0)] {
            let kernel = GaussianKernel::calculate(size, sigma, true, false).unwrap();
            for w in &kernel.weights {
                let scaled = f64::from(*w) * 1e6;
                assert!((scaled - scaled.round()).abs() < 1e-2, "{w} has more than 6 decimals");
            }
        }
    }

    #[test]
    fn test_wide_kernel_stays_normalized() {
        // Per-tap rounding alone drifts past 1e-5 here.
        for bilinear in [false, true] {
            let kernel = GaussianKernel::calculate(51, 20.0, true, bilinear).unwrap();
            let total = kernel.total_weight();
            assert!((total - 1.0).abs() < 1e-5, "bilinear {bilinear}: total {total}");
        }
    }

    #[test]
    fn test_bilinear_halves_fetches() {
        let discrete = GaussianKernel::calculate(9, 2.0, true, false).unwrap();
        let bilinear = GaussianKernel::calculate(9, 2.0, true, true).unwrap();
        assert_eq!(discrete.tap_count(), 5);
        assert_eq!(bilinear.tap_count(), 3);
        // taps 1 and 2 merge between their offsets
        assert!(bilinear.offsets[1] > 1.0 && bilinear.offsets[1] < 2.0);
        let merged = discrete.weights[1] + discrete.weights[2];
        assert!((bilinear.weights[1] - merged).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_even_size_and_bad_sigma() {
        assert!(matches!(
            GaussianKernel::calculate(4, 1.0, true, false),
            Err(MirageError::InvalidKernel(_))
        ));
        assert!(GaussianKernel::calculate(0, 1.0, true, false).is_err());
        assert!(GaussianKernel::calculate(5, 0.0, true, false).is_err());
    }

    #[test]
    fn test_defines_list_every_tap() {
        let kernel = GaussianKernel::calculate(5, 1.0, true, false).unwrap();
        let defines = kernel.defines(true);
        assert_eq!(defines.get("TAP_COUNT"), Some("3".to_string()));
        assert_eq!(defines.get("OFFSETS"), Some("0.000000, 1.000000, 2.000000".to_string()));
        assert!(defines.contains("HORIZONTAL"));
        assert!(!kernel.defines(false).contains("HORIZONTAL"));
    }
}
