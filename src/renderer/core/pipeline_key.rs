//! Render Pipeline Keys
//!
//! `wgpu` state descriptors do not implement `Hash` / `Eq`, so the
//! [`WgpuDriver`](super::WgpuDriver) keys its pipeline cache on the mirror
//! types below. A [`PipelineKey`] is built from the driver's immediate-mode
//! state at each draw; equal keys share one `wgpu::RenderPipeline`.

use smallvec::SmallVec;

use super::types::{BlendMode, CullMode, ShaderHandle, StencilFunc, StencilOp, VertexLayout};

// ─── Hashable Mirror Types ────────────────────────────────────────────────────

/// Hashable mirror of `wgpu::BlendComponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponentKey {
    pub src_factor: wgpu::BlendFactor,
    pub dst_factor: wgpu::BlendFactor,
    pub operation: wgpu::BlendOperation,
}

impl BlendComponentKey {
    const fn add(src_factor: wgpu::BlendFactor, dst_factor: wgpu::BlendFactor) -> Self {
        Self {
            src_factor,
            dst_factor,
            operation: wgpu::BlendOperation::Add,
        }
    }

    fn to_wgpu(self) -> wgpu::BlendComponent {
        wgpu::BlendComponent {
            src_factor: self.src_factor,
            dst_factor: self.dst_factor,
            operation: self.operation,
        }
    }
}

/// Hashable mirror of `wgpu::BlendState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateKey {
    pub color: BlendComponentKey,
    pub alpha: BlendComponentKey,
}

impl BlendStateKey {
    /// Blend equation of a [`BlendMode`]; `None` disables blending.
    #[must_use]
    pub fn from_mode(mode: BlendMode) -> Option<Self> {
        use wgpu::BlendFactor as F;
        let (color, alpha) = match mode {
            BlendMode::None => return None,
            BlendMode::Alpha => (
                BlendComponentKey::add(F::SrcAlpha, F::OneMinusSrcAlpha),
                BlendComponentKey::add(F::One, F::OneMinusSrcAlpha),
            ),
            BlendMode::Add => (
                BlendComponentKey::add(F::One, F::One),
                BlendComponentKey::add(F::One, F::One),
            ),
            BlendMode::Multiply => (
                BlendComponentKey::add(F::Dst, F::Zero),
                BlendComponentKey::add(F::DstAlpha, F::Zero),
            ),
            BlendMode::PremultipliedAlpha => (
                BlendComponentKey::add(F::One, F::OneMinusSrcAlpha),
                BlendComponentKey::add(F::One, F::OneMinusSrcAlpha),
            ),
        };
        Some(Self { color, alpha })
    }

    fn to_wgpu(self) -> wgpu::BlendState {
        wgpu::BlendState {
            color: self.color.to_wgpu(),
            alpha: self.alpha.to_wgpu(),
        }
    }
}

/// Hashable mirror of `wgpu::ColorTargetState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorTargetKey {
    pub format: wgpu::TextureFormat,
    pub blend: Option<BlendStateKey>,
    /// `wgpu::ColorWrites` bits.
    pub write_mask: u32,
}

impl ColorTargetKey {
    #[must_use]
    pub fn to_wgpu(self) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format: self.format,
            blend: self.blend.map(BlendStateKey::to_wgpu),
            write_mask: wgpu::ColorWrites::from_bits_truncate(self.write_mask),
        }
    }
}

/// Hashable mirror of `wgpu::StencilFaceState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceKey {
    pub compare: wgpu::CompareFunction,
    pub fail_op: wgpu::StencilOperation,
    pub depth_fail_op: wgpu::StencilOperation,
    pub pass_op: wgpu::StencilOperation,
}

impl StencilFaceKey {
    fn to_wgpu(self) -> wgpu::StencilFaceState {
        wgpu::StencilFaceState {
            compare: self.compare,
            fail_op: self.fail_op,
            depth_fail_op: self.depth_fail_op,
            pass_op: self.pass_op,
        }
    }
}

/// Hashable mirror of `wgpu::StencilState`. Both faces always match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilStateKey {
    pub face: StencilFaceKey,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl StencilStateKey {
    /// A disabled stencil test: always passes and never writes.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            face: StencilFaceKey {
                compare: wgpu::CompareFunction::Always,
                fail_op: wgpu::StencilOperation::Keep,
                depth_fail_op: wgpu::StencilOperation::Keep,
                pass_op: wgpu::StencilOperation::Keep,
            },
            read_mask: 0,
            write_mask: 0,
        }
    }

    fn to_wgpu(self) -> wgpu::StencilState {
        let face = self.face.to_wgpu();
        wgpu::StencilState {
            front: face,
            back: face,
            read_mask: self.read_mask,
            write_mask: self.write_mask,
        }
    }
}

/// Hashable mirror of `wgpu::DepthStencilState` (no depth bias).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilKey {
    pub format: wgpu::TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub stencil: StencilStateKey,
}

impl DepthStencilKey {
    #[must_use]
    pub fn to_wgpu(self) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format: self.format,
            depth_write_enabled: Some(self.depth_write_enabled),
            depth_compare: Some(self.depth_compare),
            stencil: self.stencil.to_wgpu(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

// ─── Pipeline Key ─────────────────────────────────────────────────────────────

/// Everything that identifies one render pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: ShaderHandle,
    pub vertex_layout: VertexLayout,
    pub color_targets: SmallVec<[ColorTargetKey; 4]>,
    pub depth_stencil: Option<DepthStencilKey>,
    pub cull_mode: Option<wgpu::Face>,
}

// ─── State Conversions ────────────────────────────────────────────────────────

#[must_use]
pub fn compare_function(func: StencilFunc) -> wgpu::CompareFunction {
    match func {
        StencilFunc::Never => wgpu::CompareFunction::Never,
        StencilFunc::Less => wgpu::CompareFunction::Less,
        StencilFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        StencilFunc::Equal => wgpu::CompareFunction::Equal,
        StencilFunc::Greater => wgpu::CompareFunction::Greater,
        StencilFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        StencilFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        StencilFunc::Always => wgpu::CompareFunction::Always,
    }
}

#[must_use]
pub fn stencil_operation(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
        StencilOp::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
        StencilOp::Invert => wgpu::StencilOperation::Invert,
        StencilOp::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOp::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
    }
}

#[must_use]
pub fn cull_face(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Back => Some(wgpu::Face::Back),
        CullMode::Front => Some(wgpu::Face::Front),
    }
}

/// Color targets for a pass with `formats` attachments, drawn by a program
/// writing `outputs` locations. Locations the program does not write keep
/// their contents.
#[must_use]
pub fn color_targets(
    formats: &[wgpu::TextureFormat],
    outputs: u32,
    blend: BlendMode,
    color_write: bool,
) -> SmallVec<[ColorTargetKey; 4]> {
    let blend = BlendStateKey::from_mode(blend);
    formats
        .iter()
        .enumerate()
        .map(|(location, &format)| {
            let writes = color_write && (location as u32) < outputs;
            ColorTargetKey {
                format,
                blend: if writes { blend } else { None },
                write_mask: if writes { wgpu::ColorWrites::ALL.bits() } else { 0 },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;
    use slotmap::SlotMap;

    fn shader() -> ShaderHandle {
        let mut map: SlotMap<ShaderHandle, ()> = SlotMap::with_key();
        map.insert(())
    }

    #[test]
    fn test_equal_state_gives_equal_keys() {
        let shader = shader();
        let make = || PipelineKey {
            shader,
            vertex_layout: VertexLayout::Fullscreen,
            color_targets: color_targets(&[wgpu::TextureFormat::Rgba16Float], 1, BlendMode::Add, true),
            depth_stencil: None,
            cull_mode: cull_face(CullMode::Back),
        };

        let mut set = FxHashSet::default();
        set.insert(make());
        set.insert(make());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_blend_mode_changes_key() {
        let formats = [wgpu::TextureFormat::Rgba8Unorm];
        let none = color_targets(&formats, 1, BlendMode::None, true);
        let alpha = color_targets(&formats, 1, BlendMode::Alpha, true);
        assert_ne!(none, alpha);
        assert!(none[0].blend.is_none());
    }

    #[test]
    fn test_unwritten_locations_are_masked() {
        let formats = [wgpu::TextureFormat::Rgba16Float; 3];
        let targets = color_targets(&formats, 1, BlendMode::None, true);

        assert_eq!(targets[0].write_mask, wgpu::ColorWrites::ALL.bits());
        assert_eq!(targets[1].write_mask, 0);
        assert_eq!(targets[2].write_mask, 0);
    }

    #[test]
    fn test_color_write_disabled_masks_everything() {
        let targets = color_targets(&[wgpu::TextureFormat::Rgba8Unorm], 1, BlendMode::Alpha, false);
        assert_eq!(targets[0].write_mask, 0);
        assert!(targets[0].to_wgpu().write_mask.is_empty());
    }

    #[test]
    fn test_stencil_conversions() {
        assert_eq!(compare_function(StencilFunc::LessEqual), wgpu::CompareFunction::LessEqual);
        assert_eq!(
            stencil_operation(StencilOp::DecrementClamp),
            wgpu::StencilOperation::DecrementClamp
        );
        assert_eq!(cull_face(CullMode::None), None);
    }
}
