//! Driver-Facing Value Types
//!
//! Handles, state enums and descriptors shared by every [`Driver`](super::Driver)
//! implementation. Nothing here owns GPU memory: handles are plain keys into
//! the backend's resource tables.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

slotmap::new_key_type! {
    /// A texture owned by the driver (render-target attachment, placeholder or uploaded image).
    pub struct TextureHandle;
    /// A render target (framebuffer) owned by the driver.
    pub struct RenderTargetHandle;
    /// A compiled shader program on the GPU.
    pub struct ShaderHandle;
    /// A uniform buffer.
    pub struct BufferHandle;
    /// Uploaded vertex and index data.
    pub struct GeometryHandle;
}

// ============================================================================
// Render Targets
// ============================================================================

/// Storage layout of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTargetType {
    /// The presentable default framebuffer.
    Display,
    /// 8-bit RGBA color attachments.
    ColorTexture,
    /// 8-bit RGBA color attachments holding sRGB-encoded values. Writes
    /// encode and samples decode, like the display.
    ColorTextureSrgb,
    /// 16-bit float RGBA color attachments.
    ColorTextureHdr16,
    /// 16-bit float RG attachments (BRDF integration LUT).
    ColorTextureRg16,
    /// 16-bit float RGBA cube map; `slices` is fixed to six faces.
    CubeTextureHdr16,
    /// Depth-only 2D array; one slice per shadow-casting light.
    DepthTextureArray,
}

impl RenderTargetType {
    #[inline]
    #[must_use]
    pub fn has_color(self) -> bool {
        !matches!(self, Self::DepthTextureArray)
    }

    #[inline]
    #[must_use]
    pub fn is_hdr(self) -> bool {
        matches!(
            self,
            Self::ColorTextureHdr16 | Self::ColorTextureRg16 | Self::CubeTextureHdr16
        )
    }

    /// 8-bit color storage matching the display encoding: sRGB when the
    /// hardware encodes it, otherwise plain (programs encode gamma
    /// themselves).
    #[inline]
    #[must_use]
    pub fn ldr_color(srgb_framebuffer: bool) -> Self {
        if srgb_framebuffer {
            Self::ColorTextureSrgb
        } else {
            Self::ColorTexture
        }
    }

    /// Kind of sampler that reads this target's textures.
    #[inline]
    #[must_use]
    pub fn sampled_kind(self) -> TextureKind {
        match self {
            Self::CubeTextureHdr16 => TextureKind::Cube,
            Self::DepthTextureArray => TextureKind::DepthArray,
            _ => TextureKind::Texture2D,
        }
    }
}

/// Everything the driver needs to allocate a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub label: String,
    pub ty: RenderTargetType,
    pub width: u32,
    pub height: u32,
    /// Number of color attachments (multiple render targets).
    pub attachments: u32,
    /// Array layers per attachment. Cube targets always have six.
    pub slices: u32,
    pub mip_levels: u32,
    pub depth: bool,
    pub stencil: bool,
}

impl RenderTargetDesc {
    #[must_use]
    pub fn new(label: impl Into<String>, ty: RenderTargetType, width: u32, height: u32) -> Self {
        let (attachments, slices, depth) = match ty {
            RenderTargetType::CubeTextureHdr16 => (1, 6, false),
            RenderTargetType::DepthTextureArray => (0, 1, true),
            _ => (1, 1, false),
        };
        Self {
            label: label.into(),
            ty,
            width: width.max(1),
            height: height.max(1),
            attachments,
            slices,
            mip_levels: 1,
            depth,
            stencil: false,
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: u32) -> Self {
        if self.ty.has_color() {
            self.attachments = attachments.max(1);
        }
        self
    }

    #[must_use]
    pub fn with_slices(mut self, slices: u32) -> Self {
        if self.ty != RenderTargetType::CubeTextureHdr16 {
            self.slices = slices.max(1);
        }
        self
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    #[must_use]
    pub fn with_depth_stencil(mut self, depth: bool, stencil: bool) -> Self {
        self.depth = depth || stencil || self.ty == RenderTargetType::DepthTextureArray;
        self.stencil = stencil;
        self
    }

    /// Size of a given mip level.
    #[inline]
    #[must_use]
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }
}

/// Which slice and mip of a target subsequent draws write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderTargetSelection {
    /// Array layer, or cube face for cube targets.
    pub slice: u32,
    pub mip: u32,
}

impl RenderTargetSelection {
    #[inline]
    #[must_use]
    pub fn slice(slice: u32) -> Self {
        Self { slice, mip: 0 }
    }

    #[inline]
    #[must_use]
    pub fn face_mip(face: u32, mip: u32) -> Self {
        Self { slice: face, mip }
    }
}

bitflags! {
    /// Buffers cleared by [`Driver::clear`](super::Driver::clear).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Pixel rectangle used by the driver viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[inline]
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

// ============================================================================
// Textures
// ============================================================================

/// Dimensionality of a sampled texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureKind {
    Texture2D,
    Cube,
    /// Depth array sampled with a comparison sampler (shadow maps).
    DepthArray,
}

impl TextureKind {
    #[must_use]
    pub fn wgsl_texture_type(self) -> &'static str {
        match self {
            Self::Texture2D => "texture_2d<f32>",
            Self::Cube => "texture_cube<f32>",
            Self::DepthArray => "texture_depth_2d_array",
        }
    }

    #[must_use]
    pub fn wgsl_sampler_type(self) -> &'static str {
        match self {
            Self::DepthArray => "sampler_comparison",
            _ => "sampler",
        }
    }
}

// ============================================================================
// Fixed-Function State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    None,
    Alpha,
    Add,
    Multiply,
    PremultipliedAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

/// Stencil comparison. A fragment passes when `reference OP stored`, both
/// sides masked by the read mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilFunc {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    NotEqual,
    #[default]
    Always,
}

impl StencilFunc {
    #[must_use]
    pub fn test(self, reference: u8, stored: u8, read_mask: u8) -> bool {
        let r = reference & read_mask;
        let s = stored & read_mask;
        match self {
            Self::Never => false,
            Self::Less => r < s,
            Self::LessEqual => r <= s,
            Self::Equal => r == s,
            Self::Greater => r > s,
            Self::GreaterEqual => r >= s,
            Self::NotEqual => r != s,
            Self::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

impl StencilOp {
    #[must_use]
    pub fn apply(self, stored: u8, reference: u8) -> u8 {
        match self {
            Self::Keep => stored,
            Self::Zero => 0,
            Self::Replace => reference,
            Self::IncrementClamp => stored.saturating_add(1),
            Self::DecrementClamp => stored.saturating_sub(1),
            Self::Invert => !stored,
            Self::IncrementWrap => stored.wrapping_add(1),
            Self::DecrementWrap => stored.wrapping_sub(1),
        }
    }
}

/// Stencil actions for the three test outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilOps {
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
}

impl StencilOps {
    #[must_use]
    pub fn new(fail: StencilOp, depth_fail: StencilOp, pass: StencilOp) -> Self {
        Self {
            fail,
            depth_fail,
            pass,
        }
    }
}

/// Capabilities reported by a backend at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    pub hdr: bool,
    pub multiple_render_targets: bool,
    /// The display target encodes sRGB in hardware.
    pub srgb_framebuffer: bool,
    pub max_texture_size: u32,
    pub max_array_layers: u32,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            hdr: true,
            multiple_render_targets: true,
            srgb_framebuffer: true,
            max_texture_size: 8192,
            max_array_layers: 256,
        }
    }
}

// ============================================================================
// Uniforms
// ============================================================================

/// Stable index of a uniform inside one program's declaration list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformSlot(pub u32);

impl UniformSlot {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    Mat4,
}

impl UniformType {
    #[must_use]
    pub fn wgsl(self) -> &'static str {
        match self {
            Self::Float => "f32",
            Self::Vec2 => "vec2<f32>",
            Self::Vec3 => "vec3<f32>",
            Self::Vec4 => "vec4<f32>",
            Self::Int => "i32",
            Self::Mat4 => "mat4x4<f32>",
        }
    }

    /// Alignment in the WGSL uniform address space.
    #[must_use]
    pub fn align(self) -> u32 {
        match self {
            Self::Float | Self::Int => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat4 => 16,
        }
    }

    #[must_use]
    pub fn size(self) -> u32 {
        match self {
            Self::Float | Self::Int => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Int(i32),
    Mat4(Mat4),
}

impl UniformValue {
    #[must_use]
    pub fn ty(&self) -> UniformType {
        match self {
            Self::Float(_) => UniformType::Float,
            Self::Vec2(_) => UniformType::Vec2,
            Self::Vec3(_) => UniformType::Vec3,
            Self::Vec4(_) => UniformType::Vec4,
            Self::Int(_) => UniformType::Int,
            Self::Mat4(_) => UniformType::Mat4,
        }
    }

    /// Writes the value into `dst` using its natural WGSL encoding.
    /// `dst` must be at least `self.ty().size()` bytes long.
    pub fn write_bytes(&self, dst: &mut [u8]) {
        let bytes: &[u8] = match self {
            Self::Float(v) => bytemuck::bytes_of(v),
            Self::Vec2(v) => bytemuck::bytes_of(v),
            Self::Vec3(v) => bytemuck::bytes_of(v),
            Self::Vec4(v) => bytemuck::bytes_of(v),
            Self::Int(v) => bytemuck::bytes_of(v),
            Self::Mat4(v) => bytemuck::bytes_of(v),
        };
        let len = bytes.len().min(dst.len());
        dst[..len].copy_from_slice(&bytes[..len]);
    }
}

/// One named uniform a program declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformDecl {
    pub name: String,
    pub ty: UniformType,
}

impl UniformDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: UniformType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Byte offsets of a program's uniforms inside its generated uniform struct.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniformLayout {
    pub offsets: Vec<u32>,
    /// Struct size, rounded to 16 bytes.
    pub size: u32,
}

impl UniformLayout {
    /// Lays out `decls` in order following WGSL uniform struct rules.
    #[must_use]
    pub fn compute(decls: &[UniformDecl]) -> Self {
        let mut offsets = Vec::with_capacity(decls.len());
        let mut cursor = 0u32;
        for decl in decls {
            let align = decl.ty.align();
            cursor = cursor.div_ceil(align) * align;
            offsets.push(cursor);
            cursor += decl.ty.size();
        }
        Self {
            offsets,
            size: cursor.div_ceil(16).max(1) * 16,
        }
    }
}

/// One sampled texture a program declares, in texture-unit order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerDecl {
    pub name: String,
    pub kind: TextureKind,
}

impl SamplerDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TextureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Vertex input expected by a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    /// No vertex buffers; positions are generated from the vertex index.
    Fullscreen,
    /// Interleaved [`Vertex`] stream.
    Mesh,
}

/// Complete GPU program description handed to [`Driver::compile_shader`](super::Driver::compile_shader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub name: String,
    pub wgsl: String,
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<SamplerDecl>,
    pub vertex_layout: VertexLayout,
    /// The program reads the lighting block at `@group(0) @binding(1)`.
    pub uses_lighting: bool,
    /// Number of `@location(n)` fragment outputs.
    pub color_outputs: u32,
}

// ============================================================================
// Geometry & Draws
// ============================================================================

/// Interleaved mesh vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Screen-space rectangle in target pixels, `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScreenRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl ScreenRect {
    #[must_use]
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPrimitive {
    /// A single triangle covering the whole target.
    Fullscreen,
    Geometry(GeometryHandle),
}

/// A draw submission.
///
/// `coverage`, `depth` and `tag` describe the draw's screen footprint for
/// CPU backends that emulate fixed-function tests; rasterizing backends
/// ignore them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub primitive: DrawPrimitive,
    /// `None` covers the whole target.
    pub coverage: Option<ScreenRect>,
    /// Normalized depth of the footprint, 0 = near.
    pub depth: f32,
    /// Value recorded in the color buffer of emulating backends.
    pub tag: u32,
}

impl DrawCall {
    #[must_use]
    pub fn fullscreen() -> Self {
        Self {
            primitive: DrawPrimitive::Fullscreen,
            coverage: None,
            depth: 0.0,
            tag: 0,
        }
    }

    #[must_use]
    pub fn geometry(geometry: GeometryHandle) -> Self {
        Self {
            primitive: DrawPrimitive::Geometry(geometry),
            coverage: None,
            depth: 0.5,
            tag: 0,
        }
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout_follows_wgsl_alignment() {
        let decls = [
            UniformDecl::new("a", UniformType::Float),
            UniformDecl::new("b", UniformType::Vec3),
            UniformDecl::new("c", UniformType::Float),
            UniformDecl::new("d", UniformType::Mat4),
            UniformDecl::new("e", UniformType::Vec2),
        ];
        let layout = UniformLayout::compute(&decls);

        // vec3 aligns to 16, the following f32 packs into its tail
        assert_eq!(layout.offsets, vec![0, 16, 28, 32, 96]);
        assert_eq!(layout.size, 112);
    }

    #[test]
    fn test_empty_layout_has_minimum_size() {
        assert_eq!(UniformLayout::compute(&[]).size, 16);
    }

    #[test]
    fn test_stencil_semantics() {
        // reference <= stored
        assert!(StencilFunc::LessEqual.test(1, 2, 0xFF));
        assert!(!StencilFunc::LessEqual.test(2, 1, 0xFF));
        assert!(StencilFunc::Equal.test(3, 3, 0xFF));
        assert!(StencilFunc::Equal.test(0x13, 0x03, 0x0F));

        assert_eq!(StencilOp::IncrementClamp.apply(255, 0), 255);
        assert_eq!(StencilOp::DecrementClamp.apply(0, 0), 0);
        assert_eq!(StencilOp::DecrementWrap.apply(0, 0), 255);
        assert_eq!(StencilOp::Replace.apply(7, 2), 2);
    }

    #[test]
    fn test_target_desc_defaults() {
        let cube = RenderTargetDesc::new("cube", RenderTargetType::CubeTextureHdr16, 64, 64)
            .with_slices(3)
            .with_mip_levels(4);
        assert_eq!(cube.slices, 6);
        assert_eq!(cube.mip_extent(3), (8, 8));

        let shadow = RenderTargetDesc::new("shadow", RenderTargetType::DepthTextureArray, 512, 512)
            .with_slices(4)
            .with_attachments(2);
        assert_eq!(shadow.attachments, 0);
        assert!(shadow.depth);
        assert_eq!(shadow.slices, 4);
    }
}
