//! WGPU Backend
//!
//! [`Driver`] on top of `wgpu`. The immediate-mode state set by passes is
//! turned into a [`PipelineKey`] at each draw and the matching render
//! pipeline is created once and cached.
//!
//! Binding model of every generated program:
//!
//! - group 0, binding 0: the program's uniform struct, sliced out of a
//!   per-frame ring buffer with a dynamic offset
//! - group 0, binding 1: the lighting block (lit programs only)
//! - group 1: one texture and one sampler per sampler unit
//!
//! Each clear and each draw is recorded into its own render pass and
//! submitted immediately, so queue writes made between two draws are
//! observed in order.
//!
//! The display is an offscreen sRGB texture with a depth-stencil attachment;
//! presenting it is left to the embedding application
//! ([`WgpuDriver::display_texture`]).

use std::rc::Rc;

use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use wgpu::util::DeviceExt;

use super::context::{GpuContext, GpuResource};
use super::driver::{Driver, TextureDesc, TextureFormat};
use super::pipeline_key::{
    DepthStencilKey, PipelineKey, StencilFaceKey, StencilStateKey, color_targets, compare_function, cull_face,
    stencil_operation,
};
use super::target::RenderTarget;
use super::types::{
    BlendMode, BufferHandle, ClearFlags, CullMode, DrawCall, DrawPrimitive, DriverCapabilities, GeometryData,
    GeometryHandle, RenderTargetDesc, RenderTargetHandle, RenderTargetSelection, RenderTargetType, SamplerDecl,
    ShaderHandle, ShaderSource, StencilFunc, StencilOp, StencilOps, TextureHandle, TextureKind, UniformLayout,
    UniformSlot, UniformType, UniformValue, Vertex, VertexLayout, Viewport,
};
use crate::errors::{MirageError, Result};
use crate::renderer::pipeline::factory::ShaderFactory;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;
const UNIFORM_RING_SIZE: u64 = 1 << 18;

const MESH_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

fn mesh_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &MESH_ATTRIBUTES,
    }
}

fn color_format(ty: RenderTargetType) -> Option<wgpu::TextureFormat> {
    match ty {
        RenderTargetType::Display => Some(wgpu::TextureFormat::Rgba8UnormSrgb),
        RenderTargetType::ColorTexture => Some(wgpu::TextureFormat::Rgba8Unorm),
        RenderTargetType::ColorTextureSrgb => Some(wgpu::TextureFormat::Rgba8UnormSrgb),
        RenderTargetType::ColorTextureHdr16 | RenderTargetType::CubeTextureHdr16 => {
            Some(wgpu::TextureFormat::Rgba16Float)
        }
        RenderTargetType::ColorTextureRg16 => Some(wgpu::TextureFormat::Rg16Float),
        RenderTargetType::DepthTextureArray => None,
    }
}

fn upload_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

// ─── Resource Records ─────────────────────────────────────────────────────────

struct WgpuTexture {
    label: String,
    kind: TextureKind,
    texture: wgpu::Texture,
    layers: u32,
    /// View matching `kind`, used when the texture is sampled.
    sampled: wgpu::TextureView,
}

struct WgpuTarget {
    color: SmallVec<[TextureHandle; 4]>,
    depth: Option<TextureHandle>,
}

struct WgpuShader {
    name: String,
    module: wgpu::ShaderModule,
    uniform_group: wgpu::BindGroupLayout,
    texture_group: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    layout: UniformLayout,
    uniform_types: Vec<UniformType>,
    uniform_data: Vec<u8>,
    samplers: Vec<SamplerDecl>,
    vertex_layout: VertexLayout,
    uses_lighting: bool,
    color_outputs: u32,
}

struct WgpuGeometry {
    vertices: wgpu::Buffer,
    indices: Option<wgpu::Buffer>,
    count: u32,
}

/// Attachment views of the bound target slice and mip.
struct BoundTarget {
    colors: SmallVec<[wgpu::TextureView; 4]>,
    formats: SmallVec<[wgpu::TextureFormat; 4]>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    width: u32,
    height: u32,
}

/// Per-draw uniform blocks, written at aligned offsets and wrapped when full.
struct UniformRing {
    buffer: wgpu::Buffer,
    cursor: u64,
    alignment: u64,
}

impl UniformRing {
    fn new(device: &wgpu::Device, alignment: u64) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("uniform ring"),
                size: UNIFORM_RING_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            cursor: 0,
            alignment: alignment.max(1),
        }
    }

    /// Writes `data` and returns its dynamic offset.
    fn push(&mut self, queue: &wgpu::Queue, data: &[u8]) -> u32 {
        let size = data.len() as u64;
        if self.cursor + size > UNIFORM_RING_SIZE {
            self.cursor = 0;
        }
        let offset = self.cursor;
        queue.write_buffer(&self.buffer, offset, data);
        self.cursor = (offset + size).div_ceil(self.alignment) * self.alignment;
        offset as u32
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[derive(Debug, Clone, Copy)]
struct DrawState {
    target: Option<RenderTargetHandle>,
    viewport: Viewport,
    shader: Option<ShaderHandle>,
    lighting_buffer: Option<BufferHandle>,
    depth_write: bool,
    depth_read: bool,
    blend: BlendMode,
    cull: CullMode,
    color_write: bool,
    stencil_test: bool,
    stencil_func: StencilFunc,
    stencil_ref: u8,
    stencil_read_mask: u8,
    stencil_ops: StencilOps,
    stencil_write_mask: u8,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            target: None,
            viewport: Viewport::default(),
            shader: None,
            lighting_buffer: None,
            depth_write: true,
            depth_read: true,
            blend: BlendMode::None,
            cull: CullMode::Back,
            color_write: true,
            stencil_test: false,
            stencil_func: StencilFunc::Always,
            stencil_ref: 0,
            stencil_read_mask: 0xFF,
            stencil_ops: StencilOps::default(),
            stencil_write_mask: 0xFF,
        }
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────────

/// GPU [`Driver`] backed by `wgpu`.
pub struct WgpuDriver {
    device: wgpu::Device,
    queue: wgpu::Queue,
    context: GpuContext,
    capabilities: DriverCapabilities,
    factory: ShaderFactory,

    targets: SlotMap<RenderTargetHandle, WgpuTarget>,
    textures: SlotMap<TextureHandle, WgpuTexture>,
    shaders: SlotMap<ShaderHandle, WgpuShader>,
    buffers: SlotMap<BufferHandle, wgpu::Buffer>,
    geometries: SlotMap<GeometryHandle, WgpuGeometry>,
    blanks: FxHashMap<TextureKind, TextureHandle>,
    display: Option<Rc<RenderTarget>>,

    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
    uniforms: UniformRing,
    linear_sampler: wgpu::Sampler,
    shadow_sampler: wgpu::Sampler,

    state: DrawState,
    bound: Option<BoundTarget>,
    bound_textures: FxHashMap<u32, TextureHandle>,
    frame: u64,
}

impl WgpuDriver {
    /// Creates a device on the default adapter with an offscreen display of
    /// `width`×`height`.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| MirageError::AdapterRequestFailed(e.to_string()))?;

        let limits = wgpu::Limits::default();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("mirage"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;
        debug!("WGPU device created on '{}'", adapter.get_info().name);

        let capabilities = DriverCapabilities {
            hdr: true,
            multiple_render_targets: limits.max_color_attachments >= 4,
            srgb_framebuffer: true,
            max_texture_size: limits.max_texture_dimension_2d,
            max_array_layers: limits.max_texture_array_layers,
        };

        let uniforms = UniformRing::new(&device, u64::from(limits.min_uniform_buffer_offset_alignment));
        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let mut driver = Self {
            device,
            queue,
            context: GpuContext::new(),
            capabilities,
            factory: ShaderFactory::new(capabilities.srgb_framebuffer)?,
            targets: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            geometries: SlotMap::with_key(),
            blanks: FxHashMap::default(),
            display: None,
            pipelines: FxHashMap::default(),
            uniforms,
            linear_sampler,
            shadow_sampler,
            state: DrawState::default(),
            bound: None,
            bound_textures: FxHashMap::default(),
            frame: 0,
        };

        let desc =
            RenderTargetDesc::new("display", RenderTargetType::Display, width, height).with_depth_stencil(true, true);
        driver.display = Some(driver.allocate_target(&desc)?);
        for kind in [TextureKind::Texture2D, TextureKind::Cube, TextureKind::DepthArray] {
            driver.blank_texture(kind);
        }
        Ok(driver)
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Color texture of the offscreen display.
    #[must_use]
    pub fn display_texture(&self) -> Option<&wgpu::Texture> {
        let handle = self.display.as_ref()?.texture(0)?;
        self.textures.get(handle).map(|t| &t.texture)
    }

    /// Number of distinct render pipelines created so far.
    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    fn create_texture(
        &mut self,
        label: String,
        kind: TextureKind,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        layers: u32,
        mip_levels: u32,
        usage: wgpu::TextureUsages,
    ) -> TextureHandle {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: layers,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        let (dimension, aspect, array_layer_count) = match kind {
            TextureKind::Texture2D => (wgpu::TextureViewDimension::D2, wgpu::TextureAspect::All, Some(1)),
            TextureKind::Cube => (wgpu::TextureViewDimension::Cube, wgpu::TextureAspect::All, Some(6)),
            TextureKind::DepthArray => (wgpu::TextureViewDimension::D2Array, wgpu::TextureAspect::DepthOnly, None),
        };
        let sampled = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&label),
            dimension: Some(dimension),
            aspect,
            array_layer_count,
            ..Default::default()
        });

        let handle = self.textures.insert(WgpuTexture {
            label,
            kind,
            texture,
            layers,
            sampled,
        });
        self.context.track_allocation(GpuResource::Texture(handle));
        handle
    }

    fn allocate_target(&mut self, desc: &RenderTargetDesc) -> Result<Rc<RenderTarget>> {
        let fail = |reason: String| MirageError::RenderTargetCreation {
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
            reason,
        };
        let limit = self.capabilities.max_texture_size;
        if desc.width > limit || desc.height > limit {
            return Err(fail(format!("exceeds maximum size {limit}")));
        }
        if desc.slices > self.capabilities.max_array_layers {
            return Err(fail(format!("{} array layers requested", desc.slices)));
        }
        let max_mips = 32 - desc.width.max(desc.height).leading_zeros();
        if desc.mip_levels > max_mips {
            return Err(fail(format!("{} mip levels requested", desc.mip_levels)));
        }

        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let mut color = SmallVec::new();
        if let Some(format) = color_format(desc.ty) {
            for i in 0..desc.attachments {
                color.push(self.create_texture(
                    format!("{}#{i}", desc.label),
                    desc.ty.sampled_kind(),
                    format,
                    desc.width,
                    desc.height,
                    desc.slices,
                    desc.mip_levels,
                    usage,
                ));
            }
        }
        let depth = desc.depth.then(|| {
            let (format, layers) = if desc.ty == RenderTargetType::DepthTextureArray {
                (DEPTH_FORMAT, desc.slices)
            } else if desc.stencil {
                (DEPTH_STENCIL_FORMAT, 1)
            } else {
                (DEPTH_FORMAT, 1)
            };
            self.create_texture(
                format!("{}#depth", desc.label),
                TextureKind::DepthArray,
                format,
                desc.width,
                desc.height,
                layers,
                1,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            )
        });

        let handle = self.targets.insert(WgpuTarget {
            color: color.clone(),
            depth,
        });
        if desc.ty != RenderTargetType::Display {
            self.context.track_allocation(GpuResource::RenderTarget(handle));
        }
        debug!("Allocated render target '{}' {}x{}", desc.label, desc.width, desc.height);

        Ok(Rc::new(RenderTarget::new(
            handle,
            desc.clone(),
            color,
            depth,
            self.context.downgrade(),
        )))
    }

    fn attachment_view(texture: &WgpuTexture, selection: RenderTargetSelection) -> wgpu::TextureView {
        texture.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&texture.label),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: selection.mip,
            mip_level_count: Some(1),
            base_array_layer: selection.slice.min(texture.layers.saturating_sub(1)),
            array_layer_count: Some(1),
            ..Default::default()
        })
    }

    fn depth_stencil_key(&self, format: wgpu::TextureFormat) -> DepthStencilKey {
        let state = &self.state;
        let stencil = if state.stencil_test && format.has_stencil_aspect() {
            StencilStateKey {
                face: StencilFaceKey {
                    compare: compare_function(state.stencil_func),
                    fail_op: stencil_operation(state.stencil_ops.fail),
                    depth_fail_op: stencil_operation(state.stencil_ops.depth_fail),
                    pass_op: stencil_operation(state.stencil_ops.pass),
                },
                read_mask: u32::from(state.stencil_read_mask),
                write_mask: u32::from(state.stencil_write_mask),
            }
        } else {
            StencilStateKey::disabled()
        };
        DepthStencilKey {
            format,
            depth_write_enabled: state.depth_write,
            depth_compare: if state.depth_read {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil,
        }
    }

    fn create_pipeline(device: &wgpu::Device, key: &PipelineKey, shader: &WgpuShader) -> wgpu::RenderPipeline {
        let targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> =
            key.color_targets.iter().map(|c| Some(c.to_wgpu())).collect();
        let mesh = [mesh_layout()];
        let buffers: &[wgpu::VertexBufferLayout] = match key.vertex_layout {
            VertexLayout::Fullscreen => &[],
            VertexLayout::Mesh => &mesh,
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&shader.name),
            layout: Some(&shader.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader.module,
                entry_point: Some("vs_main"),
                buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader.module,
                entry_point: Some("fs_main"),
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: key.cull_mode,
                ..Default::default()
            },
            depth_stencil: key.depth_stencil.map(DepthStencilKey::to_wgpu),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }

    fn uniform_group_layout(&self, source: &ShaderSource, size: u32) -> wgpu::BindGroupLayout {
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(u64::from(size)),
            },
            count: None,
        }];
        if source.uses_lighting {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&source.name),
            entries: &entries,
        })
    }

    fn texture_group_layout(&self, source: &ShaderSource) -> wgpu::BindGroupLayout {
        let mut entries = Vec::with_capacity(source.samplers.len() * 2);
        for (unit, sampler) in source.samplers.iter().enumerate() {
            let (sample_type, view_dimension, sampler_type) = match sampler.kind {
                TextureKind::Texture2D => (
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                    wgpu::SamplerBindingType::Filtering,
                ),
                TextureKind::Cube => (
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::Cube,
                    wgpu::SamplerBindingType::Filtering,
                ),
                TextureKind::DepthArray => (
                    wgpu::TextureSampleType::Depth,
                    wgpu::TextureViewDimension::D2Array,
                    wgpu::SamplerBindingType::Comparison,
                ),
            };
            let binding = unit as u32 * 2;
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(sampler_type),
                count: None,
            });
        }
        self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&source.name),
            entries: &entries,
        })
    }

    /// Records one render pass on the bound target and submits it.
    fn submit_pass(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bound: &BoundTarget,
        color_load: wgpu::LoadOp<wgpu::Color>,
        depth_load: wgpu::LoadOp<f32>,
        stencil_load: wgpu::LoadOp<u32>,
        record: impl FnOnce(&mut wgpu::RenderPass<'_>),
    ) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment>; 4]> = bound
                .colors
                .iter()
                .map(|view| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: color_load,
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })
                })
                .collect();
            let depth_stencil_attachment =
                bound
                    .depth
                    .as_ref()
                    .map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: format.has_stencil_aspect().then_some(wgpu::Operations {
                            load: stencil_load,
                            store: wgpu::StoreOp::Store,
                        }),
                    });

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: None,
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                ..Default::default()
            });
            record(&mut pass);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }
}

impl Driver for WgpuDriver {
    fn context(&self) -> &GpuContext {
        &self.context
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        self.uniforms.reset();
    }

    fn end_frame(&mut self) {
        trace!("frame {} submitted, {} pipelines cached", self.frame, self.pipelines.len());
    }

    fn collect_garbage(&mut self) {
        for resource in self.context.drain_pending() {
            match resource {
                GpuResource::RenderTarget(handle) => {
                    if let Some(target) = self.targets.remove(handle) {
                        for texture in target.color.into_iter().chain(target.depth) {
                            if let Some(texture) = self.textures.remove(texture) {
                                texture.texture.destroy();
                            }
                        }
                    }
                    if self.state.target == Some(handle) {
                        self.state.target = None;
                        self.bound = None;
                    }
                }
                GpuResource::Texture(handle) => {
                    if let Some(texture) = self.textures.remove(handle) {
                        texture.texture.destroy();
                    }
                }
                GpuResource::Shader(handle) => {
                    self.shaders.remove(handle);
                    self.pipelines.retain(|key, _| key.shader != handle);
                    if self.state.shader == Some(handle) {
                        self.state.shader = None;
                    }
                }
                GpuResource::Buffer(handle) => {
                    if let Some(buffer) = self.buffers.remove(handle) {
                        buffer.destroy();
                    }
                }
                GpuResource::Geometry(handle) => {
                    self.geometries.remove(handle);
                }
            }
        }
    }

    fn new_render_target(&mut self, desc: &RenderTargetDesc) -> Result<Rc<RenderTarget>> {
        self.allocate_target(desc)
    }

    fn display(&self) -> Rc<RenderTarget> {
        match &self.display {
            Some(display) => display.clone(),
            None => unreachable!("display is allocated in WgpuDriver::new"),
        }
    }

    fn bind_render_target(&mut self, target: &RenderTarget, selection: RenderTargetSelection) {
        let Some(record) = self.targets.get(target.handle()) else {
            warn!("bind of stale render target '{}'", target.label());
            self.state.target = None;
            self.bound = None;
            return;
        };

        let mut colors = SmallVec::new();
        let mut formats = SmallVec::new();
        for texture in record.color.iter().filter_map(|&h| self.textures.get(h)) {
            colors.push(Self::attachment_view(texture, selection));
            formats.push(texture.texture.format());
        }
        let depth = record
            .depth
            .and_then(|h| self.textures.get(h))
            .map(|t| (Self::attachment_view(t, RenderTargetSelection::slice(selection.slice)), t.texture.format()));

        let (width, height) = target.desc().mip_extent(selection.mip);
        self.state.target = Some(target.handle());
        self.state.viewport = Viewport::new(width, height);
        self.bound = Some(BoundTarget {
            colors,
            formats,
            depth,
            width,
            height,
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn clear(&mut self, flags: ClearFlags, color: [f32; 4]) {
        let Some(bound) = &self.bound else {
            return;
        };
        let state = &self.state;
        let color_load = if flags.contains(ClearFlags::COLOR) && state.color_write {
            wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(color[0]),
                g: f64::from(color[1]),
                b: f64::from(color[2]),
                a: f64::from(color[3]),
            })
        } else {
            wgpu::LoadOp::Load
        };
        let depth_load = if flags.contains(ClearFlags::DEPTH) && state.depth_write {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };
        // Attachment clears cannot be masked; any enabled bit clears the whole value.
        let stencil_load = if flags.contains(ClearFlags::STENCIL) && state.stencil_write_mask != 0 {
            wgpu::LoadOp::Clear(0)
        } else {
            wgpu::LoadOp::Load
        };
        Self::submit_pass(&self.device, &self.queue, bound, color_load, depth_load, stencil_load, |_| {});
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> std::result::Result<ShaderHandle, String> {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&source.name),
            source: wgpu::ShaderSource::Wgsl(source.wgsl.as_str().into()),
        });
        let info = pollster::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }

        let layout = UniformLayout::compute(&source.uniforms);
        let uniform_group = self.uniform_group_layout(source, layout.size);
        let texture_group = self.texture_group_layout(source);
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&source.name),
            bind_group_layouts: &[Some(&uniform_group), Some(&texture_group)],
            immediate_size: 0,
        });

        let handle = self.shaders.insert(WgpuShader {
            name: source.name.clone(),
            module,
            uniform_group,
            texture_group,
            pipeline_layout,
            uniform_data: vec![0; layout.size as usize],
            layout,
            uniform_types: source.uniforms.iter().map(|u| u.ty).collect(),
            samplers: source.samplers.clone(),
            vertex_layout: source.vertex_layout,
            uses_lighting: source.uses_lighting,
            color_outputs: source.color_outputs,
        });
        self.context.track_allocation(GpuResource::Shader(handle));
        debug!("Compiled program '{}'", source.name);
        Ok(handle)
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        if self.shaders.contains_key(shader) {
            self.state.shader = Some(shader);
        }
    }

    fn unbind_shader(&mut self) {
        self.state.shader = None;
    }

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue) {
        let Some(shader) = self.state.shader.and_then(|s| self.shaders.get_mut(s)) else {
            return;
        };
        let index = slot.index();
        let (Some(&offset), Some(&ty)) = (shader.layout.offsets.get(index), shader.uniform_types.get(index)) else {
            return;
        };
        if ty != value.ty() {
            warn!("uniform {index} of '{}' is {ty:?}, got {:?}", shader.name, value.ty());
            return;
        }
        value.write_bytes(&mut shader.uniform_data[offset as usize..]);
    }

    fn new_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> TextureHandle {
        let layers = if desc.kind == TextureKind::Cube { 6 } else { 1 };
        let handle = self.create_texture(
            desc.label.clone(),
            desc.kind,
            upload_format(desc.format),
            desc.width.max(1),
            desc.height.max(1),
            layers,
            1,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );

        if let (Some(data), Some(texture)) = (data, self.textures.get(handle)) {
            let bytes_per_row = desc.format.bytes_per_pixel() * desc.width;
            let layer_size = (bytes_per_row * desc.height) as usize;
            for layer in 0..layers {
                let start = layer as usize * layer_size;
                let Some(pixels) = data.get(start..start + layer_size).or_else(|| data.get(..layer_size)) else {
                    warn!("texture '{}' data too short for {}x{}", desc.label, desc.width, desc.height);
                    break;
                };
                self.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                        aspect: wgpu::TextureAspect::All,
                    },
                    pixels,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(bytes_per_row),
                        rows_per_image: Some(desc.height),
                    },
                    wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }
        handle
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.bound_textures.insert(unit, texture);
    }

    fn blank_texture(&mut self, kind: TextureKind) -> TextureHandle {
        if let Some(&blank) = self.blanks.get(&kind) {
            return blank;
        }
        let (format, layers, usage) = match kind {
            TextureKind::Texture2D => (wgpu::TextureFormat::Rgba8Unorm, 1, wgpu::TextureUsages::TEXTURE_BINDING),
            TextureKind::Cube => (wgpu::TextureFormat::Rgba8Unorm, 6, wgpu::TextureUsages::TEXTURE_BINDING),
            TextureKind::DepthArray => (
                DEPTH_FORMAT,
                1,
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
            ),
        };
        let blank = self.create_texture(format!("blank_{kind:?}"), kind, format, 1, 1, layers, 1, usage);
        self.blanks.insert(kind, blank);
        blank
    }

    fn new_geometry(&mut self, data: &GeometryData) -> GeometryHandle {
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vertices"),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = (!data.indices.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("indices"),
                contents: bytemuck::cast_slice(&data.indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        let count = if data.indices.is_empty() {
            data.vertices.len()
        } else {
            data.indices.len()
        };
        self.geometries.insert(WgpuGeometry {
            vertices,
            indices,
            count: count as u32,
        })
    }

    fn new_uniform_buffer(&mut self, size: u64) -> BufferHandle {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform block"),
            size: size.div_ceil(16).max(1) * 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let handle = self.buffers.insert(buffer);
        self.context.track_allocation(GpuResource::Buffer(handle));
        handle
    }

    fn write_uniform_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(buffer) {
            let len = (data.len() as u64).min(buffer.size()) as usize;
            self.queue.write_buffer(buffer, 0, &data[..len]);
        }
    }

    fn bind_lighting_buffer(&mut self, buffer: Option<BufferHandle>) {
        self.state.lighting_buffer = buffer;
    }

    fn set_depth_writing_enabled(&mut self, enabled: bool) {
        self.state.depth_write = enabled;
    }

    fn set_depth_reading_enabled(&mut self, enabled: bool) {
        self.state.depth_read = enabled;
    }

    fn set_blending_mode(&mut self, mode: BlendMode) {
        self.state.blend = mode;
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.state.cull = mode;
    }

    fn set_color_writing_enabled(&mut self, enabled: bool) {
        self.state.color_write = enabled;
    }

    fn set_stencil_test_enabled(&mut self, enabled: bool) {
        self.state.stencil_test = enabled;
    }

    fn set_stencil_func(&mut self, func: StencilFunc, reference: u8, read_mask: u8) {
        self.state.stencil_func = func;
        self.state.stencil_ref = reference;
        self.state.stencil_read_mask = read_mask;
    }

    fn set_stencil_ops(&mut self, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp) {
        self.state.stencil_ops = StencilOps::new(fail, depth_fail, pass);
    }

    fn set_stencil_write_mask(&mut self, mask: u8) {
        self.state.stencil_write_mask = mask;
    }

    fn draw(&mut self, call: &DrawCall) {
        let Some(bound) = &self.bound else {
            return;
        };
        let Some(handle) = self.state.shader else {
            trace!("draw skipped, no program bound");
            return;
        };
        let Some(shader) = self.shaders.get(handle) else {
            return;
        };

        let geometry = match (call.primitive, shader.vertex_layout) {
            (DrawPrimitive::Fullscreen, VertexLayout::Fullscreen) => None,
            (DrawPrimitive::Geometry(geometry), VertexLayout::Mesh) => match self.geometries.get(geometry) {
                Some(geometry) => Some(geometry),
                None => {
                    trace!("draw skipped, stale geometry");
                    return;
                }
            },
            (_, expected) => {
                warn!("draw skipped, '{}' expects {expected:?} input", shader.name);
                return;
            }
        };

        let lighting = if shader.uses_lighting {
            let Some(buffer) = self.state.lighting_buffer.and_then(|b| self.buffers.get(b)) else {
                warn!("draw skipped, '{}' needs a lighting block", shader.name);
                return;
            };
            Some(buffer)
        } else {
            None
        };

        let key = PipelineKey {
            shader: handle,
            vertex_layout: shader.vertex_layout,
            color_targets: color_targets(&bound.formats, shader.color_outputs, self.state.blend, self.state.color_write),
            depth_stencil: bound.depth.as_ref().map(|(_, format)| self.depth_stencil_key(*format)),
            cull_mode: cull_face(self.state.cull),
        };
        let pipeline = self
            .pipelines
            .entry(key)
            .or_insert_with_key(|key| Self::create_pipeline(&self.device, key, shader));

        let offset = self.uniforms.push(&self.queue, &shader.uniform_data);
        let mut uniform_entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &self.uniforms.buffer,
                offset: 0,
                size: wgpu::BufferSize::new(u64::from(shader.layout.size)),
            }),
        }];
        if let Some(lighting) = lighting {
            uniform_entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: lighting.as_entire_binding(),
            });
        }
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&shader.name),
            layout: &shader.uniform_group,
            entries: &uniform_entries,
        });

        let mut texture_entries = Vec::with_capacity(shader.samplers.len() * 2);
        for (unit, decl) in shader.samplers.iter().enumerate() {
            let texture = self
                .bound_textures
                .get(&(unit as u32))
                .and_then(|&h| self.textures.get(h))
                .filter(|t| t.kind == decl.kind)
                .or_else(|| self.blanks.get(&decl.kind).and_then(|&h| self.textures.get(h)));
            let Some(texture) = texture else {
                warn!("draw skipped, no texture for '{}' of '{}'", decl.name, shader.name);
                return;
            };
            let sampler = match decl.kind {
                TextureKind::DepthArray => &self.shadow_sampler,
                _ => &self.linear_sampler,
            };
            let binding = unit as u32 * 2;
            texture_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&texture.sampled),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&shader.name),
            layout: &shader.texture_group,
            entries: &texture_entries,
        });

        let viewport = self.state.viewport;
        let x = viewport.x.min(bound.width);
        let y = viewport.y.min(bound.height);
        let width = viewport.width.min(bound.width - x);
        let height = viewport.height.min(bound.height - y);
        let stencil_ref = u32::from(self.state.stencil_ref);

        Self::submit_pass(
            &self.device,
            &self.queue,
            bound,
            wgpu::LoadOp::Load,
            wgpu::LoadOp::Load,
            wgpu::LoadOp::Load,
            |pass| {
                pass.set_viewport(x as f32, y as f32, width as f32, height as f32, 0.0, 1.0);
                pass.set_pipeline(pipeline);
                pass.set_stencil_reference(stencil_ref);
                pass.set_bind_group(0, &uniform_group, &[offset]);
                pass.set_bind_group(1, &texture_group, &[]);
                match geometry {
                    None => pass.draw(0..3, 0..1),
                    Some(geometry) => {
                        pass.set_vertex_buffer(0, geometry.vertices.slice(..));
                        match &geometry.indices {
                            Some(indices) => {
                                pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                                pass.draw_indexed(0..geometry.count, 0, 0..1);
                            }
                            None => pass.draw(0..geometry.count, 0..1),
                        }
                    }
                }
            },
        );
    }

    fn shader_factory(&mut self) -> &mut ShaderFactory {
        &mut self.factory
    }
}
