//! Headless Backend
//!
//! A CPU implementation of [`Driver`] that allocates handles, records every
//! call and emulates the fixed-function stencil, depth and color tests on
//! slice 0 / mip 0 of each target. Draws describe their footprint through
//! [`DrawCall::coverage`] and tag the color buffer with [`DrawCall::tag`], so
//! tests can assert on the exact per-pixel outcome of a pass sequence.
//!
//! Failure injection covers the recoverable error paths of the pipeline:
//! render target allocation ceilings, forced shader compile failures and
//! context loss.

use std::rc::Rc;

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::context::{GpuContext, GpuResource};
use super::driver::{Driver, TextureDesc};
use super::target::RenderTarget;
use super::types::{
    BlendMode, BufferHandle, ClearFlags, CullMode, DrawCall, DrawPrimitive, DriverCapabilities,
    GeometryData, GeometryHandle, RenderTargetDesc, RenderTargetHandle, RenderTargetSelection,
    RenderTargetType, ShaderHandle, ShaderSource, StencilFunc, StencilOp, StencilOps,
    TextureHandle, TextureKind, UniformSlot, UniformValue, Viewport,
};
use crate::errors::{MirageError, Result};
use crate::renderer::pipeline::factory::ShaderFactory;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    BeginFrame(u64),
    EndFrame,
    NewRenderTarget { label: String, width: u32, height: u32 },
    BindRenderTarget { label: String, selection: RenderTargetSelection },
    Clear(ClearFlags),
    CompileShader(String),
    BindShader(String),
    UnbindShader,
    Draw { shader: Option<String>, tag: u32 },
}

/// Snapshot of the pipeline state at a draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub frame: u64,
    pub target: RenderTargetHandle,
    pub target_label: String,
    pub selection: RenderTargetSelection,
    pub shader: Option<ShaderHandle>,
    pub shader_name: Option<String>,
    /// Texture bound at each sampler unit the program declares.
    pub textures: Vec<Option<TextureHandle>>,
    pub uniforms: Vec<(UniformSlot, UniformValue)>,
    pub lighting_buffer: Option<BufferHandle>,
    pub color_write: bool,
    pub depth_write: bool,
    pub stencil_test: bool,
    pub blend: BlendMode,
    pub tag: u32,
}

#[derive(Debug)]
struct Surface {
    width: u32,
    height: u32,
    color: Vec<u32>,
    depth: Vec<f32>,
    stencil: Vec<u8>,
}

impl Surface {
    fn new(width: u32, height: u32) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            color: vec![0; len],
            depth: vec![1.0; len],
            stencil: vec![0; len],
        }
    }
}

#[derive(Debug)]
struct HeadlessTarget {
    desc: RenderTargetDesc,
    textures: SmallVec<[TextureHandle; 4]>,
    surface: Option<Surface>,
}

#[derive(Debug)]
struct HeadlessTexture {
    label: String,
    kind: TextureKind,
}

#[derive(Debug)]
struct HeadlessShader {
    name: String,
    sampler_count: usize,
    uniforms: FxHashMap<UniformSlot, UniformValue>,
}

#[derive(Debug, Clone, Copy)]
struct PipelineState {
    target: Option<RenderTargetHandle>,
    selection: RenderTargetSelection,
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

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            target: None,
            selection: RenderTargetSelection::default(),
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

/// CPU-side [`Driver`] for tests and validation.
pub struct HeadlessDriver {
    context: GpuContext,
    capabilities: DriverCapabilities,
    factory: ShaderFactory,

    targets: SlotMap<RenderTargetHandle, HeadlessTarget>,
    textures: SlotMap<TextureHandle, HeadlessTexture>,
    shaders: SlotMap<ShaderHandle, HeadlessShader>,
    buffers: SlotMap<BufferHandle, Vec<u8>>,
    geometries: SlotMap<GeometryHandle, usize>,
    blanks: FxHashMap<TextureKind, TextureHandle>,
    display: Rc<RenderTarget>,
    display_size: (u32, u32),

    state: PipelineState,
    bound_textures: FxHashMap<u32, TextureHandle>,

    frame: u64,
    commands: Vec<DriverCommand>,
    draws: Vec<DrawRecord>,

    failing_shaders: FxHashSet<String>,
    max_target_size: Option<u32>,
}

impl HeadlessDriver {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_capabilities(width, height, DriverCapabilities::default())
    }

    pub fn with_capabilities(width: u32, height: u32, capabilities: DriverCapabilities) -> Result<Self> {
        let context = GpuContext::new();
        let factory = ShaderFactory::new(capabilities.srgb_framebuffer)?;
        let mut targets = SlotMap::with_key();
        let display = Self::make_display(&context, &mut targets, width, height);

        Ok(Self {
            context,
            capabilities,
            factory,
            targets,
            textures: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            geometries: SlotMap::with_key(),
            blanks: FxHashMap::default(),
            display,
            display_size: (width, height),
            state: PipelineState::default(),
            bound_textures: FxHashMap::default(),
            frame: 0,
            commands: Vec::new(),
            draws: Vec::new(),
            failing_shaders: FxHashSet::default(),
            max_target_size: None,
        })
    }

    fn make_display(
        context: &GpuContext,
        targets: &mut SlotMap<RenderTargetHandle, HeadlessTarget>,
        width: u32,
        height: u32,
    ) -> Rc<RenderTarget> {
        let desc = RenderTargetDesc::new("display", RenderTargetType::Display, width, height)
            .with_depth_stencil(true, true);
        let handle = targets.insert(HeadlessTarget {
            desc: desc.clone(),
            textures: SmallVec::new(),
            surface: None,
        });
        Rc::new(RenderTarget::new(
            handle,
            desc,
            SmallVec::new(),
            None,
            context.downgrade(),
        ))
    }

    // ========================================================================
    // Failure injection
    // ========================================================================

    /// Render target allocations larger than `size` in either dimension fail.
    pub fn set_max_render_target_size(&mut self, size: Option<u32>) {
        self.max_target_size = size;
    }

    /// Programs whose name contains `pattern` fail to compile.
    pub fn fail_shaders_named(&mut self, pattern: impl Into<String>) {
        self.failing_shaders.insert(pattern.into());
    }

    /// Simulates losing and recreating the GPU context. Every handle
    /// allocated so far becomes stale and the program cache is cleared.
    pub fn lose_context(&mut self) {
        debug!("Headless context lost");
        self.context.invalidate();
        self.targets.clear();
        self.textures.clear();
        self.shaders.clear();
        self.buffers.clear();
        self.geometries.clear();
        self.blanks.clear();
        self.bound_textures.clear();
        self.state = PipelineState::default();
        self.factory.clear();
        self.context.restore();

        let (width, height) = self.display_size;
        self.display = Self::make_display(&self.context, &mut self.targets, width, height);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn commands(&self) -> &[DriverCommand] {
        &self.commands
    }

    #[must_use]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.draws.clear();
    }

    #[must_use]
    pub fn live_render_targets(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    #[must_use]
    pub fn shader_name(&self, shader: ShaderHandle) -> Option<&str> {
        self.shaders.get(shader).map(|s| s.name.as_str())
    }

    #[must_use]
    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.textures.get(texture).map(|t| t.label.as_str())
    }

    #[must_use]
    pub fn texture_kind(&self, texture: TextureHandle) -> Option<TextureKind> {
        self.textures.get(texture).map(|t| t.kind)
    }

    #[must_use]
    pub fn is_blank(&self, texture: TextureHandle) -> bool {
        self.blanks.values().any(|&blank| blank == texture)
    }

    #[must_use]
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer).map(Vec::as_slice)
    }

    /// Emulated stencil buffer of `target`, if anything has touched it.
    #[must_use]
    pub fn stencil_buffer(&self, target: &RenderTarget) -> Option<&[u8]> {
        self.targets
            .get(target.handle())
            .and_then(|t| t.surface.as_ref())
            .map(|s| s.stencil.as_slice())
    }

    /// Tag of the last draw that wrote color at `(x, y)`; 0 after a clear.
    #[must_use]
    pub fn color_tag_at(&self, target: &RenderTarget, x: u32, y: u32) -> Option<u32> {
        let surface = self.targets.get(target.handle())?.surface.as_ref()?;
        (x < surface.width && y < surface.height).then(|| surface.color[(y * surface.width + x) as usize])
    }

    #[must_use]
    pub fn stencil_at(&self, target: &RenderTarget, x: u32, y: u32) -> Option<u8> {
        let surface = self.targets.get(target.handle())?.surface.as_ref()?;
        (x < surface.width && y < surface.height).then(|| surface.stencil[(y * surface.width + x) as usize])
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn alloc_texture(&mut self, label: String, kind: TextureKind) -> TextureHandle {
        let handle = self.textures.insert(HeadlessTexture { label, kind });
        self.context.track_allocation(GpuResource::Texture(handle));
        handle
    }

    fn bound_surface(&mut self) -> Option<&mut Surface> {
        let handle = self.state.target?;
        if self.state.selection != RenderTargetSelection::default() {
            return None;
        }
        let target = self.targets.get_mut(handle)?;
        let (width, height) = (target.desc.width, target.desc.height);
        Some(target.surface.get_or_insert_with(|| Surface::new(width, height)))
    }

    fn emulate(&mut self, call: &DrawCall) {
        let state = self.state;
        let Some(surface) = self.bound_surface() else {
            return;
        };

        let (x0, y0, x1, y1) = match call.coverage {
            Some(rect) => (
                rect.x0.min(surface.width),
                rect.y0.min(surface.height),
                rect.x1.min(surface.width),
                rect.y1.min(surface.height),
            ),
            None => (0, 0, surface.width, surface.height),
        };

        let write_stencil = |stored: u8, op: StencilOp| -> u8 {
            let value = op.apply(stored, state.stencil_ref);
            (stored & !state.stencil_write_mask) | (value & state.stencil_write_mask)
        };

        for y in y0..y1 {
            for x in x0..x1 {
                let i = (y * surface.width + x) as usize;
                let stored = surface.stencil[i];

                if state.stencil_test
                    && !state.stencil_func.test(state.stencil_ref, stored, state.stencil_read_mask)
                {
                    surface.stencil[i] = write_stencil(stored, state.stencil_ops.fail);
                    continue;
                }

                if state.depth_read && call.depth >= surface.depth[i] {
                    if state.stencil_test {
                        surface.stencil[i] = write_stencil(stored, state.stencil_ops.depth_fail);
                    }
                    continue;
                }

                if state.stencil_test {
                    surface.stencil[i] = write_stencil(stored, state.stencil_ops.pass);
                }
                if state.depth_write {
                    surface.depth[i] = call.depth;
                }
                if state.color_write {
                    surface.color[i] = call.tag;
                }
            }
        }
    }
}

impl Driver for HeadlessDriver {
    fn context(&self) -> &GpuContext {
        &self.context
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        self.commands.push(DriverCommand::BeginFrame(frame));
    }

    fn end_frame(&mut self) {
        self.commands.push(DriverCommand::EndFrame);
    }

    fn collect_garbage(&mut self) {
        for resource in self.context.drain_pending() {
            match resource {
                GpuResource::RenderTarget(handle) => {
                    if let Some(target) = self.targets.remove(handle) {
                        for texture in target.textures {
                            self.textures.remove(texture);
                        }
                    }
                }
                GpuResource::Texture(handle) => {
                    self.textures.remove(handle);
                }
                GpuResource::Shader(handle) => {
                    self.shaders.remove(handle);
                    if self.state.shader == Some(handle) {
                        self.state.shader = None;
                    }
                }
                GpuResource::Buffer(handle) => {
                    self.buffers.remove(handle);
                }
                GpuResource::Geometry(handle) => {
                    self.geometries.remove(handle);
                }
            }
        }
    }

    fn new_render_target(&mut self, desc: &RenderTargetDesc) -> Result<Rc<RenderTarget>> {
        let limit = self
            .max_target_size
            .unwrap_or(u32::MAX)
            .min(self.capabilities.max_texture_size);
        if desc.width > limit || desc.height > limit {
            return Err(MirageError::RenderTargetCreation {
                label: desc.label.clone(),
                width: desc.width,
                height: desc.height,
                reason: format!("exceeds maximum size {limit}"),
            });
        }
        if desc.slices > self.capabilities.max_array_layers {
            return Err(MirageError::RenderTargetCreation {
                label: desc.label.clone(),
                width: desc.width,
                height: desc.height,
                reason: format!("{} array layers requested", desc.slices),
            });
        }

        let kind = desc.ty.sampled_kind();
        let mut color = SmallVec::new();
        if desc.ty.has_color() {
            for i in 0..desc.attachments {
                color.push(self.alloc_texture(format!("{}#{i}", desc.label), kind));
            }
        }
        let depth = desc
            .depth
            .then(|| self.alloc_texture(format!("{}#depth", desc.label), TextureKind::DepthArray));

        let mut owned = color.clone();
        owned.extend(depth);
        let handle = self.targets.insert(HeadlessTarget {
            desc: desc.clone(),
            textures: owned,
            surface: None,
        });
        self.context.track_allocation(GpuResource::RenderTarget(handle));
        self.commands.push(DriverCommand::NewRenderTarget {
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
        });
        debug!("Allocated render target '{}' {}x{}", desc.label, desc.width, desc.height);

        Ok(Rc::new(RenderTarget::new(
            handle,
            desc.clone(),
            color,
            depth,
            self.context.downgrade(),
        )))
    }

    fn display(&self) -> Rc<RenderTarget> {
        self.display.clone()
    }

    fn bind_render_target(&mut self, target: &RenderTarget, selection: RenderTargetSelection) {
        let (width, height) = target.desc().mip_extent(selection.mip);
        self.state.target = Some(target.handle());
        self.state.selection = selection;
        self.state.viewport = Viewport::new(width, height);
        self.commands.push(DriverCommand::BindRenderTarget {
            label: target.label().to_string(),
            selection,
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn clear(&mut self, flags: ClearFlags, _color: [f32; 4]) {
        self.commands.push(DriverCommand::Clear(flags));
        let state = self.state;
        let Some(surface) = self.bound_surface() else {
            return;
        };
        if flags.contains(ClearFlags::COLOR) && state.color_write {
            surface.color.fill(0);
        }
        if flags.contains(ClearFlags::DEPTH) && state.depth_write {
            surface.depth.fill(1.0);
        }
        if flags.contains(ClearFlags::STENCIL) {
            let mask = state.stencil_write_mask;
            for s in &mut surface.stencil {
                *s &= !mask;
            }
        }
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> std::result::Result<ShaderHandle, String> {
        if let Some(pattern) = self.failing_shaders.iter().find(|p| source.name.contains(p.as_str())) {
            return Err(format!("forced compile failure for '{}' (pattern '{pattern}')", source.name));
        }
        if !source.wgsl.contains("@fragment") {
            return Err(format!("program '{}' has no fragment entry point", source.name));
        }

        let handle = self.shaders.insert(HeadlessShader {
            name: source.name.clone(),
            sampler_count: source.samplers.len(),
            uniforms: FxHashMap::default(),
        });
        self.context.track_allocation(GpuResource::Shader(handle));
        self.commands.push(DriverCommand::CompileShader(source.name.clone()));
        Ok(handle)
    }

    fn bind_shader(&mut self, shader: ShaderHandle) {
        if let Some(s) = self.shaders.get(shader) {
            trace!("bind shader {}", s.name);
            self.commands.push(DriverCommand::BindShader(s.name.clone()));
            self.state.shader = Some(shader);
        }
    }

    fn unbind_shader(&mut self) {
        self.state.shader = None;
        self.commands.push(DriverCommand::UnbindShader);
    }

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue) {
        if let Some(shader) = self.state.shader.and_then(|s| self.shaders.get_mut(s)) {
            shader.uniforms.insert(slot, value);
        }
    }

    fn new_texture(&mut self, desc: &TextureDesc, _data: Option<&[u8]>) -> TextureHandle {
        self.alloc_texture(desc.label.clone(), desc.kind)
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.bound_textures.insert(unit, texture);
    }

    fn blank_texture(&mut self, kind: TextureKind) -> TextureHandle {
        if let Some(&blank) = self.blanks.get(&kind) {
            return blank;
        }
        let blank = self.alloc_texture(format!("blank_{kind:?}"), kind);
        self.blanks.insert(kind, blank);
        blank
    }

    fn new_geometry(&mut self, data: &GeometryData) -> GeometryHandle {
        self.geometries.insert(data.indices.len().max(data.vertices.len()))
    }

    fn new_uniform_buffer(&mut self, size: u64) -> BufferHandle {
        let handle = self.buffers.insert(vec![0; size as usize]);
        self.context.track_allocation(GpuResource::Buffer(handle));
        handle
    }

    fn write_uniform_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        if let Some(contents) = self.buffers.get_mut(buffer) {
            let len = data.len().min(contents.len());
            contents[..len].copy_from_slice(&data[..len]);
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
        let Some(target) = self.state.target else {
            return;
        };
        if let DrawPrimitive::Geometry(geometry) = call.primitive
            && !self.geometries.contains_key(geometry)
        {
            trace!("draw skipped, stale geometry");
            return;
        }

        let shader = self.state.shader.and_then(|s| self.shaders.get(s));
        let sampler_count = shader.map_or(0, |s| s.sampler_count);
        let textures = (0..sampler_count as u32)
            .map(|unit| self.bound_textures.get(&unit).copied())
            .collect();
        let mut uniforms: Vec<_> = shader
            .map(|s| s.uniforms.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        uniforms.sort_by_key(|(slot, _)| *slot);
        let shader_name = shader.map(|s| s.name.clone());

        let record = DrawRecord {
            frame: self.frame,
            target,
            target_label: self
                .targets
                .get(target)
                .map(|t| t.desc.label.clone())
                .unwrap_or_default(),
            selection: self.state.selection,
            shader: self.state.shader,
            shader_name: shader_name.clone(),
            textures,
            uniforms,
            lighting_buffer: self.state.lighting_buffer,
            color_write: self.state.color_write,
            depth_write: self.state.depth_write,
            stencil_test: self.state.stencil_test,
            blend: self.state.blend,
            tag: call.tag,
        };
        trace!("draw {:?} into '{}'", record.shader_name, record.target_label);
        self.draws.push(record);
        self.commands.push(DriverCommand::Draw {
            shader: shader_name,
            tag: call.tag,
        });

        self.emulate(call);
    }

    fn shader_factory(&mut self) -> &mut ShaderFactory {
        &mut self.factory
    }
}
