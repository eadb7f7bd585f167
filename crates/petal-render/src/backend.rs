//! `wgpu` implementation of [`RenderContext`].
//!
//! GPU objects live in tables keyed by the opaque handles the trait hands
//! out. Each `draw_quads` call records and submits one render pass that loads
//! the current target, so draws land in call order without a frame graph.
//!
//! Offscreen framebuffers are only ever read from here. Drawing into a
//! texture goes through [`RenderContext::set_render_target`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::HashMap;
use parking_lot::Mutex;
use petal_core::profiling::{profile_function, profile_scope};
use petal_test_utils::{
    FramebufferId, FramebufferStatus, GpuError, ProgramId, RenderContext, RenderbufferId, SamplerParams, ShaderId,
    ShaderStage, SpriteVertex, TextureDesc, TextureId, Viewport, quad_indices,
};
use tracing::{debug, info, trace, warn};

use crate::readback;
use crate::sampler_cache::SamplerCache;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Format used to validate programs when they are linked.
const LINK_CHECK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Entry point each shader stage must define.
fn entry_point(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vs_main",
        ShaderStage::Fragment => "fs_main",
    }
}

/// Descriptor for configuring device creation.
#[derive(Debug, Clone)]
pub struct WgpuContextDescriptor {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    pub limits: wgpu::Limits,
    pub label: Option<&'static str>,
}

impl Default for WgpuContextDescriptor {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            limits: wgpu::Limits::default(),
            label: Some("petal_device"),
        }
    }
}

impl WgpuContextDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }

    pub fn power_preference(mut self, preference: wgpu::PowerPreference) -> Self {
        self.power_preference = preference;
        self
    }

    /// Use the software adapter, if the platform has one.
    pub fn force_fallback_adapter(mut self, force: bool) -> Self {
        self.force_fallback_adapter = force;
        self
    }

    pub fn limits(mut self, limits: wgpu::Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }
}

/// The window's current frame, drawn to when no render target is set.
struct SurfaceTarget {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
    sampling: SamplerParams,
    /// Rebuilt lazily after the sampling changes.
    bind_group: Option<wgpu::BindGroup>,
}

impl GpuTexture {
    fn bytes_per_pixel(&self) -> Result<u32, GpuError> {
        self.desc
            .format
            .block_copy_size(None)
            .ok_or_else(|| GpuError::Backend(format!("{:?} has no fixed texel size", self.desc.format)))
    }
}

#[derive(Default)]
struct Framebuffer {
    color: Option<TextureId>,
    depth: Option<RenderbufferId>,
}

struct Renderbuffer {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

struct Shader {
    stage: ShaderStage,
    module: wgpu::ShaderModule,
}

struct Program {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    uniforms: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Fixed-function state that is baked into a render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    front_face: wgpu::FrontFace,
    cull: Option<wgpu::Face>,
}

struct BackendState {
    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    renderbuffers: HashMap<RenderbufferId, Renderbuffer>,
    shaders: HashMap<ShaderId, Shader>,
    programs: HashMap<ProgramId, Program>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    bound_texture: Option<TextureId>,
    program: Option<ProgramId>,
    blend: Option<wgpu::BlendState>,
    front_face: wgpu::FrontFace,
    cull: Option<wgpu::Face>,
    depth_warned: bool,
    viewport: Viewport,
    render_target: Option<TextureId>,
    surface: Option<SurfaceTarget>,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    index_quads: usize,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            next_id: 0,
            textures: HashMap::default(),
            framebuffers: HashMap::default(),
            renderbuffers: HashMap::default(),
            shaders: HashMap::default(),
            programs: HashMap::default(),
            pipelines: HashMap::default(),
            bound_texture: None,
            program: None,
            blend: None,
            front_face: wgpu::FrontFace::Cw,
            cull: None,
            depth_warned: false,
            viewport: Viewport::default(),
            render_target: None,
            surface: None,
            vertex_buffer: None,
            index_buffer: None,
            index_quads: 0,
        }
    }
}

impl BackendState {
    fn next<T>(&mut self, wrap: fn(u32) -> Option<T>) -> Result<T, GpuError> {
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| GpuError::Backend("handle space exhausted".to_string()))?;
        wrap(self.next_id).ok_or_else(|| GpuError::Backend("handle space exhausted".to_string()))
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, GpuError> {
        self.textures.get(&id).ok_or_else(|| GpuError::InvalidHandle(id.to_string()))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut GpuTexture, GpuError> {
        self.textures
            .get_mut(&id)
            .ok_or_else(|| GpuError::InvalidHandle(id.to_string()))
    }

    fn program(&self, id: ProgramId) -> Result<&Program, GpuError> {
        self.programs.get(&id).ok_or_else(|| GpuError::InvalidHandle(id.to_string()))
    }
}

/// A [`RenderContext`] backed by a `wgpu` device.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use petal_render::{SpriteBatch, WgpuRenderContext};
///
/// let ctx = WgpuRenderContext::new_owned_sync().expect("no GPU");
/// let batch = SpriteBatch::new(ctx.clone()).expect("sprite program");
/// ```
pub struct WgpuRenderContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    samplers: SamplerCache,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    lost: Arc<AtomicBool>,
    state: Mutex<BackendState>,
}

impl WgpuRenderContext {
    pub async fn new_owned() -> Result<Arc<Self>, GpuError> {
        Self::new_owned_with_descriptor(WgpuContextDescriptor::default()).await
    }

    /// Create a context, blocking the current thread until the device is ready.
    pub fn new_owned_sync() -> Result<Arc<Self>, GpuError> {
        pollster::block_on(Self::new_owned())
    }

    pub fn new_owned_sync_with_descriptor(descriptor: WgpuContextDescriptor) -> Result<Arc<Self>, GpuError> {
        pollster::block_on(Self::new_owned_with_descriptor(descriptor))
    }

    pub async fn new_owned_with_descriptor(descriptor: WgpuContextDescriptor) -> Result<Arc<Self>, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: descriptor.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: descriptor.power_preference,
                compatible_surface: None,
                force_fallback_adapter: descriptor.force_fallback_adapter,
            })
            .await
            .map_err(|err| GpuError::Backend(format!("no suitable GPU adapter: {err}")))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: descriptor.label,
                required_limits: descriptor.limits.clone(),
                ..Default::default()
            })
            .await
            .map_err(|err| GpuError::Backend(format!("failed to create device: {err}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, %message, "GPU device lost");
            flag.store(true, Ordering::Release);
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("petal_uniform_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("petal_texture_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("petal_sprite_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        info!(adapter = %adapter.get_info().name, "Created wgpu render context");

        Ok(Arc::new(Self {
            instance,
            adapter,
            device,
            queue,
            samplers: SamplerCache::new(),
            uniform_layout,
            texture_layout,
            pipeline_layout,
            lost,
            state: Mutex::new(BackendState::default()),
        }))
    }

    pub fn info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Draw to `view` whenever no render target is set.
    ///
    /// Call once per frame with the acquired swapchain texture. The viewport
    /// is reset to cover the view when its size changes.
    pub fn set_surface_target(&self, view: wgpu::TextureView, format: wgpu::TextureFormat, width: u32, height: u32) {
        let mut state = self.state.lock();
        let resized = state
            .surface
            .as_ref()
            .is_none_or(|surface| surface.width != width || surface.height != height);
        if resized {
            state.viewport = Viewport::new(0, 0, width, height);
            debug!(width, height, "Surface target resized");
        }
        state.surface = Some(SurfaceTarget {
            view,
            format,
            width,
            height,
        });
    }

    /// Forget the surface view, typically after presenting it.
    pub fn clear_surface_target(&self) {
        self.state.lock().surface = None;
    }

    /// Clear the current draw target to `color`.
    pub fn clear(&self, color: wgpu::Color) -> Result<(), GpuError> {
        self.check_lost()?;
        let view = {
            let state = self.state.lock();
            Self::target(&state)?.0
        };
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("petal_clear_encoder"),
        });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("petal_clear_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// Number of distinct samplers created so far.
    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }

    fn check_lost(&self) -> Result<(), GpuError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(GpuError::ContextLost);
        }
        Ok(())
    }

    /// View, format and size of the current draw target.
    fn target(state: &BackendState) -> Result<(wgpu::TextureView, wgpu::TextureFormat, u32, u32), GpuError> {
        match state.render_target {
            Some(id) => {
                let texture = state.texture(id)?;
                Ok((texture.view.clone(), texture.desc.format, texture.desc.width, texture.desc.height))
            }
            None => state
                .surface
                .as_ref()
                .map(|s| (s.view.clone(), s.format, s.width, s.height))
                .ok_or_else(|| GpuError::Backend("no draw target: set a surface target or render target".to_string())),
        }
    }

    fn create_pipeline(&self, program: &Program, key: &PipelineKey) -> wgpu::RenderPipeline {
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("petal_sprite_pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.vertex,
                entry_point: Some(entry_point(ShaderStage::Vertex)),
                buffers: &[SpriteVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.fragment,
                entry_point: Some(entry_point(ShaderStage::Fragment)),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.format,
                    blend: key.blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: key.front_face,
                cull_mode: key.cull,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    /// Make sure `slot` holds a buffer of at least `size` bytes.
    fn ensure_buffer(
        device: &wgpu::Device,
        slot: &mut Option<wgpu::Buffer>,
        size: wgpu::BufferAddress,
        usage: wgpu::BufferUsages,
        label: &'static str,
    ) {
        if slot.as_ref().is_some_and(|buffer| buffer.size() >= size) {
            return;
        }
        let size = size.next_power_of_two().max(wgpu::COPY_BUFFER_ALIGNMENT);
        trace!(label, size, "Growing buffer");
        *slot = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
    }
}

impl RenderContext for WgpuRenderContext {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, GpuError> {
        profile_function!();
        self.check_lost()?;
        let mut usage =
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("petal_texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_level_count.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut state = self.state.lock();
        let id = state.next(TextureId::from_raw)?;
        state.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: *desc,
                sampling: SamplerParams::default(),
                bind_group: None,
            },
        );
        Ok(id)
    }

    fn is_texture_alive(&self, texture: TextureId) -> bool {
        !self.lost.load(Ordering::Acquire) && self.state.lock().textures.contains_key(&texture)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut state = self.state.lock();
        if let Some(gpu) = state.textures.remove(&texture) {
            gpu.texture.destroy();
        }
        if state.render_target == Some(texture) {
            state.render_target = None;
        }
        if state.bound_texture == Some(texture) {
            state.bound_texture = None;
        }
    }

    fn bind_texture(&self, texture: TextureId) -> Result<(), GpuError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        state.texture(texture)?;
        state.bound_texture = Some(texture);
        Ok(())
    }

    fn set_texture_sampling(&self, texture: TextureId, params: &SamplerParams) -> Result<(), GpuError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        let gpu = state.texture_mut(texture)?;
        if gpu.sampling != *params {
            gpu.sampling = *params;
            gpu.bind_group = None;
        }
        Ok(())
    }

    fn upload_texture(&self, texture: TextureId, level: u32, data: &[u8]) -> Result<(), GpuError> {
        profile_function!();
        self.check_lost()?;
        let state = self.state.lock();
        let gpu = state.texture(texture)?;
        if level >= gpu.desc.mip_level_count.max(1) {
            return Err(GpuError::Backend(format!("{texture} has no mip level {level}")));
        }

        let width = (gpu.desc.width >> level).max(1);
        let height = (gpu.desc.height >> level).max(1);
        let bytes_per_pixel = gpu.bytes_per_pixel()?;
        let expected = (width * height * bytes_per_pixel) as usize;
        if data.len() != expected {
            return Err(GpuError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_pixel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(&self, texture: TextureId) -> Result<Vec<u8>, GpuError> {
        self.check_lost()?;
        let (gpu_texture, bytes_per_pixel) = {
            let state = self.state.lock();
            let gpu = state.texture(texture)?;
            (gpu.texture.clone(), gpu.bytes_per_pixel()?)
        };
        readback::read_texture(&self.device, &self.queue, &gpu_texture, bytes_per_pixel)
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, GpuError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        let id = state.next(FramebufferId::from_raw)?;
        state.framebuffers.insert(id, Framebuffer::default());
        Ok(id)
    }

    fn create_depth_renderbuffer(&self, width: u32, height: u32) -> Result<RenderbufferId, GpuError> {
        self.check_lost()?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("petal_depth_renderbuffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let mut state = self.state.lock();
        let id = state.next(RenderbufferId::from_raw)?;
        state.renderbuffers.insert(
            id,
            Renderbuffer {
                texture,
                width,
                height,
            },
        );
        Ok(id)
    }

    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        state.texture(texture)?;
        let fb = state
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| GpuError::InvalidHandle(framebuffer.to_string()))?;
        fb.color = Some(texture);
        Ok(())
    }

    fn attach_depth(&self, framebuffer: FramebufferId, renderbuffer: RenderbufferId) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        if !state.renderbuffers.contains_key(&renderbuffer) {
            return Err(GpuError::InvalidHandle(renderbuffer.to_string()));
        }
        let fb = state
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| GpuError::InvalidHandle(framebuffer.to_string()))?;
        fb.depth = Some(renderbuffer);
        Ok(())
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let state = self.state.lock();
        let Some(fb) = state.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Unsupported;
        };
        let Some(color) = fb.color else {
            return FramebufferStatus::MissingAttachment;
        };
        let Some(texture) = state.textures.get(&color) else {
            return FramebufferStatus::IncompleteAttachment;
        };
        if !texture.desc.render_target {
            return FramebufferStatus::IncompleteAttachment;
        }
        if let Some(depth) = fb.depth {
            match state.renderbuffers.get(&depth) {
                None => return FramebufferStatus::IncompleteAttachment,
                Some(rb) if rb.width != texture.desc.width || rb.height != texture.desc.height => {
                    return FramebufferStatus::IncompleteDimensions;
                }
                Some(_) => {}
            }
        }
        FramebufferStatus::Complete
    }

    fn read_pixels(&self, framebuffer: FramebufferId) -> Result<Vec<u8>, GpuError> {
        let color = {
            let state = self.state.lock();
            state
                .framebuffers
                .get(&framebuffer)
                .ok_or_else(|| GpuError::InvalidHandle(framebuffer.to_string()))?
                .color
        };
        let color = color.ok_or_else(|| GpuError::Backend(format!("{framebuffer} has no color attachment")))?;
        self.read_texture(color)
    }

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferId) {
        if let Some(rb) = self.state.lock().renderbuffers.remove(&renderbuffer) {
            rb.texture.destroy();
        }
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn bind_default_framebuffer(&self) {
        // Framebuffers never become draw targets here, so there is nothing to
        // restore; the draw target only changes through set_render_target.
        trace!("Default framebuffer bound");
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError> {
        profile_function!();
        self.check_lost()?;
        let entry = entry_point(stage);
        if !source.contains(&format!("fn {entry}")) {
            return Err(GpuError::CompileFailed {
                stage,
                log: format!("missing entry point `{entry}`"),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("petal_sprite_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::CompileFailed {
                stage,
                log: err.to_string(),
            });
        }

        let mut state = self.state.lock();
        let id = state.next(ShaderId::from_raw)?;
        state.shaders.insert(id, Shader { stage, module });
        Ok(id)
    }

    fn link_program(&self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GpuError> {
        profile_function!();
        self.check_lost()?;
        let (vertex_module, fragment_module) = {
            let state = self.state.lock();
            let module = |id: ShaderId, stage: ShaderStage| match state.shaders.get(&id) {
                Some(shader) if shader.stage == stage => Ok(shader.module.clone()),
                Some(shader) => Err(GpuError::LinkFailed(format!(
                    "{id} is a {} shader, expected {stage}",
                    shader.stage
                ))),
                None => Err(GpuError::InvalidHandle(id.to_string())),
            };
            (module(vertex, ShaderStage::Vertex)?, module(fragment, ShaderStage::Fragment)?)
        };

        let uniforms = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("petal_wvp_uniform"),
            size: std::mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("petal_wvp_bind_group"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });
        let program = Program {
            vertex: vertex_module,
            fragment: fragment_module,
            uniforms,
            bind_group,
        };

        let mut state = self.state.lock();
        let id = state.next(ProgramId::from_raw)?;

        // Building a pipeline checks the stage interfaces against each other
        // and against the sprite vertex layout.
        let key = PipelineKey {
            program: id,
            format: LINK_CHECK_FORMAT,
            blend: None,
            front_face: wgpu::FrontFace::Cw,
            cull: None,
        };
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.create_pipeline(&program, &key);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::LinkFailed(err.to_string()));
        }

        state.pipelines.insert(key, pipeline);
        state.programs.insert(id, program);
        debug!(program = %id, "Linked sprite program");
        Ok(id)
    }

    fn use_program(&self, program: ProgramId) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        state.program(program)?;
        state.program = Some(program);
        Ok(())
    }

    fn set_uniform_matrix(&self, program: ProgramId, name: &str, value: &[f32; 16]) -> Result<(), GpuError> {
        self.check_lost()?;
        let state = self.state.lock();
        // Sprite programs declare a single matrix uniform at group 0.
        let gpu = state.program(program)?;
        self.queue.write_buffer(&gpu.uniforms, 0, bytemuck::cast_slice(value));
        trace!(%program, name, "Uploaded matrix uniform");
        Ok(())
    }

    fn set_blend(&self, blend: Option<wgpu::BlendState>) {
        self.state.lock().blend = blend;
    }

    fn set_cull(&self, front_face: wgpu::FrontFace, cull: Option<wgpu::Face>) {
        let mut state = self.state.lock();
        state.front_face = front_face;
        state.cull = cull;
    }

    fn set_depth(&self, compare: Option<wgpu::CompareFunction>, write: bool) {
        let mut state = self.state.lock();
        if (compare.is_some() || write) && !state.depth_warned {
            state.depth_warned = true;
            warn!(?compare, write, "Depth testing is not supported for sprites; depth only orders the batch");
        }
    }

    fn viewport(&self) -> Viewport {
        self.state.lock().viewport
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.state.lock().viewport = viewport;
    }

    fn set_render_target(&self, target: Option<TextureId>) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        if let Some(id) = target
            && !state.texture(id)?.desc.render_target
        {
            return Err(GpuError::Backend(format!("{id} is not a render target")));
        }
        state.render_target = target;
        Ok(())
    }

    fn render_target(&self) -> Option<TextureId> {
        self.state.lock().render_target
    }

    fn draw_quads(&self, texture: TextureId, vertices: &[SpriteVertex]) -> Result<(), GpuError> {
        profile_function!();
        self.check_lost()?;
        if vertices.len() % 4 != 0 {
            return Err(GpuError::Backend(format!("{} vertices do not form whole quads", vertices.len())));
        }
        if vertices.is_empty() {
            return Ok(());
        }
        let quads = vertices.len() / 4;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (view, format, target_width, target_height) = Self::target(state)?;
        let program_id = state
            .program
            .ok_or_else(|| GpuError::Backend("no program in use".to_string()))?;

        let key = PipelineKey {
            program: program_id,
            format,
            blend: state.blend,
            front_face: state.front_face,
            cull: state.cull,
        };
        if !state.pipelines.contains_key(&key) {
            profile_scope!("create_pipeline");
            let pipeline = self.create_pipeline(state.program(program_id)?, &key);
            state.pipelines.insert(key, pipeline);
            debug!(?key, "Created sprite pipeline");
        }

        let gpu = state.texture_mut(texture)?;
        if gpu.bind_group.is_none() {
            let sampler = self.samplers.get_or_create(&self.device, &gpu.sampling);
            gpu.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("petal_texture_bind_group"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&gpu.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
            }));
        }

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        Self::ensure_buffer(
            &self.device,
            &mut state.vertex_buffer,
            vertex_bytes.len() as wgpu::BufferAddress,
            wgpu::BufferUsages::VERTEX,
            "petal_sprite_vertices",
        );
        if state.index_quads < quads {
            let indices = quad_indices(quads.next_power_of_two());
            let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
            Self::ensure_buffer(
                &self.device,
                &mut state.index_buffer,
                index_bytes.len() as wgpu::BufferAddress,
                wgpu::BufferUsages::INDEX,
                "petal_sprite_indices",
            );
            if let Some(buffer) = &state.index_buffer {
                self.queue.write_buffer(buffer, 0, index_bytes);
            }
            state.index_quads = quads.next_power_of_two();
        }

        let (Some(vertex_buffer), Some(index_buffer)) = (&state.vertex_buffer, &state.index_buffer) else {
            return Err(GpuError::Backend("sprite buffers were not created".to_string()));
        };
        self.queue.write_buffer(vertex_buffer, 0, vertex_bytes);

        let (Some(pipeline), Some(texture_group)) = (
            state.pipelines.get(&key),
            state.textures.get(&texture).and_then(|t| t.bind_group.as_ref()),
        ) else {
            return Err(GpuError::InvalidHandle(texture.to_string()));
        };
        let program = state.program(program_id)?;

        // Clamp to the target; an empty viewport covers the whole target.
        let viewport = state.viewport;
        let (x, y) = (viewport.x.max(0) as u32, viewport.y.max(0) as u32);
        let (width, height) = if viewport.width == 0 || viewport.height == 0 {
            (target_width, target_height)
        } else {
            (
                viewport.width.min(target_width.saturating_sub(x)),
                viewport.height.min(target_height.saturating_sub(y)),
            )
        };
        if width == 0 || height == 0 {
            return Ok(());
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("petal_sprite_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("petal_sprite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &program.bind_group, &[]);
            pass.set_bind_group(1, texture_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..vertex_bytes.len() as wgpu::BufferAddress));
            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.set_viewport(x as f32, y as f32, width as f32, height as f32, 0.0, 1.0);
            pass.draw_indexed(0..(quads * 6) as u32, 0, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        trace!(%texture, quads, "Submitted sprite draw");
        Ok(())
    }
}

impl std::fmt::Debug for WgpuRenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WgpuRenderContext")
            .field("adapter", &self.adapter.get_info().name)
            .field("textures", &state.textures.len())
            .field("programs", &state.programs.len())
            .field("pipelines", &state.pipelines.len())
            .field("render_target", &state.render_target)
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sprite_batch::SPRITE_SHADER;

    fn context() -> Arc<WgpuRenderContext> {
        WgpuRenderContext::new_owned_sync().expect("a GPU adapter")
    }

    fn rgba(width: u32, height: u32, render_target: bool) -> TextureDesc {
        TextureDesc {
            width,
            height,
            format: wgpu::TextureFormat::Rgba8Unorm,
            mip_level_count: 1,
            render_target,
        }
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_upload_and_read_back() {
        let ctx = context();
        let texture = ctx.create_texture(&rgba(3, 2, false)).unwrap();
        let pixels: Vec<u8> = (0..24).collect();
        ctx.upload_texture(texture, 0, &pixels).unwrap();
        assert_eq!(ctx.read_texture(texture).unwrap(), pixels);
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_upload_size_mismatch() {
        let ctx = context();
        let texture = ctx.create_texture(&rgba(2, 2, false)).unwrap();
        assert!(matches!(
            ctx.upload_texture(texture, 0, &[0; 4]),
            Err(GpuError::SizeMismatch { expected: 16, actual: 4 })
        ));
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_compile_errors_are_reported() {
        let ctx = context();
        assert!(matches!(
            ctx.compile_shader(ShaderStage::Vertex, "fn vs_main() -> garbage {"),
            Err(GpuError::CompileFailed { stage: ShaderStage::Vertex, .. })
        ));
        let vs = ctx.compile_shader(ShaderStage::Vertex, SPRITE_SHADER).unwrap();
        assert!(matches!(ctx.link_program(vs, vs), Err(GpuError::LinkFailed(_))));
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_framebuffer_status() {
        let ctx = context();
        let target = ctx.create_texture(&rgba(4, 4, true)).unwrap();
        let fb = ctx.create_framebuffer().unwrap();
        assert_eq!(ctx.framebuffer_status(fb), FramebufferStatus::MissingAttachment);

        ctx.attach_color(fb, target).unwrap();
        let depth = ctx.create_depth_renderbuffer(8, 8).unwrap();
        ctx.attach_depth(fb, depth).unwrap();
        assert_eq!(ctx.framebuffer_status(fb), FramebufferStatus::IncompleteDimensions);
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_lost_device_rejects_every_entry_point() {
        let ctx = context();
        let texture = ctx.create_texture(&rgba(2, 2, false)).unwrap();
        ctx.lost.store(true, Ordering::Release);

        assert!(matches!(
            ctx.set_texture_sampling(texture, &SamplerParams::default()),
            Err(GpuError::ContextLost)
        ));
        assert!(matches!(ctx.bind_texture(texture), Err(GpuError::ContextLost)));
        assert!(!ctx.is_texture_alive(texture));
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_draw_into_render_target() {
        let ctx = context();
        let vs = ctx.compile_shader(ShaderStage::Vertex, SPRITE_SHADER).unwrap();
        let fs = ctx.compile_shader(ShaderStage::Fragment, SPRITE_SHADER).unwrap();
        let program = ctx.link_program(vs, fs).unwrap();

        let source = ctx.create_texture(&rgba(1, 1, false)).unwrap();
        ctx.upload_texture(source, 0, &[255, 255, 255, 255]).unwrap();
        let target = ctx.create_texture(&rgba(2, 2, true)).unwrap();
        ctx.set_render_target(Some(target)).unwrap();
        ctx.set_viewport(Viewport::new(0, 0, 2, 2));
        ctx.use_program(program).unwrap();
        // Clip space covers the target directly.
        ctx.set_uniform_matrix(program, "u_world_view_projection", &glam::Mat4::IDENTITY.to_cols_array())
            .unwrap();

        let corner = |x: f32, y: f32| SpriteVertex {
            position: [x, y],
            tex_coord: [0.5, 0.5],
            color: [255, 0, 0, 255],
        };
        let quad = [corner(-1.0, 1.0), corner(1.0, 1.0), corner(-1.0, -1.0), corner(1.0, -1.0)];
        ctx.draw_quads(source, &quad).unwrap();

        let pixels = ctx.read_texture(target).unwrap();
        assert!(pixels.chunks(4).all(|p| p == [255, 0, 0, 255]));
    }
}
