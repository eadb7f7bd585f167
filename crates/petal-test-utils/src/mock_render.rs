//! Mock implementation of RenderContext for testing.
//!
//! This module provides a GPU context that records operations and keeps
//! texture contents in memory without touching a GPU. Faults such as lost
//! textures, incomplete framebuffers or shader failures can be injected.

use ahash::HashMap;

use crate::{gpu_types::*, render_context::RenderContext};
use parking_lot::Mutex;

/// Records a GPU operation call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    CreateTexture {
        texture: TextureId,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    },
    DeleteTexture(TextureId),
    BindTexture(TextureId),
    SetTextureSampling {
        texture: TextureId,
        params: SamplerParams,
    },
    UploadTexture {
        texture: TextureId,
        level: u32,
        size: usize,
    },
    ReadTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    CreateRenderbuffer {
        renderbuffer: RenderbufferId,
        width: u32,
        height: u32,
    },
    AttachColor {
        framebuffer: FramebufferId,
        texture: TextureId,
    },
    AttachDepth {
        framebuffer: FramebufferId,
        renderbuffer: RenderbufferId,
    },
    CheckFramebuffer {
        framebuffer: FramebufferId,
        status: FramebufferStatus,
    },
    ReadPixels(FramebufferId),
    DeleteRenderbuffer(RenderbufferId),
    DeleteFramebuffer(FramebufferId),
    BindDefaultFramebuffer,
    CompileShader(ShaderStage),
    LinkProgram(ProgramId),
    UseProgram(ProgramId),
    SetUniformMatrix {
        program: ProgramId,
        name: String,
        value: [f32; 16],
    },
    SetBlend(Option<wgpu::BlendState>),
    SetCull {
        front_face: wgpu::FrontFace,
        cull: Option<wgpu::Face>,
    },
    SetDepth {
        compare: Option<wgpu::CompareFunction>,
        write: bool,
    },
    SetViewport(Viewport),
    SetRenderTarget(Option<TextureId>),
    DrawQuads {
        texture: TextureId,
        vertices: Vec<SpriteVertex>,
    },
}

/// A recorded `draw_quads` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub texture: TextureId,
    pub vertices: Vec<SpriteVertex>,
}

impl DrawCall {
    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }
}

#[derive(Debug, Clone)]
struct MockTexture {
    desc: TextureDesc,
    data: Vec<u8>,
    sampling: Option<SamplerParams>,
    lost: bool,
    deleted: bool,
}

impl MockTexture {
    fn is_live(&self) -> bool {
        !self.lost && !self.deleted
    }
}

#[derive(Debug, Clone, Default)]
struct MockFramebuffer {
    color: Option<TextureId>,
    depth: Option<RenderbufferId>,
}

#[derive(Debug, Default)]
struct MockState {
    /// Indexed by `TextureId::raw() - 1`; entries are never removed so ids stay unique.
    textures: Vec<MockTexture>,
    framebuffers: HashMap<FramebufferId, MockFramebuffer>,
    renderbuffers: HashMap<RenderbufferId, (u32, u32)>,
    next_framebuffer: u32,
    next_renderbuffer: u32,
    shaders: u32,
    programs: u32,
    uniforms: HashMap<(ProgramId, String), [f32; 16]>,
    viewport: Viewport,
    render_target: Option<TextureId>,
}

impl MockState {
    fn texture(&self, id: TextureId) -> Option<&MockTexture> {
        self.textures.get(id.raw() as usize - 1)
    }

    fn texture_mut(&mut self, id: TextureId) -> Option<&mut MockTexture> {
        self.textures.get_mut(id.raw() as usize - 1)
    }

    fn live_texture_mut(&mut self, id: TextureId) -> Result<&mut MockTexture, GpuError> {
        match self.texture_mut(id) {
            Some(texture) if texture.is_live() => Ok(texture),
            _ => Err(GpuError::InvalidHandle(id.to_string())),
        }
    }
}

/// Faults injected by tests.
#[derive(Debug, Default)]
struct Faults {
    framebuffer_status: Option<FramebufferStatus>,
    compile: Option<(ShaderStage, String)>,
    link: Option<String>,
    draws: bool,
}

fn next_id(counter: &mut u32) -> u32 {
    *counter += 1;
    *counter
}

fn handle<T>(raw: u32, wrap: fn(u32) -> Option<T>) -> Result<T, GpuError> {
    wrap(raw).ok_or_else(|| GpuError::Backend("handle space exhausted".to_string()))
}

/// Mock implementation of RenderContext for testing.
///
/// # Borrow Checking Pattern: Interior Mutability
///
/// Methods take `&self` but need to mutate internal state (record calls,
/// store texels). `parking_lot::Mutex` keeps the type `Send + Sync` as the
/// trait requires.
///
/// # Example
///
/// ```rust
/// use petal_test_utils::{MockRenderContext, RenderContext, TextureDesc};
///
/// let mock = MockRenderContext::new();
/// let texture = mock
///     .create_texture(&TextureDesc {
///         width: 1,
///         height: 1,
///         format: wgpu::TextureFormat::Rgba8Unorm,
///         mip_level_count: 1,
///         render_target: false,
///     })
///     .unwrap();
///
/// mock.upload_texture(texture, 0, &[1, 2, 3, 4]).unwrap();
///
/// assert_eq!(mock.texture_data(texture), Some(vec![1, 2, 3, 4]));
/// assert_eq!(mock.count_texture_creates(), 1);
/// ```
pub struct MockRenderContext {
    /// Recorded calls for verification
    calls: Mutex<Vec<RenderCall>>,
    state: Mutex<MockState>,
    faults: Mutex<Faults>,
}

impl MockRenderContext {
    /// Create a mock with an 800x600 window viewport.
    pub fn new() -> Self {
        Self::with_viewport(800, 600)
    }

    pub fn with_viewport(width: u32, height: u32) -> Self {
        let state = MockState {
            viewport: Viewport::new(0, 0, width, height),
            ..Default::default()
        };
        Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(state),
            faults: Mutex::new(Faults::default()),
        }
    }

    fn record(&self, call: RenderCall) {
        self.calls.lock().push(call);
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Get total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn count(&self, predicate: impl Fn(&RenderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn count_texture_creates(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::CreateTexture { .. }))
    }

    pub fn count_texture_deletes(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::DeleteTexture(_)))
    }

    pub fn count_texture_binds(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::BindTexture(_)))
    }

    pub fn count_uploads(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::UploadTexture { .. }))
    }

    pub fn count_draw_calls(&self) -> usize {
        self.count(|call| matches!(call, RenderCall::DrawQuads { .. }))
    }

    /// Every `draw_quads` call in submission order.
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RenderCall::DrawQuads { texture, vertices } => Some(DrawCall {
                    texture: *texture,
                    vertices: vertices.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Texel bytes of level 0 as last uploaded, or `None` for unknown or deleted textures.
    pub fn texture_data(&self, texture: TextureId) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.texture(texture).filter(|t| !t.deleted).map(|t| t.data.clone())
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.state.lock().texture(texture).map(|t| t.desc)
    }

    pub fn texture_sampling(&self, texture: TextureId) -> Option<SamplerParams> {
        self.state.lock().texture(texture).and_then(|t| t.sampling)
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.iter().filter(|t| t.is_live()).count()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    pub fn live_renderbuffers(&self) -> usize {
        self.state.lock().renderbuffers.len()
    }

    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<[f32; 16]> {
        self.state.lock().uniforms.get(&(program, name.to_string())).copied()
    }

    /// Invalidate a texture the way a context loss would.
    pub fn lose_texture(&self, texture: TextureId) {
        if let Some(t) = self.state.lock().texture_mut(texture) {
            t.lost = true;
        }
    }

    pub fn lose_all_textures(&self) {
        for texture in self.state.lock().textures.iter_mut() {
            texture.lost = true;
        }
    }

    /// Force the status reported for every framebuffer. `None` restores the real check.
    pub fn set_framebuffer_status(&self, status: Option<FramebufferStatus>) {
        self.faults.lock().framebuffer_status = status;
    }

    /// Make every compile of `stage` fail with `log`.
    pub fn fail_compile(&self, stage: ShaderStage, log: &str) {
        self.faults.lock().compile = Some((stage, log.to_string()));
    }

    pub fn fail_link(&self, log: &str) {
        self.faults.lock().link = Some(log.to_string());
    }

    pub fn set_fail_draws(&self, fail: bool) {
        self.faults.lock().draws = fail;
    }
}

impl Default for MockRenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext for MockRenderContext {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, GpuError> {
        let len = desc
            .level0_len()
            .ok_or_else(|| GpuError::Backend(format!("no texel size for {:?}", desc.format)))?;

        let mut state = self.state.lock();
        state.textures.push(MockTexture {
            desc: *desc,
            data: vec![0; len],
            sampling: None,
            lost: false,
            deleted: false,
        });
        let texture = handle(state.textures.len() as u32, TextureId::from_raw)?;
        drop(state);

        self.record(RenderCall::CreateTexture {
            texture,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        });
        Ok(texture)
    }

    fn is_texture_alive(&self, texture: TextureId) -> bool {
        self.state.lock().texture(texture).is_some_and(MockTexture::is_live)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut state = self.state.lock();
        if let Some(t) = state.texture_mut(texture) {
            t.deleted = true;
            t.data = Vec::new();
        }
        if state.render_target == Some(texture) {
            state.render_target = None;
        }
        drop(state);
        self.record(RenderCall::DeleteTexture(texture));
    }

    fn bind_texture(&self, texture: TextureId) -> Result<(), GpuError> {
        self.state.lock().live_texture_mut(texture)?;
        self.record(RenderCall::BindTexture(texture));
        Ok(())
    }

    fn set_texture_sampling(&self, texture: TextureId, params: &SamplerParams) -> Result<(), GpuError> {
        self.state.lock().live_texture_mut(texture)?.sampling = Some(*params);
        self.record(RenderCall::SetTextureSampling {
            texture,
            params: *params,
        });
        Ok(())
    }

    fn upload_texture(&self, texture: TextureId, level: u32, data: &[u8]) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        let target = state.live_texture_mut(texture)?;
        if level >= target.desc.mip_level_count {
            return Err(GpuError::Backend(format!("mip level {} out of range", level)));
        }
        // Only level 0 is kept; smaller levels are validated and dropped.
        if level == 0 {
            if data.len() != target.data.len() {
                return Err(GpuError::SizeMismatch {
                    expected: target.data.len(),
                    actual: data.len(),
                });
            }
            target.data.copy_from_slice(data);
        }
        drop(state);

        self.record(RenderCall::UploadTexture {
            texture,
            level,
            size: data.len(),
        });
        Ok(())
    }

    fn read_texture(&self, texture: TextureId) -> Result<Vec<u8>, GpuError> {
        let data = self.state.lock().live_texture_mut(texture)?.data.clone();
        self.record(RenderCall::ReadTexture(texture));
        Ok(data)
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, GpuError> {
        let mut state = self.state.lock();
        let framebuffer = handle(next_id(&mut state.next_framebuffer), FramebufferId::from_raw)?;
        state.framebuffers.insert(framebuffer, MockFramebuffer::default());
        drop(state);
        self.record(RenderCall::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn create_depth_renderbuffer(&self, width: u32, height: u32) -> Result<RenderbufferId, GpuError> {
        let mut state = self.state.lock();
        let renderbuffer = handle(next_id(&mut state.next_renderbuffer), RenderbufferId::from_raw)?;
        state.renderbuffers.insert(renderbuffer, (width, height));
        drop(state);
        self.record(RenderCall::CreateRenderbuffer {
            renderbuffer,
            width,
            height,
        });
        Ok(renderbuffer)
    }

    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        state.live_texture_mut(texture)?;
        let fb = state
            .framebuffers
            .get_mut(&framebuffer)
            .ok_or_else(|| GpuError::InvalidHandle(framebuffer.to_string()))?;
        fb.color = Some(texture);
        drop(state);
        self.record(RenderCall::AttachColor { framebuffer, texture });
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
        drop(state);
        self.record(RenderCall::AttachDepth {
            framebuffer,
            renderbuffer,
        });
        Ok(())
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let forced = self.faults.lock().framebuffer_status;
        let status = forced.unwrap_or_else(|| {
            let state = self.state.lock();
            match state.framebuffers.get(&framebuffer) {
                None => FramebufferStatus::Unsupported,
                Some(MockFramebuffer { color: None, .. }) => FramebufferStatus::MissingAttachment,
                Some(MockFramebuffer {
                    color: Some(color),
                    depth,
                }) => {
                    let color_size = state.texture(*color).map(|t| (t.desc.width, t.desc.height));
                    let depth_size = depth.and_then(|rb| state.renderbuffers.get(&rb).copied());
                    match (color_size, depth_size) {
                        (None, _) => FramebufferStatus::IncompleteAttachment,
                        (Some(c), Some(d)) if c != d => FramebufferStatus::IncompleteDimensions,
                        _ => FramebufferStatus::Complete,
                    }
                }
            }
        });
        self.record(RenderCall::CheckFramebuffer { framebuffer, status });
        status
    }

    fn read_pixels(&self, framebuffer: FramebufferId) -> Result<Vec<u8>, GpuError> {
        let mut state = self.state.lock();
        let color = state
            .framebuffers
            .get(&framebuffer)
            .and_then(|fb| fb.color)
            .ok_or_else(|| GpuError::InvalidHandle(framebuffer.to_string()))?;
        let data = state.live_texture_mut(color)?.data.clone();
        drop(state);
        self.record(RenderCall::ReadPixels(framebuffer));
        Ok(data)
    }

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferId) {
        self.state.lock().renderbuffers.remove(&renderbuffer);
        self.record(RenderCall::DeleteRenderbuffer(renderbuffer));
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        self.state.lock().framebuffers.remove(&framebuffer);
        self.record(RenderCall::DeleteFramebuffer(framebuffer));
    }

    fn bind_default_framebuffer(&self) {
        self.record(RenderCall::BindDefaultFramebuffer);
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError> {
        self.record(RenderCall::CompileShader(stage));
        let fault = self.faults.lock().compile.clone();
        if let Some((failing, log)) = fault
            && failing == stage
        {
            return Err(GpuError::CompileFailed { stage, log });
        }
        if source.trim().is_empty() {
            return Err(GpuError::CompileFailed {
                stage,
                log: "empty shader source".to_string(),
            });
        }
        let mut state = self.state.lock();
        handle(next_id(&mut state.shaders), ShaderId::from_raw)
    }

    fn link_program(&self, _vertex: ShaderId, _fragment: ShaderId) -> Result<ProgramId, GpuError> {
        if let Some(log) = self.faults.lock().link.clone() {
            return Err(GpuError::LinkFailed(log));
        }
        let program = {
            let mut state = self.state.lock();
            handle(next_id(&mut state.programs), ProgramId::from_raw)?
        };
        self.record(RenderCall::LinkProgram(program));
        Ok(program)
    }

    fn use_program(&self, program: ProgramId) -> Result<(), GpuError> {
        if program.raw() > self.state.lock().programs {
            return Err(GpuError::InvalidHandle(program.to_string()));
        }
        self.record(RenderCall::UseProgram(program));
        Ok(())
    }

    fn set_uniform_matrix(&self, program: ProgramId, name: &str, value: &[f32; 16]) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        if program.raw() > state.programs {
            return Err(GpuError::InvalidHandle(program.to_string()));
        }
        state.uniforms.insert((program, name.to_string()), *value);
        drop(state);
        self.record(RenderCall::SetUniformMatrix {
            program,
            name: name.to_string(),
            value: *value,
        });
        Ok(())
    }

    fn set_blend(&self, blend: Option<wgpu::BlendState>) {
        self.record(RenderCall::SetBlend(blend));
    }

    fn set_cull(&self, front_face: wgpu::FrontFace, cull: Option<wgpu::Face>) {
        self.record(RenderCall::SetCull { front_face, cull });
    }

    fn set_depth(&self, compare: Option<wgpu::CompareFunction>, write: bool) {
        self.record(RenderCall::SetDepth { compare, write });
    }

    fn viewport(&self) -> Viewport {
        self.state.lock().viewport
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.state.lock().viewport = viewport;
        self.record(RenderCall::SetViewport(viewport));
    }

    fn set_render_target(&self, target: Option<TextureId>) -> Result<(), GpuError> {
        let mut state = self.state.lock();
        if let Some(texture) = target {
            let t = state.live_texture_mut(texture)?;
            if !t.desc.render_target {
                return Err(GpuError::Backend(format!("{} is not a render target", texture)));
            }
        }
        state.render_target = target;
        drop(state);
        self.record(RenderCall::SetRenderTarget(target));
        Ok(())
    }

    fn render_target(&self) -> Option<TextureId> {
        self.state.lock().render_target
    }

    fn draw_quads(&self, texture: TextureId, vertices: &[SpriteVertex]) -> Result<(), GpuError> {
        if self.faults.lock().draws {
            return Err(GpuError::Backend("injected draw failure".to_string()));
        }
        if vertices.len() % 4 != 0 {
            return Err(GpuError::Backend(format!("{} vertices do not form whole quads", vertices.len())));
        }
        self.state.lock().live_texture_mut(texture)?;
        self.record(RenderCall::DrawQuads {
            texture,
            vertices: vertices.to_vec(),
        });
        Ok(())
    }
}
