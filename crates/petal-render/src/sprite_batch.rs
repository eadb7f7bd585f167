//! Frame sessions: `begin`, any number of draws, `end`.
//!
//! ```ignore
//! let mut batch = SpriteBatch::new(ctx.clone())?;
//!
//! batch.begin_default()?;
//! batch.draw(&player, Vec2::new(100.0, 50.0), Color::WHITE)?;
//! batch.draw_string(&font, "Score: 10", Vec2::new(8.0, 8.0), Color::YELLOW)?;
//! let stats = batch.end()?;
//! ```
//!
//! Draws only record sprites. Render state is applied and the GPU sees the
//! sprites at `end`, except in [`SortMode::Immediate`] where state is applied
//! at `begin` and every draw is flushed on its own.

use std::sync::Arc;

use bitflags::bitflags;
use petal_core::config::BatchConfig;
use petal_core::geometry::Rect;
use petal_core::math::{self, Mat4, Vec2};
use petal_core::profiling::profile_function;
use petal_test_utils::{ProgramId, RenderContext, ShaderStage, Viewport};
use tracing::{debug, trace};

use crate::batch::{BatchItem, BatchStats, SortMode, SpriteBatcher};
use crate::blend::BlendState;
use crate::color::Color;
use crate::error::{RenderError, RenderResult};
use crate::font::{GlyphPlacement, SpriteFont};
use crate::sampler::SamplerState;
use crate::state::{DepthStencilState, FRONT_FACE, RasterizerState};
use crate::texture::Texture2D;

/// WGSL source of the built-in sprite program.
pub const SPRITE_SHADER: &str = include_str!("shaders/sprite.wgsl");

/// Name of the world-view-projection uniform every sprite program declares.
pub const WVP_UNIFORM: &str = "u_world_view_projection";

bitflags! {
    /// Mirroring applied to a sprite's texture coordinates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SpriteEffects: u8 {
        const FLIP_HORIZONTALLY = 1 << 0;
        const FLIP_VERTICALLY = 1 << 1;
    }
}

/// A custom sprite program that replaces the built-in one for a session.
///
/// The program must accept the [`SpriteVertex`](petal_test_utils::SpriteVertex)
/// layout and declare the [`WVP_UNIFORM`] matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    name: String,
    program: ProgramId,
}

impl Effect {
    /// Build an effect whose vertex and fragment stages share one source.
    pub fn new(ctx: &dyn RenderContext, name: impl Into<String>, source: &str) -> RenderResult<Self> {
        Self::from_stages(ctx, name, source, source)
    }

    pub fn from_stages(
        ctx: &dyn RenderContext,
        name: impl Into<String>,
        vertex_source: &str,
        fragment_source: &str,
    ) -> RenderResult<Self> {
        let name = name.into();
        let program = link(ctx, vertex_source, fragment_source)?;
        debug!(effect = %name, %program, "Linked sprite effect");
        Ok(Self { name, program })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }
}

fn link(ctx: &dyn RenderContext, vertex_source: &str, fragment_source: &str) -> RenderResult<ProgramId> {
    let vertex = ctx.compile_shader(ShaderStage::Vertex, vertex_source)?;
    let fragment = ctx.compile_shader(ShaderStage::Fragment, fragment_source)?;
    Ok(ctx.link_program(vertex, fragment)?)
}

/// Render state for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub sort_mode: SortMode,
    pub blend: BlendState,
    pub sampler: SamplerState,
    pub depth_stencil: DepthStencilState,
    pub rasterizer: RasterizerState,
    /// Replaces the built-in program when set.
    pub effect: Option<Effect>,
    /// Applied to every sprite before the view and projection.
    pub transform: Mat4,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sort_mode: SortMode::Deferred,
            blend: BlendState::AlphaBlend,
            sampler: SamplerState::LINEAR_CLAMP,
            depth_stencil: DepthStencilState::None,
            rasterizer: RasterizerState::CullCounterClockwise,
            effect: None,
            transform: Mat4::IDENTITY,
        }
    }
}

impl SessionSettings {
    pub fn new(sort_mode: SortMode, blend: BlendState) -> Self {
        Self {
            sort_mode,
            blend,
            ..Default::default()
        }
    }

    pub fn with_sampler(mut self, sampler: SamplerState) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

/// Where a sprite is placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Destination {
    /// Top-left (before rotation) at `position`, sized `source * scale`.
    Position { position: Vec2, scale: Vec2 },
    /// Stretched to fill the rectangle.
    Rectangle(Rect<f32>),
}

/// Full description of one sprite draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteDraw {
    pub destination: Destination,
    /// Region of the texture to draw, in texels. `None` draws all of it.
    pub source: Option<Rect<i32>>,
    pub color: Color,
    /// Clockwise rotation in radians around `origin`.
    pub rotation: f32,
    /// Pivot in source texels, relative to the source rectangle's top-left.
    pub origin: Vec2,
    pub effects: SpriteEffects,
    pub depth: f32,
}

impl SpriteDraw {
    pub fn at(position: Vec2) -> Self {
        Self::new(Destination::Position {
            position,
            scale: Vec2::ONE,
        })
    }

    pub fn stretched(rect: Rect<f32>) -> Self {
        Self::new(Destination::Rectangle(rect))
    }

    fn new(destination: Destination) -> Self {
        Self {
            destination,
            source: None,
            color: Color::WHITE,
            rotation: 0.0,
            origin: Vec2::ZERO,
            effects: SpriteEffects::empty(),
            depth: 0.0,
        }
    }

    pub fn source(mut self, source: Rect<i32>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn origin(mut self, origin: Vec2) -> Self {
        self.origin = origin;
        self
    }

    /// Scale a position draw. Has no effect on rectangle draws.
    pub fn scale(mut self, factor: Vec2) -> Self {
        if let Destination::Position { scale, .. } = &mut self.destination {
            *scale = factor;
        }
        self
    }

    pub fn effects(mut self, effects: SpriteEffects) -> Self {
        self.effects = effects;
        self
    }

    pub fn depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }
}

/// Full description of one string draw.
///
/// Every glyph rotates and scales around the same `origin`, given in
/// unscaled text space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextDraw {
    pub position: Vec2,
    pub color: Color,
    pub rotation: f32,
    pub origin: Vec2,
    pub scale: Vec2,
    pub effects: SpriteEffects,
    pub depth: f32,
}

impl TextDraw {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            color: Color::WHITE,
            rotation: 0.0,
            origin: Vec2::ZERO,
            scale: Vec2::ONE,
            effects: SpriteEffects::empty(),
            depth: 0.0,
        }
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn origin(mut self, origin: Vec2) -> Self {
        self.origin = origin;
        self
    }

    pub fn scale(mut self, scale: Vec2) -> Self {
        self.scale = scale;
        self
    }

    /// Uniform scale on both axes.
    pub fn uniform_scale(self, scale: f32) -> Self {
        self.scale(Vec2::splat(scale))
    }

    pub fn effects(mut self, effects: SpriteEffects) -> Self {
        self.effects = effects;
        self
    }

    pub fn depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MatrixKey {
    viewport: Viewport,
    transform: [u32; 16],
}

impl MatrixKey {
    fn new(viewport: Viewport, transform: Mat4) -> Self {
        Self {
            viewport,
            transform: transform.to_cols_array().map(f32::to_bits),
        }
    }
}

/// World-view-projection for both target kinds, keyed by what they derive from.
#[derive(Debug, Default)]
struct MatrixCache {
    entry: Option<(MatrixKey, Mat4, Mat4)>,
}

impl MatrixCache {
    /// Returns `(screen, offscreen)`.
    fn get(&mut self, viewport: Viewport, transform: Mat4) -> (Mat4, Mat4) {
        let key = MatrixKey::new(viewport, transform);
        if let Some((cached, screen, offscreen)) = self.entry
            && cached == key
        {
            return (screen, offscreen);
        }

        let (width, height) = (viewport.width as f32, viewport.height as f32);
        let projection = math::sprite_projection(width, height);
        let screen = math::world_view_projection(transform, math::screen_view(width, height), projection);
        let offscreen = math::world_view_projection(transform, math::offscreen_view(width, height), projection);
        trace!(?viewport, "Rebuilt sprite matrices");
        self.entry = Some((key, screen, offscreen));
        (screen, offscreen)
    }
}

/// Batches sprite draws into as few GPU draw calls as the sort mode allows.
pub struct SpriteBatch {
    ctx: Arc<dyn RenderContext>,
    program: ProgramId,
    config: BatchConfig,
    batcher: SpriteBatcher,
    session: Option<SessionSettings>,
    matrices: MatrixCache,
    /// Flushes of the open session so far; only `Immediate` flushes early.
    session_stats: BatchStats,
    last_stats: BatchStats,
    glyphs: Vec<GlyphPlacement>,
}

impl SpriteBatch {
    pub fn new(ctx: Arc<dyn RenderContext>) -> RenderResult<Self> {
        Self::with_config(ctx, &BatchConfig::default())
    }

    /// Create a batch and build its sprite program.
    ///
    /// Fails with `CompileError` or `LinkError` if the program cannot be built.
    pub fn with_config(ctx: Arc<dyn RenderContext>, config: &BatchConfig) -> RenderResult<Self> {
        profile_function!();
        let program = link(ctx.as_ref(), SPRITE_SHADER, SPRITE_SHADER)?;
        debug!(%program, capacity = config.initial_capacity, "Created sprite batch");

        Ok(Self {
            ctx,
            program,
            config: config.clone(),
            batcher: SpriteBatcher::new(config.initial_capacity),
            session: None,
            matrices: MatrixCache::default(),
            session_stats: BatchStats::default(),
            last_stats: BatchStats::default(),
            glyphs: Vec::new(),
        })
    }

    pub fn context(&self) -> &Arc<dyn RenderContext> {
        &self.ctx
    }

    /// The built-in sprite program.
    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Whether a session is open.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Statistics of the most recently ended session.
    pub fn last_stats(&self) -> BatchStats {
        self.last_stats
    }

    /// Sprites queued in the open session and not yet flushed.
    pub fn pending(&self) -> usize {
        self.batcher.len()
    }

    /// Open a session with the default settings.
    pub fn begin_default(&mut self) -> RenderResult<()> {
        self.begin(SessionSettings::default())
    }

    /// Open a session.
    ///
    /// The sampler is validated here so an unsupported one fails before any
    /// sprite is queued.
    pub fn begin(&mut self, settings: SessionSettings) -> RenderResult<()> {
        if self.session.is_some() {
            return Err(RenderError::InvalidOperation(
                "begin called while a sprite batch session is already open".to_string(),
            ));
        }
        settings.sampler.validate()?;

        if settings.sort_mode == SortMode::Immediate {
            self.apply_render_state(&settings)?;
        }
        trace!(sort = ?settings.sort_mode, blend = ?settings.blend, "Sprite batch begin");
        self.session_stats = BatchStats::default();
        self.session = Some(settings);
        Ok(())
    }

    fn session(&self) -> RenderResult<&SessionSettings> {
        self.session.as_ref().ok_or_else(|| {
            RenderError::InvalidOperation("draw called outside of a begin/end pair".to_string())
        })
    }

    /// Draw the whole texture with its top-left at `position`.
    pub fn draw(&mut self, texture: &Texture2D, position: Vec2, color: Color) -> RenderResult<()> {
        self.draw_ex(texture, &SpriteDraw::at(position).color(color))
    }

    /// Draw the whole texture stretched over `destination`.
    pub fn draw_rect(&mut self, texture: &Texture2D, destination: Rect<f32>, color: Color) -> RenderResult<()> {
        self.draw_ex(texture, &SpriteDraw::stretched(destination).color(color))
    }

    pub fn draw_ex(&mut self, texture: &Texture2D, sprite: &SpriteDraw) -> RenderResult<()> {
        self.session()?;
        if texture.is_disposed() {
            return Err(RenderError::InvalidArgument(format!(
                "cannot draw disposed texture '{}'",
                texture.name()
            )));
        }
        if texture.width() == 0 || texture.height() == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "cannot draw zero-sized texture '{}'",
                texture.name()
            )));
        }
        let source = sprite.source.unwrap_or_else(|| texture.bounds());
        if source.is_empty() {
            return Err(RenderError::InvalidArgument(format!(
                "source rectangle {source:?} has no area"
            )));
        }

        let id = texture.retry_create()?;

        let (mut tl, mut br) = texture.tex_coords(source.cast_f32());
        if sprite.effects.contains(SpriteEffects::FLIP_VERTICALLY) {
            std::mem::swap(&mut tl.y, &mut br.y);
        }
        if sprite.effects.contains(SpriteEffects::FLIP_HORIZONTALLY) {
            std::mem::swap(&mut tl.x, &mut br.x);
        }

        let source_size = Vec2::new(source.width as f32, source.height as f32);
        let (origin, offset, size) = match sprite.destination {
            Destination::Position { position, scale } => (position, -sprite.origin * scale, source_size * scale),
            Destination::Rectangle(rect) => {
                let size = Vec2::new(rect.width, rect.height);
                (Vec2::new(rect.x, rect.y), -sprite.origin * (size / source_size), size)
            }
        };

        let (sin_rotation, cos_rotation) = sprite.rotation.sin_cos();
        self.batcher.enqueue(BatchItem {
            texture: id,
            mipmapped: texture.is_mipmapped(),
            origin,
            offset,
            size,
            sin_rotation,
            cos_rotation,
            color: sprite.color,
            tex_coord_tl: tl,
            tex_coord_br: br,
            depth: sprite.depth,
        })?;

        if self.session()?.sort_mode == SortMode::Immediate {
            self.flush_immediate()?;
        }
        Ok(())
    }

    fn flush_immediate(&mut self) -> RenderResult<()> {
        let Some(settings) = self.session.as_ref() else {
            return Ok(());
        };
        let stats = self
            .batcher
            .draw_batch(self.ctx.as_ref(), SortMode::Immediate, &settings.sampler)?;
        if self.config.trace_immediate_flushes {
            trace!(draw_calls = stats.draw_calls, "Immediate sprite flush");
        }
        self.session_stats.accumulate(stats);
        Ok(())
    }

    /// Draw `text` with its top-left at `position`.
    pub fn draw_string(&mut self, font: &SpriteFont, text: &str, position: Vec2, color: Color) -> RenderResult<()> {
        self.draw_string_ex(font, text, &TextDraw::at(position).color(color))
    }

    /// Draw `text`, one sprite per visible glyph.
    ///
    /// The whole string is laid out first, so a missing character fails
    /// before any glyph is queued.
    pub fn draw_string_ex(&mut self, font: &SpriteFont, text: &str, draw: &TextDraw) -> RenderResult<()> {
        profile_function!();
        self.session()?;

        let mut glyphs = std::mem::take(&mut self.glyphs);
        let result = self.draw_glyphs(font, text, draw, &mut glyphs);
        self.glyphs = glyphs;
        result
    }

    fn draw_glyphs(
        &mut self,
        font: &SpriteFont,
        text: &str,
        draw: &TextDraw,
        glyphs: &mut Vec<GlyphPlacement>,
    ) -> RenderResult<()> {
        let size = font.layout_into(text, glyphs)?;

        for glyph in glyphs.iter().filter(|g| !g.source.is_empty()) {
            let mut position = glyph.position;
            // Mirrored text also mirrors its layout.
            if draw.effects.contains(SpriteEffects::FLIP_HORIZONTALLY) {
                position.x = size.x - position.x - glyph.source.width as f32;
            }
            if draw.effects.contains(SpriteEffects::FLIP_VERTICALLY) {
                position.y = size.y - position.y - glyph.source.height as f32;
            }

            let sprite = SpriteDraw {
                destination: Destination::Position {
                    position: draw.position,
                    scale: draw.scale,
                },
                source: Some(glyph.source),
                color: draw.color,
                rotation: draw.rotation,
                origin: draw.origin - position,
                effects: draw.effects,
                depth: draw.depth,
            };
            self.draw_ex(font.texture(), &sprite)?;
        }
        Ok(())
    }

    /// Close the session and draw everything queued in it.
    ///
    /// The session is closed and the queue emptied even when drawing fails.
    pub fn end(&mut self) -> RenderResult<BatchStats> {
        profile_function!();
        let settings = self.session.take().ok_or_else(|| {
            RenderError::InvalidOperation("end called without a matching begin".to_string())
        })?;

        let result = self.flush_session(&settings);
        if result.is_err() {
            self.batcher.discard();
        }
        let stats = result?;

        self.session_stats.accumulate(stats);
        self.last_stats = self.session_stats;
        trace!(
            sprites = self.last_stats.sprites,
            draw_calls = self.last_stats.draw_calls,
            "Sprite batch end"
        );
        Ok(self.last_stats)
    }

    fn flush_session(&mut self, settings: &SessionSettings) -> RenderResult<BatchStats> {
        // Immediate sessions applied their state at begin and have nothing left.
        if settings.sort_mode != SortMode::Immediate && !self.batcher.is_empty() {
            self.apply_render_state(settings)?;
        }
        self.batcher
            .draw_batch(self.ctx.as_ref(), settings.sort_mode, &settings.sampler)
    }

    fn apply_render_state(&mut self, settings: &SessionSettings) -> RenderResult<()> {
        profile_function!();
        let viewport = self.ctx.viewport();
        let (screen, offscreen_wvp) = self.matrices.get(viewport, settings.transform);
        let offscreen = self.ctx.render_target().is_some();
        let wvp = if offscreen { offscreen_wvp } else { screen };

        let program = settings.effect.as_ref().map_or(self.program, Effect::program);
        self.ctx.use_program(program)?;
        self.ctx.set_uniform_matrix(program, WVP_UNIFORM, &wvp.to_cols_array())?;

        self.ctx.set_blend(settings.blend.into());
        let (compare, write) = settings.depth_stencil.depth_test();
        self.ctx.set_depth(compare, write);
        self.ctx.set_cull(FRONT_FACE, settings.rasterizer.cull_face(offscreen));
        self.ctx.set_viewport(viewport);
        Ok(())
    }

    /// Direct later draws into `target`, or back to the screen with `None`.
    ///
    /// Cannot be changed while a session is open.
    pub fn set_render_target(&mut self, target: Option<&Texture2D>) -> RenderResult<()> {
        if self.session.is_some() {
            return Err(RenderError::InvalidOperation(
                "cannot change the render target inside a sprite batch session".to_string(),
            ));
        }
        let id = match target {
            Some(texture) if !texture.is_render_target() => {
                return Err(RenderError::InvalidArgument(format!(
                    "texture '{}' is not a render target",
                    texture.name()
                )));
            }
            Some(texture) => Some(texture.retry_create()?),
            None => None,
        };
        self.ctx.set_render_target(id)?;
        Ok(())
    }
}

impl std::fmt::Debug for SpriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpriteBatch")
            .field("program", &self.program)
            .field("session", &self.session)
            .field("pending", &self.batcher.len())
            .field("last_stats", &self.last_stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::Glyph;
    use crate::pixel::SurfaceFormat;
    use petal_test_utils::{MockRenderContext, RenderCall, SpriteVertex};
    use std::f32::consts::FRAC_PI_2;

    fn setup() -> (Arc<MockRenderContext>, SpriteBatch) {
        let ctx = Arc::new(MockRenderContext::with_viewport(200, 100));
        let batch = SpriteBatch::new(ctx.clone()).unwrap();
        (ctx, batch)
    }

    fn texture(ctx: &Arc<MockRenderContext>, width: u32, height: u32) -> Texture2D {
        Texture2D::new(ctx.clone(), width, height, false, SurfaceFormat::Color).unwrap()
    }

    fn positions(vertices: &[SpriteVertex]) -> Vec<[f32; 2]> {
        vertices.iter().map(|v| v.position).collect()
    }

    fn assert_close(actual: [f32; 2], expected: [f32; 2]) {
        assert!(
            (actual[0] - expected[0]).abs() < 1e-4 && (actual[1] - expected[1]).abs() < 1e-4,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn test_new_links_program() {
        let (ctx, batch) = setup();
        let calls = ctx.calls();
        assert!(matches!(calls[0], RenderCall::CompileShader(ShaderStage::Vertex)));
        assert!(matches!(calls[1], RenderCall::CompileShader(ShaderStage::Fragment)));
        assert!(matches!(calls[2], RenderCall::LinkProgram(p) if p == batch.program()));
    }

    #[test]
    fn test_compile_and_link_errors() {
        let ctx = Arc::new(MockRenderContext::new());
        ctx.fail_compile(ShaderStage::Fragment, "syntax error");
        assert!(matches!(
            SpriteBatch::new(ctx.clone()),
            Err(RenderError::CompileError { stage: ShaderStage::Fragment, .. })
        ));

        let ctx = Arc::new(MockRenderContext::new());
        ctx.fail_link("mismatched varyings");
        assert!(matches!(SpriteBatch::new(ctx), Err(RenderError::LinkError(_))));
    }

    #[test]
    fn test_draw_outside_session() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 4, 4);
        assert!(matches!(
            batch.draw(&tex, Vec2::ZERO, Color::WHITE),
            Err(RenderError::InvalidOperation(_))
        ));
        assert!(matches!(batch.end(), Err(RenderError::InvalidOperation(_))));
    }

    #[test]
    fn test_begin_rejects_unsupported_sampler() {
        let (_, mut batch) = setup();
        let settings = SessionSettings::default().with_sampler(SamplerState::ANISOTROPIC_CLAMP);
        assert!(matches!(batch.begin(settings), Err(RenderError::NotSupported(_))));
        assert!(!batch.is_active());
    }

    #[test]
    fn test_position_draw_geometry() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 8, 4);
        batch.begin_default().unwrap();
        batch
            .draw_ex(
                &tex,
                &SpriteDraw::at(Vec2::new(10.0, 20.0))
                    .origin(Vec2::new(4.0, 2.0))
                    .scale(Vec2::splat(2.0)),
            )
            .unwrap();
        batch.end().unwrap();

        let draw = &ctx.draw_calls()[0];
        assert_eq!(
            positions(&draw.vertices),
            vec![[2.0, 16.0], [18.0, 16.0], [2.0, 24.0], [18.0, 24.0]]
        );
        assert_eq!(draw.vertices[0].tex_coord, [0.0, 0.0]);
        assert_eq!(draw.vertices[3].tex_coord, [1.0, 1.0]);
    }

    #[test]
    fn test_rectangle_draw_scales_origin() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 8, 8);
        batch.begin_default().unwrap();
        batch
            .draw_ex(
                &tex,
                &SpriteDraw::stretched(Rect::new(0.0, 0.0, 16.0, 32.0)).origin(Vec2::new(4.0, 4.0)),
            )
            .unwrap();
        batch.end().unwrap();

        let vertices = &ctx.draw_calls()[0].vertices;
        assert_eq!(vertices[0].position, [-8.0, -16.0]);
        assert_eq!(vertices[3].position, [8.0, 16.0]);
    }

    #[test]
    fn test_rotation_about_origin() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 2, 2);
        batch.begin_default().unwrap();
        batch
            .draw_ex(&tex, &SpriteDraw::at(Vec2::new(5.0, 5.0)).rotation(FRAC_PI_2))
            .unwrap();
        batch.end().unwrap();

        let vertices = &ctx.draw_calls()[0].vertices;
        assert_close(vertices[0].position, [5.0, 5.0]);
        // A quarter turn carries the top-right corner below the origin.
        assert_close(vertices[1].position, [5.0, 7.0]);
        assert_close(vertices[2].position, [3.0, 5.0]);
    }

    #[test]
    fn test_flip_effects_swap_tex_coords() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 4, 4);
        batch.begin_default().unwrap();
        batch
            .draw_ex(
                &tex,
                &SpriteDraw::at(Vec2::ZERO)
                    .source(Rect::new(0, 0, 2, 4))
                    .effects(SpriteEffects::FLIP_HORIZONTALLY | SpriteEffects::FLIP_VERTICALLY),
            )
            .unwrap();
        batch.end().unwrap();

        let vertices = &ctx.draw_calls()[0].vertices;
        assert_eq!(vertices[0].tex_coord, [0.5, 1.0]);
        assert_eq!(vertices[3].tex_coord, [0.0, 0.0]);
    }

    #[test]
    fn test_render_target_tex_coords_are_flipped() {
        let (ctx, mut batch) = setup();
        let target = Texture2D::render_target(ctx.clone(), 4, 4, SurfaceFormat::Color).unwrap();
        batch.begin_default().unwrap();
        batch
            .draw_ex(&target, &SpriteDraw::at(Vec2::ZERO).source(Rect::new(0, 1, 4, 2)))
            .unwrap();
        batch.end().unwrap();

        let vertices = &ctx.draw_calls()[0].vertices;
        assert_eq!(vertices[0].tex_coord, [0.0, 0.75]);
        assert_eq!(vertices[3].tex_coord, [1.0, 0.25]);
    }

    #[test]
    fn test_invalid_draw_arguments() {
        let (ctx, mut batch) = setup();
        let mut tex = texture(&ctx, 4, 4);
        batch.begin_default().unwrap();

        assert!(matches!(
            batch.draw_ex(&tex, &SpriteDraw::at(Vec2::ZERO).source(Rect::new(0, 0, 0, 4))),
            Err(RenderError::InvalidArgument(_))
        ));
        tex.dispose();
        assert!(matches!(
            batch.draw(&tex, Vec2::ZERO, Color::WHITE),
            Err(RenderError::InvalidArgument(_))
        ));
        assert_eq!(batch.pending(), 0);
        batch.end().unwrap();
    }

    #[test]
    fn test_end_applies_state_in_order() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 4, 4);
        batch.begin_default().unwrap();
        batch.draw(&tex, Vec2::ZERO, Color::WHITE).unwrap();
        // Nothing but the texture upload happens before end.
        assert_eq!(ctx.count_draw_calls(), 0);
        ctx.clear_calls();
        batch.end().unwrap();

        let calls = ctx.calls();
        assert!(matches!(calls[0], RenderCall::UseProgram(p) if p == batch.program()));
        assert!(matches!(&calls[1], RenderCall::SetUniformMatrix { name, .. } if name == WVP_UNIFORM));
        assert!(matches!(calls[2], RenderCall::SetBlend(Some(_))));
        assert!(matches!(calls[3], RenderCall::SetDepth { compare: None, write: false }));
        assert!(matches!(
            calls[4],
            RenderCall::SetCull {
                front_face: wgpu::FrontFace::Cw,
                cull: Some(wgpu::Face::Back)
            }
        ));
        assert!(matches!(calls[5], RenderCall::SetViewport(v) if v == Viewport::new(0, 0, 200, 100)));
        assert!(matches!(calls.last(), Some(RenderCall::DrawQuads { .. })));
    }

    #[test]
    fn test_screen_matrix_maps_top_left_corner() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 4, 4);
        batch.begin_default().unwrap();
        batch.draw(&tex, Vec2::ZERO, Color::WHITE).unwrap();
        batch.end().unwrap();

        let wvp = Mat4::from_cols_array(&ctx.uniform(batch.program(), WVP_UNIFORM).unwrap());
        let top_left = wvp.project_point3(petal_core::math::Vec3::ZERO);
        assert!((top_left.x + 1.0).abs() < 1e-5 && (top_left.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_offscreen_session_uses_offscreen_state() {
        let (ctx, mut batch) = setup();
        let target = Texture2D::render_target(ctx.clone(), 16, 16, SurfaceFormat::Color).unwrap();
        let tex = texture(&ctx, 4, 4);

        batch.set_render_target(Some(&target)).unwrap();
        batch.begin_default().unwrap();
        batch.draw(&tex, Vec2::ZERO, Color::WHITE).unwrap();
        assert!(matches!(
            batch.set_render_target(None),
            Err(RenderError::InvalidOperation(_))
        ));
        batch.end().unwrap();

        assert!(ctx.calls().iter().any(|c| matches!(
            c,
            RenderCall::SetCull {
                cull: Some(wgpu::Face::Front),
                ..
            }
        )));
        let wvp = Mat4::from_cols_array(&ctx.uniform(batch.program(), WVP_UNIFORM).unwrap());
        let origin = wvp.project_point3(petal_core::math::Vec3::ZERO);
        // Offscreen space is y-up: the origin is the bottom-left corner.
        assert!((origin.x + 1.0).abs() < 1e-5 && (origin.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_set_render_target_requires_render_target() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 4, 4);
        assert!(matches!(
            batch.set_render_target(Some(&tex)),
            Err(RenderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_effect_replaces_program() {
        let (ctx, mut batch) = setup();
        let effect = Effect::new(ctx.as_ref(), "tint", SPRITE_SHADER).unwrap();
        let tex = texture(&ctx, 4, 4);

        batch.begin(SessionSettings::default().with_effect(effect.clone())).unwrap();
        batch.draw(&tex, Vec2::ZERO, Color::WHITE).unwrap();
        batch.end().unwrap();

        assert!(ctx.calls().iter().any(|c| matches!(c, RenderCall::UseProgram(p) if *p == effect.program())));
        assert!(ctx.uniform(effect.program(), WVP_UNIFORM).is_some());
        assert!(ctx.uniform(batch.program(), WVP_UNIFORM).is_none());
    }

    #[test]
    fn test_immediate_flushes_every_draw() {
        let (ctx, mut batch) = setup();
        let tex = texture(&ctx, 4, 4);
        batch.begin(SessionSettings::new(SortMode::Immediate, BlendState::Opaque)).unwrap();
        assert!(ctx.calls().iter().any(|c| matches!(c, RenderCall::SetBlend(None))));

        batch.draw(&tex, Vec2::ZERO, Color::WHITE).unwrap();
        assert_eq!(ctx.count_draw_calls(), 1);
        batch.draw(&tex, Vec2::ONE, Color::WHITE).unwrap();
        assert_eq!(ctx.count_draw_calls(), 2);

        let stats = batch.end().unwrap();
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.sprites, 2);
        assert_eq!(ctx.count_draw_calls(), 2);
    }

    #[test]
    fn test_matrix_cache_reuses_entry() {
        let mut cache = MatrixCache::default();
        let viewport = Viewport::new(0, 0, 64, 32);
        let first = cache.get(viewport, Mat4::IDENTITY);
        assert_eq!(cache.get(viewport, Mat4::IDENTITY), first);

        let moved = cache.get(viewport, Mat4::from_translation(petal_core::math::Vec3::X));
        assert_ne!(moved, first);
        assert_eq!(cache.entry.map(|(key, ..)| key.viewport), Some(viewport));
    }

    fn font(ctx: &Arc<MockRenderContext>) -> SpriteFont {
        SpriteFont::new(
            texture(ctx, 32, 8),
            [
                ('a', Glyph::simple(Rect::new(0, 0, 4, 8))),
                ('b', Glyph::simple(Rect::new(4, 0, 6, 8))),
                (' ', Glyph::new(Rect::new(0, 0, 0, 0), Vec2::ZERO, 0.0, 3.0, 0.0)),
            ],
            10.0,
        )
    }

    #[test]
    fn test_draw_string_places_each_glyph() {
        let (ctx, mut batch) = setup();
        let font = font(&ctx);
        batch.begin_default().unwrap();
        batch
            .draw_string(&font, "ab a", Vec2::new(10.0, 0.0), Color::RED)
            .unwrap();
        assert_eq!(batch.pending(), 3);
        let stats = batch.end().unwrap();

        // One atlas, so every glyph lands in one draw call.
        assert_eq!(stats.draw_calls, 1);
        let vertices = &ctx.draw_calls()[0].vertices;
        let lefts: Vec<f32> = vertices.chunks(4).map(|q| q[0].position[0]).collect();
        assert_eq!(lefts, vec![10.0, 14.0, 23.0]);
        assert!(vertices.iter().all(|v| v.color == Color::RED.to_array()));
    }

    #[test]
    fn test_draw_string_scales_around_common_origin() {
        let (ctx, mut batch) = setup();
        let font = font(&ctx);
        batch.begin_default().unwrap();
        batch
            .draw_string_ex(&font, "ab", &TextDraw::at(Vec2::ZERO).uniform_scale(2.0))
            .unwrap();
        batch.end().unwrap();

        let vertices = &ctx.draw_calls()[0].vertices;
        assert_eq!(vertices[4].position, [8.0, 0.0]);
        assert_eq!(vertices[7].position, [20.0, 16.0]);
    }

    #[test]
    fn test_draw_string_missing_glyph_queues_nothing() {
        let (ctx, mut batch) = setup();
        let font = font(&ctx);
        batch.begin_default().unwrap();
        assert!(batch.draw_string(&font, "abz", Vec2::ZERO, Color::WHITE).is_err());
        assert_eq!(batch.pending(), 0);
        batch.end().unwrap();
    }
}
