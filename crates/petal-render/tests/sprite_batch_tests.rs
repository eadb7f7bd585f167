//! Frame session tests against the recording mock context.

use std::sync::Arc;

use petal_core::geometry::Rect;
use petal_core::math::Vec2;
use petal_render::*;
use petal_test_utils::{MockRenderContext, RenderCall};

fn mock() -> Arc<MockRenderContext> {
    Arc::new(MockRenderContext::with_viewport(800, 600))
}

fn solid(ctx: &Arc<MockRenderContext>, size: u32) -> Texture2D {
    let mut texture = Texture2D::new(ctx.clone(), size, size, false, SurfaceFormat::Color).unwrap();
    texture.set_data(&vec![Color::WHITE; (size * size) as usize]).unwrap();
    texture
}

fn draw_textures(ctx: &Arc<MockRenderContext>) -> Vec<TextureId> {
    ctx.draw_calls().iter().map(|call| call.texture).collect()
}

// ============================================================================
// Batching
// ============================================================================

#[test]
fn test_deferred_splits_interleaved_textures() {
    let ctx = mock();
    let a = solid(&ctx, 4);
    let b = solid(&ctx, 4);
    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();

    batch.begin_default().unwrap();
    for texture in [&a, &b, &a] {
        batch.draw(texture, Vec2::ZERO, Color::WHITE).unwrap();
    }
    let stats = batch.end().unwrap();

    assert_eq!(stats.sprites, 3);
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(ctx.count_draw_calls(), 3);
}

#[test]
fn test_texture_sort_draws_each_texture_once() {
    let ctx = mock();
    let a = solid(&ctx, 4);
    let b = solid(&ctx, 4);
    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();

    batch
        .begin(SessionSettings::new(SortMode::Texture, BlendState::AlphaBlend))
        .unwrap();
    for texture in [&a, &b, &a, &b, &a] {
        batch.draw(texture, Vec2::ZERO, Color::WHITE).unwrap();
    }
    let stats = batch.end().unwrap();

    assert_eq!(stats.draw_calls, 2);
    let quads: Vec<usize> = ctx.draw_calls().iter().map(|call| call.quad_count()).collect();
    assert_eq!(quads.iter().sum::<usize>(), 5);
    assert!(quads.contains(&3) && quads.contains(&2));

    // The interleaved A, B, A scenario collapses to two draws as well.
    batch
        .begin(SessionSettings::new(SortMode::Texture, BlendState::AlphaBlend))
        .unwrap();
    for texture in [&a, &b, &a] {
        batch.draw(texture, Vec2::ZERO, Color::WHITE).unwrap();
    }
    assert_eq!(batch.end().unwrap().draw_calls, 2);
}

#[test]
fn test_depth_sorts_order_draws() {
    let ctx = mock();
    let textures: Vec<Texture2D> = (0..3).map(|_| solid(&ctx, 2)).collect();
    let ids: Vec<TextureId> = textures.iter().map(|t| t.retry_create().unwrap()).collect();
    let depths = [0.5, 0.1, 0.9];

    for (mode, expected) in [
        (SortMode::BackToFront, [ids[2], ids[0], ids[1]]),
        (SortMode::FrontToBack, [ids[1], ids[0], ids[2]]),
    ] {
        ctx.clear_calls();
        let mut batch = SpriteBatch::new(ctx.clone()).unwrap();
        batch.begin(SessionSettings::new(mode, BlendState::AlphaBlend)).unwrap();
        for (texture, depth) in textures.iter().zip(depths) {
            batch.draw_ex(texture, &SpriteDraw::at(Vec2::ZERO).depth(depth)).unwrap();
        }
        batch.end().unwrap();
        assert_eq!(draw_textures(&ctx), expected, "{mode:?}");
    }
}

#[test]
fn test_large_session_keeps_every_sprite() {
    let ctx = mock();
    let texture = solid(&ctx, 2);
    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();

    batch.begin_default().unwrap();
    for i in 0..5000 {
        batch.draw(&texture, Vec2::new(i as f32, 0.0), Color::WHITE).unwrap();
    }
    let stats = batch.end().unwrap();

    assert_eq!(stats.sprites, 5000);
    let quads: usize = ctx.draw_calls().iter().map(|call| call.quad_count()).sum();
    assert_eq!(quads, 5000);
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[test]
fn test_double_begin_and_unmatched_end() {
    let ctx = mock();
    let mut batch = SpriteBatch::new(ctx).unwrap();

    assert!(matches!(batch.end(), Err(RenderError::InvalidOperation(_))));
    batch.begin_default().unwrap();
    assert!(matches!(batch.begin_default(), Err(RenderError::InvalidOperation(_))));
    batch.end().unwrap();

    // A closed session can be reopened.
    batch.begin_default().unwrap();
    assert!(batch.is_active());
    batch.end().unwrap();
}

#[test]
fn test_failed_end_closes_session() {
    let ctx = mock();
    let texture = solid(&ctx, 2);
    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();

    batch.begin_default().unwrap();
    batch.draw(&texture, Vec2::ZERO, Color::WHITE).unwrap();
    ctx.set_fail_draws(true);
    assert!(matches!(batch.end(), Err(RenderError::Gpu(_))));
    assert!(!batch.is_active());
    assert_eq!(batch.pending(), 0);

    ctx.set_fail_draws(false);
    batch.begin_default().unwrap();
    let stats = batch.end().unwrap();
    assert_eq!(stats.sprites, 0);
}

#[test]
fn test_empty_session_sets_no_state() {
    let ctx = mock();
    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();
    ctx.clear_calls();

    batch.begin_default().unwrap();
    batch.end().unwrap();
    assert_eq!(ctx.call_count(), 0);
}

#[test]
fn test_lost_texture_is_recreated_on_draw() {
    let ctx = mock();
    let texture = solid(&ctx, 2);
    let first = texture.retry_create().unwrap();
    ctx.lose_texture(first);

    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();
    batch.begin_default().unwrap();
    batch.draw(&texture, Vec2::ZERO, Color::WHITE).unwrap();
    batch.end().unwrap();

    let second = texture.handle().id().unwrap();
    assert_ne!(first, second);
    assert_eq!(ctx.count_texture_creates(), 2);
    assert_eq!(draw_textures(&ctx), [second]);
    // The shadow copy was uploaded again.
    assert_eq!(ctx.texture_data(second).unwrap(), vec![255; 16]);
}

#[test]
fn test_render_target_round_trip() {
    let ctx = mock();
    let target = Texture2D::render_target(ctx.clone(), 4, 4, SurfaceFormat::Color).unwrap();
    let sprite = solid(&ctx, 2);
    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();

    batch.set_render_target(Some(&target)).unwrap();
    batch.begin_default().unwrap();
    assert!(matches!(batch.set_render_target(None), Err(RenderError::InvalidOperation(_))));
    batch.draw_rect(&sprite, Rect::new(0.0, 0.0, 4.0, 4.0), Color::RED).unwrap();
    batch.end().unwrap();
    batch.set_render_target(None).unwrap();

    assert_eq!(ctx.render_target(), None);
    let calls = ctx.calls();
    let target_id = target.handle().id().unwrap();
    assert!(calls.contains(&RenderCall::SetRenderTarget(Some(target_id))));
    assert_eq!(calls.last(), Some(&RenderCall::SetRenderTarget(None)));
}

// ============================================================================
// Text
// ============================================================================

#[test]
fn test_draw_string_batches_into_one_call() {
    let ctx = mock();
    let font_texture = solid(&ctx, 16);
    let glyphs = [
        ('a', Glyph::simple(Rect::new(0, 0, 4, 8))),
        ('b', Glyph::simple(Rect::new(4, 0, 4, 8))),
        ('?', Glyph::simple(Rect::new(8, 0, 4, 8))),
    ];
    let mut font = SpriteFont::new(font_texture, glyphs, 10.0);
    font.set_default_char(Some('?')).unwrap();
    let mut batch = SpriteBatch::new(ctx.clone()).unwrap();

    batch.begin_default().unwrap();
    batch.draw_string(&font, "ab\nzb", Vec2::new(5.0, 5.0), Color::WHITE).unwrap();
    let stats = batch.end().unwrap();

    assert_eq!(stats.sprites, 4);
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(font.measure_string("ab\nzb").unwrap(), Vec2::new(8.0, 20.0));
}
