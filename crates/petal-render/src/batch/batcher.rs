//! Ordering, grouping and submission of pooled sprites.

use petal_core::profiling::{profile_function, profile_scope};
use petal_test_utils::{RenderContext, SpriteVertex, TextureId};
use tracing::trace;

use super::pool::{BatchItem, BatchItemPool, ItemIndex};
use crate::error::{RenderError, RenderResult};
use crate::sampler::SamplerState;

/// Order in which queued sprites are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortMode {
    /// Submission order. Adjacent sprites sharing a texture share a draw call.
    #[default]
    Deferred,
    /// Every sprite is drawn as soon as it is submitted.
    Immediate,
    /// Grouped by texture, submission order within a texture.
    Texture,
    /// Descending depth, ties in submission order.
    BackToFront,
    /// Ascending depth, ties in submission order.
    FrontToBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatcherState {
    #[default]
    Idle,
    Collecting,
    Flushing,
}

/// Statistics from one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    /// Sprites drawn.
    pub sprites: u32,
    /// GPU draw calls issued.
    pub draw_calls: u32,
    /// Texture binds issued.
    pub texture_binds: u32,
    /// Sprites in the longest run.
    pub largest_run: u32,
}

impl BatchStats {
    /// Fold another flush of the same session into these stats.
    pub fn accumulate(&mut self, other: BatchStats) {
        self.sprites += other.sprites;
        self.draw_calls += other.draw_calls;
        self.texture_binds += other.texture_binds;
        self.largest_run = self.largest_run.max(other.largest_run);
    }
}

/// A range of the ordered sequence sharing one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub texture: TextureId,
    pub start: u32,
    pub count: u32,
}

/// Collects sprites for one session and turns them into draw calls.
#[derive(Debug)]
pub struct SpriteBatcher {
    pool: BatchItemPool,
    /// Pool indices in draw order.
    order: Vec<u32>,
    runs: Vec<Run>,
    /// Reused for every run; grows to the largest run and never shrinks.
    vertices: Vec<SpriteVertex>,
    state: BatcherState,
}

impl SpriteBatcher {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            pool: BatchItemPool::with_capacity(initial_capacity),
            order: Vec::with_capacity(initial_capacity),
            runs: Vec::new(),
            vertices: Vec::with_capacity(initial_capacity * 4),
            state: BatcherState::Idle,
        }
    }

    pub fn state(&self) -> BatcherState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn pool(&self) -> &BatchItemPool {
        &self.pool
    }

    pub fn vertex_capacity(&self) -> usize {
        self.vertices.capacity()
    }

    /// Queue a sprite for the next flush.
    pub fn enqueue(&mut self, item: BatchItem) -> RenderResult<ItemIndex> {
        if self.state == BatcherState::Flushing {
            return Err(RenderError::InvalidOperation(
                "cannot queue sprites while the batch is flushing".to_string(),
            ));
        }
        self.state = BatcherState::Collecting;
        Ok(self.pool.acquire(item))
    }

    /// Order the queued sprites for `sort` and split them into runs.
    pub fn plan_runs(&mut self, sort: SortMode) -> &[Run] {
        let items = self.pool.active_items();
        self.order.clear();
        self.order.extend(0..items.len() as u32);

        // `sort_by` is stable, which keeps submission order among equal keys.
        match sort {
            SortMode::Deferred | SortMode::Immediate => {}
            SortMode::Texture => self.order.sort_by_key(|&i| items[i as usize].texture),
            SortMode::BackToFront => self
                .order
                .sort_by(|&a, &b| items[b as usize].depth.total_cmp(&items[a as usize].depth)),
            SortMode::FrontToBack => self
                .order
                .sort_by(|&a, &b| items[a as usize].depth.total_cmp(&items[b as usize].depth)),
        }

        Self::build_runs(items, &self.order, &mut self.runs);
        &self.runs
    }

    fn build_runs(items: &[BatchItem], order: &[u32], runs: &mut Vec<Run>) {
        runs.clear();
        let Some(&first) = order.first() else {
            return;
        };

        let mut current = items[first as usize].texture;
        let mut start = 0u32;
        for (position, &index) in order.iter().enumerate() {
            let texture = items[index as usize].texture;
            if texture != current {
                runs.push(Run {
                    texture: current,
                    start,
                    count: position as u32 - start,
                });
                current = texture;
                start = position as u32;
            }
        }

        // Final run
        runs.push(Run {
            texture: current,
            start,
            count: order.len() as u32 - start,
        });
    }

    /// Drop every queued sprite without drawing.
    pub fn discard(&mut self) {
        self.pool.reset();
        self.state = BatcherState::Idle;
    }

    /// Draw every queued sprite and empty the batch.
    ///
    /// The pool is reset and the batcher returns to idle whether or not the
    /// flush succeeds.
    pub fn draw_batch(
        &mut self,
        ctx: &dyn RenderContext,
        sort: SortMode,
        sampler: &SamplerState,
    ) -> RenderResult<BatchStats> {
        profile_function!();
        if self.pool.is_empty() {
            self.state = BatcherState::Idle;
            return Ok(BatchStats::default());
        }

        self.state = BatcherState::Flushing;
        let result = self.flush(ctx, sort, sampler);
        self.pool.reset();
        self.state = BatcherState::Idle;
        result
    }

    fn flush(&mut self, ctx: &dyn RenderContext, sort: SortMode, sampler: &SamplerState) -> RenderResult<BatchStats> {
        self.plan_runs(sort);
        let items = self.pool.active_items();
        let mut stats = BatchStats {
            sprites: items.len() as u32,
            ..Default::default()
        };

        for run in &self.runs {
            profile_scope!("draw_run");
            let range = run.start as usize..(run.start + run.count) as usize;
            let first = &items[self.order[run.start as usize] as usize];

            self.vertices.clear();
            for &index in &self.order[range] {
                self.vertices.extend_from_slice(&items[index as usize].vertices());
            }

            ctx.bind_texture(run.texture)?;
            stats.texture_binds += 1;
            ctx.set_texture_sampling(run.texture, &sampler.to_params(first.mipmapped)?)?;
            ctx.draw_quads(run.texture, &self.vertices)?;
            stats.draw_calls += 1;
            stats.largest_run = stats.largest_run.max(run.count);
        }

        trace!(
            sprites = stats.sprites,
            draw_calls = stats.draw_calls,
            ?sort,
            "Flushed sprite batch"
        );
        Ok(stats)
    }
}

impl Default for SpriteBatcher {
    fn default() -> Self {
        Self::new(petal_core::config::BatchConfig::default().initial_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use petal_core::math::Vec2;
    use petal_test_utils::MockRenderContext;

    fn tex(raw: u32) -> TextureId {
        TextureId::from_raw(raw).unwrap()
    }

    fn item(texture: TextureId, depth: f32) -> BatchItem {
        BatchItem {
            texture,
            mipmapped: false,
            origin: Vec2::ZERO,
            offset: Vec2::ZERO,
            size: Vec2::ONE,
            sin_rotation: 0.0,
            cos_rotation: 1.0,
            color: Color::WHITE,
            tex_coord_tl: Vec2::ZERO,
            tex_coord_br: Vec2::ONE,
            depth,
        }
    }

    fn batcher_with(items: &[(u32, f32)]) -> SpriteBatcher {
        let mut batcher = SpriteBatcher::new(4);
        for &(texture, depth) in items {
            batcher.enqueue(item(tex(texture), depth)).unwrap();
        }
        batcher
    }

    #[test]
    fn test_deferred_merges_adjacent_only() {
        let mut batcher = batcher_with(&[(1, 0.0), (1, 0.0), (2, 0.0), (1, 0.0)]);
        let runs = batcher.plan_runs(SortMode::Deferred).to_vec();
        assert_eq!(
            runs,
            vec![
                Run { texture: tex(1), start: 0, count: 2 },
                Run { texture: tex(2), start: 2, count: 1 },
                Run { texture: tex(1), start: 3, count: 1 },
            ]
        );
    }

    #[test]
    fn test_texture_sort_groups_all() {
        let mut batcher = batcher_with(&[(2, 0.0), (1, 0.0), (2, 0.0), (3, 0.0), (1, 0.0)]);
        let runs = batcher.plan_runs(SortMode::Texture);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs.iter().map(|r| r.count).sum::<u32>(), 5);
    }

    #[test]
    fn test_depth_sorts_are_stable() {
        let mut batcher = batcher_with(&[(1, 0.5), (2, 1.0), (3, 0.5), (4, 0.0)]);
        batcher.plan_runs(SortMode::BackToFront);
        assert_eq!(batcher.order, vec![1, 0, 2, 3]);

        batcher.plan_runs(SortMode::FrontToBack);
        assert_eq!(batcher.order, vec![3, 0, 2, 1]);
    }

    #[test]
    fn test_draw_batch_issues_one_call_per_run() {
        let ctx = MockRenderContext::new();
        let textures: Vec<TextureId> = (0..2)
            .map(|_| {
                ctx.create_texture(&petal_test_utils::TextureDesc {
                    width: 1,
                    height: 1,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    mip_level_count: 1,
                    render_target: false,
                })
                .unwrap()
            })
            .collect();

        let mut batcher = SpriteBatcher::new(1);
        for texture in [textures[0], textures[0], textures[1]] {
            batcher.enqueue(item(texture, 0.0)).unwrap();
        }
        let stats = batcher
            .draw_batch(&ctx, SortMode::Deferred, &SamplerState::default())
            .unwrap();

        assert_eq!(
            stats,
            BatchStats {
                sprites: 3,
                draw_calls: 2,
                texture_binds: 2,
                largest_run: 2,
            }
        );
        let draws = ctx.draw_calls();
        assert_eq!(draws[0].quad_count(), 2);
        assert_eq!(draws[1].texture, textures[1]);
        assert!(batcher.is_empty());
        assert_eq!(batcher.state(), BatcherState::Idle);
        assert!(batcher.vertex_capacity() >= 8);
    }

    #[test]
    fn test_failed_flush_still_resets() {
        let ctx = MockRenderContext::new();
        // Texture 9 was never created, so binding it fails.
        let mut batcher = batcher_with(&[(9, 0.0)]);

        assert!(batcher.draw_batch(&ctx, SortMode::Deferred, &SamplerState::default()).is_err());
        assert!(batcher.is_empty());
        assert_eq!(batcher.state(), BatcherState::Idle);
    }

    #[test]
    fn test_empty_batch_draws_nothing() {
        let ctx = MockRenderContext::new();
        let mut batcher = SpriteBatcher::default();
        let stats = batcher
            .draw_batch(&ctx, SortMode::Texture, &SamplerState::default())
            .unwrap();
        assert_eq!(stats, BatchStats::default());
        assert_eq!(ctx.call_count(), 0);
    }
}
