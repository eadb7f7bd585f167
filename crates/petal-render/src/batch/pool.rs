//! Arena of reusable batch items.

use petal_core::math::Vec2;
use petal_test_utils::{SpriteVertex, TextureId};
use tracing::debug;

use crate::color::Color;

/// One queued sprite: a rotated, tinted quad sampling `texture`.
///
/// Corners are `origin + rotate(offset + corner)`, where `corner` is
/// `(0, 0)`, `(width, 0)`, `(0, height)` or `(width, height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchItem {
    pub texture: TextureId,
    /// The texture has a mip chain, so sampling uses a mip filter.
    pub mipmapped: bool,
    pub origin: Vec2,
    pub offset: Vec2,
    pub size: Vec2,
    pub sin_rotation: f32,
    pub cos_rotation: f32,
    pub color: Color,
    pub tex_coord_tl: Vec2,
    pub tex_coord_br: Vec2,
    pub depth: f32,
}

impl BatchItem {
    /// The four corners in top-left, top-right, bottom-left, bottom-right order.
    pub fn vertices(&self) -> [SpriteVertex; 4] {
        let (sin, cos) = (self.sin_rotation, self.cos_rotation);
        let corner = |dx: f32, dy: f32, u: f32, v: f32| SpriteVertex {
            position: [
                self.origin.x + dx * cos - dy * sin,
                self.origin.y + dx * sin + dy * cos,
            ],
            tex_coord: [u, v],
            color: self.color.to_array(),
        };

        let (left, top) = (self.offset.x, self.offset.y);
        let (right, bottom) = (left + self.size.x, top + self.size.y);
        let (tl, br) = (self.tex_coord_tl, self.tex_coord_br);
        [
            corner(left, top, tl.x, tl.y),
            corner(right, top, br.x, tl.y),
            corner(left, bottom, tl.x, br.y),
            corner(right, bottom, br.x, br.y),
        ]
    }
}

/// Index of an item in a [`BatchItemPool`], valid until the pool is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemIndex(pub u32);

/// Arena of batch items.
///
/// Slots are reused across flushes. When every slot is in use the arena
/// doubles; it never shrinks, so a steady frame allocates nothing.
#[derive(Debug)]
pub struct BatchItemPool {
    items: Vec<BatchItem>,
    active: usize,
}

impl BatchItemPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.max(1)),
            active: 0,
        }
    }

    /// Store `item` in the next free slot.
    pub fn acquire(&mut self, item: BatchItem) -> ItemIndex {
        let index = self.active;
        if index < self.items.len() {
            self.items[index] = item;
        } else {
            if self.items.len() == self.items.capacity() {
                let grow = self.items.capacity().max(1);
                self.items.reserve_exact(grow);
                debug!("Batch item pool grew to {} items", self.items.capacity());
            }
            self.items.push(item);
        }
        self.active += 1;
        ItemIndex(index as u32)
    }

    pub fn get(&self, index: ItemIndex) -> Option<&BatchItem> {
        self.active_items().get(index.0 as usize)
    }

    /// Items acquired since the last reset, in acquisition order.
    pub fn active_items(&self) -> &[BatchItem] {
        &self.items[..self.active]
    }

    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Slots available before the next growth.
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Release every item at once. Storage is kept for the next session.
    pub fn reset(&mut self) {
        self.active = 0;
    }
}

impl Default for BatchItemPool {
    fn default() -> Self {
        Self::with_capacity(petal_core::config::BatchConfig::default().initial_capacity)
    }
}
