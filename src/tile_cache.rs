//! The tile cache: the latest iteration counts for every tile we have
//! computed, kept so the screen can be redrawn (or a pixel inspected)
//! without computing anything again.
//!
//! A tile may arrive twice, first as a coarse preview and then at full
//! resolution, and the two can race.  Whatever the order, the cache
//! keeps the one with more pixels.

use crate::planes::{Rect, Resolution};

/// The iteration counts for one rectangle of the canvas.
#[derive(Clone, Debug, PartialEq)]
pub struct TileEntry {
    /// Where the tile sits on the canvas right now.
    pub rect: Rect,
    /// One count per buffer cell, row by row.
    pub buffer: Vec<u32>,
    /// The shape of `buffer`.
    pub resolution: Resolution,
}

impl TileEntry {
    /// The count for the canvas point `(x, y)`, which must lie inside
    /// the tile.
    pub fn iteration_at(&self, x: f64, y: f64) -> Option<u32> {
        let idx = self.rect.buffer_index(x, y, self.resolution);
        self.buffer.get(idx).cloned()
    }
}

/// Every tile we know about.  Tiles are few (tens, maybe hundreds), so
/// a plain vector scanned front to back does fine.
#[derive(Debug, Default)]
pub struct TileCache {
    entries: Vec<TileEntry>,
}

impl TileCache {
    /// An empty cache.
    pub fn new() -> Self {
        TileCache::default()
    }

    /// Stores a buffer for `rect`.  If there's already one at the same
    /// position, the new one wins only if it has strictly more pixels.
    pub fn upsert(&mut self, rect: Rect, buffer: Vec<u32>, resolution: Resolution) {
        let entry = TileEntry {
            rect,
            buffer,
            resolution,
        };
        let existing = self
            .entries
            .iter()
            .position(|held| held.rect.x == rect.x && held.rect.y == rect.y);

        match existing {
            Some(idx) => {
                if self.entries[idx].resolution.area() < resolution.area() {
                    self.entries[idx] = entry;
                }
            }
            None => self.entries.push(entry),
        }
    }

    /// The count at the canvas point `(x, y)`, from the first tile
    /// containing it.
    pub fn query(&self, x: f64, y: f64) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.rect.contains(x, y))
            .and_then(|entry| entry.iteration_at(x, y))
    }

    /// Every entry, for a full redraw.
    pub fn entries(&self) -> &[TileEntry] {
        &self.entries
    }

    /// The viewport has moved by `(dx, dy)` pixels, so every tile now
    /// sits that much the other way.  Buffers are untouched.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        for entry in &mut self.entries {
            entry.rect = entry.rect.offset(-dx, -dy);
        }
    }

    /// Forgets every tile.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of tiles held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Holds nothing?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
