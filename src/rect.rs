//! Rectangles, points and regions over half-open screen coordinates.
//!
//! These are the leaf types everything else in the crate is built on —
//! dirty-rect lists, copied-rect lists, wire metablocks and the RFX
//! tile grid all speak in terms of [`Rect`].

use bitflags::bitflags;

/// Top-left + size rectangle, half-open (`[x, x+cx) x [y, y+cy)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub cx: i16,
    pub cy: i16,
}

impl Rect {
    #[inline]
    pub const fn new(x: i16, y: i16, cx: i16, cy: i16) -> Self {
        Self { x, y, cx, cy }
    }

    #[inline]
    pub fn right(&self) -> i32 {
        self.x as i32 + self.cx as i32
    }

    #[inline]
    pub fn bottom(&self) -> i32 {
        self.y as i32 + self.cy as i32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cx <= 0 || self.cy <= 0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect {
            x,
            y,
            cx: (right - x as i32) as i16,
            cy: (bottom - y as i32) as i16,
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right() as i16
            && self.right() as i16 > other.x
            && self.y < other.bottom() as i16
            && self.bottom() as i16 > other.y
    }

    /// Convert to the two-corner wire form used by RDPGFX.
    #[inline]
    pub fn to_egfx(&self) -> EgfxRect {
        EgfxRect {
            x1: self.x,
            y1: self.y,
            x2: self.right() as i16,
            y2: self.bottom() as i16,
        }
    }

    /// Split this rect into a grid of `tile`-sized tiles, used by the RFX
    /// path to build the copied-tile list aligned to the 64px grid.
    pub fn iter_tiles(&self, tile: i16) -> impl Iterator<Item = Rect> + '_ {
        let tile = tile.max(1);
        let cols = ((self.cx as i32 + tile as i32 - 1) / tile as i32).max(0);
        let rows = ((self.cy as i32 + tile as i32 - 1) / tile as i32).max(0);
        (0..rows).flat_map(move |row| {
            (0..cols).map(move |col| {
                let tx = self.x as i32 + col * tile as i32;
                let ty = self.y as i32 + row * tile as i32;
                let tcx = tile.min((self.right() - tx) as i16);
                let tcy = tile.min((self.bottom() - ty) as i16);
                Rect::new(tx as i16, ty as i16, tcx, tcy)
            })
        })
    }
}

/// Two-corner rectangle used on the wire (MS-RDPEGFX `RDPGFX_RECT16`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EgfxRect {
    pub x1: i16,
    pub y1: i16,
    pub x2: i16,
    pub y2: i16,
}

impl EgfxRect {
    #[inline]
    pub const fn to_rect(&self) -> Rect {
        Rect {
            x: self.x1,
            y: self.y1,
            cx: self.x2 - self.x1,
            cy: self.y2 - self.y1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

/// One monitor in a (possibly) multi-monitor layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorInfo {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub is_primary: bool,
}

bitflags! {
    /// Flags carried on an [`crate::queue::EncJob`] (§3.2, §4.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EncJobFlags: u32 {
        /// `data`'s first four bytes are a little-endian length prefix
        /// of an already-compressed payload; skip codec invocation.
        const ALREADY_COMPRESSED = 0b01;
        /// Force the next encoded picture to be a key frame (IDR).
        const KEY_FRAME_REQUESTED = 0b10;
    }
}

/// An unordered collection of rectangles with set-like merge operations.
///
/// Used to compute the bounding box of a dirty-rect list, or to walk a
/// rect's 64px tile grid for the RFX path (§4.3).
#[derive(Debug, Clone, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rects(rects: Vec<Rect>) -> Self {
        Self { rects }
    }

    pub fn push(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rect> {
        self.rects.iter()
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// The smallest rect containing every rect in this region.
    pub fn bounding_box(&self) -> Option<Rect> {
        self.rects
            .iter()
            .copied()
            .reduce(|acc, r| acc.union(&r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_disjoint_rects_covers_both() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 10, 10);
        let u = a.union(&b);
        assert_eq!(u, Rect::new(0, 0, 30, 30));
    }

    #[test]
    fn intersects_detects_overlap_and_touching() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(9, 9, 10, 10);
        assert!(a.intersects(&b));
        let c = Rect::new(10, 10, 10, 10);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn egfx_round_trip_preserves_rect() {
        let r = Rect::new(3, 4, 100, 50);
        assert_eq!(r.to_egfx().to_rect(), r);
    }

    #[test]
    fn tile_iteration_covers_full_area_exactly() {
        let r = Rect::new(0, 0, 130, 70);
        let tiles: Vec<_> = r.iter_tiles(64).collect();
        // ceil(130/64) * ceil(70/64) = 3 * 2
        assert_eq!(tiles.len(), 6);
        let area: i64 = tiles.iter().map(|t| t.cx as i64 * t.cy as i64).sum();
        assert_eq!(area, 130 * 70);
    }

    #[test]
    fn bounding_box_of_empty_region_is_none() {
        assert!(Region::new().bounding_box().is_none());
    }

    #[test]
    fn already_compressed_flag_roundtrips_through_bits() {
        let flags = EncJobFlags::ALREADY_COMPRESSED | EncJobFlags::KEY_FRAME_REQUESTED;
        assert!(flags.contains(EncJobFlags::ALREADY_COMPRESSED));
        assert!(flags.contains(EncJobFlags::KEY_FRAME_REQUESTED));
        assert!(!EncJobFlags::KEY_FRAME_REQUESTED.contains(EncJobFlags::ALREADY_COMPRESSED));
    }
}
