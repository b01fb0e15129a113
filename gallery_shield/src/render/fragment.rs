//! Gallery Shield - Fragment Grid
//!
//! Partitions an image into N×M tiles on integer boundaries. Boundaries are
//! `floor(i * extent / count)`, so adjacent tiles share an edge exactly and
//! no tile is more than one pixel wider than its neighbour.

use serde::{Deserialize, Serialize};

use crate::config::GridConfig;
use crate::error::{ShieldError, ShieldResult};

/// One tile of the grid, in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub column: u32,
    pub row: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Shared area with another rectangle
    pub fn intersection_area(&self, other: &TileRect) -> u64 {
        let w = self.right().min(other.right()).saturating_sub(self.x.max(other.x));
        let h = self.bottom().min(other.bottom()).saturating_sub(self.y.max(other.y));
        w as u64 * h as u64
    }
}

/// Tile layout covering a `width`×`height` image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentLayout {
    pub width: u32,
    pub height: u32,
    pub columns: u32,
    pub rows: u32,
    /// Row-major
    pub tiles: Vec<TileRect>,
}

impl FragmentLayout {
    pub fn partition(width: u32, height: u32, columns: u32, rows: u32) -> ShieldResult<Self> {
        if columns == 0 || rows == 0 || columns > width || rows > height {
            return Err(ShieldError::InvalidGrid {
                columns,
                rows,
                width,
                height,
            });
        }

        let xs = boundaries(width, columns);
        let ys = boundaries(height, rows);

        let mut tiles = Vec::with_capacity((columns * rows) as usize);
        for row in 0..rows as usize {
            for column in 0..columns as usize {
                tiles.push(TileRect {
                    column: column as u32,
                    row: row as u32,
                    x: xs[column],
                    y: ys[row],
                    width: xs[column + 1] - xs[column],
                    height: ys[row + 1] - ys[row],
                });
            }
        }

        Ok(Self {
            width,
            height,
            columns,
            rows,
            tiles,
        })
    }

    /// Single tile covering the whole image
    pub fn whole(width: u32, height: u32) -> ShieldResult<Self> {
        Self::partition(width, height, 1, 1)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Union of all tile rectangles as (x, y, right, bottom)
    pub fn bounding_box(&self) -> Option<(u32, u32, u32, u32)> {
        let first = self.tiles.first()?;
        let init = (first.x, first.y, first.right(), first.bottom());
        Some(self.tiles.iter().fold(init, |(x0, y0, x1, y1), t| {
            (x0.min(t.x), y0.min(t.y), x1.max(t.right()), y1.max(t.bottom()))
        }))
    }

    /// Check the tiles cover the image exactly: in bounds, no overlap, no gap
    pub fn verify_tiling(&self) -> ShieldResult<()> {
        let invalid = || ShieldError::InvalidGrid {
            columns: self.columns,
            rows: self.rows,
            width: self.width,
            height: self.height,
        };

        if self.tiles.iter().any(|t| t.width == 0 || t.height == 0) {
            return Err(invalid());
        }
        if self.bounding_box() != Some((0, 0, self.width, self.height)) {
            return Err(invalid());
        }
        for (i, a) in self.tiles.iter().enumerate() {
            if self.tiles[i + 1..].iter().any(|b| a.intersection_area(b) > 0) {
                return Err(invalid());
            }
        }
        // Disjoint and inside the bounds, so equal area means no gaps
        let covered: u64 = self.tiles.iter().map(TileRect::area).sum();
        if covered != self.width as u64 * self.height as u64 {
            return Err(invalid());
        }
        Ok(())
    }
}

fn boundaries(extent: u32, count: u32) -> Vec<u32> {
    (0..=count)
        .map(|i| ((i as u64 * extent as u64) / count as u64) as u32)
        .collect()
}

/// Grid for a display size, coarsened so no tile is drawn below `min_tile_px`
pub fn effective_grid(config: &GridConfig, display_width: u32, display_height: u32) -> (u32, u32) {
    let min_tile = config.min_tile_px.max(1);
    let fit = |configured: u32, extent: u32| configured.min(extent / min_tile).max(1);
    (
        fit(config.columns, display_width),
        fit(config.rows, display_height),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMON_WIDTHS: [u32; 8] = [320, 375, 414, 768, 1024, 1366, 1920, 2560];

    #[test]
    fn test_partition_reconstructs_bounds() {
        let layout = FragmentLayout::partition(1001, 667, 4, 4).unwrap();
        assert_eq!(layout.tile_count(), 16);
        assert_eq!(layout.bounding_box(), Some((0, 0, 1001, 667)));
        layout.verify_tiling().unwrap();
    }

    #[test]
    fn test_adjacent_tiles_share_edges() {
        let layout = FragmentLayout::partition(10, 10, 3, 3).unwrap();
        for row in layout.tiles.chunks(3) {
            assert_eq!(row[0].right(), row[1].x);
            assert_eq!(row[1].right(), row[2].x);
            let widths: Vec<u32> = row.iter().map(|t| t.width).collect();
            assert!(widths.iter().max().unwrap() - widths.iter().min().unwrap() <= 1);
        }
    }

    #[test]
    fn test_invalid_grids() {
        assert!(FragmentLayout::partition(100, 100, 0, 4).is_err());
        assert!(FragmentLayout::partition(3, 100, 4, 4).is_err());
        assert!(FragmentLayout::whole(0, 0).is_err());
    }

    #[test]
    fn test_verify_detects_overlap_and_gap() {
        let mut layout = FragmentLayout::partition(100, 100, 2, 2).unwrap();
        layout.tiles[1].x -= 1;
        layout.tiles[1].width += 1;
        assert!(layout.verify_tiling().is_err());

        let mut layout = FragmentLayout::partition(100, 100, 2, 2).unwrap();
        layout.tiles[3].width -= 1;
        layout.tiles[3].x += 1;
        assert!(layout.verify_tiling().is_err());
    }

    #[test]
    fn test_common_widths_tile_cleanly() {
        let config = GridConfig::default();
        for width in COMMON_WIDTHS {
            let height = width * 2 / 3;
            let (columns, rows) = effective_grid(&config, width, height);
            let layout = FragmentLayout::partition(width, height, columns, rows).unwrap();
            layout.verify_tiling().unwrap();
            for tile in &layout.tiles {
                assert!(tile.width >= config.min_tile_px, "width {} tile {:?}", width, tile);
                assert!(tile.height >= config.min_tile_px, "width {} tile {:?}", width, tile);
            }
        }
    }

    #[test]
    fn test_effective_grid_coarsens_small_displays() {
        let config = GridConfig::default();
        assert_eq!(effective_grid(&config, 1920, 1080), (4, 4));
        assert_eq!(effective_grid(&config, 150, 100), (3, 2));
        assert_eq!(effective_grid(&config, 10, 10), (1, 1));
    }
}
