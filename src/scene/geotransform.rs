//! Affine pixel ↔ world mapping shared by every grid in a scene.

use serde::{Deserialize, Serialize};

/// Affine geotransform (GDAL-style coefficients).
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Pixel width (x scale)
    pub a: f64,
    /// Row rotation (typically 0)
    pub b: f64,
    /// X origin (upper-left x coordinate)
    pub c: f64,
    /// Column rotation (typically 0)
    pub d: f64,
    /// Pixel height (y scale, negative for top-down, positive for bottom-up)
    pub e: f64,
    /// Y origin (upper-left y coordinate)
    pub f: f64,
}

impl GeoTransform {
    /// North-up transform with square or rectangular pixels.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height.abs(),
            f: origin_y,
        }
    }

    /// Convert world coordinates to pixel coordinates.
    ///
    /// Returns (column, row) as floating point for sub-pixel precision.
    #[inline]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        // Inverse of affine transform (assuming no rotation, b=0, d=0)
        let col = (x - self.c) / self.a;
        let row = (y - self.f) / self.e;
        (col, row)
    }

    /// Convert pixel coordinates to world coordinates.
    #[inline]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    /// World coordinates of the centre of pixel (row, col).
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// World bounds [min_x, min_y, max_x, max_y] of a `rows x cols` grid.
    pub fn bounds(&self, rows: usize, cols: usize) -> [f64; 4] {
        let (x0, y0) = self.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.pixel_to_world(cols as f64, rows as f64);
        [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
    }

    /// Transform of the sub-grid starting at (row, col).
    pub fn offset(&self, row: usize, col: usize) -> Self {
        let (c, f) = self.pixel_to_world(col as f64, row as f64);
        Self { c, f, ..*self }
    }
}
