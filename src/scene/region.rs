//! Polygon footprint used for spatial filtering, reduction and clipping.

use crate::crs::{self, ProjCache};
use crate::error::SceneError;
use crate::scene::GeoTransform;
use anyhow::Result;
use geo::{BoundingRect, Coord, Intersects, LineString, Point, Polygon};
use ndarray::Array2;

/// Immutable lon/lat polygon. The ring is closed implicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    polygon: Polygon<f64>,
    bounds: [f64; 4],
}

impl Region {
    /// Build a region from (lon, lat) vertices.
    ///
    /// Repeated consecutive vertices collapse to one, and a trailing vertex
    /// equal to the first is dropped. Self-intersection is not checked.
    pub fn new(vertices: &[[f64; 2]]) -> Result<Self, SceneError> {
        let mut ring: Vec<Coord<f64>> = vertices
            .iter()
            .map(|v| Coord { x: v[0], y: v[1] })
            .collect();
        ring.dedup();

        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }

        if ring.len() < 3 {
            return Err(SceneError::InvalidParameter {
                name: "region",
                value: format!("{} distinct vertices", ring.len()),
                reason: "a polygon needs at least 3 distinct vertices".to_string(),
            });
        }

        if ring.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(SceneError::InvalidParameter {
                name: "region",
                value: format!("{:?}", vertices),
                reason: "vertices must be finite".to_string(),
            });
        }

        let polygon = Polygon::new(LineString::from(ring), vec![]);
        let rect = polygon
            .bounding_rect()
            .ok_or_else(|| SceneError::InvalidParameter {
                name: "region",
                value: format!("{:?}", vertices),
                reason: "empty polygon".to_string(),
            })?;

        Ok(Self {
            bounds: [rect.min().x, rect.min().y, rect.max().x, rect.max().y],
            polygon,
        })
    }

    /// Axis-aligned rectangle as a region.
    pub fn from_bounds(bounds: [f64; 4]) -> Result<Self, SceneError> {
        Self::new(&[
            [bounds[0], bounds[1]],
            [bounds[2], bounds[1]],
            [bounds[2], bounds[3]],
            [bounds[0], bounds[3]],
        ])
    }

    /// Bounding box [min_lon, min_lat, max_lon, max_lat].
    pub fn bounds(&self) -> [f64; 4] {
        self.bounds
    }

    /// Vertices of the exterior ring, without the closing vertex.
    pub fn vertices(&self) -> Vec<[f64; 2]> {
        let coords = &self.polygon.exterior().0;
        coords[..coords.len().saturating_sub(1)]
            .iter()
            .map(|c| [c.x, c.y])
            .collect()
    }

    /// Whether (lon, lat) lies inside the polygon or on its boundary.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        if lon < self.bounds[0] || lon > self.bounds[2] || lat < self.bounds[1] || lat > self.bounds[3] {
            return false;
        }
        self.polygon.intersects(&Point::new(lon, lat))
    }

    /// Whether the region's bounding box intersects `bounds` (WGS84).
    pub fn intersects_bounds(&self, bounds: &[f64; 4]) -> bool {
        self.bounds[0] <= bounds[2]
            && self.bounds[2] >= bounds[0]
            && self.bounds[1] <= bounds[3]
            && self.bounds[3] >= bounds[1]
    }

    /// Per-pixel membership for a grid in `grid_crs`.
    ///
    /// A pixel belongs to the region when its centre does. Centres are
    /// transformed to WGS84 first when the grid is projected.
    pub fn pixel_mask(
        &self,
        grid_crs: &str,
        transform: &GeoTransform,
        shape: (usize, usize),
    ) -> Result<Array2<bool>> {
        let (rows, cols) = shape;
        let mut mask = Array2::from_elem((rows, cols), false);

        if crs::is_wgs84(grid_crs) {
            for ((row, col), inside) in mask.indexed_iter_mut() {
                let (lon, lat) = transform.pixel_center(row, col);
                *inside = self.contains(lon, lat);
            }
            return Ok(mask);
        }

        let cache = ProjCache::new();
        let proj = cache.get(grid_crs, crs::codes::WGS84)?;
        for ((row, col), inside) in mask.indexed_iter_mut() {
            let (x, y) = transform.pixel_center(row, col);
            *inside = match proj.convert((x, y)) {
                Ok((lon, lat)) => self.contains(lon, lat),
                Err(_) => false,
            };
        }
        Ok(mask)
    }
}
