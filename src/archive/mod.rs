//! Scene archives and scene selection.
//!
//! An [`Archive`] answers `{product, TimeRange, Region}` queries with scene
//! references and loads referenced scenes on demand.

mod catalog;
mod filter;
mod memory;
mod zarr_archive;

pub use catalog::{Catalog, CatalogEntry};
pub use filter::{filter, with_retry, RetryPolicy, SceneSequence};
pub use memory::InMemoryArchive;
pub use zarr_archive::{parse_export_date, ZarrArchive};

use crate::error::ArchiveError;
use crate::scene::{Region, Scene, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Reference to a scene that can be loaded later.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneRef {
    pub id: String,
    pub product: String,
    pub acquired: DateTime<Utc>,
    /// Footprint in WGS84 [min_lon, min_lat, max_lon, max_lat]
    pub bounds_wgs84: [f64; 4],
    /// Archive-specific location (group name, path)
    pub location: String,
}

impl SceneRef {
    pub fn date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }
}

/// A source of timestamped scenes.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Scenes of `product` acquired within `range` whose footprint intersects
    /// `region`, in chronological order.
    async fn query(&self, product: &str, range: &TimeRange, region: &Region) -> Result<Vec<SceneRef>, ArchiveError>;

    /// Load the bands of a referenced scene.
    async fn load(&self, scene: &SceneRef) -> Result<Scene, ArchiveError>;
}

/// Shared selection rule: product matches, date in range, footprint overlaps.
pub(crate) fn matches(scene: &SceneRef, product: &str, range: &TimeRange, region: &Region) -> bool {
    (product.is_empty() || scene.product == product)
        && range.contains(scene.date())
        && region.intersects_bounds(&scene.bounds_wgs84)
}
