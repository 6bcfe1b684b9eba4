use super::{Archive, Catalog, CatalogEntry, SceneRef};
use crate::config::{ArchiveConfig, ArchiveKind};
use crate::crs::{self, ProjCache};
use crate::error::ArchiveError;
use crate::io::{self, join_path};
use crate::scene::{Region, Scene, TimeRange};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use object_store::path::Path;
use object_store::ObjectStore;
use std::sync::Arc;

/// Date of an exported scene named `{prefix}_YYYY_MM_DD`.
pub fn parse_export_date(name: &str, prefix: &str) -> Option<NaiveDate> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('_')?;
    if rest.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(rest, "%Y_%m_%d").ok()
}

/// Where an archive's scene entries come from.
enum CatalogSource {
    Entries(Arc<Catalog>),
    /// Parquet catalog object, read on every query
    Parquet(Path),
    /// Export groups named `{prefix}_YYYY_MM_DD`, listed on every query
    Exports { prefix: String, product: String },
}

/// Archive of per-scene Zarr groups in an object store.
///
/// Catalog reads happen inside [`Archive::query`], so they run under the
/// caller's retry and timeout policy.
pub struct ZarrArchive {
    store: Arc<dyn ObjectStore>,
    root: String,
    source: CatalogSource,
}

impl ZarrArchive {
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>, catalog: Catalog) -> Self {
        Self {
            store,
            root: root.into(),
            source: CatalogSource::Entries(Arc::new(catalog)),
        }
    }

    /// Archive described by a parquet catalog at `{root}/{catalog_path}`.
    pub fn open(store: Arc<dyn ObjectStore>, root: &str, catalog_path: &str) -> Self {
        Self {
            store,
            root: root.to_string(),
            source: CatalogSource::Parquet(join_path(&[root, catalog_path])),
        }
    }

    /// Archive of exported scenes under `root`, each dated by its name.
    pub fn from_exports(store: Arc<dyn ObjectStore>, root: &str, prefix: &str, product: &str) -> Self {
        Self {
            store,
            root: root.to_string(),
            source: CatalogSource::Exports {
                prefix: prefix.to_string(),
                product: product.to_string(),
            },
        }
    }

    /// Archive configured in `config`. Nothing is read until the first query.
    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        let store = io::create_store(&config.location)?;
        let root = io::store_prefix(&config.location).to_string();

        Ok(match config.kind {
            ArchiveKind::Catalog => Self::open(store, &root, &config.catalog_path),
            ArchiveKind::Exports => Self::from_exports(store, &root, &config.export_prefix, &config.product),
        })
    }

    /// Read the current catalog.
    pub async fn catalog(&self) -> Result<Arc<Catalog>, ArchiveError> {
        match &self.source {
            CatalogSource::Entries(catalog) => Ok(catalog.clone()),
            CatalogSource::Parquet(path) => Ok(Arc::new(Catalog::load(self.store.clone(), path).await?)),
            CatalogSource::Exports { prefix, product } => Ok(Arc::new(self.index_exports(prefix, product).await?)),
        }
    }

    /// Groups whose names do not parse, or whose metadata cannot be read,
    /// are skipped with a warning.
    async fn index_exports(&self, prefix: &str, product: &str) -> Result<Catalog, ArchiveError> {
        let listing_root = join_path(&[&self.root]);
        let listing = self
            .store
            .list_with_delimiter((!self.root.is_empty()).then_some(&listing_root))
            .await
            .map_err(|e| ArchiveError::Unavailable(format!("listing exports under '{}': {}", self.root, e)))?;

        let mut found = Vec::new();
        for dir in listing.common_prefixes {
            let Some(name) = dir.filename() else { continue };
            let Some(date) = parse_export_date(name, prefix) else {
                tracing::debug!("Skipping '{}': not named {}_YYYY_MM_DD", name, prefix);
                continue;
            };

            match io::read_metadata(self.store.clone(), &self.root, name).await {
                Ok(metadata) => found.push((name.to_string(), date, metadata)),
                Err(e) => tracing::warn!("Skipping export {}: {:#}", name, e),
            }
        }

        // Footprints are computed after all I/O; ProjCache is not held across awaits
        let cache = ProjCache::new();
        let mut entries = Vec::with_capacity(found.len());
        for (name, date, metadata) in found {
            let bounds = metadata.transform.bounds(metadata.shape[0], metadata.shape[1]);
            let bounds_wgs84 = crs::transform_bounds(&bounds, &metadata.crs, crs::codes::WGS84, &cache, 8)
                .map_err(|e| ArchiveError::Catalog(format!("footprint of {} is not transformable: {:#}", name, e)))?;

            entries.push(CatalogEntry {
                scene_id: name.clone(),
                product: product.to_string(),
                acquired: date.and_time(NaiveTime::MIN).and_utc(),
                bounds_wgs84,
                location: name,
            });
        }

        tracing::info!("Indexed {} exported scenes under '{}'", entries.len(), self.root);

        Ok(Catalog::new(entries))
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

#[async_trait]
impl Archive for ZarrArchive {
    async fn query(&self, product: &str, range: &TimeRange, region: &Region) -> Result<Vec<SceneRef>, ArchiveError> {
        let catalog = self.catalog().await?;
        tracing::debug!("Catalog holds {} scenes", catalog.len());
        catalog.query(product, range, region)
    }

    async fn load(&self, scene: &SceneRef) -> Result<Scene, ArchiveError> {
        let mut loaded = io::read_scene(self.store.clone(), &self.root, &scene.location)
            .await
            .map_err(|e| ArchiveError::Load {
                scene_id: scene.id.clone(),
                reason: format!("{:#}", e),
            })?;

        // Exports are dated by name, not by the id they were written with
        if loaded.id() != scene.id {
            loaded = loaded.renamed(scene.id.clone(), scene.acquired);
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{filter, RetryPolicy};
    use crate::scene::GeoTransform;
    use chrono::{TimeZone, Utc};
    use ndarray::array;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn scene(id: &str, day: u32) -> Scene {
        Scene::new(
            id,
            Utc.with_ymd_and_hms(2010, 2, day, 0, 0, 0).unwrap(),
            "EPSG:4326",
            GeoTransform::north_up(80.5, 22.5, 0.25, 0.25),
            (2, 2),
        )
        .with_band("sur_refl_b01", array![[0.1, 0.2], [0.3, 0.4]])
        .unwrap()
    }

    fn kanha() -> Region {
        Region::from_bounds([80.53, 22.05, 81.2, 22.45]).unwrap()
    }

    fn entry(id: &str, day: u32) -> CatalogEntry {
        CatalogEntry {
            scene_id: id.to_string(),
            product: "MOD09A1".to_string(),
            acquired: Utc.with_ymd_and_hms(2010, 2, day, 0, 0, 0).unwrap(),
            bounds_wgs84: [80.5, 22.0, 81.0, 22.5],
            location: id.to_string(),
        }
    }

    fn retry_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn test_parse_export_date() {
        assert_eq!(
            parse_export_date("MODIS_NDVI_2010_02_09", "MODIS_NDVI"),
            NaiveDate::from_ymd_opt(2010, 2, 9)
        );
        assert_eq!(parse_export_date("MODIS_NDVI_2010_02_09.tif", "MODIS_NDVI"), None);
        assert_eq!(parse_export_date("OTHER_2010_02_09", "MODIS_NDVI"), None);
        assert_eq!(parse_export_date("MODIS_NDVI_2010_13_01", "MODIS_NDVI"), None);
    }

    #[tokio::test]
    async fn test_catalog_archive_query_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap());

        let mut entries = Vec::new();
        for (id, day) in [("s1", 1), ("s2", 9)] {
            let s = scene(id, day);
            io::write_scene(store.clone(), "scenes", id, &s, 3).await.unwrap();
            entries.push(CatalogEntry {
                scene_id: id.to_string(),
                product: "MOD09A1".to_string(),
                acquired: s.acquired(),
                bounds_wgs84: s.bounds(),
                location: id.to_string(),
            });
        }
        Catalog::new(entries)
            .save(store.clone(), &join_path(&["scenes", "catalog.parquet"]))
            .await
            .unwrap();

        let archive = ZarrArchive::open(store, "scenes", "catalog.parquet");
        let range = TimeRange::parse("2010-02-01", "2010-03-01").unwrap();
        let refs = archive.query("MOD09A1", &range, &kanha()).await.unwrap();
        assert_eq!(refs.len(), 2);

        let loaded = archive.load(&refs[1]).await.unwrap();
        assert_eq!(loaded.id(), "s2");
        assert_eq!(loaded.band("sur_refl_b01").unwrap()[[1, 1]], 0.4);
    }

    #[tokio::test]
    async fn test_missing_group_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap());
        let archive = ZarrArchive::new(store, "", Catalog::new(Vec::new()));

        let missing = SceneRef {
            id: "gone".to_string(),
            product: String::new(),
            acquired: Utc.with_ymd_and_hms(2010, 2, 1, 0, 0, 0).unwrap(),
            bounds_wgs84: [0.0, 0.0, 1.0, 1.0],
            location: "gone".to_string(),
        };
        assert!(matches!(archive.load(&missing).await, Err(ArchiveError::Load { .. })));
    }

    #[tokio::test]
    async fn test_exports_are_dated_by_name() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap());

        io::write_scene(store.clone(), "tifs", "MODIS_NDVI_2010_02_09", &scene("orig_b", 9), 3)
            .await
            .unwrap();
        io::write_scene(store.clone(), "tifs", "MODIS_NDVI_2010_02_01", &scene("orig_a", 1), 3)
            .await
            .unwrap();
        io::write_scene(store.clone(), "tifs", "notes", &scene("other", 1), 3)
            .await
            .unwrap();

        let archive = ZarrArchive::from_exports(store, "tifs", "MODIS_NDVI", "MODIS");
        assert_eq!(archive.catalog().await.unwrap().len(), 2);

        let range = TimeRange::parse("2010-01-01", "2011-01-01").unwrap();
        let refs = archive.query("MODIS", &range, &kanha()).await.unwrap();
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["MODIS_NDVI_2010_02_01", "MODIS_NDVI_2010_02_09"]);

        let loaded = archive.load(&refs[0]).await.unwrap();
        assert_eq!(loaded.id(), "MODIS_NDVI_2010_02_01");
    }

    #[tokio::test]
    async fn test_catalog_is_read_at_query_time() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let archive = ZarrArchive::open(store.clone(), "scenes", "catalog.parquet");
        let range = TimeRange::parse("2010-02-01", "2010-03-01").unwrap();

        let missing = archive.query("MOD09A1", &range, &kanha()).await;
        assert!(matches!(missing, Err(ArchiveError::Unavailable(_))));

        Catalog::new(vec![entry("s1", 1)])
            .save(store, &join_path(&["scenes", "catalog.parquet"]))
            .await
            .unwrap();
        assert_eq!(archive.query("MOD09A1", &range, &kanha()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_catalog_is_unavailable_after_retries() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let archive = Arc::new(ZarrArchive::open(store, "scenes", "catalog.parquet"));
        let range = TimeRange::parse("2010-02-01", "2010-03-01").unwrap();
        let sequence = filter(archive, "MOD09A1", range, kanha(), retry_policy(2));

        let start = Instant::now();
        let result = sequence.refs().await;

        assert!(matches!(result, Err(ArchiveError::Unavailable(_))));
        // Two backoffs: 10ms then 20ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_catalog_retried_until_it_appears() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let archive = Arc::new(ZarrArchive::open(store.clone(), "scenes", "catalog.parquet"));
        let range = TimeRange::parse("2010-02-01", "2010-03-01").unwrap();
        let sequence = filter(archive, "MOD09A1", range, kanha(), retry_policy(50));

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Catalog::new(vec![entry("s1", 1), entry("s2", 9)])
                .save(store, &join_path(&["scenes", "catalog.parquet"]))
                .await
                .unwrap();
        });

        let refs = sequence.refs().await.unwrap();
        writer.await.unwrap();
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }
}
