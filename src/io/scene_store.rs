//! Per-scene Zarr groups: the storage layout for archive scenes and exports.
//!
//! ```text
//! {root}/{name}/zarr.json          group, scene metadata in attributes
//! {root}/{name}/{band}/zarr.json   float32 [rows, cols] array
//! {root}/{name}/{band}/c/0/0       zstd-compressed chunk
//! ```
//!
//! Band arrays are written before the group metadata, so a group without
//! `zarr.json` is an incomplete write and is never read back. Pixels that are
//! masked out are stored as NaN.

use crate::scene::{GeoTransform, Grid, Scene};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zarrs::array::codec::bytes_to_bytes::zstd::ZstdCodec;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::group::{Group, GroupBuilder};
use zarrs_object_store::AsyncObjectStore;

type ZarrStore = AsyncObjectStore<Arc<dyn ObjectStore>>;

/// Scene metadata stored in the group attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    pub acquired: DateTime<Utc>,
    pub crs: String,
    pub transform: GeoTransform,
    pub shape: [usize; 2],
    pub bands: Vec<String>,
}

impl SceneMetadata {
    pub fn of(scene: &Scene) -> Self {
        let (rows, cols) = scene.shape();
        Self {
            scene_id: scene.id().to_string(),
            acquired: scene.acquired(),
            crs: scene.crs().to_string(),
            transform: *scene.transform(),
            shape: [rows, cols],
            bands: scene.band_names().map(str::to_string).collect(),
        }
    }
}

fn node_path(root: &str, parts: &[&str]) -> String {
    let mut path = String::from("/");
    for part in std::iter::once(root).chain(parts.iter().copied()) {
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(part);
    }
    path
}

/// Write `scene` as a group named `name` under `root`.
///
/// Returns the group path.
pub async fn write_scene(
    store: Arc<dyn ObjectStore>,
    root: &str,
    name: &str,
    scene: &Scene,
    compression_level: i32,
) -> Result<String> {
    let zarr_store = Arc::new(AsyncObjectStore::new(store));
    let (rows, cols) = scene.shape();
    let mask = scene.mask();

    for (band, grid) in scene.bands() {
        let array_path = node_path(root, &[name, band]);

        let mut builder = ArrayBuilder::new(
            vec![rows as u64, cols as u64],
            DataType::Float32,
            vec![rows.max(1) as u64, cols.max(1) as u64].try_into()?,
            FillValue::from(f32::NAN),
        );
        builder.dimension_names(Some(vec![Some("y".to_string()), Some("x".to_string())]));
        builder.bytes_to_bytes_codecs(vec![Arc::new(ZstdCodec::new(compression_level, false))]);

        let array = builder
            .build(zarr_store.clone(), &array_path)
            .with_context(|| format!("Failed to build array {}", array_path))?;
        array.async_store_metadata().await?;

        let elements: Vec<f32> = grid
            .iter()
            .zip(mask.iter())
            .map(|(&v, &valid)| if valid { v } else { f32::NAN })
            .collect();

        array
            .async_store_chunk_elements::<f32>(&[0, 0], &elements)
            .await
            .with_context(|| format!("Failed to write {}", array_path))?;
    }

    let group_path = node_path(root, &[name]);
    let metadata = serde_json::to_value(SceneMetadata::of(scene))?;
    let attributes = match metadata {
        serde_json::Value::Object(map) => map,
        _ => anyhow::bail!("Scene metadata did not serialize to an object"),
    };

    let mut builder = GroupBuilder::new();
    builder.attributes(attributes);
    let group = builder.build(zarr_store.clone(), &group_path)?;
    group.async_store_metadata().await?;

    tracing::debug!("Wrote scene {} to {} ({} bands)", scene.id(), group_path, scene.band_names().count());

    Ok(group_path)
}

/// Read the metadata of the group `name` under `root`.
pub async fn read_metadata(store: Arc<dyn ObjectStore>, root: &str, name: &str) -> Result<SceneMetadata> {
    let zarr_store = Arc::new(AsyncObjectStore::new(store));
    let group_path = node_path(root, &[name]);

    let group = Group::async_open(zarr_store, &group_path)
        .await
        .with_context(|| format!("Failed to open scene group {}", group_path))?;

    let attributes = serde_json::Value::Object(group.attributes().clone());
    serde_json::from_value(attributes).with_context(|| format!("Malformed scene metadata in {}", group_path))
}

/// Read a full scene. Every pixel starts valid; NaN samples stay NaN.
pub async fn read_scene(store: Arc<dyn ObjectStore>, root: &str, name: &str) -> Result<Scene> {
    let metadata = read_metadata(store.clone(), root, name).await?;
    let zarr_store: Arc<ZarrStore> = Arc::new(AsyncObjectStore::new(store));
    let shape = (metadata.shape[0], metadata.shape[1]);

    let mut scene = Scene::new(
        metadata.scene_id.clone(),
        metadata.acquired,
        metadata.crs.clone(),
        metadata.transform,
        shape,
    );

    for band in &metadata.bands {
        let array_path = node_path(root, &[name, band]);
        let array = Array::async_open(zarr_store.clone(), &array_path)
            .await
            .with_context(|| format!("Failed to open band array {}", array_path))?;

        let elements = array
            .async_retrieve_array_subset_elements::<f32>(&array.subset_all())
            .await
            .with_context(|| format!("Failed to read {}", array_path))?;

        let grid: Grid = Array2::from_shape_vec(shape, elements)
            .with_context(|| format!("Band {} does not match shape {:?}", array_path, shape))?;
        scene = scene.with_band(band.clone(), grid)?;
    }

    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;
    use object_store::local::LocalFileSystem;
    use tempfile::TempDir;

    fn ndvi_scene() -> Scene {
        Scene::new(
            "MOD09A1_2010_02_01",
            Utc.with_ymd_and_hms(2010, 2, 1, 0, 0, 0).unwrap(),
            "EPSG:4326",
            GeoTransform::north_up(80.5, 22.5, 0.25, 0.25),
            (2, 3),
        )
        .with_band("NDVI", array![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]])
        .unwrap()
        .with_mask_and(&array![[true, true, false], [true, true, true]])
        .unwrap()
    }

    #[test]
    fn test_node_path() {
        assert_eq!(node_path("", &["scene", "NDVI"]), "/scene/NDVI");
        assert_eq!(node_path("out/", &["/MODIS_NDVI_TIFS", "a"]), "/out/MODIS_NDVI_TIFS/a");
        assert_eq!(node_path("", &[]), "/");
    }

    #[tokio::test]
    async fn test_write_then_read_scene() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap());

        let scene = ndvi_scene();
        let path = write_scene(store.clone(), "MODIS_NDVI_TIFS", "MODIS_NDVI_2010_02_01", &scene, 3)
            .await
            .unwrap();
        assert_eq!(path, "/MODIS_NDVI_TIFS/MODIS_NDVI_2010_02_01");
        assert!(temp_dir
            .path()
            .join("MODIS_NDVI_TIFS/MODIS_NDVI_2010_02_01/zarr.json")
            .exists());

        let read = read_scene(store, "MODIS_NDVI_TIFS", "MODIS_NDVI_2010_02_01").await.unwrap();
        assert_eq!(read.id(), scene.id());
        assert_eq!(read.date(), scene.date());
        assert_eq!(read.transform(), scene.transform());

        let ndvi = read.band("NDVI").unwrap();
        assert_eq!(ndvi[[0, 0]], 0.1);
        assert_eq!(ndvi[[1, 2]], 0.6);
        // Masked pixel stored as NaN
        assert!(ndvi[[0, 2]].is_nan());
    }

    #[tokio::test]
    async fn test_read_missing_group_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap());
        assert!(read_metadata(store, "", "nope").await.is_err());
    }
}
