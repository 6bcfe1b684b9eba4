//! Export mode: clip, resample and persist one artifact per scene.

use crate::error::ExportError;
use crate::io;
use crate::scene::{Region, Scene};
use crate::transform::{clip_to_region, resample, ResampleTarget};
use async_trait::async_trait;
use chrono::NaiveDate;
use object_store::ObjectStore;
use std::sync::Arc;

/// Artifact name for a scene acquired on `date`: `{prefix}_{yyyy_MM_dd}`.
pub fn export_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{}", prefix, date.format("%Y_%m_%d"))
}

/// Destination for exported scenes.
#[async_trait]
pub trait SceneSink: Send + Sync {
    /// Persist `scene` as `name`, returning where it was written.
    ///
    /// A failed write must not leave a readable partial artifact.
    async fn write(&self, name: &str, scene: &Scene) -> Result<String, ExportError>;
}

/// Writes scenes as Zarr groups under `root` in an object store.
pub struct ZarrSceneSink {
    store: Arc<dyn ObjectStore>,
    root: String,
    compression_level: i32,
}

impl ZarrSceneSink {
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>, compression_level: i32) -> Self {
        Self {
            store,
            root: root.into(),
            compression_level,
        }
    }
}

#[async_trait]
impl SceneSink for ZarrSceneSink {
    async fn write(&self, name: &str, scene: &Scene) -> Result<String, ExportError> {
        io::write_scene(self.store.clone(), &self.root, name, scene, self.compression_level)
            .await
            .map_err(|e| ExportError {
                destination: name.to_string(),
                reason: format!("{:#}", e),
            })
    }
}

/// A completed export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportHandle {
    pub scene_id: String,
    pub name: String,
    pub destination: String,
    /// Uncompressed band bytes
    pub bytes: u64,
}

/// Per-scene export settings.
pub struct Exporter {
    region: Region,
    target: Option<ResampleTarget>,
    prefix: String,
    sink: Arc<dyn SceneSink>,
}

impl Exporter {
    pub fn new(region: Region, target: Option<ResampleTarget>, prefix: impl Into<String>, sink: Arc<dyn SceneSink>) -> Self {
        Self {
            region,
            target,
            prefix: prefix.into(),
            sink,
        }
    }

    /// Artifact name for a scene acquired on `date`.
    pub fn name_for(&self, date: NaiveDate) -> String {
        export_name(&self.prefix, date)
    }

    /// Clip to the region, then resample when the grid differs from the target.
    pub fn prepare(&self, scene: &Scene) -> Result<Scene, ExportError> {
        let name = self.name_for(scene.date());
        let failed = |reason: String| ExportError {
            destination: name.clone(),
            reason,
        };

        let clipped = clip_to_region(scene, &self.region)
            .map_err(|e| failed(e.to_string()))?
            .ok_or_else(|| failed(format!("scene {} does not overlap the region", scene.id())))?;

        match &self.target {
            Some(target) => resample(&clipped, target).map_err(|e| failed(e.to_string())),
            None => Ok(clipped),
        }
    }

    /// Write a prepared scene.
    pub async fn write(&self, scene_id: &str, prepared: &Scene) -> Result<ExportHandle, ExportError> {
        let name = self.name_for(prepared.date());
        let destination = self.sink.write(&name, prepared).await?;

        let (rows, cols) = prepared.shape();
        let bytes = (rows * cols * prepared.band_names().count() * std::mem::size_of::<f32>()) as u64;

        tracing::debug!("Exported {} as {}", scene_id, destination);

        Ok(ExportHandle {
            scene_id: scene_id.to_string(),
            name,
            destination,
            bytes,
        })
    }

    /// Prepare and write on the calling task.
    pub async fn export(&self, scene: &Scene) -> Result<ExportHandle, ExportError> {
        let prepared = self.prepare(scene)?;
        self.write(scene.id(), &prepared).await
    }
}
