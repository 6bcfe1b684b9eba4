use super::{matches, Archive, SceneRef};
use crate::crs::{self, ProjCache};
use crate::error::ArchiveError;
use crate::scene::{Region, Scene, TimeRange};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Archive over scenes held in memory.
///
/// Supports injected failures and per-scene load delays for exercising
/// retry and ordering behaviour.
pub struct InMemoryArchive {
    product: String,
    scenes: Vec<Scene>,
    queries: AtomicUsize,
    loads: AtomicUsize,
    failing_queries: AtomicUsize,
    failing_loads: Mutex<HashMap<String, usize>>,
    load_delays: HashMap<String, Duration>,
}

impl InMemoryArchive {
    pub fn new(product: impl Into<String>, scenes: Vec<Scene>) -> Self {
        Self {
            product: product.into(),
            scenes,
            queries: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            failing_queries: AtomicUsize::new(0),
            failing_loads: Mutex::new(HashMap::new()),
            load_delays: HashMap::new(),
        }
    }

    /// Delay loading `scene_id` by `delay`.
    pub fn with_load_delay(mut self, scene_id: impl Into<String>, delay: Duration) -> Self {
        self.load_delays.insert(scene_id.into(), delay);
        self
    }

    /// Fail the next `n` queries with `Unavailable`.
    pub fn fail_queries(&self, n: usize) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` loads of `scene_id` with `Unavailable`.
    pub fn fail_loads(&self, scene_id: impl Into<String>, n: usize) {
        let mut failing = self.failing_loads.lock().unwrap_or_else(|e| e.into_inner());
        failing.insert(scene_id.into(), n);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn scene_ref(&self, scene: &Scene, cache: &ProjCache) -> Option<SceneRef> {
        let bounds = match crs::transform_bounds(&scene.bounds(), scene.crs(), crs::codes::WGS84, cache, 8) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Skipping {}: footprint not transformable: {:#}", scene.id(), e);
                return None;
            }
        };
        Some(SceneRef {
            id: scene.id().to_string(),
            product: self.product.clone(),
            acquired: scene.acquired(),
            bounds_wgs84: bounds,
            location: scene.id().to_string(),
        })
    }
}

#[async_trait]
impl Archive for InMemoryArchive {
    async fn query(&self, product: &str, range: &TimeRange, region: &Region) -> Result<Vec<SceneRef>, ArchiveError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_queries.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_queries.store(failing - 1, Ordering::SeqCst);
            return Err(ArchiveError::Unavailable("injected query failure".to_string()));
        }

        let cache = ProjCache::new();
        let mut refs: Vec<SceneRef> = self
            .scenes
            .iter()
            .filter_map(|s| self.scene_ref(s, &cache))
            .filter(|r| matches(r, product, range, region))
            .collect();
        refs.sort_by_key(|r| r.acquired);
        Ok(refs)
    }

    async fn load(&self, scene: &SceneRef) -> Result<Scene, ArchiveError> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        {
            let mut failing = self.failing_loads.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(n) = failing.get_mut(&scene.id) {
                if *n > 0 {
                    *n -= 1;
                    return Err(ArchiveError::Unavailable(format!("injected load failure for {}", scene.id)));
                }
            }
        }

        if let Some(delay) = self.load_delays.get(&scene.id) {
            tokio::time::sleep(*delay).await;
        }

        self.scenes
            .iter()
            .find(|s| s.id() == scene.location)
            .cloned()
            .ok_or_else(|| ArchiveError::Load {
                scene_id: scene.id.clone(),
                reason: "not in archive".to_string(),
            })
    }
}
