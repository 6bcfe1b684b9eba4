//! Scene selection with retries and optional per-call timeouts.

use super::{Archive, SceneRef};
use crate::config::ProcessingConfig;
use crate::error::ArchiveError;
use crate::scene::{Region, Scene, TimeRange};
use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry and timeout settings for archive calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-call timeout; None waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            timeout: None,
        }
    }
}

impl From<&ProcessingConfig> for RetryPolicy {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            initial_backoff: Duration::from_millis(config.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry.max_backoff_ms),
            timeout: config.archive_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl RetryPolicy {
    /// No retries, no backoff.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            timeout: None,
        }
    }
}

/// Run an archive call, retrying retryable failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(what: &str, policy: &RetryPolicy, mut call: F) -> Result<T, ArchiveError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ArchiveError>>,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        let result = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, call()).await {
                Ok(r) => r,
                Err(_) => Err(ArchiveError::Timeout(limit.as_secs())),
            },
            None => call().await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    tracing::error!("{} failed after {} attempts: {}", what, attempt, e);
                    return Err(e);
                }

                tracing::warn!(
                    "{} attempt {} failed: {}, retrying in {}ms",
                    what,
                    attempt,
                    e,
                    backoff.as_millis()
                );

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}

/// Lazy, restartable selection of scenes from an archive.
///
/// Nothing is queried until [`SceneSequence::refs`] or
/// [`SceneSequence::stream`] is called; every call queries again.
#[derive(Clone)]
pub struct SceneSequence {
    archive: Arc<dyn Archive>,
    product: String,
    range: TimeRange,
    region: Region,
    policy: RetryPolicy,
}

/// Select scenes of `product` within `range` intersecting `region`.
pub fn filter(
    archive: Arc<dyn Archive>,
    product: impl Into<String>,
    range: TimeRange,
    region: Region,
    policy: RetryPolicy,
) -> SceneSequence {
    SceneSequence {
        archive,
        product: product.into(),
        range,
        region,
        policy,
    }
}

impl SceneSequence {
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn time_range(&self) -> &TimeRange {
        &self.range
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    /// Query the archive. An empty result is not an error.
    pub async fn refs(&self) -> Result<Vec<SceneRef>, ArchiveError> {
        let refs = with_retry("archive query", &self.policy, move || {
            self.archive.query(&self.product, &self.range, &self.region)
        })
        .await?;

        if refs.is_empty() {
            tracing::warn!(
                "No scenes of '{}' between {} and {} intersect the region",
                self.product,
                self.range.start(),
                self.range.end()
            );
        } else {
            tracing::info!("Archive query matched {} scenes", refs.len());
        }
        Ok(refs)
    }

    /// Load one referenced scene.
    pub async fn load(&self, scene: &SceneRef) -> Result<Scene, ArchiveError> {
        let what = format!("load {}", scene.id);
        with_retry(&what, &self.policy, move || self.archive.load(scene)).await
    }

    /// Query, then load scenes one at a time in archive order.
    pub async fn stream(
        &self,
    ) -> Result<impl Stream<Item = (SceneRef, Result<Scene, ArchiveError>)> + '_, ArchiveError> {
        let refs = self.refs().await?;
        Ok(stream::iter(refs).then(move |r| async move {
            let loaded = self.load(&r).await;
            (r, loaded)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchive;
    use crate::scene::GeoTransform;
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scene(day: u32) -> Scene {
        Scene::new(
            format!("2010_02_{:02}", day),
            Utc.with_ymd_and_hms(2010, 2, day, 0, 0, 0).unwrap(),
            "EPSG:4326",
            GeoTransform::north_up(80.5, 22.5, 0.25, 0.25),
            (2, 3),
        )
        .with_band("NDVI", Array2::zeros((2, 3)))
        .unwrap()
    }

    fn kanha() -> Region {
        Region::from_bounds([80.53, 22.05, 81.2, 22.45]).unwrap()
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("test", &fast_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ArchiveError::Unavailable("down".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry("test", &fast_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ArchiveError::Unavailable("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ArchiveError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry("test", &fast_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ArchiveError::Catalog("bad".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let policy = RetryPolicy {
            timeout: Some(Duration::from_millis(10)),
            ..fast_policy(0)
        };
        let result: Result<(), _> = with_retry("slow", &policy, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ArchiveError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_sequence_is_lazy_and_restartable() {
        let archive = Arc::new(InMemoryArchive::new("MOD09A1", vec![scene(1), scene(9), scene(17)]));
        let range = TimeRange::parse("2010-02-01", "2010-02-10").unwrap();
        let sequence = filter(archive.clone(), "MOD09A1", range, kanha(), fast_policy(0));

        assert_eq!(archive.query_count(), 0);

        let first: Vec<_> = sequence.refs().await.unwrap().into_iter().map(|r| r.id).collect();
        let second: Vec<_> = sequence.refs().await.unwrap().into_iter().map(|r| r.id).collect();

        assert_eq!(first, vec!["2010_02_01", "2010_02_09"]);
        assert_eq!(first, second);
        assert_eq!(archive.query_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_loads_in_order() {
        let archive = Arc::new(InMemoryArchive::new("MOD09A1", vec![scene(17), scene(1), scene(9)]));
        let range = TimeRange::parse("2010-02-01", "2010-03-01").unwrap();
        let sequence = filter(archive, "MOD09A1", range, kanha(), fast_policy(0));

        let items: Vec<_> = sequence.stream().await.unwrap().collect().await;
        let ids: Vec<_> = items.iter().map(|(_, s)| s.as_ref().unwrap().id().to_string()).collect();
        assert_eq!(ids, vec!["2010_02_01", "2010_02_09", "2010_02_17"]);
    }

    #[tokio::test]
    async fn test_no_matching_scenes_is_empty() {
        let archive = Arc::new(InMemoryArchive::new("MOD09A1", vec![scene(1)]));
        let range = TimeRange::parse("2012-01-01", "2013-01-01").unwrap();
        let sequence = filter(archive, "MOD09A1", range, kanha(), fast_policy(0));

        assert!(sequence.refs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_archive_after_retries() {
        let archive = Arc::new(InMemoryArchive::new("MOD09A1", vec![scene(1)]));
        archive.fail_queries(10);
        let range = TimeRange::parse("2010-01-01", "2011-01-01").unwrap();
        let sequence = filter(archive.clone(), "MOD09A1", range, kanha(), fast_policy(2));

        assert!(matches!(sequence.refs().await, Err(ArchiveError::Unavailable(_))));
        assert_eq!(archive.query_count(), 3);
    }
}
