//! Baseline comparison and approval
//!
//! `compare` always records the new capture as `latest` before anything
//! else, so a failed diff still leaves something to review. Operations on
//! the same id are serialized; different ids proceed in parallel. A
//! per-id lock lives only while someone holds or waits on it.

use crate::diff::diff_images;
use crate::store::{validate_id, ArtifactPaths, ArtifactStore, VisualReport, VisualStatus};
use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use vigil_core::{ArtifactKind, Result, VigilError};

/// Default per-pixel colour threshold
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Result of one comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub id: String,
    pub has_baseline: bool,
    /// Share of differing pixels, 0-100. 100 on a dimension mismatch.
    pub diff_percentage: f64,
}

impl ComparisonResult {
    fn new(id: &str, has_baseline: bool, diff_percentage: f64) -> Self {
        Self {
            id: id.to_string(),
            has_baseline,
            diff_percentage,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.has_baseline && self.diff_percentage == 0.0
    }
}

/// Compares captures against approved baselines
pub struct VisualComparator {
    store: Arc<dyn ArtifactStore>,
    threshold: f64,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VisualComparator {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self::with_threshold(store, DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(store: Arc<dyn ArtifactStore>, threshold: f64) -> Self {
        Self {
            store,
            threshold: threshold.clamp(0.0, 1.0),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Drop our handle and forget the lock once no other caller holds it
    fn release(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(lock);
        if locks.get(id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn live_locks(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    /// Record `screenshot` as the latest capture for `id` and compare it
    /// with the approved baseline.
    ///
    /// Fails only on I/O or decode errors.
    pub async fn compare(&self, id: &str, screenshot: &[u8]) -> Result<ComparisonResult> {
        validate_id(id)?;
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.compare_locked(id, screenshot).await
        };
        self.release(id, lock);
        result
    }

    async fn compare_locked(&self, id: &str, screenshot: &[u8]) -> Result<ComparisonResult> {
        self.store.write(id, ArtifactKind::Latest, screenshot).await?;

        let Some(baseline) = self.store.read(id, ArtifactKind::Baseline).await? else {
            info!("No baseline for {}, latest capture awaits approval", id);
            self.store
                .write_report(&VisualReport::new(id, VisualStatus::New, 0.0))
                .await?;
            return Ok(ComparisonResult::new(id, false, 0.0));
        };

        let diff_percentage = if sha256_hex(&baseline) == sha256_hex(screenshot) {
            debug!("Capture for {} is byte-identical to its baseline", id);
            0.0
        } else {
            match self.pixel_compare(id, baseline, screenshot.to_vec()).await {
                Ok(percentage) => percentage,
                Err(e) => {
                    // the previous verdict no longer describes `latest`
                    self.store.delete(id, ArtifactKind::Diff).await?;
                    self.store
                        .write_report(&VisualReport::new(id, VisualStatus::Error, 0.0))
                        .await?;
                    return Err(e);
                }
            }
        };

        if diff_percentage == 0.0 {
            // an older diff no longer describes the latest capture
            self.store.delete(id, ArtifactKind::Diff).await?;
        }

        let status = if diff_percentage > 0.0 {
            VisualStatus::Changed
        } else {
            VisualStatus::Clean
        };
        self.store
            .write_report(&VisualReport::new(id, status, diff_percentage))
            .await?;

        info!("Visual comparison for {}: {:.2}% different", id, diff_percentage);
        Ok(ComparisonResult::new(id, true, diff_percentage))
    }

    /// Decode and diff off the async runtime; writes the diff image when
    /// anything differs
    async fn pixel_compare(&self, id: &str, baseline: Vec<u8>, current: Vec<u8>) -> Result<f64> {
        let threshold = self.threshold;
        let outcome = tokio::task::spawn_blocking(move || -> Result<Option<(f64, Vec<u8>)>> {
            let baseline = decode(&baseline, "baseline")?;
            let current = decode(&current, "latest")?;

            let Some(diff) = diff_images(&baseline, &current, threshold) else {
                return Ok(None);
            };
            let percentage = diff.percentage();
            let png = if diff.differing > 0 {
                encode_png(diff.image)?
            } else {
                Vec::new()
            };
            Ok(Some((percentage, png)))
        })
        .await
        .map_err(|e| VigilError::VisualComparison(format!("Diff task failed: {}", e)))??;

        match outcome {
            None => {
                info!("Capture for {} has different dimensions than its baseline", id);
                self.store.delete(id, ArtifactKind::Diff).await?;
                Ok(100.0)
            }
            Some((percentage, png)) => {
                if !png.is_empty() {
                    self.store.write(id, ArtifactKind::Diff, &png).await?;
                }
                Ok(percentage)
            }
        }
    }

    /// Promote the latest capture to baseline.
    ///
    /// Leaves the baseline untouched when there is no latest capture.
    pub async fn approve(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.approve_locked(id).await
        };
        self.release(id, lock);
        result
    }

    async fn approve_locked(&self, id: &str) -> Result<()> {
        let latest = self
            .store
            .read(id, ArtifactKind::Latest)
            .await?
            .ok_or_else(|| VigilError::NothingToApprove(id.to_string()))?;

        self.store.write(id, ArtifactKind::Baseline, &latest).await?;
        self.store.delete(id, ArtifactKind::Diff).await?;
        self.store.write_report(&VisualReport::clean(id)).await?;

        info!("Approved latest capture as baseline for {}", id);
        Ok(())
    }

    pub async fn has_baseline(&self, id: &str) -> Result<bool> {
        self.store.exists(id, ArtifactKind::Baseline).await
    }

    pub async fn report(&self, id: &str) -> Result<Option<VisualReport>> {
        self.store.read_report(id).await
    }

    pub async fn read(&self, id: &str, kind: ArtifactKind) -> Result<Option<Vec<u8>>> {
        self.store.read(id, kind).await
    }

    /// Filesystem paths for `id`, when the store has them
    pub fn locate(&self, id: &str) -> Option<ArtifactPaths> {
        self.store.locate(id)
    }

    /// Remove every artifact for `id`
    pub async fn purge(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.purge_locked(id).await
        };
        self.release(id, lock);
        result
    }

    async fn purge_locked(&self, id: &str) -> Result<()> {
        for kind in ArtifactKind::ALL {
            self.store.delete(id, kind).await?;
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn decode(bytes: &[u8], label: &str) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| VigilError::Image(format!("Failed to decode {} image: {}", label, e)))
}

fn encode_png(img: RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .map_err(|e| VigilError::Image(format!("Failed to encode diff image: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FsArtifactStore, MemoryArtifactStore};
    use image::Rgba;
    use tempfile::TempDir;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        encode_png(RgbaImage::from_pixel(width, height, Rgba(color))).unwrap()
    }

    fn comparator() -> VisualComparator {
        VisualComparator::new(Arc::new(MemoryArtifactStore::new()))
    }

    #[tokio::test]
    async fn test_first_comparison_has_no_baseline() {
        let comparator = comparator();
        let shot = png(4, 4, [10, 20, 30, 255]);

        let result = comparator.compare("s1", &shot).await.unwrap();
        assert!(!result.has_baseline);
        assert_eq!(result.diff_percentage, 0.0);

        assert_eq!(comparator.read("s1", ArtifactKind::Latest).await.unwrap(), Some(shot));
        assert!(!comparator.has_baseline("s1").await.unwrap());
        assert!(comparator.read("s1", ArtifactKind::Diff).await.unwrap().is_none());
        assert_eq!(
            comparator.report("s1").await.unwrap().unwrap().status,
            VisualStatus::New
        );
    }

    #[tokio::test]
    async fn test_approve_then_compare_identical() {
        let comparator = comparator();
        let shot = png(4, 4, [10, 20, 30, 255]);

        comparator.compare("s1", &shot).await.unwrap();
        comparator.approve("s1").await.unwrap();

        let result = comparator.compare("s1", &shot).await.unwrap();
        assert!(result.is_clean());
        assert!(comparator.read("s1", ArtifactKind::Diff).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fully_different_capture() {
        let comparator = comparator();
        comparator.compare("s1", &png(8, 8, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("s1").await.unwrap();

        let result = comparator
            .compare("s1", &png(8, 8, [255, 255, 255, 255]))
            .await
            .unwrap();
        assert!(result.has_baseline);
        assert!((result.diff_percentage - 100.0).abs() < 1e-9);

        let diff = comparator.read("s1", ArtifactKind::Diff).await.unwrap().unwrap();
        let decoded = image::load_from_memory(&diff).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));

        let report = comparator.report("s1").await.unwrap().unwrap();
        assert_eq!(report.status, VisualStatus::Changed);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_total() {
        let comparator = comparator();
        comparator.compare("s1", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("s1").await.unwrap();

        let result = comparator.compare("s1", &png(5, 4, [0, 0, 0, 255])).await.unwrap();
        assert_eq!(result.diff_percentage, 100.0);
        assert!(comparator.read("s1", ArtifactKind::Diff).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_pixels_different_bytes() {
        let comparator = comparator();
        let shot = png(4, 4, [50, 50, 50, 255]);
        comparator.compare("s1", &shot).await.unwrap();
        comparator.approve("s1").await.unwrap();

        // identical pixels re-encoded as RGB rather than RGBA
        let mut rgb = Vec::new();
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 4, image::Rgb([50, 50, 50])))
            .write_to(&mut Cursor::new(&mut rgb), ImageOutputFormat::Png)
            .unwrap();
        assert_ne!(rgb, shot);

        let result = comparator.compare("s1", &rgb).await.unwrap();
        assert!(result.is_clean());
    }

    #[tokio::test]
    async fn test_clean_compare_removes_stale_diff() {
        let comparator = comparator();
        let base = png(4, 4, [0, 0, 0, 255]);
        comparator.compare("s1", &base).await.unwrap();
        comparator.approve("s1").await.unwrap();

        comparator.compare("s1", &png(4, 4, [255, 255, 255, 255])).await.unwrap();
        assert!(comparator.read("s1", ArtifactKind::Diff).await.unwrap().is_some());

        comparator.compare("s1", &base).await.unwrap();
        assert!(comparator.read("s1", ArtifactKind::Diff).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_approve_without_latest() {
        let comparator = comparator();
        let err = comparator.approve("missing").await.unwrap_err();
        assert!(matches!(err, VigilError::NothingToApprove(_)));
        assert!(!comparator.has_baseline("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_approve_resets_report_and_diff() {
        let comparator = comparator();
        comparator.compare("s1", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("s1").await.unwrap();
        comparator.compare("s1", &png(4, 4, [255, 255, 255, 255])).await.unwrap();

        comparator.approve("s1").await.unwrap();
        assert!(comparator.read("s1", ArtifactKind::Diff).await.unwrap().is_none());

        let report = comparator.report("s1").await.unwrap().unwrap();
        assert_eq!(report.status, VisualStatus::Clean);
        assert_eq!(report.diff_percentage, 0.0);
    }

    #[tokio::test]
    async fn test_undecodable_capture_is_an_error() {
        let comparator = comparator();
        comparator.compare("s1", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("s1").await.unwrap();

        let err = comparator.compare("s1", b"not a png").await.unwrap_err();
        assert!(matches!(err, VigilError::Image(_)));
        // still recorded for review
        assert_eq!(
            comparator.read("s1", ArtifactKind::Latest).await.unwrap().as_deref(),
            Some(&b"not a png"[..])
        );
    }

    #[tokio::test]
    async fn test_undecodable_capture_replaces_previous_verdict() {
        let comparator = comparator();
        comparator.compare("s1", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("s1").await.unwrap();
        comparator.compare("s1", &png(4, 4, [255, 255, 255, 255])).await.unwrap();
        assert_eq!(
            comparator.report("s1").await.unwrap().unwrap().status,
            VisualStatus::Changed
        );

        comparator.compare("s1", b"truncated").await.unwrap_err();

        let report = comparator.report("s1").await.unwrap().unwrap();
        assert_eq!(report.status, VisualStatus::Error);
        assert!(comparator.read("s1", ArtifactKind::Diff).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_keeps_baseline_bytes() {
        let comparator = comparator();
        let shot = png(6, 3, [12, 34, 56, 255]);

        comparator.compare("s1", &shot).await.unwrap();
        comparator.approve("s1").await.unwrap();
        assert_eq!(
            comparator.read("s1", ArtifactKind::Baseline).await.unwrap().as_deref(),
            Some(&shot[..])
        );

        let result = comparator.compare("s1", &shot).await.unwrap();
        assert!(result.has_baseline);
        assert_eq!(result.diff_percentage, 0.0);

        comparator.approve("s1").await.unwrap();
        assert_eq!(
            comparator.read("s1", ArtifactKind::Baseline).await.unwrap().as_deref(),
            Some(&shot[..])
        );
    }

    #[tokio::test]
    async fn test_locks_released_after_use() {
        let comparator = Arc::new(comparator());
        comparator.compare("s1", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("s1").await.unwrap();
        comparator.compare("s2", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.compare("s1", b"broken").await.unwrap_err();
        comparator.approve("missing").await.unwrap_err();
        comparator.purge("s2").await.unwrap();
        assert_eq!(comparator.live_locks(), 0);

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let comparator = Arc::clone(&comparator);
            let id = format!("id-{}", i % 4);
            handles.push(tokio::spawn(async move {
                comparator.compare(&id, &png(2, 2, [i, 0, 0, 255])).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(comparator.live_locks(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_compares_on_same_id() {
        let comparator = Arc::new(comparator());
        comparator.compare("s1", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("s1").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let comparator = Arc::clone(&comparator);
            handles.push(tokio::spawn(async move {
                let shot = png(4, 4, [i * 30, 0, 0, 255]);
                comparator.compare("s1", &shot).await.unwrap()
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(result.has_baseline);
        }

        // the report matches whatever capture landed last
        let latest = comparator.read("s1", ArtifactKind::Latest).await.unwrap().unwrap();
        let report = comparator.report("s1").await.unwrap().unwrap();
        let recheck = diff_images(
            &decode(&png(4, 4, [0, 0, 0, 255]), "baseline").unwrap(),
            &decode(&latest, "latest").unwrap(),
            DEFAULT_THRESHOLD,
        )
        .unwrap();
        assert_eq!(report.diff_percentage, recheck.percentage());
    }

    #[tokio::test]
    async fn test_filesystem_store_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let comparator = VisualComparator::new(Arc::new(FsArtifactStore::new(temp_dir.path())));

        comparator.compare("login", &png(4, 4, [0, 0, 0, 255])).await.unwrap();
        comparator.approve("login").await.unwrap();
        comparator.compare("login", &png(4, 4, [255, 255, 255, 255])).await.unwrap();

        let paths = comparator.locate("login").unwrap();
        assert!(paths.baseline.exists());
        assert!(paths.latest.exists());
        assert!(paths.diff.exists());

        comparator.purge("login").await.unwrap();
        assert!(!paths.baseline.exists());
    }

    #[tokio::test]
    async fn test_invalid_id() {
        let comparator = comparator();
        assert!(comparator.compare("../x", b"bytes").await.is_err());
    }
}
