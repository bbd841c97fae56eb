//! Visual regression for vigil
//!
//! Stores three artifacts per id (approved baseline, latest capture, diff
//! image) and compares captures against the baseline with a perceptual
//! per-pixel threshold.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil_visual::{FsArtifactStore, VisualComparator};
//!
//! # async fn demo(screenshot: Vec<u8>) -> vigil_core::Result<()> {
//! let comparator = VisualComparator::new(Arc::new(FsArtifactStore::new(".vigil/visual")));
//!
//! let result = comparator.compare("checkout-flow", &screenshot).await?;
//! if !result.has_baseline {
//!     comparator.approve("checkout-flow").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod comparator;
pub mod diff;
pub mod store;

pub use comparator::{ComparisonResult, VisualComparator, DEFAULT_THRESHOLD};
pub use diff::{diff_images, PixelDiff};
pub use store::{
    ArtifactPaths, ArtifactStore, FsArtifactStore, MemoryArtifactStore, VisualReport, VisualStatus,
};
