//! # bl3d-eval
//!
//! Chunked volume inference and multi-threshold evaluation for 3D
//! segmentation and instance detection.
//!
//! Models are plugged in through the [`Predictor`] trait. The library tiles
//! volumes that are too large for a single forward pass, stitches the halo-free
//! centres of every chunk back together, and scores the result against ground
//! truth over a grid of probability thresholds or acceptance IOUs.
//!
//! ## Quick Start
//!
//! ```rust
//! use bl3d_eval::{ChunkConfig, Sample, ScoreActivation, SweepConfig, ThresholdSweep};
//! use ndarray::{ArrayD, ArrayViewD, IxDyn};
//!
//! let config = SweepConfig::builder()
//!     .thresholds(vec![0.25, 0.5, 0.75])
//!     .chunk(ChunkConfig::new(8, 2, 1))
//!     .activation(ScoreActivation::Identity)
//!     .positive_channel(0)
//!     .build();
//!
//! let volume = ArrayD::from_elem(IxDyn(&[1, 12, 12, 12]), 0.6f32);
//! let truth = ArrayD::from_elem(IxDyn(&[12, 12, 12]), true);
//! let samples = vec![Sample::new(volume, truth)];
//!
//! let model = |chunk: ArrayViewD<'_, f32>| -> bl3d_eval::Result<ArrayD<f32>> { Ok(chunk.to_owned()) };
//! let result = ThresholdSweep::new(config).run(&model, &samples)?;
//!
//! assert_eq!(result.best.threshold, 0.25);
//! # Ok::<(), bl3d_eval::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`error`]: Error types for the library
//! - [`metrics`]: Confusion counts and derived metrics
//! - [`inference`]: Halo-overlapped chunked inference
//! - [`eval`]: Threshold sweep and report generation
//! - [`detection`]: Instance matching and mean average precision
//! - [`stats`]: Summary statistics and grids

pub mod detection;
pub mod error;
pub mod eval;
pub mod inference;
pub mod metrics;
pub mod stats;

// Re-export commonly used types
pub use detection::{DetectionConfig, DetectionSummary, ImageMatches, InstanceMatch, compute_map, match_instances};
pub use error::{Error, Result};
pub use eval::{
    report::{DetectionReport, EvalSplit, SegmentationReport, ThresholdEntry, ThresholdSweepResult},
    sweep::{Sample, SweepConfig, ThresholdSweep},
};
pub use inference::{ChunkConfig, ChunkedInference, Extent, Predictor, ScoreActivation};
pub use metrics::{ConfusionCounts, MetricSet};
pub use stats::Summary;
