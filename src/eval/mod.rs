//! Segmentation evaluation and reports.
//!
//! - [`sweep::ThresholdSweep`]: threshold search over a dataset
//! - [`sweep::SweepConfig`]: configuration for a sweep
//! - [`report`]: result records and JSON/CSV export

pub mod report;
pub mod sweep;

pub use report::{
    BestThreshold, DetectionReport, EvalSplit, SegmentationReport, ThresholdEntry, ThresholdSweepResult,
};
pub use sweep::{Sample, SweepConfig, SweepConfigBuilder, ThresholdSweep};
