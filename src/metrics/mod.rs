//! Voxelwise segmentation metrics.
//!
//! This module turns confusion counts into the metric set recorded for every
//! threshold of a sweep and every acceptance IOU of a detection evaluation:
//!
//! - **IOU**: `tp / (tp + fp + fn)`
//! - **F1**: harmonic mean of precision and recall
//! - **Accuracy**: `(tp + tn) / total`
//! - **Sensitivity / Recall**: `tp / (tp + fn)`
//! - **Specificity**: `tn / (fp + tn)`
//! - **Precision**: `tp / (tp + fp)`
//!
//! Every denominator carries [`EPSILON`], so empty counts give metrics near
//! zero instead of an error.

pub mod confusion;

pub use confusion::ConfusionCounts;

use serde::{Deserialize, Serialize};

/// Smoothing term added to every metric denominator.
pub const EPSILON: f64 = 1e-7;

/// Metrics derived from a [`ConfusionCounts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// Intersection over union of the positive class.
    pub iou: f64,
    /// F-1 score.
    pub f1: f64,
    /// Fraction of correctly classified voxels.
    pub accuracy: f64,
    /// True positive rate.
    pub sensitivity: f64,
    /// True negative rate.
    pub specificity: f64,
    /// Positive predictive value.
    pub precision: f64,
    /// Same as sensitivity.
    pub recall: f64,
}

impl MetricSet {
    /// Derive all metrics from confusion counts.
    ///
    /// # Example
    ///
    /// ```
    /// use bl3d_eval::metrics::{ConfusionCounts, MetricSet};
    ///
    /// let m = MetricSet::derive(&ConfusionCounts::new(8.0, 2.0, 85.0, 5.0));
    /// assert!((m.iou - 8.0 / 15.0).abs() < 1e-6);
    /// assert!((m.precision - 0.8).abs() < 1e-6);
    /// ```
    #[must_use]
    pub fn derive(counts: &ConfusionCounts) -> Self {
        let ConfusionCounts {
            true_positive: tp,
            false_positive: fp,
            true_negative: tn,
            false_negative: fn_,
        } = *counts;

        let accuracy = (tp + tn) / (tp + tn + fp + fn_ + EPSILON);
        let sensitivity = tp / (tp + fn_ + EPSILON);
        let specificity = tn / (fp + tn + EPSILON);
        let precision = tp / (tp + fp + EPSILON);
        let recall = sensitivity;
        let iou = tp / (tp + fp + fn_ + EPSILON);
        let f1 = (2.0 * precision * recall) / (precision + recall + EPSILON);

        Self {
            iou,
            f1,
            accuracy,
            sensitivity,
            specificity,
            precision,
            recall,
        }
    }
}

impl From<ConfusionCounts> for MetricSet {
    fn from(counts: ConfusionCounts) -> Self {
        Self::derive(&counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_known_values() {
        let m = MetricSet::derive(&ConfusionCounts::new(50.0, 10.0, 30.0, 10.0));
        assert!((m.accuracy - 0.8).abs() < 1e-6);
        assert!((m.precision - 50.0 / 60.0).abs() < 1e-6);
        assert!((m.recall - 50.0 / 60.0).abs() < 1e-6);
        assert!((m.specificity - 0.75).abs() < 1e-6);
        assert!((m.iou - 50.0 / 70.0).abs() < 1e-6);
        assert!((m.f1 - 50.0 / 60.0).abs() < 1e-6);
        assert_eq!(m.sensitivity, m.recall);
    }

    #[test]
    fn test_derive_all_zero_is_zero() {
        let m = MetricSet::derive(&ConfusionCounts::default());
        assert_eq!(m, MetricSet::default());
    }

    #[test]
    fn test_derive_perfect_is_near_one() {
        let m = ConfusionCounts::new(1000.0, 0.0, 1000.0, 0.0).metrics();
        assert!(m.iou < 1.0 && m.iou > 0.999_999);
        assert!(m.f1 > 0.999_999);
        assert!(m.accuracy > 0.999_999);
    }
}
