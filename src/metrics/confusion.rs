//! Confusion-matrix accumulation over boolean masks.
//!
//! Counts are stored as `f64` so that they feed straight into the
//! epsilon-smoothed formulas in [`MetricSet`](super::MetricSet) and so that
//! partial counts from different shards can be summed in any order.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use ndarray::{ArrayViewD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::MetricSet;

/// True/false positive/negative voxel counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// Predicted and true.
    pub true_positive: f64,
    /// Predicted but not true.
    pub false_positive: f64,
    /// Neither predicted nor true.
    pub true_negative: f64,
    /// True but not predicted.
    pub false_negative: f64,
}

impl ConfusionCounts {
    /// Create counts from the four raw values.
    #[must_use]
    pub fn new(true_positive: f64, false_positive: f64, true_negative: f64, false_negative: f64) -> Self {
        Self {
            true_positive,
            false_positive,
            true_negative,
            false_negative,
        }
    }

    /// Compare a predicted mask against the expected one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the masks differ in shape.
    pub fn from_masks(predicted: ArrayViewD<'_, bool>, truth: ArrayViewD<'_, bool>) -> Result<Self> {
        if predicted.shape() != truth.shape() {
            return Err(Error::shape_mismatch("confusion counts", truth.shape(), predicted.shape()));
        }

        let tally = Zip::from(&predicted)
            .and(&truth)
            .fold(Tally::default(), |tally, &p, &t| tally.record(p, t));
        Ok(tally.into())
    }

    /// Counts for the mask `probability > threshold` against `truth`.
    ///
    /// Equivalent to thresholding first and calling [`Self::from_masks`], but
    /// never allocates the intermediate mask.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the arrays differ in shape.
    pub fn from_scores(
        probabilities: ArrayViewD<'_, f32>,
        truth: ArrayViewD<'_, bool>,
        threshold: f64,
    ) -> Result<Self> {
        if probabilities.shape() != truth.shape() {
            return Err(Error::shape_mismatch("confusion counts", truth.shape(), probabilities.shape()));
        }

        let tally = Zip::from(&probabilities)
            .and(&truth)
            .fold(Tally::default(), |tally, &p, &t| tally.record(f64::from(p) > threshold, t));
        Ok(tally.into())
    }

    /// Total number of compared voxels.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    /// Derived metrics for these counts.
    #[must_use]
    pub fn metrics(&self) -> MetricSet {
        MetricSet::derive(self)
    }
}

impl Add for ConfusionCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            true_positive: self.true_positive + rhs.true_positive,
            false_positive: self.false_positive + rhs.false_positive,
            true_negative: self.true_negative + rhs.true_negative,
            false_negative: self.false_negative + rhs.false_negative,
        }
    }
}

impl AddAssign for ConfusionCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for ConfusionCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Integer tally used while walking a mask pair.
#[derive(Default)]
struct Tally {
    tp: u64,
    fp: u64,
    tn: u64,
    fn_: u64,
}

impl Tally {
    #[inline]
    fn record(mut self, predicted: bool, truth: bool) -> Self {
        match (predicted, truth) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, false) => self.tn += 1,
            (false, true) => self.fn_ += 1,
        }
        self
    }
}

impl From<Tally> for ConfusionCounts {
    fn from(t: Tally) -> Self {
        Self::new(t.tp as f64, t.fp as f64, t.tn as f64, t.fn_ as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn, arr1};

    #[test]
    fn test_from_masks_counts_each_quadrant() {
        let predicted = arr1(&[true, true, false, false, true]).into_dyn();
        let truth = arr1(&[true, false, false, true, true]).into_dyn();

        let counts = ConfusionCounts::from_masks(predicted.view(), truth.view()).unwrap();
        assert_eq!(counts, ConfusionCounts::new(2.0, 1.0, 1.0, 1.0));
        assert_eq!(counts.total(), 5.0);
    }

    #[test]
    fn test_from_masks_shape_mismatch() {
        let predicted = ArrayD::from_elem(IxDyn(&[2, 3]), true);
        let truth = ArrayD::from_elem(IxDyn(&[3, 2]), true);

        let err = ConfusionCounts::from_masks(predicted.view(), truth.view()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_from_scores_is_strictly_greater() {
        let probs = arr1(&[0.2f32, 0.5, 0.8]).into_dyn();
        let truth = arr1(&[false, true, true]).into_dyn();

        let counts = ConfusionCounts::from_scores(probs.view(), truth.view(), 0.5).unwrap();
        assert_eq!(counts, ConfusionCounts::new(1.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_from_scores_matches_thresholded_mask() {
        let probs = ArrayD::from_shape_fn(IxDyn(&[4, 5, 6]), |ix| ((ix[0] * 7 + ix[1] * 3 + ix[2]) % 10) as f32 / 10.0);
        let truth = ArrayD::from_shape_fn(IxDyn(&[4, 5, 6]), |ix| (ix[0] + ix[2]) % 3 == 0);
        let mask = probs.mapv(|p| f64::from(p) > 0.45);

        let direct = ConfusionCounts::from_scores(probs.view(), truth.view(), 0.45).unwrap();
        let via_mask = ConfusionCounts::from_masks(mask.view(), truth.view()).unwrap();
        assert_eq!(direct, via_mask);
    }

    #[test]
    fn test_sum_of_parts() {
        let parts = [
            ConfusionCounts::new(1.0, 2.0, 3.0, 4.0),
            ConfusionCounts::new(10.0, 0.0, 5.0, 1.0),
            ConfusionCounts::default(),
        ];
        let total: ConfusionCounts = parts.iter().copied().sum();
        assert_eq!(total, ConfusionCounts::new(11.0, 2.0, 8.0, 5.0));

        let mut running = ConfusionCounts::default();
        for p in parts {
            running += p;
        }
        assert_eq!(running, total);
    }
}
