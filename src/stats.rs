//! Small statistics helpers shared by the sweep and detection scorers.
//!
//! - [`Summary`]: descriptive statistics of per-sample metrics
//! - [`mean`]: arithmetic mean, zero for an empty slice
//! - [`linspace`]: evenly spaced grids (threshold and recall levels)

use serde::{Deserialize, Serialize};

/// Descriptive statistics for a set of measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of values.
    pub count: usize,
    /// Mean value.
    pub mean: f64,
    /// Median value.
    pub median: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
}

impl Summary {
    /// Compute summary statistics for a slice of values.
    ///
    /// Returns `None` if the slice is empty.
    #[must_use]
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = mean(&sorted);
        let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64;

        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(Self {
            count,
            mean,
            median,
            std_dev: variance.sqrt(),
            min: sorted[0],
            max: sorted[count - 1],
        })
    }
}

/// Compute arithmetic mean.
///
/// # Example
///
/// ```
/// use bl3d_eval::stats::mean;
///
/// assert!((mean(&[1.0, 2.0, 3.0, 4.0, 5.0]) - 3.0).abs() < 0.001);
/// assert_eq!(mean(&[]), 0.0);
/// ```
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `num` evenly spaced values from `start` to `stop`, both included.
///
/// # Example
///
/// ```
/// use bl3d_eval::stats::linspace;
///
/// assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
/// assert_eq!(linspace(0.0, 1.0, 33).len(), 33);
/// ```
#[must_use]
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let span = stop - start;
            let last = (num - 1) as f64;
            (0..num).map(|i| start + span * i as f64 / last).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_compute() {
        let summary = Summary::compute(&[4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();

        assert_eq!(summary.count, 5);
        assert!((summary.mean - 3.0).abs() < 0.001);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert!((summary.std_dev - 2.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_summary_even_count_and_empty() {
        let summary = Summary::compute(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(summary.median, 2.5);
        assert!(Summary::compute(&[]).is_none());
    }

    #[test]
    fn test_linspace_endpoints() {
        let grid = linspace(0.0, 1.0, 33);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[32], 1.0);
        assert!((grid[16] - 0.5).abs() < 1e-12);
        assert!(grid.windows(2).all(|w| w[0] < w[1]));

        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(0.3, 1.0, 1), vec![0.3]);
    }

    #[test]
    fn test_linspace_recall_levels() {
        let levels = linspace(0.0, 1.0, 11);
        assert_eq!(levels[1], 0.1);
        assert_eq!(levels[3], 0.3);
        assert_eq!(levels[10], 1.0);
    }
}
