//! Matching predicted instances against labelled ground truth.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::{ArrayViewD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A ground-truth instance overlapping a predicted mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstanceMatch {
    /// Ground-truth label id (never 0).
    pub label: u32,
    /// Intersection over union with the predicted mask.
    pub iou: f64,
}

/// Find every ground-truth instance that intersects `predicted`.
///
/// `ground_truth` holds 0 for background and a positive id per instance. The
/// IOU of each instance is computed against its full extent in the volume.
/// Instances without overlap are not reported.
///
/// Returns matches sorted by decreasing IOU; equal IOUs keep ascending label
/// order.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the arrays differ in shape.
///
/// # Example
///
/// ```
/// use bl3d_eval::detection::match_instances;
/// use ndarray::arr1;
///
/// let labels = arr1(&[1u32, 1, 1, 1, 1, 0, 2, 2]).into_dyn();
/// let predicted = arr1(&[true, true, true, false, false, false, false, false]).into_dyn();
///
/// let matches = match_instances(labels.view(), predicted.view())?;
/// assert_eq!(matches.len(), 1);
/// assert_eq!(matches[0].label, 1);
/// assert!((matches[0].iou - 0.6).abs() < 1e-12);
/// # Ok::<(), bl3d_eval::Error>(())
/// ```
pub fn match_instances(ground_truth: ArrayViewD<'_, u32>, predicted: ArrayViewD<'_, bool>) -> Result<Vec<InstanceMatch>> {
    if ground_truth.shape() != predicted.shape() {
        return Err(Error::shape_mismatch("instance matching", ground_truth.shape(), predicted.shape()));
    }

    let mut overlap: BTreeMap<u32, usize> = BTreeMap::new();
    let mut predicted_size = 0usize;
    Zip::from(&ground_truth).and(&predicted).for_each(|&label, &p| {
        if p {
            predicted_size += 1;
            if label != 0 {
                *overlap.entry(label).or_default() += 1;
            }
        }
    });
    if overlap.is_empty() {
        return Ok(Vec::new());
    }

    let mut sizes: BTreeMap<u32, usize> = overlap.keys().map(|&label| (label, 0)).collect();
    for label in &ground_truth {
        if let Some(size) = sizes.get_mut(label) {
            *size += 1;
        }
    }

    let mut matches: Vec<InstanceMatch> = overlap
        .iter()
        .zip(sizes.values())
        .map(|((&label, &intersection), &size)| {
            let union = size + predicted_size - intersection;
            InstanceMatch {
                label,
                iou: intersection as f64 / union as f64,
            }
        })
        .collect();
    matches.sort_by(|a, b| b.iou.total_cmp(&a.iou));

    Ok(matches)
}

/// A predicted instance with its confidence and overlapping ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedInstance {
    /// Predicted label id.
    pub label: u32,
    /// Detection confidence used for ranking.
    pub confidence: f64,
    /// Overlapping ground-truth instances, as from [`match_instances`].
    pub candidates: Vec<InstanceMatch>,
}

/// All predictions of one image plus its ground-truth instance count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMatches {
    /// Number of ground-truth instances in the image.
    pub ground_truth_count: usize,
    /// Predicted instances, in any order.
    pub predictions: Vec<PredictedInstance>,
}

impl ImageMatches {
    /// Create an image with `ground_truth_count` instances and no predictions.
    #[must_use]
    pub fn new(ground_truth_count: usize) -> Self {
        Self {
            ground_truth_count,
            predictions: Vec::new(),
        }
    }

    /// Add a predicted instance.
    pub fn push(&mut self, label: u32, confidence: f64, candidates: Vec<InstanceMatch>) -> &mut Self {
        self.predictions.push(PredictedInstance {
            label,
            confidence,
            candidates,
        });
        self
    }

    /// Build an image from ground-truth and predicted label volumes.
    ///
    /// Every distinct non-zero label in `predicted` is one prediction and
    /// must have an entry in `confidences`.
    ///
    /// # Errors
    ///
    /// - [`Error::ShapeMismatch`] if the volumes differ in shape.
    /// - [`Error::Configuration`] if a predicted label has no confidence.
    pub fn from_label_volumes(
        ground_truth: ArrayViewD<'_, u32>,
        predicted: ArrayViewD<'_, u32>,
        confidences: &HashMap<u32, f64>,
    ) -> Result<Self> {
        if ground_truth.shape() != predicted.shape() {
            return Err(Error::shape_mismatch("instance matching", ground_truth.shape(), predicted.shape()));
        }

        let ground_truth_count = distinct_labels(ground_truth.view()).len();
        let mut image = Self::new(ground_truth_count);

        for label in distinct_labels(predicted.view()) {
            let confidence = confidences
                .get(&label)
                .copied()
                .ok_or_else(|| Error::Configuration(format!("no confidence for predicted instance {label}")))?;
            let mask = predicted.mapv(|l| l == label);
            let candidates = match_instances(ground_truth.view(), mask.view())?;
            image.push(label, confidence, candidates);
        }

        tracing::debug!(
            ground_truth = image.ground_truth_count,
            predictions = image.predictions.len(),
            "matched image instances",
        );
        Ok(image)
    }
}

fn distinct_labels(labels: ArrayViewD<'_, u32>) -> BTreeSet<u32> {
    labels.iter().copied().filter(|&l| l != 0).collect()
}
