//! Mean average precision over acceptance IOUs.
//!
//! For each acceptance IOU the predictions of every image are assigned
//! greedily in decreasing confidence order: a prediction claims the
//! highest-IOU ground-truth instance not yet claimed in its image, provided
//! that IOU exceeds the acceptance threshold. All predictions are then ranked
//! by confidence to build a precision/recall curve, and the average precision
//! is the mean, over evenly spaced recall levels, of the best precision
//! reached at or beyond each level.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::detection::matching::{ImageMatches, InstanceMatch};
use crate::error::{Error, Result};
use crate::metrics::{ConfusionCounts, MetricSet};
use crate::stats::{linspace, mean};

/// Slack when comparing a recall against a recall level.
const RECALL_TOLERANCE: f64 = 1e-12;

/// Slack when looking up a specific acceptance IOU in the grid.
const IOU_LOOKUP_TOLERANCE: f64 = 1e-9;

/// Settings for [`compute_map`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Acceptance IOUs to evaluate; COCO uses 0.50, 0.55, ..., 0.95.
    pub acceptance_ious: Vec<f64>,

    /// Number of evenly spaced recall levels in [0, 1].
    pub recall_levels: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            acceptance_ious: linspace(0.5, 0.95, 10),
            recall_levels: 11,
        }
    }
}

impl DetectionConfig {
    /// Evaluate a single acceptance IOU.
    #[must_use]
    pub fn single(acceptance_iou: f64) -> Self {
        Self {
            acceptance_ious: vec![acceptance_iou],
            ..Self::default()
        }
    }

    /// Check the acceptance grid and recall levels.
    pub fn validate(&self) -> Result<()> {
        if self.acceptance_ious.is_empty() {
            return Err(Error::Configuration("at least one acceptance IOU is required".into()));
        }
        if let Some(iou) = self.acceptance_ious.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(Error::Configuration(format!("acceptance IOU {iou} is outside [0, 1]")));
        }
        if self.recall_levels < 2 {
            return Err(Error::Configuration(format!(
                "at least two recall levels are required, got {}",
                self.recall_levels
            )));
        }
        Ok(())
    }
}

/// A prediction assigned to a ground-truth instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Index of the image in the evaluated slice.
    pub image: usize,
    /// Predicted label id.
    pub predicted_label: u32,
    /// Claimed ground-truth label id.
    pub ground_truth_label: u32,
    /// IOU between the two.
    pub iou: f64,
}

/// Results at one acceptance IOU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IouLevelMetrics {
    /// Acceptance IOU used.
    pub acceptance_iou: f64,
    /// Detection counts; true negatives are always 0.
    pub counts: ConfusionCounts,
    /// Metrics derived from `counts`.
    pub metrics: MetricSet,
    /// Interpolated average precision.
    pub average_precision: f64,
    /// One record per matched prediction.
    pub matches: Vec<MatchRecord>,
}

/// Detection metrics aggregated over acceptance IOUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    /// Mean average precision over all acceptance IOUs.
    pub map: f64,
    /// Mean F-1 over all acceptance IOUs.
    pub f1: f64,
    /// Average precision at IOU 0.5 (Pascal VOC), if evaluated.
    pub map_50: Option<f64>,
    /// Average precision at IOU 0.75, if evaluated.
    pub map_75: Option<f64>,
    /// F-1 at IOU 0.5, if evaluated.
    pub f1_50: Option<f64>,
    /// F-1 at IOU 0.75, if evaluated.
    pub f1_75: Option<f64>,
    /// Per acceptance IOU results, in grid order.
    pub per_iou: Vec<IouLevelMetrics>,
}

impl DetectionSummary {
    /// Results at a given acceptance IOU.
    #[must_use]
    pub fn at_iou(&self, acceptance_iou: f64) -> Option<&IouLevelMetrics> {
        self.per_iou
            .iter()
            .find(|level| (level.acceptance_iou - acceptance_iou).abs() < IOU_LOOKUP_TOLERANCE)
    }
}

/// Score predicted instances against ground truth over several acceptance IOUs.
///
/// # Errors
///
/// - [`Error::EmptyDataset`] if `images` is empty.
/// - [`Error::Configuration`] if `config` is invalid.
pub fn compute_map(images: &[ImageMatches], config: &DetectionConfig) -> Result<DetectionSummary> {
    config.validate()?;
    if images.is_empty() {
        return Err(Error::EmptyDataset("mAP needs at least one image".into()));
    }

    let recall_levels = linspace(0.0, 1.0, config.recall_levels);
    let per_iou: Vec<IouLevelMetrics> = config
        .acceptance_ious
        .iter()
        .map(|&acceptance_iou| evaluate_level(images, acceptance_iou, &recall_levels))
        .collect();

    let aps: Vec<f64> = per_iou.iter().map(|l| l.average_precision).collect();
    let f1s: Vec<f64> = per_iou.iter().map(|l| l.metrics.f1).collect();

    let lookup = |iou: f64| {
        per_iou
            .iter()
            .find(|l| (l.acceptance_iou - iou).abs() < IOU_LOOKUP_TOLERANCE)
    };
    let summary = DetectionSummary {
        map: mean(&aps),
        f1: mean(&f1s),
        map_50: lookup(0.5).map(|l| l.average_precision),
        map_75: lookup(0.75).map(|l| l.average_precision),
        f1_50: lookup(0.5).map(|l| l.metrics.f1),
        f1_75: lookup(0.75).map(|l| l.metrics.f1),
        per_iou,
    };

    tracing::info!(images = images.len(), map = summary.map, f1 = summary.f1, "detection metrics computed");
    Ok(summary)
}

fn evaluate_level(images: &[ImageMatches], acceptance_iou: f64, recall_levels: &[f64]) -> IouLevelMetrics {
    let total_ground_truth: usize = images.iter().map(|image| image.ground_truth_count).sum();

    let mut ranked: Vec<(f64, bool)> = Vec::new();
    let mut matches = Vec::new();

    for (image_index, image) in images.iter().enumerate() {
        let mut order: Vec<usize> = (0..image.predictions.len()).collect();
        order.sort_by(|&a, &b| {
            image.predictions[b]
                .confidence
                .total_cmp(&image.predictions[a].confidence)
        });

        let mut claimed: HashSet<u32> = HashSet::new();
        for idx in order {
            let prediction = &image.predictions[idx];
            let hit = best_unclaimed(&prediction.candidates, &claimed).filter(|c| c.iou > acceptance_iou);

            if let Some(candidate) = hit {
                claimed.insert(candidate.label);
                matches.push(MatchRecord {
                    image: image_index,
                    predicted_label: prediction.label,
                    ground_truth_label: candidate.label,
                    iou: candidate.iou,
                });
            }
            ranked.push((prediction.confidence, hit.is_some()));
        }
    }

    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    let hits: Vec<bool> = ranked.into_iter().map(|(_, hit)| hit).collect();
    let average_precision = average_precision(&hits, total_ground_truth, recall_levels);

    let tp = matches.len();
    let counts = ConfusionCounts::new(
        tp as f64,
        (hits.len() - tp) as f64,
        0.0,
        total_ground_truth.saturating_sub(tp) as f64,
    );

    tracing::debug!(acceptance_iou, tp, predictions = hits.len(), average_precision, "acceptance level evaluated");

    IouLevelMetrics {
        acceptance_iou,
        counts,
        metrics: counts.metrics(),
        average_precision,
        matches,
    }
}

/// Highest-IOU candidate not yet claimed; the first one wins ties.
fn best_unclaimed<'a>(candidates: &'a [InstanceMatch], claimed: &HashSet<u32>) -> Option<&'a InstanceMatch> {
    candidates
        .iter()
        .filter(|c| !claimed.contains(&c.label))
        .reduce(|best, c| if c.iou > best.iou { c } else { best })
}

/// Interpolated average precision of a ranked hit list.
///
/// `hits[k]` tells whether the k-th most confident prediction matched.
#[must_use]
pub fn average_precision(hits: &[bool], total_ground_truth: usize, recall_levels: &[f64]) -> f64 {
    if hits.is_empty() || recall_levels.is_empty() {
        return 0.0;
    }

    let mut recalls = Vec::with_capacity(hits.len());
    let mut precisions = Vec::with_capacity(hits.len());
    let mut tp = 0usize;
    for (k, &hit) in hits.iter().enumerate() {
        if hit {
            tp += 1;
        }
        precisions.push(tp as f64 / (k + 1) as f64);
        recalls.push(if total_ground_truth == 0 {
            0.0
        } else {
            tp as f64 / total_ground_truth as f64
        });
    }

    // Recall never decreases along the ranking, so "recall >= r" is a suffix.
    let mut suffix_max = precisions;
    for k in (0..suffix_max.len().saturating_sub(1)).rev() {
        suffix_max[k] = suffix_max[k].max(suffix_max[k + 1]);
    }

    let total: f64 = recall_levels
        .iter()
        .map(|&r| {
            let first = recalls.partition_point(|&rec| rec < r - RECALL_TOLERANCE);
            suffix_max.get(first).copied().unwrap_or(0.0)
        })
        .sum();
    total / recall_levels.len() as f64
}
