//! Result records for evaluation runs.
//!
//! Sweep and detection results are plain immutable values. Reports wrap them
//! with a name, the evaluated split and a timestamp, and can be written to
//! JSON or CSV for an external experiment store to pick up.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detection::DetectionSummary;
use crate::error::{Error, Result};
use crate::metrics::{ConfusionCounts, MetricSet};
use crate::stats::Summary;

/// Counts and metrics at one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    /// Probability threshold.
    pub threshold: f64,
    /// Confusion counts accumulated over the dataset.
    pub counts: ConfusionCounts,
    /// Metrics derived from `counts`.
    pub metrics: MetricSet,
}

impl ThresholdEntry {
    /// Create an entry, deriving the metrics from `counts`.
    #[must_use]
    pub fn new(threshold: f64, counts: ConfusionCounts) -> Self {
        Self {
            threshold,
            counts,
            metrics: counts.metrics(),
        }
    }
}

/// The selected threshold of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestThreshold {
    /// Position of the threshold in the sweep.
    pub index: usize,
    /// Threshold value.
    pub threshold: f64,
    /// IOU at this threshold.
    pub iou: f64,
    /// F-1 at this threshold.
    pub f1: f64,
    /// Spread of per-sample IOU at this threshold.
    pub per_sample_iou: Summary,
}

/// Full outcome of a threshold sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSweepResult {
    /// One entry per threshold, in sweep order.
    pub entries: Vec<ThresholdEntry>,
    /// Highest-IOU entry; earliest wins ties.
    pub best: BestThreshold,
}

impl ThresholdSweepResult {
    /// Assemble a result from entries and the per-sample counts behind them.
    ///
    /// `per_sample[i]` holds the per-sample counts of `entries[i]`.
    pub fn from_entries(entries: Vec<ThresholdEntry>, per_sample: &[Vec<ConfusionCounts>]) -> Result<Self> {
        let index = select_best(&entries)
            .ok_or_else(|| Error::Configuration("at least one threshold is required".into()))?;

        let ious: Vec<f64> = per_sample
            .get(index)
            .map(|counts| counts.iter().map(|c| c.metrics().iou).collect())
            .unwrap_or_default();
        let per_sample_iou = Summary::compute(&ious)
            .ok_or_else(|| Error::EmptyDataset("no per-sample counts for the best threshold".into()))?;

        let entry = &entries[index];
        let best = BestThreshold {
            index,
            threshold: entry.threshold,
            iou: entry.metrics.iou,
            f1: entry.metrics.f1,
            per_sample_iou,
        };
        Ok(Self { entries, best })
    }

    /// Thresholds in sweep order.
    #[must_use]
    pub fn thresholds(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.threshold).collect()
    }

    /// IOU at each threshold.
    #[must_use]
    pub fn ious(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.metrics.iou).collect()
    }

    /// F-1 at each threshold.
    #[must_use]
    pub fn f1s(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.metrics.f1).collect()
    }
}

/// Index of the highest-IOU entry, first occurrence on ties.
#[must_use]
pub fn select_best(entries: &[ThresholdEntry]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, entry) in entries.iter().enumerate() {
        match best {
            Some((_, iou)) if entry.metrics.iou <= iou => {}
            _ => best = Some((i, entry.metrics.iou)),
        }
    }
    best.map(|(i, _)| i)
}

/// Dataset split an evaluation was run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalSplit {
    /// Training examples.
    Train,
    /// Validation examples.
    Val,
}

impl std::fmt::Display for EvalSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Val => write!(f, "val"),
        }
    }
}

/// Segmentation sweep report for one model and split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationReport {
    /// Model or run identifier.
    pub name: String,

    /// Evaluated split.
    pub split: EvalSplit,

    /// Sweep outcome.
    pub sweep: ThresholdSweepResult,

    /// When this report was generated.
    #[serde(with = "chrono_serde")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SegmentationReport {
    /// Create a new segmentation report.
    #[must_use]
    pub fn new(name: impl Into<String>, split: EvalSplit, sweep: ThresholdSweepResult) -> Self {
        Self {
            name: name.into(),
            split,
            sweep,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Write `<name>-<split>-segmentation.json` into `dir`.
    ///
    /// Fails with [`Error::Configuration`] if `name` is empty or contains a
    /// path separator.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        write_json(self, dir, &self.name, &format!("{}-segmentation.json", self.split))
    }

    /// Write one CSV row per threshold.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record([
            "threshold",
            "tp",
            "fp",
            "tn",
            "fn",
            "accuracy",
            "precision",
            "recall",
            "specificity",
            "iou",
            "f1",
        ])?;

        for entry in &self.sweep.entries {
            let c = &entry.counts;
            let m = &entry.metrics;
            wtr.write_record([
                format!("{:.6}", entry.threshold),
                c.true_positive.to_string(),
                c.false_positive.to_string(),
                c.true_negative.to_string(),
                c.false_negative.to_string(),
                format!("{:.6}", m.accuracy),
                format!("{:.6}", m.precision),
                format!("{:.6}", m.recall),
                format!("{:.6}", m.specificity),
                format!("{:.6}", m.iou),
                format!("{:.6}", m.f1),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }
}

/// Detection report for one model and split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Model or run identifier.
    pub name: String,

    /// Evaluated split.
    pub split: EvalSplit,

    /// mAP summary.
    pub summary: DetectionSummary,

    /// When this report was generated.
    #[serde(with = "chrono_serde")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DetectionReport {
    /// Create a new detection report.
    #[must_use]
    pub fn new(name: impl Into<String>, split: EvalSplit, summary: DetectionSummary) -> Self {
        Self {
            name: name.into(),
            split,
            summary,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Write `<name>-<split>-detection.json` into `dir`.
    ///
    /// Fails with [`Error::Configuration`] if `name` is empty or contains a
    /// path separator.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        write_json(self, dir, &self.name, &format!("{}-detection.json", self.split))
    }

    /// Write one CSV row per acceptance IOU.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record([
            "iou", "tp", "fp", "fn", "accuracy", "precision", "recall", "ap", "f1",
        ])?;

        for level in &self.summary.per_iou {
            let c = &level.counts;
            let m = &level.metrics;
            wtr.write_record([
                format!("{:.2}", level.acceptance_iou),
                c.true_positive.to_string(),
                c.false_positive.to_string(),
                c.false_negative.to_string(),
                format!("{:.6}", m.accuracy),
                format!("{:.6}", m.precision),
                format!("{:.6}", m.recall),
                format!("{:.6}", level.average_precision),
                format!("{:.6}", m.f1),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }
}

/// Write `<name>-<suffix>` into `dir`; `name` must stay a single file name.
fn write_json<T: Serialize>(report: &T, dir: &Path, name: &str, suffix: &str) -> Result<PathBuf> {
    if name.is_empty() || name.chars().any(|c| c == '/' || c == '\\' || std::path::is_separator(c)) {
        return Err(Error::Configuration(format!(
            "report name {name:?} must be non-empty and free of path separators"
        )));
    }

    std::fs::create_dir_all(dir)?;

    let path = dir.join(format!("{name}-{suffix}"));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;

    Ok(path)
}

mod chrono_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        dt.to_rfc3339().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
