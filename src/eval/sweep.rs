//! Threshold sweep over a segmentation dataset.
//!
//! [`ThresholdSweep`] runs chunked inference for every sample, turns the
//! positive-class probability into a mask at each candidate threshold,
//! accumulates confusion counts over the whole dataset and keeps the
//! threshold with the highest IOU.

use ndarray::ArrayD;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eval::report::{ThresholdEntry, ThresholdSweepResult};
use crate::inference::{ChunkConfig, ChunkedInference, Predictor, ScoreActivation, positive_probability};
use crate::metrics::ConfusionCounts;
use crate::stats::linspace;

/// One evaluation sample: an input volume and its expected mask.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Channel-first input volume (`[channels, spatial...]`).
    pub volume: ArrayD<f32>,

    /// Expected segmentation with the volume's spatial shape.
    pub truth: ArrayD<bool>,
}

impl Sample {
    /// Create a sample.
    #[must_use]
    pub fn new(volume: ArrayD<f32>, truth: ArrayD<bool>) -> Self {
        Self { volume, truth }
    }
}

/// Configuration for a threshold sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Candidate thresholds, in the order ties are resolved.
    pub thresholds: Vec<f64>,

    /// Chunked inference geometry.
    pub chunk: ChunkConfig,

    /// How predictor scores become probabilities.
    pub activation: ScoreActivation,

    /// Channel holding the positive class.
    pub positive_channel: usize,

    /// Run inference once per sample and reuse the probability map for every
    /// threshold. Disable to trade time for memory.
    pub cache_predictions: bool,

    /// Compute per-sample confusion counts on the rayon pool.
    ///
    /// Only applies to cached probability maps. Without caching every sample
    /// goes through the predictor again, which runs on the calling thread, so
    /// the sweep stays sequential.
    pub parallel: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            thresholds: linspace(0.0, 1.0, 33),
            chunk: ChunkConfig::default(),
            activation: ScoreActivation::default(),
            positive_channel: 1,
            cache_predictions: true,
            parallel: false,
        }
    }
}

impl SweepConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> SweepConfigBuilder {
        SweepConfigBuilder::default()
    }

    /// Check thresholds and channel selection.
    ///
    /// Chunk geometry is checked against each volume when inference runs.
    pub fn validate(&self) -> Result<()> {
        if self.thresholds.is_empty() {
            return Err(Error::Configuration("at least one threshold is required".into()));
        }
        if let Some(t) = self.thresholds.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(Error::Configuration(format!("threshold {t} is outside [0, 1]")));
        }
        if self.positive_channel >= self.chunk.output_channels {
            return Err(Error::Configuration(format!(
                "positive channel {} out of range for {} output channels",
                self.positive_channel, self.chunk.output_channels
            )));
        }
        Ok(())
    }
}

/// Builder for [`SweepConfig`].
#[derive(Debug, Default)]
pub struct SweepConfigBuilder {
    thresholds: Option<Vec<f64>>,
    chunk: Option<ChunkConfig>,
    activation: Option<ScoreActivation>,
    positive_channel: Option<usize>,
    cache_predictions: Option<bool>,
    parallel: Option<bool>,
}

impl SweepConfigBuilder {
    /// Set the candidate thresholds.
    #[must_use]
    pub fn thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Set the chunked inference geometry.
    #[must_use]
    pub fn chunk(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Set the score activation.
    #[must_use]
    pub fn activation(mut self, activation: ScoreActivation) -> Self {
        self.activation = Some(activation);
        self
    }

    /// Set the positive-class channel.
    #[must_use]
    pub fn positive_channel(mut self, channel: usize) -> Self {
        self.positive_channel = Some(channel);
        self
    }

    /// Enable or disable probability-map caching.
    #[must_use]
    pub fn cache_predictions(mut self, cache: bool) -> Self {
        self.cache_predictions = Some(cache);
        self
    }

    /// Enable or disable parallel confusion counting.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    /// Build the configuration, filling unset fields with defaults.
    #[must_use]
    pub fn build(self) -> SweepConfig {
        let defaults = SweepConfig::default();
        SweepConfig {
            thresholds: self.thresholds.unwrap_or(defaults.thresholds),
            chunk: self.chunk.unwrap_or(defaults.chunk),
            activation: self.activation.unwrap_or(defaults.activation),
            positive_channel: self.positive_channel.unwrap_or(defaults.positive_channel),
            cache_predictions: self.cache_predictions.unwrap_or(defaults.cache_predictions),
            parallel: self.parallel.unwrap_or(defaults.parallel),
        }
    }
}

/// Threshold sweep evaluator.
///
/// # Example
///
/// ```
/// use bl3d_eval::eval::{Sample, SweepConfig, ThresholdSweep};
/// use bl3d_eval::inference::{ChunkConfig, ScoreActivation};
/// use bl3d_eval::Result;
/// use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, concatenate};
///
/// // Predictor that echoes its single input channel as the positive class.
/// let predictor = |chunk: ArrayViewD<'_, f32>| -> Result<ArrayD<f32>> {
///     let background = chunk.mapv(|p| 1.0 - p);
///     Ok(concatenate(Axis(0), &[background.view(), chunk.view()]).expect("same shape"))
/// };
///
/// let volume = ArrayD::from_shape_fn(IxDyn(&[1, 8, 8]), |ix| if ix[1] < 4 { 0.9 } else { 0.1 });
/// let truth = ArrayD::from_shape_fn(IxDyn(&[8, 8]), |ix| ix[0] < 4);
///
/// let config = SweepConfig::builder()
///     .thresholds(vec![0.05, 0.5, 0.95])
///     .chunk(ChunkConfig::new(4, 1, 2))
///     .activation(ScoreActivation::Identity)
///     .build();
///
/// let result = ThresholdSweep::new(config).run(&predictor, &[Sample::new(volume, truth)])?;
/// assert_eq!(result.best.threshold, 0.5);
/// # Ok::<(), bl3d_eval::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ThresholdSweep {
    config: SweepConfig,
    engine: ChunkedInference,
}

impl ThresholdSweep {
    /// Create a sweep with the given configuration.
    #[must_use]
    pub fn new(config: SweepConfig) -> Self {
        let engine = ChunkedInference::new(config.chunk.clone());
        Self { config, engine }
    }

    /// The sweep configuration.
    #[must_use]
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Positive-class probability map for one sample.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the expected mask does not match
    /// the volume's spatial shape, plus any inference error.
    pub fn probability_map<P>(&self, predictor: &P, sample: &Sample) -> Result<ArrayD<f32>>
    where
        P: Predictor + ?Sized,
    {
        let spatial = sample.volume.shape().get(1..).unwrap_or_default();
        if spatial != sample.truth.shape() {
            return Err(Error::shape_mismatch("sample truth", spatial, sample.truth.shape()));
        }

        let scores = self.engine.infer(predictor, sample.volume.view())?;
        positive_probability(scores.view(), self.config.activation, self.config.positive_channel)
    }

    /// Evaluate every configured threshold over `dataset`.
    ///
    /// Thresholds are independent: each one sees the full dataset and
    /// produces an immutable entry. A failure on any sample aborts the sweep.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyDataset`] if `dataset` is empty.
    /// - [`Error::Configuration`] for invalid thresholds, channels or chunk
    ///   geometry.
    /// - [`Error::ShapeMismatch`] and predictor errors from inference.
    pub fn run<P>(&self, predictor: &P, dataset: &[Sample]) -> Result<ThresholdSweepResult>
    where
        P: Predictor + ?Sized,
    {
        self.config.validate()?;
        if dataset.is_empty() {
            return Err(Error::EmptyDataset("threshold sweep needs at least one sample".into()));
        }

        tracing::info!(
            samples = dataset.len(),
            thresholds = self.config.thresholds.len(),
            cached = self.config.cache_predictions,
            "starting threshold sweep",
        );

        let cached = if self.config.cache_predictions {
            let maps = dataset
                .iter()
                .enumerate()
                .map(|(i, sample)| {
                    tracing::debug!(sample = i, "computing probability map");
                    self.probability_map(predictor, sample)
                })
                .collect::<Result<Vec<_>>>()?;
            Some(maps)
        } else {
            None
        };

        if self.config.parallel && !self.config.cache_predictions {
            tracing::warn!("parallel counting needs cached predictions; running sequentially");
        }

        let mut entries = Vec::with_capacity(self.config.thresholds.len());
        let mut per_sample = Vec::with_capacity(self.config.thresholds.len());

        for &threshold in &self.config.thresholds {
            let counts = match &cached {
                Some(maps) => self.count_cached(maps, dataset, threshold)?,
                None => dataset
                    .iter()
                    .map(|sample| {
                        let probs = self.probability_map(predictor, sample)?;
                        ConfusionCounts::from_scores(probs.view(), sample.truth.view(), threshold)
                    })
                    .collect::<Result<Vec<_>>>()?,
            };

            let entry = ThresholdEntry::new(threshold, counts.iter().copied().sum());
            tracing::info!(threshold, iou = entry.metrics.iou, f1 = entry.metrics.f1, "threshold evaluated");

            entries.push(entry);
            per_sample.push(counts);
        }

        let result = ThresholdSweepResult::from_entries(entries, &per_sample)?;
        tracing::info!(
            best_threshold = result.best.threshold,
            best_iou = result.best.iou,
            best_f1 = result.best.f1,
            "threshold sweep finished",
        );
        Ok(result)
    }

    /// Per-sample counts at one threshold from cached probability maps.
    fn count_cached(&self, maps: &[ArrayD<f32>], dataset: &[Sample], threshold: f64) -> Result<Vec<ConfusionCounts>> {
        let count = |(probs, sample): (&ArrayD<f32>, &Sample)| {
            ConfusionCounts::from_scores(probs.view(), sample.truth.view(), threshold)
        };

        if self.config.parallel {
            maps.par_iter().zip(dataset.par_iter()).map(count).collect()
        } else {
            maps.iter().zip(dataset).map(count).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayViewD, Axis, IxDyn};
    use std::cell::Cell;

    /// Predictor emitting a constant positive-class probability.
    fn constant(p: f32) -> impl Fn(ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        move |chunk: ArrayViewD<'_, f32>| {
            let mut shape = chunk.shape().to_vec();
            shape[0] = 2;
            let mut out = ArrayD::zeros(IxDyn(&shape));
            out.index_axis_mut(Axis(0), 0).fill(1.0 - p);
            out.index_axis_mut(Axis(0), 1).fill(p);
            Ok(out)
        }
    }

    /// Predictor echoing its input as the positive class.
    fn echo(chunk: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        let mut shape = chunk.shape().to_vec();
        shape[0] = 2;
        let mut out = ArrayD::zeros(IxDyn(&shape));
        out.index_axis_mut(Axis(0), 1).assign(&chunk.index_axis(Axis(0), 0));
        Ok(out)
    }

    fn config(thresholds: Vec<f64>) -> SweepConfig {
        SweepConfig::builder()
            .thresholds(thresholds)
            .chunk(ChunkConfig::new(8, 2, 2))
            .activation(ScoreActivation::Identity)
            .build()
    }

    fn all_true_sample(shape: &[usize]) -> Sample {
        let mut vshape = vec![1];
        vshape.extend_from_slice(shape);
        Sample::new(ArrayD::zeros(IxDyn(&vshape)), ArrayD::from_elem(IxDyn(shape), true))
    }

    fn gradient_sample() -> Sample {
        // Probabilities 0.0, 0.1, ..., 0.9 along the first axis; truth is p >= 0.5.
        let volume = ArrayD::from_shape_fn(IxDyn(&[1, 10, 6]), |ix| ix[1] as f32 / 10.0);
        let truth = ArrayD::from_shape_fn(IxDyn(&[10, 6]), |ix| ix[0] >= 5);
        Sample::new(volume, truth)
    }

    #[test]
    fn test_config_defaults() {
        let config = SweepConfig::default();
        assert_eq!(config.thresholds.len(), 33);
        assert_eq!(config.positive_channel, 1);
        assert_eq!(config.activation, ScoreActivation::Softmax);
        assert!(config.cache_predictions);
        assert!(!config.parallel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: SweepConfig = serde_json::from_str(r#"{"thresholds": [0.25, 0.75], "parallel": true}"#).unwrap();
        assert_eq!(config.thresholds, vec![0.25, 0.75]);
        assert!(config.parallel);
        assert_eq!(config.chunk, ChunkConfig::default());
    }

    #[test]
    fn test_all_positive_prediction_picks_lowest_threshold() {
        let dataset = vec![all_true_sample(&[12, 12]), all_true_sample(&[5, 9])];
        let sweep = ThresholdSweep::new(config(linspace(0.0, 1.0, 33)));

        let result = sweep.run(&constant(1.0), &dataset).unwrap();

        assert_eq!(result.entries.len(), 33);
        for entry in &result.entries[..32] {
            assert!(entry.metrics.iou > 0.999_999, "threshold {}", entry.threshold);
        }
        assert_eq!(result.entries[32].metrics.iou, 0.0);
        assert_eq!(result.best.threshold, 0.0);
        assert_eq!(result.best.index, 0);
        assert!(result.best.iou > 0.999_999);
        assert_eq!(result.entries[0].counts.true_positive, (144 + 45) as f64);
    }

    #[test]
    fn test_gradient_best_threshold() {
        let sweep = ThresholdSweep::new(config(vec![0.15, 0.3, 0.45, 0.7]));
        let result = sweep.run(&echo, &[gradient_sample()]).unwrap();

        assert_eq!(result.best.threshold, 0.45);
        assert!(result.best.iou > 0.999_999);
        assert!(result.entries[0].metrics.iou < result.best.iou);
        assert_eq!(result.entries[0].counts.false_positive, 3.0 * 6.0);
    }

    #[test]
    fn test_empty_dataset() {
        let sweep = ThresholdSweep::new(config(vec![0.5]));
        assert!(matches!(sweep.run(&echo, &[]), Err(Error::EmptyDataset(_))));
    }

    #[test]
    fn test_invalid_thresholds() {
        let dataset = [gradient_sample()];
        for thresholds in [vec![], vec![0.5, 1.5], vec![f64::NAN]] {
            let sweep = ThresholdSweep::new(config(thresholds));
            assert!(matches!(sweep.run(&echo, &dataset), Err(Error::Configuration(_))));
        }
    }

    #[test]
    fn test_truth_shape_mismatch_aborts() {
        let mut bad = gradient_sample();
        bad.truth = ArrayD::from_elem(IxDyn(&[6, 10]), true);
        let sweep = ThresholdSweep::new(config(vec![0.5]));
        assert!(matches!(
            sweep.run(&echo, &[gradient_sample(), bad]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_cache_controls_inference_calls() {
        let calls = Cell::new(0usize);
        let counting = |chunk: ArrayViewD<'_, f32>| -> Result<ArrayD<f32>> {
            calls.set(calls.get() + 1);
            echo(chunk)
        };
        let dataset = [gradient_sample()];
        let tiles = ChunkedInference::new(ChunkConfig::new(8, 2, 2)).tile_count(&[10, 6]).unwrap();

        let cached = ThresholdSweep::new(config(vec![0.2, 0.4, 0.6]));
        let a = cached.run(&counting, &dataset).unwrap();
        assert_eq!(calls.get(), tiles);

        calls.set(0);
        let mut uncached_config = config(vec![0.2, 0.4, 0.6]);
        uncached_config.cache_predictions = false;
        let b = ThresholdSweep::new(uncached_config).run(&counting, &dataset).unwrap();
        assert_eq!(calls.get(), 3 * tiles);

        assert_eq!(a.entries, b.entries);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dataset: Vec<Sample> = (0..6).map(|_| gradient_sample()).collect();
        let sequential = ThresholdSweep::new(config(linspace(0.0, 1.0, 11))).run(&echo, &dataset).unwrap();

        let mut parallel_config = config(linspace(0.0, 1.0, 11));
        parallel_config.parallel = true;
        let parallel = ThresholdSweep::new(parallel_config).run(&echo, &dataset).unwrap();

        assert_eq!(sequential.entries, parallel.entries);
        assert_eq!(sequential.best, parallel.best);
    }

    #[test]
    fn test_parallel_without_cache_runs_sequentially() {
        let calls = Cell::new(0usize);
        let counting = |chunk: ArrayViewD<'_, f32>| -> Result<ArrayD<f32>> {
            calls.set(calls.get() + 1);
            echo(chunk)
        };
        let dataset: Vec<Sample> = (0..3).map(|_| gradient_sample()).collect();
        let sequential = ThresholdSweep::new(config(vec![0.2, 0.6])).run(&echo, &dataset).unwrap();

        let uncached = SweepConfig {
            cache_predictions: false,
            parallel: true,
            ..config(vec![0.2, 0.6])
        };
        let result = ThresholdSweep::new(uncached).run(&counting, &dataset).unwrap();

        let tiles = ChunkedInference::new(ChunkConfig::new(8, 2, 2)).tile_count(&[10, 6]).unwrap();
        assert_eq!(calls.get(), 2 * 3 * tiles);
        assert_eq!(result.entries, sequential.entries);
    }

    #[test]
    fn test_softmax_activation_on_logits() {
        // Logits (0, 10) everywhere give p ~ 1 for the positive class.
        let logits = |chunk: ArrayViewD<'_, f32>| -> Result<ArrayD<f32>> {
            let mut shape = chunk.shape().to_vec();
            shape[0] = 2;
            let mut out = ArrayD::zeros(IxDyn(&shape));
            out.index_axis_mut(Axis(0), 1).fill(10.0);
            Ok(out)
        };
        let sweep = ThresholdSweep::new(
            SweepConfig::builder()
                .thresholds(vec![0.5, 0.9])
                .chunk(ChunkConfig::new(8, 2, 2))
                .build(),
        );
        let result = sweep.run(&logits, &[all_true_sample(&[4, 4])]).unwrap();
        assert!(result.entries.iter().all(|e| e.metrics.iou > 0.999));
    }
}
