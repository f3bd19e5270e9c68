//! Chunked inference over volumes larger than the predictor's working size.
//!
//! External crates supply the network forward pass as a [`Predictor`]; this
//! module cuts the input into overlapping chunks, runs the predictor on each
//! one and stitches the halo-trimmed outputs back into a full-size volume.
//!
//! Volumes are channel-first: `[channels, d1, ..., dn]`. Every axis after the
//! first is spatial.
//!
//! ```
//! use bl3d_eval::inference::{ChunkConfig, ChunkedInference};
//! use bl3d_eval::Result;
//! use ndarray::{ArrayD, ArrayViewD, IxDyn};
//!
//! let volume = ArrayD::<f32>::from_shape_fn(IxDyn(&[1, 40, 40, 40]), |ix| ix[1] as f32);
//! let engine = ChunkedInference::new(ChunkConfig::new(16, 4, 1));
//! let identity = |chunk: ArrayViewD<'_, f32>| -> Result<ArrayD<f32>> { Ok(chunk.to_owned()) };
//!
//! let output = engine.infer(&identity, volume.view())?;
//! assert_eq!(output, volume);
//! # Ok::<(), bl3d_eval::Error>(())
//! ```

pub mod tiling;

pub use tiling::{AxisTile, TilePlan};

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A black-box network forward pass.
///
/// Takes a `[in_channels, spatial...]` chunk and returns
/// `[output_channels, spatial...]` class scores with the same spatial shape.
/// Implementations may hold internal state but must behave the same for every
/// chunk of one run (for example, a network with batch-norm should be in
/// evaluation mode).
pub trait Predictor {
    /// Score one chunk.
    fn predict(&self, chunk: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>>;
}

impl<F> Predictor for F
where
    F: Fn(ArrayViewD<'_, f32>) -> Result<ArrayD<f32>>,
{
    fn predict(&self, chunk: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        self(chunk)
    }
}

/// A size given once for every spatial axis or separately per axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extent {
    /// Same size along every spatial axis.
    Uniform(usize),
    /// One size per spatial axis.
    PerAxis(Vec<usize>),
}

impl Extent {
    /// Expand to one value per spatial axis.
    fn per_axis(&self, spatial_dims: usize, name: &str) -> Result<Vec<usize>> {
        match self {
            Self::Uniform(v) => Ok(vec![*v; spatial_dims]),
            Self::PerAxis(v) if v.len() == spatial_dims => Ok(v.clone()),
            Self::PerAxis(v) => Err(Error::Configuration(format!(
                "{name} should be a single integer or have one entry per spatial axis \
                 ({spatial_dims}), got {}",
                v.len()
            ))),
        }
    }
}

impl From<usize> for Extent {
    fn from(v: usize) -> Self {
        Self::Uniform(v)
    }
}

impl From<Vec<usize>> for Extent {
    fn from(v: Vec<usize>) -> Self {
        Self::PerAxis(v)
    }
}

impl<const N: usize> From<[usize; N]> for Extent {
    fn from(v: [usize; N]) -> Self {
        Self::PerAxis(v.to_vec())
    }
}

/// Geometry of chunked inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Largest chunk handed to the predictor, per spatial axis.
    pub max_chunk_size: Extent,

    /// Border discarded from interior chunks to avoid convolution padding
    /// effects. Better to overestimate.
    pub halo: Extent,

    /// Number of channels the predictor produces.
    pub output_channels: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: Extent::Uniform(256),
            halo: Extent::Uniform(32),
            output_channels: 2,
        }
    }
}

impl ChunkConfig {
    /// Create a chunk configuration.
    #[must_use]
    pub fn new(max_chunk_size: impl Into<Extent>, halo: impl Into<Extent>, output_channels: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.into(),
            halo: halo.into(),
            output_channels,
        }
    }

    /// Resolve per-axis chunk and halo sizes, checking the geometry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the sizes do not match the number
    /// of spatial axes, a halo is not smaller than half its chunk, or no
    /// output channels are requested.
    pub fn resolve(&self, spatial_dims: usize) -> Result<(Vec<usize>, Vec<usize>)> {
        if self.output_channels == 0 {
            return Err(Error::Configuration("output_channels must be positive".into()));
        }

        let chunk = self.max_chunk_size.per_axis(spatial_dims, "max_chunk_size")?;
        let halo = self.halo.per_axis(spatial_dims, "halo")?;

        if chunk.contains(&0) {
            return Err(Error::Configuration("max_chunk_size must be positive".into()));
        }
        if chunk.iter().zip(&halo).any(|(&c, &h)| h >= c.div_ceil(2)) {
            return Err(Error::Configuration(format!(
                "halo must be smaller than half the chunk size (halo {halo:?}, chunk {chunk:?})"
            )));
        }

        Ok((chunk, halo))
    }
}

/// How predictor scores become positive-class probabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreActivation {
    /// Softmax across the channel axis (predictor emits logits).
    #[default]
    Softmax,
    /// Scores already are probabilities.
    Identity,
}

/// Extract the probability map of one class from `[channels, spatial...]` scores.
///
/// # Errors
///
/// - [`Error::Configuration`] if `channel` is out of range.
/// - [`Error::Predictor`] if any score is NaN or infinite.
pub fn positive_probability(
    scores: ArrayViewD<'_, f32>,
    activation: ScoreActivation,
    channel: usize,
) -> Result<ArrayD<f32>> {
    let channels = scores.shape().first().copied().unwrap_or(0);
    if channel >= channels {
        return Err(Error::Configuration(format!(
            "positive channel {channel} out of range for {channels} output channels"
        )));
    }
    if let Some(v) = scores.iter().find(|v| !v.is_finite()) {
        return Err(Error::Predictor(format!("predictor returned a non-finite score ({v})")));
    }

    let probs = match activation {
        ScoreActivation::Identity => scores.index_axis(Axis(0), channel).to_owned(),
        ScoreActivation::Softmax => scores.map_axis(Axis(0), |lane| {
            let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let denom: f32 = lane.iter().map(|&v| (v - max).exp()).sum();
            (lane[channel] - max).exp() / denom
        }),
    };
    Ok(probs)
}

/// Runs a [`Predictor`] over a volume chunk by chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkedInference {
    config: ChunkConfig,
}

impl ChunkedInference {
    /// Create an engine with the given geometry.
    #[must_use]
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// The chunk geometry.
    #[must_use]
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Plan the tiles for a spatial shape.
    pub fn plan(&self, spatial_shape: &[usize]) -> Result<TilePlan> {
        let (chunk, halo) = self.config.resolve(spatial_shape.len())?;
        Ok(TilePlan::new(spatial_shape, &chunk, &halo))
    }

    /// Number of predictor calls needed for a spatial shape.
    pub fn tile_count(&self, spatial_shape: &[usize]) -> Result<usize> {
        Ok(self.plan(spatial_shape)?.len())
    }

    /// Run the predictor over `volume` (`[channels, spatial...]`).
    ///
    /// Returns a new `[output_channels, spatial...]` volume in which every
    /// voxel comes from exactly one chunk. Only one chunk's output is alive at
    /// a time.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] for a volume without spatial axes or an
    ///   invalid geometry.
    /// - [`Error::ShapeMismatch`] if the predictor returns the wrong shape.
    /// - Any error returned by the predictor.
    pub fn infer<P>(&self, predictor: &P, volume: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>>
    where
        P: Predictor + ?Sized,
    {
        if volume.ndim() < 2 {
            return Err(Error::Configuration(format!(
                "volume must be [channels, spatial...], got shape {:?}",
                volume.shape()
            )));
        }

        let spatial = &volume.shape()[1..];
        let plan = self.plan(spatial)?;
        let out_channels = self.config.output_channels;

        let mut out_shape = Vec::with_capacity(volume.ndim());
        out_shape.push(out_channels);
        out_shape.extend_from_slice(spatial);
        let mut output = ArrayD::<f32>::zeros(IxDyn(&out_shape));

        tracing::debug!(shape = ?spatial, tiles = plan.len(), "chunked inference");

        for tile in plan.iter() {
            let chunk = volume.slice_each_axis(|ax| match ax.axis.index() {
                0 => Slice::from(..),
                i => Slice::from(tile[i - 1].chunk.clone()),
            });

            let mut expected = Vec::with_capacity(chunk.ndim());
            expected.push(out_channels);
            expected.extend(tile.iter().map(|t| t.chunk.len()));

            let scores = predictor.predict(chunk)?;
            if scores.shape() != expected.as_slice() {
                return Err(Error::shape_mismatch("predictor output", &expected, scores.shape()));
            }

            let interior = scores.slice_each_axis(|ax| match ax.axis.index() {
                0 => Slice::from(..),
                i => Slice::from(tile[i - 1].write_in_chunk()),
            });
            output
                .slice_each_axis_mut(|ax| match ax.axis.index() {
                    0 => Slice::from(..),
                    i => Slice::from(tile[i - 1].write.clone()),
                })
                .assign(&interior);
        }

        Ok(output)
    }
}
