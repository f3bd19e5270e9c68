//! Instance detection scoring.
//!
//! - [`matching`]: overlap of predicted instances with labelled ground truth
//! - [`map`]: greedy assignment and mean average precision over acceptance IOUs

pub mod map;
pub mod matching;

pub use map::{DetectionConfig, DetectionSummary, IouLevelMetrics, MatchRecord, average_precision, compute_map};
pub use matching::{ImageMatches, InstanceMatch, PredictedInstance, match_instances};
