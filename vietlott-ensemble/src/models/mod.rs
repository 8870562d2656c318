pub mod boosted;
pub mod sequence;
pub mod statistical;
pub mod transition;

use std::collections::HashMap;

use vietlott_db::models::{Draw, NumberRange};

use crate::analysis::ScoreMap;
use crate::error::Result;

pub use boosted::FeatureScorer;
pub use sequence::SequenceScorer;
pub use statistical::StatisticalScorer;
pub use transition::TransitionModel;

pub const SEQUENCE: &str = "sequence";
pub const FEATURE: &str = "feature";
pub const TRANSITION: &str = "transition";
pub const STATISTICAL: &str = "statistical";

/// Names of the models that are trained and persisted as artifacts.
pub const TRAINABLE: [&str; 3] = [SEQUENCE, FEATURE, TRANSITION];

/// A source of per-number scores for the next draw.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;
    fn is_ready(&self) -> bool;
    /// draws[0] = most recent draw. Returns named training metrics.
    fn train(&mut self, draws: &[Draw]) -> Result<HashMap<String, f64>>;
    /// draws[0] = most recent draw. Fails with ModelNotReady before train/load.
    fn score(&self, draws: &[Draw]) -> Result<ScoreMap>;
    fn save(&self) -> Result<Vec<u8>>;
    fn load(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Covers `range` exactly with finite, non-negative scores.
pub fn validate_scores(map: &ScoreMap, range: NumberRange) -> bool {
    map.range() == range
        && map.values().len() == range.size()
        && map.values().iter().all(|s| s.is_finite() && *s >= 0.0)
}
