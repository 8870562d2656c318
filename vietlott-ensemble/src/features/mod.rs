pub mod compute;

use vietlott_db::models::{Draw, NumberRange};

use crate::config::FeatureConfig;

pub const FEATURE_NAMES: &[&str] = &["freq", "recency_norm", "gap_delta", "pos_norm"];

#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub number: u8,
    pub features: Vec<f64>,
    pub label: f64,
}

/// Per-number feature extraction over the main pool of a variant.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    range: NumberRange,
    feature_window: usize,
    gap_lookback: usize,
}

impl FeatureExtractor {
    pub fn new(range: NumberRange, config: &FeatureConfig) -> Self {
        Self {
            range,
            feature_window: config.feature_window.max(1),
            gap_lookback: config.gap_lookback.max(1),
        }
    }

    pub fn range(&self) -> NumberRange {
        self.range
    }

    /// Unlabelled rows describing the draw that follows `context` (newest first).
    pub fn rows_for_next(&self, context: &[Draw]) -> Vec<FeatureRow> {
        compute::rows_from_context(self, context, None)
    }

    /// Labelled rows for `draws[target_idx]`, built only from older draws.
    pub fn rows_for_target(&self, draws: &[Draw], target_idx: usize) -> Vec<FeatureRow> {
        let context = draws.get(target_idx + 1..).unwrap_or(&[]);
        compute::rows_from_context(self, context, draws.get(target_idx))
    }

    /// Training samples from up to `max_targets` of the most recent draws that
    /// have at least one older draw.
    pub fn training_rows(&self, draws: &[Draw], max_targets: usize) -> Vec<FeatureRow> {
        let targets = draws.len().saturating_sub(1).min(max_targets);
        (0..targets).flat_map(|t| self.rows_for_target(draws, t)).collect()
    }
}
