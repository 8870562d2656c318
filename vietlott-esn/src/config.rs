use serde::{Deserialize, Serialize};
use vietlott_db::models::NumberRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One slot per number of the range.
    OneHot,
    /// Sorted numbers divided by the range maximum, one slot per pick.
    Normalized,
}

impl Encoding {
    pub fn input_dim(&self, range: NumberRange, pick_count: usize) -> usize {
        match self {
            Encoding::OneHot => range.size(),
            Encoding::Normalized => pick_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsnConfig {
    /// Draws fed to the reservoir per prediction, oldest first.
    pub sequence_length: usize,
    pub reservoir_size: usize,
    pub spectral_radius: f64,
    pub sparsity: f64,
    pub leaking_rate: f64,
    pub ridge_lambda: f64,
    pub input_scaling: f64,
    pub encoding: Encoding,
    pub noise_amplitude: f64,
    /// Trailing share of training windows kept aside for the hit-rate metric.
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for EsnConfig {
    fn default() -> Self {
        Self {
            sequence_length: 50,
            reservoir_size: 200,
            spectral_radius: 0.95,
            sparsity: 0.9,
            leaking_rate: 0.3,
            ridge_lambda: 1e-2,
            input_scaling: 0.1,
            encoding: Encoding::OneHot,
            noise_amplitude: 0.0,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

/// Outcome of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceMetrics {
    pub train_windows: usize,
    pub val_windows: usize,
    /// Mean share of the actual numbers found in the top pick_count scores.
    pub val_hit_rate: f64,
    /// Same with twice as many candidates.
    pub val_topk: f64,
    pub random_baseline: f64,
    pub train_time_ms: u64,
}
