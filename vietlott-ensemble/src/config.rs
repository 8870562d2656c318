use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vietlott_db::models::{EnsembleWeights, Variant};
use vietlott_esn::EsnConfig;

use crate::analysis::position::PositionBiasAnalyzer;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub lo: u8,
    pub hi: u8,
}

impl Zone {
    pub fn new(name: &str, lo: u8, hi: u8) -> Self {
        Self { name: name.to_string(), lo, hi }
    }

    pub fn contains(&self, n: u8) -> bool {
        n >= self.lo && n <= self.hi
    }
}

/// Bounds every ensemble weight is kept within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBand {
    #[serde(default = "default_weight_min")]
    pub min: f64,
    #[serde(default = "default_weight_max")]
    pub max: f64,
}

fn default_weight_min() -> f64 {
    0.10
}

fn default_weight_max() -> f64 {
    0.60
}

impl Default for WeightBand {
    fn default() -> Self {
        Self { min: default_weight_min(), max: default_weight_max() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainConfig {
    /// Cycles with fewer match records of 3+ hits trigger a retrain.
    #[serde(default = "default_min_3plus")]
    pub min_draws_with_3plus_match: u32,
    #[serde(default = "default_weight_step")]
    pub weight_step: f64,
    #[serde(default = "default_cycle_length")]
    pub default_cycle_length: u32,
    /// Used right after a cycle without any 3+ match.
    #[serde(default = "default_short_cycle_length")]
    pub short_cycle_length: u32,
}

fn default_min_3plus() -> u32 {
    2
}

fn default_weight_step() -> f64 {
    0.05
}

fn default_cycle_length() -> u32 {
    5
}

fn default_short_cycle_length() -> u32 {
    3
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            min_draws_with_3plus_match: default_min_3plus(),
            weight_step: default_weight_step(),
            default_cycle_length: default_cycle_length(),
            short_cycle_length: default_short_cycle_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    pub window: usize,
    pub recency_decay: f64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self { window: 100, recency_decay: 0.6 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    pub window: usize,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self { window: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionConfig {
    pub zones: Vec<Zone>,
    #[serde(default = "default_position_epsilon")]
    pub epsilon: f64,
}

fn default_position_epsilon() -> f64 {
    0.01
}

/// Gradient-boosted feature scorer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub feature_window: usize,
    pub gap_lookback: usize,
    pub max_training_draws: usize,
    pub n_trees: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    pub subsample: f64,
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            feature_window: 20,
            gap_lookback: 100,
            max_training_draws: 300,
            n_trees: 200,
            max_depth: 6,
            learning_rate: 0.05,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            subsample: 0.8,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    pub smoothing: f64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self { smoothing: 0.01 }
    }
}

/// Everything tunable for one game. Built explicitly and passed down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub variant: Variant,
    pub weights: EnsembleWeights,
    pub weight_band: WeightBand,
    pub retrain: RetrainConfig,
    pub frequency: FrequencyConfig,
    pub gap: GapConfig,
    pub position: PositionConfig,
    pub sequence: EsnConfig,
    pub feature: FeatureConfig,
    pub transition: TransitionConfig,
    pub history_limit: u32,
    pub model_version: String,
}

impl VariantConfig {
    pub fn for_variant(variant: Variant) -> Self {
        let zones = match variant {
            Variant::Power655 => vec![Zone::new("low", 1, 18), Zone::new("mid", 19, 36), Zone::new("high", 37, 55)],
            Variant::Mega645 => vec![Zone::new("low", 1, 15), Zone::new("mid", 16, 30), Zone::new("high", 31, 45)],
            Variant::Lotto535 => vec![Zone::new("low", 1, 12), Zone::new("mid", 13, 24), Zone::new("high", 25, 35)],
        };
        Self {
            variant,
            weights: EnsembleWeights::default(),
            weight_band: WeightBand::default(),
            retrain: RetrainConfig::default(),
            frequency: FrequencyConfig::default(),
            gap: GapConfig::default(),
            position: PositionConfig { zones, epsilon: default_position_epsilon() },
            sequence: EsnConfig::default(),
            feature: FeatureConfig::default(),
            transition: TransitionConfig::default(),
            history_limit: 200,
            model_version: "v1".to_string(),
        }
    }

    /// Defaults for `variant`, overlaid with the matching section of an
    /// optional JSON file keyed by variant (`{"mega_645": {"history_limit": 300}}`).
    pub fn load(variant: Variant, override_path: Option<&Path>) -> Result<Self> {
        let base = Self::for_variant(variant);
        let Some(path) = override_path else {
            base.validate()?;
            return Ok(base);
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {:?}", path))?;
        let overrides: Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid JSON in {:?}", path))?;
        let config = match overrides.get(variant.key()) {
            Some(section) => Self::with_overrides(base, section.clone())?,
            None => base,
        };
        config.validate()?;
        Ok(config)
    }

    fn with_overrides(base: Self, patch: Value) -> Result<Self> {
        let mut merged = serde_json::to_value(&base).context("Cannot serialize default config")?;
        merge_json(&mut merged, patch);
        let config: Self = serde_json::from_value(merged)
            .map_err(|e| Error::InvalidRecord(format!("{} config: {e}", base.variant)))?;
        if config.variant != base.variant {
            return Err(Error::InvalidRecord(format!(
                "config section for {} declares variant {}",
                base.variant, config.variant
            )));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let band = self.weight_band;
        if !(band.min >= 0.0 && band.min <= band.max && 3.0 * band.min <= 1.0 && 3.0 * band.max >= 1.0) {
            return Err(Error::InvalidRecord(format!(
                "{}: weight band [{}, {}] cannot hold three weights summing to 1",
                self.variant, band.min, band.max
            )));
        }
        if self.retrain.default_cycle_length == 0 || self.retrain.short_cycle_length == 0 {
            return Err(Error::InvalidRecord(format!("{}: cycle lengths must be positive", self.variant)));
        }
        if self.history_limit == 0 {
            return Err(Error::InvalidRecord(format!("{}: history_limit must be positive", self.variant)));
        }
        PositionBiasAnalyzer::new(self.variant.main_range(), self.position.zones.clone(), self.position.epsilon)?;
        Ok(())
    }
}

fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
