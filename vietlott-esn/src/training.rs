use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use vietlott_db::models::{Draw, NumberRange};

use crate::config::{EsnConfig, SequenceMetrics};
use crate::encoding::{encode_target, window_inputs};
use crate::linalg::ridge_regression;
use crate::metrics;
use crate::reservoir::Reservoir;

pub const ARTIFACT_VERSION: u32 = 1;
/// Windows required before a readout is worth fitting.
pub const MIN_WINDOWS: usize = 5;

/// Echo-state sequence model: fixed reservoir plus a trained linear readout
/// mapping [final state; last input; 1] to per-number likelihoods.
pub struct SequenceModel {
    config: EsnConfig,
    range: NumberRange,
    pick_count: usize,
    reservoir: Reservoir,
    w_out: Array2<f64>,
}

#[derive(Serialize, Deserialize)]
struct SequenceArtifact {
    version: u32,
    config: EsnConfig,
    range: NumberRange,
    pick_count: usize,
    w_out: Array2<f64>,
}

/// Draws needed to train with the given config.
pub fn min_history(config: &EsnConfig) -> usize {
    config.sequence_length.max(1) + MIN_WINDOWS
}

fn readout_features(reservoir: &Reservoir, inputs: &[Array1<f64>], seed: u64) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let state = reservoir.final_state(inputs, &mut rng);
    let rs = reservoir.size();
    let input_dim = reservoir.input_dim();
    let mut features = Array1::zeros(rs + input_dim + 1);
    features.slice_mut(s![..rs]).assign(&state);
    if let Some(last) = inputs.last() {
        features.slice_mut(s![rs..rs + input_dim]).assign(last);
    }
    features[rs + input_dim] = 1.0;
    features
}

fn fit_readout(features: &[Array1<f64>], targets: &[Array1<f64>], lambda: f64) -> Result<Array2<f64>> {
    let (Some(first_f), Some(first_t)) = (features.first(), targets.first()) else {
        bail!("No training windows");
    };
    let mut h = Array2::zeros((first_f.len(), features.len()));
    let mut y = Array2::zeros((first_t.len(), targets.len()));
    for (col, (f, t)) in features.iter().zip(targets.iter()).enumerate() {
        h.column_mut(col).assign(f);
        y.column_mut(col).assign(t);
    }
    ridge_regression(&h, &y, lambda)
}

fn clamp_scores(raw: Array1<f64>) -> Vec<f64> {
    raw.iter()
        .map(|&v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
        .collect()
}

impl SequenceModel {
    /// Train on `draws` (newest first, as returned by the store).
    ///
    /// Every run of `sequence_length` consecutive draws is an input and the
    /// draw right after it the target. The trailing `validation_fraction` of
    /// windows is scored by a readout fitted on the earlier ones; the final
    /// readout is then refitted on all windows.
    pub fn train(
        draws: &[Draw],
        range: NumberRange,
        pick_count: usize,
        config: &EsnConfig,
    ) -> Result<(Self, SequenceMetrics)> {
        let start = Instant::now();
        let chrono: Vec<&Draw> = draws.iter().rev().collect();
        let n = chrono.len();
        let length = config.sequence_length.max(1);
        if n < min_history(config) {
            bail!("Sequence model needs at least {} draws, got {n}", min_history(config));
        }

        let input_dim = config.encoding.input_dim(range, pick_count);
        let reservoir = Reservoir::from_config(input_dim, config);

        let features: Vec<Array1<f64>> = (length..n)
            .into_par_iter()
            .map(|t| {
                let inputs = window_inputs(&chrono, t, length, range, pick_count, config.encoding);
                readout_features(&reservoir, &inputs, config.seed.wrapping_add(t as u64))
            })
            .collect();
        let targets: Vec<Array1<f64>> = (length..n).map(|t| encode_target(chrono[t], range)).collect();

        let windows = features.len();
        let val_windows = if config.validation_fraction > 0.0 {
            ((windows as f64 * config.validation_fraction).round() as usize).clamp(1, windows - 1)
        } else {
            0
        };
        let train_windows = windows - val_windows;
        debug!("sequence model: {train_windows} train / {val_windows} validation windows");

        let (val_hit_rate, val_topk) = if val_windows > 0 {
            let w_fit = fit_readout(&features[..train_windows], &targets[..train_windows], config.ridge_lambda)
                .context("Validation readout fit failed")?;
            let predictions: Vec<Vec<f64>> = features[train_windows..]
                .iter()
                .map(|f| clamp_scores(w_fit.dot(f)))
                .collect();
            let actuals: Vec<Vec<u8>> = (length + train_windows..n).map(|t| chrono[t].numbers.clone()).collect();
            (
                metrics::hit_rate(&predictions, &actuals, range, pick_count),
                metrics::hit_rate(&predictions, &actuals, range, pick_count * 2),
            )
        } else {
            (0.0, 0.0)
        };

        let w_out = fit_readout(&features, &targets, config.ridge_lambda).context("Readout fit failed")?;

        let result = SequenceMetrics {
            train_windows,
            val_windows,
            val_hit_rate,
            val_topk,
            random_baseline: metrics::random_baseline(range, pick_count),
            train_time_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "sequence model trained on {} windows: val hit rate {:.3} (baseline {:.3})",
            windows, result.val_hit_rate, result.random_baseline
        );

        let model = SequenceModel {
            config: config.clone(),
            range,
            pick_count,
            reservoir,
            w_out,
        };
        Ok((model, result))
    }

    /// Per-number likelihood for the next draw, indexed by (n - lo), each in
    /// [0, 1]. Histories shorter than the sequence length are front-padded.
    pub fn score(&self, draws: &[Draw]) -> Vec<f64> {
        let chrono: Vec<&Draw> = draws.iter().rev().collect();
        let length = self.config.sequence_length.max(1);
        let inputs = window_inputs(&chrono, chrono.len(), length, self.range, self.pick_count, self.config.encoding);
        let features = readout_features(&self.reservoir, &inputs, self.config.seed);
        clamp_scores(self.w_out.dot(&features))
    }

    pub fn range(&self) -> NumberRange {
        self.range
    }

    pub fn config(&self) -> &EsnConfig {
        &self.config
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let artifact = SequenceArtifact {
            version: ARTIFACT_VERSION,
            config: self.config.clone(),
            range: self.range,
            pick_count: self.pick_count,
            w_out: self.w_out.clone(),
        };
        serde_json::to_vec(&artifact).context("Cannot serialize sequence model")
    }

    /// Restores a model; the reservoir is regenerated from the stored seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: SequenceArtifact =
            serde_json::from_slice(bytes).context("Cannot parse sequence model artifact")?;
        if artifact.version != ARTIFACT_VERSION {
            bail!("Unsupported sequence model artifact version {}", artifact.version);
        }
        let input_dim = artifact.config.encoding.input_dim(artifact.range, artifact.pick_count);
        let expected = (artifact.range.size(), artifact.config.reservoir_size + input_dim + 1);
        if artifact.w_out.dim() != expected {
            bail!(
                "Sequence model readout has shape {:?}, expected {:?}",
                artifact.w_out.dim(),
                expected
            );
        }
        let reservoir = Reservoir::from_config(input_dim, &artifact.config);
        Ok(SequenceModel {
            config: artifact.config,
            range: artifact.range,
            pick_count: artifact.pick_count,
            reservoir,
            w_out: artifact.w_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use vietlott_db::models::Variant;

    /// Newest first. Cycles through three disjoint Mega 6/45 draws.
    fn make_test_draws(n: usize) -> Vec<Draw> {
        let patterns: [[u8; 6]; 3] = [[1, 2, 3, 4, 5, 6], [20, 21, 22, 23, 24, 25], [40, 41, 42, 43, 44, 45]];
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let mut draws: Vec<Draw> = (0..n)
            .map(|i| Draw {
                variant: Variant::Mega645,
                draw_id: format!("{:05}", i + 1),
                draw_date: start + Duration::days(i as i64),
                session: None,
                numbers: patterns[i % 3].to_vec(),
                special: None,
                jackpot_amount: None,
            })
            .collect();
        draws.reverse();
        draws
    }

    fn small_config() -> EsnConfig {
        EsnConfig {
            sequence_length: 6,
            reservoir_size: 24,
            sparsity: 0.8,
            ridge_lambda: 1e-2,
            ..EsnConfig::default()
        }
    }

    #[test]
    fn test_train_and_score_range() {
        let draws = make_test_draws(60);
        let range = Variant::Mega645.main_range();
        let (model, metrics) = SequenceModel::train(&draws, range, 6, &small_config()).unwrap();
        assert_eq!(metrics.train_windows + metrics.val_windows, 54);
        assert_eq!(metrics.val_windows, 11);

        let scores = model.score(&draws);
        assert_eq!(scores.len(), 45);
        assert!(scores.iter().all(|&s| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_learns_periodic_pattern() {
        let draws = make_test_draws(60);
        let range = Variant::Mega645.main_range();
        let (model, metrics) = SequenceModel::train(&draws, range, 6, &small_config()).unwrap();
        assert!(metrics.val_hit_rate > 2.0 * metrics.random_baseline, "{metrics:?}");

        // draw 60 (index 59) used pattern 59 % 3 == 2, so pattern 0 comes next
        let scores = model.score(&draws);
        let top = metrics::top_k_indices(&scores, 6);
        let hits = top.iter().filter(|&&i| i < 6).count();
        assert!(hits >= 4, "top={top:?}");
    }

    #[test]
    fn test_too_short_history() {
        let draws = make_test_draws(8);
        let range = Variant::Mega645.main_range();
        assert!(SequenceModel::train(&draws, range, 6, &small_config()).is_err());
    }

    #[test]
    fn test_short_history_scores_with_padding() {
        let draws = make_test_draws(60);
        let range = Variant::Mega645.main_range();
        let (model, _) = SequenceModel::train(&draws, range, 6, &small_config()).unwrap();
        let scores = model.score(&draws[..2]);
        assert_eq!(scores.len(), 45);
        let empty = model.score(&[]);
        assert_eq!(empty.len(), 45);
    }

    #[test]
    fn test_artifact_restores_identical_scores() {
        let draws = make_test_draws(40);
        let range = Variant::Mega645.main_range();
        let (model, _) = SequenceModel::train(&draws, range, 6, &small_config()).unwrap();
        let bytes = model.to_bytes().unwrap();
        let restored = SequenceModel::from_bytes(&bytes).unwrap();
        assert_eq!(model.score(&draws), restored.score(&draws));
    }

    #[test]
    fn test_artifact_version_rejected() {
        let draws = make_test_draws(40);
        let range = Variant::Mega645.main_range();
        let (model, _) = SequenceModel::train(&draws, range, 6, &small_config()).unwrap();
        let mut json: serde_json::Value = serde_json::from_slice(&model.to_bytes().unwrap()).unwrap();
        json["version"] = serde_json::json!(99);
        assert!(SequenceModel::from_bytes(&serde_json::to_vec(&json).unwrap()).is_err());
        assert!(SequenceModel::from_bytes(b"not json").is_err());
    }
}
