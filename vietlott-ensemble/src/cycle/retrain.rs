use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use vietlott_db::models::{EnsembleWeights, MatchResult, TrainingLog, TrainingStatus, Variant};
use vietlott_db::store::ResultsStore;

use crate::config::{VariantConfig, WeightBand};
use crate::ensemble::{normalize_weights, shift_toward_secondary};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainDecision {
    pub should_retrain: bool,
    pub reason: String,
    pub records: usize,
    pub hit_3plus: u32,
    pub hit_4plus: u32,
    pub max_match: u32,
    pub weights_before: EnsembleWeights,
    /// Weights in force after the decision; equal to `weights_before` on skip.
    pub weights: EnsembleWeights,
    /// False when the cycle had already been evaluated and this is the logged decision.
    pub is_new: bool,
}

impl RetrainDecision {
    fn from_log(log: &TrainingLog, records: usize) -> Self {
        Self {
            should_retrain: log.status == TrainingStatus::Triggered,
            reason: log.reason.clone(),
            records,
            hit_3plus: log.hit_3plus,
            hit_4plus: log.hit_4plus,
            max_match: log.max_match,
            weights_before: log.weights_before,
            weights: log.weights_after.unwrap_or(log.weights_before),
            is_new: false,
        }
    }
}

/// Pure decision over a cycle's match records.
pub fn decide(
    records: &[MatchResult],
    current: EnsembleWeights,
    threshold: u32,
    band: WeightBand,
    step: f64,
) -> RetrainDecision {
    let hit_3plus = records.iter().filter(|r| r.matched_count >= 3).count() as u32;
    let hit_4plus = records.iter().filter(|r| r.matched_count >= 4).count() as u32;
    let max_match = records.iter().map(|r| r.matched_count).max().unwrap_or(0);

    let should_retrain = hit_3plus < threshold;
    let (reason, weights) = if should_retrain {
        (
            format!("{hit_3plus}/{} checks with 3+ matches (threshold {threshold})", records.len()),
            shift_toward_secondary(current, step, band),
        )
    } else {
        (format!("{hit_3plus}/{} checks with 3+ matches, keeping weights", records.len()), current)
    };

    RetrainDecision {
        should_retrain,
        reason,
        records: records.len(),
        hit_3plus,
        hit_4plus,
        max_match,
        weights_before: current,
        weights,
        is_new: true,
    }
}

/// Evaluate a completed cycle, persist shifted weights when it underperformed
/// and append a training log entry. A cycle is evaluated once: later calls
/// return the logged decision and leave the weights alone.
pub fn evaluate_and_retrain(
    store: &dyn ResultsStore,
    config: &VariantConfig,
    cycle_id: i64,
) -> Result<RetrainDecision> {
    let variant: Variant = config.variant;
    let cycle = store
        .cycle_by_id(cycle_id)?
        .ok_or_else(|| Error::InvalidRecord(format!("cycle {cycle_id} does not exist")))?;
    if cycle.variant != variant {
        return Err(Error::InvalidRecord(format!(
            "cycle {cycle_id} belongs to {}, not {variant}",
            cycle.variant
        )));
    }

    if cycle.is_active() {
        return Err(Error::InvalidRecord(format!(
            "cycle #{} is still active ({}/{} draws checked)",
            cycle.cycle_number, cycle.draws_tracked, cycle.max_draws
        )));
    }

    let records = store.match_results_for_cycle(cycle_id)?;
    if let Some(log) = store.training_log_for_cycle(cycle_id)? {
        info!(
            "{variant}: cycle #{} already evaluated on {}, keeping that decision",
            cycle.cycle_number,
            log.created_at.format("%Y-%m-%d %H:%M")
        );
        return Ok(RetrainDecision::from_log(&log, records.len()));
    }
    if (records.len() as u32) < cycle.max_draws {
        warn!(
            "{variant}: cycle #{} has {} match records, expected {}",
            cycle.cycle_number,
            records.len(),
            cycle.max_draws
        );
    }

    let current = normalize_weights(store.load_weights(variant)?.unwrap_or(config.weights), config.weight_band);
    let decision = decide(
        &records,
        current,
        config.retrain.min_draws_with_3plus_match,
        config.weight_band,
        config.retrain.weight_step,
    );

    let now = Utc::now();
    if decision.should_retrain {
        warn!("{variant}: retrain triggered, {} ({} -> {})", decision.reason, current, decision.weights);
        store.save_weights(variant, &decision.weights, now)?;
    } else {
        info!("{variant}: retrain skipped, {}", decision.reason);
    }
    store.insert_training_log(&TrainingLog {
        variant,
        cycle_id,
        reason: decision.reason.clone(),
        weights_before: decision.weights_before,
        weights_after: decision.should_retrain.then_some(decision.weights),
        hit_3plus: decision.hit_3plus,
        hit_4plus: decision.hit_4plus,
        max_match: decision.max_match,
        status: if decision.should_retrain { TrainingStatus::Triggered } else { TrainingStatus::Skipped },
        created_at: now,
    })?;
    Ok(decision)
}
