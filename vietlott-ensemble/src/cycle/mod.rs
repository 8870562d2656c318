pub mod prize;
pub mod retrain;

use anyhow::anyhow;
use chrono::Utc;
use log::{info, warn};

use vietlott_db::models::{MatchResult, NewCycle, PredictionCycle, Session, Variant};
use vietlott_db::store::ResultsStore;

use crate::config::RetrainConfig;
use crate::error::{Error, Result};

/// What one result check recorded.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub cycle: PredictionCycle,
    pub record: MatchResult,
    /// False when this draw had already been checked for the cycle.
    pub is_new: bool,
}

impl CheckOutcome {
    pub fn cycle_completed(&self) -> bool {
        !self.cycle.is_active()
    }
}

/// Drives one variant's prediction cycles through the results store.
pub struct CycleManager<'a> {
    store: &'a dyn ResultsStore,
    config: &'a RetrainConfig,
}

impl<'a> CycleManager<'a> {
    pub fn new(store: &'a dyn ResultsStore, config: &'a RetrainConfig) -> Self {
        Self { store, config }
    }

    /// Length of the next cycle: shortened right after a cycle without a
    /// single 3+ match.
    pub fn next_cycle_length(&self, variant: Variant, cycle_number: u32) -> Result<u32> {
        if cycle_number <= 1 {
            return Ok(self.config.default_cycle_length);
        }
        let Some(previous) = self.store.cycle_by_number(variant, cycle_number - 1)? else {
            return Ok(self.config.default_cycle_length);
        };
        let records = self.store.match_results_for_cycle(previous.id)?;
        let hit_3plus = records.iter().filter(|r| r.matched_count >= 3).count();
        if hit_3plus == 0 {
            Ok(self.config.short_cycle_length)
        } else {
            Ok(self.config.default_cycle_length)
        }
    }

    /// The active cycle, or a freshly created one.
    pub fn get_or_create(&self, variant: Variant, model_version: &str) -> Result<PredictionCycle> {
        if let Some(cycle) = self.store.active_cycle(variant)? {
            info!(
                "{variant}: active cycle #{} found, {}/{} draws tracked",
                cycle.cycle_number, cycle.draws_tracked, cycle.max_draws
            );
            return Ok(cycle);
        }

        let cycle_number = self.store.next_cycle_number(variant)?;
        let max_draws = self.next_cycle_length(variant, cycle_number)?;
        let new = NewCycle { variant, cycle_number, max_draws, model_version: model_version.to_string() };
        match self.store.create_cycle(&new, Utc::now())? {
            Some(cycle) => {
                info!("{variant}: created cycle #{cycle_number} tracking {max_draws} draws");
                Ok(cycle)
            }
            None => {
                // someone else created one between our read and our insert
                let winner = self.store.active_cycle(variant)?;
                winner.ok_or_else(|| Error::Store(anyhow!("{variant}: cycle creation lost a race but no active cycle exists")))
            }
        }
    }

    pub fn advance(&self, cycle_id: i64) -> Result<PredictionCycle> {
        let cycle = self.store.advance_cycle(cycle_id, Utc::now())?;
        info!(
            "cycle {} advanced to {}/{}{}",
            cycle_id,
            cycle.draws_tracked,
            cycle.max_draws,
            if cycle.is_active() { "" } else { ", completed" }
        );
        Ok(cycle)
    }

    /// Compare the active cycle's prediction with a stored draw and record
    /// the match. The cycle only advances for a draw not seen before.
    pub fn check_result(&self, variant: Variant, draw_id: &str, session: Option<Session>) -> Result<CheckOutcome> {
        let cycle = self.store.active_cycle(variant)?.ok_or(Error::NoActiveCycle(variant))?;
        let prediction = self
            .store
            .prediction_for_cycle(cycle.id)?
            .ok_or(Error::NoPrediction { cycle_id: cycle.id })?;
        let draw = self.store.draw_by_id(variant, draw_id, session)?.ok_or_else(|| Error::DrawNotFound {
            variant,
            draw_id: draw_id.to_string(),
            session,
        })?;

        let matched = prize::matched_numbers(&prediction.numbers, &draw.numbers);
        let matched_count = matched.len() as u32;
        let special = prize::special_matched(variant, &prediction.numbers, prediction.special, draw.special);
        let record = MatchResult {
            cycle_id: cycle.id,
            variant,
            draw_id: draw.draw_id.clone(),
            session: draw.session,
            draw_date: draw.draw_date,
            draw_number: cycle.draws_tracked + 1,
            predicted: prediction.numbers.clone(),
            actual: draw.numbers.clone(),
            predicted_special: prediction.special,
            actual_special: draw.special,
            matched,
            matched_count,
            special_matched: special,
            prize_tier: prize::classify(variant, matched_count, special),
        };

        let is_new = self.store.upsert_match_result(&record)?;
        let cycle = if is_new {
            self.advance(cycle.id)?
        } else {
            warn!("{variant}: draw {draw_id} already checked for cycle #{}, not advancing", cycle.cycle_number);
            cycle
        };
        info!(
            "{variant}: draw {} matched {}/{} {:?} -> {}",
            record.draw_id,
            matched_count,
            record.predicted.len(),
            record.matched,
            record.prize_tier
        );

        // report the stored record, which keeps its original draw number
        let record = self
            .store
            .match_results_for_cycle(record.cycle_id)?
            .into_iter()
            .find(|r| r.draw_id == record.draw_id && r.session == record.session)
            .unwrap_or(record);
        Ok(CheckOutcome { cycle, record, is_new })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use vietlott_db::models::{EnsembleWeights, NewPrediction, PredictionCycle};
    use vietlott_db::store::ResultsStore;

    pub fn predict(store: &dyn ResultsStore, cycle: &PredictionCycle, numbers: &[u8], special: Option<u8>) {
        store
            .insert_prediction(
                &NewPrediction {
                    cycle_id: cycle.id,
                    variant: cycle.variant,
                    numbers: numbers.to_vec(),
                    special,
                    model_version: cycle.model_version.clone(),
                    weights: EnsembleWeights::default(),
                },
                Utc::now(),
            )
            .unwrap();
    }
}
