pub mod weights;

use std::sync::Arc;

use log::{debug, info, warn};

use vietlott_db::models::{Draw, EnsembleWeights, NumberRange, Pool, Variant};

use crate::analysis::ScoreMap;
use crate::config::{VariantConfig, WeightBand};
use crate::error::{Error, Result};
use crate::models::{validate_scores, Scorer, StatisticalScorer};

pub use weights::{normalize_weights, shift_toward_secondary};

/// Blends the sequence, secondary (feature + transition) and statistical
/// signals into one score per number and picks a balanced set.
pub struct EnsembleCombiner {
    variant: Variant,
    range: NumberRange,
    weights: EnsembleWeights,
    band: WeightBand,
    statistical: StatisticalScorer,
    sequence: Option<Arc<dyn Scorer>>,
    feature: Option<Arc<dyn Scorer>>,
    transition: Option<Arc<dyn Scorer>>,
}

#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    pub numbers: Vec<u8>,
    pub special: Option<u8>,
    pub final_scores: ScoreMap,
    pub weights: EnsembleWeights,
    /// Models that were missing, unready or failed and got replaced.
    pub fallbacks: Vec<String>,
}

fn ready_scores(slot: &Option<Arc<dyn Scorer>>, draws: &[Draw], range: NumberRange) -> Option<ScoreMap> {
    let scorer = slot.as_ref()?;
    if !scorer.is_ready() {
        return None;
    }
    match scorer.score(draws) {
        Ok(map) if validate_scores(&map, range) => Some(map),
        Ok(_) => {
            warn!("{} returned scores that do not cover {}-{}", scorer.name(), range.lo, range.hi);
            None
        }
        Err(e) => {
            warn!("{} failed to score: {e}", scorer.name());
            None
        }
    }
}

impl EnsembleCombiner {
    pub fn new(config: &VariantConfig) -> Result<Self> {
        Ok(Self {
            variant: config.variant,
            range: config.variant.main_range(),
            weights: normalize_weights(config.weights, config.weight_band),
            band: config.weight_band,
            statistical: StatisticalScorer::new(config)?,
            sequence: None,
            feature: None,
            transition: None,
        })
    }

    pub fn with_sequence(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.sequence = Some(scorer);
        self
    }

    pub fn with_feature(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.feature = Some(scorer);
        self
    }

    pub fn with_transition(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.transition = Some(scorer);
        self
    }

    pub fn weights(&self) -> EnsembleWeights {
        self.weights
    }

    /// Replace the blend weights, projected onto the configured band.
    pub fn update_weights(&mut self, weights: EnsembleWeights) -> EnsembleWeights {
        self.weights = normalize_weights(weights, self.band);
        debug!("{} ensemble weights set to {}", self.variant, self.weights);
        self.weights
    }

    /// `pick_count` distinct numbers, ascending. draws[0] = most recent.
    pub fn predict(&self, draws: &[Draw], pick_count: usize) -> Result<Vec<u8>> {
        Ok(self.forecast_with(draws, pick_count)?.numbers)
    }

    pub fn forecast(&self, draws: &[Draw]) -> Result<EnsemblePrediction> {
        self.forecast_with(draws, self.variant.pick_count())
    }

    /// Final blended score per number, with the names of the models that fell back.
    pub fn final_scores(&self, draws: &[Draw]) -> Result<(ScoreMap, Vec<String>)> {
        if draws.is_empty() {
            return Err(Error::InsufficientHistory { needed: 1, available: 0 });
        }
        let range = self.range;

        let ((sequence, feature), (transition, stat)) = rayon::join(
            || {
                rayon::join(
                    || ready_scores(&self.sequence, draws, range),
                    || ready_scores(&self.feature, draws, range),
                )
            },
            || rayon::join(|| ready_scores(&self.transition, draws, range), || self.statistical.scores(draws)),
        );

        let mut fallbacks = Vec::new();
        let sequence = sequence.unwrap_or_else(|| {
            fallbacks.push(crate::models::SEQUENCE.to_string());
            stat.clone()
        });
        let feature = feature.unwrap_or_else(|| {
            fallbacks.push(crate::models::FEATURE.to_string());
            stat.clone()
        });
        let transition = transition.unwrap_or_else(|| {
            fallbacks.push(crate::models::TRANSITION.to_string());
            ScoreMap::uniform(range, 1.0 / range.size() as f64)
        });
        if !fallbacks.is_empty() {
            warn!("{}: falling back for {}", self.variant, fallbacks.join(", "));
        }

        let secondary = ScoreMap::mean(range, &[&feature, &transition]);
        let w = self.weights;
        let blended = ScoreMap::weighted_sum(
            range,
            &[(w.sequence, &sequence), (w.secondary, &secondary), (w.statistical, &stat)],
        );
        Ok((blended, fallbacks))
    }

    fn forecast_with(&self, draws: &[Draw], pick_count: usize) -> Result<EnsemblePrediction> {
        let (final_scores, fallbacks) = self.final_scores(draws)?;
        let ranked = final_scores.ranked();
        let numbers = self.statistical.position().pick_balanced(&ranked, pick_count)?;
        let special = self.predict_special(draws);
        info!("{} ensemble prediction: {:?} special {:?}", self.variant, numbers, special);
        Ok(EnsemblePrediction {
            numbers,
            special,
            final_scores,
            weights: self.weights,
            fallbacks,
        })
    }

    /// Player-picked special number: best average of frequency and gap over
    /// the special pool. None when the game has no such pick.
    pub fn predict_special(&self, draws: &[Draw]) -> Option<u8> {
        if !self.variant.special_is_picked() {
            return None;
        }
        let range = self.variant.special_range()?;
        let freq = self.statistical.frequency().scores(draws, Pool::Special, range);
        let gap = self.statistical.gap().scores(draws, Pool::Special, range);
        ScoreMap::mean(range, &[&freq, &gap]).top(1).first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::analysis::test_support::make_test_draws;

    /// Fixed scores, optionally unready or failing.
    struct FixedScorer {
        map: ScoreMap,
        ready: bool,
        fail: bool,
    }

    impl Scorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn train(&mut self, _draws: &[Draw]) -> Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
        fn score(&self, _draws: &[Draw]) -> Result<ScoreMap> {
            if self.fail {
                return Err(Error::not_ready("fixed"));
            }
            Ok(self.map.clone())
        }
        fn save(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn load(&mut self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn fixed(map: ScoreMap) -> Arc<dyn Scorer> {
        Arc::new(FixedScorer { map, ready: true, fail: false })
    }

    fn favouring(range: NumberRange, favourites: &[u8]) -> ScoreMap {
        let values = range.iter().map(|n| if favourites.contains(&n) { 1.0 } else { 0.0 }).collect();
        ScoreMap::from_vec(range, values)
    }

    #[test]
    fn test_predict_without_models() {
        for v in Variant::ALL {
            let combiner = EnsembleCombiner::new(&VariantConfig::for_variant(v)).unwrap();
            let draws = make_test_draws(v, 60);
            let picks = combiner.predict(&draws, v.pick_count()).unwrap();
            assert_eq!(picks.len(), v.pick_count());
            assert!(picks.windows(2).all(|w| w[0] < w[1]));
            assert!(picks.iter().all(|&n| v.main_range().contains(n)));
        }
    }

    #[test]
    fn test_empty_history_is_an_error() {
        let combiner = EnsembleCombiner::new(&VariantConfig::for_variant(Variant::Mega645)).unwrap();
        assert!(matches!(combiner.predict(&[], 6), Err(Error::InsufficientHistory { .. })));
    }

    #[test]
    fn test_strong_sequence_signal_wins() {
        let v = Variant::Mega645;
        let range = v.main_range();
        let favourites = [3, 9, 20, 27, 38, 44];
        let mut config = VariantConfig::for_variant(v);
        config.weights = EnsembleWeights::new(0.6, 0.2, 0.2);
        let combiner = EnsembleCombiner::new(&config)
            .unwrap()
            .with_sequence(fixed(favouring(range, &favourites)))
            .with_feature(fixed(favouring(range, &favourites)));
        let pred = combiner.forecast(&make_test_draws(v, 40)).unwrap();
        assert_eq!(pred.numbers, favourites.to_vec());
        assert_eq!(pred.fallbacks, vec!["transition".to_string()]);
        assert_eq!(pred.special, None);
    }

    #[test]
    fn test_unready_and_failing_models_fall_back() {
        let v = Variant::Power655;
        let range = v.main_range();
        let draws = make_test_draws(v, 40);
        let baseline = EnsembleCombiner::new(&VariantConfig::for_variant(v)).unwrap();

        let unready: Arc<dyn Scorer> = Arc::new(FixedScorer { map: favouring(range, &[1]), ready: false, fail: false });
        let failing: Arc<dyn Scorer> = Arc::new(FixedScorer { map: favouring(range, &[1]), ready: true, fail: true });
        let degraded = EnsembleCombiner::new(&VariantConfig::for_variant(v))
            .unwrap()
            .with_sequence(unready)
            .with_feature(failing);

        let a = baseline.forecast(&draws).unwrap();
        let b = degraded.forecast(&draws).unwrap();
        assert_eq!(a.numbers, b.numbers);
        assert_eq!(a.final_scores, b.final_scores);
        assert_eq!(b.fallbacks.len(), 3);
    }

    #[test]
    fn test_wrong_range_scores_rejected() {
        let v = Variant::Mega645;
        let draws = make_test_draws(v, 30);
        let combiner = EnsembleCombiner::new(&VariantConfig::for_variant(v))
            .unwrap()
            .with_sequence(fixed(ScoreMap::uniform(NumberRange::new(1, 55), 1.0)));
        let (_, fallbacks) = combiner.final_scores(&draws).unwrap();
        assert!(fallbacks.contains(&"sequence".to_string()));
    }

    #[test]
    fn test_update_weights_stays_in_band() {
        let mut combiner = EnsembleCombiner::new(&VariantConfig::for_variant(Variant::Mega645)).unwrap();
        let w = combiner.update_weights(EnsembleWeights::new(0.9, 0.0, 0.0));
        assert!((w.total() - 1.0).abs() < 1e-9);
        assert!((w.sequence - 0.6).abs() < 1e-9);
        assert_eq!(combiner.weights(), w);
    }

    #[test]
    fn test_lotto_special_prediction() {
        let v = Variant::Lotto535;
        let combiner = EnsembleCombiner::new(&VariantConfig::for_variant(v)).unwrap();
        let draws = make_test_draws(v, 36);
        let pred = combiner.forecast(&draws).unwrap();
        let special = pred.special.unwrap();
        assert!((1..=12).contains(&special));
        // every special appears in the history; the latest one is the least overdue
        assert_ne!(special, draws[0].special.unwrap());
    }
}
