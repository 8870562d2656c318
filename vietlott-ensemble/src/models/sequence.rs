use std::collections::HashMap;

use vietlott_db::models::{Draw, NumberRange, Variant};
use vietlott_esn::training::min_history;
use vietlott_esn::{EsnConfig, SequenceModel};

use super::{Scorer, SEQUENCE};
use crate::analysis::ScoreMap;
use crate::error::{Error, Result};

/// Echo-state network over the trailing draws of one variant.
pub struct SequenceScorer {
    range: NumberRange,
    pick_count: usize,
    config: EsnConfig,
    model: Option<SequenceModel>,
}

impl SequenceScorer {
    pub fn new(variant: Variant, config: EsnConfig) -> Self {
        Self {
            range: variant.main_range(),
            pick_count: variant.pick_count(),
            config,
            model: None,
        }
    }
}

impl Scorer for SequenceScorer {
    fn name(&self) -> &str {
        SEQUENCE
    }

    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn train(&mut self, draws: &[Draw]) -> Result<HashMap<String, f64>> {
        let needed = min_history(&self.config);
        if draws.len() < needed {
            return Err(Error::InsufficientHistory { needed, available: draws.len() });
        }
        let (model, metrics) = SequenceModel::train(draws, self.range, self.pick_count, &self.config)
            .map_err(|e| Error::training(SEQUENCE, format!("{e:#}")))?;
        self.model = Some(model);
        Ok(HashMap::from([
            ("train_windows".to_string(), metrics.train_windows as f64),
            ("val_windows".to_string(), metrics.val_windows as f64),
            ("val_hit_rate".to_string(), metrics.val_hit_rate),
            ("val_topk".to_string(), metrics.val_topk),
            ("random_baseline".to_string(), metrics.random_baseline),
            ("train_time_ms".to_string(), metrics.train_time_ms as f64),
        ]))
    }

    fn score(&self, draws: &[Draw]) -> Result<ScoreMap> {
        let model = self.model.as_ref().ok_or_else(|| Error::not_ready(SEQUENCE))?;
        Ok(ScoreMap::from_vec(self.range, model.score(draws)))
    }

    fn save(&self) -> Result<Vec<u8>> {
        let model = self.model.as_ref().ok_or_else(|| Error::not_ready(SEQUENCE))?;
        model.to_bytes().map_err(|e| Error::artifact(SEQUENCE, e))
    }

    fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let model = SequenceModel::from_bytes(bytes).map_err(|e| Error::artifact(SEQUENCE, e))?;
        if model.range() != self.range {
            return Err(Error::artifact(
                SEQUENCE,
                format!("trained for {}-{}, expected {}-{}", model.range().lo, model.range().hi, self.range.lo, self.range.hi),
            ));
        }
        self.config = model.config().clone();
        self.model = Some(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::make_test_draws;
    use crate::models::validate_scores;

    fn test_config() -> EsnConfig {
        EsnConfig {
            sequence_length: 8,
            reservoir_size: 30,
            ..EsnConfig::default()
        }
    }

    #[test]
    fn test_not_ready_before_training() {
        let scorer = SequenceScorer::new(Variant::Mega645, test_config());
        assert!(!scorer.is_ready());
        let draws = make_test_draws(Variant::Mega645, 20);
        assert!(matches!(scorer.score(&draws), Err(Error::ModelNotReady { .. })));
        assert!(matches!(scorer.save(), Err(Error::ModelNotReady { .. })));
    }

    #[test]
    fn test_insufficient_history() {
        let mut scorer = SequenceScorer::new(Variant::Mega645, test_config());
        let draws = make_test_draws(Variant::Mega645, 10);
        let err = scorer.train(&draws).unwrap_err();
        assert!(matches!(err, Error::InsufficientHistory { needed: 13, available: 10 }));
    }

    #[test]
    fn test_singular_readout_is_a_training_error() {
        let v = Variant::Mega645;
        let draws = make_test_draws(v, 30);
        let mut scorer = SequenceScorer::new(v, EsnConfig { ridge_lambda: -1e6, ..test_config() });
        let err = scorer.train(&draws).unwrap_err();
        assert!(matches!(err, Error::Training { .. }), "unexpected error: {err}");
        assert!(err.is_recoverable());
        assert!(!scorer.is_ready());
    }

    #[test]
    fn test_train_score_save_load() {
        let v = Variant::Power655;
        let draws = make_test_draws(v, 40);
        let mut scorer = SequenceScorer::new(v, test_config());
        let metrics = scorer.train(&draws).unwrap();
        assert_eq!(metrics["train_windows"] + metrics["val_windows"], 32.0);

        let map = scorer.score(&draws).unwrap();
        assert!(validate_scores(&map, v.main_range()));
        assert!(map.values().iter().all(|&s| s <= 1.0));

        let bytes = scorer.save().unwrap();
        let mut restored = SequenceScorer::new(v, EsnConfig::default());
        restored.load(&bytes).unwrap();
        assert_eq!(restored.score(&draws).unwrap(), map);
    }

    #[test]
    fn test_load_rejects_other_variant() {
        let draws = make_test_draws(Variant::Mega645, 30);
        let mut scorer = SequenceScorer::new(Variant::Mega645, test_config());
        scorer.train(&draws).unwrap();
        let bytes = scorer.save().unwrap();

        let mut other = SequenceScorer::new(Variant::Lotto535, test_config());
        assert!(matches!(other.load(&bytes), Err(Error::Artifact { .. })));
        assert!(!other.is_ready());
    }
}
