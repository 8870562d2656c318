use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use vietlott_db::models::{validate_draw, Draw, EnsembleWeights, NewPrediction, Session, Variant};
use vietlott_db::store::ResultsStore;

use crate::artifacts::ArtifactStore;
use crate::config::VariantConfig;
use crate::cycle::retrain::{self, RetrainDecision};
use crate::cycle::{CheckOutcome, CycleManager};
use crate::ensemble::{normalize_weights, EnsembleCombiner};
use crate::error::{Error, Result};
use crate::models::{FeatureScorer, Scorer, SequenceScorer, TransitionModel, FEATURE, SEQUENCE, TRAINABLE, TRANSITION};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

/// Training metrics per model; models that could not train are listed in `skipped`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainReport {
    pub metrics: BTreeMap<String, HashMap<String, f64>>,
    pub skipped: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPrediction {
    pub variant: Variant,
    pub cycle_id: i64,
    pub cycle_number: u32,
    pub numbers: Vec<u8>,
    pub special: Option<u8>,
    pub weights_used: EnsembleWeights,
    pub model_version: String,
    /// Models replaced by their fallback; empty for a prediction read back.
    pub fallbacks: Vec<String>,
    /// False when the cycle already had a prediction and it was returned as is.
    pub is_new: bool,
}

fn blank_scorer(config: &VariantConfig, model: &str) -> Option<Box<dyn Scorer>> {
    let range = config.variant.main_range();
    match model {
        SEQUENCE => Some(Box::new(SequenceScorer::new(config.variant, config.sequence.clone()))),
        FEATURE => Some(Box::new(FeatureScorer::new(range, config.feature.clone()))),
        TRANSITION => Some(Box::new(TransitionModel::new(range, config.transition.smoothing))),
        _ => None,
    }
}

/// The batch phases: ingest, train, generate, check, evaluate.
///
/// Holds no global state; configs default per variant unless registered
/// with `with_config`. Loaded artifacts are kept for the life of the value.
pub struct Pipeline<'a> {
    store: &'a dyn ResultsStore,
    artifacts: &'a dyn ArtifactStore,
    configs: HashMap<Variant, VariantConfig>,
    loaded: RefCell<HashMap<(Variant, &'static str), Arc<dyn Scorer>>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn ResultsStore, artifacts: &'a dyn ArtifactStore) -> Self {
        Self { store, artifacts, configs: HashMap::new(), loaded: RefCell::new(HashMap::new()) }
    }

    pub fn with_config(mut self, config: VariantConfig) -> Self {
        self.configs.insert(config.variant, config);
        self
    }

    pub fn config(&self, variant: Variant) -> VariantConfig {
        self.configs.get(&variant).cloned().unwrap_or_else(|| VariantConfig::for_variant(variant))
    }

    /// Validate and store draws. Invalid draws are logged and counted, the
    /// rest still go in.
    pub fn ingest_draws(&self, draws: &[Draw]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for draw in draws {
            if let Err(e) = validate_draw(draw) {
                warn!("skipping invalid draw: {e}");
                report.invalid += 1;
                continue;
            }
            if self.store.upsert_draw(draw)? {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }
        info!(
            "ingested {} draws: {} new, {} duplicates, {} invalid",
            draws.len(),
            report.inserted,
            report.duplicates,
            report.invalid
        );
        Ok(report)
    }

    fn history(&self, config: &VariantConfig) -> Result<Vec<Draw>> {
        Ok(self.store.recent_draws(config.variant, config.history_limit, None)?)
    }

    /// Train every persisted model on the recent history and write its artifact.
    pub fn train_models(&self, variant: Variant) -> Result<TrainReport> {
        let config = self.config(variant);
        let draws = self.history(&config)?;
        if draws.is_empty() {
            return Err(Error::InsufficientHistory { needed: 2, available: 0 });
        }
        info!("{variant}: training {} models on {} draws", TRAINABLE.len(), draws.len());
        let start = Instant::now();

        let mut scorers: Vec<Box<dyn Scorer>> = TRAINABLE.iter().filter_map(|m| blank_scorer(&config, m)).collect();
        let outcomes: Vec<Result<HashMap<String, f64>>> = scorers.par_iter_mut().map(|s| s.train(&draws)).collect();

        let mut report = TrainReport::default();
        let mut loaded = self.loaded.borrow_mut();
        for ((scorer, outcome), key) in scorers.into_iter().zip(outcomes).zip(TRAINABLE) {
            match outcome {
                Ok(metrics) => {
                    self.artifacts.write(variant, key, &scorer.save()?)?;
                    info!("{variant}: {key} trained and saved");
                    report.metrics.insert(key.to_string(), metrics);
                    loaded.insert((variant, key), Arc::from(scorer));
                }
                Err(e @ (Error::InsufficientHistory { .. } | Error::Training { .. })) => {
                    warn!("{variant}: {key} not trained: {e}");
                    report.skipped.insert(key.to_string(), e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        info!("{variant}: training finished in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }

    /// The memoized scorer, loading its artifact on first use. None when no
    /// usable artifact exists.
    fn scorer(&self, config: &VariantConfig, key: &'static str) -> Option<Arc<dyn Scorer>> {
        let variant = config.variant;
        if let Some(scorer) = self.loaded.borrow().get(&(variant, key)) {
            return Some(Arc::clone(scorer));
        }
        let bytes = match self.artifacts.read(variant, key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("{variant}: no {key} artifact");
                return None;
            }
            Err(e) => {
                warn!("{variant}: cannot read {key} artifact: {e}");
                return None;
            }
        };
        let mut scorer = blank_scorer(config, key)?;
        if let Err(e) = scorer.load(&bytes) {
            warn!("{variant}: ignoring {key} artifact: {e}");
            return None;
        }
        let scorer: Arc<dyn Scorer> = Arc::from(scorer);
        self.loaded.borrow_mut().insert((variant, key), Arc::clone(&scorer));
        Some(scorer)
    }

    fn combiner(&self, config: &VariantConfig) -> Result<EnsembleCombiner> {
        let mut combiner = EnsembleCombiner::new(config)?;
        if let Some(s) = self.scorer(config, SEQUENCE) {
            combiner = combiner.with_sequence(s);
        }
        if let Some(s) = self.scorer(config, FEATURE) {
            combiner = combiner.with_feature(s);
        }
        if let Some(s) = self.scorer(config, TRANSITION) {
            combiner = combiner.with_transition(s);
        }
        if let Some(stored) = self.store.load_weights(config.variant)? {
            combiner.update_weights(stored);
        }
        Ok(combiner)
    }

    /// Predict for the active cycle, opening one if needed. A cycle that
    /// already has a prediction gets it back unchanged.
    pub fn generate_prediction(&self, variant: Variant) -> Result<GeneratedPrediction> {
        let config = self.config(variant);
        let cycle = CycleManager::new(self.store, &config.retrain).get_or_create(variant, &config.model_version)?;

        if let Some(existing) = self.store.prediction_for_cycle(cycle.id)? {
            info!("{variant}: cycle #{} already has a prediction", cycle.cycle_number);
            return Ok(GeneratedPrediction {
                variant,
                cycle_id: cycle.id,
                cycle_number: cycle.cycle_number,
                numbers: existing.numbers,
                special: existing.special,
                weights_used: existing.weights,
                model_version: existing.model_version,
                fallbacks: Vec::new(),
                is_new: false,
            });
        }

        let draws = self.history(&config)?;
        let forecast = self.combiner(&config)?.forecast(&draws)?;
        let prediction = self.store.insert_prediction(
            &NewPrediction {
                cycle_id: cycle.id,
                variant,
                numbers: forecast.numbers.clone(),
                special: forecast.special,
                model_version: config.model_version.clone(),
                weights: forecast.weights,
            },
            Utc::now(),
        )?;
        info!("{variant}: cycle #{} -> {:?}", cycle.cycle_number, prediction.numbers);
        Ok(GeneratedPrediction {
            variant,
            cycle_id: cycle.id,
            cycle_number: cycle.cycle_number,
            numbers: prediction.numbers,
            special: prediction.special,
            weights_used: prediction.weights,
            model_version: prediction.model_version,
            fallbacks: forecast.fallbacks,
            is_new: true,
        })
    }

    pub fn check_result(&self, variant: Variant, draw_id: &str, session: Option<Session>) -> Result<CheckOutcome> {
        let config = self.config(variant);
        CycleManager::new(self.store, &config.retrain).check_result(variant, draw_id, session)
    }

    pub fn evaluate_and_retrain(&self, variant: Variant, cycle_id: i64) -> Result<RetrainDecision> {
        let config = self.config(variant);
        retrain::evaluate_and_retrain(self.store, &config, cycle_id)
    }

    /// Weights the next prediction would use.
    pub fn current_weights(&self, variant: Variant) -> Result<EnsembleWeights> {
        let config = self.config(variant);
        let stored = self.store.load_weights(variant)?.unwrap_or(config.weights);
        Ok(normalize_weights(stored, config.weight_band))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{draw_with, make_test_draws};
    use crate::artifacts::MemoryArtifactStore;
    use vietlott_db::store::SqliteStore;
    use vietlott_esn::EsnConfig;

    fn small_config(variant: Variant) -> VariantConfig {
        let mut config = VariantConfig::for_variant(variant);
        config.sequence = EsnConfig { sequence_length: 8, reservoir_size: 30, ..EsnConfig::default() };
        config.feature.n_trees = 10;
        config.feature.max_depth = 3;
        config.feature.max_training_draws = 30;
        config
    }

    #[test]
    fn test_ingest_counts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        let pipeline = Pipeline::new(&store, &artifacts);

        let mut draws = make_test_draws(Variant::Mega645, 5);
        draws.push(draw_with(Variant::Mega645, "bad", &[1, 2, 3], None));
        draws.push(draws[0].clone());
        let report = pipeline.ingest_draws(&draws).unwrap();
        assert_eq!(report, IngestReport { inserted: 5, duplicates: 1, invalid: 1 });
        assert_eq!(store.count_draws(Variant::Mega645).unwrap(), 5);
    }

    #[test]
    fn test_generate_without_models_falls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        let pipeline = Pipeline::new(&store, &artifacts);
        pipeline.ingest_draws(&make_test_draws(Variant::Mega645, 30)).unwrap();

        let first = pipeline.generate_prediction(Variant::Mega645).unwrap();
        assert!(first.is_new);
        assert_eq!(first.cycle_number, 1);
        assert_eq!(first.numbers.len(), 6);
        assert_eq!(first.fallbacks.len(), 3);
        assert_eq!(first.special, None);

        let again = pipeline.generate_prediction(Variant::Mega645).unwrap();
        assert!(!again.is_new);
        assert_eq!(again.numbers, first.numbers);
        assert_eq!(again.cycle_id, first.cycle_id);
    }

    #[test]
    fn test_generate_without_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        let pipeline = Pipeline::new(&store, &artifacts);
        assert!(matches!(
            pipeline.generate_prediction(Variant::Power655),
            Err(Error::InsufficientHistory { .. })
        ));
        assert!(matches!(pipeline.train_models(Variant::Power655), Err(Error::InsufficientHistory { .. })));
    }

    #[test]
    fn test_failed_model_does_not_abort_training() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        let v = Variant::Mega645;
        let mut config = small_config(v);
        config.sequence.ridge_lambda = -1e6;
        let pipeline = Pipeline::new(&store, &artifacts).with_config(config);
        pipeline.ingest_draws(&make_test_draws(v, 40)).unwrap();

        let report = pipeline.train_models(v).unwrap();
        assert!(report.skipped.contains_key(SEQUENCE));
        assert!(report.metrics.contains_key(FEATURE));
        assert!(report.metrics.contains_key(TRANSITION));
        assert_eq!(artifacts.len(), 2);
    }

    #[test]
    fn test_train_then_generate_uses_artifacts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        let v = Variant::Lotto535;
        let pipeline = Pipeline::new(&store, &artifacts).with_config(small_config(v));
        pipeline.ingest_draws(&make_test_draws(v, 40)).unwrap();

        let report = pipeline.train_models(v).unwrap();
        assert_eq!(report.metrics.len(), 3);
        assert!(report.skipped.is_empty());
        assert_eq!(artifacts.len(), 3);

        // a fresh pipeline reads the artifacts back
        let fresh = Pipeline::new(&store, &artifacts).with_config(small_config(v));
        let pred = fresh.generate_prediction(v).unwrap();
        assert!(pred.fallbacks.is_empty());
        assert_eq!(pred.numbers.len(), 5);
        assert!(pred.special.is_some());
    }

    #[test]
    fn test_short_history_skips_sequence_model() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        let v = Variant::Mega645;
        let pipeline = Pipeline::new(&store, &artifacts).with_config(small_config(v));
        pipeline.ingest_draws(&make_test_draws(v, 8)).unwrap();

        let report = pipeline.train_models(v).unwrap();
        assert!(report.skipped.contains_key(SEQUENCE));
        assert!(report.metrics.contains_key(FEATURE));
        assert!(report.metrics.contains_key(TRANSITION));
    }

    #[test]
    fn test_corrupt_artifact_is_ignored() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        artifacts.write(Variant::Mega645, TRANSITION, b"not json").unwrap();
        let pipeline = Pipeline::new(&store, &artifacts);
        pipeline.ingest_draws(&make_test_draws(Variant::Mega645, 20)).unwrap();
        let pred = pipeline.generate_prediction(Variant::Mega645).unwrap();
        assert!(pred.fallbacks.contains(&TRANSITION.to_string()));
    }

    #[test]
    fn test_full_cycle_and_retrain() {
        let store = SqliteStore::open_in_memory().unwrap();
        let artifacts = MemoryArtifactStore::new();
        let v = Variant::Mega645;
        let pipeline = Pipeline::new(&store, &artifacts);
        pipeline.ingest_draws(&make_test_draws(v, 30)).unwrap();
        let pred = pipeline.generate_prediction(v).unwrap();

        let mut last = None;
        for i in 0..5 {
            let id = format!("new{i}");
            let miss: Vec<u8> = (1..=45).filter(|n| !pred.numbers.contains(n)).take(6).collect();
            pipeline.ingest_draws(&[draw_with(v, &id, &miss, None)]).unwrap();
            last = Some(pipeline.check_result(v, &id, None).unwrap());
        }
        let outcome = last.unwrap();
        assert!(outcome.cycle_completed());
        assert_eq!(outcome.record.matched_count, 0);

        let decision = pipeline.evaluate_and_retrain(v, pred.cycle_id).unwrap();
        assert!(decision.should_retrain);
        assert!((pipeline.current_weights(v).unwrap().sequence - 0.35).abs() < 1e-9);
        let again = pipeline.evaluate_and_retrain(v, pred.cycle_id).unwrap();
        assert!(!again.is_new);
        assert!((pipeline.current_weights(v).unwrap().sequence - 0.35).abs() < 1e-9);

        // the next cycle is short and its prediction uses the shifted weights
        let next = pipeline.generate_prediction(v).unwrap();
        assert_eq!(next.cycle_number, 2);
        assert!((next.weights_used.sequence - 0.35).abs() < 1e-9);
        assert_eq!(store.active_cycle(v).unwrap().unwrap().max_draws, 3);
    }
}
