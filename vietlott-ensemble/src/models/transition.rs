use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use vietlott_db::models::{Draw, NumberRange};

use super::{Scorer, TRANSITION};
use crate::analysis::ScoreMap;
use crate::error::{Error, Result};

pub const TABLE_VERSION: u32 = 1;

type StateKey = Vec<u8>;
type Counts = BTreeMap<u8, u32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StateEntry {
    key: StateKey,
    counts: Counts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TransitionTable {
    version: u32,
    lo: u8,
    hi: u8,
    smoothing: f64,
    states: Vec<StateEntry>,
}

/// Order-1 Markov chain: the exact set of the previous draw's numbers
/// predicts what shows up in the next one.
pub struct TransitionModel {
    range: NumberRange,
    smoothing: f64,
    table: Option<BTreeMap<StateKey, Counts>>,
}

fn state_key(numbers: &[u8]) -> StateKey {
    let mut key = numbers.to_vec();
    key.sort_unstable();
    key
}

impl TransitionModel {
    pub fn new(range: NumberRange, smoothing: f64) -> Self {
        Self { range, smoothing, table: None }
    }

    pub fn state_count(&self) -> usize {
        self.table.as_ref().map_or(0, |t| t.len())
    }

    /// Laplace-smoothed P(n | state), summing to 1. Unseen states are uniform.
    pub fn probabilities(&self, previous: &[u8]) -> Result<ScoreMap> {
        let table = self.table.as_ref().ok_or_else(|| Error::not_ready(TRANSITION))?;
        let size = self.range.size();
        let Some(counts) = table.get(&state_key(previous)) else {
            return Ok(ScoreMap::uniform(self.range, 1.0 / size as f64));
        };
        let total: u32 = counts.values().sum();
        let denom = total as f64 + self.smoothing * size as f64;
        if denom <= 0.0 {
            return Ok(ScoreMap::uniform(self.range, 1.0 / size as f64));
        }
        let raw = self
            .range
            .iter()
            .map(|n| (counts.get(&n).copied().unwrap_or(0) as f64 + self.smoothing) / denom)
            .collect();
        Ok(ScoreMap::from_vec(self.range, raw).sum_normalized())
    }
}

impl Scorer for TransitionModel {
    fn name(&self) -> &str {
        TRANSITION
    }

    fn is_ready(&self) -> bool {
        self.table.is_some()
    }

    fn train(&mut self, draws: &[Draw]) -> Result<HashMap<String, f64>> {
        if draws.len() < 2 {
            return Err(Error::InsufficientHistory { needed: 2, available: draws.len() });
        }
        let mut table: BTreeMap<StateKey, Counts> = BTreeMap::new();
        // draws are newest first: draws[t] is followed by draws[t - 1]
        for pair in draws.windows(2) {
            let (next, prev) = (&pair[0], &pair[1]);
            let counts = table.entry(state_key(&prev.numbers)).or_default();
            for &n in next.numbers.iter().filter(|&&n| self.range.contains(n)) {
                *counts.entry(n).or_insert(0) += 1;
            }
        }
        let metrics = HashMap::from([
            ("states".to_string(), table.len() as f64),
            ("transitions".to_string(), (draws.len() - 1) as f64),
        ]);
        self.table = Some(table);
        Ok(metrics)
    }

    fn score(&self, draws: &[Draw]) -> Result<ScoreMap> {
        match draws.first() {
            Some(latest) => self.probabilities(&latest.numbers),
            None => {
                if !self.is_ready() {
                    return Err(Error::not_ready(TRANSITION));
                }
                Ok(ScoreMap::uniform(self.range, 1.0 / self.range.size() as f64))
            }
        }
    }

    fn save(&self) -> Result<Vec<u8>> {
        let table = self.table.as_ref().ok_or_else(|| Error::not_ready(TRANSITION))?;
        let doc = TransitionTable {
            version: TABLE_VERSION,
            lo: self.range.lo,
            hi: self.range.hi,
            smoothing: self.smoothing,
            states: table
                .iter()
                .map(|(key, counts)| StateEntry { key: key.clone(), counts: counts.clone() })
                .collect(),
        };
        serde_json::to_vec(&doc).map_err(|e| Error::artifact(TRANSITION, e))
    }

    fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let doc: TransitionTable = serde_json::from_slice(bytes).map_err(|e| Error::artifact(TRANSITION, e))?;
        if doc.version != TABLE_VERSION {
            return Err(Error::artifact(TRANSITION, format!("unsupported table version {}", doc.version)));
        }
        if NumberRange::new(doc.lo, doc.hi) != self.range {
            return Err(Error::artifact(
                TRANSITION,
                format!("table covers {}-{}, expected {}-{}", doc.lo, doc.hi, self.range.lo, self.range.hi),
            ));
        }
        let mut table = BTreeMap::new();
        for entry in doc.states {
            if entry.counts.keys().any(|&n| !self.range.contains(n)) {
                return Err(Error::artifact(TRANSITION, format!("state {:?} counts numbers out of range", entry.key)));
            }
            table.insert(state_key(&entry.key), entry.counts);
        }
        self.smoothing = doc.smoothing;
        self.table = Some(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{draw_with, make_test_draws};
    use crate::models::validate_scores;
    use vietlott_db::models::Variant;

    fn trained(draws: &[Draw]) -> TransitionModel {
        let mut model = TransitionModel::new(Variant::Mega645.main_range(), 0.01);
        model.train(draws).unwrap();
        model
    }

    #[test]
    fn test_not_ready() {
        let model = TransitionModel::new(Variant::Mega645.main_range(), 0.01);
        assert!(matches!(model.score(&make_test_draws(Variant::Mega645, 3)), Err(Error::ModelNotReady { .. })));
        assert!(model.save().is_err());
    }

    #[test]
    fn test_probabilities_follow_counts() {
        let v = Variant::Mega645;
        // newest first: A -> B, then B -> A, then A -> B again
        let a = [1, 2, 3, 4, 5, 6];
        let b = [10, 11, 12, 13, 14, 15];
        let draws = vec![
            draw_with(v, "4", &b, None),
            draw_with(v, "3", &a, None),
            draw_with(v, "2", &b, None),
            draw_with(v, "1", &a, None),
        ];
        let model = trained(&draws);
        assert_eq!(model.state_count(), 2);

        // state order does not matter
        let probs = model.probabilities(&[6, 5, 4, 3, 2, 1]).unwrap();
        let total: f64 = probs.values().iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        // 2 transitions A -> B put 2 counts on each of b: (2 + 0.01) / (12 + 0.45)
        assert!((probs.get(10).unwrap() - 2.01 / 12.45).abs() < 1e-12);
        assert!((probs.get(1).unwrap() - 0.01 / 12.45).abs() < 1e-12);
        assert_eq!(probs.top(1), vec![10]);
    }

    #[test]
    fn test_unseen_state_uniform() {
        let model = trained(&make_test_draws(Variant::Mega645, 20));
        let probs = model.probabilities(&[40, 41, 42, 43, 44, 45]).unwrap();
        assert!(probs.values().iter().all(|&p| (p - 1.0 / 45.0).abs() < 1e-12));
    }

    #[test]
    fn test_score_uses_latest_draw() {
        let draws = make_test_draws(Variant::Mega645, 30);
        let model = trained(&draws);
        let map = model.score(&draws).unwrap();
        assert!(validate_scores(&map, Variant::Mega645.main_range()));
        assert_eq!(map, model.probabilities(&draws[0].numbers).unwrap());
    }

    #[test]
    fn test_json_roundtrip() {
        let draws = make_test_draws(Variant::Mega645, 50);
        let model = trained(&draws);
        let bytes = model.save().unwrap();

        let mut restored = TransitionModel::new(Variant::Mega645.main_range(), 0.5);
        restored.load(&bytes).unwrap();
        assert_eq!(restored.table, model.table);
        assert_eq!(restored.smoothing, 0.01);
        assert_eq!(restored.save().unwrap(), bytes);

        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["version"], 1);
        assert!(doc["states"][0]["key"].is_array());
    }

    #[test]
    fn test_rejects_unknown_version_and_range() {
        let mut model = TransitionModel::new(Variant::Mega645.main_range(), 0.01);
        let doc = r#"{"version": 2, "lo": 1, "hi": 45, "smoothing": 0.01, "states": []}"#;
        assert!(matches!(model.load(doc.as_bytes()), Err(Error::Artifact { .. })));
        let doc = r#"{"version": 1, "lo": 1, "hi": 55, "smoothing": 0.01, "states": []}"#;
        assert!(matches!(model.load(doc.as_bytes()), Err(Error::Artifact { .. })));
        let doc = r#"{"version": 1, "lo": 1, "hi": 45, "smoothing": 0.01, "states": [{"key": [1, 2], "counts": {"3": 4}}]}"#;
        model.load(doc.as_bytes()).unwrap();
        assert!(model.is_ready());
    }
}
