use vietlott_db::models::{Draw, NumberRange, Pool};

use super::ScoreMap;
use crate::config::FrequencyConfig;

/// Recency-weighted appearance counts over a trailing window.
pub struct FrequencyAnalyzer {
    window: usize,
    decay: f64,
}

impl FrequencyAnalyzer {
    pub fn new(window: usize, decay: f64) -> Self {
        Self { window, decay }
    }

    pub fn from_config(config: &FrequencyConfig) -> Self {
        Self::new(config.window, config.recency_decay)
    }

    /// score(n) = Σ decay^i over the window draws containing n (i = 0 for the
    /// most recent), max-normalized. Empty history gives 1.0 everywhere.
    /// `draws` are newest first.
    pub fn scores(&self, draws: &[Draw], pool: Pool, range: NumberRange) -> ScoreMap {
        if draws.is_empty() {
            return ScoreMap::uniform(range, 1.0);
        }
        let mut raw = vec![0.0f64; range.size()];
        let mut weight = 1.0;
        for draw in draws.iter().take(self.window) {
            for idx in pool.numbers_from(draw).iter().filter_map(|&n| range.index_of(n)) {
                raw[idx] += weight;
            }
            weight *= self.decay;
        }
        ScoreMap::from_vec(range, raw).max_normalized()
    }

    pub fn hot_numbers(&self, draws: &[Draw], pool: Pool, range: NumberRange, k: usize) -> Vec<u8> {
        self.scores(draws, pool, range).top(k)
    }

    pub fn cold_numbers(&self, draws: &[Draw], pool: Pool, range: NumberRange, k: usize) -> Vec<u8> {
        self.scores(draws, pool, range).bottom(k)
    }
}
