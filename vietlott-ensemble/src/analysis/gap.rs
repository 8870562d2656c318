use vietlott_db::models::{Draw, NumberRange, Pool};

use super::ScoreMap;
use crate::config::GapConfig;

/// How long each number has been absent. Higher score = more overdue.
pub struct GapAnalyzer {
    window: usize,
}

impl GapAnalyzer {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn from_config(config: &GapConfig) -> Self {
        Self::new(config.window)
    }

    /// Index (0 = most recent) of each number's latest appearance within the
    /// window; window + 1 when absent.
    pub fn gaps(&self, draws: &[Draw], pool: Pool, range: NumberRange) -> Vec<usize> {
        let absent = self.window + 1;
        let mut gaps = vec![absent; range.size()];
        for (i, draw) in draws.iter().take(self.window).enumerate() {
            for idx in pool.numbers_from(draw).iter().filter_map(|&n| range.index_of(n)) {
                if gaps[idx] == absent {
                    gaps[idx] = i;
                }
            }
        }
        gaps
    }

    /// gap / mean gap, max-normalized. All-zero gaps give 1.0 everywhere.
    pub fn scores(&self, draws: &[Draw], pool: Pool, range: NumberRange) -> ScoreMap {
        let gaps = self.gaps(draws, pool, range);
        let mean = gaps.iter().sum::<usize>() as f64 / gaps.len().max(1) as f64;
        if mean <= 0.0 {
            return ScoreMap::uniform(range, 1.0);
        }
        let raw: Vec<f64> = gaps.iter().map(|&g| g as f64 / mean).collect();
        ScoreMap::from_vec(range, raw).max_normalized()
    }

    pub fn overdue_numbers(&self, draws: &[Draw], pool: Pool, range: NumberRange, k: usize) -> Vec<u8> {
        self.scores(draws, pool, range).top(k)
    }
}
