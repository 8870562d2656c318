pub mod frequency;
pub mod gap;
pub mod position;

use std::cmp::Ordering;

use vietlott_db::models::NumberRange;

/// One score per number of a range, stored at index (n - lo).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMap {
    range: NumberRange,
    scores: Vec<f64>,
}

impl ScoreMap {
    pub fn uniform(range: NumberRange, value: f64) -> Self {
        Self { range, scores: vec![value; range.size()] }
    }

    /// Missing trailing entries are filled with 0.0, extra ones dropped.
    pub fn from_vec(range: NumberRange, mut scores: Vec<f64>) -> Self {
        scores.resize(range.size(), 0.0);
        Self { range, scores }
    }

    pub fn range(&self) -> NumberRange {
        self.range
    }

    pub fn get(&self, n: u8) -> Option<f64> {
        self.range.index_of(n).map(|i| self.scores[i])
    }

    pub fn values(&self) -> &[f64] {
        &self.scores
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.scores.iter().enumerate().map(|(i, &s)| (self.range.number_at(i), s))
    }

    pub fn max(&self) -> f64 {
        self.scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Divide by the maximum; an all-zero (or empty) map is left unchanged.
    pub fn max_normalized(mut self) -> Self {
        let max = self.max();
        if max > 0.0 && max.is_finite() {
            for s in &mut self.scores {
                *s /= max;
            }
        }
        self
    }

    /// Scale so the scores sum to 1; a zero-sum map becomes uniform.
    pub fn sum_normalized(mut self) -> Self {
        let total: f64 = self.scores.iter().sum();
        if total > 0.0 && total.is_finite() {
            for s in &mut self.scores {
                *s /= total;
            }
        } else {
            let u = 1.0 / self.scores.len().max(1) as f64;
            self.scores.fill(u);
        }
        self
    }

    /// Numbers best first; equal scores rank the smaller number first.
    pub fn ranked(&self) -> Vec<u8> {
        let mut idx: Vec<usize> = (0..self.scores.len()).collect();
        idx.sort_by(|&a, &b| {
            self.scores[b]
                .partial_cmp(&self.scores[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        idx.into_iter().map(|i| self.range.number_at(i)).collect()
    }

    pub fn top(&self, k: usize) -> Vec<u8> {
        let mut ranked = self.ranked();
        ranked.truncate(k);
        ranked
    }

    /// Lowest scores first; ties rank the smaller number first.
    pub fn bottom(&self, k: usize) -> Vec<u8> {
        let mut idx: Vec<usize> = (0..self.scores.len()).collect();
        idx.sort_by(|&a, &b| {
            self.scores[a]
                .partial_cmp(&self.scores[b])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        idx.into_iter().take(k).map(|i| self.range.number_at(i)).collect()
    }

    /// Element-wise weighted sum. Every map must cover `range`.
    pub fn weighted_sum(range: NumberRange, parts: &[(f64, &ScoreMap)]) -> Self {
        let mut out = vec![0.0; range.size()];
        for (w, map) in parts {
            for (slot, &s) in out.iter_mut().zip(map.scores.iter()) {
                *slot += w * s;
            }
        }
        Self { range, scores: out }
    }

    pub fn mean(range: NumberRange, maps: &[&ScoreMap]) -> Self {
        if maps.is_empty() {
            return Self::uniform(range, 0.0);
        }
        let w = 1.0 / maps.len() as f64;
        let parts: Vec<(f64, &ScoreMap)> = maps.iter().map(|m| (w, *m)).collect();
        Self::weighted_sum(range, &parts)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, NaiveDate};
    use vietlott_db::models::{Draw, Session, Variant};

    /// Newest first. Draw i (0 = most recent) shifts a fixed pattern by i so
    /// every number of the range appears regularly.
    pub fn make_test_draws(variant: Variant, n: usize) -> Vec<Draw> {
        let range = variant.main_range();
        let picks = variant.pick_count();
        let size = range.size();
        let latest = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        (0..n)
            .map(|i| {
                // a stride of 7 would repeat the same Lotto set on every draw
                let stride = if variant == Variant::Lotto535 { 3 } else { 7 };
                let numbers: Vec<u8> = (0..picks)
                    .map(|k| range.number_at((i * stride + k * (size / picks)) % size))
                    .collect();
                let special = match variant {
                    Variant::Power655 => Some(range.number_at((i * 7 + size - 1) % size)).filter(|s| !numbers.contains(s)),
                    Variant::Lotto535 => (0..12).map(|d| ((i + d) % 12) as u8 + 1).find(|s| !numbers.contains(s)),
                    Variant::Mega645 => None,
                };
                Draw {
                    variant,
                    draw_id: format!("{:05}", n - i),
                    draw_date: latest - Duration::days(i as i64),
                    session: if variant.has_sessions() { Some(Session::Pm) } else { None },
                    numbers,
                    special,
                    jackpot_amount: None,
                }
            })
            .collect()
    }

    pub fn draw_with(variant: Variant, id: &str, numbers: &[u8], special: Option<u8>) -> Draw {
        Draw {
            variant,
            draw_id: id.to_string(),
            draw_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            session: if variant.has_sessions() { Some(Session::Pm) } else { None },
            numbers: numbers.to_vec(),
            special,
            jackpot_amount: None,
        }
    }
}
