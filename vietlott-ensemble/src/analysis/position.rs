use vietlott_db::models::{Draw, NumberRange};

use super::ScoreMap;
use crate::config::Zone;
use crate::error::{Error, Result};

/// Keeps picks spread across the low/mid/high bands of the range.
#[derive(Debug, Clone)]
pub struct PositionBiasAnalyzer {
    range: NumberRange,
    zones: Vec<Zone>,
    epsilon: f64,
}

impl PositionBiasAnalyzer {
    /// Zones must partition `range` exactly: no gaps, no overlaps.
    pub fn new(range: NumberRange, zones: Vec<Zone>, epsilon: f64) -> Result<Self> {
        if zones.is_empty() {
            return Err(Error::InvalidRecord("at least one zone is required".to_string()));
        }
        for z in &zones {
            if z.lo > z.hi {
                return Err(Error::InvalidRecord(format!("zone {} is empty ({}-{})", z.name, z.lo, z.hi)));
            }
            if !range.contains(z.lo) || !range.contains(z.hi) {
                return Err(Error::InvalidRecord(format!(
                    "zone {} ({}-{}) lies outside {}-{}",
                    z.name, z.lo, z.hi, range.lo, range.hi
                )));
            }
        }

        let mut sorted: Vec<&Zone> = zones.iter().collect();
        sorted.sort_by_key(|z| z.lo);
        let mut next = range.lo as u16;
        for z in &sorted {
            if (z.lo as u16) < next {
                return Err(Error::InvalidRecord(format!("zone {} overlaps its neighbour at {}", z.name, z.lo)));
            }
            if (z.lo as u16) > next {
                return Err(Error::InvalidRecord(format!("zones leave {}-{} uncovered", next, z.lo - 1)));
            }
            next = z.hi as u16 + 1;
        }
        if next != range.hi as u16 + 1 {
            return Err(Error::InvalidRecord(format!("zones leave {}-{} uncovered", next, range.hi)));
        }

        Ok(Self { range, zones, epsilon })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Index of the zone holding `n`, in configuration order.
    pub fn zone_of(&self, n: u8) -> Option<usize> {
        self.zones.iter().position(|z| z.contains(n))
    }

    /// Fraction of historical main picks per zone; uniform without picks.
    pub fn zone_distribution(&self, draws: &[Draw]) -> Vec<f64> {
        let mut counts = vec![0usize; self.zones.len()];
        for n in draws.iter().flat_map(|d| d.numbers.iter().copied()) {
            if let Some(z) = self.zone_of(n) {
                counts[z] += 1;
            }
        }
        let total: usize = counts.iter().sum();
        if total == 0 {
            return vec![1.0 / self.zones.len() as f64; self.zones.len()];
        }
        counts.iter().map(|&c| c as f64 / total as f64).collect()
    }

    /// Under-represented zones score higher: max(0, 1/zones − fraction) + ε.
    pub fn scores(&self, draws: &[Draw]) -> ScoreMap {
        let dist = self.zone_distribution(draws);
        let target = 1.0 / self.zones.len() as f64;
        let raw: Vec<f64> = self
            .range
            .iter()
            .map(|n| match self.zone_of(n) {
                Some(z) => (target - dist[z]).max(0.0) + self.epsilon,
                None => self.epsilon,
            })
            .collect();
        ScoreMap::from_vec(self.range, raw).max_normalized()
    }

    /// Choose `n` numbers from ranked `candidates` (best first), giving each
    /// zone its share before back-filling in ranked order. Result is sorted.
    pub fn pick_balanced(&self, candidates: &[u8], n: usize) -> Result<Vec<u8>> {
        let mut distinct: Vec<u8> = Vec::with_capacity(candidates.len());
        for &c in candidates {
            if self.range.contains(c) && !distinct.contains(&c) {
                distinct.push(c);
            }
        }
        if distinct.len() < n {
            return Err(Error::InsufficientCandidates { needed: n, available: distinct.len() });
        }

        let zone_count = self.zones.len();
        let base = n / zone_count;
        let remainder = n % zone_count;

        let mut selected: Vec<u8> = Vec::with_capacity(n);
        for (zi, _) in self.zones.iter().enumerate() {
            let quota = base + usize::from(zi < remainder);
            let picks = distinct.iter().copied().filter(|&c| self.zone_of(c) == Some(zi)).take(quota);
            selected.extend(picks);
        }
        for &c in &distinct {
            if selected.len() >= n {
                break;
            }
            if !selected.contains(&c) {
                selected.push(c);
            }
        }
        selected.truncate(n);
        selected.sort_unstable();
        Ok(selected)
    }
}
