use vietlott_db::models::EnsembleWeights;

use crate::config::WeightBand;

const TOLERANCE: f64 = 1e-12;

/// Project `weights` onto {w : band.min <= w_i <= band.max, Σ w = 1}.
///
/// Clamps into the band and renormalizes; any weight pushed back out of the
/// band is pinned to the violated edge and the remainder spread over the
/// free weights in proportion, until all three fit. Non-finite inputs count
/// as the band minimum. Never fails.
pub fn normalize_weights(weights: EnsembleWeights, band: WeightBand) -> EnsembleWeights {
    let mut w = weights.to_array().map(|v| if v.is_finite() { v.clamp(band.min, band.max) } else { band.min });

    let total: f64 = w.iter().sum();
    if total > 0.0 {
        for v in &mut w {
            *v /= total;
        }
    } else {
        w = [1.0 / 3.0; 3];
    }

    let mut pinned = [false; 3];
    for _ in 0..w.len() {
        let mut changed = false;
        for i in 0..w.len() {
            if pinned[i] {
                continue;
            }
            if w[i] > band.max + TOLERANCE {
                w[i] = band.max;
                pinned[i] = true;
                changed = true;
            } else if w[i] < band.min - TOLERANCE {
                w[i] = band.min;
                pinned[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let fixed: f64 = (0..3).filter(|&i| pinned[i]).map(|i| w[i]).sum();
        let free: Vec<usize> = (0..3).filter(|&i| !pinned[i]).collect();
        if free.is_empty() {
            break;
        }
        let remaining = (1.0 - fixed).max(0.0);
        let free_total: f64 = free.iter().map(|&i| w[i]).sum();
        for &i in &free {
            w[i] = if free_total > 0.0 {
                w[i] / free_total * remaining
            } else {
                remaining / free.len() as f64
            };
        }
    }

    EnsembleWeights::from_array(w)
}

/// Move `step` from the sequence weight to the secondary weight, then project.
pub fn shift_toward_secondary(weights: EnsembleWeights, step: f64, band: WeightBand) -> EnsembleWeights {
    let shifted = EnsembleWeights::new(weights.sequence - step, weights.secondary + step, weights.statistical);
    normalize_weights(shifted, band)
}
