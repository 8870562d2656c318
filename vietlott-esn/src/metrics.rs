use std::cmp::Ordering;

use vietlott_db::models::NumberRange;

/// Indices of the `k` highest scores, ties to the lower index.
pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal).then(a.cmp(&b)));
    indices.truncate(k);
    indices
}

/// Average share of the actual numbers found among the top-k predicted.
/// predictions[i] is indexed by (n - lo).
pub fn hit_rate(predictions: &[Vec<f64>], actuals: &[Vec<u8>], range: NumberRange, top_k: usize) -> f64 {
    let mut total = 0.0;
    let mut counted = 0usize;
    for (pred, actual) in predictions.iter().zip(actuals.iter()) {
        if actual.is_empty() {
            continue;
        }
        let top: Vec<u8> = top_k_indices(pred, top_k).into_iter().map(|i| range.number_at(i)).collect();
        let hits = actual.iter().filter(|n| top.contains(n)).count();
        total += hits as f64 / actual.len() as f64;
        counted += 1;
    }
    if counted == 0 {
        0.0
    } else {
        total / counted as f64
    }
}

/// Expected hit rate of a uniformly random top-k.
pub fn random_baseline(range: NumberRange, top_k: usize) -> f64 {
    (top_k as f64 / range.size() as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_ties_prefer_lower_index() {
        assert_eq!(top_k_indices(&[0.5, 0.9, 0.5, 0.1], 3), vec![1, 0, 2]);
    }

    #[test]
    fn test_perfect_hit_rate() {
        let range = NumberRange::new(1, 10);
        let mut pred = vec![0.0; 10];
        pred[2] = 1.0; // 3
        pred[6] = 0.9; // 7
        let rate = hit_rate(&[pred], &[vec![3, 7]], range, 2);
        assert!((rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_hit_rate() {
        let range = NumberRange::new(1, 10);
        let pred: Vec<f64> = (0..10).map(|i| i as f64).collect(); // top 2 = 10, 9
        let rate = hit_rate(&[pred], &[vec![10, 1]], range, 2);
        assert!((rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_inputs() {
        let range = NumberRange::new(1, 10);
        assert_eq!(hit_rate(&[], &[], range, 3), 0.0);
        assert!((random_baseline(range, 5) - 0.5).abs() < 1e-12);
    }
}
