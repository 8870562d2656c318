use vietlott_db::models::Draw;

use super::{FeatureExtractor, FeatureRow};

/// One row per number in range. `context` is the history strictly older than
/// the draw being described, newest first; `target` supplies the label.
pub(super) fn rows_from_context(fe: &FeatureExtractor, context: &[Draw], target: Option<&Draw>) -> Vec<FeatureRow> {
    fe.range
        .iter()
        .map(|number| {
            let features = compute_features_for_number(fe, number, context);
            let label = match target {
                Some(t) if t.numbers.contains(&number) => 1.0,
                _ => 0.0,
            };
            FeatureRow { number, features, label }
        })
        .collect()
}

fn compute_features_for_number(fe: &FeatureExtractor, number: u8, context: &[Draw]) -> Vec<f64> {
    let window = fe.feature_window;

    let freq = frequency_in_window(number, context, window);

    let absent = (window + 1) as f64;
    let recency = last_seen(number, &context[..window.min(context.len())]).map_or(absent, |i| i as f64);
    let recency_norm = recency / absent;

    // a number missing from the lookback counts as absent as long as recency does
    let lookback = &context[..fe.gap_lookback.min(context.len())];
    let gap = last_seen(number, lookback).map_or(absent, |i| i as f64);
    let mean = mean_gap(number, lookback).unwrap_or(window as f64);
    let gap_delta = if mean > 0.0 { (gap - mean) / mean } else { 0.0 };

    let span = (fe.range.hi - fe.range.lo) as f64;
    let pos_norm = if span > 0.0 { (number - fe.range.lo) as f64 / span } else { 0.0 };

    vec![
        freq,         // 0
        recency_norm, // 1
        gap_delta,    // 2
        pos_norm,     // 3
    ]
}

fn frequency_in_window(number: u8, history: &[Draw], window: usize) -> f64 {
    let w = window.min(history.len());
    if w == 0 {
        return 0.0;
    }
    let count = history[..w].iter().filter(|d| d.numbers.contains(&number)).count();
    count as f64 / w as f64
}

fn last_seen(number: u8, history: &[Draw]) -> Option<usize> {
    history.iter().position(|d| d.numbers.contains(&number))
}

/// Mean distance between consecutive appearances; None with fewer than two.
fn mean_gap(number: u8, history: &[Draw]) -> Option<f64> {
    let seen: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, d)| d.numbers.contains(&number))
        .map(|(i, _)| i)
        .collect();
    if seen.len() < 2 {
        return None;
    }
    let total: usize = seen.windows(2).map(|w| w[1] - w[0]).sum();
    Some(total as f64 / (seen.len() - 1) as f64)
}
