use ndarray::Array1;
use vietlott_db::models::{Draw, NumberRange};

use crate::config::Encoding;

/// Encode a draw's main numbers as a reservoir input.
/// - OneHot: range-sized, slot (n - lo) set to 1.0
/// - Normalized: pick_count slots, sorted numbers / hi
pub fn encode_draw(draw: &Draw, range: NumberRange, pick_count: usize, encoding: Encoding) -> Array1<f64> {
    match encoding {
        Encoding::OneHot => encode_target(draw, range),
        Encoding::Normalized => {
            let mut numbers = draw.numbers.clone();
            numbers.sort_unstable();
            let mut v = Array1::zeros(pick_count);
            for (slot, &n) in v.iter_mut().zip(numbers.iter()) {
                *slot = n as f64 / range.hi as f64;
            }
            v
        }
    }
}

/// Input used to pad a history shorter than the sequence length.
pub fn empty_input(range: NumberRange, pick_count: usize, encoding: Encoding) -> Array1<f64> {
    Array1::zeros(encoding.input_dim(range, pick_count))
}

/// Multi-hot target over the range; numbers outside it are ignored.
pub fn encode_target(draw: &Draw, range: NumberRange) -> Array1<f64> {
    let mut v = Array1::zeros(range.size());
    for idx in draw.numbers.iter().filter_map(|&n| range.index_of(n)) {
        v[idx] = 1.0;
    }
    v
}

/// Trailing `length` inputs ending at `end` (exclusive) over a chronological
/// slice, front-padded with empty inputs.
pub fn window_inputs(
    chrono: &[&Draw],
    end: usize,
    length: usize,
    range: NumberRange,
    pick_count: usize,
    encoding: Encoding,
) -> Vec<Array1<f64>> {
    let start = end.saturating_sub(length);
    let pad = length - (end - start);
    let mut inputs = Vec::with_capacity(length);
    for _ in 0..pad {
        inputs.push(empty_input(range, pick_count, encoding));
    }
    for draw in &chrono[start..end] {
        inputs.push(encode_draw(draw, range, pick_count, encoding));
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use vietlott_db::models::Variant;

    fn test_draw(numbers: Vec<u8>) -> Draw {
        Draw {
            variant: Variant::Mega645,
            draw_id: "00001".to_string(),
            draw_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            session: None,
            numbers,
            special: None,
            jackpot_amount: None,
        }
    }

    #[test]
    fn test_onehot() {
        let range = NumberRange::new(1, 45);
        let v = encode_draw(&test_draw(vec![45, 3, 15, 27, 38, 44]), range, 6, Encoding::OneHot);
        assert_eq!(v.len(), 45);
        assert_eq!(v.sum(), 6.0);
        assert_eq!(v[2], 1.0); // 3
        assert_eq!(v[44], 1.0); // 45
        assert_eq!(v[0], 0.0);
    }

    #[test]
    fn test_normalized_sorted() {
        let range = NumberRange::new(1, 45);
        let v = encode_draw(&test_draw(vec![45, 3, 15, 27, 38, 44]), range, 6, Encoding::Normalized);
        assert_eq!(v.len(), 6);
        assert!((v[0] - 3.0 / 45.0).abs() < 1e-12);
        assert!((v[5] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_front_padding() {
        let range = NumberRange::new(1, 45);
        let a = test_draw(vec![1, 2, 3, 4, 5, 6]);
        let b = test_draw(vec![7, 8, 9, 10, 11, 12]);
        let chrono = vec![&a, &b];
        let inputs = window_inputs(&chrono, 2, 4, range, 6, Encoding::OneHot);
        assert_eq!(inputs.len(), 4);
        assert_eq!(inputs[0].sum(), 0.0);
        assert_eq!(inputs[1].sum(), 0.0);
        assert_eq!(inputs[2][0], 1.0);
        assert_eq!(inputs[3][6], 1.0);

        let trailing = window_inputs(&chrono, 2, 1, range, 6, Encoding::OneHot);
        assert_eq!(trailing.len(), 1);
        assert_eq!(trailing[0][6], 1.0);
    }
}
