use vietlott_db::models::{PrizeTier, Variant};

/// Numbers present in both lists, ascending.
pub fn matched_numbers(predicted: &[u8], actual: &[u8]) -> Vec<u8> {
    let mut matched: Vec<u8> = predicted.iter().copied().filter(|n| actual.contains(n)).collect();
    matched.sort_unstable();
    matched.dedup();
    matched
}

/// Power 6/55: the bonus ball is among the predicted main numbers.
/// Lotto 5/35: the predicted special equals the drawn one.
pub fn special_matched(
    variant: Variant,
    predicted: &[u8],
    predicted_special: Option<u8>,
    actual_special: Option<u8>,
) -> bool {
    match (variant, actual_special) {
        (Variant::Power655, Some(bonus)) => predicted.contains(&bonus),
        (Variant::Lotto535, Some(actual)) => predicted_special == Some(actual),
        _ => false,
    }
}

pub fn classify(variant: Variant, matched_count: u32, special: bool) -> PrizeTier {
    match variant {
        Variant::Mega645 => match matched_count {
            6 => PrizeTier::Jackpot,
            5 => PrizeTier::Prize1,
            4 => PrizeTier::Prize2,
            3 => PrizeTier::Prize3,
            _ => PrizeTier::NoPrize,
        },
        Variant::Power655 => match (matched_count, special) {
            (6, _) => PrizeTier::Jackpot1,
            (5, true) => PrizeTier::Jackpot2,
            (5, false) => PrizeTier::Prize1,
            (4, _) => PrizeTier::Prize2,
            (3, _) => PrizeTier::Prize3,
            _ => PrizeTier::NoPrize,
        },
        Variant::Lotto535 => match (matched_count, special) {
            (5, true) => PrizeTier::Jackpot,
            (5, false) => PrizeTier::Prize1,
            (4, true) => PrizeTier::Prize2,
            (4, false) => PrizeTier::Prize3,
            (3, _) => PrizeTier::Prize4,
            (2, true) => PrizeTier::Consolation,
            _ => PrizeTier::NoPrize,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_numbers() {
        assert_eq!(matched_numbers(&[30, 5, 12, 44], &[44, 1, 5, 30, 2, 3]), vec![5, 30, 44]);
        assert!(matched_numbers(&[1, 2], &[3, 4]).is_empty());
    }

    #[test]
    fn test_power_three_match_scenario() {
        let predicted = [5, 14, 22, 33, 41, 52];
        let actual = [5, 9, 22, 30, 41, 49];
        let matched = matched_numbers(&predicted, &actual);
        assert_eq!(matched, vec![5, 22, 41]);
        let special = special_matched(Variant::Power655, &predicted, None, Some(17));
        assert_eq!(classify(Variant::Power655, matched.len() as u32, special), PrizeTier::Prize3);
    }

    #[test]
    fn test_mega_tiers() {
        assert_eq!(classify(Variant::Mega645, 6, false), PrizeTier::Jackpot);
        assert_eq!(classify(Variant::Mega645, 5, false), PrizeTier::Prize1);
        assert_eq!(classify(Variant::Mega645, 3, true), PrizeTier::Prize3);
        assert_eq!(classify(Variant::Mega645, 2, false), PrizeTier::NoPrize);
    }

    #[test]
    fn test_power_tiers() {
        assert_eq!(classify(Variant::Power655, 6, false), PrizeTier::Jackpot1);
        assert_eq!(classify(Variant::Power655, 5, true), PrizeTier::Jackpot2);
        assert_eq!(classify(Variant::Power655, 5, false), PrizeTier::Prize1);
        assert_eq!(classify(Variant::Power655, 4, true), PrizeTier::Prize2);
        assert_eq!(classify(Variant::Power655, 3, false), PrizeTier::Prize3);
        assert_eq!(classify(Variant::Power655, 0, true), PrizeTier::NoPrize);
    }

    #[test]
    fn test_lotto_tiers() {
        assert_eq!(classify(Variant::Lotto535, 5, true), PrizeTier::Jackpot);
        assert_eq!(classify(Variant::Lotto535, 5, false), PrizeTier::Prize1);
        assert_eq!(classify(Variant::Lotto535, 4, true), PrizeTier::Prize2);
        assert_eq!(classify(Variant::Lotto535, 4, false), PrizeTier::Prize3);
        assert_eq!(classify(Variant::Lotto535, 3, true), PrizeTier::Prize4);
        assert_eq!(classify(Variant::Lotto535, 3, false), PrizeTier::Prize4);
        assert_eq!(classify(Variant::Lotto535, 2, true), PrizeTier::Consolation);
        assert_eq!(classify(Variant::Lotto535, 2, false), PrizeTier::NoPrize);
    }

    #[test]
    fn test_special_matched() {
        assert!(special_matched(Variant::Power655, &[1, 2, 3, 4, 5, 40], None, Some(40)));
        assert!(!special_matched(Variant::Power655, &[1, 2, 3, 4, 5, 6], None, Some(40)));
        assert!(special_matched(Variant::Lotto535, &[1, 2, 3, 4, 5], Some(7), Some(7)));
        assert!(!special_matched(Variant::Lotto535, &[7, 2, 3, 4, 5], None, Some(7)));
        assert!(!special_matched(Variant::Mega645, &[1, 2, 3, 4, 5, 6], None, None));
    }
}
