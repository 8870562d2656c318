use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive range of playable numbers, e.g. 1..=55.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumberRange {
    pub lo: u8,
    pub hi: u8,
}

impl NumberRange {
    pub const fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub fn size(&self) -> usize {
        (self.hi - self.lo) as usize + 1
    }

    pub fn contains(&self, n: u8) -> bool {
        n >= self.lo && n <= self.hi
    }

    pub fn iter(&self) -> RangeInclusive<u8> {
        self.lo..=self.hi
    }

    pub fn index_of(&self, n: u8) -> Option<usize> {
        if self.contains(n) {
            Some((n - self.lo) as usize)
        } else {
            None
        }
    }

    pub fn number_at(&self, idx: usize) -> u8 {
        self.lo + idx as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    #[serde(rename = "power_655")]
    Power655,
    #[serde(rename = "mega_645")]
    Mega645,
    #[serde(rename = "lotto_535")]
    Lotto535,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Power655, Variant::Mega645, Variant::Lotto535];

    pub fn key(&self) -> &'static str {
        match self {
            Variant::Power655 => "power_655",
            Variant::Mega645 => "mega_645",
            Variant::Lotto535 => "lotto_535",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Variant::Power655 => "Power 6/55",
            Variant::Mega645 => "Mega 6/45",
            Variant::Lotto535 => "Lotto 5/35",
        }
    }

    pub fn main_range(&self) -> NumberRange {
        match self {
            Variant::Power655 => NumberRange::new(1, 55),
            Variant::Mega645 => NumberRange::new(1, 45),
            Variant::Lotto535 => NumberRange::new(1, 35),
        }
    }

    pub fn pick_count(&self) -> usize {
        match self {
            Variant::Power655 | Variant::Mega645 => 6,
            Variant::Lotto535 => 5,
        }
    }

    /// Range of the bonus/special ball, if the game draws one.
    pub fn special_range(&self) -> Option<NumberRange> {
        match self {
            Variant::Power655 => Some(NumberRange::new(1, 55)),
            Variant::Mega645 => None,
            Variant::Lotto535 => Some(NumberRange::new(1, 12)),
        }
    }

    /// True when the player chooses the special number on the ticket.
    /// Power 6/55's bonus ball comes out of the main pool and is matched
    /// against the player's main numbers instead.
    pub fn special_is_picked(&self) -> bool {
        matches!(self, Variant::Lotto535)
    }

    pub fn sessions(&self) -> &'static [Session] {
        match self {
            Variant::Lotto535 => &[Session::Am, Session::Pm],
            _ => &[],
        }
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions().is_empty()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "power_655" | "power655" | "655" => Ok(Variant::Power655),
            "mega_645" | "mega645" | "645" => Ok(Variant::Mega645),
            "lotto_535" | "lotto535" | "535" => Ok(Variant::Lotto535),
            other => Err(anyhow!("Unknown lottery variant: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Session {
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "PM")]
    Pm,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Am => "AM",
            Session::Pm => "PM",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Session {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AM" => Ok(Session::Am),
            "PM" => Ok(Session::Pm),
            other => Err(anyhow!("Unknown draw session: '{other}'")),
        }
    }
}

/// Which ball pool of a draw a model looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Main,
    Special,
}

impl Pool {
    pub fn range(&self, variant: Variant) -> Option<NumberRange> {
        match self {
            Pool::Main => Some(variant.main_range()),
            Pool::Special => variant.special_range(),
        }
    }

    pub fn pick_count(&self, variant: Variant) -> usize {
        match self {
            Pool::Main => variant.pick_count(),
            Pool::Special => usize::from(variant.special_range().is_some()),
        }
    }

    pub fn numbers_from<'a>(&self, draw: &'a Draw) -> &'a [u8] {
        match self {
            Pool::Main => &draw.numbers,
            Pool::Special => draw.special.as_slice(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    pub variant: Variant,
    pub draw_id: String,
    pub draw_date: NaiveDate,
    pub session: Option<Session>,
    pub numbers: Vec<u8>,
    pub special: Option<u8>,
    pub jackpot_amount: Option<i64>,
}

pub fn validate_draw(draw: &Draw) -> Result<()> {
    let variant = draw.variant;
    let range = variant.main_range();

    if draw.draw_id.trim().is_empty() {
        bail!("{}: empty draw id", variant.label());
    }
    if draw.numbers.len() != variant.pick_count() {
        bail!(
            "{} draw {}: expected {} numbers, got {}",
            variant.label(),
            draw.draw_id,
            variant.pick_count(),
            draw.numbers.len()
        );
    }
    for &n in &draw.numbers {
        if !range.contains(n) {
            bail!(
                "{} draw {}: number {} out of range ({}-{})",
                variant.label(),
                draw.draw_id,
                n,
                range.lo,
                range.hi
            );
        }
    }
    for i in 0..draw.numbers.len() {
        for j in (i + 1)..draw.numbers.len() {
            if draw.numbers[i] == draw.numbers[j] {
                bail!("{} draw {}: duplicate number {}", variant.label(), draw.draw_id, draw.numbers[i]);
            }
        }
    }

    match (variant.special_range(), draw.special) {
        (None, Some(s)) => bail!("{} draw {}: unexpected special number {}", variant.label(), draw.draw_id, s),
        (Some(sr), Some(s)) => {
            if !sr.contains(s) {
                bail!(
                    "{} draw {}: special {} out of range ({}-{})",
                    variant.label(),
                    draw.draw_id,
                    s,
                    sr.lo,
                    sr.hi
                );
            }
            if draw.numbers.contains(&s) {
                bail!("{} draw {}: special {} duplicates a main number", variant.label(), draw.draw_id, s);
            }
        }
        _ => {}
    }

    match (variant.has_sessions(), draw.session) {
        (true, None) => bail!("{} draw {}: missing session", variant.label(), draw.draw_id),
        (false, Some(s)) => bail!("{} draw {}: unexpected session {}", variant.label(), draw.draw_id, s),
        _ => {}
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Active,
    Completed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Active => "active",
            CycleStatus::Completed => "completed",
        }
    }
}

impl FromStr for CycleStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(CycleStatus::Active),
            "completed" => Ok(CycleStatus::Completed),
            other => Err(anyhow!("Unknown cycle status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionCycle {
    pub id: i64,
    pub variant: Variant,
    pub cycle_number: u32,
    pub status: CycleStatus,
    pub draws_tracked: u32,
    pub max_draws: u32,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PredictionCycle {
    pub fn is_active(&self) -> bool {
        self.status == CycleStatus::Active
    }

    pub fn is_complete(&self) -> bool {
        self.status == CycleStatus::Completed || self.draws_tracked >= self.max_draws
    }
}

#[derive(Debug, Clone)]
pub struct NewCycle {
    pub variant: Variant,
    pub cycle_number: u32,
    pub max_draws: u32,
    pub model_version: String,
}

/// Blending coefficients for the sequence, secondary (feature + transition)
/// and statistical signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub sequence: f64,
    pub secondary: f64,
    pub statistical: f64,
}

impl EnsembleWeights {
    pub fn new(sequence: f64, secondary: f64, statistical: f64) -> Self {
        Self { sequence, secondary, statistical }
    }

    pub fn total(&self) -> f64 {
        self.sequence + self.secondary + self.statistical
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.sequence, self.secondary, self.statistical]
    }

    pub fn from_array(w: [f64; 3]) -> Self {
        Self::new(w[0], w[1], w[2])
    }
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self::new(0.40, 0.35, 0.25)
    }
}

impl fmt::Display for EnsembleWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq={:.3} secondary={:.3} stat={:.3}",
            self.sequence, self.secondary, self.statistical
        )
    }
}

#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub cycle_id: i64,
    pub variant: Variant,
    pub numbers: Vec<u8>,
    pub special: Option<u8>,
    pub model_version: String,
    pub weights: EnsembleWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub cycle_id: i64,
    pub variant: Variant,
    pub numbers: Vec<u8>,
    pub special: Option<u8>,
    pub model_version: String,
    pub weights: EnsembleWeights,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrizeTier {
    Jackpot,
    #[serde(rename = "JACKPOT_1")]
    Jackpot1,
    #[serde(rename = "JACKPOT_2")]
    Jackpot2,
    #[serde(rename = "PRIZE_1")]
    Prize1,
    #[serde(rename = "PRIZE_2")]
    Prize2,
    #[serde(rename = "PRIZE_3")]
    Prize3,
    #[serde(rename = "PRIZE_4")]
    Prize4,
    Consolation,
    NoPrize,
}

impl PrizeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrizeTier::Jackpot => "JACKPOT",
            PrizeTier::Jackpot1 => "JACKPOT_1",
            PrizeTier::Jackpot2 => "JACKPOT_2",
            PrizeTier::Prize1 => "PRIZE_1",
            PrizeTier::Prize2 => "PRIZE_2",
            PrizeTier::Prize3 => "PRIZE_3",
            PrizeTier::Prize4 => "PRIZE_4",
            PrizeTier::Consolation => "CONSOLATION",
            PrizeTier::NoPrize => "NO_PRIZE",
        }
    }

    pub fn is_winning(&self) -> bool {
        *self != PrizeTier::NoPrize
    }
}

impl fmt::Display for PrizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrizeTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let tier = match s {
            "JACKPOT" => PrizeTier::Jackpot,
            "JACKPOT_1" => PrizeTier::Jackpot1,
            "JACKPOT_2" => PrizeTier::Jackpot2,
            "PRIZE_1" => PrizeTier::Prize1,
            "PRIZE_2" => PrizeTier::Prize2,
            "PRIZE_3" => PrizeTier::Prize3,
            "PRIZE_4" => PrizeTier::Prize4,
            "CONSOLATION" => PrizeTier::Consolation,
            "NO_PRIZE" => PrizeTier::NoPrize,
            other => bail!("Unknown prize tier: '{other}'"),
        };
        Ok(tier)
    }
}

/// One comparison of a cycle's prediction against one real draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub cycle_id: i64,
    pub variant: Variant,
    pub draw_id: String,
    pub session: Option<Session>,
    pub draw_date: NaiveDate,
    pub draw_number: u32,
    pub predicted: Vec<u8>,
    pub actual: Vec<u8>,
    pub predicted_special: Option<u8>,
    pub actual_special: Option<u8>,
    pub matched: Vec<u8>,
    pub matched_count: u32,
    pub special_matched: bool,
    pub prize_tier: PrizeTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Triggered,
    Skipped,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Triggered => "triggered",
            TrainingStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for TrainingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "triggered" => Ok(TrainingStatus::Triggered),
            "skipped" => Ok(TrainingStatus::Skipped),
            other => Err(anyhow!("Unknown training status: '{other}'")),
        }
    }
}

/// Audit entry written every time a completed cycle is evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub variant: Variant,
    pub cycle_id: i64,
    pub reason: String,
    pub weights_before: EnsembleWeights,
    pub weights_after: Option<EnsembleWeights>,
    pub hit_3plus: u32,
    pub hit_4plus: u32,
    pub max_match: u32,
    pub status: TrainingStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(variant: Variant, numbers: Vec<u8>, special: Option<u8>, session: Option<Session>) -> Draw {
        Draw {
            variant,
            draw_id: "01234".to_string(),
            draw_date: NaiveDate::from_ymd_opt(2024, 2, 21).unwrap(),
            session,
            numbers,
            special,
            jackpot_amount: None,
        }
    }

    #[test]
    fn test_validate_draw_ok() {
        assert!(validate_draw(&draw(Variant::Power655, vec![5, 14, 22, 33, 41, 52], Some(44), None)).is_ok());
        assert!(validate_draw(&draw(Variant::Mega645, vec![1, 2, 3, 4, 5, 45], None, None)).is_ok());
        assert!(validate_draw(&draw(Variant::Lotto535, vec![1, 7, 19, 28, 35], Some(9), Some(Session::Am))).is_ok());
    }

    #[test]
    fn test_validate_draw_wrong_cardinality() {
        assert!(validate_draw(&draw(Variant::Mega645, vec![1, 2, 3, 4, 5], None, None)).is_err());
        assert!(validate_draw(&draw(Variant::Lotto535, vec![1, 2, 3, 4, 5, 6], Some(1), Some(Session::Pm))).is_err());
    }

    #[test]
    fn test_validate_draw_out_of_range() {
        assert!(validate_draw(&draw(Variant::Mega645, vec![0, 2, 3, 4, 5, 6], None, None)).is_err());
        assert!(validate_draw(&draw(Variant::Mega645, vec![1, 2, 3, 4, 5, 46], None, None)).is_err());
        assert!(validate_draw(&draw(Variant::Lotto535, vec![1, 2, 3, 4, 5], Some(13), Some(Session::Am))).is_err());
    }

    #[test]
    fn test_validate_draw_duplicates() {
        assert!(validate_draw(&draw(Variant::Mega645, vec![1, 1, 3, 4, 5, 6], None, None)).is_err());
        assert!(validate_draw(&draw(Variant::Power655, vec![5, 14, 22, 33, 41, 52], Some(52), None)).is_err());
    }

    #[test]
    fn test_validate_draw_special_rules() {
        assert!(validate_draw(&draw(Variant::Mega645, vec![1, 2, 3, 4, 5, 6], Some(7), None)).is_err());
        assert!(validate_draw(&draw(Variant::Lotto535, vec![1, 2, 3, 4, 5], Some(12), Some(Session::Am))).is_ok());
        // the special never repeats a main number, whichever pool it comes from
        assert!(validate_draw(&draw(Variant::Lotto535, vec![1, 2, 3, 4, 5], Some(3), Some(Session::Am))).is_err());
        assert!(validate_draw(&draw(Variant::Power655, vec![5, 14, 22, 33, 41, 52], Some(5), None)).is_err());
    }

    #[test]
    fn test_validate_draw_sessions() {
        assert!(validate_draw(&draw(Variant::Lotto535, vec![1, 2, 3, 4, 5], Some(6), None)).is_err());
        assert!(validate_draw(&draw(Variant::Mega645, vec![1, 2, 3, 4, 5, 6], None, Some(Session::Am))).is_err());
    }

    #[test]
    fn test_number_range() {
        let r = Variant::Power655.main_range();
        assert_eq!(r.size(), 55);
        assert_eq!(r.index_of(1), Some(0));
        assert_eq!(r.index_of(55), Some(54));
        assert_eq!(r.index_of(56), None);
        assert_eq!(r.number_at(10), 11);
    }

    #[test]
    fn test_pool_numbers_from() {
        let d = draw(Variant::Lotto535, vec![1, 7, 19, 28, 35], Some(9), Some(Session::Pm));
        assert_eq!(Pool::Main.numbers_from(&d), &[1, 7, 19, 28, 35]);
        assert_eq!(Pool::Special.numbers_from(&d), &[9]);
        assert_eq!(Pool::Special.range(Variant::Mega645), None);
        assert_eq!(Pool::Special.pick_count(Variant::Lotto535), 1);
    }

    #[test]
    fn test_variant_parse_roundtrip() {
        for v in Variant::ALL {
            assert_eq!(v.key().parse::<Variant>().unwrap(), v);
        }
        assert!("keno".parse::<Variant>().is_err());
    }

    #[test]
    fn test_prize_tier_parse_roundtrip() {
        for tier in [
            PrizeTier::Jackpot,
            PrizeTier::Jackpot1,
            PrizeTier::Jackpot2,
            PrizeTier::Prize1,
            PrizeTier::Prize2,
            PrizeTier::Prize3,
            PrizeTier::Prize4,
            PrizeTier::Consolation,
            PrizeTier::NoPrize,
        ] {
            assert_eq!(tier.as_str().parse::<PrizeTier>().unwrap(), tier);
        }
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((EnsembleWeights::default().total() - 1.0).abs() < 1e-12);
    }
}
