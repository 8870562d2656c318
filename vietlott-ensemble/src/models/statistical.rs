use std::collections::HashMap;

use vietlott_db::models::{Draw, NumberRange, Pool};

use super::{Scorer, STATISTICAL};
use crate::analysis::frequency::FrequencyAnalyzer;
use crate::analysis::gap::GapAnalyzer;
use crate::analysis::position::PositionBiasAnalyzer;
use crate::analysis::ScoreMap;
use crate::config::VariantConfig;
use crate::error::Result;

/// Mean of the frequency, gap and position-balance analyzers. Needs no
/// training and is always ready.
pub struct StatisticalScorer {
    range: NumberRange,
    frequency: FrequencyAnalyzer,
    gap: GapAnalyzer,
    position: PositionBiasAnalyzer,
}

impl StatisticalScorer {
    pub fn new(config: &VariantConfig) -> Result<Self> {
        let range = config.variant.main_range();
        Ok(Self {
            range,
            frequency: FrequencyAnalyzer::from_config(&config.frequency),
            gap: GapAnalyzer::from_config(&config.gap),
            position: PositionBiasAnalyzer::new(range, config.position.zones.clone(), config.position.epsilon)?,
        })
    }

    pub fn position(&self) -> &PositionBiasAnalyzer {
        &self.position
    }

    pub fn frequency(&self) -> &FrequencyAnalyzer {
        &self.frequency
    }

    pub fn gap(&self) -> &GapAnalyzer {
        &self.gap
    }

    pub fn scores(&self, draws: &[Draw]) -> ScoreMap {
        let freq = self.frequency.scores(draws, Pool::Main, self.range);
        let gap = self.gap.scores(draws, Pool::Main, self.range);
        let pos = self.position.scores(draws);
        ScoreMap::mean(self.range, &[&freq, &gap, &pos])
    }
}

impl Scorer for StatisticalScorer {
    fn name(&self) -> &str {
        STATISTICAL
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn train(&mut self, _draws: &[Draw]) -> Result<HashMap<String, f64>> {
        Ok(HashMap::new())
    }

    fn score(&self, draws: &[Draw]) -> Result<ScoreMap> {
        Ok(self.scores(draws))
    }

    fn save(&self) -> Result<Vec<u8>> {
        Ok(b"{}".to_vec())
    }

    fn load(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}
