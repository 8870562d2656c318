use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};

use vietlott_db::models::{Draw, NumberRange};

use super::{Scorer, FEATURE};
use crate::analysis::ScoreMap;
use crate::config::FeatureConfig;
use crate::error::{Error, Result};
use crate::features::{FeatureExtractor, FeatureRow, FEATURE_NAMES};

const ARTIFACT_VERSION: u32 = 1;
const HESS_MIN: f64 = 1e-16;
const PROB_EPS: f64 = 1e-7;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf { value: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, x: &[f64]) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split { feature, threshold, left, right } => {
                if x[*feature] <= *threshold {
                    left.predict(x)
                } else {
                    right.predict(x)
                }
            }
        }
    }

    /// Highest feature index any split of this tree reads.
    fn max_feature(&self) -> Option<usize> {
        match self {
            TreeNode::Leaf { .. } => None,
            TreeNode::Split { feature, left, right, .. } => {
                [Some(*feature), left.max_feature(), right.max_feature()].into_iter().flatten().max()
            }
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Gradient-boosted regression trees on logistic loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedTrees {
    base_margin: f64,
    learning_rate: f64,
    trees: Vec<TreeNode>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a FeatureConfig,
    go_left: Vec<bool>,
}

impl TreeBuilder<'_> {
    fn leaf(&self, g: f64, h: f64) -> TreeNode {
        let denom = h + self.params.lambda;
        let value = if denom > 0.0 { -g / denom } else { 0.0 };
        TreeNode::Leaf { value }
    }

    fn objective(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom > 0.0 {
            g * g / denom
        } else {
            0.0
        }
    }

    /// `sorted[f]` holds the node's rows ordered by feature f.
    fn build(&mut self, sorted: Vec<Vec<usize>>, depth: usize) -> TreeNode {
        let members = &sorted[0];
        let g: f64 = members.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = members.iter().map(|&i| self.hess[i]).sum();
        if depth >= self.params.max_depth || members.len() < 2 {
            return self.leaf(g, h);
        }

        let parent = self.objective(g, h);
        let mut best: Option<(f64, usize, f64)> = None;
        for (f, order) in sorted.iter().enumerate() {
            let (mut gl, mut hl) = (0.0, 0.0);
            for w in order.windows(2) {
                let (cur, next) = (w[0], w[1]);
                gl += self.grad[cur];
                hl += self.hess[cur];
                let (a, b) = (self.x[cur][f], self.x[next][f]);
                if b <= a {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gain = 0.5 * (self.objective(gl, hl) + self.objective(gr, hr) - parent) - self.params.gamma;
                if gain > best.map_or(0.0, |(bg, _, _)| bg) {
                    best = Some((gain, f, (a + b) / 2.0));
                }
            }
        }

        let Some((_, feature, threshold)) = best else {
            return self.leaf(g, h);
        };

        for &i in members {
            self.go_left[i] = self.x[i][feature] <= threshold;
        }
        let (left, right): (Vec<Vec<usize>>, Vec<Vec<usize>>) = sorted
            .iter()
            .map(|order| order.iter().partition::<Vec<usize>, _>(|&&i| self.go_left[i]))
            .unzip();
        drop(sorted);

        TreeNode::Split {
            feature,
            threshold,
            left: Box::new(self.build(left, depth + 1)),
            right: Box::new(self.build(right, depth + 1)),
        }
    }
}

impl BoostedTrees {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &FeatureConfig) -> Self {
        let n = x.len();
        let n_features = x.first().map_or(0, |r| r.len());
        let positive = y.iter().sum::<f64>() / n.max(1) as f64;
        let p0 = positive.clamp(PROB_EPS, 1.0 - PROB_EPS);
        let base_margin = (p0 / (1.0 - p0)).ln();

        let mut model = BoostedTrees {
            base_margin,
            learning_rate: params.learning_rate,
            trees: Vec::with_capacity(params.n_trees),
        };
        if n == 0 || n_features == 0 {
            return model;
        }

        let presorted: Vec<Vec<usize>> = (0..n_features)
            .map(|f| {
                let mut idx: Vec<usize> = (0..n).collect();
                idx.sort_by(|&a, &b| x[a][f].total_cmp(&x[b][f]));
                idx
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut margin = vec![base_margin; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        for round in 0..params.n_trees {
            for i in 0..n {
                let p = sigmoid(margin[i]);
                grad[i] = p - y[i];
                hess[i] = (p * (1.0 - p)).max(HESS_MIN);
            }

            let sorted = if params.subsample < 1.0 {
                let keep: Vec<bool> = (0..n).map(|_| rng.random::<f64>() < params.subsample).collect();
                if keep.iter().any(|&k| k) {
                    presorted
                        .iter()
                        .map(|order| order.iter().copied().filter(|&i| keep[i]).collect())
                        .collect()
                } else {
                    presorted.clone()
                }
            } else {
                presorted.clone()
            };

            let mut builder = TreeBuilder { x, grad: &grad, hess: &hess, params, go_left: vec![false; n] };
            let tree = builder.build(sorted, 0);
            for (m, row) in margin.iter_mut().zip(x) {
                *m += params.learning_rate * tree.predict(row);
            }
            model.trees.push(tree);

            if round % 50 == 0 {
                debug!("boosting round {round}: train log loss {:.5}", log_loss_from_margin(&margin, y));
            }
        }
        model
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let margin = self.base_margin + self.learning_rate * self.trees.iter().map(|t| t.predict(x)).sum::<f64>();
        sigmoid(margin)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

fn log_loss_from_margin(margin: &[f64], y: &[f64]) -> f64 {
    let probs: Vec<f64> = margin.iter().map(|&m| sigmoid(m)).collect();
    log_loss(&probs, y)
}

pub fn log_loss(probs: &[f64], y: &[f64]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let total: f64 = probs
        .iter()
        .zip(y)
        .map(|(&p, &t)| {
            let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / probs.len() as f64
}

#[derive(Serialize, Deserialize)]
struct FeatureArtifact {
    version: u32,
    range: NumberRange,
    features: Vec<String>,
    config: FeatureConfig,
    model: BoostedTrees,
}

/// Gradient-boosted classifier over per-number features.
pub struct FeatureScorer {
    extractor: FeatureExtractor,
    config: FeatureConfig,
    model: Option<BoostedTrees>,
}

impl FeatureScorer {
    pub fn new(range: NumberRange, config: FeatureConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(range, &config),
            config,
            model: None,
        }
    }

    fn split_rows(rows: Vec<FeatureRow>) -> (Vec<Vec<f64>>, Vec<f64>) {
        rows.into_iter().map(|r| (r.features, r.label)).unzip()
    }
}

impl Scorer for FeatureScorer {
    fn name(&self) -> &str {
        FEATURE
    }

    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn train(&mut self, draws: &[Draw]) -> Result<HashMap<String, f64>> {
        if draws.len() < 2 {
            return Err(Error::InsufficientHistory { needed: 2, available: draws.len() });
        }
        let start = Instant::now();
        let per_draw = self.extractor.range().size();
        let rows = self.extractor.training_rows(draws, self.config.max_training_draws);
        let targets = rows.len() / per_draw;

        // newest targets come first; they form the held-out slice
        let val_targets = if targets > 1 && self.config.validation_fraction > 0.0 {
            ((targets as f64 * self.config.validation_fraction).round() as usize).clamp(1, targets - 1)
        } else {
            0
        };
        let (x, y) = Self::split_rows(rows);
        let cut = val_targets * per_draw;

        let mut metrics = HashMap::from([
            ("train_targets".to_string(), (targets - val_targets) as f64),
            ("val_targets".to_string(), val_targets as f64),
        ]);
        if val_targets > 0 {
            let held_out = BoostedTrees::fit(&x[cut..], &y[cut..], &self.config);
            let train_probs: Vec<f64> = x[cut..].iter().map(|r| held_out.predict_proba(r)).collect();
            let val_probs: Vec<f64> = x[..cut].iter().map(|r| held_out.predict_proba(r)).collect();
            metrics.insert("train_log_loss".to_string(), log_loss(&train_probs, &y[cut..]));
            metrics.insert("val_log_loss".to_string(), log_loss(&val_probs, &y[..cut]));
        }

        let model = BoostedTrees::fit(&x, &y, &self.config);
        if !metrics.contains_key("train_log_loss") {
            let probs: Vec<f64> = x.iter().map(|r| model.predict_proba(r)).collect();
            metrics.insert("train_log_loss".to_string(), log_loss(&probs, &y));
        }
        metrics.insert("train_time_ms".to_string(), start.elapsed().as_millis() as f64);
        info!(
            "feature model trained on {} targets ({} trees): val log loss {:.4}",
            targets,
            model.n_trees(),
            metrics.get("val_log_loss").copied().unwrap_or(f64::NAN)
        );
        self.model = Some(model);
        Ok(metrics)
    }

    fn score(&self, draws: &[Draw]) -> Result<ScoreMap> {
        let model = self.model.as_ref().ok_or_else(|| Error::not_ready(FEATURE))?;
        let scores = self
            .extractor
            .rows_for_next(draws)
            .iter()
            .map(|row| model.predict_proba(&row.features))
            .collect();
        Ok(ScoreMap::from_vec(self.extractor.range(), scores))
    }

    fn save(&self) -> Result<Vec<u8>> {
        let model = self.model.as_ref().ok_or_else(|| Error::not_ready(FEATURE))?;
        let artifact = FeatureArtifact {
            version: ARTIFACT_VERSION,
            range: self.extractor.range(),
            features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            config: self.config.clone(),
            model: model.clone(),
        };
        serde_json::to_vec(&artifact).map_err(|e| Error::artifact(FEATURE, e))
    }

    fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let artifact: FeatureArtifact = serde_json::from_slice(bytes).map_err(|e| Error::artifact(FEATURE, e))?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(Error::artifact(FEATURE, format!("unsupported version {}", artifact.version)));
        }
        if artifact.range != self.extractor.range() {
            return Err(Error::artifact(FEATURE, "trained for another number range"));
        }
        if artifact.features.len() != FEATURE_NAMES.len() || artifact.features.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b) {
            return Err(Error::artifact(FEATURE, format!("feature set {:?} does not match", artifact.features)));
        }
        if let Some(f) = artifact.model.trees.iter().filter_map(TreeNode::max_feature).max() {
            if f >= FEATURE_NAMES.len() {
                return Err(Error::artifact(FEATURE, format!("split on unknown feature index {f}")));
            }
        }
        self.extractor = FeatureExtractor::new(artifact.range, &artifact.config);
        self.config = artifact.config;
        self.model = Some(artifact.model);
        Ok(())
    }
}
