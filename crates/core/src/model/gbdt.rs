//! Gradient-boosted regression trees with squared-error loss.
//!
//! Trees are grown depth-first with exact greedy splits over pre-sorted feature columns.
//! Each split maximises the second-order gain `G_L²/(H_L+λ) + G_R²/(H_R+λ) - G²/(H+λ)`;
//! leaves hold `-G/(H+λ)` scaled by the learning rate. With a validation set, boosting stops
//! once validation RMSE has not improved for `early_stopping_rounds` rounds and the ensemble
//! is truncated to the best round.

use crate::error::{DemandError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub early_stopping_rounds: usize,
    pub lambda: f64,
    pub min_child_weight: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            early_stopping_rounds: 10,
            lambda: 1.0,
            min_child_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        gain: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Children always come after their parent, so a valid tree cannot loop.
    fn check(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("node {i} has non-finite leaf value"));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {i} has a NaN threshold"));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(format!("node {i} points to invalid child {child}"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn add_gains(&self, totals: &mut [f64]) {
        for node in &self.nodes {
            if let Node::Split { feature, gain, .. } = node {
                totals[*feature] += *gain;
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    grad: &'a [f64],
    params: &'a BoostingParams,
    go_left: Vec<bool>,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, sorted: Vec<Vec<usize>>, rows: Vec<usize>) -> Tree {
        self.grow(sorted, rows, 0);
        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, sorted: Vec<Vec<usize>>, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h = rows.len() as f64;
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: -g / (h + self.params.lambda) * self.params.learning_rate,
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return id;
        }
        let Some(split) = self.best_split(&sorted, g, h) else {
            return id;
        };

        for &r in &rows {
            self.go_left[r] = self.x[r][split.feature] < split.threshold;
        }
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().copied().partition(|&r| self.go_left[r]);
        let mut left_sorted = Vec::with_capacity(sorted.len());
        let mut right_sorted = Vec::with_capacity(sorted.len());
        for order in sorted {
            let (l, r): (Vec<usize>, Vec<usize>) = order.into_iter().partition(|&r| self.go_left[r]);
            left_sorted.push(l);
            right_sorted.push(r);
        }

        let left = self.grow(left_sorted, left_rows, depth + 1);
        let right = self.grow(right_sorted, right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            gain: split.gain,
            left,
            right,
        };
        id
    }

    fn best_split(&self, sorted: &[Vec<usize>], g: f64, h: f64) -> Option<SplitCandidate> {
        let lambda = self.params.lambda;
        let parent = g * g / (h + lambda);
        let mut best: Option<SplitCandidate> = None;

        for (feature, order) in sorted.iter().enumerate() {
            let mut gl = 0.0;
            let mut hl = 0.0;
            for pair in order.windows(2) {
                let (cur, next) = (pair[0], pair[1]);
                gl += self.grad[cur];
                hl += 1.0;
                let (a, b) = (self.x[cur][feature], self.x[next][feature]);
                if a >= b {
                    continue;
                }
                let hr = h - hl;
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gr = g - gl;
                let gain = 0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent);
                if gain > 1e-12 && best.as_ref().map(|s| gain > s.gain).unwrap_or(true) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: a + (b - a) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    params: BoostingParams,
    n_features: usize,
    base_score: f64,
    trees: Vec<Tree>,
    best_iteration: usize,
}

impl GradientBoostedRegressor {
    pub fn fit(
        params: &BoostingParams,
        x: &[Vec<f64>],
        y: &[f64],
        validation: Option<(&[Vec<f64>], &[f64])>,
    ) -> Result<Self> {
        let n_features = validate_matrix("training", x, y, None)?;
        if let Some((vx, vy)) = validation {
            validate_matrix("validation", vx, vy, Some(n_features))?;
        }
        if params.n_estimators == 0 || !(params.learning_rate > 0.0) {
            return Err(DemandError::validation(
                "n_estimators and learning_rate must be positive",
            ));
        }

        let base_score = y.iter().sum::<f64>() / y.len() as f64;
        let mut train_pred = vec![base_score; y.len()];
        let mut valid_pred = validation.map(|(vx, _)| vec![base_score; vx.len()]);

        let presorted: Vec<Vec<usize>> = (0..n_features)
            .map(|f| {
                let mut order: Vec<usize> = (0..x.len()).collect();
                order.sort_by(|&a, &b| x[a][f].total_cmp(&x[b][f]));
                order
            })
            .collect();

        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut best_rmse = f64::INFINITY;
        let mut best_iteration = 0;
        let mut stale = 0;

        for round in 0..params.n_estimators {
            let grad: Vec<f64> = train_pred.iter().zip(y).map(|(p, t)| p - t).collect();
            let tree = TreeBuilder {
                x,
                grad: &grad,
                params,
                go_left: vec![false; x.len()],
                nodes: Vec::new(),
            }
            .build(presorted.clone(), (0..x.len()).collect());

            for (pred, row) in train_pred.iter_mut().zip(x) {
                *pred += tree.predict(row);
            }
            trees.push(tree);

            let (Some((vx, vy)), Some(vp)) = (validation, valid_pred.as_mut()) else {
                best_iteration = round;
                continue;
            };
            let tree = &trees[round];
            for (pred, row) in vp.iter_mut().zip(vx) {
                *pred += tree.predict(row);
            }
            let rmse = mean_squared_error(vy, vp).sqrt();
            if rmse < best_rmse {
                best_rmse = rmse;
                best_iteration = round;
                stale = 0;
            } else {
                stale += 1;
                if stale >= params.early_stopping_rounds {
                    tracing::debug!(round, best_iteration, best_rmse, "early stopping");
                    break;
                }
            }
        }

        trees.truncate(best_iteration + 1);

        Ok(Self {
            params: params.clone(),
            n_features,
            base_score,
            trees,
            best_iteration,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    /// Structural check for a deserialized model: node indices and split features in range.
    pub fn check_structure(&self) -> std::result::Result<(), String> {
        if self.n_features == 0 {
            return Err("model has no features".to_string());
        }
        if !self.base_score.is_finite() {
            return Err("base score is not finite".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.check(self.n_features)
                .map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "model expects {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        let value = self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>();
        if !value.is_finite() {
            return Err(DemandError::Prediction(format!(
                "non-finite prediction {value}"
            )));
        }
        Ok(value)
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }

    /// Total split gain per feature, normalised to sum to 1 (all zeros if no tree split).
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree.add_gains(&mut totals);
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            for v in totals.iter_mut() {
                *v /= sum;
            }
        }
        totals
    }
}

fn validate_matrix(label: &str, x: &[Vec<f64>], y: &[f64], width: Option<usize>) -> Result<usize> {
    if x.is_empty() {
        return Err(DemandError::validation(format!("{label} set is empty")));
    }
    if x.len() != y.len() {
        return Err(DemandError::validation(format!(
            "{label} set has {} rows but {} targets",
            x.len(),
            y.len()
        )));
    }
    let n_features = width.unwrap_or(x[0].len());
    if n_features == 0 {
        return Err(DemandError::validation(format!("{label} set has no features")));
    }
    for (i, row) in x.iter().enumerate() {
        if row.len() != n_features {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "{label} row {i} has {} features, expected {n_features}",
                row.len()
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(DemandError::validation(format!(
                "{label} row {i} has a non-finite feature"
            )));
        }
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(DemandError::validation(format!("{label} target has non-finite values")));
    }
    Ok(n_features)
}

pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}

/// Coefficient of determination. A constant target scores 1.0 on a perfect fit, else 0.0.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}
