//! Random forest of CART trees with Gini impurity.
//!
//! Trees are grown from bootstrap samples and average their leaf class
//! distributions at prediction time. Each tree gets its own seed drawn up
//! front from the forest seed, so fitting in parallel is reproducible.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Parameters and errors
// ---------------------------------------------------------------------------

/// Hyperparameters. The defaults are the ones every training run uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForestError {
    #[error("model expects {expected} features, got {got}")]
    FeatureCount { expected: usize, got: usize },

    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,

    #[error("{rows} feature rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("feature {feature} of row {row} is NaN")]
    NotANumber { row: usize, feature: usize },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// A node in a decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Go left when `row[feature] <= threshold`.
    Split {
        feature: u32,
        threshold: f64,
        left: u32,
        right: u32,
    },
    /// Class fractions of the training samples that reached this leaf.
    Leaf { distribution: Vec<f64> },
}

/// Flat array of nodes; the root is at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf_distribution(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature as usize] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                Node::Leaf { distribution } => return distribution,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ---------------------------------------------------------------------------
// Forest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit a forest on dense rows `x` with class indices `y` in `0..n_classes`.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        params: &ForestParams,
    ) -> Result<Self, ForestError> {
        if params.n_trees == 0 {
            return Err(ForestError::InvalidParams("n_trees must be at least 1".into()));
        }
        if params.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        if x.is_empty() {
            return Err(ForestError::EmptyTrainingSet);
        }
        if x.len() != y.len() {
            return Err(ForestError::LengthMismatch {
                rows: x.len(),
                labels: y.len(),
            });
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(ForestError::InvalidParams(format!(
                "label index {bad} outside 0..{n_classes}"
            )));
        }
        let n_features = x[0].len();
        for (row, values) in x.iter().enumerate() {
            if values.len() != n_features {
                return Err(ForestError::FeatureCount {
                    expected: n_features,
                    got: values.len(),
                });
            }
            if let Some(feature) = values.iter().position(|v| v.is_nan()) {
                return Err(ForestError::NotANumber { row, feature });
            }
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_trees).map(|_| rng.random()).collect();
        let max_features = ((n_features as f64).sqrt() as usize).max(1);

        let trees = seeds
            .par_iter()
            .map(|&seed| {
                let ctx = GrowContext {
                    x,
                    y,
                    n_classes,
                    n_features,
                    max_features,
                    params,
                };
                ctx.grow(StdRng::seed_from_u64(seed))
            })
            .collect();

        Ok(Self {
            params: params.clone(),
            n_features,
            n_classes,
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Mean of the trees' leaf distributions.
    pub fn predict_proba(&self, row: &[f64]) -> Result<Vec<f64>, ForestError> {
        if row.len() != self.n_features {
            return Err(ForestError::FeatureCount {
                expected: self.n_features,
                got: row.len(),
            });
        }
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.leaf_distribution(row)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }

    /// Most probable class index; ties go to the lowest index.
    pub fn predict(&self, row: &[f64]) -> Result<usize, ForestError> {
        let proba = self.predict_proba(row)?;
        let mut best = 0;
        for (idx, p) in proba.iter().enumerate() {
            if *p > proba[best] {
                best = idx;
            }
        }
        Ok(best)
    }
}

// ---------------------------------------------------------------------------
// Tree growth
// ---------------------------------------------------------------------------

struct GrowContext<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    n_features: usize,
    max_features: usize,
    params: &'a ForestParams,
}

struct Split {
    feature: usize,
    threshold: f64,
}

impl GrowContext<'_> {
    /// Grow one tree on a bootstrap sample. Uses an explicit work stack so
    /// unbounded depth cannot overflow the thread stack.
    fn grow(&self, mut rng: StdRng) -> DecisionTree {
        let n = self.x.len();
        let mut samples: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
        let mut nodes = vec![Node::Leaf {
            distribution: Vec::new(),
        }];
        let mut stack = vec![(0usize, 0usize, n, 0usize)];

        while let Some((node, start, end, depth)) = stack.pop() {
            let slice = &mut samples[start..end];
            let counts = self.class_counts(slice);
            let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
            let too_deep = self.params.max_depth.is_some_and(|d| depth >= d);
            let too_small = slice.len() < self.params.min_samples_split;

            let split = if pure || too_deep || too_small {
                None
            } else {
                self.best_split(slice, &counts, &mut rng)
            };

            let Some(split) = split else {
                nodes[node] = Node::Leaf {
                    distribution: distribution(&counts),
                };
                continue;
            };

            let mid = partition(slice, |s| self.x[s][split.feature] <= split.threshold);
            let left = nodes.len();
            nodes.push(Node::Leaf {
                distribution: Vec::new(),
            });
            nodes.push(Node::Leaf {
                distribution: Vec::new(),
            });
            nodes[node] = Node::Split {
                feature: split.feature as u32,
                threshold: split.threshold,
                left: left as u32,
                right: (left + 1) as u32,
            };
            stack.push((left + 1, start + mid, end, depth + 1));
            stack.push((left, start, start + mid, depth + 1));
        }

        DecisionTree { nodes }
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &s in samples {
            counts[self.y[s]] += 1;
        }
        counts
    }

    /// Best Gini split over at least `max_features` randomly ordered
    /// features; keeps looking past the quota until some valid split exists.
    fn best_split(&self, samples: &[usize], counts: &[usize], rng: &mut StdRng) -> Option<Split> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(rng);

        let total = samples.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<(f64, Split)> = None;
        let mut values: Vec<(f64, usize)> = Vec::with_capacity(total);

        for (visited, &feature) in features.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }

            values.clear();
            values.extend(samples.iter().map(|&s| (self.x[s][feature], self.y[s])));
            values.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0usize; self.n_classes];
            let mut right = counts.to_vec();
            for i in 0..total - 1 {
                let class = values[i].1;
                left[class] += 1;
                right[class] -= 1;

                let (lo, hi) = (values[i].0, values[i + 1].0);
                if lo == hi {
                    continue;
                }
                let n_left = i + 1;
                let n_right = total - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let impurity = (n_left as f64 * gini(&left, n_left)
                    + n_right as f64 * gini(&right, n_right))
                    / total as f64;
                if best.as_ref().map_or(true, |(b, _)| impurity < *b) {
                    best = Some((
                        impurity,
                        Split {
                            feature,
                            threshold: midpoint(lo, hi),
                        },
                    ));
                }
            }
        }

        best.map(|(_, split)| split)
    }
}

fn gini(counts: &[usize], total: usize) -> f64 {
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn distribution(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

/// Threshold between two adjacent distinct values, kept strictly below `hi`.
fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo / 2.0 + hi / 2.0;
    if mid >= hi || !mid.is_finite() {
        lo
    } else {
        mid
    }
}

/// Move samples satisfying `pred` to the front; returns how many did.
fn partition(samples: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..samples.len() {
        if pred(samples[i]) {
            samples.swap(i, mid);
            mid += 1;
        }
    }
    mid
}
