//! Probability laws of random variables and weighted sample sets.

use std::collections::BTreeMap;

use rand::Rng;

use crate::error::{Error, Result};
use crate::ids::NodeId;

/// Weighted samples of a random variable: value → weight.
pub type Samples = BTreeMap<i64, f64>;

/// Discrete probability law over integer values.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(transparent))]
pub struct ProbabilityLaw {
    outcomes: Vec<(i64, f64)>,
}

impl ProbabilityLaw {
    /// Build a law from `(value, probability)` pairs.
    ///
    /// Probabilities need not sum to one; they are treated as weights.
    pub fn new(node: &NodeId, outcomes: Vec<(i64, f64)>) -> Result<Self> {
        let law = Self { outcomes };
        law.validate(node)?;
        Ok(law)
    }

    /// Uniform law over the given values.
    pub fn uniform(values: impl IntoIterator<Item = i64>) -> Self {
        let values: Vec<i64> = values.into_iter().collect();
        let p = 1.0 / values.len().max(1) as f64;
        Self {
            outcomes: values.into_iter().map(|v| (v, p)).collect(),
        }
    }

    pub fn validate(&self, node: &NodeId) -> Result<()> {
        if self.outcomes.is_empty() {
            return Err(Error::InvalidLaw {
                node: node.clone(),
                reason: "no outcomes",
            });
        }
        if self.outcomes.iter().any(|(_, p)| !p.is_finite() || *p < 0.0) {
            return Err(Error::InvalidLaw {
                node: node.clone(),
                reason: "negative or non-finite weight",
            });
        }
        if self.total_weight() <= 0.0 {
            return Err(Error::InvalidLaw {
                node: node.clone(),
                reason: "weights sum to zero",
            });
        }
        Ok(())
    }

    pub fn outcomes(&self) -> &[(i64, f64)] {
        &self.outcomes
    }

    fn total_weight(&self) -> f64 {
        self.outcomes.iter().map(|(_, p)| p).sum()
    }

    /// Draw `n` values with replacement; each distinct value is weighted by
    /// its observed frequency.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Samples {
        let mut out = Samples::new();
        if n == 0 {
            return out;
        }
        let total = self.total_weight();
        for _ in 0..n {
            let value = pick(self.outcomes.iter().copied(), total, rng);
            *out.entry(value).or_insert(0.0) += 1.0;
        }
        for weight in out.values_mut() {
            *weight /= n as f64;
        }
        out
    }
}

fn pick<R: Rng + ?Sized>(
    outcomes: impl Iterator<Item = (i64, f64)> + Clone,
    total: f64,
    rng: &mut R,
) -> i64 {
    let target = rng.gen::<f64>() * total;
    let mut cumul = 0.0;
    let mut last = 0;
    for (value, weight) in outcomes {
        cumul += weight;
        last = value;
        if cumul >= target && weight > 0.0 {
            return value;
        }
    }
    last
}

/// Merge two sample sets, adding the weights of shared values.
pub fn combine_samples(mut a: Samples, b: &Samples) -> Samples {
    for (value, weight) in b {
        *a.entry(*value).or_insert(0.0) += weight;
    }
    a
}

/// Reduce a sample set to at most `n` distinct values.
///
/// With `n == 0` the input is returned untouched. When the input already has
/// at most `n` values, weights are only normalized. Otherwise values are
/// redrawn with replacement according to their weights until `n` distinct
/// values have been seen, and each is weighted by its share of the draws.
pub fn down_sample<R: Rng + ?Sized>(samples: &Samples, n: usize, rng: &mut R) -> Samples {
    if n == 0 {
        return samples.clone();
    }
    let total: f64 = samples.values().sum();
    if samples.len() <= n {
        if total <= 0.0 {
            return samples.clone();
        }
        return samples.iter().map(|(v, w)| (*v, w / total)).collect();
    }

    // zero-weight values can never be drawn
    let target = n.min(samples.values().filter(|w| **w > 0.0).count());
    if target == 0 {
        return samples.clone();
    }

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    let mut draws = 0usize;
    while counts.len() < target {
        let value = pick(samples.iter().map(|(v, w)| (*v, *w)), total, rng);
        *counts.entry(value).or_insert(0) += 1;
        draws += 1;
    }
    counts
        .into_iter()
        .map(|(v, c)| (v, c as f64 / draws as f64))
        .collect()
}
