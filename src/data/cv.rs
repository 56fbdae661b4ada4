//! Repeated k-fold index generators used for hyper-parameter search.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use super::model::StructuredData;
use crate::config::RANDOM_SEED;
use crate::error::{PipelineError, Result};

/// Row indices of one train / held-out fold, both ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

pub trait CrossValidator: fmt::Debug {
    fn name(&self) -> &'static str;

    /// All folds of all repeats, repeat-major.
    fn folds(&self, data: &StructuredData) -> Result<Vec<Fold>>;
}

fn default_splits() -> usize {
    5
}

fn default_repeats() -> usize {
    10
}

fn default_seed() -> u64 {
    RANDOM_SEED
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KFoldParams {
    #[serde(default = "default_splits")]
    pub n_splits: usize,
    #[serde(default = "default_repeats")]
    pub n_repeats: usize,
    #[serde(default = "default_seed")]
    pub random_state: u64,
}

impl KFoldParams {
    fn validate(&self, name: &str) -> Result<()> {
        if self.n_splits < 2 {
            return Err(PipelineError::config(format!(
                "{name}: n_splits must be at least 2, got {}",
                self.n_splits
            )));
        }
        if self.n_repeats == 0 {
            return Err(PipelineError::config(format!("{name}: n_repeats must be positive")));
        }
        Ok(())
    }
}

/// Turn a fold assignment per row into folds.
fn collect_folds(assignment: &[usize], n_splits: usize) -> Vec<Fold> {
    (0..n_splits)
        .map(|k| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..assignment.len()).partition(|&row| assignment[row] == k);
            Fold { train, test }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RepeatedKFold {
    params: KFoldParams,
}

impl RepeatedKFold {
    pub fn new(params: KFoldParams) -> Result<Self> {
        params.validate("RepeatedKFold")?;
        Ok(Self { params })
    }
}

impl CrossValidator for RepeatedKFold {
    fn name(&self) -> &'static str {
        "RepeatedKFold"
    }

    fn folds(&self, data: &StructuredData) -> Result<Vec<Fold>> {
        let n = data.len();
        let k = self.params.n_splits;
        if n < k {
            return Err(PipelineError::insufficient(format!(
                "RepeatedKFold: {k} folds requested for {n} rows"
            )));
        }
        let mut rng = StdRng::seed_from_u64(self.params.random_state);
        let mut folds = Vec::with_capacity(k * self.params.n_repeats);
        for _ in 0..self.params.n_repeats {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);
            // first n % k folds take one extra row
            let mut assignment = vec![0; n];
            let mut start = 0;
            for fold in 0..k {
                let size = n / k + usize::from(fold < n % k);
                for &row in &order[start..start + size] {
                    assignment[row] = fold;
                }
                start += size;
            }
            folds.extend(collect_folds(&assignment, k));
        }
        Ok(folds)
    }
}

/// K-fold keeping each class spread evenly over the folds.
#[derive(Debug, Clone)]
pub struct RepeatedStratifiedKFold {
    params: KFoldParams,
}

impl RepeatedStratifiedKFold {
    pub fn new(params: KFoldParams) -> Result<Self> {
        params.validate("RepeatedStratifiedKFold")?;
        Ok(Self { params })
    }
}

impl CrossValidator for RepeatedStratifiedKFold {
    fn name(&self) -> &'static str {
        "RepeatedStratifiedKFold"
    }

    fn folds(&self, data: &StructuredData) -> Result<Vec<Fold>> {
        let codes = data
            .target
            .as_ref()
            .and_then(|t| t.codes())
            .ok_or_else(|| {
                PipelineError::config("RepeatedStratifiedKFold needs a classification target")
            })?;
        let k = self.params.n_splits;
        if codes.len() < k {
            return Err(PipelineError::insufficient(format!(
                "RepeatedStratifiedKFold: {k} folds requested for {} rows",
                codes.len()
            )));
        }

        let n_classes = codes.iter().max().map_or(0, |&m| m + 1);
        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
        for (row, &code) in codes.iter().enumerate() {
            by_class[code].push(row);
        }

        let mut rng = StdRng::seed_from_u64(self.params.random_state);
        let mut folds = Vec::with_capacity(k * self.params.n_repeats);
        for _ in 0..self.params.n_repeats {
            let mut assignment = vec![0; codes.len()];
            // continue the round robin across classes so fold sizes stay level
            let mut next = 0;
            for rows in &by_class {
                let mut rows = rows.clone();
                rows.shuffle(&mut rng);
                for row in rows {
                    assignment[row] = next % k;
                    next += 1;
                }
            }
            folds.extend(collect_folds(&assignment, k));
        }
        Ok(folds)
    }
}
