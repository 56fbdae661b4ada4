use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::data::model::{StructuredData, Target};
use crate::error::{PipelineError, Result};

/// Hyper-parameters as reported to the artifact logger.
pub type Params = BTreeMap<String, JsonValue>;

/// A trainable estimator. Training algorithms live outside this crate;
/// this is the seam they plug into.
pub trait Model: fmt::Debug {
    fn fit(&mut self, data: &StructuredData) -> Result<()>;

    /// One prediction per feature row; class codes are returned as `f64`.
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>>;

    fn params(&self) -> Params;
}

fn not_fitted(name: &str) -> PipelineError {
    PipelineError::config(format!("{name} used before fit"))
}

fn target_of(data: &StructuredData) -> Result<&Target> {
    data.target
        .as_ref()
        .ok_or_else(|| PipelineError::integrity("cannot fit on data without a target"))
}

// ---------------------------------------------------------------------------
// DummyClassifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DummyClassifierParams {
    #[serde(default = "most_frequent")]
    pub strategy: String,
}

fn most_frequent() -> String {
    "most_frequent".into()
}

/// Predicts the most frequent training class (lowest code on ties).
#[derive(Debug, Clone)]
pub struct DummyClassifier {
    strategy: String,
    class: Option<usize>,
}

impl DummyClassifier {
    pub fn new(params: DummyClassifierParams) -> Result<Self> {
        match params.strategy.as_str() {
            "most_frequent" | "prior" => Ok(Self {
                strategy: params.strategy,
                class: None,
            }),
            other => Err(PipelineError::config(format!(
                "DummyClassifier: unsupported strategy '{other}'"
            ))),
        }
    }
}

impl Model for DummyClassifier {
    fn fit(&mut self, data: &StructuredData) -> Result<()> {
        let codes = target_of(data)?.codes().ok_or_else(|| {
            PipelineError::config("DummyClassifier needs a classification target")
        })?;
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for &c in codes {
            *counts.entry(c).or_default() += 1;
        }
        self.class = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(c, _)| c);
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        let class = self.class.ok_or_else(|| not_fitted("DummyClassifier"))?;
        Ok(vec![class as f64; features.len()])
    }

    fn params(&self) -> Params {
        let mut p = Params::new();
        p.insert("strategy".into(), JsonValue::from(self.strategy.clone()));
        p
    }
}

// ---------------------------------------------------------------------------
// DummyRegressor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DummyRegressorParams {
    #[serde(default = "mean")]
    pub strategy: String,
}

fn mean() -> String {
    "mean".into()
}

/// Predicts the training mean or median.
#[derive(Debug, Clone)]
pub struct DummyRegressor {
    strategy: String,
    constant: Option<f64>,
}

impl DummyRegressor {
    pub fn new(params: DummyRegressorParams) -> Result<Self> {
        match params.strategy.as_str() {
            "mean" | "median" => Ok(Self {
                strategy: params.strategy,
                constant: None,
            }),
            other => Err(PipelineError::config(format!(
                "DummyRegressor: unsupported strategy '{other}'"
            ))),
        }
    }
}

impl Model for DummyRegressor {
    fn fit(&mut self, data: &StructuredData) -> Result<()> {
        let mut y = target_of(data)?.values_f64();
        if y.is_empty() {
            return Err(PipelineError::insufficient("DummyRegressor: no training rows"));
        }
        let value = if self.strategy == "median" {
            y.sort_by(f64::total_cmp);
            let mid = y.len() / 2;
            if y.len() % 2 == 0 {
                (y[mid - 1] + y[mid]) / 2.0
            } else {
                y[mid]
            }
        } else {
            y.iter().sum::<f64>() / y.len() as f64
        };
        self.constant = Some(value);
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        let constant = self.constant.ok_or_else(|| not_fitted("DummyRegressor"))?;
        Ok(vec![constant; features.len()])
    }

    fn params(&self) -> Params {
        let mut p = Params::new();
        p.insert("strategy".into(), JsonValue::from(self.strategy.clone()));
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::meta_row;
    use crate::data::model::{ClassificationTarget, LabelKey, RegressionTarget};

    fn rows(n: usize) -> StructuredData {
        let meta = (0..n)
            .map(|i| meta_row("2023_06_01", "T1", 1, i as i64, "V1"))
            .collect();
        StructuredData::new(vec!["red".into()], vec![vec![0.0]; n], meta).unwrap()
    }

    #[test]
    fn classifier_predicts_majority() {
        let label = ["a", "b", "b", "a", "b"]
            .iter()
            .map(|s| LabelKey(vec![(*s).into()]))
            .collect();
        let data = rows(5)
            .with_target(Target::Classification(ClassificationTarget::factorize(label)))
            .unwrap();
        let mut model = DummyClassifier::new(DummyClassifierParams { strategy: most_frequent() }).unwrap();
        assert!(model.predict(&data.data).is_err());
        model.fit(&data).unwrap();
        assert_eq!(model.predict(&data.data[..2]).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn regressor_predicts_mean_or_median() {
        let data = rows(3)
            .with_target(Target::Regression(RegressionTarget {
                name: "yield".into(),
                value: vec![1.0, 2.0, 9.0],
            }))
            .unwrap();
        let mut mean_model = DummyRegressor::new(DummyRegressorParams { strategy: mean() }).unwrap();
        mean_model.fit(&data).unwrap();
        assert_eq!(mean_model.predict(&data.data).unwrap(), vec![4.0; 3]);

        let mut median = DummyRegressor::new(DummyRegressorParams { strategy: "median".into() }).unwrap();
        median.fit(&data).unwrap();
        assert_eq!(median.predict(&data.data[..1]).unwrap(), vec![2.0]);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = DummyRegressor::new(DummyRegressorParams { strategy: "quantile".into() }).unwrap_err();
        assert!(err.is_configuration());
    }
}
