//! Evaluation: predict over a partition and hand the results to an
//! artifact logger.

pub mod logger;
pub mod metrics;
pub mod model;

use std::collections::BTreeMap;
use std::fmt;

use log::info;

use crate::data::model::{MetaRow, StructuredData, Target};
use crate::error::{PipelineError, Result};
use self::model::{Model, Params};

/// Named metric values reported by a logger.
pub type Metrics = BTreeMap<String, f64>;

/// Everything a logger needs about one evaluated partition.
#[derive(Debug, Clone)]
pub struct TransferObject<'a> {
    pub params: Params,
    pub y_pred: Vec<f64>,
    pub y_true: Vec<f64>,
    /// Readable label per row; empty for regression.
    pub label: Vec<String>,
    /// Readable label per class code; empty for regression.
    pub encoding: Vec<String>,
    pub meta: &'a [MetaRow],
    pub suffix: String,
}

/// Persists the outcome of one evaluation.
pub trait ArtifactLogger: fmt::Debug {
    fn log_params(&self, tobj: &TransferObject<'_>) -> Result<()>;

    fn log_metrics(&self, tobj: &TransferObject<'_>) -> Result<Metrics>;

    fn log_artifacts(&self, tobj: &TransferObject<'_>) -> Result<()>;
}

pub struct Evaluator<'m> {
    model: &'m dyn Model,
    logger: Box<dyn ArtifactLogger>,
}

impl<'m> Evaluator<'m> {
    pub fn new(model: &'m dyn Model, logger: Box<dyn ArtifactLogger>) -> Self {
        Self { model, logger }
    }

    /// Predict over `data`, then log params, metrics and artifacts in that order.
    pub fn run(&self, data: &StructuredData, suffix: &str) -> Result<Metrics> {
        let target = data.target.as_ref().ok_or_else(|| {
            PipelineError::integrity(format!("{suffix} data has no target to evaluate against"))
        })?;
        let y_pred = self.model.predict(&data.data)?;
        if y_pred.len() != data.len() {
            return Err(PipelineError::integrity(format!(
                "model returned {} predictions for {} rows",
                y_pred.len(),
                data.len()
            )));
        }

        let (label, encoding) = match target {
            Target::Classification(t) => (
                t.label.iter().map(ToString::to_string).collect(),
                t.encoding.iter().map(ToString::to_string).collect(),
            ),
            Target::Regression(_) => (Vec::new(), Vec::new()),
        };
        let tobj = TransferObject {
            params: self.model.params(),
            y_pred,
            y_true: target.values_f64(),
            label,
            encoding,
            meta: &data.meta,
            suffix: suffix.to_string(),
        };

        self.logger.log_params(&tobj)?;
        let metrics = self.logger.log_metrics(&tobj)?;
        self.logger.log_artifacts(&tobj)?;
        info!("evaluated {} rows of {suffix} data", data.len());
        Ok(metrics)
    }
}
