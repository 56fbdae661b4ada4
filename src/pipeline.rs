//! End-to-end training run: format, sample, fit, evaluate.

use std::path::PathBuf;

use log::{info, warn};

use crate::config::{ConfigParser, Kwargs, Settings, TEST_STR, TRAIN_STR};
use crate::data::model::StructuredData;
use crate::data::sampler::{Partitions, Sampler};
use crate::error::{PipelineError, Result};
use crate::eval::metrics::{ClassMetrics, ConfusionMatrix, RegressionMetrics};
use crate::eval::model::Model;
use crate::eval::{Evaluator, Metrics};
use crate::registry::{self, MethodDescriptor};

/// Outcome of one training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Row counts of train / val / test.
    pub sizes: [usize; 3],
    /// Mean fold score on the training partition, when a validator is set.
    pub cv_score: Option<f64>,
    pub train: Metrics,
    pub test: Metrics,
    pub output_dir: PathBuf,
}

/// Logger kwargs with `output_dir` defaulted to the settings' save directory.
fn logger_kwargs(settings: &Settings, extra: &Kwargs) -> Kwargs {
    let mut kwargs = extra.clone();
    kwargs
        .entry("output_dir")
        .or_insert_with(|| toml::Value::String(settings.save_dir.display().to_string()));
    kwargs
}

/// Weighted F1 for class targets, R² otherwise.
fn score(model: &dyn Model, data: &StructuredData) -> Result<f64> {
    let y_pred = model.predict(&data.data)?;
    let target = data
        .target
        .as_ref()
        .ok_or_else(|| PipelineError::integrity("cannot score data without a target"))?;
    Ok(match target.codes() {
        Some(codes) => {
            let pred: Vec<usize> = y_pred.iter().map(|p| p.round().max(0.0) as usize).collect();
            let cm = ConfusionMatrix::from_predictions(&pred, codes, 0);
            ClassMetrics::from_confusion_matrix(&cm).weighted_prf().2
        }
        None => RegressionMetrics::compute(&y_pred, &target.values_f64()).r2,
    })
}

fn cross_validate(
    cfg: &ConfigParser,
    method: &MethodDescriptor,
    train: &StructuredData,
) -> Result<Option<f64>> {
    let model_cfg = cfg.model();
    let Some(identifier) = model_cfg.validator.as_deref() else {
        return Ok(None);
    };
    let validator = registry::resolve_validator(identifier, &model_cfg.validator_params)?;
    let folds = validator.folds(train)?;
    let mut scores = Vec::with_capacity(folds.len());
    for fold in &folds {
        let mut model = method.build()?;
        model.fit(&train.select(&fold.train))?;
        scores.push(score(model.as_ref(), &train.select(&fold.test))?);
    }
    let mean = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
    info!("{} over {} folds: mean score {mean:.4}", validator.name(), folds.len());
    Ok(Some(mean))
}

/// Run the configured pipeline over already-loaded data.
pub fn train(settings: &Settings, cfg: &ConfigParser, data: &StructuredData) -> Result<TrainReport> {
    let formatter_cfg = cfg.formatter();
    let formatter =
        registry::resolve_formatter(&formatter_cfg.formatter, cfg.general(), formatter_cfg)?;
    let formatted = formatter.format(data)?;
    info!("{} kept {} of {} rows", formatter_cfg.formatter, formatted.len(), data.len());

    let sampler_cfg = cfg.sampler();
    let splitter = registry::resolve_splitter(&sampler_cfg.splitter, &sampler_cfg.kwargs())?;
    let Partitions { train, val, test } = Sampler::new(splitter).sample(&formatted)?;
    let sizes = [train.len(), val.len(), test.len()];
    info!("partition sizes (train, val, test): {sizes:?}");

    let model_cfg = cfg.model();
    let method = registry::resolve_method(&model_cfg.method, &model_cfg.params)?;
    let cv_score = cross_validate(cfg, &method, &train)?;

    let mut model = method.build()?;
    model.fit(&train)?;
    if val.is_empty() {
        warn!("validation partition is empty");
    } else {
        info!("validation score: {:.4}", score(model.as_ref(), &val)?);
    }

    let evaluator_cfg = cfg.evaluator();
    let kwargs = logger_kwargs(settings, &evaluator_cfg.extra);
    let output_dir = kwargs
        .get("output_dir")
        .and_then(toml::Value::as_str)
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.save_dir.clone());

    let test_metrics = Evaluator::new(
        model.as_ref(),
        registry::resolve_logger(&evaluator_cfg.logger, &kwargs)?,
    )
    .run(&test, TEST_STR)?;
    let train_metrics = Evaluator::new(
        model.as_ref(),
        registry::resolve_logger(&evaluator_cfg.logger, &kwargs)?,
    )
    .run(&train, TRAIN_STR)?;

    Ok(TrainReport {
        sizes,
        cv_score,
        train: train_metrics,
        test: test_metrics,
        output_dir,
    })
}
