use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use super::metrics::{ClassMetrics, ConfusionMatrix, RegressionMetrics};
use super::{ArtifactLogger, Metrics, TransferObject};
use crate::config::{CONFIGS_DIR, IDENTITY_COLUMNS, RESULTS_DIR};
use crate::data::model::MetadataValue;
use crate::error::Result;

fn default_output_dir() -> PathBuf {
    PathBuf::from("saved")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactLoggerParams {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn write_txt(text: &str, path: &Path) -> Result<()> {
    std::fs::write(path, text)?;
    Ok(())
}

/// Identity columns, optional label, truth and prediction per row.
fn write_predictions(tobj: &TransferObject<'_>, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = IDENTITY_COLUMNS.to_vec();
    if !tobj.label.is_empty() {
        header.push("label");
    }
    header.extend(["y_true", "y_pred"]);
    writer.write_record(&header)?;

    for (row, meta) in tobj.meta.iter().enumerate() {
        let mut record: Vec<String> = IDENTITY_COLUMNS
            .iter()
            .map(|c| meta.get(*c).map(MetadataValue::as_key).unwrap_or_default())
            .collect();
        if let Some(label) = tobj.label.get(row) {
            record.push(label.clone());
        }
        record.push(tobj.y_true[row].to_string());
        record.push(tobj.y_pred[row].to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Shared layout: `<out>/configs/best_params.json` and `<out>/results/<suffix>/`.
fn write_common(output_dir: &Path, tobj: &TransferObject<'_>, metrics: &Metrics) -> Result<PathBuf> {
    let configs_path = ensure_dir(output_dir.join(CONFIGS_DIR))?;
    let results_path = ensure_dir(output_dir.join(RESULTS_DIR).join(&tobj.suffix))?;
    write_json(&tobj.params, &configs_path.join("best_params.json"))?;
    write_json(metrics, &results_path.join("metrics.json"))?;
    write_predictions(tobj, &results_path.join("predictions.csv"))?;
    Ok(results_path)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArtifactLoggerClassification {
    output_dir: PathBuf,
}

impl ArtifactLoggerClassification {
    pub fn new(params: ArtifactLoggerParams) -> Self {
        Self {
            output_dir: params.output_dir,
        }
    }

    fn class_metrics(tobj: &TransferObject<'_>) -> ClassMetrics {
        let codes = |v: &[f64]| v.iter().map(|x| x.round().max(0.0) as usize).collect::<Vec<_>>();
        let cm = ConfusionMatrix::from_predictions(
            &codes(&tobj.y_pred),
            &codes(&tobj.y_true),
            tobj.encoding.len(),
        );
        ClassMetrics::from_confusion_matrix(&cm)
    }

    fn metrics(tobj: &TransferObject<'_>) -> Metrics {
        let (precision, recall, f1) = Self::class_metrics(tobj).weighted_prf();
        let mut metrics = Metrics::new();
        metrics.insert(format!("{}_precision", tobj.suffix), precision);
        metrics.insert(format!("{}_recall", tobj.suffix), recall);
        metrics.insert(format!("{}_f1", tobj.suffix), f1);
        metrics
    }
}

impl ArtifactLogger for ArtifactLoggerClassification {
    fn log_params(&self, tobj: &TransferObject<'_>) -> Result<()> {
        info!("Hyperparameters used: {:?}", tobj.params);
        Ok(())
    }

    fn log_metrics(&self, tobj: &TransferObject<'_>) -> Result<Metrics> {
        let metrics = Self::metrics(tobj);
        info!(
            "Classification report on {} data:\n{}",
            tobj.suffix,
            Self::class_metrics(tobj).report(&tobj.encoding)
        );
        Ok(metrics)
    }

    fn log_artifacts(&self, tobj: &TransferObject<'_>) -> Result<()> {
        let results_path = write_common(&self.output_dir, tobj, &Self::metrics(tobj))?;
        write_txt(
            &Self::class_metrics(tobj).report(&tobj.encoding),
            &results_path.join("classification_report.txt"),
        )?;
        info!("wrote {} artifacts to {}", tobj.suffix, results_path.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Regression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArtifactLoggerRegression {
    output_dir: PathBuf,
}

impl ArtifactLoggerRegression {
    pub fn new(params: ArtifactLoggerParams) -> Self {
        Self {
            output_dir: params.output_dir,
        }
    }

    fn metrics(tobj: &TransferObject<'_>) -> Metrics {
        let m = RegressionMetrics::compute(&tobj.y_pred, &tobj.y_true);
        [("mae", m.mae), ("mse", m.mse), ("rmse", m.rmse), ("r2", m.r2)]
            .into_iter()
            .map(|(name, v)| (format!("{}_{name}", tobj.suffix), v))
            .collect()
    }
}

impl ArtifactLogger for ArtifactLoggerRegression {
    fn log_params(&self, tobj: &TransferObject<'_>) -> Result<()> {
        info!("Hyperparameters used: {:?}", tobj.params);
        Ok(())
    }

    fn log_metrics(&self, tobj: &TransferObject<'_>) -> Result<Metrics> {
        let metrics = Self::metrics(tobj);
        info!("Regression metrics on {} data: {metrics:?}", tobj.suffix);
        Ok(metrics)
    }

    fn log_artifacts(&self, tobj: &TransferObject<'_>) -> Result<()> {
        let results_path = write_common(&self.output_dir, tobj, &Self::metrics(tobj))?;
        info!("wrote {} artifacts to {}", tobj.suffix, results_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::meta_row;
    use crate::eval::model::Params;

    fn tobj<'a>(meta: &'a [crate::data::model::MetaRow], classification: bool) -> TransferObject<'a> {
        let (label, encoding) = if classification {
            (
                vec!["(V1)".into(), "(V2)".into()],
                vec!["(V1)".into(), "(V2)".into()],
            )
        } else {
            (Vec::new(), Vec::new())
        };
        TransferObject {
            params: Params::new(),
            y_pred: vec![0.0, 0.0],
            y_true: vec![0.0, 1.0],
            label,
            encoding,
            meta,
            suffix: "test".into(),
        }
    }

    #[test]
    fn classification_logger_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let meta = vec![
            meta_row("2023_06_01", "T1", 1, 1, "V1"),
            meta_row("2023_06_01", "T1", 1, 2, "V2"),
        ];
        let logger = ArtifactLoggerClassification::new(ArtifactLoggerParams {
            output_dir: dir.path().to_path_buf(),
        });
        let t = tobj(&meta, true);
        let metrics = logger.log_metrics(&t).unwrap();
        assert!((metrics["test_recall"] - 0.5).abs() < 1e-12);
        logger.log_artifacts(&t).unwrap();

        let results = dir.path().join("results").join("test");
        let report = std::fs::read_to_string(results.join("classification_report.txt")).unwrap();
        assert!(report.contains("(V2)"));
        let predictions = std::fs::read_to_string(results.join("predictions.csv")).unwrap();
        assert!(predictions.starts_with("dates,treatments,blocks,plants,varieties,label,y_true,y_pred"));
        assert!(dir.path().join("configs").join("best_params.json").exists());
    }

    #[test]
    fn regression_logger_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let meta = vec![
            meta_row("2023_06_01", "T1", 1, 1, "V1"),
            meta_row("2023_06_01", "T1", 1, 2, "V2"),
        ];
        let logger = ArtifactLoggerRegression::new(ArtifactLoggerParams {
            output_dir: dir.path().to_path_buf(),
        });
        let t = tobj(&meta, false);
        let metrics = logger.log_metrics(&t).unwrap();
        assert!((metrics["test_mae"] - 0.5).abs() < 1e-12);
        logger.log_artifacts(&t).unwrap();
        let json = std::fs::read_to_string(dir.path().join("results/test/metrics.json")).unwrap();
        assert!(json.contains("test_rmse"));
    }
}
