//! Formatters: restrict samples to the experimental design and attach a target.

use std::collections::HashMap;

use log::{error, info};

use super::filter::filter_to_design;
use super::loader::load_measurements;
use super::model::{ClassificationTarget, RegressionTarget, StructuredData, Target};
use crate::config::{FormatterConfig, GeneralConfig};
use crate::error::{PipelineError, Result};

/// A formatting stage: `format(data) -> data`.
pub trait Formatter: std::fmt::Debug {
    fn general(&self) -> &GeneralConfig;

    fn format(&self, data: &StructuredData) -> Result<StructuredData>;

    /// Keep only rows whose variety, treatment and date are all declared.
    fn filter_data(&self, data: &StructuredData) -> StructuredData {
        filter_to_design(data, self.general())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClassificationFormatter {
    general: GeneralConfig,
    labels: Vec<String>,
}

impl ClassificationFormatter {
    pub fn new(general: GeneralConfig, cfg: &FormatterConfig) -> Result<Self> {
        if cfg.classification_labels.is_empty() {
            return Err(PipelineError::config(
                "ClassificationFormatter needs at least one entry in 'classification_labels'",
            ));
        }
        Ok(Self {
            general,
            labels: cfg.classification_labels.clone(),
        })
    }
}

impl Formatter for ClassificationFormatter {
    fn general(&self) -> &GeneralConfig {
        &self.general
    }

    fn format(&self, data: &StructuredData) -> Result<StructuredData> {
        let data = self.filter_data(data);
        let columns: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        data.require_columns(&columns)?;

        let label = (0..data.len()).map(|row| data.key(row, &self.labels)).collect();
        let target = ClassificationTarget::factorize(label);
        info!(
            "encoded {} rows into {} classes over {:?}",
            target.value.len(),
            target.n_classes(),
            self.labels
        );
        data.with_target(Target::Classification(target))
    }
}

// ---------------------------------------------------------------------------
// Regression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RegressionFormatter {
    general: GeneralConfig,
    cfg: FormatterConfig,
}

impl RegressionFormatter {
    pub fn new(general: GeneralConfig, cfg: &FormatterConfig) -> Result<Self> {
        let label = cfg.regression_label.as_deref().ok_or_else(|| {
            PipelineError::config("RegressionFormatter needs 'regression_label'")
        })?;
        if !cfg.measurements_paths.contains_key(label) {
            return Err(PipelineError::config(format!(
                "regression label '{label}' has no entry in 'measurements_paths'"
            )));
        }
        Ok(Self {
            general,
            cfg: cfg.clone(),
        })
    }
}

impl Formatter for RegressionFormatter {
    fn general(&self) -> &GeneralConfig {
        &self.general
    }

    fn format(&self, data: &StructuredData) -> Result<StructuredData> {
        // both presence checks were done in `new`
        let label = self.cfg.regression_label.as_deref().unwrap_or_default();
        let Some((target_column, file_path)) = self.cfg.measurements_paths.get(label) else {
            return Err(PipelineError::config(format!(
                "regression label '{label}' has no entry in 'measurements_paths'"
            )));
        };

        let measurements = load_measurements(file_path)?;
        if !measurements.columns.iter().any(|c| c == target_column) {
            return Err(PipelineError::integrity(format!(
                "measurement file '{}' has no column '{target_column}'",
                file_path.display()
            )));
        }

        let data = self.filter_data(data);

        // one_to_one: identity keys must be unique on both sides
        let mut by_identity: HashMap<&[String; 5], usize> = HashMap::new();
        for (i, row) in measurements.rows.iter().enumerate() {
            if by_identity.insert(&row.identity, i).is_some() {
                return Err(PipelineError::integrity(format!(
                    "duplicate measurement for {:?} in '{}'",
                    row.identity,
                    file_path.display()
                )));
            }
        }
        let mut seen = HashMap::new();
        for row in 0..data.len() {
            let identity = data.identity(row);
            if let Some(first) = seen.insert(identity.clone(), row) {
                return Err(PipelineError::integrity(format!(
                    "metadata rows {first} and {row} share identity {identity:?}"
                )));
            }
        }

        // inner join, keeping metadata order
        let mut value = Vec::with_capacity(data.len());
        for row in 0..data.len() {
            let identity = data.identity(row);
            let Some(&m) = by_identity.get(&identity) else {
                continue;
            };
            let raw = measurements.rows[m]
                .values
                .get(target_column)
                .map(String::as_str)
                .unwrap_or("");
            let parsed = raw.trim().parse::<f64>().map_err(|_| {
                PipelineError::integrity(format!(
                    "measurement '{target_column}' for {identity:?} is not numeric: '{raw}'"
                ))
            })?;
            value.push(parsed);
        }

        if value.len() != data.len() {
            error!(
                "Number of rows in metadata and measurements do not match. \
                 Metadata: {}, measurements: {}.",
                data.len(),
                value.len()
            );
            return Err(PipelineError::integrity(format!(
                "number of rows in metadata and measurements do not match: metadata {}, joined {}",
                data.len(),
                value.len()
            )));
        }

        info!("attached regression target '{target_column}' to {} rows", value.len());
        data.with_target(Target::Regression(RegressionTarget {
            name: target_column.clone(),
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::data::model::tests::meta_row;
    use crate::data::model::{LabelKey, MetadataValue};

    fn general() -> GeneralConfig {
        let set = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        GeneralConfig {
            varieties: set(&["V1", "V2"]),
            treatments: set(&["T1"]),
            dates: set(&["2023_06_01", "2023_06_15"]),
        }
    }

    fn dataset() -> StructuredData {
        let meta = vec![
            meta_row("2023_06_01", "T1", 1, 1, "V2"),
            meta_row("2023_06_01", "T1", 1, 2, "V1"),
            meta_row("2023_06_01", "T9", 1, 3, "V1"),
            meta_row("2023_06_15", "T1", 1, 1, "V2"),
            meta_row("2023_06_15", "T1", 1, 4, "V3"),
        ];
        let data = (0..5).map(|i| vec![i as f64, 1.0]).collect();
        StructuredData::new(vec!["red".into(), "nir".into()], data, meta).unwrap()
    }

    fn classification_cfg(labels: &[&str]) -> FormatterConfig {
        FormatterConfig {
            formatter: "ClassificationFormatter".into(),
            classification_labels: labels.iter().map(|s| s.to_string()).collect(),
            regression_label: None,
            measurements_paths: BTreeMap::new(),
        }
    }

    fn regression_cfg(path: PathBuf) -> FormatterConfig {
        let mut paths = BTreeMap::new();
        paths.insert("yield".to_string(), ("Pridelek".to_string(), path));
        FormatterConfig {
            formatter: "RegressionFormatter".into(),
            classification_labels: Vec::new(),
            regression_label: Some("yield".into()),
            measurements_paths: paths,
        }
    }

    fn write_sheet(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("yield.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
        path
    }

    const HEADER: &str = "Datum,Poskus,Blok,Rastlina,Sorta,Pridelek\n";

    #[test]
    fn classification_filters_then_encodes_in_order() {
        let f = ClassificationFormatter::new(general(), &classification_cfg(&["varieties"])).unwrap();
        let out = f.format(&dataset()).unwrap();
        assert_eq!(out.len(), 3);
        let Some(Target::Classification(t)) = out.target else {
            panic!("expected classification target");
        };
        // V2 occurs first, so it gets code 0
        assert_eq!(t.value, vec![0, 1, 0]);
        assert_eq!(
            t.encoding,
            vec![LabelKey(vec!["V2".into()]), LabelKey(vec!["V1".into()])]
        );
    }

    #[test]
    fn classification_composes_tuple_labels() {
        let f = ClassificationFormatter::new(general(), &classification_cfg(&["varieties", "dates"]))
            .unwrap();
        let out = f.format(&dataset()).unwrap();
        let Some(Target::Classification(t)) = out.target else {
            panic!("expected classification target");
        };
        assert_eq!(t.n_classes(), 3);
        assert_eq!(
            t.label[2],
            LabelKey(vec![MetadataValue::from("V2"), MetadataValue::from("2023_06_15")])
        );
    }

    #[test]
    fn classification_requires_label_columns() {
        let f = ClassificationFormatter::new(general(), &classification_cfg(&["soil"])).unwrap();
        let err = f.format(&dataset()).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
        assert!(ClassificationFormatter::new(general(), &classification_cfg(&[])).is_err());
    }

    #[test]
    fn regression_joins_in_metadata_order() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!(
            "{HEADER}15.06.2023,T1,1,1,V2,4.5\n01.06.2023,T1,1,2,V1,2.0\n\
             01.06.2023,T1,1,1,V2,1.5\n01.06.2023,T1,1,9,V1,9.9\n"
        );
        let f = RegressionFormatter::new(general(), &regression_cfg(write_sheet(dir.path(), &body)))
            .unwrap();
        let out = f.format(&dataset()).unwrap();
        let Some(Target::Regression(t)) = out.target else {
            panic!("expected regression target");
        };
        assert_eq!(t.name, "Pridelek");
        assert_eq!(t.value, vec![1.5, 2.0, 4.5]);
    }

    #[test]
    fn regression_rejects_duplicate_measurements() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!(
            "{HEADER}01.06.2023,T1,1,1,V2,1.5\n01.06.2023,T1,1,2,V1,2.0\n\
             15.06.2023,T1,1,1,V2,4.5\n15.06.2023,T1,1,1,V2,4.6\n"
        );
        let f = RegressionFormatter::new(general(), &regression_cfg(write_sheet(dir.path(), &body)))
            .unwrap();
        let err = f.format(&dataset()).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn regression_rejects_duplicate_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{HEADER}01.06.2023,T1,1,1,V2,1.5\n01.06.2023,T1,1,2,V1,2.0\n");
        let f = RegressionFormatter::new(general(), &regression_cfg(write_sheet(dir.path(), &body)))
            .unwrap();
        let meta = vec![
            meta_row("2023_06_01", "T1", 1, 1, "V2"),
            meta_row("2023_06_01", "T1", 1, 2, "V1"),
            meta_row("2023_06_01", "T1", 1, 1, "V2"),
        ];
        let data = (0..3).map(|i| vec![i as f64, 1.0]).collect();
        let data = StructuredData::new(vec!["red".into(), "nir".into()], data, meta).unwrap();
        let err = f.format(&data).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
        assert!(err.to_string().contains("share identity"), "{err}");
    }

    #[test]
    fn regression_rejects_missing_measurements() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{HEADER}01.06.2023,T1,1,1,V2,1.5\n01.06.2023,T1,1,2,V1,2.0\n");
        let f = RegressionFormatter::new(general(), &regression_cfg(write_sheet(dir.path(), &body)))
            .unwrap();
        let err = f.format(&dataset()).unwrap_err();
        assert!(err.to_string().contains("metadata 3, joined 2"));
    }

    #[test]
    fn regression_config_is_checked_up_front() {
        let mut cfg = regression_cfg(PathBuf::from("missing.csv"));
        cfg.regression_label = Some("height".into());
        assert!(RegressionFormatter::new(general(), &cfg).unwrap_err().is_configuration());
    }
}
