use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::IDENTITY_COLUMNS;
use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// MetadataValue – a single cell in a metadata column
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value (date, treatment, block, ...).
/// Label keys are built from these, so `MetadataValue` must be `Ord + Hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn discriminant(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for MetadataValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            MetadataValue::String(s) => s.hash(state),
            MetadataValue::Integer(i) => i.hash(state),
            MetadataValue::Float(f) => f.to_bits().hash(state),
            MetadataValue::Bool(b) => b.hash(state),
            MetadataValue::Null => {}
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl MetadataValue {
    /// Canonical text used for design filtering and join matching, so that
    /// `Integer(3)` read from parquet matches `"3"` read from a CSV sheet.
    pub fn as_key(&self) -> String {
        match self {
            MetadataValue::Null => String::new(),
            MetadataValue::Float(v) if v.fract() == 0.0 && v.is_finite() => {
                format!("{}", *v as i64)
            }
            other => other.to_string(),
        }
    }

    /// Try to interpret the value as an `f64` feature cell.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Parse a raw text cell, guessing the narrowest type.
    pub fn guess(s: &str) -> Self {
        if s.is_empty() {
            return MetadataValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return MetadataValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return MetadataValue::Float(f);
        }
        if s == "true" || s == "false" {
            return MetadataValue::Bool(s == "true");
        }
        MetadataValue::String(s.to_string())
    }
}

/// One row of metadata: column name → value.
pub type MetaRow = BTreeMap<String, MetadataValue>;

/// Composite label made of the values of several meta columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelKey(pub Vec<MetadataValue>);

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Encoded classification target.
///
/// `encoding[code]` is the label that `code` stands for. Codes follow the
/// first-occurrence order of labels in the formatted rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationTarget {
    pub label: Vec<LabelKey>,
    pub value: Vec<usize>,
    pub encoding: Vec<LabelKey>,
}

impl ClassificationTarget {
    /// Factorize labels into integer codes in first-occurrence order.
    pub fn factorize(label: Vec<LabelKey>) -> Self {
        let mut codes: std::collections::HashMap<LabelKey, usize> =
            std::collections::HashMap::new();
        let mut encoding = Vec::new();
        let value = label
            .iter()
            .map(|key| {
                *codes.entry(key.clone()).or_insert_with(|| {
                    encoding.push(key.clone());
                    encoding.len() - 1
                })
            })
            .collect();
        Self {
            label,
            value,
            encoding,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.encoding.len()
    }
}

/// Continuous regression target taken from a measurement column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTarget {
    pub name: String,
    pub value: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Classification(ClassificationTarget),
    Regression(RegressionTarget),
}

impl Target {
    pub fn len(&self) -> usize {
        match self {
            Target::Classification(t) => t.value.len(),
            Target::Regression(t) => t.value.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of the target, class codes widened to `f64`.
    pub fn values_f64(&self) -> Vec<f64> {
        match self {
            Target::Classification(t) => t.value.iter().map(|&v| v as f64).collect(),
            Target::Regression(t) => t.value.clone(),
        }
    }

    /// Class codes, or `None` for a regression target.
    pub fn codes(&self) -> Option<&[usize]> {
        match self {
            Target::Classification(t) => Some(&t.value),
            Target::Regression(_) => None,
        }
    }

    /// Slice rows; the encoding table is kept whole so codes stay comparable
    /// across partitions.
    fn select(&self, indices: &[usize]) -> Self {
        match self {
            Target::Classification(t) => Target::Classification(ClassificationTarget {
                label: indices.iter().map(|&i| t.label[i].clone()).collect(),
                value: indices.iter().map(|&i| t.value[i]).collect(),
                encoding: t.encoding.clone(),
            }),
            Target::Regression(t) => Target::Regression(RegressionTarget {
                name: t.name.clone(),
                value: indices.iter().map(|&i| t.value[i]).collect(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// StructuredData – feature matrix + row metadata + target
// ---------------------------------------------------------------------------

/// Tabular samples with positionally aligned rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    /// Names of the feature columns, in matrix column order.
    pub features: Vec<String>,
    /// Feature matrix, one `Vec` per row.
    pub data: Vec<Vec<f64>>,
    /// Per-row metadata.
    pub meta: Vec<MetaRow>,
    /// Absent until a formatter attaches one.
    pub target: Option<Target>,
}

impl StructuredData {
    /// Build an unformatted dataset, checking alignment and identity columns.
    pub fn new(features: Vec<String>, data: Vec<Vec<f64>>, meta: Vec<MetaRow>) -> Result<Self> {
        if data.len() != meta.len() {
            return Err(PipelineError::integrity(format!(
                "feature matrix has {} rows but metadata has {}",
                data.len(),
                meta.len()
            )));
        }
        if let Some((row, width)) = data
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, w)| *w != features.len())
        {
            return Err(PipelineError::integrity(format!(
                "row {row} has {width} features, expected {}",
                features.len()
            )));
        }
        let ds = Self {
            features,
            data,
            meta,
            target: None,
        };
        ds.require_columns(&IDENTITY_COLUMNS)?;
        Ok(ds)
    }

    /// Attach a target, consuming `self`.
    pub fn with_target(mut self, target: Target) -> Result<Self> {
        if target.len() != self.len() {
            return Err(PipelineError::integrity(format!(
                "target has {} values but data has {} rows",
                target.len(),
                self.len()
            )));
        }
        self.target = Some(target);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Fail unless every row carries each of `columns`.
    pub fn require_columns(&self, columns: &[&str]) -> Result<()> {
        for (row, meta) in self.meta.iter().enumerate() {
            if let Some(missing) = columns.iter().find(|c| !meta.contains_key(**c)) {
                return Err(PipelineError::integrity(format!(
                    "metadata row {row} is missing column '{missing}'"
                )));
            }
        }
        Ok(())
    }

    /// Composite key of `columns` for one row.
    pub fn key(&self, row: usize, columns: &[String]) -> LabelKey {
        LabelKey(
            columns
                .iter()
                .map(|c| self.meta[row].get(c).cloned().unwrap_or(MetadataValue::Null))
                .collect(),
        )
    }

    /// The (date, treatment, block, plant, variety) identity of one row,
    /// in canonical text form.
    pub fn identity(&self, row: usize) -> [String; 5] {
        IDENTITY_COLUMNS.map(|c| {
            self.meta[row]
                .get(c)
                .map(MetadataValue::as_key)
                .unwrap_or_default()
        })
    }

    /// New instance holding rows `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.clone(),
            data: indices.iter().map(|&i| self.data[i].clone()).collect(),
            meta: indices.iter().map(|&i| self.meta[i].clone()).collect(),
            target: self.target.as_ref().map(|t| t.select(indices)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a meta row from the five identity values.
    pub fn meta_row(date: &str, treatment: &str, block: i64, plant: i64, variety: &str) -> MetaRow {
        let mut m = MetaRow::new();
        m.insert("dates".into(), date.into());
        m.insert("treatments".into(), treatment.into());
        m.insert("blocks".into(), block.into());
        m.insert("plants".into(), plant.into());
        m.insert("varieties".into(), variety.into());
        m
    }

    fn key(s: &str) -> LabelKey {
        LabelKey(vec![s.into()])
    }

    #[test]
    fn factorize_uses_first_occurrence_order() {
        let t = ClassificationTarget::factorize(vec![key("A"), key("B"), key("A"), key("C")]);
        assert_eq!(t.value, vec![0, 1, 0, 2]);
        assert_eq!(t.encoding, vec![key("A"), key("B"), key("C")]);

        let t = ClassificationTarget::factorize(vec![key("z"), key("a")]);
        assert_eq!(t.encoding, vec![key("z"), key("a")]);
    }

    #[test]
    fn select_keeps_alignment_and_encoding() {
        let meta = vec![
            meta_row("2023_06_01", "T1", 1, 1, "V1"),
            meta_row("2023_06_01", "T1", 1, 2, "V2"),
            meta_row("2023_06_01", "T1", 1, 3, "V1"),
        ];
        let data = vec![vec![1.0], vec![2.0], vec![3.0]];
        let ds = StructuredData::new(vec!["nir".into()], data, meta).unwrap();
        let target = ClassificationTarget::factorize(vec![key("x"), key("y"), key("z")]);
        let ds = ds.with_target(Target::Classification(target)).unwrap();

        let sub = ds.select(&[2, 0]);
        assert_eq!(sub.data, vec![vec![3.0], vec![1.0]]);
        assert_eq!(sub.meta[0]["plants"], MetadataValue::Integer(3));
        match sub.target.unwrap() {
            Target::Classification(t) => {
                assert_eq!(t.value, vec![2, 0]);
                assert_eq!(t.encoding.len(), 3);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn new_rejects_missing_identity_column() {
        let mut m = meta_row("2023_06_01", "T1", 1, 1, "V1");
        m.remove("blocks");
        let err = StructuredData::new(vec![], vec![vec![]], vec![m]).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
        assert!(err.to_string().contains("blocks"));
    }

    #[test]
    fn new_rejects_misaligned_rows() {
        let err = StructuredData::new(vec!["b".into()], vec![vec![1.0]], vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn as_key_normalises_numbers() {
        assert_eq!(MetadataValue::Integer(4).as_key(), "4");
        assert_eq!(MetadataValue::Float(4.0).as_key(), "4");
        assert_eq!(MetadataValue::Float(4.5).as_key(), "4.5");
        assert_eq!(MetadataValue::guess("07"), MetadataValue::Integer(7));
        assert_eq!(MetadataValue::guess("K1"), MetadataValue::String("K1".into()));
    }
}
