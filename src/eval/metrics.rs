//! Classification and regression metrics.

use serde::Serialize;

/// Confusion matrix: `matrix[true][pred]` counts.
#[derive(Clone, Debug)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    n_classes: usize,
}

impl ConfusionMatrix {
    /// `n_classes` is a lower bound; codes beyond it widen the matrix.
    pub fn from_predictions(y_pred: &[usize], y_true: &[usize], n_classes: usize) -> Self {
        let n_classes = y_pred
            .iter()
            .chain(y_true)
            .map(|&c| c + 1)
            .max()
            .unwrap_or(0)
            .max(n_classes);
        let mut matrix = vec![vec![0; n_classes]; n_classes];
        for (&pred, &truth) in y_pred.iter().zip(y_true) {
            matrix[truth][pred] += 1;
        }
        Self { matrix, n_classes }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn get(&self, true_label: usize, predicted_label: usize) -> usize {
        self.matrix[true_label][predicted_label]
    }

    fn true_positives(&self, class: usize) -> usize {
        self.matrix[class][class]
    }

    fn predicted(&self, class: usize) -> usize {
        self.matrix.iter().map(|row| row[class]).sum()
    }

    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.n_classes).map(|i| self.matrix[i][i]).sum();
        correct as f64 / total as f64
    }
}

/// Per-class precision / recall / F1 with zero-division mapped to 0.
#[derive(Clone, Debug)]
pub struct ClassMetrics {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
    pub support: Vec<usize>,
    pub accuracy: f64,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix) -> Self {
        let n = cm.n_classes();
        let mut metrics = Self {
            precision: Vec::with_capacity(n),
            recall: Vec::with_capacity(n),
            f1: Vec::with_capacity(n),
            support: Vec::with_capacity(n),
            accuracy: cm.accuracy(),
        };
        for class in 0..n {
            let tp = cm.true_positives(class) as f64;
            let predicted = cm.predicted(class) as f64;
            let actual = cm.support(class) as f64;
            let p = if predicted > 0.0 { tp / predicted } else { 0.0 };
            let r = if actual > 0.0 { tp / actual } else { 0.0 };
            let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
            metrics.precision.push(p);
            metrics.recall.push(r);
            metrics.f1.push(f);
            metrics.support.push(cm.support(class));
        }
        metrics
    }

    fn weighted(&self, values: &[f64]) -> f64 {
        let total: usize = self.support.iter().sum();
        if total == 0 {
            return 0.0;
        }
        values
            .iter()
            .zip(&self.support)
            .map(|(&v, &s)| v * s as f64)
            .sum::<f64>()
            / total as f64
    }

    fn macro_avg(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Support-weighted (precision, recall, f1).
    pub fn weighted_prf(&self) -> (f64, f64, f64) {
        (
            self.weighted(&self.precision),
            self.weighted(&self.recall),
            self.weighted(&self.f1),
        )
    }

    /// Text report, one row per class in code order, named by `names`.
    pub fn report(&self, names: &[String]) -> String {
        let width = names.iter().map(String::len).max().unwrap_or(0).max(12);
        let mut report = format!(
            "{:>width$} {:>10} {:>10} {:>10} {:>10}\n\n",
            "", "precision", "recall", "f1-score", "support"
        );
        for class in 0..self.support.len() {
            let name = names
                .get(class)
                .cloned()
                .unwrap_or_else(|| class.to_string());
            report.push_str(&format!(
                "{:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
                name, self.precision[class], self.recall[class], self.f1[class], self.support[class]
            ));
        }
        let total: usize = self.support.iter().sum();
        report.push('\n');
        report.push_str(&format!(
            "{:>width$} {:>10} {:>10} {:>10.2} {:>10}\n",
            "accuracy", "", "", self.accuracy, total
        ));
        report.push_str(&format!(
            "{:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
            "macro avg",
            Self::macro_avg(&self.precision),
            Self::macro_avg(&self.recall),
            Self::macro_avg(&self.f1),
            total
        ));
        let (p, r, f) = self.weighted_prf();
        report.push_str(&format!(
            "{:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
            "weighted avg", p, r, f, total
        ));
        report
    }
}

/// Error summary of a regression fit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(y_pred: &[f64], y_true: &[f64]) -> Self {
        let n = y_true.len().min(y_pred.len());
        if n == 0 {
            return Self {
                mae: 0.0,
                mse: 0.0,
                rmse: 0.0,
                r2: 0.0,
            };
        }
        let nf = n as f64;
        let (abs, sq) = y_pred
            .iter()
            .zip(y_true)
            .fold((0.0, 0.0), |(a, s), (p, t)| (a + (p - t).abs(), s + (p - t).powi(2)));
        let mean = y_true.iter().take(n).sum::<f64>() / nf;
        let ss_tot: f64 = y_true.iter().take(n).map(|t| (t - mean).powi(2)).sum();
        // constant truth: perfect fit scores 1, anything else 0
        let r2 = if ss_tot > 0.0 {
            1.0 - sq / ss_tot
        } else if sq == 0.0 {
            1.0
        } else {
            0.0
        };
        let mse = sq / nf;
        Self {
            mae: abs / nf,
            mse,
            rmse: mse.sqrt(),
            r2,
        }
    }
}
