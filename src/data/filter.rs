use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::model::{MetadataValue, StructuredData};
use crate::config::{GeneralConfig, DATE_ENG, TREATMENT_ENG, VARIETY_ENG};

// ---------------------------------------------------------------------------
// Filter predicate: which values are admissible per column
// ---------------------------------------------------------------------------

/// Per-column admissible values: column_name → set of canonical keys.
pub type FilterState = BTreeMap<String, BTreeSet<String>>;

/// The experimental design as a [`FilterState`] over variety, treatment and date.
pub fn design_filter(cfg: &GeneralConfig) -> FilterState {
    let mut filters = FilterState::new();
    filters.insert(VARIETY_ENG.to_string(), cfg.varieties.clone());
    filters.insert(TREATMENT_ENG.to_string(), cfg.treatments.clone());
    filters.insert(DATE_ENG.to_string(), cfg.dates.clone());
    filters
}

/// Return indices of rows that pass every column filter, in input order.
///
/// A row passes a column filter when its value for that column, in
/// canonical key form, is in the admissible set. A row lacking the column
/// never passes, and an empty admissible set rejects every row.
pub fn filtered_indices(data: &StructuredData, filters: &FilterState) -> Vec<usize> {
    data.meta
        .iter()
        .enumerate()
        .filter(|(_, meta)| {
            filters.iter().all(|(col, admissible)| {
                meta.get(col)
                    .map(MetadataValue::as_key)
                    .is_some_and(|key| admissible.contains(&key))
            })
        })
        .map(|(i, _)| i)
        .collect()
}

/// Keep only rows inside the declared design, preserving relative order.
pub fn filter_to_design(data: &StructuredData, cfg: &GeneralConfig) -> StructuredData {
    let indices = filtered_indices(data, &design_filter(cfg));
    debug!(
        "design filter kept {} of {} rows",
        indices.len(),
        data.len()
    );
    data.select(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::meta_row;

    fn dataset() -> StructuredData {
        let meta = vec![
            meta_row("2023_06_01", "T1", 1, 1, "V1"),
            meta_row("2023_06_01", "T2", 1, 2, "V1"),
            meta_row("2023_06_15", "T1", 1, 3, "V2"),
            meta_row("2023_07_01", "T1", 1, 4, "V1"),
            meta_row("2023_06_15", "T1", 1, 5, "V3"),
            meta_row("2023_06_01", "T1", 2, 1, "V2"),
        ];
        let data = (0..6).map(|i| vec![i as f64]).collect();
        StructuredData::new(vec!["red".into()], data, meta).unwrap()
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filter_is_a_conjunction() {
        let cfg = GeneralConfig {
            varieties: set(&["V1", "V2"]),
            treatments: set(&["T1"]),
            dates: set(&["2023_06_01", "2023_06_15"]),
        };
        let filtered = filter_to_design(&dataset(), &cfg);
        // rows 1 (T2), 3 (July) and 4 (V3) drop out
        let kept: Vec<f64> = filtered.data.iter().map(|r| r[0]).collect();
        assert_eq!(kept, vec![0.0, 2.0, 5.0]);
    }

    #[test]
    fn empty_set_rejects_everything() {
        let cfg = GeneralConfig {
            varieties: set(&["V1"]),
            treatments: BTreeSet::new(),
            dates: set(&["2023_06_01"]),
        };
        assert!(filter_to_design(&dataset(), &cfg).is_empty());
    }

    #[test]
    fn numeric_values_match_textual_keys() {
        let mut filters = FilterState::new();
        filters.insert("blocks".into(), set(&["2"]));
        assert_eq!(filtered_indices(&dataset(), &filters), vec![5]);
    }
}
