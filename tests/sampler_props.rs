//! Property tests for the splitters:
//! - partitions are disjoint and cover every row
//! - a plant group never straddles two partitions
//! - the same seed gives the same split
//! - ratio apportioning is exact

use std::collections::{BTreeMap, BTreeSet};

use agrospec::config::PLANT_GROUP_COLUMNS;
use agrospec::data::model::{
    ClassificationTarget, LabelKey, MetaRow, MetadataValue, StructuredData, Target,
};
use agrospec::data::sampler::{
    apportion, Ratios, SimpleSplitter, SimpleSplitterParams, SplitIndices, Splitter,
    StratifyAllParams, StratifyAllSplitter,
};
use agrospec::error::PipelineError;
use proptest::collection::vec;
use proptest::prelude::*;

// =============================================================================
// Strategy Helpers
// =============================================================================

/// (rows in group, class of group) for each plant group
fn groups() -> impl Strategy<Value = Vec<(usize, usize)>> {
    vec((1usize..4, 0usize..3), 4..40)
}

fn ratios() -> impl Strategy<Value = (f64, f64, f64)> {
    prop_oneof![
        Just((0.7, 0.15, 0.15)),
        Just((0.6, 0.2, 0.2)),
        Just((0.5, 0.25, 0.25)),
        Just((0.8, 0.0, 0.2)),
    ]
}

fn dataset(groups: &[(usize, usize)]) -> StructuredData {
    let mut meta = Vec::new();
    let mut labels = Vec::new();
    for (plant, &(rows, class)) in groups.iter().enumerate() {
        for day in 0..rows {
            let mut row = MetaRow::new();
            row.insert("dates".into(), MetadataValue::from(format!("2023_06_{:02}", day + 1).as_str()));
            row.insert("treatments".into(), "control".into());
            row.insert("blocks".into(), 1i64.into());
            row.insert("plants".into(), (plant as i64).into());
            row.insert("varieties".into(), MetadataValue::from(format!("V{class}").as_str()));
            meta.push(row);
            labels.push(LabelKey(vec![MetadataValue::from(format!("V{class}").as_str())]));
        }
    }
    let n = meta.len();
    StructuredData::new(vec!["nir".into()], vec![vec![0.5]; n], meta)
        .unwrap()
        .with_target(Target::Classification(ClassificationTarget::factorize(labels)))
        .unwrap()
}

fn stratify_all((train, val, test): (f64, f64, f64), seed: u64) -> StratifyAllSplitter {
    StratifyAllSplitter::new(StratifyAllParams {
        train_ratio: train,
        val_ratio: val,
        test_ratio: test,
        seed,
        stratify: Vec::new(),
        group_by: PLANT_GROUP_COLUMNS.iter().map(|c| c.to_string()).collect(),
        stratify_label: true,
    })
    .unwrap()
}

fn assert_partition(split: &SplitIndices, n: usize) -> Result<(), TestCaseError> {
    let mut seen = BTreeSet::new();
    for part in split.parts() {
        for &row in part {
            prop_assert!(row < n, "row {} out of range", row);
            prop_assert!(seen.insert(row), "row {} assigned twice", row);
        }
    }
    prop_assert_eq!(seen.len(), n);
    Ok(())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_apportion_is_exact(total in 0usize..500, r in ratios()) {
        let ratios = Ratios::new(r.0, r.1, r.2).unwrap();
        let parts = apportion(total, &ratios);
        prop_assert_eq!(parts.iter().sum::<usize>(), total);
        for (p, &size) in parts.iter().enumerate() {
            let ideal = total as f64 * ratios.get(p);
            prop_assert!((size as f64 - ideal).abs() < 1.0 + 1e-9);
        }
    }

    #[test]
    fn prop_simple_split_covers_rows(groups in groups(), r in ratios(), seed in any::<u64>()) {
        let data = dataset(&groups);
        let splitter = SimpleSplitter::new(SimpleSplitterParams {
            train_ratio: r.0,
            val_ratio: r.1,
            test_ratio: r.2,
            seed,
        })
        .unwrap();
        match splitter.split(&data) {
            Ok(split) => {
                assert_partition(&split, data.len())?;
                prop_assert_eq!(split, splitter.split(&data).unwrap());
            }
            Err(e) => prop_assert!(matches!(e, PipelineError::InsufficientData(_)), "{}", e),
        }
    }

    #[test]
    fn prop_groups_stay_whole(groups in groups(), r in ratios(), seed in any::<u64>()) {
        let data = dataset(&groups);
        let splitter = stratify_all(r, seed);
        let split = match splitter.split(&data) {
            Ok(split) => split,
            Err(e) => {
                prop_assert!(matches!(e, PipelineError::InsufficientData(_)), "{}", e);
                return Ok(());
            }
        };
        assert_partition(&split, data.len())?;

        let mut owner: BTreeMap<String, usize> = BTreeMap::new();
        for (p, part) in split.parts().iter().enumerate() {
            for &row in part.iter() {
                let plant = data.meta[row]["plants"].as_key();
                let first = *owner.entry(plant.clone()).or_insert(p);
                prop_assert_eq!(first, p, "plant {} split across partitions", plant);
            }
        }
        prop_assert_eq!(split, splitter.split(&data).unwrap());
    }

    #[test]
    fn prop_every_class_reaches_every_active_partition(
        per_class in 3usize..12,
        seed in any::<u64>(),
    ) {
        let groups: Vec<(usize, usize)> =
            (0..per_class * 2).map(|g| (1 + g % 2, g % 2)).collect();
        let data = dataset(&groups);
        let split = stratify_all((0.6, 0.2, 0.2), seed).split(&data).unwrap();
        let codes = data.target.as_ref().and_then(Target::codes).unwrap();
        for part in split.parts() {
            let classes: BTreeSet<usize> = part.iter().map(|&r| codes[r]).collect();
            prop_assert_eq!(classes.len(), 2);
        }
    }
}
