//! Train / validation / test partitioning.
//!
//! Both splitters share the same allocation step: a table of strata ×
//! partitions is filled by largest-remainder rounding so that each stratum
//! is split close to the requested ratios while the column totals match
//! the globally apportioned partition sizes. [`SimpleSplitter`] allocates
//! rows; [`StratifyAllSplitter`] allocates whole plant groups so repeated
//! measurements of one plant never straddle two partitions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use super::model::{LabelKey, MetadataValue, StructuredData};
use crate::config::{PLANT_GROUP_COLUMNS, RANDOM_SEED};
use crate::error::{PipelineError, Result};

const RATIO_TOLERANCE: f64 = 1e-6;
const FLOOR_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Ratios
// ---------------------------------------------------------------------------

pub const PARTITIONS: [&str; 3] = ["train", "val", "test"];

/// Validated train / val / test ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratios([f64; 3]);

impl Ratios {
    /// Ratios must be non-negative and sum to one.
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self> {
        let raw = [train, val, test];
        if raw.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(PipelineError::config(format!(
                "split ratios must be non-negative, got train={train}, val={val}, test={test}"
            )));
        }
        let sum: f64 = raw.iter().sum();
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(PipelineError::config(format!(
                "split ratios must sum to 1, got train={train} + val={val} + test={test} = {sum}"
            )));
        }
        Ok(Self(raw.map(|r| r / sum)))
    }

    pub fn get(&self, partition: usize) -> f64 {
        self.0[partition]
    }

    /// Partitions that must receive data.
    pub fn active(&self) -> [bool; 3] {
        self.0.map(|r| r > 0.0)
    }

    pub fn active_count(&self) -> usize {
        self.active().iter().filter(|a| **a).count()
    }
}

/// Floor of `n * ratio` and the fractional remainder.
fn quota(n: usize, ratio: f64) -> (usize, f64) {
    let exact = n as f64 * ratio;
    let floor = (exact + FLOOR_EPSILON).floor();
    (floor as usize, (exact - floor).max(0.0))
}

/// Split `total` into three integer sizes by largest remainder.
/// Ties go to the earlier partition.
pub fn apportion(total: usize, ratios: &Ratios) -> [usize; 3] {
    let mut sizes = [0usize; 3];
    let mut remainders = Vec::with_capacity(3);
    for (p, size) in sizes.iter_mut().enumerate() {
        let (floor, rem) = quota(total, ratios.get(p));
        *size = floor;
        if ratios.get(p) > 0.0 {
            remainders.push((rem, p));
        }
    }
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    let mut assigned: usize = sizes.iter().sum();
    for &(_, p) in remainders.iter().cycle().take(remainders.len() * 3) {
        if assigned >= total {
            break;
        }
        sizes[p] += 1;
        assigned += 1;
    }
    while assigned > total {
        // only reachable through the floor epsilon; shrink the largest partition
        let Some(p) = (0..3).max_by_key(|&p| (sizes[p], std::cmp::Reverse(p))) else {
            break;
        };
        sizes[p] -= 1;
        assigned -= 1;
    }
    sizes
}

/// Allocate each stratum's items over the three partitions.
///
/// Each active cell starts at `max(floor(n * ratio), min_each)`. Leftover
/// items are handed out by descending fractional remainder (ties: earlier
/// stratum, then earlier partition) while both the stratum and the
/// partition total still have room; anything left after that goes to the
/// partition furthest below its global total.
///
/// Callers must ensure every stratum holds at least
/// `min_each * ratios.active_count()` items.
pub fn allocate(sizes: &[usize], ratios: &Ratios, min_each: usize) -> Vec<[usize; 3]> {
    let active = ratios.active();
    let totals = apportion(sizes.iter().sum(), ratios);

    let mut cells = Vec::with_capacity(sizes.len());
    let mut remainders = Vec::new();
    for (s, &n) in sizes.iter().enumerate() {
        let mut cell = [0usize; 3];
        for p in (0..3).filter(|&p| active[p]) {
            let (floor, rem) = quota(n, ratios.get(p));
            cell[p] = floor.max(min_each);
            remainders.push((rem, s, p));
        }
        while cell.iter().sum::<usize>() > n {
            let Some(p) = (0..3)
                .filter(|&p| cell[p] > min_each)
                .max_by_key(|&p| (cell[p], std::cmp::Reverse(p)))
            else {
                break;
            };
            cell[p] -= 1;
        }
        cells.push(cell);
    }

    let mut short: Vec<usize> = sizes
        .iter()
        .zip(&cells)
        .map(|(&n, cell)| n.saturating_sub(cell.iter().sum()))
        .collect();
    let mut need = [0i64; 3];
    for p in 0..3 {
        need[p] = totals[p] as i64 - cells.iter().map(|c| c[p] as i64).sum::<i64>();
    }

    remainders.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });
    for &(rem, s, p) in &remainders {
        if rem > 0.0 && short[s] > 0 && need[p] > 0 {
            cells[s][p] += 1;
            short[s] -= 1;
            need[p] -= 1;
        }
    }

    for (s, cell) in cells.iter_mut().enumerate() {
        while short[s] > 0 {
            let Some(p) = (0..3)
                .filter(|&p| active[p])
                .max_by_key(|&p| (need[p], std::cmp::Reverse(p)))
            else {
                break;
            };
            cell[p] += 1;
            short[s] -= 1;
            need[p] -= 1;
        }
    }
    cells
}

// ---------------------------------------------------------------------------
// Split result
// ---------------------------------------------------------------------------

/// Row indices of the three partitions, each in ascending input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    fn from_buckets(mut buckets: [Vec<usize>; 3]) -> Self {
        for b in &mut buckets {
            b.sort_unstable();
        }
        let [train, val, test] = buckets;
        Self { train, val, test }
    }

    pub fn parts(&self) -> [&[usize]; 3] {
        [self.train.as_slice(), self.val.as_slice(), self.test.as_slice()]
    }

    pub fn sizes(&self) -> [usize; 3] {
        self.parts().map(<[usize]>::len)
    }

    /// Fail if a partition that was asked for came out empty.
    fn ensure_populated(&self, ratios: &Ratios) -> Result<()> {
        for (p, part) in self.parts().iter().enumerate() {
            if ratios.active()[p] && part.is_empty() {
                return Err(PipelineError::insufficient(format!(
                    "{} partition would be empty (sizes train/val/test = {:?})",
                    PARTITIONS[p],
                    self.sizes()
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Splitter trait
// ---------------------------------------------------------------------------

/// A partitioning strategy, selected by name through the registry.
pub trait Splitter: fmt::Debug {
    fn name(&self) -> &'static str;

    fn split(&self, data: &StructuredData) -> Result<SplitIndices>;
}

/// Most frequent item; ties go to the item seen first.
fn dominant<T: Eq + Hash + Clone>(items: impl IntoIterator<Item = T>) -> Option<T> {
    let mut counts: HashMap<T, (usize, usize)> = HashMap::new();
    for (order, item) in items.into_iter().enumerate() {
        counts.entry(item).or_insert((0, order)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| match a.1.0.cmp(&b.1.0) {
            Ordering::Equal => b.1.1.cmp(&a.1.1),
            other => other,
        })
        .map(|(item, _)| item)
}

/// Bucket `keys` by value, buckets in first-occurrence order.
fn first_occurrence_buckets<K: Eq + Hash + Clone>(
    keys: impl IntoIterator<Item = K>,
) -> (Vec<K>, Vec<Vec<usize>>) {
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut order: Vec<K> = Vec::new();
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    for (i, key) in keys.into_iter().enumerate() {
        match index.get(&key) {
            Some(&b) => buckets[b].push(i),
            None => {
                index.insert(key.clone(), buckets.len());
                order.push(key);
                buckets.push(vec![i]);
            }
        }
    }
    (order, buckets)
}

// ---------------------------------------------------------------------------
// SimpleSplitter
// ---------------------------------------------------------------------------

fn default_seed() -> u64 {
    RANDOM_SEED
}

/// Constructor arguments shared by the splitters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimpleSplitterParams {
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub test_ratio: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Row-level split stratified by the encoded class label.
///
/// Regression or unformatted data is treated as a single stratum.
#[derive(Debug, Clone)]
pub struct SimpleSplitter {
    ratios: Ratios,
    seed: u64,
}

impl SimpleSplitter {
    pub fn new(params: SimpleSplitterParams) -> Result<Self> {
        Ok(Self {
            ratios: Ratios::new(params.train_ratio, params.val_ratio, params.test_ratio)?,
            seed: params.seed,
        })
    }
}

impl Splitter for SimpleSplitter {
    fn name(&self) -> &'static str {
        "SimpleSplitter"
    }

    fn split(&self, data: &StructuredData) -> Result<SplitIndices> {
        if data.is_empty() {
            return Err(PipelineError::insufficient("cannot split an empty dataset"));
        }
        let codes: Vec<usize> = match data.target.as_ref().and_then(|t| t.codes()) {
            Some(codes) => codes.to_vec(),
            None => vec![0; data.len()],
        };
        let (_, mut strata) = first_occurrence_buckets(codes);

        let mut rng = StdRng::seed_from_u64(self.seed);
        for rows in &mut strata {
            rows.shuffle(&mut rng);
        }
        let sizes: Vec<usize> = strata.iter().map(Vec::len).collect();
        let alloc = allocate(&sizes, &self.ratios, 0);

        let mut buckets: [Vec<usize>; 3] = Default::default();
        for (rows, cell) in strata.iter().zip(&alloc) {
            let mut start = 0;
            for (p, &count) in cell.iter().enumerate() {
                buckets[p].extend_from_slice(&rows[start..start + count]);
                start += count;
            }
        }
        let split = SplitIndices::from_buckets(buckets);
        split.ensure_populated(&self.ratios)?;
        info!(
            "SimpleSplitter: {} strata, sizes train/val/test = {:?}",
            strata.len(),
            split.sizes()
        );
        Ok(split)
    }
}

// ---------------------------------------------------------------------------
// StratifyAllSplitter
// ---------------------------------------------------------------------------

fn default_group_by() -> Vec<String> {
    PLANT_GROUP_COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StratifyAllParams {
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub test_ratio: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Meta columns balanced across partitions, besides the label.
    #[serde(default)]
    pub stratify: Vec<String>,
    /// Columns defining an atomic group.
    #[serde(default = "default_group_by")]
    pub group_by: Vec<String>,
    /// Include the encoded class label in the stratum key.
    #[serde(default = "default_true")]
    pub stratify_label: bool,
}

/// Group-level split: every row of a plant group lands in one partition,
/// groups are stratified on the label and the configured meta columns.
#[derive(Debug, Clone)]
pub struct StratifyAllSplitter {
    ratios: Ratios,
    seed: u64,
    stratify: Vec<String>,
    group_by: Vec<String>,
    stratify_label: bool,
}

impl StratifyAllSplitter {
    pub fn new(params: StratifyAllParams) -> Result<Self> {
        if params.group_by.is_empty() {
            return Err(PipelineError::config(
                "StratifyAllSplitter needs at least one 'group_by' column",
            ));
        }
        Ok(Self {
            ratios: Ratios::new(params.train_ratio, params.val_ratio, params.test_ratio)?,
            seed: params.seed,
            stratify: params.stratify,
            group_by: params.group_by,
            stratify_label: params.stratify_label,
        })
    }

    /// Stratum key of one group: dominant label code, then the dominant value
    /// of each stratification column.
    fn stratum_key(&self, data: &StructuredData, rows: &[usize]) -> LabelKey {
        let mut key = Vec::with_capacity(self.stratify.len() + 1);
        if self.stratify_label {
            if let Some(codes) = data.target.as_ref().and_then(|t| t.codes()) {
                let code = dominant(rows.iter().map(|&r| codes[r])).unwrap_or_default();
                key.push(MetadataValue::Integer(code as i64));
            }
        }
        for column in &self.stratify {
            let value = dominant(
                rows.iter()
                    .map(|&r| data.meta[r].get(column).cloned().unwrap_or(MetadataValue::Null)),
            )
            .unwrap_or(MetadataValue::Null);
            key.push(value);
        }
        LabelKey(key)
    }
}

impl Splitter for StratifyAllSplitter {
    fn name(&self) -> &'static str {
        "StratifyAllSplitter"
    }

    fn split(&self, data: &StructuredData) -> Result<SplitIndices> {
        let mut required: Vec<&str> = self.group_by.iter().map(String::as_str).collect();
        required.extend(self.stratify.iter().map(String::as_str));
        data.require_columns(&required)?;

        let (_, groups) =
            first_occurrence_buckets((0..data.len()).map(|row| data.key(row, &self.group_by)));
        if groups.is_empty() {
            return Err(PipelineError::insufficient("cannot split an empty dataset"));
        }

        let (strata_keys, mut strata) =
            first_occurrence_buckets(groups.iter().map(|rows| self.stratum_key(data, rows)));

        let needed = self.ratios.active_count();
        for (key, members) in strata_keys.iter().zip(&strata) {
            if members.len() < needed {
                return Err(PipelineError::insufficient(format!(
                    "stratum {key} has {} group(s) but {needed} partitions each need one",
                    members.len()
                )));
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        for members in &mut strata {
            members.shuffle(&mut rng);
            // larger groups first so the row balance is settled early
            members.sort_by_key(|&g| std::cmp::Reverse(groups[g].len()));
        }

        let sizes: Vec<usize> = strata.iter().map(Vec::len).collect();
        let alloc = allocate(&sizes, &self.ratios, 1);

        let total_rows = data.len() as f64;
        let row_targets = [0, 1, 2].map(|p| total_rows * self.ratios.get(p));
        let mut row_counts = [0usize; 3];
        let mut buckets: [Vec<usize>; 3] = Default::default();
        let mut group_counts = [0usize; 3];

        for (members, cell) in strata.iter().zip(&alloc) {
            let mut slots = *cell;
            for &g in members {
                // partition with free slots that is least filled relative to its row target
                let Some(p) = (0..3)
                    .filter(|&p| slots[p] > 0)
                    .min_by(|&a, &b| {
                        let fill = |p: usize| {
                            row_counts[p] as f64 / row_targets[p].max(f64::MIN_POSITIVE)
                        };
                        fill(a).total_cmp(&fill(b)).then(a.cmp(&b))
                    })
                else {
                    break;
                };
                slots[p] -= 1;
                group_counts[p] += 1;
                row_counts[p] += groups[g].len();
                buckets[p].extend_from_slice(&groups[g]);
            }
        }

        let split = SplitIndices::from_buckets(buckets);
        split.ensure_populated(&self.ratios)?;
        debug!("StratifyAllSplitter strata: {strata_keys:?}");
        info!(
            "StratifyAllSplitter: {} groups in {} strata, groups train/val/test = {:?}, rows = {:?}",
            groups.len(),
            strata.len(),
            group_counts,
            split.sizes()
        );
        Ok(split)
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Three independent partitions of one dataset.
#[derive(Debug, Clone)]
pub struct Partitions {
    pub train: StructuredData,
    pub val: StructuredData,
    pub test: StructuredData,
}

/// Applies a splitter and materialises the partitions.
#[derive(Debug)]
pub struct Sampler {
    splitter: Box<dyn Splitter>,
}

impl Sampler {
    pub fn new(splitter: Box<dyn Splitter>) -> Self {
        Self { splitter }
    }

    pub fn sample(&self, data: &StructuredData) -> Result<Partitions> {
        let split = self.splitter.split(data)?;

        let mut owner = vec![None; data.len()];
        for (p, part) in split.parts().iter().enumerate() {
            for &row in part.iter() {
                match owner.get_mut(row) {
                    Some(slot) if slot.is_none() => *slot = Some(p),
                    _ => {
                        return Err(PipelineError::integrity(format!(
                            "{} produced row {row} twice or out of range",
                            self.splitter.name()
                        )));
                    }
                }
            }
        }
        if let Some(row) = owner.iter().position(Option::is_none) {
            return Err(PipelineError::integrity(format!(
                "{} left row {row} unassigned",
                self.splitter.name()
            )));
        }

        Ok(Partitions {
            train: data.select(&split.train),
            val: data.select(&split.val),
            test: data.select(&split.test),
        })
    }
}
