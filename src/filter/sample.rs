//! Sample (row) filters: metadata predicates, depth threshold, explicit
//! exclusion lists.

use super::{FilterAxis, FilterReport};
use crate::data::{AbundanceTable, SampleRecord, Variable};
use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};

/// Keep the samples whose metadata record satisfies `predicate`.
///
/// Taxa that become all-zero are not pruned; run
/// [`prune_empty_taxa`](super::prune_empty_taxa) explicitly.
///
/// # Errors
/// `EmptyData` if no sample passes.
pub fn filter_samples<F>(table: &AbundanceTable, predicate: F) -> Result<AbundanceTable>
where
    F: Fn(&SampleRecord) -> bool,
{
    filter_samples_with_report(table, "metadata predicate", predicate).map(|(t, _)| t)
}

/// [`filter_samples`] returning a [`FilterReport`] labelled `label`.
pub fn filter_samples_with_report<F>(
    table: &AbundanceTable,
    label: &str,
    predicate: F,
) -> Result<(AbundanceTable, FilterReport)>
where
    F: Fn(&SampleRecord) -> bool,
{
    let keep: Vec<usize> = table
        .sample_ids()
        .iter()
        .enumerate()
        .filter(|(_, sid)| {
            table
                .metadata()
                .record(sid)
                .map_or(false, |record| predicate(&record))
        })
        .map(|(idx, _)| idx)
        .collect();

    if keep.is_empty() {
        return Err(EdaError::EmptyData(format!(
            "No samples pass filter '{}'",
            label
        )));
    }

    let report = FilterReport::new(
        format!("samples({})", label),
        FilterAxis::Samples,
        table.sample_ids(),
        &keep,
    );
    Ok((table.subset_samples(&keep)?, report))
}

/// Drop samples whose total count is below `threshold`.
///
/// # Arguments
/// * `table` - The abundance table to filter
/// * `threshold` - Minimum depth (inclusive)
///
/// # Returns
/// A new table with only samples of depth >= `threshold`.
pub fn filter_by_min_depth(table: &AbundanceTable, threshold: u64) -> Result<AbundanceTable> {
    filter_by_min_depth_with_report(table, threshold).map(|(t, _)| t)
}

/// [`filter_by_min_depth`] with a [`FilterReport`].
pub fn filter_by_min_depth_with_report(
    table: &AbundanceTable,
    threshold: u64,
) -> Result<(AbundanceTable, FilterReport)> {
    let keep: Vec<usize> = table
        .sample_sums()
        .iter()
        .enumerate()
        .filter(|(_, &depth)| depth >= threshold)
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(EdaError::EmptyData(format!(
            "No samples have depth >= {}",
            threshold
        )));
    }

    let report = FilterReport::new(
        format!("min_depth(threshold={})", threshold),
        FilterAxis::Samples,
        table.sample_ids(),
        &keep,
    );
    Ok((table.subset_samples(&keep)?, report))
}

/// Declarative sample-removal rule: a minimum depth plus an explicit list
/// of samples to drop (e.g. ordination outliers).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleExclusion {
    /// Drop samples with fewer reads than this.
    #[serde(default)]
    pub min_depth: Option<u64>,
    /// Sample IDs to drop.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl SampleExclusion {
    /// Apply the rule. Excluded IDs that are not in the table are logged
    /// and otherwise ignored.
    pub fn apply(&self, table: &AbundanceTable) -> Result<(AbundanceTable, FilterReport)> {
        for id in &self.exclude {
            if table.sample_index(id).is_none() {
                log::warn!("Excluded sample '{}' is not in the table", id);
            }
        }
        let sums = table.sample_sums();
        let min_depth = self.min_depth.unwrap_or(0);

        let keep: Vec<usize> = table
            .sample_ids()
            .iter()
            .enumerate()
            .filter(|(idx, sid)| sums[*idx] >= min_depth && !self.exclude.contains(*sid))
            .map(|(idx, _)| idx)
            .collect();

        let label = format!(
            "sample_exclusion(min_depth={}, exclude={})",
            self.min_depth.map_or_else(|| "none".to_string(), |d| d.to_string()),
            self.exclude.len()
        );
        if keep.is_empty() {
            return Err(EdaError::EmptyData(format!("No samples left after {}", label)));
        }

        let report = FilterReport::new(label, FilterAxis::Samples, table.sample_ids(), &keep);
        Ok((table.subset_samples(&keep)?, report))
    }
}

/// Comparison operator of a [`MetadataCriterion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionOp {
    Equals,
    NotEquals,
    In,
    NotIn,
}

/// A serializable metadata predicate, e.g. `treatment_days in [D0, D7]`.
///
/// Missing values never satisfy `equals`/`in` and always satisfy
/// `not_equals`/`not_in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataCriterion {
    pub column: String,
    pub op: CriterionOp,
    pub values: Vec<String>,
}

impl MetadataCriterion {
    /// `column == value`.
    pub fn equals(column: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            op: CriterionOp::Equals,
            values: vec![value.to_string()],
        }
    }

    /// `column` in `values`.
    pub fn one_of(column: &str, values: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            op: CriterionOp::In,
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Evaluate against one sample.
    pub fn matches(&self, record: &SampleRecord) -> bool {
        let hit = match record.get(&self.column) {
            None | Some(Variable::Missing) => {
                return matches!(self.op, CriterionOp::NotEquals | CriterionOp::NotIn)
            }
            Some(value) => self.values.iter().any(|v| value_matches(value, v)),
        };
        match self.op {
            CriterionOp::Equals | CriterionOp::In => hit,
            CriterionOp::NotEquals | CriterionOp::NotIn => !hit,
        }
    }

    /// Filter `table` by this criterion.
    pub fn apply(&self, table: &AbundanceTable) -> Result<(AbundanceTable, FilterReport)> {
        if !table.metadata().has_column(&self.column) {
            return Err(EdaError::MissingColumn(self.column.clone()));
        }
        if matches!(self.op, CriterionOp::Equals | CriterionOp::NotEquals) && self.values.len() != 1
        {
            return Err(EdaError::InvalidParameter(format!(
                "'{:?}' on '{}' takes exactly one value",
                self.op, self.column
            )));
        }
        filter_samples_with_report(table, &self.to_string(), |r| self.matches(r))
    }
}

impl std::fmt::Display for MetadataCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            CriterionOp::Equals => "==",
            CriterionOp::NotEquals => "!=",
            CriterionOp::In => "in",
            CriterionOp::NotIn => "not in",
        };
        write!(f, "{} {} {:?}", self.column, op, self.values)
    }
}

fn value_matches(value: &Variable, expected: &str) -> bool {
    match value {
        Variable::Categorical(s) => s == expected,
        Variable::Continuous(x) => expected.trim().parse::<f64>().map_or(false, |e| e == *x),
        Variable::Ordinal(x) => expected.trim().parse::<i64>().map_or(false, |e| e == *x),
        Variable::Missing => false,
    }
}
