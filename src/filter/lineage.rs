//! Taxon filters on lineage (e.g. drop mitochondria and chloroplasts).

use super::{FilterAxis, FilterReport};
use crate::data::{AbundanceTable, LineageRecord};
use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};

/// Keep the taxa whose lineage satisfies `predicate`.
pub fn filter_by_lineage<F>(table: &AbundanceTable, predicate: F) -> Result<AbundanceTable>
where
    F: Fn(&LineageRecord) -> bool,
{
    filter_by_lineage_with_report(table, "lineage predicate", predicate).map(|(t, _)| t)
}

/// [`filter_by_lineage`] returning a [`FilterReport`] labelled `label`.
pub fn filter_by_lineage_with_report<F>(
    table: &AbundanceTable,
    label: &str,
    predicate: F,
) -> Result<(AbundanceTable, FilterReport)>
where
    F: Fn(&LineageRecord) -> bool,
{
    let keep: Vec<usize> = (0..table.n_taxa())
        .filter(|&idx| table.lineage(idx).map_or(false, |l| predicate(&l)))
        .collect();

    if keep.is_empty() {
        return Err(EdaError::EmptyData(format!(
            "No taxa pass lineage filter '{}'",
            label
        )));
    }

    let report = FilterReport::new(
        format!("lineage({})", label),
        FilterAxis::Taxa,
        table.taxon_ids(),
        &keep,
    );
    Ok((table.subset_taxa(&keep)?, report))
}

/// Serializable lineage rule. Label comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum LineageRule {
    /// Keep only taxa labelled with one of `values` at `rank`
    /// (e.g. Kingdom = Bacteria). Unassigned taxa are dropped.
    Require { rank: String, values: Vec<String> },
    /// Drop taxa labelled with one of `values` at `rank`
    /// (e.g. Family = Mitochondria). Unassigned taxa are kept.
    Exclude { rank: String, values: Vec<String> },
    /// Drop taxa with no label at `rank`.
    ExcludeUnassigned { rank: String },
}

impl LineageRule {
    /// The rank this rule inspects.
    pub fn rank(&self) -> &str {
        match self {
            LineageRule::Require { rank, .. }
            | LineageRule::Exclude { rank, .. }
            | LineageRule::ExcludeUnassigned { rank } => rank,
        }
    }

    /// Whether a taxon with this lineage is kept.
    pub fn keeps(&self, lineage: &LineageRecord) -> bool {
        let label = lineage.rank(self.rank());
        match self {
            LineageRule::Require { values, .. } => label.map_or(false, |l| contains_ci(values, l)),
            LineageRule::Exclude { values, .. } => label.map_or(true, |l| !contains_ci(values, l)),
            LineageRule::ExcludeUnassigned { .. } => label.is_some(),
        }
    }
}

impl std::fmt::Display for LineageRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineageRule::Require { rank, values } => write!(f, "{} in {:?}", rank, values),
            LineageRule::Exclude { rank, values } => write!(f, "{} not in {:?}", rank, values),
            LineageRule::ExcludeUnassigned { rank } => write!(f, "{} assigned", rank),
        }
    }
}

/// Apply all `rules` at once: a taxon is kept only if every rule keeps it.
///
/// # Errors
/// `InvalidParameter` if a rule names a rank the taxonomy lacks;
/// `EmptyData` if no taxa remain.
pub fn apply_lineage_rules(
    table: &AbundanceTable,
    rules: &[LineageRule],
) -> Result<(AbundanceTable, FilterReport)> {
    for rule in rules {
        if table.taxonomy().rank_index(rule.rank()).is_none() {
            return Err(EdaError::InvalidParameter(format!(
                "Unknown rank '{}' (available: {:?})",
                rule.rank(),
                table.taxonomy().ranks()
            )));
        }
    }
    let label = rules
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    filter_by_lineage_with_report(table, &label, |lineage| {
        rules.iter().all(|rule| rule.keeps(lineage))
    })
}

fn contains_ci(values: &[String], label: &str) -> bool {
    values.iter().any(|v| v.eq_ignore_ascii_case(label))
}
