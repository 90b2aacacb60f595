//! Filtering primitives for abundance tables.
//!
//! Sample filters drop rows, taxon filters drop columns. Every filter
//! returns a new table; the `*_with_report` variants also return a
//! [`FilterReport`] describing what was removed.

pub mod lineage;
pub mod prevalence;
pub mod prune;
pub mod sample;

pub use lineage::{apply_lineage_rules, filter_by_lineage, filter_by_lineage_with_report, LineageRule};
pub use prevalence::{filter_by_prevalence, filter_by_prevalence_with_report};
pub use prune::{
    prune_empty_samples, prune_empty_samples_with_report, prune_empty_taxa,
    prune_empty_taxa_with_report,
};
pub use sample::{
    filter_by_min_depth, filter_by_min_depth_with_report, filter_samples,
    filter_samples_with_report, CriterionOp, MetadataCriterion, SampleExclusion,
};

use serde::{Deserialize, Serialize};

/// Which axis of the table a filter acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAxis {
    Samples,
    Taxa,
}

impl FilterAxis {
    fn noun(&self) -> &'static str {
        match self {
            FilterAxis::Samples => "samples",
            FilterAxis::Taxa => "taxa",
        }
    }
}

/// Statistics of one filter application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterReport {
    /// Filter name and parameters, e.g. `prevalence(min_fraction=0.05)`.
    pub filter: String,
    pub axis: FilterAxis,
    /// Number of samples or taxa before filtering.
    pub n_before: usize,
    /// Number of samples or taxa after filtering.
    pub n_after: usize,
    /// Identifiers that were removed, in table order.
    pub removed: Vec<String>,
}

impl FilterReport {
    pub(crate) fn new(
        filter: String,
        axis: FilterAxis,
        ids: &[String],
        keep: &[usize],
    ) -> Self {
        let mut kept = vec![false; ids.len()];
        for &idx in keep {
            kept[idx] = true;
        }
        let removed = ids
            .iter()
            .zip(kept)
            .filter(|(_, k)| !k)
            .map(|(id, _)| id.clone())
            .collect();
        let report = Self {
            filter,
            axis,
            n_before: ids.len(),
            n_after: keep.len(),
            removed,
        };
        log::info!(
            "{}: {} -> {} {}",
            report.filter,
            report.n_before,
            report.n_after,
            report.axis.noun()
        );
        if !report.removed.is_empty() {
            log::debug!("{} removed {:?}", report.filter, report.removed);
        }
        report
    }

    /// Number of samples or taxa removed.
    pub fn n_removed(&self) -> usize {
        self.n_before - self.n_after
    }

    /// Proportion retained.
    pub fn retention_rate(&self) -> f64 {
        if self.n_before == 0 {
            return 1.0;
        }
        self.n_after as f64 / self.n_before as f64
    }
}

impl std::fmt::Display for FilterReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let noun = self.axis.noun();
        writeln!(f, "Filter: {}", self.filter)?;
        writeln!(f, "  Before:    {} {}", self.n_before, noun)?;
        writeln!(f, "  After:     {} {}", self.n_after, noun)?;
        writeln!(f, "  Removed:   {} {}", self.n_removed(), noun)?;
        writeln!(f, "  Retained:  {:.1}%", self.retention_rate() * 100.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_report_counts() {
        let ids: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let report = FilterReport::new("demo".to_string(), FilterAxis::Taxa, &ids, &[0, 2, 3]);

        assert_eq!(report.n_before, 4);
        assert_eq!(report.n_after, 3);
        assert_eq!(report.n_removed(), 1);
        assert_eq!(report.removed, vec!["b"]);
        assert_relative_eq!(report.retention_rate(), 0.75);
        assert!(report.to_string().contains("Removed:   1 taxa"));
    }
}
