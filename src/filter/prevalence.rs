//! Prevalence-based taxon filtering.

use super::{FilterAxis, FilterReport};
use crate::data::AbundanceTable;
use crate::error::{EdaError, Result};

/// Slack for `min_fraction * n_samples` so that e.g. 0.3 * 10 keeps taxa
/// present in exactly 3 samples.
const BOUNDARY_TOL: f64 = 1e-9;

/// Filter taxa by prevalence.
///
/// Keeps taxa present (count > 0) in at least `min_fraction` of samples,
/// with an inclusive boundary.
///
/// # Arguments
/// * `table` - The abundance table to filter
/// * `min_fraction` - Minimum prevalence (0.0 to 1.0)
///
/// # Returns
/// A new table containing only taxa meeting the threshold.
pub fn filter_by_prevalence(table: &AbundanceTable, min_fraction: f64) -> Result<AbundanceTable> {
    filter_by_prevalence_with_report(table, min_fraction).map(|(t, _)| t)
}

/// [`filter_by_prevalence`] with a [`FilterReport`].
pub fn filter_by_prevalence_with_report(
    table: &AbundanceTable,
    min_fraction: f64,
) -> Result<(AbundanceTable, FilterReport)> {
    if !(0.0..=1.0).contains(&min_fraction) {
        return Err(EdaError::InvalidParameter(
            "Prevalence threshold must be between 0 and 1".to_string(),
        ));
    }

    let required = min_fraction * table.n_samples() as f64;
    let keep: Vec<usize> = table
        .taxon_prevalence()
        .iter()
        .enumerate()
        .filter(|(_, &present)| present as f64 + BOUNDARY_TOL >= required)
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(EdaError::EmptyData(format!(
            "No taxa pass prevalence threshold of {:.1}%",
            min_fraction * 100.0
        )));
    }

    let report = FilterReport::new(
        format!("prevalence(min_fraction={})", min_fraction),
        FilterAxis::Taxa,
        table.taxon_ids(),
        &keep,
    );
    Ok((table.subset_taxa(&keep)?, report))
}
