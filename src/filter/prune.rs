//! Removal of all-zero taxa and samples.

use super::{FilterAxis, FilterReport};
use crate::data::AbundanceTable;
use crate::error::{EdaError, Result};

/// Drop taxa with zero total count. Idempotent.
pub fn prune_empty_taxa(table: &AbundanceTable) -> Result<AbundanceTable> {
    prune_empty_taxa_with_report(table).map(|(t, _)| t)
}

/// [`prune_empty_taxa`] with a [`FilterReport`].
pub fn prune_empty_taxa_with_report(
    table: &AbundanceTable,
) -> Result<(AbundanceTable, FilterReport)> {
    let keep: Vec<usize> = table
        .taxon_sums()
        .iter()
        .enumerate()
        .filter(|(_, &sum)| sum > 0)
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(EdaError::EmptyData(
            "All taxa have zero counts".to_string(),
        ));
    }

    let report = FilterReport::new(
        "prune_empty_taxa".to_string(),
        FilterAxis::Taxa,
        table.taxon_ids(),
        &keep,
    );
    Ok((table.subset_taxa(&keep)?, report))
}

/// Drop samples with zero total count. Idempotent.
pub fn prune_empty_samples(table: &AbundanceTable) -> Result<AbundanceTable> {
    prune_empty_samples_with_report(table).map(|(t, _)| t)
}

/// [`prune_empty_samples`] with a [`FilterReport`].
pub fn prune_empty_samples_with_report(
    table: &AbundanceTable,
) -> Result<(AbundanceTable, FilterReport)> {
    let keep: Vec<usize> = table
        .sample_sums()
        .iter()
        .enumerate()
        .filter(|(_, &sum)| sum > 0)
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(EdaError::EmptyData(
            "All samples have zero counts".to_string(),
        ));
    }

    let report = FilterReport::new(
        "prune_empty_samples".to_string(),
        FilterAxis::Samples,
        table.sample_ids(),
        &keep,
    );
    Ok((table.subset_samples(&keep)?, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Metadata, Taxonomy};

    /// Samples A:[10,0,5], B:[0,0,0], C:[3,3,3].
    fn create_test_table() -> AbundanceTable {
        let meta =
            Metadata::from_reader("sample_id\tgroup\nA\tx\nB\tx\nC\ty\n".as_bytes()).unwrap();
        let mut tax = Taxonomy::with_default_ranks();
        for t in ["T1", "T2", "T3"] {
            tax.insert(t, &["Bacteria"]).unwrap();
        }
        AbundanceTable::from_rows(
            vec!["A".into(), "B".into(), "C".into()],
            vec!["T1".into(), "T2".into(), "T3".into()],
            &[vec![10, 0, 5], vec![0, 0, 0], vec![3, 3, 3]],
            &meta,
            &tax,
        )
        .unwrap()
    }

    #[test]
    fn test_prune_empty_samples() {
        let table = create_test_table();
        let (pruned, report) = prune_empty_samples_with_report(&table).unwrap();
        assert_eq!(pruned.sample_ids(), &["A", "C"]);
        assert_eq!(report.removed, vec!["B"]);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let table = create_test_table();
        let once = prune_empty_samples(&table).unwrap();
        let twice = prune_empty_samples(&once).unwrap();
        assert_eq!(once.sample_ids(), twice.sample_ids());

        // drop C so T2 becomes empty
        let only_a = once.subset_samples(&[0]).unwrap();
        let taxa_once = prune_empty_taxa(&only_a).unwrap();
        let taxa_twice = prune_empty_taxa(&taxa_once).unwrap();
        assert_eq!(taxa_once.taxon_ids(), &["T1", "T3"]);
        assert_eq!(taxa_once.taxon_ids(), taxa_twice.taxon_ids());
    }

    #[test]
    fn test_all_empty_is_error() {
        let table = create_test_table();
        let only_b = table.subset_samples(&[1]).unwrap();
        assert!(matches!(
            prune_empty_samples(&only_b),
            Err(EdaError::EmptyData(_))
        ));
        assert!(prune_empty_taxa(&only_b).is_err());
    }
}
