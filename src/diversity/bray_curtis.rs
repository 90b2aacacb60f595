//! Bray-Curtis dissimilarity.

use crate::data::{AbundanceTable, DistanceMatrix};
use crate::error::Result;
use rayon::prelude::*;

/// Bray-Curtis dissimilarity `Σ|a_i - b_i| / Σ(a_i + b_i)`, in [0, 1].
/// Two empty samples are at distance 0.
pub fn bray_curtis(a: &[f64], b: &[f64]) -> f64 {
    let (num, den) = a
        .iter()
        .zip(b)
        .fold((0.0, 0.0), |(num, den), (&x, &y)| (num + (x - y).abs(), den + x + y));
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Pairwise Bray-Curtis dissimilarities on raw counts.
pub fn bray_curtis_distances(table: &AbundanceTable) -> Result<DistanceMatrix> {
    let rows: Vec<Vec<f64>> = (0..table.n_samples())
        .map(|i| table.sample_row_dense(i).iter().map(|&c| c as f64).collect())
        .collect();
    let n = rows.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    let condensed: Vec<f64> = pairs
        .par_iter()
        .map(|&(i, j)| bray_curtis(&rows[i], &rows[j]))
        .collect();
    DistanceMatrix::from_condensed(table.sample_ids().to_vec(), &condensed, "bray_curtis")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Metadata, Taxonomy};
    use approx::assert_relative_eq;

    #[test]
    fn test_pairwise_values() {
        assert_eq!(bray_curtis(&[10.0, 20.0, 30.0], &[10.0, 20.0, 30.0]), 0.0);
        assert_eq!(bray_curtis(&[10.0, 0.0, 0.0], &[0.0, 0.0, 10.0]), 1.0);
        assert_eq!(bray_curtis(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        // |10-4| + |5-6| = 7 over 25
        assert_relative_eq!(bray_curtis(&[10.0, 5.0], &[4.0, 6.0]), 7.0 / 25.0);
    }

    #[test]
    fn test_distance_matrix() {
        let meta = Metadata::from_reader("sample_id\tg\nA\tx\nB\tx\nC\ty\n".as_bytes()).unwrap();
        let mut tax = Taxonomy::with_default_ranks();
        tax.insert("T1", &["Bacteria"]).unwrap();
        tax.insert("T2", &["Bacteria"]).unwrap();
        let table = AbundanceTable::from_rows(
            vec!["A".into(), "B".into(), "C".into()],
            vec!["T1".into(), "T2".into()],
            &[vec![10, 5], vec![4, 6], vec![0, 9]],
            &meta,
            &tax,
        )
        .unwrap();

        let dm = bray_curtis_distances(&table).unwrap();
        assert_eq!(dm.metric(), "bray_curtis");
        assert_relative_eq!(dm.get(0, 1), 7.0 / 25.0);
        assert_relative_eq!(dm.get(2, 0), dm.get(0, 2));
        assert_eq!(dm.get(1, 1), 0.0);
    }
}
