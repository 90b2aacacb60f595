//! Benjamini-Hochberg false discovery rate correction.

use crate::data::DifferentialResult;
use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Adjusted p-values in input order; `None` where the input was NA.
    pub q_values: Vec<Option<f64>>,
    /// Number of non-NA p-values the correction was taken over.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.q_values.iter().flatten().filter(|&&q| q < alpha).count()
    }

    /// Get indices of significant results.
    pub fn significant_indices(&self, alpha: f64) -> Vec<usize> {
        self.q_values
            .iter()
            .enumerate()
            .filter(|(_, q)| q.map_or(false, |q| q < alpha))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// Matches R's `p.adjust(p, method = "BH")`: NA (and non-finite) p-values
/// are left NA and excluded from the number of tests `m`. For the sorted
/// p-values, `q[i] = min(p[i] * m / rank[i], q[i+1])`, capped at 1.
pub fn correct_bh(p_values: &[Option<f64>]) -> BhCorrected {
    let mut indices: Vec<usize> = p_values
        .iter()
        .enumerate()
        .filter(|(_, p)| p.map_or(false, f64::is_finite))
        .map(|(i, _)| i)
        .collect();
    let m = indices.len();
    let mut q_values = vec![None; p_values.len()];
    if m == 0 {
        return BhCorrected { q_values, n_tests: 0 };
    }

    let p = |i: usize| p_values[i].unwrap_or(f64::NAN);
    indices.sort_by(|&a, &b| p(a).total_cmp(&p(b)));

    // Work backwards from the largest p-value
    let m_f64 = m as f64;
    let mut running = 1.0_f64;
    for (pos, &idx) in indices.iter().enumerate().rev() {
        let rank = (pos + 1) as f64;
        running = running.min(p(idx) * m_f64 / rank);
        q_values[idx] = Some(running.min(1.0));
    }

    BhCorrected { q_values, n_tests: m }
}

/// Fill `p_adj` of every result from its `p_value`.
pub fn adjust_results(results: &mut [DifferentialResult]) -> BhCorrected {
    let p_values: Vec<Option<f64>> = results.iter().map(|r| r.p_value).collect();
    let bh = correct_bh(&p_values);
    for (result, q) in results.iter_mut().zip(&bh.q_values) {
        result.p_adj = *q;
    }
    bh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matches_p_adjust() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.20), "BH") = 0.04 0.0533 0.0533 0.20
        let bh = correct_bh(&[Some(0.01), Some(0.04), Some(0.03), Some(0.20)]);
        let q: Vec<f64> = bh.q_values.iter().map(|q| q.unwrap()).collect();
        assert_relative_eq!(q[0], 0.04, epsilon = 1e-12);
        assert_relative_eq!(q[1], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[2], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[3], 0.20, epsilon = 1e-12);
        assert_eq!(bh.n_tests, 4);
        assert_eq!(bh.n_significant(0.05), 1);
    }

    #[test]
    fn test_na_excluded_from_m() {
        // p.adjust(c(0.01, NA, 0.02), "BH") = 0.02 NA 0.02
        let bh = correct_bh(&[Some(0.01), None, Some(0.02)]);
        assert_eq!(bh.n_tests, 2);
        assert_relative_eq!(bh.q_values[0].unwrap(), 0.02, epsilon = 1e-12);
        assert_eq!(bh.q_values[1], None);
        assert_relative_eq!(bh.q_values[2].unwrap(), 0.02, epsilon = 1e-12);
        assert_eq!(bh.significant_indices(0.05), vec![0, 2]);
    }

    #[test]
    fn test_monotone_and_capped() {
        let p = [0.9, 0.001, 0.5, 0.04, 0.04, 0.7, 0.3, 0.99];
        let bh = correct_bh(&p.iter().map(|&v| Some(v)).collect::<Vec<_>>());
        let mut pairs: Vec<(f64, f64)> = p
            .iter()
            .zip(&bh.q_values)
            .map(|(&p, q)| (p, q.unwrap()))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in pairs.windows(2) {
            assert!(w[0].1 <= w[1].1 + 1e-15);
        }
        assert!(pairs.iter().all(|&(p, q)| q >= p && q <= 1.0));
    }

    #[test]
    fn test_all_na() {
        let bh = correct_bh(&[None, None]);
        assert_eq!(bh.n_tests, 0);
        assert!(bh.q_values.iter().all(|q| q.is_none()));
        assert!(correct_bh(&[]).q_values.is_empty());
    }
}
