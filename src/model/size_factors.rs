//! Per-sample size factors used as GLM offsets.

use crate::data::AbundanceTable;
use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};

/// How to estimate size factors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeFactorMethod {
    /// Median ratio of each sample's counts to the per-taxon geometric mean.
    ///
    /// Geometric means are taken over positive counts only
    /// (`exp(Σ_{y>0} ln y / n)`), so taxa with zeros still contribute; this
    /// is the usual choice for sparse amplicon tables where almost every
    /// taxon has a zero somewhere.
    #[default]
    MedianOfRatios,
    /// Sample depth relative to the geometric mean depth.
    LibrarySize,
}

/// Estimate one size factor per sample, scaled to a geometric mean of 1.
///
/// # Errors
/// `EmptyData` for a table without samples or taxa; `DivideByZero` when a
/// sample has no positive count.
pub fn estimate_size_factors(table: &AbundanceTable, method: SizeFactorMethod) -> Result<Vec<f64>> {
    if table.n_samples() == 0 || table.n_taxa() == 0 {
        return Err(EdaError::EmptyData(
            "size factors need at least one sample and one taxon".to_string(),
        ));
    }
    let depths = table.sample_sums();
    if let Some(idx) = depths.iter().position(|&d| d == 0) {
        return Err(EdaError::DivideByZero {
            sample: table.sample_ids()[idx].clone(),
        });
    }

    let raw = match method {
        SizeFactorMethod::LibrarySize => depths.iter().map(|&d| d as f64).collect(),
        SizeFactorMethod::MedianOfRatios => median_of_ratios(table)?,
    };
    Ok(normalize_geometric(raw))
}

fn median_of_ratios(table: &AbundanceTable) -> Result<Vec<f64>> {
    let n = table.n_samples() as f64;
    let counts = table.counts();

    let mut log_sums = vec![0.0; table.n_taxa()];
    for (&c, (_, taxon)) in counts.iter() {
        if c > 0 {
            log_sums[taxon] += (c as f64).ln();
        }
    }
    let log_geo_means: Vec<f64> = log_sums.iter().map(|s| s / n).collect();

    let mut factors = Vec::with_capacity(table.n_samples());
    for (sample, row) in counts.outer_iterator().enumerate() {
        let mut log_ratios: Vec<f64> = row
            .iter()
            .filter(|&(_, &c)| c > 0)
            .map(|(taxon, &c)| (c as f64).ln() - log_geo_means[taxon])
            .collect();
        let med = median(&mut log_ratios).ok_or_else(|| EdaError::DivideByZero {
            sample: table.sample_ids()[sample].clone(),
        })?;
        factors.push(med.exp());
    }
    Ok(factors)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn normalize_geometric(factors: Vec<f64>) -> Vec<f64> {
    let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / factors.len() as f64;
    let scale = log_mean.exp();
    factors.into_iter().map(|f| f / scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Metadata, Taxonomy};
    use approx::assert_relative_eq;

    fn table(rows: &[Vec<u64>]) -> AbundanceTable {
        let sample_ids: Vec<String> = (0..rows.len()).map(|i| format!("S{}", i)).collect();
        let taxon_ids: Vec<String> = (0..rows[0].len()).map(|j| format!("T{}", j)).collect();
        let mut meta_text = String::from("sample_id\tg\n");
        for id in &sample_ids {
            meta_text.push_str(&format!("{}\tx\n", id));
        }
        let meta = Metadata::from_reader(meta_text.as_bytes()).unwrap();
        let mut tax = Taxonomy::with_default_ranks();
        for t in &taxon_ids {
            tax.insert(t, &["Bacteria"]).unwrap();
        }
        AbundanceTable::from_rows(sample_ids, taxon_ids, rows, &meta, &tax).unwrap()
    }

    #[test]
    fn test_scaled_copies_recover_scale() {
        // S1 is exactly 2x S0, S2 is 4x S0
        let t = table(&[vec![10, 20, 30, 40], vec![20, 40, 60, 80], vec![40, 80, 120, 160]]);
        let sf = estimate_size_factors(&t, SizeFactorMethod::MedianOfRatios).unwrap();
        assert_relative_eq!(sf[1] / sf[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(sf[2] / sf[0], 4.0, epsilon = 1e-12);
        assert_relative_eq!(sf.iter().map(|f| f.ln()).sum::<f64>(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zeros_tolerated() {
        let t = table(&[vec![10, 0, 30, 40], vec![20, 40, 0, 80], vec![0, 80, 120, 160]]);
        let sf = estimate_size_factors(&t, SizeFactorMethod::MedianOfRatios).unwrap();
        assert!(sf.iter().all(|f| f.is_finite() && *f > 0.0));
        assert_relative_eq!(sf.iter().map(|f| f.ln()).sum::<f64>(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_library_size() {
        let t = table(&[vec![10, 10], vec![40, 40]]);
        let sf = estimate_size_factors(&t, SizeFactorMethod::LibrarySize).unwrap();
        assert_relative_eq!(sf[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(sf[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_sample_rejected() {
        let t = table(&[vec![10, 10], vec![0, 0]]);
        for method in [SizeFactorMethod::MedianOfRatios, SizeFactorMethod::LibrarySize] {
            assert!(matches!(
                estimate_size_factors(&t, method),
                Err(EdaError::DivideByZero { .. })
            ));
        }
    }
}
