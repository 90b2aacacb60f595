//! Within-sample (alpha) diversity.

use crate::data::AbundanceTable;
use crate::error::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Observed richness: number of taxa with a non-zero count.
pub fn observed_richness(counts: &[u64]) -> usize {
    counts.iter().filter(|&&c| c > 0).count()
}

/// Shannon entropy `H = -Σ p_i ln p_i` over non-zero proportions (natural
/// log). An all-zero sample has `H = 0`.
pub fn shannon_index(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum()
}

/// Gini-Simpson index `1 - Σ p_i²` (0 for a single taxon or an empty sample).
pub fn simpson_index(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let sum_p2: f64 = counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum();
    1.0 - sum_p2
}

/// Bias-corrected Chao1: `S_obs + f1 (f1 - 1) / (2 (f2 + 1))` where f1 and
/// f2 are the numbers of singleton and doubleton taxa.
pub fn chao1(counts: &[u64]) -> f64 {
    let s_obs = observed_richness(counts) as f64;
    let f1 = counts.iter().filter(|&&c| c == 1).count() as f64;
    let f2 = counts.iter().filter(|&&c| c == 2).count() as f64;
    s_obs + f1 * (f1 - 1.0) / (2.0 * (f2 + 1.0))
}

/// Alpha diversity of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphaDiversity {
    pub sample_id: String,
    pub depth: u64,
    pub observed: usize,
    pub shannon: f64,
    pub simpson: f64,
    pub chao1: f64,
}

/// Alpha diversity for every sample of a table, in table order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaDiversityTable {
    pub rows: Vec<AlphaDiversity>,
}

impl AlphaDiversityTable {
    /// Look up a sample.
    pub fn get(&self, sample_id: &str) -> Option<&AlphaDiversity> {
        self.rows.iter().find(|r| r.sample_id == sample_id)
    }

    /// Shannon values in sample order.
    pub fn shannon(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.shannon).collect()
    }

    /// Write to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "sample_id\tdepth\tobserved\tshannon\tsimpson\tchao1")?;
        for r in &self.rows {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}",
                r.sample_id, r.depth, r.observed, r.shannon, r.simpson, r.chao1
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Compute all alpha diversity metrics for every sample.
///
/// Metrics are computed on raw counts; rarefaction is left to the caller.
pub fn estimate_alpha(table: &AbundanceTable) -> AlphaDiversityTable {
    let rows = (0..table.n_samples())
        .into_par_iter()
        .map(|i| {
            let counts = table.sample_row_dense(i);
            AlphaDiversity {
                sample_id: table.sample_ids()[i].clone(),
                depth: counts.iter().sum(),
                observed: observed_richness(&counts),
                shannon: shannon_index(&counts),
                simpson: simpson_index(&counts),
                chao1: chao1(&counts),
            }
        })
        .collect();
    AlphaDiversityTable { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Metadata, Taxonomy};
    use approx::assert_relative_eq;

    #[test]
    fn test_shannon_even_sample() {
        for k in 1..=6u64 {
            let counts = vec![25; k as usize];
            assert_relative_eq!(shannon_index(&counts), (k as f64).ln(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_shannon_single_taxon_and_empty() {
        assert_eq!(shannon_index(&[100, 0, 0, 0]), 0.0);
        assert_eq!(shannon_index(&[0, 0, 0]), 0.0);
    }

    #[test]
    fn test_simpson() {
        assert_relative_eq!(simpson_index(&[25, 25, 25, 25]), 0.75);
        assert_eq!(simpson_index(&[100, 0, 0]), 0.0);
    }

    #[test]
    fn test_chao1() {
        assert_eq!(chao1(&[10, 20, 30]), 3.0);
        // f1 = 3, f2 = 1: 5 + 3*2 / (2*2) = 6.5
        assert_relative_eq!(chao1(&[1, 1, 1, 2, 9]), 6.5);
    }

    #[test]
    fn test_observed_richness_scenario() {
        // A:[10,0,5] B:[0,0,0] C:[3,3,3]
        assert_eq!(observed_richness(&[10, 0, 5]), 2);
        assert_eq!(observed_richness(&[0, 0, 0]), 0);
        assert_eq!(observed_richness(&[3, 3, 3]), 3);
    }

    #[test]
    fn test_estimate_alpha_table() {
        let meta = Metadata::from_reader("sample_id\tg\nA\tx\nC\ty\n".as_bytes()).unwrap();
        let mut tax = Taxonomy::with_default_ranks();
        for t in ["T1", "T2", "T3"] {
            tax.insert(t, &["Bacteria"]).unwrap();
        }
        let table = AbundanceTable::from_rows(
            vec!["A".into(), "C".into()],
            vec!["T1".into(), "T2".into(), "T3".into()],
            &[vec![10, 0, 5], vec![3, 3, 3]],
            &meta,
            &tax,
        )
        .unwrap();

        let alpha = estimate_alpha(&table);
        assert_eq!(alpha.rows.len(), 2);
        assert_eq!(alpha.get("A").unwrap().observed, 2);
        assert_eq!(alpha.get("C").unwrap().depth, 9);
        assert_relative_eq!(alpha.get("C").unwrap().shannon, 3f64.ln(), epsilon = 1e-12);
    }
}
