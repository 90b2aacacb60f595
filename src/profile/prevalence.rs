//! Per-taxon prevalence and total abundance.

use crate::data::AbundanceTable;
use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Prevalence of one taxon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrevalenceRow {
    pub taxon_id: String,
    /// Number of samples with a non-zero count.
    pub prevalence_count: usize,
    /// Sum of counts over all samples.
    pub total_abundance: u64,
    pub lineage: Vec<Option<String>>,
}

/// Prevalence of every taxon, in table order.
#[derive(Debug, Clone, Serialize)]
pub struct PrevalenceTable {
    /// Number of samples the counts refer to.
    pub n_samples: usize,
    /// Rank names of the lineage columns.
    pub ranks: Vec<String>,
    rows: Vec<PrevalenceRow>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

/// Prevalence aggregated over the taxa sharing a label at some rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankPrevalence {
    /// Label at the rank (`None` for unassigned taxa).
    pub label: Option<String>,
    pub n_taxa: usize,
    /// Mean prevalence count over the taxa.
    pub mean_prevalence: f64,
    /// Sum of prevalence counts over the taxa.
    pub total_prevalence: usize,
}

impl PrevalenceTable {
    /// Rows in table order.
    pub fn rows(&self) -> &[PrevalenceRow] {
        &self.rows
    }

    /// Number of taxa.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up a taxon.
    pub fn get(&self, taxon_id: &str) -> Option<&PrevalenceRow> {
        self.index.get(taxon_id).map(|&i| &self.rows[i])
    }

    /// Prevalence as a fraction of samples (0 when there are no samples).
    pub fn fraction(&self, taxon_id: &str) -> Option<f64> {
        self.get(taxon_id).map(|row| {
            if self.n_samples == 0 {
                0.0
            } else {
                row.prevalence_count as f64 / self.n_samples as f64
            }
        })
    }

    /// Mean and total prevalence per label at `rank`, ordered by label
    /// (unassigned last).
    ///
    /// Used to spot whole phyla that are only ever seen in a handful of
    /// samples before choosing a prevalence threshold.
    pub fn summarize_by_rank(&self, rank: &str) -> Result<Vec<RankPrevalence>> {
        let rank_idx = self
            .ranks
            .iter()
            .position(|r| r.eq_ignore_ascii_case(rank))
            .ok_or_else(|| EdaError::InvalidParameter(format!("Unknown rank '{}'", rank)))?;

        let mut groups: HashMap<Option<String>, (usize, usize)> = HashMap::new();
        for row in &self.rows {
            let label = row.lineage.get(rank_idx).cloned().flatten();
            let entry = groups.entry(label).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += row.prevalence_count;
        }

        let mut summary: Vec<RankPrevalence> = groups
            .into_iter()
            .map(|(label, (n_taxa, total))| RankPrevalence {
                label,
                n_taxa,
                mean_prevalence: total as f64 / n_taxa as f64,
                total_prevalence: total,
            })
            .collect();
        summary.sort_by(|a, b| match (&a.label, &b.label) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(summary)
    }

    /// Write to a TSV file: taxon_id, prevalence_count, total_abundance,
    /// then one column per rank.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write!(writer, "taxon_id\tprevalence_count\ttotal_abundance")?;
        for rank in &self.ranks {
            write!(writer, "\t{}", rank)?;
        }
        writeln!(writer)?;
        for row in &self.rows {
            write!(
                writer,
                "{}\t{}\t{}",
                row.taxon_id, row.prevalence_count, row.total_abundance
            )?;
            for label in &row.lineage {
                write!(writer, "\t{}", label.as_deref().unwrap_or("NA"))?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Display for PrevalenceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let singletons = self.rows.iter().filter(|r| r.prevalence_count == 1).count();
        let ubiquitous = self
            .rows
            .iter()
            .filter(|r| self.n_samples > 0 && r.prevalence_count == self.n_samples)
            .count();
        writeln!(f, "Prevalence")?;
        writeln!(f, "  Taxa:       {}", self.rows.len())?;
        writeln!(f, "  Samples:    {}", self.n_samples)?;
        writeln!(f, "  Ubiquitous: {}", ubiquitous)?;
        writeln!(f, "  Singletons: {}", singletons)?;
        Ok(())
    }
}

/// Count, for every taxon, the samples it is present in and its total
/// abundance.
pub fn estimate_prevalence(table: &AbundanceTable) -> PrevalenceTable {
    let prevalence = table.taxon_prevalence();
    let totals = table.taxon_sums();

    let rows: Vec<PrevalenceRow> = table
        .taxon_ids()
        .iter()
        .enumerate()
        .map(|(j, tid)| PrevalenceRow {
            taxon_id: tid.clone(),
            prevalence_count: prevalence[j],
            total_abundance: totals[j],
            lineage: table
                .lineage(j)
                .map(|l| l.labels().to_vec())
                .unwrap_or_default(),
        })
        .collect();
    let index = rows
        .iter()
        .enumerate()
        .map(|(i, r)| (r.taxon_id.clone(), i))
        .collect();

    PrevalenceTable {
        n_samples: table.n_samples(),
        ranks: table.taxonomy().ranks().to_vec(),
        rows,
        index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Metadata, Taxonomy};
    use approx::assert_relative_eq;
    use tempfile::NamedTempFile;

    fn create_test_table() -> AbundanceTable {
        let meta = Metadata::from_reader(
            "sample_id\tg\nS1\ta\nS2\ta\nS3\tb\nS4\tb\n".as_bytes(),
        )
        .unwrap();
        let tax = Taxonomy::from_reader(
            "taxon_id\tKingdom\tPhylum\n\
             T1\tBacteria\tFirmicutes\n\
             T2\tBacteria\tFirmicutes\n\
             T3\tBacteria\tBacteroidetes\n\
             T4\tBacteria\tNA\n"
                .as_bytes(),
        )
        .unwrap();
        AbundanceTable::from_rows(
            vec!["S1".into(), "S2".into(), "S3".into(), "S4".into()],
            vec!["T1".into(), "T2".into(), "T3".into(), "T4".into()],
            &[
                vec![10, 0, 1, 0],
                vec![5, 0, 1, 0],
                vec![0, 0, 1, 2],
                vec![1, 7, 1, 0],
            ],
            &meta,
            &tax,
        )
        .unwrap()
    }

    #[test]
    fn test_counts_and_totals() {
        let prev = estimate_prevalence(&create_test_table());

        assert_eq!(prev.len(), 4);
        let t1 = prev.get("T1").unwrap();
        assert_eq!(t1.prevalence_count, 3);
        assert_eq!(t1.total_abundance, 16);
        assert_eq!(prev.get("T3").unwrap().prevalence_count, 4);
        assert_relative_eq!(prev.fraction("T2").unwrap(), 0.25);
        assert!(prev.get("T9").is_none());
    }

    #[test]
    fn test_summarize_by_rank() {
        let prev = estimate_prevalence(&create_test_table());
        let summary = prev.summarize_by_rank("Phylum").unwrap();

        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].label.as_deref(), Some("Bacteroidetes"));
        assert_eq!(summary[1].label.as_deref(), Some("Firmicutes"));
        assert_eq!(summary[1].n_taxa, 2);
        assert_eq!(summary[1].total_prevalence, 4);
        assert_relative_eq!(summary[1].mean_prevalence, 2.0);
        assert_eq!(summary[2].label, None);

        assert!(prev.summarize_by_rank("Genus").is_err());
    }

    #[test]
    fn test_empty_table_shapes() {
        let table = create_test_table();
        let no_taxa = table.subset_taxa(&[]).unwrap();
        assert!(estimate_prevalence(&no_taxa).is_empty());

        let no_samples = table.subset_samples(&[]).unwrap();
        let prev = estimate_prevalence(&no_samples);
        assert_eq!(prev.len(), 4);
        assert!(prev.rows().iter().all(|r| r.prevalence_count == 0));
        assert_eq!(prev.fraction("T1"), Some(0.0));
    }

    #[test]
    fn test_to_tsv() {
        let prev = estimate_prevalence(&create_test_table());
        let file = NamedTempFile::new().unwrap();
        prev.to_tsv(file.path()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "taxon_id\tprevalence_count\ttotal_abundance\tKingdom\tPhylum");
        assert_eq!(lines[4], "T4\t1\t2\tBacteria\tNA");
    }
}
