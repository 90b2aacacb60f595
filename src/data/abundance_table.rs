//! Sample × taxon abundance table with sparse storage, bundled with the
//! sample metadata and taxon lineages it is analysed against.

use crate::data::metadata::Metadata;
use crate::data::taxonomy::{LineageRecord, Taxonomy};
use crate::error::{EdaError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A sparse count table of taxon abundances across samples.
///
/// Rows represent samples, columns represent taxa. Uses CSR (Compressed
/// Sparse Row) format so per-sample operations (depths, alpha diversity,
/// relative abundance) walk contiguous memory.
///
/// Every sample has a metadata record and every taxon has a lineage; both
/// are kept aligned to the table order. All transforms return a new table.
#[derive(Debug, Clone)]
pub struct AbundanceTable {
    /// Sparse matrix in CSR format (samples × taxa)
    counts: CsMat<u64>,
    /// Sample identifiers (row names)
    sample_ids: Vec<String>,
    /// Taxon identifiers (column names)
    taxon_ids: Vec<String>,
    metadata: Metadata,
    taxonomy: Taxonomy,
}

impl AbundanceTable {
    /// Create a new table from a sparse matrix, identifiers and annotations.
    ///
    /// Metadata and taxonomy may contain extra entries; they are subset and
    /// reordered to the table. A sample without metadata or a taxon without
    /// lineage is a structural error.
    pub fn new(
        counts: CsMat<u64>,
        sample_ids: Vec<String>,
        taxon_ids: Vec<String>,
        metadata: &Metadata,
        taxonomy: &Taxonomy,
    ) -> Result<Self> {
        let (nrows, ncols) = counts.shape();
        if nrows != sample_ids.len() {
            return Err(EdaError::DimensionMismatch {
                expected: nrows,
                actual: sample_ids.len(),
            });
        }
        if ncols != taxon_ids.len() {
            return Err(EdaError::DimensionMismatch {
                expected: ncols,
                actual: taxon_ids.len(),
            });
        }
        check_unique(&sample_ids)?;
        check_unique(&taxon_ids)?;

        let metadata = metadata.align_to(&sample_ids)?;
        let taxonomy = taxonomy.align_to(&taxon_ids)?;

        let counts = if counts.is_csr() {
            counts
        } else {
            counts.to_csr()
        };

        Ok(Self {
            counts,
            sample_ids,
            taxon_ids,
            metadata,
            taxonomy,
        })
    }

    /// Build a table from dense per-sample rows.
    pub fn from_rows(
        sample_ids: Vec<String>,
        taxon_ids: Vec<String>,
        rows: &[Vec<u64>],
        metadata: &Metadata,
        taxonomy: &Taxonomy,
    ) -> Result<Self> {
        if rows.len() != sample_ids.len() {
            return Err(EdaError::DimensionMismatch {
                expected: sample_ids.len(),
                actual: rows.len(),
            });
        }
        let mut tri_mat = TriMat::new((sample_ids.len(), taxon_ids.len()));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != taxon_ids.len() {
                return Err(EdaError::DimensionMismatch {
                    expected: taxon_ids.len(),
                    actual: row.len(),
                });
            }
            for (j, &val) in row.iter().enumerate() {
                if val > 0 {
                    tri_mat.add_triplet(i, j, val);
                }
            }
        }
        Self::new(tri_mat.to_csr(), sample_ids, taxon_ids, metadata, taxonomy)
    }

    /// Load a table from counts, metadata and taxonomy TSV files.
    ///
    /// The counts file is in the usual OTU-table orientation:
    /// - First row: header with sample IDs (first column is the taxon ID header)
    /// - Subsequent rows: taxon ID followed by one count per sample
    pub fn from_tsv<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        counts_path: P,
        metadata_path: Q,
        taxonomy_path: R,
    ) -> Result<Self> {
        let metadata = Metadata::from_tsv(metadata_path)?;
        let taxonomy = Taxonomy::from_tsv(taxonomy_path)?;
        let file = File::open(counts_path)?;
        Self::from_counts_reader(BufReader::new(file), &metadata, &taxonomy)
    }

    /// Parse a counts table (taxa × samples TSV) from any buffered source.
    pub fn from_counts_reader<B: BufRead>(
        reader: B,
        metadata: &Metadata,
        taxonomy: &Taxonomy,
    ) -> Result<Self> {
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| EdaError::EmptyData("Empty counts file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(EdaError::EmptyData(
                "Counts table must have at least one sample".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
        let n_samples = sample_ids.len();

        // Triplets are stored transposed: file rows are taxa, table rows are samples
        let mut triplets: Vec<(usize, usize, u64)> = Vec::new();
        let mut taxon_ids: Vec<String> = Vec::new();

        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let taxon_idx = taxon_ids.len();
            taxon_ids.push(fields[0].trim().to_string());

            if fields.len() - 1 != n_samples {
                return Err(EdaError::DimensionMismatch {
                    expected: n_samples,
                    actual: fields.len() - 1,
                });
            }

            for (sample_idx, value_str) in fields[1..].iter().enumerate() {
                let value = parse_count(value_str).ok_or_else(|| EdaError::InvalidCount {
                    value: value_str.to_string(),
                    row: taxon_idx,
                    col: sample_idx,
                })?;
                if value > 0 {
                    triplets.push((sample_idx, taxon_idx, value));
                }
            }
        }

        if taxon_ids.is_empty() {
            return Err(EdaError::EmptyData("No taxa in counts table".to_string()));
        }

        let mut tri_mat = TriMat::new((n_samples, taxon_ids.len()));
        for (row, col, val) in triplets {
            tri_mat.add_triplet(row, col, val);
        }

        Self::new(tri_mat.to_csr(), sample_ids, taxon_ids, metadata, taxonomy)
    }

    /// Write the counts to a TSV file (taxa as rows, samples as columns).
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "taxon_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        writeln!(writer)?;

        for (taxon_idx, taxon_id) in self.taxon_ids.iter().enumerate() {
            write!(writer, "{}", taxon_id)?;
            for value in self.taxon_col_dense(taxon_idx) {
                write!(writer, "\t{}", value)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Get the count at (sample, taxon), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, sample: usize, taxon: usize) -> u64 {
        self.counts.get(sample, taxon).copied().unwrap_or(0)
    }

    /// Number of samples (rows).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.counts.rows()
    }

    /// Number of taxa (columns).
    #[inline]
    pub fn n_taxa(&self) -> usize {
        self.counts.cols()
    }

    /// Total number of non-zero entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.counts.nnz()
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Taxon identifiers.
    #[inline]
    pub fn taxon_ids(&self) -> &[String] {
        &self.taxon_ids
    }

    /// Sample metadata, aligned to the table rows.
    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Taxonomy, aligned to the table columns.
    #[inline]
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Get the underlying sparse matrix.
    #[inline]
    pub fn counts(&self) -> &CsMat<u64> {
        &self.counts
    }

    /// Row index of a sample ID.
    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|s| s == sample_id)
    }

    /// Column index of a taxon ID.
    pub fn taxon_index(&self, taxon_id: &str) -> Option<usize> {
        self.taxon_ids.iter().position(|t| t == taxon_id)
    }

    /// Lineage of the taxon in column `taxon`.
    pub fn lineage(&self, taxon: usize) -> Option<LineageRecord<'_>> {
        self.taxon_ids
            .get(taxon)
            .and_then(|tid| self.taxonomy.lineage(tid))
    }

    /// Return a copy of this table with different metadata (e.g. after
    /// declaring level orders). The new metadata must cover every sample.
    pub fn with_metadata(&self, metadata: &Metadata) -> Result<Self> {
        Ok(Self {
            metadata: metadata.align_to(&self.sample_ids)?,
            ..self.clone()
        })
    }

    /// Dense counts for one sample.
    pub fn sample_row_dense(&self, sample: usize) -> Vec<u64> {
        let mut dense = vec![0u64; self.n_taxa()];
        if let Some(row_vec) = self.counts.outer_view(sample) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Dense counts for one taxon across all samples.
    pub fn taxon_col_dense(&self, taxon: usize) -> Vec<u64> {
        (0..self.n_samples())
            .map(|row| self.get(row, taxon))
            .collect()
    }

    /// Row sums (sequencing depth per sample).
    pub fn sample_sums(&self) -> Vec<u64> {
        (0..self.n_samples())
            .into_par_iter()
            .map(|row| {
                self.counts
                    .outer_view(row)
                    .map(|v| v.iter().map(|(_, &val)| val).sum())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Column sums (total abundance per taxon).
    pub fn taxon_sums(&self) -> Vec<u64> {
        let mut sums = vec![0u64; self.n_taxa()];
        for row_vec in self.counts.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Number of samples in which each taxon has a non-zero count.
    pub fn taxon_prevalence(&self) -> Vec<usize> {
        let mut present = vec![0usize; self.n_taxa()];
        for row_vec in self.counts.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                if val > 0 {
                    present[col] += 1;
                }
            }
        }
        present
    }

    /// Subset the table to the specified samples (by index), in that order.
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        let mut tri_mat = TriMat::new((indices.len(), self.n_taxa()));
        let mut new_sample_ids = Vec::with_capacity(indices.len());

        for (new_row, &old_row) in indices.iter().enumerate() {
            if old_row >= self.n_samples() {
                return Err(EdaError::InvalidParameter(format!(
                    "Sample index {} out of bounds",
                    old_row
                )));
            }
            new_sample_ids.push(self.sample_ids[old_row].clone());

            if let Some(row_vec) = self.counts.outer_view(old_row) {
                for (col, &val) in row_vec.iter() {
                    tri_mat.add_triplet(new_row, col, val);
                }
            }
        }

        Self::new(
            tri_mat.to_csr(),
            new_sample_ids,
            self.taxon_ids.clone(),
            &self.metadata,
            &self.taxonomy,
        )
    }

    /// Subset the table to the specified taxa (by index), in that order.
    pub fn subset_taxa(&self, indices: &[usize]) -> Result<Self> {
        let col_map: HashMap<usize, usize> = indices
            .iter()
            .enumerate()
            .map(|(new_idx, &old_idx)| (old_idx, new_idx))
            .collect();

        let mut new_taxon_ids = Vec::with_capacity(indices.len());
        for &old_col in indices {
            if old_col >= self.n_taxa() {
                return Err(EdaError::InvalidParameter(format!(
                    "Taxon index {} out of bounds",
                    old_col
                )));
            }
            new_taxon_ids.push(self.taxon_ids[old_col].clone());
        }

        let mut tri_mat = TriMat::new((self.n_samples(), indices.len()));
        for (row, row_vec) in self.counts.outer_iterator().enumerate() {
            for (old_col, &val) in row_vec.iter() {
                if let Some(&new_col) = col_map.get(&old_col) {
                    tri_mat.add_triplet(row, new_col, val);
                }
            }
        }

        Self::new(
            tri_mat.to_csr(),
            self.sample_ids.clone(),
            new_taxon_ids,
            &self.metadata,
            &self.taxonomy,
        )
    }

    /// Convert to a dense matrix (f64), samples × taxa.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.n_samples(), self.n_taxa());
        for (row, row_vec) in self.counts.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                dense[(row, col)] = val as f64;
            }
        }
        dense
    }
}

fn check_unique(ids: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(EdaError::DuplicateId(id.clone()));
        }
    }
    Ok(())
}

/// Counts must be non-negative integers. Integral floats ("12.0") written
/// by some exporters are accepted.
fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v < u64::MAX as f64 => {
            Some(v as u64)
        }
        _ => None,
    }
}
