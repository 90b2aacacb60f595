//! Transforms of count tables into continuous abundances.
//!
//! - **Relative**: each sample divided by its depth (rows sum to 1)
//! - **Proportional**: relative abundance rescaled to the smallest depth
//! - **Log shift**: `ln(1 + x)`, usually applied after proportional scaling
//!
//! All transforms return a new [`NormalizedTable`]; the count table is
//! never modified.

pub mod log_shift;
pub mod relative;

pub use log_shift::log_shift;
pub use relative::{proportional_abundance, relative_abundance};

use crate::data::{AbundanceTable, Metadata, Taxonomy};
use crate::error::Result;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One applied transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    Relative,
    Proportional { target_depth: u64 },
    LogShift,
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Relative => write!(f, "relative"),
            Transform::Proportional { target_depth } => {
                write!(f, "proportional(depth={})", target_depth)
            }
            Transform::LogShift => write!(f, "log1p"),
        }
    }
}

/// Dense transformed abundances (samples × taxa) with the annotations of
/// the table they came from.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    data: DMatrix<f64>,
    sample_ids: Vec<String>,
    taxon_ids: Vec<String>,
    metadata: Metadata,
    taxonomy: Taxonomy,
    transforms: Vec<Transform>,
}

impl NormalizedTable {
    pub(crate) fn from_table(table: &AbundanceTable, data: DMatrix<f64>, transform: Transform) -> Self {
        Self {
            data,
            sample_ids: table.sample_ids().to_vec(),
            taxon_ids: table.taxon_ids().to_vec(),
            metadata: table.metadata().clone(),
            taxonomy: table.taxonomy().clone(),
            transforms: vec![transform],
        }
    }

    pub(crate) fn map(&self, transform: Transform, f: impl Fn(f64) -> f64) -> Self {
        let mut transforms = self.transforms.clone();
        transforms.push(transform);
        Self {
            data: self.data.map(f),
            transforms,
            ..self.clone()
        }
    }

    /// Value for a sample and taxon.
    #[inline]
    pub fn get(&self, sample: usize, taxon: usize) -> f64 {
        self.data[(sample, taxon)]
    }

    /// Number of samples.
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    /// Number of taxa.
    #[inline]
    pub fn n_taxa(&self) -> usize {
        self.data.ncols()
    }

    /// Values of one sample.
    pub fn sample_row(&self, sample: usize) -> Vec<f64> {
        self.data.row(sample).iter().copied().collect()
    }

    /// Values of one taxon across samples.
    pub fn taxon_col(&self, taxon: usize) -> Vec<f64> {
        self.data.column(taxon).iter().copied().collect()
    }

    /// Get reference to the underlying matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn taxon_ids(&self) -> &[String] {
        &self.taxon_ids
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Transforms applied so far, in order.
    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Write to a TSV file (taxa as rows, samples as columns).
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write!(writer, "taxon_id")?;
        for sid in &self.sample_ids {
            write!(writer, "\t{}", sid)?;
        }
        writeln!(writer)?;
        for (j, tid) in self.taxon_ids.iter().enumerate() {
            write!(writer, "{}", tid)?;
            for i in 0..self.n_samples() {
                write!(writer, "\t{}", self.data[(i, j)])?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}
