//! Pairwise sample distance matrices (beta diversity).

use crate::error::{EdaError, Result};
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const SYMMETRY_TOL: f64 = 1e-9;

/// A symmetric, zero-diagonal, non-negative distance matrix over samples.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    sample_ids: Vec<String>,
    data: DMatrix<f64>,
    metric: String,
}

impl DistanceMatrix {
    /// Create a validated distance matrix.
    ///
    /// # Errors
    /// `InvalidDistance` for a non-square, asymmetric, non-zero-diagonal,
    /// negative or non-finite matrix; `DimensionMismatch` if the number of
    /// IDs differs from the matrix size.
    pub fn new(sample_ids: Vec<String>, data: DMatrix<f64>, metric: &str) -> Result<Self> {
        let n = data.nrows();
        if data.ncols() != n {
            return Err(EdaError::InvalidDistance(format!(
                "matrix is {}x{}, expected square",
                n,
                data.ncols()
            )));
        }
        if sample_ids.len() != n {
            return Err(EdaError::DimensionMismatch {
                expected: n,
                actual: sample_ids.len(),
            });
        }
        for i in 0..n {
            let self_distance = data[(i, i)];
            if !self_distance.is_finite() || self_distance.abs() > SYMMETRY_TOL {
                return Err(EdaError::InvalidDistance(format!(
                    "non-zero diagonal at '{}'",
                    sample_ids[i]
                )));
            }
            for j in (i + 1)..n {
                let (a, b) = (data[(i, j)], data[(j, i)]);
                if !a.is_finite() || !b.is_finite() || a < 0.0 || b < 0.0 {
                    return Err(EdaError::InvalidDistance(format!(
                        "invalid distance between '{}' and '{}'",
                        sample_ids[i], sample_ids[j]
                    )));
                }
                if (a - b).abs() > SYMMETRY_TOL {
                    return Err(EdaError::InvalidDistance(format!(
                        "asymmetric entry ('{}', '{}'): {} vs {}",
                        sample_ids[i], sample_ids[j], a, b
                    )));
                }
            }
        }
        Ok(Self {
            sample_ids,
            data,
            metric: metric.to_string(),
        })
    }

    /// Build from a condensed upper triangle (row-major, `i < j`).
    pub fn from_condensed(sample_ids: Vec<String>, condensed: &[f64], metric: &str) -> Result<Self> {
        let n = sample_ids.len();
        let expected = n * n.saturating_sub(1) / 2;
        if condensed.len() != expected {
            return Err(EdaError::DimensionMismatch {
                expected,
                actual: condensed.len(),
            });
        }
        let mut data = DMatrix::zeros(n, n);
        let mut k = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                data[(i, j)] = condensed[k];
                data[(j, i)] = condensed[k];
                k += 1;
            }
        }
        Self::new(sample_ids, data, metric)
    }

    /// Load a square distance matrix from a TSV file (header of sample
    /// IDs, then one row per sample with its ID first).
    pub fn from_tsv<P: AsRef<Path>>(path: P, metric: &str) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| EdaError::EmptyData("Empty distance file".to_string()))??;
        let sample_ids: Vec<String> = header_line
            .split('\t')
            .skip(1)
            .map(|s| s.trim().to_string())
            .collect();
        let n = sample_ids.len();
        let mut data = DMatrix::zeros(n, n);
        let mut row = 0;

        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            if row >= n {
                return Err(EdaError::InvalidDistance(format!(
                    "more than {} rows",
                    n
                )));
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields[0].trim() != sample_ids[row] {
                return Err(EdaError::InvalidDistance(format!(
                    "row {} is '{}', expected '{}'",
                    row,
                    fields[0].trim(),
                    sample_ids[row]
                )));
            }
            if fields.len() - 1 != n {
                return Err(EdaError::DimensionMismatch {
                    expected: n,
                    actual: fields.len() - 1,
                });
            }
            for (col, raw) in fields[1..].iter().enumerate() {
                data[(row, col)] = raw.trim().parse::<f64>().map_err(|_| {
                    EdaError::InvalidDistance(format!("unparseable value '{}'", raw))
                })?;
            }
            row += 1;
        }
        if row != n {
            return Err(EdaError::DimensionMismatch {
                expected: n,
                actual: row,
            });
        }

        Self::new(sample_ids, data, metric)
    }

    /// Write the matrix to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write!(writer, "sample_id")?;
        for id in &self.sample_ids {
            write!(writer, "\t{}", id)?;
        }
        writeln!(writer)?;
        for (i, id) in self.sample_ids.iter().enumerate() {
            write!(writer, "{}", id)?;
            for j in 0..self.n_samples() {
                write!(writer, "\t{}", self.data[(i, j)])?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Distance between samples `i` and `j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[(i, j)]
    }

    /// Number of samples.
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Metric name (e.g. "unweighted_unifrac").
    #[inline]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Dense matrix view.
    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Upper triangle in row-major order.
    pub fn condensed(&self) -> Vec<f64> {
        let n = self.n_samples();
        let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                out.push(self.data[(i, j)]);
            }
        }
        out
    }
}
