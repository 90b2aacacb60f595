//! Principal coordinates analysis (classical multidimensional scaling).

use crate::data::DistanceMatrix;
use crate::error::{EdaError, Result};
use log::{debug, warn};
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Relative tolerance below which an eigenvalue counts as zero.
const EIGEN_TOL: f64 = 1e-10;

/// One principal coordinate axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinationAxis {
    /// Axis label, `PC1`, `PC2`, ...
    pub name: String,
    pub eigenvalue: f64,
    /// `eigenvalue / Σ positive eigenvalues`.
    pub variance_explained: f64,
    /// Per-sample coordinates, in distance-matrix sample order.
    pub coordinates: Vec<f64>,
}

/// Eigenvalues dropped from the ordination because they are negative.
///
/// Non-Euclidean distances (Bray-Curtis, UniFrac) routinely produce them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NegativeEigenvalues {
    pub values: Vec<f64>,
    /// `Σ|λ-| / Σλ+`; a large ratio means the leading axes misrepresent the
    /// distances.
    pub magnitude_ratio: f64,
}

impl NegativeEigenvalues {
    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of a PCoA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinationResult {
    pub sample_ids: Vec<String>,
    pub metric: String,
    /// Axes in descending eigenvalue order, positive eigenvalues only.
    pub axes: Vec<OrdinationAxis>,
    pub negative_eigenvalues: NegativeEigenvalues,
}

impl OrdinationResult {
    pub fn n_axes(&self) -> usize {
        self.axes.len()
    }

    /// Coordinates of one sample on every returned axis.
    pub fn sample_coordinates(&self, sample: usize) -> Vec<f64> {
        self.axes.iter().map(|a| a.coordinates[sample]).collect()
    }

    /// Variance explained by each axis.
    pub fn variance_explained(&self) -> Vec<f64> {
        self.axes.iter().map(|a| a.variance_explained).collect()
    }

    /// Write coordinates (`sample_id`, `PC1`, ...) followed by a blank line
    /// and the variance-explained table (`axis`, `eigenvalue`,
    /// `variance_explained`).
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        write!(writer, "sample_id")?;
        for axis in &self.axes {
            write!(writer, "\t{}", axis.name)?;
        }
        writeln!(writer)?;
        for (i, id) in self.sample_ids.iter().enumerate() {
            write!(writer, "{}", id)?;
            for axis in &self.axes {
                write!(writer, "\t{}", axis.coordinates[i])?;
            }
            writeln!(writer)?;
        }

        writeln!(writer)?;
        writeln!(writer, "axis\teigenvalue\tvariance_explained")?;
        for axis in &self.axes {
            writeln!(
                writer,
                "{}\t{}\t{}",
                axis.name, axis.eigenvalue, axis.variance_explained
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Eigendecomposition of the Gower-centred matrix, sorted by descending
/// eigenvalue. Eigenvector columns are sign-normalised so that their
/// largest-magnitude entry is positive.
pub(crate) fn gower_eigen(dm: &DistanceMatrix) -> Result<(Vec<f64>, DMatrix<f64>)> {
    let n = dm.n_samples();
    if n < 2 {
        return Err(EdaError::InvalidParameter(format!(
            "ordination needs at least 2 samples, got {}",
            n
        )));
    }

    let a = dm.matrix().map(|d| -0.5 * d * d);
    let row_means: Vec<f64> = (0..n).map(|i| a.row(i).mean()).collect();
    let grand_mean = row_means.iter().sum::<f64>() / n as f64;
    // A is symmetric, so column means equal row means
    let g = DMatrix::from_fn(n, n, |i, j| a[(i, j)] - row_means[i] - row_means[j] + grand_mean);

    let eigen = SymmetricEigen::new(g);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| eigen.eigenvalues[y].total_cmp(&eigen.eigenvalues[x]));

    let values: Vec<f64> = order.iter().map(|&k| eigen.eigenvalues[k]).collect();
    let mut vectors = DMatrix::zeros(n, n);
    for (dst, &src) in order.iter().enumerate() {
        let col = eigen.eigenvectors.column(src);
        let pivot = col
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        vectors.set_column(dst, &(col * sign));
    }
    Ok((values, vectors))
}

/// Threshold under which an eigenvalue is numerically zero.
pub(crate) fn eigen_tolerance(values: &[f64]) -> f64 {
    let max_abs = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    EIGEN_TOL * max_abs.max(f64::MIN_POSITIVE)
}

/// Principal coordinates analysis of a distance matrix.
///
/// Double-centres `-½D²`, eigendecomposes it and returns the axes with a
/// positive eigenvalue, largest first, truncated to `max_axes` when given.
/// Coordinates are `eigenvector · √λ`.
///
/// Negative eigenvalues are not returned as axes. They are reported in
/// [`OrdinationResult::negative_eigenvalues`] and logged as a warning.
///
/// # Errors
/// `InvalidParameter` for fewer than 2 samples or `max_axes == Some(0)`;
/// `Numerical` when every distance is zero.
pub fn pcoa(dm: &DistanceMatrix, max_axes: Option<usize>) -> Result<OrdinationResult> {
    if max_axes == Some(0) {
        return Err(EdaError::InvalidParameter(
            "max_axes must be at least 1".to_string(),
        ));
    }

    let (values, vectors) = gower_eigen(dm)?;
    let tol = eigen_tolerance(&values);

    let positive_sum: f64 = values.iter().filter(|&&v| v > tol).sum();
    if positive_sum <= 0.0 {
        return Err(EdaError::Numerical(
            "distance matrix has no positive eigenvalues (all distances zero?)".to_string(),
        ));
    }

    let negative: Vec<f64> = values.iter().copied().filter(|&v| v < -tol).collect();
    let negative_sum: f64 = negative.iter().map(|v| v.abs()).sum();
    let negative_eigenvalues = NegativeEigenvalues {
        magnitude_ratio: negative_sum / positive_sum,
        values: negative,
    };
    if !negative_eigenvalues.is_empty() {
        warn!(
            "PCoA on {} distances: {} negative eigenvalue(s) dropped (|neg|/pos = {:.4})",
            dm.metric(),
            negative_eigenvalues.count(),
            negative_eigenvalues.magnitude_ratio
        );
    }

    let limit = max_axes.unwrap_or(usize::MAX);
    let axes: Vec<OrdinationAxis> = values
        .iter()
        .enumerate()
        .take_while(|&(_, &v)| v > tol)
        .take(limit)
        .map(|(k, &v)| {
            let scale = v.sqrt();
            OrdinationAxis {
                name: format!("PC{}", k + 1),
                eigenvalue: v,
                variance_explained: v / positive_sum,
                coordinates: vectors.column(k).iter().map(|x| x * scale).collect(),
            }
        })
        .collect();

    debug!(
        "PCoA: {} samples, {} axes returned",
        dm.n_samples(),
        axes.len()
    );

    Ok(OrdinationResult {
        sample_ids: dm.sample_ids().to_vec(),
        metric: dm.metric().to_string(),
        axes,
        negative_eigenvalues,
    })
}
