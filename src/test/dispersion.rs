//! Homogeneity of multivariate dispersions (betadisper analogue).
//!
//! A significant PERMANOVA can come from groups with different spread
//! rather than different location; this test checks the spread.

use super::grouping::Grouping;
use super::permanova::{permanova, PermanovaResult};
use super::permutation::{count_extreme, permutation_p_value, PermutationConfig};
use crate::data::DistanceMatrix;
use crate::diversity::{eigen_tolerance, gower_eigen};
use crate::error::{EdaError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use std::path::Path;

/// Spread of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDispersion {
    pub group: String,
    pub n_samples: usize,
    /// Mean distance of the group's samples to their centroid.
    pub mean_distance: f64,
}

/// Result of the dispersion test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionResult {
    pub metric: String,
    /// One-way ANOVA F on the distances to centroid.
    pub f_statistic: f64,
    pub df_between: usize,
    pub df_within: usize,
    /// p-value from the F distribution.
    pub p_value: f64,
    /// p-value from permuting group labels of the distances.
    pub permutation_p_value: f64,
    pub n_permutations: usize,
    pub groups: Vec<GroupDispersion>,
    /// Distance of every sample to its group centroid, in matrix order.
    pub distances: Vec<f64>,
}

/// Test whether groups differ in their spread around their centroids.
///
/// Samples are embedded with a full PCoA. Distances to the group centroid
/// combine all axes: `z² = Σ_{λ>0} (x - c)² - Σ_{λ<0} (x - c)²`, clamped at
/// zero, so negative eigenvalues of non-Euclidean metrics reduce distances
/// as in vegan's `betadisper`. The distances are compared with a one-way
/// ANOVA F test, plus a label-permutation p-value.
///
/// # Errors
/// As [`permanova`](super::permanova).
pub fn dispersion_test(
    dm: &DistanceMatrix,
    grouping: &Grouping,
    config: &PermutationConfig,
) -> Result<DispersionResult> {
    let n = dm.n_samples();
    grouping.validate_for(n, "dispersion test")?;
    config.validate()?;
    let k = grouping.n_groups();
    let codes = grouping.codes();
    let sizes = grouping.group_sizes();

    let (values, vectors) = gower_eigen(dm)?;
    let tol = eigen_tolerance(&values);

    let mut sq = vec![0.0; n];
    for (axis, &lambda) in values.iter().enumerate() {
        if lambda.abs() <= tol {
            continue;
        }
        let scale = lambda.abs().sqrt();
        let sign = lambda.signum();
        let coords: Vec<f64> = vectors.column(axis).iter().map(|v| v * scale).collect();

        let mut centroid = vec![0.0; k];
        for (i, &c) in codes.iter().enumerate() {
            centroid[c] += coords[i];
        }
        for (c, s) in centroid.iter_mut().zip(&sizes) {
            *c /= *s as f64;
        }
        for (i, &c) in codes.iter().enumerate() {
            sq[i] += sign * (coords[i] - centroid[c]).powi(2);
        }
    }
    let distances: Vec<f64> = sq.iter().map(|&v| v.max(0.0).sqrt()).collect();

    let f_statistic = anova_f(&distances, codes, &sizes);
    let df_between = k - 1;
    let df_within = n - k;
    let p_value = f_p_value(f_statistic, df_between, df_within)?;

    let n_extreme = count_extreme(codes, config, f_statistic, |perm| {
        anova_f(&distances, perm, &sizes)
    });
    let permutation_p_value = permutation_p_value(n_extreme, config.n_permutations);

    let groups = grouping
        .levels()
        .iter()
        .enumerate()
        .map(|(g, name)| {
            let total: f64 = codes
                .iter()
                .zip(&distances)
                .filter(|(&c, _)| c == g)
                .map(|(_, d)| d)
                .sum();
            GroupDispersion {
                group: name.clone(),
                n_samples: sizes[g],
                mean_distance: total / sizes[g] as f64,
            }
        })
        .collect();

    Ok(DispersionResult {
        metric: dm.metric().to_string(),
        f_statistic,
        df_between,
        df_within,
        p_value,
        permutation_p_value,
        n_permutations: config.n_permutations,
        groups,
        distances,
    })
}

/// One-way ANOVA F statistic of `values` grouped by `codes`.
fn anova_f(values: &[f64], codes: &[usize], sizes: &[usize]) -> f64 {
    let n = values.len();
    let k = sizes.len();
    let grand_mean = values.iter().sum::<f64>() / n as f64;

    let mut sums = vec![0.0; k];
    for (&v, &c) in values.iter().zip(codes) {
        sums[c] += v;
    }
    let means: Vec<f64> = sums
        .iter()
        .zip(sizes)
        .map(|(s, &ng)| if ng > 0 { s / ng as f64 } else { 0.0 })
        .collect();

    let ss_between: f64 = means
        .iter()
        .zip(sizes)
        .map(|(m, &ng)| ng as f64 * (m - grand_mean).powi(2))
        .sum();
    let ss_within: f64 = values
        .iter()
        .zip(codes)
        .map(|(v, &c)| (v - means[c]).powi(2))
        .sum();

    if ss_within <= 0.0 {
        return if ss_between > 0.0 { f64::INFINITY } else { 0.0 };
    }
    (ss_between / (k - 1) as f64) / (ss_within / (n - k) as f64)
}

fn f_p_value(f: f64, df1: usize, df2: usize) -> Result<f64> {
    if f.is_infinite() {
        return Ok(0.0);
    }
    let dist = FisherSnedecor::new(df1 as f64, df2 as f64)
        .map_err(|e| EdaError::InvalidParameter(format!("F({}, {}): {}", df1, df2, e)))?;
    Ok(dist.sf(f).clamp(0.0, 1.0))
}

/// PERMANOVA together with its dispersion check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTestReport {
    pub permanova: PermanovaResult,
    pub dispersion: DispersionResult,
    pub alpha: f64,
    /// Dispersion permutation p-value below `alpha`: a significant PERMANOVA
    /// may reflect unequal spread rather than shifted centroids.
    pub dispersion_heterogeneous: bool,
}

impl GroupTestReport {
    /// Write the report as pretty-printed JSON.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl std::fmt::Display for GroupTestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.permanova)?;
        writeln!(
            f,
            "Dispersion ({}): F = {:.4}, p = {:.4}, permutation p = {:.4}",
            self.dispersion.metric,
            self.dispersion.f_statistic,
            self.dispersion.p_value,
            self.dispersion.permutation_p_value
        )?;
        for g in &self.dispersion.groups {
            writeln!(
                f,
                "  {:<20} n = {:<4} mean distance to centroid = {:.4}",
                g.group, g.n_samples, g.mean_distance
            )?;
        }
        if self.dispersion_heterogeneous {
            write!(
                f,
                "WARNING: group dispersions differ (p < {}); interpret PERMANOVA with care",
                self.alpha
            )
        } else {
            write!(f, "Group dispersions homogeneous at alpha = {}", self.alpha)
        }
    }
}

/// Run PERMANOVA and the dispersion test on the same grouping.
pub fn group_test(
    dm: &DistanceMatrix,
    grouping: &Grouping,
    config: &PermutationConfig,
) -> Result<GroupTestReport> {
    let permanova = permanova(dm, grouping, config)?;
    let dispersion = dispersion_test(dm, grouping, config)?;
    let dispersion_heterogeneous = dispersion.permutation_p_value < config.alpha;

    info!("{}", permanova);
    if dispersion_heterogeneous {
        warn!(
            "Dispersion test on {}: permutation p = {:.4} < {}; PERMANOVA may reflect unequal spread",
            dm.metric(),
            dispersion.permutation_p_value,
            config.alpha
        );
    }

    Ok(GroupTestReport {
        permanova,
        dispersion,
        alpha: config.alpha,
        dispersion_heterogeneous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use approx::assert_relative_eq;

    fn euclidean(points: &[(f64, f64)]) -> DistanceMatrix {
        let n = points.len();
        let data = DMatrix::from_fn(n, n, |i, j| {
            let (dx, dy) = (points[i].0 - points[j].0, points[i].1 - points[j].1);
            (dx * dx + dy * dy).sqrt()
        });
        let ids = (0..n).map(|i| format!("S{}", i)).collect();
        DistanceMatrix::new(ids, data, "euclidean").unwrap()
    }

    #[test]
    fn test_distances_to_centroid_euclidean() {
        // Group a: square of half-width 1 around (0,0); group b: half-width 3 around (10,0)
        let dm = euclidean(&[
            (1.0, 1.0),
            (-1.0, 1.0),
            (1.0, -1.0),
            (-1.0, -1.0),
            (13.0, 3.0),
            (7.0, 3.0),
            (13.0, -3.0),
            (7.0, -3.0),
        ]);
        let g = Grouping::new(&["a", "a", "a", "a", "b", "b", "b", "b"]);
        let res = dispersion_test(&dm, &g, &PermutationConfig::default()).unwrap();

        for i in 0..4 {
            assert_relative_eq!(res.distances[i], 2f64.sqrt(), epsilon = 1e-8);
            assert_relative_eq!(res.distances[i + 4], 18f64.sqrt(), epsilon = 1e-8);
        }
        assert_eq!(res.groups[1].group, "b");
        assert_relative_eq!(res.groups[1].mean_distance, 18f64.sqrt(), epsilon = 1e-8);
        // Within-group spread is zero up to rounding
        assert!(res.f_statistic > 1e6);
        assert!(res.p_value < 1e-6);
        assert!(res.permutation_p_value < 0.06);
    }

    #[test]
    fn test_equal_spread_is_homogeneous() {
        let dm = euclidean(&[
            (1.0, 0.0),
            (-1.0, 0.2),
            (0.1, 1.0),
            (0.0, -1.1),
            (11.0, 0.1),
            (9.0, 0.0),
            (10.0, 1.05),
            (10.1, -1.0),
        ]);
        let g = Grouping::new(&["a", "a", "a", "a", "b", "b", "b", "b"]);
        let report = group_test(&dm, &g, &PermutationConfig::default()).unwrap();

        assert!(!report.dispersion_heterogeneous);
        assert!(report.dispersion.p_value > 0.05);
        assert!(report.permanova.r_squared > 0.9);
        assert!(report.to_string().contains("homogeneous"));
    }

    #[test]
    fn test_report_json() {
        let dm = euclidean(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (5.0, 5.0), (6.0, 5.0), (5.0, 7.0)]);
        let g = Grouping::new(&["x", "x", "x", "y", "y", "y"]);
        let report = group_test(&dm, &g, &PermutationConfig::quick()).unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        report.to_json(file.path()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(value["permanova"]["n_groups"], 2);
        assert!(value["dispersion_heterogeneous"].is_boolean());
    }

    #[test]
    fn test_f_p_value_upper_tail() {
        let p = f_p_value(400.0, 1, 20).unwrap();
        assert!(p > 0.0 && p < 1e-10, "p = {}", p);
        assert_eq!(f_p_value(f64::INFINITY, 1, 20).unwrap(), 0.0);
        assert_relative_eq!(f_p_value(0.0, 2, 10).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_anova_f_hand_computed() {
        // Groups {1, 2, 3} and {5, 6, 7}: SSB = 24, SSW = 4, F = 24 / (4/4) = 24
        let f = anova_f(&[1.0, 2.0, 3.0, 5.0, 6.0, 7.0], &[0, 0, 0, 1, 1, 1], &[3, 3]);
        assert_relative_eq!(f, 24.0, epsilon = 1e-12);
    }
}
