//! Negative Binomial GLM for count data.
//!
//! Log link with a per-sample offset (log size factor), fitted by
//! Iteratively Reweighted Least Squares. Variance is `mu + alpha mu^2`.

use crate::error::{EdaError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

/// Maximum iterations for IRLS convergence.
const MAX_ITER: usize = 25;

/// Convergence tolerance on the relative change in deviance.
const TOL: f64 = 1e-8;

/// Minimum value for mean to avoid log(0).
const MIN_MU: f64 = 1e-10;

/// Search interval for ln(alpha).
const LOG_ALPHA_MIN: f64 = -10.0;
const LOG_ALPHA_MAX: f64 = 5.0;

/// Moment / coefficient alternations before the likelihood refinement.
const MOMENT_ROUNDS: usize = 5;
const ML_ROUNDS: usize = 3;

/// Pseudo-count for the starting least-squares fit on log counts.
const START_PSEUDOCOUNT: f64 = 0.1;

/// Relative pivot size below which X'WX is treated as singular.
const SINGULAR_TOL: f64 = 1e-14;

/// Result of fitting a negative binomial model to one taxon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbFit {
    /// Estimated coefficients (natural log scale).
    pub coefficients: Vec<f64>,
    /// Standard errors of coefficients.
    pub std_errors: Vec<f64>,
    /// Dispersion alpha (variance = mu + alpha mu^2).
    pub dispersion: f64,
    /// Log-likelihood at convergence.
    pub log_likelihood: f64,
    pub deviance: f64,
    /// Degrees of freedom (residual).
    pub df_residual: usize,
    /// IRLS iterations of the final fit.
    pub iterations: usize,
    pub converged: bool,
    /// Fitted means, offsets included.
    #[serde(skip)]
    pub fitted_values: Vec<f64>,
}

impl NbFit {
    /// Get coefficient by index.
    pub fn get_coefficient(&self, index: usize) -> Option<f64> {
        self.coefficients.get(index).copied()
    }

    /// Get standard error by index.
    pub fn get_std_error(&self, index: usize) -> Option<f64> {
        self.std_errors.get(index).copied()
    }

    /// Wald z-statistic for a coefficient.
    pub fn z_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_errors.get(index)?;
        if *se > 0.0 {
            Some(coef / se)
        } else {
            None
        }
    }
}

/// Fit a negative binomial GLM with estimated dispersion.
///
/// Dispersion starts from a method-of-moments estimate that alternates with
/// the coefficient fit, then is refined by maximising the likelihood in
/// alpha with the means held at the current fit (golden-section search on
/// `ln alpha` in [-10, 5]). The returned fit uses the final alpha.
///
/// # Arguments
/// * `y` - counts of one taxon, one per sample
/// * `x` - design matrix (samples × coefficients)
/// * `offset` - log size factor per sample
///
/// # Errors
/// `DimensionMismatch` on inconsistent inputs, `Numerical` for a saturated
/// or singular design or a diverging fit.
pub fn fit_nb(y: &[f64], x: &DMatrix<f64>, offset: &[f64]) -> Result<NbFit> {
    let df_residual = validate(y, x, offset)?;

    let beta0 = initial_beta(y, x, offset)?;
    let mu0 = compute_mu(x, &beta0, offset);
    let mut alpha = estimate_dispersion_moments(y, &mu0, df_residual);
    let mut fit = fit_nb_fixed(y, x, offset, alpha)?;

    for _ in 0..MOMENT_ROUNDS {
        let next = estimate_dispersion_moments(y, &fit.fitted_values, df_residual);
        if (next.ln() - alpha.ln()).abs() < 1e-3 {
            break;
        }
        alpha = next;
        fit = fit_nb_fixed(y, x, offset, alpha)?;
    }

    for _ in 0..ML_ROUNDS {
        let next = estimate_dispersion_ml(y, &fit.fitted_values);
        let settled = (next.ln() - alpha.ln()).abs() < 1e-4;
        alpha = next;
        fit = fit_nb_fixed(y, x, offset, alpha)?;
        if settled {
            break;
        }
    }

    Ok(fit)
}

/// Fit a negative binomial GLM with the dispersion held at `alpha`.
///
/// Used for the reduced model of a likelihood-ratio test so both models
/// share one dispersion.
pub fn fit_nb_fixed(y: &[f64], x: &DMatrix<f64>, offset: &[f64], alpha: f64) -> Result<NbFit> {
    let df_residual = validate(y, x, offset)?;
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(EdaError::InvalidParameter(format!(
            "dispersion must be positive and finite, got {}",
            alpha
        )));
    }
    let n = y.len();

    let mut beta = initial_beta(y, x, offset)?;
    let mut mu = compute_mu(x, &beta, offset);
    let mut deviance = nb_deviance(y, &mu, alpha);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..MAX_ITER {
        iterations = iter + 1;

        // W = mu / (1 + alpha mu), z = eta + (y - mu) / mu with eta excluding the offset
        let w: Vec<f64> = mu.iter().map(|&m| m / (1.0 + alpha * m)).collect();
        let z = DVector::from_iterator(
            n,
            (0..n).map(|i| mu[i].ln() - offset[i] + (y[i] - mu[i]) / mu[i]),
        );

        beta = weighted_least_squares(x, &w, &z).ok_or_else(|| {
            EdaError::Numerical("singular information matrix in IRLS".to_string())
        })?;
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(EdaError::Numerical("IRLS produced non-finite coefficients".to_string()));
        }
        mu = compute_mu(x, &beta, offset);

        let deviance_new = nb_deviance(y, &mu, alpha);
        let change = (deviance_new - deviance).abs() / (deviance_new.abs() + 0.1);
        deviance = deviance_new;
        if change < TOL {
            converged = true;
            break;
        }
    }

    // Fisher information X'WX at the final means
    let w: Vec<f64> = mu.iter().map(|&m| m / (1.0 + alpha * m)).collect();
    let std_errors = match information_matrix(x, &w).cholesky() {
        Some(chol) => {
            let cov = chol.inverse();
            (0..x.ncols()).map(|j| cov[(j, j)].max(0.0).sqrt()).collect()
        }
        None => vec![f64::NAN; x.ncols()],
    };

    Ok(NbFit {
        coefficients: beta.iter().copied().collect(),
        std_errors,
        dispersion: alpha,
        log_likelihood: nb_log_likelihood(y, &mu, alpha),
        deviance,
        df_residual,
        iterations,
        converged,
        fitted_values: mu,
    })
}

/// Negative binomial log-likelihood with dispersion `alpha`.
pub fn nb_log_likelihood(y: &[f64], mu: &[f64], alpha: f64) -> f64 {
    let r = 1.0 / alpha;
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| {
            let am = alpha * mi.max(MIN_MU);
            // lgamma(y+r) - lgamma(r) - lgamma(y+1) - r log(1 + alpha mu) + y log(alpha mu / (1 + alpha mu))
            ln_gamma(yi + r) - ln_gamma(r) - ln_gamma(yi + 1.0) - r * am.ln_1p()
                + yi * (am.ln() - am.ln_1p())
        })
        .sum()
}

/// Negative binomial deviance with dispersion `alpha`.
fn nb_deviance(y: &[f64], mu: &[f64], alpha: f64) -> f64 {
    let r = 1.0 / alpha;
    let dev_sum: f64 = y
        .iter()
        .zip(mu)
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            let term1 = if yi > 0.0 { yi * (yi / m).ln() } else { 0.0 };
            let term2 = (yi + r) * ((alpha * yi).ln_1p() - (alpha * m).ln_1p());
            term1 - term2
        })
        .sum();
    2.0 * dev_sum
}

/// Method-of-moments dispersion `Σ ((y - mu)^2 - mu) / mu^2 / df`, clamped
/// to the search interval.
fn estimate_dispersion_moments(y: &[f64], mu: &[f64], df_residual: usize) -> f64 {
    let excess: f64 = y
        .iter()
        .zip(mu)
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            ((yi - m).powi(2) - m) / (m * m)
        })
        .sum();
    clamp_alpha(excess / df_residual as f64)
}

/// Maximum-likelihood dispersion for fixed means.
fn estimate_dispersion_ml(y: &[f64], mu: &[f64]) -> f64 {
    let objective = |log_alpha: f64| nb_log_likelihood(y, mu, log_alpha.exp());
    golden_section_max(objective, LOG_ALPHA_MIN, LOG_ALPHA_MAX, 1e-6).exp()
}

fn clamp_alpha(alpha: f64) -> f64 {
    if alpha.is_finite() {
        alpha.clamp(LOG_ALPHA_MIN.exp(), LOG_ALPHA_MAX.exp())
    } else {
        LOG_ALPHA_MIN.exp()
    }
}

/// Maximise a unimodal function on `[lo, hi]`.
fn golden_section_max<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64, tol: f64) -> f64 {
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let mut c = hi - inv_phi * (hi - lo);
    let mut d = lo + inv_phi * (hi - lo);
    let mut fc = f(c);
    let mut fd = f(d);
    while hi - lo > tol {
        if fc > fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - inv_phi * (hi - lo);
            fc = f(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + inv_phi * (hi - lo);
            fd = f(d);
        }
    }
    (lo + hi) / 2.0
}

fn validate(y: &[f64], x: &DMatrix<f64>, offset: &[f64]) -> Result<usize> {
    if x.nrows() != y.len() {
        return Err(EdaError::DimensionMismatch {
            expected: y.len(),
            actual: x.nrows(),
        });
    }
    if offset.len() != y.len() {
        return Err(EdaError::DimensionMismatch {
            expected: y.len(),
            actual: offset.len(),
        });
    }
    let df_residual = y.len().saturating_sub(x.ncols());
    if df_residual == 0 {
        return Err(EdaError::Numerical(
            "Model is saturated (n_samples <= n_coefficients)".to_string(),
        ));
    }
    Ok(df_residual)
}

/// Least-squares fit of `ln((y + 0.1) / s)` on the design.
fn initial_beta(y: &[f64], x: &DMatrix<f64>, offset: &[f64]) -> Result<DVector<f64>> {
    let z = DVector::from_iterator(
        y.len(),
        y.iter()
            .zip(offset)
            .map(|(&yi, &o)| (yi + START_PSEUDOCOUNT).ln() - o),
    );
    let ones = vec![1.0; y.len()];
    weighted_least_squares(x, &ones, &z)
        .ok_or_else(|| EdaError::Numerical("design matrix is rank deficient".to_string()))
}

/// Compute mu = exp(X beta + offset).
fn compute_mu(x: &DMatrix<f64>, beta: &DVector<f64>, offset: &[f64]) -> Vec<f64> {
    let eta = x * beta;
    eta.iter()
        .zip(offset)
        .map(|(e, o)| (e + o).min(700.0).exp().max(MIN_MU))
        .collect()
}

fn information_matrix(x: &DMatrix<f64>, w: &[f64]) -> DMatrix<f64> {
    let mut xw = x.clone();
    for (i, &wi) in w.iter().enumerate() {
        let s = wi.sqrt();
        xw.row_mut(i).iter_mut().for_each(|v| *v *= s);
    }
    xw.transpose() * xw
}

/// Solve `(X'WX) beta = X'Wz` by Cholesky; `None` when X'WX is not
/// positive definite or numerically singular.
fn weighted_least_squares(x: &DMatrix<f64>, w: &[f64], z: &DVector<f64>) -> Option<DVector<f64>> {
    let xtwx = information_matrix(x, w);
    let wz = DVector::from_iterator(z.len(), z.iter().zip(w).map(|(zi, wi)| zi * wi));
    let xtwz = x.transpose() * wz;
    let chol = xtwx.cholesky()?;
    let diag = chol.l_dirty().diagonal();
    let (lo, hi) = diag
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &d| (lo.min(d), hi.max(d)));
    if lo * lo < SINGULAR_TOL * hi * hi {
        return None;
    }
    Some(chol.solve(&xtwz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DesignMatrix, Formula, Metadata};
    use approx::assert_relative_eq;
    use statrs::distribution::{Discrete, NegativeBinomial};

    // 8 samples alternating control/treatment
    fn design() -> DesignMatrix {
        let mut text = String::from("sample_id\tgroup\n");
        for i in 1..=8 {
            let group = if i % 2 == 1 { "control" } else { "treatment" };
            text.push_str(&format!("S{}\t{}\n", i, group));
        }
        let metadata = Metadata::from_reader(text.as_bytes()).unwrap();
        DesignMatrix::from_formula(&metadata, &Formula::parse("~ group").unwrap()).unwrap()
    }

    const NO_EFFECT: [f64; 8] = [95.0, 105.0, 98.0, 102.0, 97.0, 103.0, 99.0, 101.0];
    const STRONG_EFFECT: [f64; 8] = [48.0, 195.0, 52.0, 205.0, 47.0, 198.0, 53.0, 202.0];

    #[test]
    fn test_fit_nb_coefficients() {
        let d = design();
        let offset = vec![0.0; 8];

        let no_effect = fit_nb(&NO_EFFECT, d.matrix(), &offset).unwrap();
        assert!(no_effect.converged);
        assert!(
            no_effect.coefficients[1].abs() < 0.2,
            "No-effect taxon should have small coefficient, got {}",
            no_effect.coefficients[1]
        );

        // log(200/50) ≈ 1.39
        let strong = fit_nb(&STRONG_EFFECT, d.matrix(), &offset).unwrap();
        assert!(strong.converged);
        assert_relative_eq!(strong.coefficients[1], (200.0f64 / 50.0).ln(), epsilon = 0.05);
        assert!(strong.z_statistic(1).unwrap() > 2.0);
    }

    #[test]
    fn test_fit_nb_dispersion_and_errors() {
        let d = design();
        let offset = vec![0.0; 8];
        let fit = fit_nb(&STRONG_EFFECT, d.matrix(), &offset).unwrap();

        assert!(fit.dispersion > 0.0);
        assert_eq!(fit.df_residual, 6);
        for &se in &fit.std_errors {
            assert!(se > 0.0 && se.is_finite(), "SE should be positive finite");
        }
        assert!(fit.fitted_values.iter().all(|&m| m > 0.0));
        assert!(fit.log_likelihood.is_finite());
    }

    #[test]
    fn test_overdispersed_data_gets_larger_alpha() {
        let d = design();
        let offset = vec![0.0; 8];
        let wide = [10.0, 300.0, 200.0, 20.0, 5.0, 150.0, 400.0, 60.0];
        let tight = fit_nb(&NO_EFFECT, d.matrix(), &offset).unwrap();
        let spread = fit_nb(&wide, d.matrix(), &offset).unwrap();
        assert!(spread.dispersion > tight.dispersion);
        assert!(spread.dispersion > 0.1);
    }

    #[test]
    fn test_offset_absorbs_depth() {
        // Every treatment sample sequenced twice as deep with the same composition
        let d = design();
        let offset: Vec<f64> = (0..8).map(|i| if i % 2 == 1 { 2f64.ln() } else { 0.0 }).collect();
        let y = [50.0, 100.0, 52.0, 98.0, 49.0, 101.0, 51.0, 99.0];
        let fit = fit_nb(&y, d.matrix(), &offset).unwrap();
        assert!(fit.coefficients[1].abs() < 0.05);
    }

    #[test]
    fn test_fixed_dispersion_is_kept() {
        let d = design();
        let fit = fit_nb_fixed(&STRONG_EFFECT, d.matrix(), &[0.0; 8], 0.05).unwrap();
        assert_eq!(fit.dispersion, 0.05);
        assert!(fit.converged);
    }

    #[test]
    fn test_log_likelihood_matches_pmf() {
        let (alpha, mu) = (0.25, 12.0);
        let r = 1.0 / alpha;
        let dist = NegativeBinomial::new(r, r / (r + mu)).unwrap();
        for k in [0u64, 3, 12, 40] {
            assert_relative_eq!(
                nb_log_likelihood(&[k as f64], &[mu], alpha),
                dist.ln_pmf(k),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let d = design();
        assert!(matches!(
            fit_nb(&NO_EFFECT[..4], d.matrix(), &[0.0; 4]),
            Err(EdaError::DimensionMismatch { .. })
        ));
        assert!(fit_nb_fixed(&NO_EFFECT, d.matrix(), &[0.0; 8], 0.0).is_err());

        let saturated = DMatrix::from_element(2, 2, 1.0);
        assert!(matches!(
            fit_nb(&[1.0, 2.0], &saturated, &[0.0, 0.0]),
            Err(EdaError::Numerical(_))
        ));

        // Duplicate columns: X'X is singular
        let singular = DMatrix::from_element(4, 2, 1.0);
        assert!(matches!(
            fit_nb(&[1.0, 2.0, 3.0, 4.0], &singular, &[0.0; 4]),
            Err(EdaError::Numerical(_))
        ));
    }

    #[test]
    fn test_golden_section() {
        let x = golden_section_max(|v| -(v - 1.5).powi(2), -10.0, 5.0, 1e-8);
        assert_relative_eq!(x, 1.5, epsilon = 1e-6);
    }
}
