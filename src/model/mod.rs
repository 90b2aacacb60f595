//! Count models for per-taxon differential testing.

pub mod nb;
pub mod size_factors;

pub use nb::{fit_nb, fit_nb_fixed, nb_log_likelihood, NbFit};
pub use size_factors::{estimate_size_factors, SizeFactorMethod};
