//! Statistical hypothesis testing.
//!
//! - **Differential abundance**: per-taxon negative binomial likelihood
//!   ratio test ([`test_lrt_nb`])
//! - **Group differences**: PERMANOVA on a distance matrix, with a test of
//!   homogeneous dispersions ([`group_test`])

mod dispersion;

pub use dispersion::{dispersion_test, group_test, DispersionResult, GroupDispersion, GroupTestReport};
pub use grouping::Grouping;
pub use lrt::{test_lrt_nb, DifferentialConfig, LevelOrder};
pub use permanova::{permanova, PermanovaResult};
pub use permutation::PermutationConfig;
