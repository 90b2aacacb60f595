//! Descriptive profiling of abundance tables.

mod depth;
mod prevalence;

pub use depth::{profile_depth, DepthProfile};
pub use prevalence::{estimate_prevalence, PrevalenceRow, PrevalenceTable, RankPrevalence};
