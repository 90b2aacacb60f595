//! Data structures for amplicon exploratory analysis.

mod abundance_table;
mod design_matrix;
mod distance;
mod formula;
mod metadata;
mod result;
mod taxonomy;

pub use abundance_table::AbundanceTable;
pub use design_matrix::{DesignMatrix, INTERCEPT};
pub use distance::DistanceMatrix;
pub use formula::{Formula, Term};
pub use metadata::{Metadata, SampleRecord, Variable, VariableType};
pub use result::{DifferentialResult, DifferentialResults, FitStatus, ResultSummary};
pub use taxonomy::{Lineage, LineageRecord, Taxonomy, DEFAULT_RANKS};
