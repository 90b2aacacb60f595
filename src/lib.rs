//! Exploratory analysis of 16S amplicon count tables
//!
//! This library provides the steps of a typical amplicon exploratory
//! workflow as small, composable functions over immutable tables.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (AbundanceTable, Metadata, Taxonomy,
//!   DistanceMatrix, differential results)
//! - **profile**: Read-depth and prevalence profiles
//! - **filter**: Sample and taxon filters (depth, metadata, lineage,
//!   prevalence, pruning)
//! - **normalize**: Relative, proportional and log-shift transforms
//! - **diversity**: Alpha diversity, Bray-Curtis and UniFrac distances, PCoA
//! - **model**: Negative binomial GLM and size factors
//! - **test**: NB likelihood ratio test, PERMANOVA, dispersion test
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **pipeline**: Pipeline composition and declarative analysis configs
//!
//! # Example
//!
//! ```no_run
//! use amplicon_eda::prelude::*;
//!
//! let table = AbundanceTable::from_tsv("counts.tsv", "metadata.tsv", "taxonomy.tsv").unwrap();
//!
//! let run = Pipeline::new()
//!     .min_depth(1000)
//!     .prune_empty_taxa()
//!     .prevalence(0.05)
//!     .run(&table)
//!     .unwrap();
//!
//! let results = test_lrt_nb(
//!     run.final_table(),
//!     &DifferentialConfig::new("~ treatment * time", "~ treatment + time"),
//! )
//! .unwrap();
//! results.significant(0.05).to_tsv("significant.tsv").unwrap();
//! ```

pub mod correct;
pub mod data;
pub mod diversity;
pub mod error;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod profile;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::correct::{adjust_results, correct_bh, BhCorrected};
    pub use crate::data::{
        AbundanceTable, DesignMatrix, DifferentialResult, DifferentialResults, DistanceMatrix,
        FitStatus, Formula, Lineage, LineageRecord, Metadata, ResultSummary, SampleRecord,
        Taxonomy, Term, Variable, VariableType,
    };
    pub use crate::diversity::{
        beta_diversity, bray_curtis_distances, estimate_alpha, observed_richness, pcoa,
        shannon_index, unifrac_distances, AlphaDiversityTable, BetaMetric, OrdinationResult,
        PhyloTree, UnifracVariant,
    };
    pub use crate::error::{EdaError, Result};
    pub use crate::filter::{
        // Sample filtering
        filter_by_min_depth, filter_samples, MetadataCriterion, SampleExclusion,
        // Taxon filtering
        apply_lineage_rules, filter_by_lineage, filter_by_prevalence, LineageRule,
        // Pruning
        prune_empty_samples, prune_empty_taxa, FilterReport,
    };
    pub use crate::model::{estimate_size_factors, fit_nb, NbFit, SizeFactorMethod};
    pub use crate::normalize::{
        log_shift, proportional_abundance, relative_abundance, NormalizedTable,
    };
    pub use crate::pipeline::{
        AnalysisConfig, AnalysisOutput, DiversityConfig, Pipeline, PipelineRun, PipelineStep,
    };
    pub use crate::profile::{estimate_prevalence, profile_depth, DepthProfile, PrevalenceTable};
    pub use crate::test::{
        dispersion_test, group_test, permanova, test_lrt_nb, DifferentialConfig, GroupTestReport,
        Grouping, PermanovaResult, PermutationConfig,
    };
}
