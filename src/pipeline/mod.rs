//! Pipeline composition and execution for amplicon exploratory analysis.

mod runner;

pub use runner::{
    AnalysisConfig, AnalysisOutput, BetaOutput, DiversityConfig, Pipeline, PipelineRun,
    PipelineStep, Stage,
};
