//! Pipeline runner for composing filter steps and running the analyses.

use crate::data::{AbundanceTable, DifferentialResults, DistanceMatrix};
use crate::diversity::{
    beta_diversity, estimate_alpha, pcoa, AlphaDiversityTable, BetaMetric, OrdinationResult,
    PhyloTree,
};
use crate::error::{EdaError, Result};
use crate::filter::{
    apply_lineage_rules, filter_by_min_depth_with_report, filter_by_prevalence_with_report,
    prune_empty_samples_with_report, prune_empty_taxa_with_report, FilterReport, LineageRule,
    MetadataCriterion, SampleExclusion,
};
use crate::profile::{estimate_prevalence, PrevalenceTable};
use crate::test::{group_test, test_lrt_nb, DifferentialConfig, GroupTestReport, Grouping, PermutationConfig};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A step in the filtering pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PipelineStep {
    // === Sample Filtering ===
    /// Drop samples below a read depth.
    MinDepth { threshold: u64 },
    /// Depth threshold plus an explicit list of samples to drop.
    ExcludeSamples(SampleExclusion),
    /// Keep samples whose metadata satisfies the criterion.
    KeepSamples(MetadataCriterion),

    // === Taxon Filtering ===
    /// Keep taxa accepted by every lineage rule.
    Lineage { rules: Vec<LineageRule> },
    /// Keep taxa present in at least `min_fraction` of samples.
    Prevalence { min_fraction: f64 },

    // === Pruning ===
    PruneEmptyTaxa,
    PruneEmptySamples,

    /// Record the current table under `name` without changing it.
    Checkpoint { name: String },
}

impl PipelineStep {
    /// Short name used for stage labels.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineStep::MinDepth { .. } => "min_depth",
            PipelineStep::ExcludeSamples(_) => "exclude_samples",
            PipelineStep::KeepSamples(_) => "keep_samples",
            PipelineStep::Lineage { .. } => "lineage",
            PipelineStep::Prevalence { .. } => "prevalence",
            PipelineStep::PruneEmptyTaxa => "prune_empty_taxa",
            PipelineStep::PruneEmptySamples => "prune_empty_samples",
            PipelineStep::Checkpoint { .. } => "checkpoint",
        }
    }

    fn apply(&self, table: &AbundanceTable) -> Result<(AbundanceTable, Option<FilterReport>)> {
        let (filtered, report) = match self {
            PipelineStep::MinDepth { threshold } => {
                filter_by_min_depth_with_report(table, *threshold)?
            }
            PipelineStep::ExcludeSamples(rule) => rule.apply(table)?,
            PipelineStep::KeepSamples(criterion) => criterion.apply(table)?,
            PipelineStep::Lineage { rules } => apply_lineage_rules(table, rules)?,
            PipelineStep::Prevalence { min_fraction } => {
                filter_by_prevalence_with_report(table, *min_fraction)?
            }
            PipelineStep::PruneEmptyTaxa => prune_empty_taxa_with_report(table)?,
            PipelineStep::PruneEmptySamples => prune_empty_samples_with_report(table)?,
            PipelineStep::Checkpoint { .. } => return Ok((table.clone(), None)),
        };
        Ok((filtered, Some(report)))
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStep::MinDepth { threshold } => write!(f, "min_depth({})", threshold),
            PipelineStep::ExcludeSamples(rule) => write!(
                f,
                "exclude_samples(min_depth={:?}, exclude={:?})",
                rule.min_depth, rule.exclude
            ),
            PipelineStep::KeepSamples(criterion) => write!(f, "keep_samples({})", criterion),
            PipelineStep::Lineage { rules } => write!(f, "lineage({} rules)", rules.len()),
            PipelineStep::Prevalence { min_fraction } => write!(f, "prevalence({})", min_fraction),
            PipelineStep::Checkpoint { name } => write!(f, "checkpoint({})", name),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// One table in a pipeline run.
#[derive(Debug, Clone)]
pub struct Stage {
    /// `input`, `<n>_<kind>` for step `n`, or a checkpoint name.
    pub label: String,
    pub table: AbundanceTable,
    /// What the step removed; `None` for the input and checkpoints.
    pub report: Option<FilterReport>,
}

/// Every intermediate table of a pipeline run, in order.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    name: String,
    stages: Vec<Stage>,
}

impl PipelineRun {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Table recorded under `label`.
    pub fn stage(&self, label: &str) -> Option<&AbundanceTable> {
        self.stages.iter().find(|s| s.label == label).map(|s| &s.table)
    }

    /// The unfiltered input.
    pub fn input(&self) -> &AbundanceTable {
        &self.stages[0].table
    }

    /// Table after the last step.
    pub fn final_table(&self) -> &AbundanceTable {
        // stages always holds at least the input
        &self.stages[self.stages.len() - 1].table
    }

    /// Reports of the filtering steps, in order.
    pub fn reports(&self) -> Vec<&FilterReport> {
        self.stages.iter().filter_map(|s| s.report.as_ref()).collect()
    }
}

impl std::fmt::Display for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pipeline: {}", self.name)?;
        for stage in &self.stages {
            writeln!(
                f,
                "  {:<28} {:>6} samples {:>7} taxa",
                stage.label,
                stage.table.n_samples(),
                stage.table.n_taxa()
            )?;
        }
        Ok(())
    }
}

/// Builder for constructing and running filtering pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    /// Create from a config's steps.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Append an arbitrary step.
    pub fn step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Drop samples with fewer than `threshold` reads.
    pub fn min_depth(self, threshold: u64) -> Self {
        self.step(PipelineStep::MinDepth { threshold })
    }

    /// Drop samples below `min_depth` and the listed outliers.
    pub fn exclude_samples(self, min_depth: Option<u64>, exclude: &[&str]) -> Self {
        self.step(PipelineStep::ExcludeSamples(SampleExclusion {
            min_depth,
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }))
    }

    /// Keep samples matching a metadata criterion.
    pub fn keep_samples(self, criterion: MetadataCriterion) -> Self {
        self.step(PipelineStep::KeepSamples(criterion))
    }

    /// Keep taxa accepted by all `rules`.
    pub fn lineage(self, rules: Vec<LineageRule>) -> Self {
        self.step(PipelineStep::Lineage { rules })
    }

    pub fn prevalence(self, min_fraction: f64) -> Self {
        self.step(PipelineStep::Prevalence { min_fraction })
    }

    pub fn prune_empty_taxa(self) -> Self {
        self.step(PipelineStep::PruneEmptyTaxa)
    }

    pub fn prune_empty_samples(self) -> Self {
        self.step(PipelineStep::PruneEmptySamples)
    }

    /// Name the current table so it can be retrieved from the run.
    pub fn checkpoint(self, name: &str) -> Self {
        self.step(PipelineStep::Checkpoint {
            name: name.to_string(),
        })
    }

    /// Run the pipeline, keeping every intermediate table.
    ///
    /// # Errors
    /// `Pipeline` wrapping the first failing step's error.
    pub fn run(&self, table: &AbundanceTable) -> Result<PipelineRun> {
        let mut stages = vec![Stage {
            label: "input".to_string(),
            table: table.clone(),
            report: None,
        }];

        for (i, step) in self.steps.iter().enumerate() {
            let current = &stages[stages.len() - 1].table;
            let (next, report) = step.apply(current).map_err(|e| {
                EdaError::Pipeline(format!("Step {} ({}) failed: {}", i + 1, step, e))
            })?;
            let label = match step {
                PipelineStep::Checkpoint { name } => name.clone(),
                _ => format!("{}_{}", i + 1, step.kind()),
            };
            stages.push(Stage {
                label,
                table: next,
                report,
            });
        }

        let run = PipelineRun {
            name: self.name.clone(),
            stages,
        };
        info!(
            "Pipeline '{}': {} samples x {} taxa -> {} samples x {} taxa",
            run.name,
            table.n_samples(),
            table.n_taxa(),
            run.final_table().n_samples(),
            run.final_table().n_taxa()
        );
        Ok(run)
    }
}

/// Beta diversity, ordination and group testing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    pub metric: BetaMetric,
    /// Newick tree, required by the UniFrac metrics.
    pub tree: Option<PathBuf>,
    /// Number of PCoA axes to keep (all positive axes if unset).
    pub max_axes: Option<usize>,
    /// Metadata column for PERMANOVA and the dispersion test.
    pub group_column: Option<String>,
    pub permutations: usize,
    pub seed: u64,
    pub alpha: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        let permutation = PermutationConfig::default();
        Self {
            metric: BetaMetric::BrayCurtis,
            tree: None,
            max_axes: Some(10),
            group_column: None,
            permutations: permutation.n_permutations,
            seed: permutation.seed,
            alpha: permutation.alpha,
        }
    }
}

impl DiversityConfig {
    pub fn permutation_config(&self) -> PermutationConfig {
        PermutationConfig {
            n_permutations: self.permutations,
            seed: self.seed,
            alpha: self.alpha,
        }
    }
}

/// Full analysis configuration for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Name of the analysis.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Filter steps to execute, in order.
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub diversity: Option<DiversityConfig>,
    #[serde(default)]
    pub differential: Option<DifferentialConfig>,
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(EdaError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(EdaError::from)
    }

    /// Starter configuration: depth threshold, chloroplast/mitochondria
    /// removal, prevalence filter, Bray-Curtis with PERMANOVA and an
    /// interaction LRT.
    pub fn example() -> Self {
        let pipeline = Pipeline::new()
            .exclude_samples(Some(1000), &[])
            .prune_empty_taxa()
            .checkpoint("depth_filtered")
            .lineage(vec![
                LineageRule::Require {
                    rank: "Kingdom".to_string(),
                    values: vec!["Bacteria".to_string()],
                },
                LineageRule::Exclude {
                    rank: "Class".to_string(),
                    values: vec!["Chloroplast".to_string()],
                },
                LineageRule::Exclude {
                    rank: "Family".to_string(),
                    values: vec!["Mitochondria".to_string()],
                },
            ])
            .prevalence(0.05)
            .checkpoint("prevalence_filtered");

        Self {
            name: "amplicon-eda".to_string(),
            description: Some("Filter, diversity and differential abundance".to_string()),
            steps: pipeline.steps,
            diversity: Some(DiversityConfig {
                group_column: Some("treatment".to_string()),
                ..DiversityConfig::default()
            }),
            differential: Some(
                DifferentialConfig::new("~ treatment * time", "~ treatment + time")
                    .with_levels("time", &["D0", "D7", "D14"]),
            ),
        }
    }

    /// Filtering pipeline of this config.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }

    /// Run the filter steps and every configured analysis on `table`.
    ///
    /// `tree` is used by UniFrac metrics; callers load it from
    /// [`DiversityConfig::tree`].
    pub fn run(&self, table: &AbundanceTable, tree: Option<&PhyloTree>) -> Result<AnalysisOutput> {
        let run = self.pipeline().run(table)?;
        let filtered = run.final_table();

        let prevalence = estimate_prevalence(filtered);
        let alpha = estimate_alpha(filtered);

        let mut beta = None;
        if let Some(div) = &self.diversity {
            let distances = beta_diversity(filtered, div.metric, tree)?;
            let ordination = pcoa(&distances, div.max_axes)?;
            let report = match &div.group_column {
                Some(column) => {
                    let grouping = Grouping::from_metadata(
                        filtered.metadata(),
                        column,
                        distances.sample_ids(),
                    )?;
                    Some(group_test(&distances, &grouping, &div.permutation_config())?)
                }
                None => None,
            };
            beta = Some(BetaOutput {
                distances,
                ordination,
                group_test: report,
            });
        }

        let differential = match &self.differential {
            Some(config) => Some(test_lrt_nb(filtered, config)?),
            None => None,
        };

        Ok(AnalysisOutput {
            run,
            prevalence,
            alpha,
            beta,
            differential,
            fdr_alpha: self.differential.as_ref().map_or(0.05, |c| c.alpha),
        })
    }
}

/// Distances, ordination and group test of one metric.
#[derive(Debug, Clone)]
pub struct BetaOutput {
    pub distances: DistanceMatrix,
    pub ordination: OrdinationResult,
    pub group_test: Option<GroupTestReport>,
}

/// Everything produced by [`AnalysisConfig::run`].
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub run: PipelineRun,
    pub prevalence: PrevalenceTable,
    pub alpha: AlphaDiversityTable,
    pub beta: Option<BetaOutput>,
    pub differential: Option<DifferentialResults>,
    fdr_alpha: f64,
}

impl AnalysisOutput {
    /// Write all result tables into `dir` (created if missing).
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        self.run.final_table().to_tsv(dir.join("filtered_counts.tsv"))?;
        let reports = serde_json::to_string_pretty(&self.run.reports())?;
        std::fs::write(dir.join("filter_reports.json"), reports)?;
        self.prevalence.to_tsv(dir.join("prevalence.tsv"))?;
        self.alpha.to_tsv(dir.join("alpha_diversity.tsv"))?;

        if let Some(beta) = &self.beta {
            let metric = beta.distances.metric();
            beta.distances.to_tsv(dir.join(format!("distance_{}.tsv", metric)))?;
            beta.ordination.to_tsv(dir.join(format!("pcoa_{}.tsv", metric)))?;
            if let Some(report) = &beta.group_test {
                report.to_json(dir.join(format!("group_test_{}.json", metric)))?;
            }
        }

        if let Some(results) = &self.differential {
            results.to_tsv(dir.join("differential.tsv"))?;
            results
                .significant(self.fdr_alpha)
                .to_tsv(dir.join("differential_significant.tsv"))?;
        }

        info!("Results written to {}", dir.display());
        Ok(())
    }
}
