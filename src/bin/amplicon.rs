//! amplicon - exploratory analysis of 16S amplicon count tables
//!
//! Each subcommand runs one step with explicit parameters; `run` executes a
//! whole YAML analysis configuration.

use amplicon_eda::data::{AbundanceTable, DistanceMatrix, Metadata};
use amplicon_eda::diversity::{beta_diversity, estimate_alpha, pcoa, BetaMetric, PhyloTree};
use amplicon_eda::error::{EdaError, Result};
use amplicon_eda::filter::LineageRule;
use amplicon_eda::model::SizeFactorMethod;
use amplicon_eda::pipeline::{AnalysisConfig, Pipeline};
use amplicon_eda::profile::{estimate_prevalence, profile_depth};
use amplicon_eda::test::{group_test, test_lrt_nb, DifferentialConfig, Grouping, LevelOrder, PermutationConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};

/// CLI-friendly size factor method
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSizeFactors {
    /// Median of ratios to the per-taxon geometric mean of positive counts
    MedianOfRatios,
    /// Library size scaled to geometric mean 1
    LibrarySize,
}

impl From<CliSizeFactors> for SizeFactorMethod {
    fn from(method: CliSizeFactors) -> Self {
        match method {
            CliSizeFactors::MedianOfRatios => SizeFactorMethod::MedianOfRatios,
            CliSizeFactors::LibrarySize => SizeFactorMethod::LibrarySize,
        }
    }
}

/// Exploratory analysis of amplicon count tables
#[derive(Parser)]
#[command(name = "amplicon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Input files of an abundance table.
#[derive(Args)]
struct TableArgs {
    /// Count table TSV (taxa as rows, samples as columns)
    #[arg(short = 'c', long)]
    counts: PathBuf,

    /// Sample metadata TSV
    #[arg(short, long)]
    metadata: PathBuf,

    /// Taxonomy TSV
    #[arg(short, long)]
    taxonomy: PathBuf,
}

impl TableArgs {
    fn load(&self) -> Result<AbundanceTable> {
        let table = AbundanceTable::from_tsv(&self.counts, &self.metadata, &self.taxonomy)?;
        info!(
            "Loaded {} samples x {} taxa ({} non-zero cells)",
            table.n_samples(),
            table.n_taxa(),
            table.nnz()
        );
        Ok(table)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Read depth and prevalence profile of a table
    Profile {
        #[command(flatten)]
        table: TableArgs,

        /// Output directory for depth.tsv and prevalence.tsv
        #[arg(short, long, default_value = "profile")]
        output: PathBuf,

        /// Summarize prevalence per label at this rank
        #[arg(long)]
        rank: Option<String>,

        /// Report the samples a depth filter at this threshold would drop
        #[arg(long)]
        min_depth: Option<u64>,
    },

    /// Filter samples and taxa, writing the filtered count table
    Filter {
        #[command(flatten)]
        table: TableArgs,

        /// Output count table TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Drop samples with fewer reads
        #[arg(long)]
        min_depth: Option<u64>,

        /// Sample IDs to drop (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Drop chloroplast and mitochondrial taxa and keep Kingdom Bacteria
        #[arg(long)]
        remove_organelles: bool,

        /// Keep taxa present in at least this fraction of samples
        #[arg(long)]
        prevalence: Option<f64>,
    },

    /// Alpha diversity per sample
    Alpha {
        #[command(flatten)]
        table: TableArgs,

        /// Output TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Beta diversity distance matrix and PCoA
    Beta {
        #[command(flatten)]
        table: TableArgs,

        /// bray_curtis, unweighted_unifrac, weighted_unifrac or weighted_normalized_unifrac
        #[arg(long, default_value = "bray_curtis")]
        metric: BetaMetric,

        /// Newick tree (UniFrac metrics)
        #[arg(long)]
        tree: Option<PathBuf>,

        /// Number of ordination axes to keep
        #[arg(long)]
        max_axes: Option<usize>,

        /// Output directory
        #[arg(short, long, default_value = "beta")]
        output: PathBuf,
    },

    /// PERMANOVA and dispersion test on a distance matrix
    GroupTest {
        /// Distance matrix TSV
        #[arg(short, long)]
        distances: PathBuf,

        /// Metric name recorded in the report
        #[arg(long, default_value = "distance")]
        metric: String,

        /// Sample metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Metadata column with the group labels
        #[arg(short, long)]
        group: String,

        /// Number of permutations
        #[arg(long, default_value = "999")]
        permutations: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Threshold for flagging heterogeneous dispersions
        #[arg(long, default_value = "0.05")]
        alpha: f64,

        /// Output report JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Per-taxon negative binomial likelihood ratio test
    Differential {
        #[command(flatten)]
        table: TableArgs,

        /// Full model, e.g. "~ treatment * time"
        #[arg(long)]
        full: String,

        /// Reduced model, e.g. "~ treatment + time"
        #[arg(long)]
        reduced: String,

        /// Coefficient reported as log2FoldChange (default: last column)
        #[arg(long)]
        coefficient: Option<String>,

        /// Level order of a column, e.g. "time=D0,D7,D14" (repeatable)
        #[arg(long)]
        levels: Vec<String>,

        #[arg(long, value_enum, default_value = "median-of-ratios")]
        size_factors: CliSizeFactors,

        /// FDR threshold for the significant table
        #[arg(long, default_value = "0.05")]
        alpha: f64,

        /// Output results TSV; significant rows go to <stem>_significant.tsv
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run a full analysis from a YAML configuration file
    Run {
        /// Analysis configuration YAML
        #[arg(long)]
        config: PathBuf,

        #[command(flatten)]
        table: TableArgs,

        /// Output directory
        #[arg(short, long, default_value = "results")]
        output: PathBuf,
    },

    /// Generate an example analysis configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "analysis.yaml")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Profile {
            table,
            output,
            rank,
            min_depth,
        } => cmd_profile(&table, &output, rank.as_deref(), min_depth),

        Commands::Filter {
            table,
            output,
            min_depth,
            exclude,
            remove_organelles,
            prevalence,
        } => cmd_filter(&table, &output, min_depth, &exclude, remove_organelles, prevalence),

        Commands::Alpha { table, output } => cmd_alpha(&table, &output),

        Commands::Beta {
            table,
            metric,
            tree,
            max_axes,
            output,
        } => cmd_beta(&table, metric, tree.as_deref(), max_axes, &output),

        Commands::GroupTest {
            distances,
            metric,
            metadata,
            group,
            permutations,
            seed,
            alpha,
            output,
        } => cmd_group_test(
            &distances,
            &metric,
            &metadata,
            &group,
            PermutationConfig {
                n_permutations: permutations,
                seed,
                alpha,
            },
            output.as_deref(),
        ),

        Commands::Differential {
            table,
            full,
            reduced,
            coefficient,
            levels,
            size_factors,
            alpha,
            output,
        } => parse_levels(&levels).and_then(|levels| {
            let config = DifferentialConfig {
                full_formula: full,
                reduced_formula: reduced,
                coefficient,
                size_factors: size_factors.into(),
                alpha,
                levels,
            };
            cmd_differential(&table, &config, &output)
        }),

        Commands::Run {
            config,
            table,
            output,
        } => cmd_run(&config, &table, &output),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Parse `column=level1,level2,...` declarations.
fn parse_levels(specs: &[String]) -> Result<Vec<LevelOrder>> {
    specs
        .iter()
        .map(|spec| {
            let (column, levels) = spec.split_once('=').ok_or_else(|| {
                EdaError::InvalidParameter(format!(
                    "level order '{}' must look like column=level1,level2",
                    spec
                ))
            })?;
            Ok(LevelOrder {
                column: column.trim().to_string(),
                levels: levels.split(',').map(|l| l.trim().to_string()).collect(),
            })
        })
        .collect()
}

fn cmd_profile(
    table_args: &TableArgs,
    output_dir: &Path,
    rank: Option<&str>,
    min_depth: Option<u64>,
) -> Result<()> {
    let table = table_args.load()?;
    let depth = profile_depth(&table);
    let prevalence = estimate_prevalence(&table);

    println!("Depth Profile");
    println!("=============");
    println!("  Samples: {}", table.n_samples());
    println!("  Taxa:    {}", table.n_taxa());
    println!("  Mean:    {:.0}", depth.mean);
    println!("  Median:  {:.0}", depth.median);
    println!("  Min:     {}", depth.min);
    println!("  Max:     {}", depth.max);
    println!("  CV:      {:.2}", depth.cv);
    if let Some(threshold) = min_depth {
        let below = depth.samples_below(threshold);
        println!("  Below {}: {} {:?}", threshold, below.len(), below);
    }

    if let Some(rank) = rank {
        println!();
        println!("Prevalence by {}", rank);
        for row in prevalence.summarize_by_rank(rank)? {
            println!(
                "  {:<30} taxa = {:<5} mean prevalence = {:.2}",
                row.label.as_deref().unwrap_or("(unassigned)"),
                row.n_taxa,
                row.mean_prevalence
            );
        }
    }

    std::fs::create_dir_all(output_dir)?;
    depth.to_tsv(output_dir.join("depth.tsv"))?;
    prevalence.to_tsv(output_dir.join("prevalence.tsv"))?;
    info!("Profile written to {}", output_dir.display());
    Ok(())
}

fn cmd_filter(
    table_args: &TableArgs,
    output_path: &Path,
    min_depth: Option<u64>,
    exclude: &[String],
    remove_organelles: bool,
    prevalence: Option<f64>,
) -> Result<()> {
    let table = table_args.load()?;

    let exclude: Vec<&str> = exclude.iter().map(String::as_str).collect();
    let mut pipeline = Pipeline::new()
        .name("filter")
        .exclude_samples(min_depth, &exclude);
    if remove_organelles {
        pipeline = pipeline.lineage(vec![
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
        ]);
    }
    if let Some(fraction) = prevalence {
        pipeline = pipeline.prevalence(fraction);
    }
    let run = pipeline.prune_empty_taxa().run(&table)?;

    for report in run.reports() {
        eprint!("{}", report);
    }
    run.final_table().to_tsv(output_path)?;
    info!("Filtered table written to {}", output_path.display());
    Ok(())
}

fn cmd_alpha(table_args: &TableArgs, output_path: &Path) -> Result<()> {
    let table = table_args.load()?;
    let alpha = estimate_alpha(&table);
    alpha.to_tsv(output_path)?;
    info!(
        "Alpha diversity of {} samples written to {}",
        alpha.rows.len(),
        output_path.display()
    );
    Ok(())
}

fn cmd_beta(
    table_args: &TableArgs,
    metric: BetaMetric,
    tree_path: Option<&Path>,
    max_axes: Option<usize>,
    output_dir: &Path,
) -> Result<()> {
    let table = table_args.load()?;
    let tree = tree_path.map(PhyloTree::from_file).transpose()?;

    let distances = beta_diversity(&table, metric, tree.as_ref())?;
    let ordination = pcoa(&distances, max_axes)?;

    std::fs::create_dir_all(output_dir)?;
    distances.to_tsv(output_dir.join(format!("distance_{}.tsv", metric)))?;
    ordination.to_tsv(output_dir.join(format!("pcoa_{}.tsv", metric)))?;

    for axis in &ordination.axes {
        println!(
            "{}: {:.1}% variance explained",
            axis.name,
            axis.variance_explained * 100.0
        );
    }
    Ok(())
}

fn cmd_group_test(
    distances_path: &Path,
    metric: &str,
    metadata_path: &Path,
    column: &str,
    config: PermutationConfig,
    output_path: Option<&Path>,
) -> Result<()> {
    let distances = DistanceMatrix::from_tsv(distances_path, metric)?;
    let metadata = Metadata::from_tsv(metadata_path)?;
    let grouping = Grouping::from_metadata(&metadata, column, distances.sample_ids())?;

    let report = group_test(&distances, &grouping, &config)?;
    println!("{}", report);
    if let Some(path) = output_path {
        report.to_json(path)?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn cmd_differential(table_args: &TableArgs, config: &DifferentialConfig, output_path: &Path) -> Result<()> {
    let table = table_args.load()?;
    let results = test_lrt_nb(&table, config)?;

    results.to_tsv(output_path)?;
    let significant_path = output_path.with_file_name(format!(
        "{}_significant.tsv",
        output_path
            .file_stem()
            .map_or_else(|| "differential".into(), |s| s.to_string_lossy())
    ));
    let significant = results.significant(config.alpha);
    significant.to_tsv(&significant_path)?;

    print!("{}", results.summary(config.alpha));
    if !significant.is_empty() {
        println!();
        println!("Top hits:");
        for r in significant.iter().take(10) {
            println!(
                "  {}: log2FC = {:.3}, padj = {:.4}",
                r.taxon_id,
                r.log2_fold_change.unwrap_or(f64::NAN),
                r.p_adj.unwrap_or(f64::NAN)
            );
        }
    }
    info!(
        "Results written to {} and {}",
        output_path.display(),
        significant_path.display()
    );
    Ok(())
}

fn cmd_run(config_path: &Path, table_args: &TableArgs, output_dir: &Path) -> Result<()> {
    let config = AnalysisConfig::from_file(config_path)?;
    let table = table_args.load()?;

    // Tree paths are relative to the configuration file
    let tree = match config.diversity.as_ref().and_then(|d| d.tree.as_ref()) {
        Some(path) => {
            let path = config_path.parent().map_or_else(|| path.clone(), |dir| dir.join(path));
            Some(PhyloTree::from_file(path)?)
        }
        None => None,
    };

    info!("Running analysis '{}'", config.name);
    let output = config.run(&table, tree.as_ref())?;
    eprint!("{}", output.run);
    if let Some(report) = output.beta.as_ref().and_then(|b| b.group_test.as_ref()) {
        println!("{}", report);
    }
    if let Some(results) = &output.differential {
        let alpha = config.differential.as_ref().map_or(0.05, |c| c.alpha);
        print!("{}", results.summary(alpha));
    }
    output.write_to(output_dir)
}

fn cmd_example(output_path: &Path) -> Result<()> {
    let yaml = AnalysisConfig::example().to_yaml()?;
    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example configuration to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);
    Ok(())
}
