//! Integration tests for the full exploratory workflow.

use amplicon_eda::prelude::*;
use approx::assert_relative_eq;
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

const TREATMENTS: [&str; 2] = ["control", "antibiotic"];
const TIMES: [&str; 3] = ["D0", "D7", "D14"];

/// Counts per taxon over 12 factorial samples (treatment x time, two
/// replicates each) followed by one shallow blank.
fn taxa() -> Vec<(&'static str, [&'static str; 3], [u64; 13])> {
    vec![
        // Lost under antibiotic at D7 and D14 only
        (
            "Lactobacillus",
            ["Bacteria", "Firmicutes", "Bacilli"],
            [100, 110, 95, 105, 102, 98, 101, 99, 5, 4, 6, 3, 1],
        ),
        (
            "Bacteroides",
            ["Bacteria", "Bacteroidota", "Bacteroidia"],
            [50, 52, 48, 51, 49, 50, 53, 47, 50, 51, 49, 52, 0],
        ),
        // Identical counts in every retained sample
        ("Constant", ["Bacteria", "Firmicutes", "Clostridia"], [7; 13]),
        (
            "Blautia",
            ["Bacteria", "Firmicutes", "Clostridia"],
            [500, 510, 490, 505, 495, 500, 502, 498, 500, 505, 495, 500, 1],
        ),
        (
            "Prevotella",
            ["Bacteria", "Bacteroidota", "Bacteroidia"],
            [300, 290, 310, 305, 295, 300, 298, 302, 300, 299, 301, 300, 0],
        ),
        (
            "Plastid",
            ["Bacteria", "Cyanobacteria", "Chloroplast"],
            [20, 25, 22, 18, 21, 24, 19, 23, 20, 22, 21, 20, 0],
        ),
        // Present in a single sample
        (
            "Singleton",
            ["Bacteria", "Proteobacteria", "Gammaproteobacteria"],
            [0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        ),
    ]
}

fn sample_ids() -> Vec<String> {
    (0..12)
        .map(|i| format!("S{:02}", i))
        .chain(std::iter::once("blank".to_string()))
        .collect()
}

/// Write the synthetic study as counts, metadata and taxonomy TSV files.
fn write_study() -> (NamedTempFile, NamedTempFile, NamedTempFile) {
    let ids = sample_ids();

    let mut counts = NamedTempFile::new().unwrap();
    writeln!(counts, "taxon_id\t{}", ids.join("\t")).unwrap();
    for (taxon, _, row) in taxa() {
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        writeln!(counts, "{}\t{}", taxon, cells.join("\t")).unwrap();
    }
    counts.flush().unwrap();

    let mut metadata = NamedTempFile::new().unwrap();
    writeln!(metadata, "sample_id\ttreatment\ttime").unwrap();
    let mut i = 0;
    for treatment in TREATMENTS {
        for time in TIMES {
            for _ in 0..2 {
                writeln!(metadata, "{}\t{}\t{}", ids[i], treatment, time).unwrap();
                i += 1;
            }
        }
    }
    writeln!(metadata, "blank\tcontrol\tD0").unwrap();
    metadata.flush().unwrap();

    let mut taxonomy = NamedTempFile::new().unwrap();
    writeln!(taxonomy, "taxon_id\tKingdom\tPhylum\tClass").unwrap();
    for (taxon, lineage, _) in taxa() {
        writeln!(taxonomy, "{}\t{}", taxon, lineage.join("\t")).unwrap();
    }
    taxonomy.flush().unwrap();

    (counts, metadata, taxonomy)
}

fn load_study() -> AbundanceTable {
    let (counts, metadata, taxonomy) = write_study();
    AbundanceTable::from_tsv(counts.path(), metadata.path(), taxonomy.path()).unwrap()
}

fn filter_pipeline() -> Pipeline {
    Pipeline::new()
        .name("workflow")
        .min_depth(100)
        .checkpoint("depth_filtered")
        .lineage(vec![LineageRule::Exclude {
            rank: "Class".to_string(),
            values: vec!["Chloroplast".to_string()],
        }])
        .prevalence(0.25)
        .prune_empty_taxa()
        .checkpoint("filtered")
}

fn differential_config() -> DifferentialConfig {
    DifferentialConfig::new("~ treatment * time", "~ treatment + time")
        .with_levels("treatment", &TREATMENTS)
        .with_levels("time", &TIMES)
}

#[test]
fn test_load_and_filter() {
    let table = load_study();
    assert_eq!(table.n_samples(), 13);
    assert_eq!(table.n_taxa(), 7);

    let run = filter_pipeline().run(&table).unwrap();
    let depth_filtered = run.stage("depth_filtered").unwrap();
    assert_eq!(depth_filtered.n_samples(), 12);
    assert!(depth_filtered.sample_index("blank").is_none());

    let filtered = run.final_table();
    assert_eq!(filtered.n_samples(), 12);
    assert_eq!(filtered.n_taxa(), 5);
    assert!(filtered.taxon_index("Plastid").is_none());
    assert!(filtered.taxon_index("Singleton").is_none());
    // Annotations follow the table
    assert_eq!(filtered.metadata().n_samples(), 12);
    assert_eq!(filtered.taxonomy().n_taxa(), 5);
}

#[test]
fn test_transforms_and_prevalence() {
    let filtered = filter_pipeline().run(&load_study()).unwrap().final_table().clone();

    let relative = relative_abundance(&filtered).unwrap();
    for s in 0..relative.n_samples() {
        assert_relative_eq!(relative.sample_row(s).iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    let proportional = proportional_abundance(&filtered).unwrap();
    let min_depth = *filtered.sample_sums().iter().min().unwrap() as f64;
    assert_relative_eq!(
        proportional.sample_row(0).iter().sum::<f64>(),
        min_depth,
        epsilon = 1e-6
    );
    let logged = proportional.log_shift().unwrap();
    assert_relative_eq!(logged.get(0, 0), proportional.get(0, 0).ln_1p(), epsilon = 1e-12);

    let prevalence = estimate_prevalence(&filtered);
    let row = prevalence.get("Lactobacillus").unwrap();
    assert_eq!(row.prevalence_count, 12);
    assert_eq!(row.total_abundance, 828);
}

#[test]
fn test_prune_and_alpha_scenario() {
    let meta = Metadata::from_reader("sample_id\tg\nA\tx\nB\tx\nC\ty\n".as_bytes()).unwrap();
    let mut tax = Taxonomy::with_default_ranks();
    for t in ["t1", "t2", "t3"] {
        tax.insert(t, &["Bacteria"]).unwrap();
    }
    let table = AbundanceTable::from_rows(
        vec!["A".into(), "B".into(), "C".into()],
        vec!["t1".into(), "t2".into(), "t3".into()],
        &[vec![10, 0, 5], vec![0, 0, 0], vec![3, 3, 3]],
        &meta,
        &tax,
    )
    .unwrap();

    let pruned = prune_empty_samples(&table).unwrap();
    assert_eq!(pruned.sample_ids(), &["A", "C"]);
    assert_eq!(observed_richness(&pruned.sample_row_dense(0)), 2);
    assert_eq!(observed_richness(&pruned.sample_row_dense(1)), 3);
    assert_relative_eq!(shannon_index(&pruned.sample_row_dense(1)), 3f64.ln(), epsilon = 1e-12);

    // Pruning is idempotent
    let again = prune_empty_samples(&pruned).unwrap();
    assert_eq!(again.sample_ids(), pruned.sample_ids());
}

#[test]
fn test_prevalence_boundary() {
    let meta = Metadata::from_reader("sample_id\tg\nA\tx\nB\tx\nC\ty\nD\ty\n".as_bytes()).unwrap();
    let mut tax = Taxonomy::with_default_ranks();
    tax.insert("two", &["Bacteria"]).unwrap();
    tax.insert("one", &["Bacteria"]).unwrap();
    let table = AbundanceTable::from_rows(
        vec!["A".into(), "B".into(), "C".into(), "D".into()],
        vec!["two".into(), "one".into()],
        &[vec![4, 1], vec![3, 0], vec![0, 0], vec![0, 0]],
        &meta,
        &tax,
    )
    .unwrap();

    let kept = filter_by_prevalence(&table, 0.5).unwrap();
    assert_eq!(kept.taxon_ids(), &["two"]);
}

#[test]
fn test_beta_diversity_and_group_test() {
    let filtered = filter_pipeline().run(&load_study()).unwrap().final_table().clone();

    let dm = bray_curtis_distances(&filtered).unwrap();
    let n = dm.n_samples();
    for i in 0..n {
        assert_eq!(dm.get(i, i), 0.0);
        for j in 0..n {
            assert_relative_eq!(dm.get(i, j), dm.get(j, i), epsilon = 1e-12);
        }
    }

    let ordination = pcoa(&dm, Some(3)).unwrap();
    assert!(ordination.n_axes() <= 3);
    let explained = ordination.variance_explained();
    assert!(explained.windows(2).all(|w| w[0] >= w[1]));

    let grouping =
        Grouping::from_metadata(filtered.metadata(), "treatment", dm.sample_ids()).unwrap();
    let config = PermutationConfig::default();
    let report = group_test(&dm, &grouping, &config).unwrap();
    assert!(report.permanova.p_value > 0.0 && report.permanova.p_value <= 1.0);
    assert!((0.0..=1.0).contains(&report.permanova.r_squared));
    assert_eq!(report.dispersion.groups.len(), 2);

    // Same seed, same answer
    let again = group_test(&dm, &grouping, &config).unwrap();
    assert_eq!(report.permanova, again.permanova);
    assert_eq!(report.dispersion, again.dispersion);
}

#[test]
fn test_differential_with_constant_taxon() {
    let filtered = filter_pipeline().run(&load_study()).unwrap().final_table().clone();
    let results = test_lrt_nb(&filtered, &differential_config()).unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results.coefficient, "treatmentantibiotic:timeD14");

    // Identical counts: NA row, the batch still runs
    let constant = results.get("Constant").unwrap();
    assert_eq!(constant.status, FitStatus::ZeroVariance);
    assert!(constant.p_value.is_none());
    assert!(constant.p_adj.is_none());
    assert!(constant.log2_fold_change.is_none());

    let hit = results.get("Lactobacillus").unwrap();
    assert_eq!(hit.status, FitStatus::Ok);
    assert!(hit.p_adj.unwrap() < 1e-3);
    assert!(hit.log2_fold_change.unwrap() < 0.0);

    // padj is non-decreasing in p-value order
    let padj: Vec<f64> = results
        .sorted_by_pvalue()
        .iter()
        .filter_map(|r| r.p_adj)
        .collect();
    assert!(padj.windows(2).all(|w| w[0] <= w[1] + 1e-15));

    let significant = results.significant(0.05);
    assert!(significant.get("Lactobacillus").is_some());
    assert!(significant.get("Constant").is_none());
}

#[test]
fn test_differential_tsv_round_trip() {
    let filtered = filter_pipeline().run(&load_study()).unwrap().final_table().clone();
    let results = test_lrt_nb(&filtered, &differential_config()).unwrap();

    let file = NamedTempFile::new().unwrap();
    results.to_tsv(file.path()).unwrap();
    let loaded = DifferentialResults::from_tsv(file.path()).unwrap();

    assert_eq!(loaded.len(), results.len());
    for (a, b) in results.iter().zip(loaded.iter()) {
        assert_eq!(a.taxon_id, b.taxon_id);
        assert_eq!(a.log2_fold_change, b.log2_fold_change);
        assert_eq!(a.p_adj, b.p_adj);
    }
}

#[test]
fn test_analysis_config_end_to_end() {
    let yaml = r#"
name: workflow
steps:
  - step: min_depth
    threshold: 100
  - step: lineage
    rules:
      - rule: exclude
        rank: Class
        values: [Chloroplast]
  - step: prevalence
    min_fraction: 0.25
  - step: prune_empty_taxa
diversity:
  metric: bray_curtis
  group_column: time
  permutations: 199
differential:
  full_formula: "~ treatment * time"
  reduced_formula: "~ treatment + time"
  levels:
    - column: treatment
      levels: [control, antibiotic]
    - column: time
      levels: [D0, D7, D14]
"#;
    let config = AnalysisConfig::from_yaml(yaml).unwrap();
    let output = config.run(&load_study(), None).unwrap();

    assert_eq!(output.run.final_table().n_taxa(), 5);
    let beta = output.beta.as_ref().unwrap();
    assert_eq!(beta.group_test.as_ref().unwrap().permanova.n_groups, 3);
    let differential = output.differential.as_ref().unwrap();
    assert_eq!(differential.get("Constant").unwrap().status, FitStatus::ZeroVariance);

    let dir = tempdir().unwrap();
    output.write_to(dir.path()).unwrap();
    let significant =
        DifferentialResults::from_tsv(dir.path().join("differential_significant.tsv")).unwrap();
    assert!(significant.get("Lactobacillus").is_some());
}
