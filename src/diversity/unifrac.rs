//! UniFrac distances: unweighted (presence/absence) and weighted
//! (abundance) variants over a rooted phylogeny.

use super::tree::PhyloTree;
use crate::data::{AbundanceTable, DistanceMatrix};
use crate::error::{EdaError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Which UniFrac to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifracVariant {
    /// Fraction of observed branch length unique to one sample, in [0, 1].
    Unweighted,
    /// Raw weighted UniFrac `Σ b_i |pA_i - pB_i|`; unbounded.
    Weighted,
    /// Weighted UniFrac divided by `Σ_leaves d(root, leaf) (pA + pB)`, in [0, 1].
    WeightedNormalized,
}

impl UnifracVariant {
    /// Metric name used on the resulting distance matrix.
    pub fn metric_name(&self) -> &'static str {
        match self {
            UnifracVariant::Unweighted => "unweighted_unifrac",
            UnifracVariant::Weighted => "weighted_unifrac",
            UnifracVariant::WeightedNormalized => "weighted_normalized_unifrac",
        }
    }
}

/// Per-node abundance of one sample: the summed proportion of every leaf
/// below each node.
struct NodeMass(Vec<f64>);

/// Maps table columns to tree leaves.
struct LeafMap {
    leaves: Vec<usize>,
}

impl LeafMap {
    fn new(tree: &PhyloTree, taxon_ids: &[String]) -> Result<Self> {
        let leaves = taxon_ids
            .iter()
            .map(|tid| {
                tree.leaf_idx(tid)
                    .ok_or_else(|| EdaError::TaxonNotInTree(tid.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { leaves })
    }

    fn node_mass(&self, tree: &PhyloTree, abundances: &[f64]) -> NodeMass {
        let nodes = tree.nodes();
        let total: f64 = abundances.iter().sum();
        let mut mass = vec![0.0; nodes.len()];
        if total > 0.0 {
            for (col, &leaf) in self.leaves.iter().enumerate() {
                mass[leaf] += abundances[col] / total;
            }
        }
        // pre-order storage: children always follow their parent
        for i in (1..nodes.len()).rev() {
            if let Some(parent) = nodes[i].parent {
                mass[parent] += mass[i];
            }
        }
        NodeMass(mass)
    }
}

fn unweighted_from_mass(tree: &PhyloTree, a: &NodeMass, b: &NodeMass) -> f64 {
    let mut unique = 0.0;
    let mut observed = 0.0;
    for (i, node) in tree.nodes().iter().enumerate().skip(1) {
        let in_a = a.0[i] > 0.0;
        let in_b = b.0[i] > 0.0;
        if in_a || in_b {
            observed += node.branch_length;
            if in_a != in_b {
                unique += node.branch_length;
            }
        }
    }
    if observed > 0.0 {
        unique / observed
    } else {
        0.0
    }
}

fn weighted_from_mass(tree: &PhyloTree, a: &NodeMass, b: &NodeMass) -> f64 {
    tree.nodes()
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, node)| node.branch_length * (a.0[i] - b.0[i]).abs())
        .sum()
}

fn weighted_normalizer(tree: &PhyloTree, root_dist: &[f64], a: &NodeMass, b: &NodeMass) -> f64 {
    tree.nodes()
        .iter()
        .enumerate()
        .filter(|(_, node)| node.is_leaf())
        .map(|(i, _)| root_dist[i] * (a.0[i] + b.0[i]))
        .sum()
}

/// Unweighted UniFrac between two samples given as abundance rows aligned
/// with `taxon_ids`.
///
/// # Errors
/// `TaxonNotInTree` if a taxon is not a leaf of `tree`.
pub fn unweighted_unifrac(
    tree: &PhyloTree,
    taxon_ids: &[String],
    sample_a: &[f64],
    sample_b: &[f64],
) -> Result<f64> {
    check_lengths(taxon_ids, sample_a, sample_b)?;
    let map = LeafMap::new(tree, taxon_ids)?;
    let (a, b) = (map.node_mass(tree, sample_a), map.node_mass(tree, sample_b));
    Ok(unweighted_from_mass(tree, &a, &b))
}

/// Weighted UniFrac between two samples; `normalized` selects the [0, 1]
/// scaled variant.
///
/// # Errors
/// `TaxonNotInTree` if a taxon is not a leaf of `tree`; `InvalidParameter`
/// if either sample has no abundance.
pub fn weighted_unifrac(
    tree: &PhyloTree,
    taxon_ids: &[String],
    sample_a: &[f64],
    sample_b: &[f64],
    normalized: bool,
) -> Result<f64> {
    check_lengths(taxon_ids, sample_a, sample_b)?;
    if sample_a.iter().sum::<f64>() <= 0.0 || sample_b.iter().sum::<f64>() <= 0.0 {
        return Err(EdaError::InvalidParameter(
            "weighted UniFrac is undefined for an empty sample".to_string(),
        ));
    }
    let map = LeafMap::new(tree, taxon_ids)?;
    let (a, b) = (map.node_mass(tree, sample_a), map.node_mass(tree, sample_b));
    let raw = weighted_from_mass(tree, &a, &b);
    if !normalized {
        return Ok(raw);
    }
    let denom = weighted_normalizer(tree, &tree.distances_to_root(), &a, &b);
    Ok(if denom > 0.0 { raw / denom } else { 0.0 })
}

/// Pairwise UniFrac distances between all samples of a table.
///
/// Pairs are computed in parallel. Every taxon of the table must be a leaf
/// of `tree`; tree leaves absent from the table are ignored.
///
/// # Errors
/// `TaxonNotInTree` for an unknown taxon; `DivideByZero` for an empty
/// sample under a weighted variant.
pub fn unifrac_distances(
    table: &AbundanceTable,
    tree: &PhyloTree,
    variant: UnifracVariant,
) -> Result<DistanceMatrix> {
    let map = LeafMap::new(tree, table.taxon_ids())?;
    let depths = table.sample_sums();
    if variant != UnifracVariant::Unweighted {
        if let Some(idx) = depths.iter().position(|&d| d == 0) {
            return Err(EdaError::DivideByZero {
                sample: table.sample_ids()[idx].clone(),
            });
        }
    }

    let masses: Vec<NodeMass> = (0..table.n_samples())
        .into_par_iter()
        .map(|i| {
            let row: Vec<f64> = table.sample_row_dense(i).iter().map(|&c| c as f64).collect();
            map.node_mass(tree, &row)
        })
        .collect();
    let root_dist = tree.distances_to_root();

    let n = table.n_samples();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    let condensed: Vec<f64> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let (a, b) = (&masses[i], &masses[j]);
            match variant {
                UnifracVariant::Unweighted => unweighted_from_mass(tree, a, b),
                UnifracVariant::Weighted => weighted_from_mass(tree, a, b),
                UnifracVariant::WeightedNormalized => {
                    let denom = weighted_normalizer(tree, &root_dist, a, b);
                    if denom > 0.0 {
                        weighted_from_mass(tree, a, b) / denom
                    } else {
                        0.0
                    }
                }
            }
        })
        .collect();

    log::debug!(
        "{} over {} samples ({} pairs)",
        variant.metric_name(),
        n,
        condensed.len()
    );
    DistanceMatrix::from_condensed(
        table.sample_ids().to_vec(),
        &condensed,
        variant.metric_name(),
    )
}

fn check_lengths(taxon_ids: &[String], a: &[f64], b: &[f64]) -> Result<()> {
    for len in [a.len(), b.len()] {
        if len != taxon_ids.len() {
            return Err(EdaError::DimensionMismatch {
                expected: taxon_ids.len(),
                actual: len,
            });
        }
    }
    Ok(())
}
