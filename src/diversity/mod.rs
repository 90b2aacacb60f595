//! Alpha diversity, beta diversity distances and ordination.

mod alpha;
mod bray_curtis;
mod ordination;
mod tree;
mod unifrac;

pub use alpha::{
    chao1, estimate_alpha, observed_richness, shannon_index, simpson_index, AlphaDiversity,
    AlphaDiversityTable,
};
pub use bray_curtis::{bray_curtis, bray_curtis_distances};
pub use ordination::{pcoa, NegativeEigenvalues, OrdinationAxis, OrdinationResult};
pub(crate) use ordination::{eigen_tolerance, gower_eigen};
pub use tree::{PhyloTree, TreeNode};
pub use unifrac::{unifrac_distances, unweighted_unifrac, weighted_unifrac, UnifracVariant};

use crate::data::{AbundanceTable, DistanceMatrix};
use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};

/// Between-sample distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaMetric {
    BrayCurtis,
    UnweightedUnifrac,
    WeightedUnifrac,
    WeightedNormalizedUnifrac,
}

impl BetaMetric {
    /// Whether the metric needs a phylogenetic tree.
    pub fn needs_tree(&self) -> bool {
        !matches!(self, BetaMetric::BrayCurtis)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BetaMetric::BrayCurtis => "bray_curtis",
            BetaMetric::UnweightedUnifrac => UnifracVariant::Unweighted.metric_name(),
            BetaMetric::WeightedUnifrac => UnifracVariant::Weighted.metric_name(),
            BetaMetric::WeightedNormalizedUnifrac => {
                UnifracVariant::WeightedNormalized.metric_name()
            }
        }
    }
}

impl std::fmt::Display for BetaMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for BetaMetric {
    type Err = EdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bray_curtis" | "bray" => Ok(BetaMetric::BrayCurtis),
            "unweighted_unifrac" | "unifrac" => Ok(BetaMetric::UnweightedUnifrac),
            "weighted_unifrac" => Ok(BetaMetric::WeightedUnifrac),
            "weighted_normalized_unifrac" => Ok(BetaMetric::WeightedNormalizedUnifrac),
            other => Err(EdaError::InvalidParameter(format!(
                "unknown beta diversity metric '{}'",
                other
            ))),
        }
    }
}

/// Compute the pairwise distance matrix for `metric`.
///
/// # Errors
/// `InvalidParameter` when a UniFrac metric is requested without a tree.
pub fn beta_diversity(
    table: &AbundanceTable,
    metric: BetaMetric,
    tree: Option<&PhyloTree>,
) -> Result<DistanceMatrix> {
    let variant = match metric {
        BetaMetric::BrayCurtis => return bray_curtis_distances(table),
        BetaMetric::UnweightedUnifrac => UnifracVariant::Unweighted,
        BetaMetric::WeightedUnifrac => UnifracVariant::Weighted,
        BetaMetric::WeightedNormalizedUnifrac => UnifracVariant::WeightedNormalized,
    };
    let tree = tree.ok_or_else(|| {
        EdaError::InvalidParameter(format!("{} requires a phylogenetic tree", metric))
    })?;
    unifrac_distances(table, tree, variant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_parsing() {
        assert_eq!("bray-curtis".parse::<BetaMetric>().unwrap(), BetaMetric::BrayCurtis);
        assert_eq!(
            "Weighted_UniFrac".parse::<BetaMetric>().unwrap(),
            BetaMetric::WeightedUnifrac
        );
        assert!("jaccard".parse::<BetaMetric>().is_err());
        assert!(BetaMetric::UnweightedUnifrac.needs_tree());
        assert_eq!(BetaMetric::BrayCurtis.to_string(), "bray_curtis");
    }
}
