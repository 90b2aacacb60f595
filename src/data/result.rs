//! Per-taxon differential abundance results.

use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

const NA: &str = "NA";
const FIXED_COLUMNS: [&str; 9] = [
    "taxon_id",
    "baseMean",
    "log2FoldChange",
    "lfcSE",
    "stat",
    "pvalue",
    "padj",
    "dispersion",
    "status",
];

/// Outcome of fitting one taxon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Both models converged and the test statistic is valid.
    Ok,
    /// All counts identical (including all zero); nothing to test.
    ZeroVariance,
    /// IRLS did not converge within the iteration limit.
    NotConverged,
    /// The weighted normal equations were singular or produced non-finite values.
    FitFailed,
}

impl FitStatus {
    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ZeroVariance => "zero_variance",
            Self::NotConverged => "not_converged",
            Self::FitFailed => "fit_failed",
        }
    }

    /// Whether the row carries test statistics.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FitStatus {
    type Err = EdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(Self::Ok),
            "zero_variance" => Ok(Self::ZeroVariance),
            "not_converged" => Ok(Self::NotConverged),
            "fit_failed" => Ok(Self::FitFailed),
            other => Err(EdaError::InvalidParameter(format!(
                "Unknown fit status '{}'",
                other
            ))),
        }
    }
}

/// Result for a single taxon from the likelihood-ratio test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialResult {
    /// Taxon identifier.
    pub taxon_id: String,
    /// Mean of size-factor normalized counts.
    pub base_mean: f64,
    /// Tested coefficient on the log2 scale.
    pub log2_fold_change: Option<f64>,
    /// Standard error of `log2_fold_change`.
    pub lfc_se: Option<f64>,
    /// LRT statistic `2 (ll_full - ll_reduced)`.
    pub statistic: Option<f64>,
    /// Raw p-value.
    pub p_value: Option<f64>,
    /// Benjamini-Hochberg adjusted p-value.
    pub p_adj: Option<f64>,
    /// Negative binomial dispersion (alpha, variance = mu + alpha mu^2).
    pub dispersion: Option<f64>,
    pub status: FitStatus,
    /// Lineage labels, one per rank of the owning result set.
    pub lineage: Vec<Option<String>>,
}

impl DifferentialResult {
    /// A row with no test statistics (zero variance or failed fit).
    pub fn not_tested(
        taxon_id: String,
        base_mean: f64,
        status: FitStatus,
        lineage: Vec<Option<String>>,
    ) -> Self {
        Self {
            taxon_id,
            base_mean,
            log2_fold_change: None,
            lfc_se: None,
            statistic: None,
            p_value: None,
            p_adj: None,
            dispersion: None,
            status,
            lineage,
        }
    }

    /// Check if this result is significant at `alpha` (NA is never significant).
    pub fn is_significant_at(&self, alpha: f64) -> bool {
        self.p_adj.map_or(false, |q| q < alpha)
    }
}

/// Results of one differential test across all taxa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialResults {
    /// Full model formula.
    pub full_formula: String,
    /// Reduced model formula.
    pub reduced_formula: String,
    /// Coefficient reported as log2FoldChange.
    pub coefficient: String,
    /// Rank names for the lineage columns.
    pub ranks: Vec<String>,
    /// Individual results, in table taxon order.
    pub results: Vec<DifferentialResult>,
}

impl DifferentialResults {
    /// Create a new result set.
    pub fn new(
        full_formula: String,
        reduced_formula: String,
        coefficient: String,
        ranks: Vec<String>,
        results: Vec<DifferentialResult>,
    ) -> Self {
        Self {
            full_formula,
            reduced_formula,
            coefficient,
            ranks,
            results,
        }
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterate over results.
    pub fn iter(&self) -> impl Iterator<Item = &DifferentialResult> {
        self.results.iter()
    }

    /// Look up a taxon's row.
    pub fn get(&self, taxon_id: &str) -> Option<&DifferentialResult> {
        self.results.iter().find(|r| r.taxon_id == taxon_id)
    }

    /// Results sorted by p-value (ascending, NA last).
    pub fn sorted_by_pvalue(&self) -> Vec<&DifferentialResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| cmp_na_last(a.p_value, b.p_value));
        sorted
    }

    /// New result set with only the rows whose padj < `alpha`, ordered by padj.
    pub fn significant(&self, alpha: f64) -> Self {
        let mut results: Vec<DifferentialResult> = self
            .results
            .iter()
            .filter(|r| r.is_significant_at(alpha))
            .cloned()
            .collect();
        results.sort_by(|a, b| cmp_na_last(a.p_adj, b.p_adj));
        Self {
            results,
            ..self.clone_header()
        }
    }

    /// Counts of tested, skipped and significant rows.
    pub fn summary(&self, alpha: f64) -> ResultSummary {
        ResultSummary {
            total: self.len(),
            tested: self.results.iter().filter(|r| r.p_value.is_some()).count(),
            zero_variance: self
                .results
                .iter()
                .filter(|r| r.status == FitStatus::ZeroVariance)
                .count(),
            failed: self
                .results
                .iter()
                .filter(|r| matches!(r.status, FitStatus::NotConverged | FitStatus::FitFailed))
                .count(),
            alpha,
            significant: self.results.iter().filter(|r| r.is_significant_at(alpha)).count(),
        }
    }

    /// Write results to a TSV file.
    ///
    /// Formulas and the coefficient are written as leading `#` lines; missing
    /// values are written as `NA`.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        writeln!(out, "# full: {}", self.full_formula)?;
        writeln!(out, "# reduced: {}", self.reduced_formula)?;
        writeln!(out, "# coefficient: {}", self.coefficient)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(out);

        let header: Vec<&str> = FIXED_COLUMNS
            .iter()
            .copied()
            .chain(self.ranks.iter().map(String::as_str))
            .collect();
        writer.write_record(&header)?;

        for r in &self.results {
            let mut record = vec![
                r.taxon_id.clone(),
                r.base_mean.to_string(),
                fmt_opt(r.log2_fold_change),
                fmt_opt(r.lfc_se),
                fmt_opt(r.statistic),
                fmt_opt(r.p_value),
                fmt_opt(r.p_adj),
                fmt_opt(r.dispersion),
                r.status.name().to_string(),
            ];
            for idx in 0..self.ranks.len() {
                let label = r.lineage.get(idx).and_then(|l| l.as_deref()).unwrap_or(NA);
                record.push(label.to_string());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a result table written by [`DifferentialResults::to_tsv`].
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut content = String::new();
        File::open(path)?.read_to_string(&mut content)?;

        let mut full_formula = String::new();
        let mut reduced_formula = String::new();
        let mut coefficient = String::new();
        let mut body_start = 0;
        for line in content.split_inclusive('\n') {
            let Some(comment) = line.strip_prefix('#') else {
                break;
            };
            body_start += line.len();
            if let Some((key, value)) = comment.split_once(':') {
                let value = value.trim().to_string();
                match key.trim() {
                    "full" => full_formula = value,
                    "reduced" => reduced_formula = value,
                    "coefficient" => coefficient = value,
                    _ => {}
                }
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_reader(content[body_start..].as_bytes());
        let headers = reader.headers()?.clone();
        if headers.len() < FIXED_COLUMNS.len()
            || headers.iter().zip(FIXED_COLUMNS.iter()).any(|(h, f)| h != *f)
        {
            return Err(EdaError::MissingColumn(format!(
                "result table must start with {:?}",
                FIXED_COLUMNS
            )));
        }
        let ranks: Vec<String> = headers
            .iter()
            .skip(FIXED_COLUMNS.len())
            .map(String::from)
            .collect();

        let mut results = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or(NA);
            results.push(DifferentialResult {
                taxon_id: field(0).to_string(),
                base_mean: parse_opt(field(1))?.unwrap_or(0.0),
                log2_fold_change: parse_opt(field(2))?,
                lfc_se: parse_opt(field(3))?,
                statistic: parse_opt(field(4))?,
                p_value: parse_opt(field(5))?,
                p_adj: parse_opt(field(6))?,
                dispersion: parse_opt(field(7))?,
                status: field(8).parse()?,
                lineage: (FIXED_COLUMNS.len()..headers.len())
                    .map(|i| match field(i) {
                        NA | "" => None,
                        label => Some(label.to_string()),
                    })
                    .collect(),
            });
        }

        Ok(Self::new(
            full_formula,
            reduced_formula,
            coefficient,
            ranks,
            results,
        ))
    }

    fn clone_header(&self) -> Self {
        Self {
            full_formula: self.full_formula.clone(),
            reduced_formula: self.reduced_formula.clone(),
            coefficient: self.coefficient.clone(),
            ranks: self.ranks.clone(),
            results: Vec::new(),
        }
    }
}

/// Summary statistics for a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub tested: usize,
    pub zero_variance: usize,
    pub failed: usize,
    pub alpha: f64,
    pub significant: usize,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Taxa:                {}", self.total)?;
        writeln!(f, "Tested:              {}", self.tested)?;
        writeln!(f, "Zero variance (NA):  {}", self.zero_variance)?;
        writeln!(f, "Failed fits (NA):    {}", self.failed)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| NA.to_string(), |v| v.to_string())
}

fn parse_opt(raw: &str) -> Result<Option<f64>> {
    match raw.trim() {
        NA | "" => Ok(None),
        s => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| EdaError::InvalidParameter(format!("Unparseable number '{}'", s))),
    }
}

fn cmp_na_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
