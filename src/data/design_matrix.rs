//! Design matrix construction from metadata and a formula.

use crate::data::{Formula, Metadata, Term, Variable, VariableType};
use crate::error::{EdaError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Name of the intercept column.
pub const INTERCEPT: &str = "(Intercept)";

/// A model design matrix (samples × coefficients).
///
/// Categorical variables use treatment contrasts: one indicator column per
/// non-reference level, where the reference is the first level (the
/// declared first level for ordered factors, otherwise alphabetical).
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    coefficient_names: Vec<String>,
    sample_ids: Vec<String>,
    /// Reference levels for categorical variables.
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        if matrix.ncols() != coefficient_names.len() {
            return Err(EdaError::DimensionMismatch {
                expected: matrix.ncols(),
                actual: coefficient_names.len(),
            });
        }
        if matrix.nrows() != sample_ids.len() {
            return Err(EdaError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: sample_ids.len(),
            });
        }
        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels: HashMap::new(),
        })
    }

    /// Build a design matrix from metadata and formula.
    ///
    /// Every variable in the formula must exist and have no missing values.
    pub fn from_formula(metadata: &Metadata, formula: &Formula) -> Result<Self> {
        let sample_ids = metadata.sample_ids().to_vec();
        let n_samples = sample_ids.len();

        let mut reference_levels = HashMap::new();
        let mut variable_columns: HashMap<String, Vec<(String, Vec<f64>)>> = HashMap::new();
        for var in formula.variables() {
            let (reference, cols) = variable_columns_for(metadata, var)?;
            if let Some(reference) = reference {
                reference_levels.insert(var.to_string(), reference);
            }
            variable_columns.insert(var.to_string(), cols);
        }

        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        if formula.intercept {
            coefficient_names.push(INTERCEPT.to_string());
            columns.push(vec![1.0; n_samples]);
        }

        for term in &formula.terms {
            match term {
                Term::Main(var) => {
                    let cols = &variable_columns[var.as_str()];
                    if !formula.intercept && reference_levels.contains_key(var.as_str()) {
                        // Without an intercept the reference level gets its own column
                        let (name, col) = reference_indicator(metadata, var, &reference_levels)?;
                        coefficient_names.push(name);
                        columns.push(col);
                    }
                    for (name, col) in cols {
                        coefficient_names.push(name.clone());
                        columns.push(col.clone());
                    }
                }
                Term::Interaction(var1, var2) => {
                    let cols1 = &variable_columns[var1.as_str()];
                    let cols2 = &variable_columns[var2.as_str()];
                    for (name1, col1) in cols1 {
                        for (name2, col2) in cols2 {
                            coefficient_names.push(format!("{}:{}", name1, name2));
                            columns.push(col1.iter().zip(col2).map(|(a, b)| a * b).collect());
                        }
                    }
                }
            }
        }

        let matrix = DMatrix::from_fn(n_samples, columns.len(), |row, col| columns[col][row]);

        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels,
        })
    }

    /// Get the design matrix.
    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    #[inline]
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Get sample IDs.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples (rows).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    #[inline]
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a categorical variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(String::as_str) == Some(INTERCEPT)
    }

    /// Whether this design's columns are a strict subset of `full`'s, i.e.
    /// this is a reduced model of `full` suitable for a likelihood-ratio test.
    pub fn is_nested_in(&self, full: &DesignMatrix) -> bool {
        self.n_coefficients() < full.n_coefficients()
            && self
                .coefficient_names
                .iter()
                .all(|name| full.coefficient_index(name).is_some())
    }

    /// Numerical rank of the matrix (via SVD).
    pub fn rank(&self) -> usize {
        if self.matrix.ncols() == 0 || self.matrix.nrows() == 0 {
            return 0;
        }
        self.matrix.clone().svd(false, false).rank(1e-8)
    }
}

/// Reference level (for categorical variables) and the non-reference
/// columns of a single variable.
fn variable_columns_for(
    metadata: &Metadata,
    var: &str,
) -> Result<(Option<String>, Vec<(String, Vec<f64>)>)> {
    let values = metadata.column(var)?;
    if let Some(pos) = values.iter().position(|v| v.is_missing()) {
        return Err(EdaError::InvalidVariableType {
            column: var.to_string(),
            reason: format!(
                "missing value for sample '{}'",
                metadata.sample_ids()[pos]
            ),
        });
    }

    match metadata.column_type(var) {
        Some(VariableType::Continuous) | Some(VariableType::Ordinal) => {
            let col = values
                .iter()
                .map(|v| v.as_continuous().unwrap_or(0.0))
                .collect();
            Ok((None, vec![(var.to_string(), col)]))
        }
        Some(VariableType::Categorical) | None => {
            let levels = metadata.levels(var)?;
            let reference = levels.first().cloned().ok_or_else(|| {
                EdaError::InvalidVariableType {
                    column: var.to_string(),
                    reason: "no levels".to_string(),
                }
            })?;
            let cols = levels
                .iter()
                .skip(1)
                .map(|level| (format!("{}{}", var, level), indicator(&values, level)))
                .collect();
            Ok((Some(reference), cols))
        }
    }
}

fn reference_indicator(
    metadata: &Metadata,
    var: &str,
    reference_levels: &HashMap<String, String>,
) -> Result<(String, Vec<f64>)> {
    let values = metadata.column(var)?;
    let level = &reference_levels[var];
    Ok((format!("{}{}", var, level), indicator(&values, level)))
}

fn indicator(values: &[&Variable], level: &str) -> Vec<f64> {
    values
        .iter()
        .map(|v| match v.as_categorical() {
            Some(s) if s == level => 1.0,
            _ => 0.0,
        })
        .collect()
}
