//! Error types for the amplicon-eda library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum EdaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid count value '{value}' at row {row}, column {col}")]
    InvalidCount {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error("Taxon ID mismatch: {0}")]
    TaxonMismatch(String),

    #[error("Duplicate identifier '{0}'")]
    DuplicateId(String),

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Invalid variable type for column '{column}': {reason}")]
    InvalidVariableType { column: String, reason: String },

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("Invalid distance matrix: {0}")]
    InvalidDistance(String),

    #[error("Newick parse error: {0}")]
    TreeParse(String),

    #[error("Taxon '{0}' is not a leaf of the phylogenetic tree")]
    TaxonNotInTree(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Division by zero: sample '{sample}' has zero total counts; prune empty samples first")]
    DivideByZero { sample: String },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EdaError {
    /// Whether this error reports malformed input (as opposed to an empty
    /// result, a numerical failure or an I/O problem).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EdaError::InvalidCount { .. }
                | EdaError::DimensionMismatch { .. }
                | EdaError::SampleMismatch(_)
                | EdaError::TaxonMismatch(_)
                | EdaError::DuplicateId(_)
                | EdaError::MissingColumn(_)
                | EdaError::InvalidVariableType { .. }
                | EdaError::FormulaParse(_)
                | EdaError::InvalidDistance(_)
                | EdaError::TreeParse(_)
                | EdaError::TaxonNotInTree(_)
        )
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, EdaError>;
