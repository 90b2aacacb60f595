//! Per-sample metadata (treatment, time point, virus status, ...).

use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A variable value that can be categorical, continuous, or ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Ordinal variable with integer rank.
    Ordinal(i64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            Variable::Ordinal(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Render the value the way it appeared in the input table.
    pub fn label(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Ordinal(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }
}

/// Type hint for columns when loading metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

/// Read-only view of one sample's metadata, handed to sample predicates.
#[derive(Debug, Clone, Copy)]
pub struct SampleRecord<'a> {
    sample_id: &'a str,
    values: &'a HashMap<String, Variable>,
}

impl<'a> SampleRecord<'a> {
    /// Sample identifier.
    pub fn sample_id(&self) -> &'a str {
        self.sample_id
    }

    /// Raw value of a column, if the column exists.
    pub fn get(&self, column: &str) -> Option<&'a Variable> {
        self.values.get(column)
    }

    /// Categorical level of a column.
    pub fn categorical(&self, column: &str) -> Option<&'a str> {
        self.values.get(column).and_then(|v| v.as_categorical())
    }

    /// Numeric value of a column.
    pub fn continuous(&self, column: &str) -> Option<f64> {
        self.values.get(column).and_then(|v| v.as_continuous())
    }
}

/// Sample metadata containing variables for each sample.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Sample IDs in order.
    sample_ids: Vec<String>,
    /// Column names.
    column_names: Vec<String>,
    /// Data stored as sample_id -> column_name -> Variable.
    data: HashMap<String, HashMap<String, Variable>>,
    /// Type hints for each column.
    column_types: HashMap<String, VariableType>,
    /// Declared level order for ordered categorical columns.
    level_orders: HashMap<String, Vec<String>>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self {
            sample_ids: Vec::new(),
            column_names: Vec::new(),
            data: HashMap::new(),
            column_types: HashMap::new(),
            level_orders: HashMap::new(),
        }
    }

    /// Load metadata from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with column names (first column is sample ID)
    /// - Subsequent rows: sample ID followed by variable values
    ///
    /// Columns are inferred as continuous if all values parse as numbers,
    /// otherwise categorical. Use `with_column_types` to override.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parse metadata from any buffered TSV source.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| EdaError::EmptyData("Empty metadata file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(EdaError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();

        let mut raw_data: Vec<(String, Vec<String>)> = Vec::new();
        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let sample_id = fields[0].trim().to_string();
            let values: Vec<String> = fields[1..].iter().map(|s| s.to_string()).collect();
            raw_data.push((sample_id, values));
        }

        if raw_data.is_empty() {
            return Err(EdaError::EmptyData("No samples in metadata".to_string()));
        }

        let mut column_types = HashMap::new();
        for (col_idx, col_name) in column_names.iter().enumerate() {
            let all_numeric = raw_data.iter().all(|(_, values)| {
                if col_idx >= values.len() {
                    return true;
                }
                let v = values[col_idx].trim();
                is_missing_literal(v) || v.parse::<f64>().is_ok()
            });
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            column_types.insert(col_name.clone(), var_type);
        }

        let mut sample_ids = Vec::new();
        let mut data = HashMap::new();

        for (sample_id, values) in raw_data {
            if data.contains_key(&sample_id) {
                return Err(EdaError::DuplicateId(sample_id));
            }
            let mut sample_data = HashMap::new();
            for (col_idx, col_name) in column_names.iter().enumerate() {
                let var = match values.get(col_idx).map(|s| s.trim()) {
                    None => Variable::Missing,
                    Some(raw) if is_missing_literal(raw) => Variable::Missing,
                    Some(raw) => match column_types.get(col_name) {
                        Some(VariableType::Continuous) => raw
                            .parse::<f64>()
                            .map(Variable::Continuous)
                            .unwrap_or(Variable::Missing),
                        Some(VariableType::Ordinal) => raw
                            .parse::<i64>()
                            .map(Variable::Ordinal)
                            .unwrap_or(Variable::Missing),
                        Some(VariableType::Categorical) | None => {
                            Variable::Categorical(raw.to_string())
                        }
                    },
                };
                sample_data.insert(col_name.clone(), var);
            }
            sample_ids.push(sample_id.clone());
            data.insert(sample_id, sample_data);
        }

        Ok(Self {
            sample_ids,
            column_names,
            data,
            column_types,
            level_orders: HashMap::new(),
        })
    }

    /// Set type hints for specific columns, re-interpreting stored values.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Self {
        for (col_name, var_type) in &types {
            self.column_types.insert(col_name.clone(), *var_type);

            for sample_data in self.data.values_mut() {
                if let Some(var) = sample_data.get_mut(col_name) {
                    *var = match (&*var, var_type) {
                        (Variable::Missing, _) => Variable::Missing,
                        (v, VariableType::Categorical) => v
                            .label()
                            .map(Variable::Categorical)
                            .unwrap_or(Variable::Missing),
                        (Variable::Categorical(s), VariableType::Continuous) => s
                            .trim()
                            .parse::<f64>()
                            .map(Variable::Continuous)
                            .unwrap_or(Variable::Missing),
                        (Variable::Categorical(s), VariableType::Ordinal) => s
                            .trim()
                            .parse::<i64>()
                            .map(Variable::Ordinal)
                            .unwrap_or(Variable::Missing),
                        (Variable::Continuous(v), VariableType::Ordinal) => {
                            Variable::Ordinal(*v as i64)
                        }
                        (Variable::Ordinal(v), VariableType::Continuous) => {
                            Variable::Continuous(*v as f64)
                        }
                        (v, _) => v.clone(),
                    };
                }
            }
        }
        self
    }

    /// Declare `column` an ordered factor with the given level order.
    ///
    /// The column is coerced to categorical. The first level becomes the
    /// reference level in design matrices. Every observed level must be
    /// listed.
    pub fn with_level_order(self, column: &str, levels: &[&str]) -> Result<Self> {
        if !self.has_column(column) {
            return Err(EdaError::MissingColumn(column.to_string()));
        }
        let mut types = HashMap::new();
        types.insert(column.to_string(), VariableType::Categorical);
        let mut meta = self.with_column_types(types);

        let declared: Vec<String> = levels.iter().map(|s| s.to_string()).collect();
        let unique: HashSet<&String> = declared.iter().collect();
        if unique.len() != declared.len() {
            return Err(EdaError::InvalidParameter(format!(
                "Duplicate level in declared order for '{}'",
                column
            )));
        }
        for observed in meta.observed_levels(column)? {
            if !declared.contains(&observed) {
                return Err(EdaError::InvalidParameter(format!(
                    "Level '{}' of column '{}' is missing from the declared order {:?}",
                    observed, column, declared
                )));
            }
        }
        meta.level_orders.insert(column.to_string(), declared);
        Ok(meta)
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Number of columns (variables).
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Get a variable value for a specific sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// Metadata record of one sample.
    pub fn record(&self, sample_id: &str) -> Option<SampleRecord<'_>> {
        self.data
            .get_key_value(sample_id)
            .map(|(id, values)| SampleRecord {
                sample_id: id.as_str(),
                values,
            })
    }

    /// Get all values for a column.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.has_column(column) {
            return Err(EdaError::MissingColumn(column.to_string()));
        }
        Ok(self
            .sample_ids
            .iter()
            .map(|sid| {
                self.data
                    .get(sid)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Variable::Missing)
            })
            .collect())
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Whether the column carries a declared level order.
    pub fn is_ordered(&self, column: &str) -> bool {
        self.level_orders.contains_key(column)
    }

    /// Levels of a categorical column: the declared order for ordered
    /// factors, otherwise the observed levels sorted alphabetically.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        match self.level_orders.get(column) {
            Some(order) => {
                let observed = self.observed_levels(column)?;
                Ok(order
                    .iter()
                    .filter(|l| observed.contains(l))
                    .cloned()
                    .collect())
            }
            None => self.observed_levels(column),
        }
    }

    fn observed_levels(&self, column: &str) -> Result<Vec<String>> {
        let values = self.column(column)?;
        let mut levels: Vec<String> = values
            .iter()
            .filter_map(|v| v.as_categorical().map(String::from))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        levels.sort();
        Ok(levels)
    }

    /// Subset metadata to only include specified samples, in that order.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let mut new_data = HashMap::with_capacity(sample_ids.len());
        let mut new_sample_ids = Vec::with_capacity(sample_ids.len());

        for sid in sample_ids {
            let sample_data = self.data.get(sid).ok_or_else(|| {
                EdaError::SampleMismatch(format!("Sample '{}' not found in metadata", sid))
            })?;
            new_data.insert(sid.clone(), sample_data.clone());
            new_sample_ids.push(sid.clone());
        }

        Ok(Self {
            sample_ids: new_sample_ids,
            column_names: self.column_names.clone(),
            data: new_data,
            column_types: self.column_types.clone(),
            level_orders: self.level_orders.clone(),
        })
    }

    /// Align metadata to match the sample order in an abundance table.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        self.subset_samples(sample_ids)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

fn is_missing_literal(v: &str) -> bool {
    v.is_empty() || v == "NA" || v == "na" || v == "NaN"
}
