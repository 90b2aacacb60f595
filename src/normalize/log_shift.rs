//! Log transform with a unit shift, `ln(1 + x)`.

use super::{NormalizedTable, Transform};
use crate::data::AbundanceTable;
use crate::error::{EdaError, Result};
use nalgebra::DMatrix;

/// `ln(1 + count)` for every cell of a count table.
pub fn log_shift(table: &AbundanceTable) -> Result<NormalizedTable> {
    if table.n_samples() == 0 || table.n_taxa() == 0 {
        return Err(EdaError::EmptyData(
            "Cannot transform an empty table".to_string(),
        ));
    }
    let mut data = DMatrix::zeros(table.n_samples(), table.n_taxa());
    for (i, row) in table.counts().outer_iterator().enumerate() {
        for (j, &v) in row.iter() {
            data[(i, j)] = (v as f64).ln_1p();
        }
    }
    Ok(NormalizedTable::from_table(table, data, Transform::LogShift))
}

impl NormalizedTable {
    /// `ln(1 + x)` applied on top of the current values, e.g. after
    /// proportional scaling.
    pub fn log_shift(&self) -> Result<NormalizedTable> {
        if let Some((idx, _)) = self.matrix().iter().enumerate().find(|(_, &v)| v < 0.0) {
            let sample = idx % self.n_samples();
            return Err(EdaError::Numerical(format!(
                "log shift of a negative value in sample '{}'",
                self.sample_ids()[sample]
            )));
        }
        Ok(self.map(Transform::LogShift, f64::ln_1p))
    }
}
