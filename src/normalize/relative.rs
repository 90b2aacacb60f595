//! Relative and proportional abundance (total sum scaling).

use super::{NormalizedTable, Transform};
use crate::data::AbundanceTable;
use crate::error::{EdaError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Convert counts to relative abundances.
///
/// # Formula
/// For sample i: rel(x_ij) = x_ij / sum_j(x_ij)
///
/// # Errors
/// `DivideByZero` naming the first sample with zero depth.
pub fn relative_abundance(table: &AbundanceTable) -> Result<NormalizedTable> {
    let depths = checked_depths(table)?;
    let data = scale_rows(table, &depths, 1.0);
    Ok(NormalizedTable::from_table(table, data, Transform::Relative))
}

/// Convert counts to proportions scaled to the smallest sample depth.
///
/// # Formula
/// For sample i: prop(x_ij) = x_ij / sum_j(x_ij) * min_k(depth_k)
///
/// # Errors
/// `DivideByZero` naming the first sample with zero depth.
pub fn proportional_abundance(table: &AbundanceTable) -> Result<NormalizedTable> {
    let depths = checked_depths(table)?;
    let target_depth = depths.iter().copied().min().unwrap_or(0);
    let data = scale_rows(table, &depths, target_depth as f64);
    Ok(NormalizedTable::from_table(
        table,
        data,
        Transform::Proportional { target_depth },
    ))
}

fn checked_depths(table: &AbundanceTable) -> Result<Vec<u64>> {
    if table.n_samples() == 0 || table.n_taxa() == 0 {
        return Err(EdaError::EmptyData(
            "Cannot normalize an empty table".to_string(),
        ));
    }
    let depths = table.sample_sums();
    if let Some(idx) = depths.iter().position(|&d| d == 0) {
        return Err(EdaError::DivideByZero {
            sample: table.sample_ids()[idx].clone(),
        });
    }
    Ok(depths)
}

fn scale_rows(table: &AbundanceTable, depths: &[u64], scale: f64) -> DMatrix<f64> {
    let rows: Vec<Vec<(usize, f64)>> = (0..table.n_samples())
        .into_par_iter()
        .map(|i| {
            let depth = depths[i] as f64;
            table
                .counts()
                .outer_view(i)
                .map(|row| {
                    row.iter()
                        .map(|(j, &v)| (j, v as f64 / depth * scale))
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();

    let mut data = DMatrix::zeros(table.n_samples(), table.n_taxa());
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row {
            data[(i, j)] = v;
        }
    }
    data
}
