//! Sequencing depth (reads per sample) profile.

use crate::data::AbundanceTable;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Distribution of sample depths, used to pick a minimum-depth threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthProfile {
    pub sample_ids: Vec<String>,
    /// Total counts per sample, in table order.
    pub depths: Vec<u64>,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: u64,
    pub max: u64,
    /// Coefficient of variation (std_dev / mean).
    pub cv: f64,
}

impl DepthProfile {
    /// Samples with depth strictly below `threshold`, i.e. those a
    /// minimum-depth filter at `threshold` would drop.
    pub fn samples_below(&self, threshold: u64) -> Vec<&str> {
        self.sample_ids
            .iter()
            .zip(&self.depths)
            .filter(|(_, &d)| d < threshold)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Depth at quantile `q` (nearest rank, `q` clamped to [0, 1]).
    pub fn quantile(&self, q: f64) -> u64 {
        if self.depths.is_empty() {
            return 0;
        }
        let mut sorted = self.depths.clone();
        sorted.sort_unstable();
        let rank = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank]
    }

    /// Write sample_id / depth pairs sorted by increasing depth.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut order: Vec<usize> = (0..self.depths.len()).collect();
        order.sort_by_key(|&i| self.depths[i]);

        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "sample_id\tdepth")?;
        for i in order {
            writeln!(writer, "{}\t{}", self.sample_ids[i], self.depths[i])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Display for DepthProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Depth Profile")?;
        writeln!(f, "  Samples: {}", self.depths.len())?;
        writeln!(f, "  Mean:    {:.0}", self.mean)?;
        writeln!(f, "  Median:  {:.0}", self.median)?;
        writeln!(f, "  Std Dev: {:.0}", self.std_dev)?;
        writeln!(f, "  Min:     {}", self.min)?;
        writeln!(f, "  Max:     {}", self.max)?;
        writeln!(f, "  CV:      {:.2}", self.cv)?;
        Ok(())
    }
}

/// Profile the per-sample depths of a table.
pub fn profile_depth(table: &AbundanceTable) -> DepthProfile {
    let depths = table.sample_sums();
    let n = depths.len();

    if n == 0 {
        return DepthProfile {
            sample_ids: Vec::new(),
            depths,
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
            min: 0,
            max: 0,
            cv: 0.0,
        };
    }

    let mean = depths.iter().sum::<u64>() as f64 / n as f64;
    let variance = depths
        .iter()
        .map(|&x| (x as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    let std_dev = variance.sqrt();

    let mut sorted = depths.clone();
    sorted.sort_unstable();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    } else {
        sorted[n / 2] as f64
    };

    DepthProfile {
        sample_ids: table.sample_ids().to_vec(),
        min: sorted[0],
        max: sorted[n - 1],
        depths,
        mean,
        median,
        std_dev,
        cv: if mean > 0.0 { std_dev / mean } else { 0.0 },
    }
}
