//! Taxonomic lineage per taxon (Kingdom through Species).

use crate::error::{EdaError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Conventional rank names used when a taxonomy table has no header ranks.
pub const DEFAULT_RANKS: [&str; 7] = [
    "Kingdom", "Phylum", "Class", "Order", "Family", "Genus", "Species",
];

/// Lineage labels of one taxon, one optional label per rank.
pub type Lineage = Vec<Option<String>>;

/// Read-only view of one taxon's lineage, handed to lineage predicates.
#[derive(Debug, Clone, Copy)]
pub struct LineageRecord<'a> {
    taxon_id: &'a str,
    ranks: &'a [String],
    labels: &'a [Option<String>],
}

impl<'a> LineageRecord<'a> {
    /// Taxon identifier.
    pub fn taxon_id(&self) -> &'a str {
        self.taxon_id
    }

    /// Label at a named rank (case-insensitive rank lookup). `None` when the
    /// rank is unknown or the taxon is unassigned at that rank.
    pub fn rank(&self, name: &str) -> Option<&'a str> {
        self.ranks
            .iter()
            .position(|r| r.eq_ignore_ascii_case(name))
            .and_then(|idx| self.labels.get(idx))
            .and_then(|l| l.as_deref())
    }

    /// All labels in rank order.
    pub fn labels(&self) -> &'a [Option<String>] {
        self.labels
    }

    /// Deepest assigned label, if any.
    pub fn deepest(&self) -> Option<&'a str> {
        self.labels.iter().rev().find_map(|l| l.as_deref())
    }
}

/// Rank names plus a lineage for every taxon, in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct Taxonomy {
    ranks: Vec<String>,
    taxon_ids: Vec<String>,
    lineages: HashMap<String, Lineage>,
}

impl Taxonomy {
    /// Create an empty taxonomy over the given ranks.
    pub fn new(ranks: Vec<String>) -> Self {
        Self {
            ranks,
            taxon_ids: Vec::new(),
            lineages: HashMap::new(),
        }
    }

    /// Create an empty taxonomy over [`DEFAULT_RANKS`].
    pub fn with_default_ranks() -> Self {
        Self::new(DEFAULT_RANKS.iter().map(|s| s.to_string()).collect())
    }

    /// Add a taxon. Labels beyond the number of ranks are rejected; missing
    /// trailing labels are unassigned.
    pub fn insert(&mut self, taxon_id: &str, labels: &[&str]) -> Result<()> {
        if labels.len() > self.ranks.len() {
            return Err(EdaError::DimensionMismatch {
                expected: self.ranks.len(),
                actual: labels.len(),
            });
        }
        if self.lineages.contains_key(taxon_id) {
            return Err(EdaError::DuplicateId(taxon_id.to_string()));
        }
        let mut lineage: Lineage = labels.iter().map(|l| clean_label(l)).collect();
        lineage.resize(self.ranks.len(), None);
        self.taxon_ids.push(taxon_id.to_string());
        self.lineages.insert(taxon_id.to_string(), lineage);
        Ok(())
    }

    /// Load a taxonomy from a TSV file.
    ///
    /// Expected format:
    /// - First row: taxon ID header followed by rank names
    /// - Subsequent rows: taxon ID followed by one label per rank
    ///
    /// Empty, `NA`, `Unassigned` and bare prefix labels (`g__`) are treated
    /// as unassigned; `k__Bacteria` style prefixes are stripped.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parse a taxonomy from any buffered TSV source.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines();
        let header_line = lines
            .next()
            .ok_or_else(|| EdaError::EmptyData("Empty taxonomy file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(EdaError::EmptyData(
                "Taxonomy must have at least one rank column".to_string(),
            ));
        }
        let ranks: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
        let mut taxonomy = Self::new(ranks);

        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let taxon_id = fields[0].trim();
            let labels: Vec<&str> = fields[1..].iter().map(|s| s.trim()).collect();
            taxonomy.insert(taxon_id, &labels)?;
        }

        Ok(taxonomy)
    }

    /// Write the taxonomy to a TSV file (unassigned labels as `NA`).
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write!(writer, "taxon_id")?;
        for rank in &self.ranks {
            write!(writer, "\t{}", rank)?;
        }
        writeln!(writer)?;

        for taxon_id in &self.taxon_ids {
            write!(writer, "{}", taxon_id)?;
            if let Some(lineage) = self.lineages.get(taxon_id) {
                for label in lineage {
                    write!(writer, "\t{}", label.as_deref().unwrap_or("NA"))?;
                }
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Rank names in order.
    #[inline]
    pub fn ranks(&self) -> &[String] {
        &self.ranks
    }

    /// Taxon IDs in order.
    #[inline]
    pub fn taxon_ids(&self) -> &[String] {
        &self.taxon_ids
    }

    /// Number of taxa.
    #[inline]
    pub fn n_taxa(&self) -> usize {
        self.taxon_ids.len()
    }

    /// Position of a rank (case-insensitive).
    pub fn rank_index(&self, name: &str) -> Option<usize> {
        self.ranks.iter().position(|r| r.eq_ignore_ascii_case(name))
    }

    /// Lineage view of one taxon.
    pub fn lineage(&self, taxon_id: &str) -> Option<LineageRecord<'_>> {
        self.lineages
            .get_key_value(taxon_id)
            .map(|(id, labels)| LineageRecord {
                taxon_id: id.as_str(),
                ranks: &self.ranks,
                labels,
            })
    }

    /// Check if a taxon has a lineage.
    pub fn has_taxon(&self, taxon_id: &str) -> bool {
        self.lineages.contains_key(taxon_id)
    }

    /// Restrict and reorder the taxonomy to the given taxa.
    pub fn subset_taxa(&self, taxon_ids: &[String]) -> Result<Self> {
        let mut lineages = HashMap::with_capacity(taxon_ids.len());
        for tid in taxon_ids {
            let lineage = self.lineages.get(tid).ok_or_else(|| {
                EdaError::TaxonMismatch(format!("Taxon '{}' has no lineage in taxonomy", tid))
            })?;
            lineages.insert(tid.clone(), lineage.clone());
        }
        Ok(Self {
            ranks: self.ranks.clone(),
            taxon_ids: taxon_ids.to_vec(),
            lineages,
        })
    }

    /// Align the taxonomy to the taxon order of an abundance table.
    pub fn align_to(&self, taxon_ids: &[String]) -> Result<Self> {
        self.subset_taxa(taxon_ids)
    }
}

fn clean_label(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    // greengenes / SILVA rank prefixes, e.g. "g__Bacteroides"
    let stripped = match trimmed.find("__") {
        Some(pos) if pos <= 4 => &trimmed[pos + 2..],
        _ => trimmed,
    };
    let stripped = stripped.trim();
    if stripped.is_empty()
        || stripped.eq_ignore_ascii_case("NA")
        || stripped.eq_ignore_ascii_case("unassigned")
        || stripped.eq_ignore_ascii_case("unclassified")
    {
        None
    } else {
        Some(stripped.to_string())
    }
}
