//src/aggregate.rs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;

use crate::error::Result;
use crate::rollup::LineageCounts;
use crate::taxonomy::Lineage;

/// File name of the combined table inside the output directory.
pub const COMBINED_COUNT_TABLE: &str = "combined_count_table.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusRow {
    /// 1-based, assigned once in first-appearance order.
    pub id: usize,
    /// One count per sample, in sample order.
    pub counts: Vec<u64>,
    pub lineage: Lineage,
}

/// Counts of every sample merged on exact lineage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusTable {
    pub samples: Vec<String>,
    pub rows: Vec<ConsensusRow>,
}

impl ConsensusTable {
    /// Merges per-sample counts. Rows are numbered as lineages are first
    /// seen scanning samples in the order given, so ids are only stable
    /// for a stable sample order.
    pub fn aggregate(per_sample: &[LineageCounts]) -> Self {
        let mut rows: IndexMap<&Lineage, Vec<u64>> = IndexMap::new();
        let n = per_sample.len();
        for (col, sample) in per_sample.iter().enumerate() {
            for (lineage, &count) in &sample.counts {
                rows.entry(lineage).or_insert_with(|| vec![0; n])[col] += count;
            }
        }

        ConsensusTable {
            samples: per_sample.iter().map(|s| s.sample.clone()).collect(),
            rows: rows
                .into_iter()
                .enumerate()
                .map(|(i, (lineage, counts))| ConsensusRow {
                    id: i + 1,
                    counts,
                    lineage: lineage.clone(),
                })
                .collect(),
        }
    }

    pub fn row_for(&self, lineage: &Lineage) -> Option<&ConsensusRow> {
        self.rows.iter().find(|r| &r.lineage == lineage)
    }

    /// Tab-separated table with a `#ID` header.
    pub fn write_tsv<W: Write>(&self, mut out: W) -> Result<()> {
        write!(out, "#ID")?;
        for sample in &self.samples {
            write!(out, "\t{sample}")?;
        }
        writeln!(out, "\tConsensusLineage")?;
        for row in &self.rows {
            write!(out, "{}", row.id)?;
            for count in &row.counts {
                write!(out, "\t{count}")?;
            }
            writeln!(out, "\t{}", row.lineage)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_tsv_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_tsv(BufWriter::new(File::create(path)?))
    }

    /// Table text, the same bytes `write_tsv` produces.
    pub fn to_tsv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_tsv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
