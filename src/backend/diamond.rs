// src/backend/diamond.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;

use indexmap::IndexMap;

use super::{run_command, write_reads, PlacementBackend, SearchBackend};
use crate::error::{GraftError, Result};
use crate::hit_table::parse_blast_tabular;
use crate::placement::{Candidate, Jplace, Placement, TIE_EPSILON};
use crate::seqio::write_fasta;
use crate::types::{AlignedFragment, HitInterval, Read, SequenceType};

const OUTFMT: [&str; 13] = [
    "6", "qseqid", "sseqid", "pident", "length", "mismatch", "gapopen", "qstart", "qend", "sstart",
    "send", "evalue", "bitscore",
];

fn diamond_command(mode: &str, db: &Path, query: &Path, out: &Path, threads: usize) -> Command {
    let mut cmd = Command::new("diamond");
    cmd.arg(mode)
        .arg("--db")
        .arg(db)
        .arg("--query")
        .arg(query)
        .arg("--out")
        .arg(out)
        .arg("--threads")
        .arg(threads.to_string())
        .arg("--outfmt")
        .args(OUTFMT);
    cmd
}

/// Similarity search against a protein database: `blastx` for nucleotide
/// reads, `blastp` for protein reads. Also used for decoy databases.
pub struct DiamondSearch {
    database: PathBuf,
    evalue: f64,
    threads: usize,
    label: Option<String>,
}

impl DiamondSearch {
    pub fn new(database: PathBuf, evalue: f64, threads: usize) -> Self {
        DiamondSearch {
            database,
            evalue,
            threads,
            label: None,
        }
    }

    /// Names this search's files instead of the database stem.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    fn file_prefix(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => {
                let stem = self
                    .database
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "db".to_string());
                format!("diamond_{stem}")
            }
        }
    }
}

impl SearchBackend for DiamondSearch {
    fn name(&self) -> &str {
        "diamond"
    }

    fn search(&self, reads: &[Read], read_type: SequenceType, work_dir: &Path) -> Result<Vec<HitInterval>> {
        let prefix = self.file_prefix();
        let query = work_dir.join(format!("{prefix}_input.fa"));
        let out = work_dir.join(format!("{prefix}.tsv"));
        write_reads(reads, &query)?;
        let mode = match read_type {
            SequenceType::Nucleotide => "blastx",
            SequenceType::Protein => "blastp",
        };
        let mut cmd = diamond_command(mode, &self.database, &query, &out, self.threads);
        cmd.arg("--evalue").arg(self.evalue.to_string());
        run_command(&mut cmd, "diamond")?;
        parse_blast_tabular(BufReader::new(File::open(&out)?))
    }
}

/// Assignment by best similarity hit. Every subject tied at a query's top
/// bitscore is a candidate with equal weight.
pub struct DiamondAssign {
    database: PathBuf,
    threads: usize,
}

impl DiamondAssign {
    pub fn new(database: PathBuf, threads: usize) -> Self {
        DiamondAssign { database, threads }
    }
}

impl PlacementBackend for DiamondAssign {
    fn place(&self, aligned: &[AlignedFragment], work_dir: &Path) -> Result<Jplace> {
        let query = work_dir.join("assign_input.faa");
        let out = work_dir.join("diamond_assignment.tsv");
        write_fasta(
            &query,
            aligned.iter().map(|a| {
                let residues: Vec<u8> = a.aligned.iter().copied().filter(|&c| c != b'-').collect();
                (a.name.as_str(), residues)
            }),
        )?;
        let mut cmd = diamond_command("blastp", &self.database, &query, &out, self.threads);
        cmd.arg("--max-target-seqs").arg("0");
        run_command(&mut cmd, "diamond")?;
        let placements = top_hit_placements(BufReader::new(File::open(&out)?))?;
        Ok(Jplace {
            placements,
            ..Jplace::default()
        })
    }
}

/// Groups `outfmt 6` rows by query and keeps the subjects tied at the best
/// bitscore, in order of first appearance.
pub fn top_hit_placements<R: BufRead>(reader: R) -> Result<Vec<Placement>> {
    let mut best: IndexMap<String, (f64, Vec<String>)> = IndexMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            return Err(GraftError::parse("DIAMOND tabular", idx + 1, "fewer than 12 fields"));
        }
        let bitscore: f64 = fields[11]
            .parse()
            .map_err(|_| GraftError::parse("DIAMOND tabular", idx + 1, "invalid bitscore"))?;
        let entry = best
            .entry(fields[0].to_string())
            .or_insert((f64::NEG_INFINITY, Vec::new()));
        if bitscore - entry.0 > TIE_EPSILON {
            *entry = (bitscore, vec![fields[1].to_string()]);
        } else if (bitscore - entry.0).abs() <= TIE_EPSILON && !entry.1.iter().any(|s| s == fields[1]) {
            entry.1.push(fields[1].to_string());
        }
    }
    Ok(best
        .into_iter()
        .map(|(query, (_, subjects))| Placement {
            candidates: subjects.iter().map(|s| Candidate::new(s, 1.0)).collect(),
            names: vec![(query, 1.0)],
        })
        .collect())
}
