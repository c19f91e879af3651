// src/backend/pplacer.rs

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{run_command, PlacementBackend};
use crate::error::Result;
use crate::placement::{read_jplace_file, Jplace};
use crate::seqio::write_fasta;
use crate::types::AlignedFragment;

/// Phylogenetic placement with `pplacer` into a reference package whose
/// taxonomy labels each placement with a classification.
pub struct Pplacer {
    refpkg: PathBuf,
    threads: usize,
}

impl Pplacer {
    pub fn new(refpkg: PathBuf, threads: usize) -> Self {
        Pplacer { refpkg, threads }
    }
}

impl PlacementBackend for Pplacer {
    fn place(&self, aligned: &[AlignedFragment], work_dir: &Path) -> Result<Jplace> {
        if aligned.is_empty() {
            return Ok(Jplace::default());
        }
        let input = work_dir.join("placement_input.aln.fa");
        let output = work_dir.join("pplacer.jplace");
        write_fasta(&input, aligned.iter().map(|a| (a.name.as_str(), a.aligned.as_slice())))?;
        run_command(
            Command::new("pplacer")
                .arg("-c")
                .arg(&self.refpkg)
                .arg("-j")
                .arg(self.threads.to_string())
                .arg("-o")
                .arg(&output)
                .arg(&input),
            "pplacer",
        )?;
        read_jplace_file(&output)
    }
}
