// src/backend/krona.rs

use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;
use std::process::Command;

use super::{run_command, KronaRenderer};
use crate::aggregate::ConsensusTable;
use crate::error::Result;

/// `ktImportText`, fed one text file per sample.
#[derive(Debug, Default)]
pub struct KtImportText;

/// Krona text input for one sample column: `count<TAB>rank<TAB>rank...`.
pub fn krona_text(table: &ConsensusTable, column: usize) -> String {
    let mut out = String::new();
    for row in &table.rows {
        let count = row.counts.get(column).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let _ = write!(out, "{count}\tRoot");
        for rank in &row.lineage.0 {
            let _ = write!(out, "\t{rank}");
        }
        out.push('\n');
    }
    out
}

impl KronaRenderer for KtImportText {
    fn render(&self, table: &ConsensusTable, output: &Path) -> Result<()> {
        let work_dir = output.with_extension("krona_input");
        fs::create_dir_all(&work_dir)?;
        let mut cmd = Command::new("ktImportText");
        cmd.arg("-o").arg(output);
        for (i, sample) in table.samples.iter().enumerate() {
            let path = work_dir.join(format!("{sample}.txt"));
            fs::write(&path, krona_text(table, i))?;
            cmd.arg(format!("{},{}", path.display(), sample));
        }
        run_command(&mut cmd, "ktImportText")?;
        Ok(())
    }
}
