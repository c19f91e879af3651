// src/backend/mod.rs
//
// External collaborators behind strategy traits. The pipeline only sees the
// traits; which engine runs is decided once, from the configuration.

pub mod diamond;
pub mod hmmer;
pub mod krona;
pub mod pplacer;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::aggregate::ConsensusTable;
use crate::config::{AssignmentMethod, GraftConfig, SearchMethod};
use crate::error::{GraftError, Result};
use crate::placement::Jplace;
use crate::types::{AlignedFragment, HitInterval, Read, SequenceType};

/// Finds hit intervals on reads. Hits come back in read coordinates
/// whatever space the engine searched in.
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    fn search(&self, reads: &[Read], read_type: SequenceType, work_dir: &Path) -> Result<Vec<HitInterval>>;
}

/// Aligns named sequences to the package profile.
pub trait AlignBackend: Send + Sync {
    fn align(&self, sequences: &[(String, Vec<u8>)], work_dir: &Path) -> Result<Vec<AlignedFragment>>;
}

/// Assigns aligned fragments to taxa, as a placement file.
pub trait PlacementBackend: Send + Sync {
    fn place(&self, aligned: &[AlignedFragment], work_dir: &Path) -> Result<Jplace>;
}

/// Builds a secondary search profile from aligned fragments.
pub trait ProfileBuilder: Send + Sync {
    fn build(&self, aligned: &[AlignedFragment], profile_path: &Path) -> Result<Box<dyn SearchBackend>>;
}

/// Renders the combined table as a chart.
pub trait KronaRenderer: Send + Sync {
    fn render(&self, table: &ConsensusTable, output: &Path) -> Result<()>;
}

/// Two searches whose scores are compared read by read: the package's own
/// database and a database of look-alikes.
pub struct DecoyScreen {
    pub target: Box<dyn SearchBackend>,
    pub decoy: Box<dyn SearchBackend>,
}

/// The engines selected for one run.
pub struct Backends {
    pub search: Box<dyn SearchBackend>,
    pub decoy: Option<DecoyScreen>,
    /// Eukaryote profile search, scored on the same scale as `search`
    pub euk_check: Option<Box<dyn SearchBackend>>,
    pub align: Box<dyn AlignBackend>,
    pub place: Box<dyn PlacementBackend>,
    pub profile_builder: Option<Box<dyn ProfileBuilder>>,
    pub krona: Option<Box<dyn KronaRenderer>>,
}

impl Backends {
    /// Process-backed engines for a validated configuration.
    pub fn from_config(config: &GraftConfig) -> Result<Self> {
        let pkg = &config.package;
        let threads = config.threads.max(1);

        let search: Box<dyn SearchBackend> = match config.search_method {
            SearchMethod::Hmmsearch => Box::new(hmmer::HmmerSearch::new(
                pkg.search_hmms.clone(),
                pkg.sequence_type,
                config.evalue,
                threads,
            )),
            SearchMethod::Diamond => Box::new(diamond::DiamondSearch::new(
                required(&pkg.diamond_database, "diamond database")?,
                config.evalue,
                threads,
            )),
        };

        let decoy = match &config.decoy_database {
            Some(db) => Some(DecoyScreen {
                target: Box::new(diamond::DiamondSearch::new(
                    required(&pkg.diamond_database, "diamond database")?,
                    config.evalue,
                    threads,
                )
                .with_label("decoy_target")),
                decoy: Box::new(diamond::DiamondSearch::new(db.clone(), config.evalue, threads).with_label("decoy")),
            }),
            None => None,
        };

        let euk_check = config.euk_hmm.as_ref().map(|hmm| {
            Box::new(
                hmmer::HmmerSearch::new(vec![hmm.clone()], SequenceType::Nucleotide, config.evalue, threads)
                    .with_label("euk_check"),
            ) as Box<dyn SearchBackend>
        });

        let align = Box::new(hmmer::HmmAlign::new(
            pkg.alignment_profile()?.to_path_buf(),
            pkg.sequence_type,
        ));

        let place: Box<dyn PlacementBackend> = match config.assignment_method {
            AssignmentMethod::Pplacer => Box::new(pplacer::Pplacer::new(
                pkg.refpkg.clone().unwrap_or_default(),
                threads,
            )),
            AssignmentMethod::Diamond => Box::new(diamond::DiamondAssign::new(
                required(&pkg.diamond_database, "diamond database")?,
                threads,
            )),
        };

        let profile_builder = config.expand_search_contigs.as_ref().map(|_| {
            Box::new(hmmer::HmmBuild::new(pkg.sequence_type, config.evalue, threads))
                as Box<dyn ProfileBuilder>
        });

        Ok(Backends {
            search,
            decoy,
            euk_check,
            align,
            place,
            profile_builder,
            krona: Some(Box::new(krona::KtImportText::default())),
        })
    }
}

fn required(path: &Option<PathBuf>, what: &str) -> Result<PathBuf> {
    path.clone()
        .ok_or_else(|| GraftError::Config(format!("package has no {what}")))
}

/// Runs a command to completion. A non-zero exit becomes
/// [`GraftError::ExternalTool`] carrying the tool's status and stderr.
pub(crate) fn run_command(cmd: &mut Command, tool: &str) -> Result<Output> {
    log::debug!("Running {:?}", cmd);
    let output = cmd.output().map_err(|e| GraftError::ExternalTool {
        tool: tool.to_string(),
        status: None,
        stderr: format!("could not start: {e}"),
    })?;
    if !output.status.success() {
        return Err(GraftError::ExternalTool {
            tool: tool.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Writes reads as FASTA for an engine.
pub(crate) fn write_reads(reads: &[Read], path: &Path) -> Result<()> {
    crate::seqio::write_fasta(path, reads.iter().map(|r| (r.id.as_str(), r.seq.as_slice())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_tools_keep_their_exit_status() {
        let err = run_command(Command::new("sh").args(["-c", "echo boom >&2; exit 3"]), "sh")
            .unwrap_err();
        match &err {
            GraftError::ExternalTool { status, stderr, .. } => {
                assert_eq!(*status, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn missing_tools_are_external_failures() {
        let err = run_command(&mut Command::new("definitely-not-installed-graftm-tool"), "x")
            .unwrap_err();
        assert!(matches!(err, GraftError::ExternalTool { status: None, .. }));
        assert_eq!(err.exit_code(), 1);
    }
}
