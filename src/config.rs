//src/config.rs

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{GraftError, Result};
use crate::extract::{DEFAULT_MERGE_DISTANCE, DEFAULT_MIN_ORF_LENGTH};
use crate::hit_table::DEFAULT_EVALUE;
use crate::types::SequenceType;

/// Above this many samples the krona chart is skipped.
pub const DEFAULT_MAX_SAMPLES_FOR_KRONA: usize = 100;

/// Manifest file inside a package directory.
pub const PACKAGE_CONTENTS: &str = "CONTENTS.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMethod {
    /// Profile search: hmmsearch, or nhmmer for nucleotide packages.
    #[default]
    Hmmsearch,
    Diamond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentMethod {
    /// Phylogenetic placement into the package tree.
    #[default]
    Pplacer,
    /// Best similarity hit against the package sequences.
    Diamond,
}

/// What a failing sample does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    AbortRun,
    SkipSample,
}

/// The resolved reference: profiles, databases and taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePackage {
    pub search_hmms: Vec<PathBuf>,
    pub aln_hmm: Option<PathBuf>,
    pub taxonomy: Option<PathBuf>,
    /// Placement reference directory (tree, alignment).
    pub refpkg: Option<PathBuf>,
    pub diamond_database: Option<PathBuf>,
    pub sequence_type: SequenceType,
}

impl ReferencePackage {
    /// Profile that aligns fragments: the explicit alignment profile, or
    /// the only search profile.
    pub fn alignment_profile(&self) -> Result<&Path> {
        match (&self.aln_hmm, self.search_hmms.as_slice()) {
            (Some(aln), _) => Ok(aln.as_path()),
            (None, [only]) => Ok(only.as_path()),
            (None, []) => Err(GraftError::Config(
                "package has no profile to align against".to_string(),
            )),
            (None, many) => Err(GraftError::AmbiguousAlignmentProfile { count: many.len() }),
        }
    }

    /// Loads a package directory described by `CONTENTS.json`. Relative
    /// paths are resolved against the package directory.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let contents: PackageContents =
            serde_json::from_reader(BufReader::new(File::open(dir.join(PACKAGE_CONTENTS))?))?;
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { dir.join(p) };

        let search_hmms: Vec<PathBuf> = contents.search_hmms.into_iter().map(resolve).collect();
        let aln_hmm = contents.aln_hmm.map(resolve);
        let sequence_type = match contents.sequence_type.as_deref() {
            Some(t) => parse_sequence_type(t)?,
            None => {
                let profile = aln_hmm.as_ref().or(search_hmms.first()).ok_or_else(|| {
                    GraftError::Config(format!("package {} lists no profiles", dir.display()))
                })?;
                hmm_alphabet(profile)?
            }
        };

        Ok(ReferencePackage {
            search_hmms,
            aln_hmm,
            taxonomy: contents.taxonomy.map(resolve),
            refpkg: contents.reference_package.map(resolve),
            diamond_database: contents.diamond_database.map(resolve),
            sequence_type,
        })
    }
}

#[derive(Deserialize)]
struct PackageContents {
    #[serde(default)]
    search_hmms: Vec<PathBuf>,
    aln_hmm: Option<PathBuf>,
    taxonomy: Option<PathBuf>,
    reference_package: Option<PathBuf>,
    diamond_database: Option<PathBuf>,
    sequence_type: Option<String>,
}

pub fn parse_sequence_type(s: &str) -> Result<SequenceType> {
    match s.to_ascii_lowercase().as_str() {
        "nucleotide" | "dna" | "rna" => Ok(SequenceType::Nucleotide),
        "aminoacid" | "amino" | "protein" => Ok(SequenceType::Protein),
        other => Err(GraftError::Config(format!("unknown sequence type '{other}'"))),
    }
}

/// Alphabet declared by the `ALPH` line of an HMMER profile.
pub fn hmm_alphabet<P: AsRef<Path>>(path: P) -> Result<SequenceType> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    for line in reader.lines() {
        let line = line?;
        if let Some(alph) = line.strip_prefix("ALPH") {
            return parse_sequence_type(alph.trim());
        }
        if line.starts_with("HMM ") {
            break;
        }
    }
    Err(GraftError::Config(format!(
        "profile {} declares no alphabet",
        path.as_ref().display()
    )))
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct GraftConfig {
    pub forward: Vec<PathBuf>,
    pub reverse: Vec<PathBuf>,
    pub interleaved: Vec<PathBuf>,
    pub package: ReferencePackage,
    pub output_directory: PathBuf,
    pub force: bool,
    pub input_sequence_type: Option<SequenceType>,
    pub search_method: SearchMethod,
    pub assignment_method: AssignmentMethod,
    pub evalue: f64,
    pub min_orf_length: usize,
    pub restrict_read_length: Option<usize>,
    pub merge_distance: usize,
    pub min_fragment_length: usize,
    pub filter_minimum: Option<usize>,
    pub decoy_database: Option<PathBuf>,
    /// Nucleotide profile of eukaryotic sequences; reads scoring higher
    /// against it than against the package are dropped
    pub euk_hmm: Option<PathBuf>,
    pub search_and_align_only: bool,
    pub expand_search_contigs: Option<PathBuf>,
    pub max_samples_for_krona: usize,
    pub failure_policy: FailurePolicy,
    pub threads: usize,
}

impl GraftConfig {
    pub fn new(package: ReferencePackage, output_directory: PathBuf) -> Self {
        GraftConfig {
            forward: Vec::new(),
            reverse: Vec::new(),
            interleaved: Vec::new(),
            package,
            output_directory,
            force: false,
            input_sequence_type: None,
            search_method: SearchMethod::default(),
            assignment_method: AssignmentMethod::default(),
            evalue: DEFAULT_EVALUE,
            min_orf_length: DEFAULT_MIN_ORF_LENGTH,
            restrict_read_length: None,
            merge_distance: DEFAULT_MERGE_DISTANCE,
            min_fragment_length: 0,
            filter_minimum: None,
            decoy_database: None,
            euk_hmm: None,
            search_and_align_only: false,
            expand_search_contigs: None,
            max_samples_for_krona: DEFAULT_MAX_SAMPLES_FOR_KRONA,
            failure_policy: FailurePolicy::default(),
            threads: 1,
        }
    }

    /// Checks everything that can be checked before reading any input:
    /// inputs, profile ambiguity, method/package compatibility and the
    /// output directory.
    pub fn validate(&self) -> Result<()> {
        if self.forward.is_empty() && self.interleaved.is_empty() {
            return Err(GraftError::Config(
                "no input given, use --forward or --interleaved".to_string(),
            ));
        }
        if !self.reverse.is_empty() && self.reverse.len() != self.forward.len() {
            return Err(GraftError::Config(format!(
                "{} forward files but {} reverse files",
                self.forward.len(),
                self.reverse.len()
            )));
        }

        match self.search_method {
            SearchMethod::Hmmsearch => {
                if self.package.search_hmms.is_empty() {
                    return Err(GraftError::Config(
                        "hmmsearch needs at least one search profile".to_string(),
                    ));
                }
                self.package.alignment_profile()?;
            }
            SearchMethod::Diamond => {
                if self.package.diamond_database.is_none() {
                    return Err(GraftError::Config(
                        "diamond search needs a diamond database in the package".to_string(),
                    ));
                }
                self.package.alignment_profile()?;
            }
        }

        if !self.search_and_align_only {
            match self.assignment_method {
                AssignmentMethod::Pplacer if self.package.refpkg.is_none() => {
                    return Err(GraftError::Config(
                        "pplacer assignment needs a reference package".to_string(),
                    ))
                }
                AssignmentMethod::Diamond if self.package.diamond_database.is_none() => {
                    return Err(GraftError::Config(
                        "diamond assignment needs a diamond database in the package".to_string(),
                    ))
                }
                _ => {}
            }
            if self.package.taxonomy.is_none() {
                return Err(GraftError::Config("package has no taxonomy".to_string()));
            }
        }

        let uses_diamond = self.search_method == SearchMethod::Diamond
            || (!self.search_and_align_only && self.assignment_method == AssignmentMethod::Diamond);
        if uses_diamond && self.package.sequence_type == SequenceType::Nucleotide {
            return Err(GraftError::Config(
                "diamond works with protein packages only".to_string(),
            ));
        }
        if self.decoy_database.is_some() && self.package.diamond_database.is_none() {
            return Err(GraftError::Config(
                "--decoy_database needs a diamond database in the package to compare against".to_string(),
            ));
        }
        if self.euk_hmm.is_some()
            && (self.search_method != SearchMethod::Hmmsearch
                || self.package.sequence_type != SequenceType::Nucleotide)
        {
            return Err(GraftError::Config(
                "--euk_check works with hmmsearch on nucleotide packages only".to_string(),
            ));
        }
        if self.expand_search_contigs.is_some() && self.search_method != SearchMethod::Hmmsearch {
            return Err(GraftError::Config(
                "--expand_search_contigs requires the hmmsearch search method".to_string(),
            ));
        }
        if self.input_sequence_type == Some(SequenceType::Protein)
            && self.package.sequence_type == SequenceType::Nucleotide
        {
            return Err(GraftError::Config(
                "protein reads cannot be searched against a nucleotide package".to_string(),
            ));
        }
        if self.min_orf_length == 0 {
            return Err(GraftError::Config("--min_orf_length must be positive".to_string()));
        }
        if self.output_directory.exists() && !self.force {
            return Err(GraftError::OutputExists(self.output_directory.clone()));
        }
        Ok(())
    }

    /// Creates the output directory, clearing it first under `--force`.
    pub fn prepare_output_directory(&self) -> Result<()> {
        if self.output_directory.exists() {
            if !self.force {
                return Err(GraftError::OutputExists(self.output_directory.clone()));
            }
            log::warn!("Deleting previous directory {}", self.output_directory.display());
            fs::remove_dir_all(&self.output_directory)?;
        }
        fs::create_dir_all(&self.output_directory)?;
        Ok(())
    }
}
