// src/backend/hmmer.rs

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;

use ahash::AHashMap;

use super::{run_command, write_reads, AlignBackend, ProfileBuilder, SearchBackend};
use crate::error::{GraftError, Result};
use crate::hit_table::{domain_rows_to_hits, parse_domtblout, parse_nhmmer_tblout};
use crate::seqio::{read_sequences, write_fasta};
use crate::sequence::six_frame_translate;
use crate::types::{AlignedFragment, HitInterval, MateRole, Read, SequenceType};

/// Profile search with `hmmsearch`, or `nhmmer` for nucleotide profiles.
/// Nucleotide reads against protein profiles are six-frame translated first.
pub struct HmmerSearch {
    profiles: Vec<PathBuf>,
    package_type: SequenceType,
    evalue: f64,
    threads: usize,
    /// Prefix of the files written to the work directory
    label: String,
}

impl HmmerSearch {
    pub fn new(profiles: Vec<PathBuf>, package_type: SequenceType, evalue: f64, threads: usize) -> Self {
        HmmerSearch {
            profiles,
            package_type,
            evalue,
            threads,
            label: "search".to_string(),
        }
    }

    /// Names this search's files, so several searches can share a directory.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    fn work_file(&self, work_dir: &Path, suffix: &str) -> PathBuf {
        work_dir.join(format!("{}_{}", self.label, suffix))
    }

    fn nhmmer(&self, reads_path: &Path, profile: &Path, out: &Path) -> Result<Vec<HitInterval>> {
        run_command(
            Command::new("nhmmer")
                .arg("--tblout")
                .arg(out)
                .arg("--cpu")
                .arg(self.threads.to_string())
                .arg("-E")
                .arg(self.evalue.to_string())
                .arg("-o")
                .arg("/dev/null")
                .arg(profile)
                .arg(reads_path),
            "nhmmer",
        )?;
        parse_nhmmer_tblout(BufReader::new(File::open(out)?))
    }

    fn hmmsearch(
        &self,
        seqs_path: &Path,
        profile: &Path,
        out: &Path,
        read_lengths: &AHashMap<String, usize>,
    ) -> Result<Vec<HitInterval>> {
        run_command(
            Command::new("hmmsearch")
                .arg("--domtblout")
                .arg(out)
                .arg("--cpu")
                .arg(self.threads.to_string())
                .arg("-E")
                .arg(self.evalue.to_string())
                .arg("-o")
                .arg("/dev/null")
                .arg(profile)
                .arg(seqs_path),
            "hmmsearch",
        )?;
        let rows = parse_domtblout(BufReader::new(File::open(out)?))?;
        Ok(domain_rows_to_hits(rows, read_lengths))
    }
}

impl SearchBackend for HmmerSearch {
    fn name(&self) -> &str {
        match self.package_type {
            SequenceType::Nucleotide => "nhmmer",
            SequenceType::Protein => "hmmsearch",
        }
    }

    fn search(&self, reads: &[Read], read_type: SequenceType, work_dir: &Path) -> Result<Vec<HitInterval>> {
        let mut hits = Vec::new();
        match (self.package_type, read_type) {
            (SequenceType::Nucleotide, SequenceType::Nucleotide) => {
                let reads_path = self.work_file(work_dir, "input.fa");
                write_reads(reads, &reads_path)?;
                for (i, profile) in self.profiles.iter().enumerate() {
                    let out = self.work_file(work_dir, &format!("nhmmer_{}.tblout", i + 1));
                    hits.extend(self.nhmmer(&reads_path, profile, &out)?);
                }
            }
            (SequenceType::Protein, read_type) => {
                let seqs_path = self.work_file(work_dir, "input.faa");
                let read_lengths: AHashMap<String, usize> = match read_type {
                    SequenceType::Nucleotide => {
                        let frames = reads.iter().flat_map(six_frame_translate);
                        write_fasta(&seqs_path, frames)?;
                        reads.iter().map(|r| (r.id.clone(), r.len())).collect()
                    }
                    SequenceType::Protein => {
                        write_reads(reads, &seqs_path)?;
                        AHashMap::new()
                    }
                };
                for (i, profile) in self.profiles.iter().enumerate() {
                    let out = self.work_file(work_dir, &format!("hmmsearch_{}.domtblout", i + 1));
                    hits.extend(self.hmmsearch(&seqs_path, profile, &out, &read_lengths)?);
                }
            }
            (SequenceType::Nucleotide, SequenceType::Protein) => {
                return Err(GraftError::Config(
                    "protein reads cannot be searched against a nucleotide package".to_string(),
                ))
            }
        }
        log::debug!("{} reported {} hits", self.name(), hits.len());
        Ok(hits)
    }
}

/// `hmmalign` against one profile. Insert columns are dropped so every row
/// has the profile's width.
pub struct HmmAlign {
    profile: PathBuf,
    package_type: SequenceType,
}

impl HmmAlign {
    pub fn new(profile: PathBuf, package_type: SequenceType) -> Self {
        HmmAlign {
            profile,
            package_type,
        }
    }
}

impl AlignBackend for HmmAlign {
    fn align(&self, sequences: &[(String, Vec<u8>)], work_dir: &Path) -> Result<Vec<AlignedFragment>> {
        if sequences.is_empty() {
            return Ok(Vec::new());
        }
        let input = work_dir.join("align_input.fa");
        let output = work_dir.join("hmmalign.afa");
        write_fasta(&input, sequences.iter().map(|(n, s)| (n.as_str(), s.as_slice())))?;
        let alphabet = match self.package_type {
            SequenceType::Nucleotide => "--dna",
            SequenceType::Protein => "--amino",
        };
        run_command(
            Command::new("hmmalign")
                .arg("--trim")
                .arg(alphabet)
                .arg("--outformat")
                .arg("afa")
                .arg("-o")
                .arg(&output)
                .arg(&self.profile)
                .arg(&input),
            "hmmalign",
        )?;
        parse_aligned_fasta(&output)
    }
}

/// Reads an aligned FASTA written by an aligner, keeping match columns.
pub fn parse_aligned_fasta(path: &Path) -> Result<Vec<AlignedFragment>> {
    Ok(read_sequences(path, MateRole::Single)?
        .iter()
        .map(|r| AlignedFragment::from_aligner_row(&r.id, &r.seq))
        .collect())
}

/// `hmmbuild` over aligned fragments, for expanded searches.
pub struct HmmBuild {
    package_type: SequenceType,
    evalue: f64,
    threads: usize,
}

impl HmmBuild {
    pub fn new(package_type: SequenceType, evalue: f64, threads: usize) -> Self {
        HmmBuild {
            package_type,
            evalue,
            threads,
        }
    }
}

impl ProfileBuilder for HmmBuild {
    fn build(&self, aligned: &[AlignedFragment], profile_path: &Path) -> Result<Box<dyn SearchBackend>> {
        let aln_path = profile_path.with_extension("afa");
        write_fasta(&aln_path, aligned.iter().map(|a| (a.name.as_str(), a.aligned.as_slice())))?;
        let alphabet = match self.package_type {
            SequenceType::Nucleotide => "--dna",
            SequenceType::Protein => "--amino",
        };
        run_command(
            Command::new("hmmbuild")
                .arg(alphabet)
                .arg("--informat")
                .arg("afa")
                .arg("--cpu")
                .arg(self.threads.to_string())
                .arg(profile_path)
                .arg(&aln_path),
            "hmmbuild",
        )?;
        log::info!("Built expanded search profile {}", profile_path.display());
        Ok(Box::new(
            HmmerSearch::new(
                vec![profile_path.to_path_buf()],
                self.package_type,
                self.evalue,
                self.threads,
            )
            .with_label("expand_search"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn aligned_fasta_loses_insert_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aln.afa");
        fs::write(&path, ">r1_1_1_1\nMK..lV-\nQ*\n>r2_1_1_1\n--AA-aa-Q\n").unwrap();
        let aligned = parse_aligned_fasta(&path).unwrap();
        assert_eq!(aligned[0].aligned, b"MKV-Q*".to_vec());
        assert_eq!(aligned[1].aligned, b"--AA--Q".to_vec());
        assert_eq!(aligned[0].width(), aligned[1].width() - 1);
    }

    #[test]
    fn labelled_searches_write_separate_files() {
        let dir = Path::new("work");
        let primary = HmmerSearch::new(vec![PathBuf::from("mcrA.hmm")], SequenceType::Protein, 1e-5, 1);
        let expanded = HmmerSearch::new(vec![PathBuf::from("expand.hmm")], SequenceType::Protein, 1e-5, 1)
            .with_label("expand_search");
        assert_eq!(primary.work_file(dir, "input.faa"), dir.join("search_input.faa"));
        assert_eq!(
            expanded.work_file(dir, "hmmsearch_1.domtblout"),
            dir.join("expand_search_hmmsearch_1.domtblout")
        );
        assert_ne!(
            primary.work_file(dir, "hmmsearch_1.domtblout"),
            expanded.work_file(dir, "hmmsearch_1.domtblout")
        );
    }

    #[test]
    fn search_names_follow_package_alphabet() {
        let protein = HmmerSearch::new(vec![PathBuf::from("mcrA.hmm")], SequenceType::Protein, 1e-5, 1);
        let nucleotide = HmmerSearch::new(vec![PathBuf::from("16S.hmm")], SequenceType::Nucleotide, 1e-5, 1);
        assert_eq!(protein.name(), "hmmsearch");
        assert_eq!(nucleotide.name(), "nhmmer");
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            nucleotide.search(&[Read::new("p", b"MKV")], SequenceType::Protein, dir.path()),
            Err(GraftError::Config(_))
        ));
    }
}
