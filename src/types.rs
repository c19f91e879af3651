//src/types.rs

use std::fmt;

/// Which file of a pair a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MateRole {
    Single,
    Forward,
    Reverse,
}

/// Strand of a hit relative to the read as it was sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Forward,
    Reverse,
}

/// Alphabet of reads or of a reference package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceType {
    Nucleotide,
    Protein,
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceType::Nucleotide => write!(f, "nucleotide"),
            SequenceType::Protein => write!(f, "aminoacid"),
        }
    }
}

/// A minimal representation of a read. Never mutated once loaded.
#[derive(Debug, Clone)]
pub struct Read {
    pub id: String,
    pub header_line: String,
    pub seq: Vec<u8>,
    pub quals: Option<Vec<u8>>,
    pub role: MateRole,
}

impl Read {
    pub fn new(id: &str, seq: &[u8]) -> Self {
        Read {
            id: id.to_string(),
            header_line: id.to_string(),
            seq: seq.to_vec(),
            quals: None,
            role: MateRole::Single,
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Read identity with any `/1` or `/2` mate suffix removed.
    pub fn base_id(&self) -> &str {
        base_read_id(&self.id)
    }
}

/// Strips an Illumina-style `/1` or `/2` mate marker.
pub fn base_read_id(id: &str) -> &str {
    id.strip_suffix("/1")
        .or_else(|| id.strip_suffix("/2"))
        .unwrap_or(id)
}

/// One coordinate hit on a read, 1-based inclusive with `start <= end`.
///
/// `frame` is the codon phase (0..=2) counted from the start of the hit's
/// strand, and is only set for hits that live in protein space.
#[derive(Debug, Clone, PartialEq)]
pub struct HitInterval {
    pub read_id: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
    pub evalue: f64,
    pub strand: Strand,
    pub frame: Option<u8>,
}

impl HitInterval {
    /// Builds a hit from engine coordinates; a descending pair means the
    /// reverse strand.
    pub fn from_raw(read_id: &str, from: usize, to: usize, score: f64, evalue: f64) -> Self {
        let (start, end, strand) = if from <= to {
            (from, to, Strand::Forward)
        } else {
            (to, from, Strand::Reverse)
        };
        HitInterval {
            read_id: read_id.to_string(),
            start,
            end,
            score,
            evalue,
            strand,
            frame: None,
        }
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Codon phase of this hit on a read of `read_len` bases.
    pub fn phase_on(&self, read_len: usize) -> u8 {
        match self.strand {
            Strand::Forward => ((self.start - 1) % 3) as u8,
            Strand::Reverse => (read_len.saturating_sub(self.end) % 3) as u8,
        }
    }

    /// Clips the hit to the first `read_len` bases. Hits starting past the
    /// end disappear; a phased hit has its phase recomputed.
    pub fn clipped_to(&self, read_len: usize) -> Option<HitInterval> {
        if self.start > read_len {
            return None;
        }
        let mut clipped = self.clone();
        clipped.end = clipped.end.min(read_len);
        if clipped.frame.is_some() {
            clipped.frame = Some(clipped.phase_on(read_len));
        }
        Some(clipped)
    }
}

/// Where a fragment came from. Serialized only at the output boundary, as
/// `<read>_<split>_<orf>_<total>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentProvenance {
    pub read_id: String,
    pub split_index: usize,
    pub orf_index: usize,
    pub total: usize,
}

impl fmt::Display for FragmentProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.read_id, self.split_index, self.orf_index, self.total
        )
    }
}

/// An extracted sub-sequence of one read.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub provenance: FragmentProvenance,
    /// Bases in the resolved orientation (residues for protein input).
    pub bases: Vec<u8>,
    /// Translation, when the fragment came from an ORF.
    pub protein: Option<Vec<u8>>,
    pub strand: Strand,
    /// 1-based inclusive span on the read as sequenced.
    pub read_start: usize,
    pub read_end: usize,
    pub score: f64,
    pub role: MateRole,
}

impl Fragment {
    pub fn name(&self) -> String {
        self.provenance.to_string()
    }

    /// The sequence handed to the aligner.
    pub fn search_sequence(&self) -> &[u8] {
        self.protein.as_deref().unwrap_or(&self.bases)
    }
}

/// A fragment after alignment, trimmed to the reference columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedFragment {
    pub name: String,
    pub aligned: Vec<u8>,
}

impl AlignedFragment {
    /// Keeps match columns only: upper-case residues and `-`.
    pub fn from_aligner_row(name: &str, row: &[u8]) -> Self {
        let aligned = row
            .iter()
            .copied()
            .filter(|&c| c == b'-' || c.is_ascii_uppercase() || c == b'*')
            .collect();
        AlignedFragment {
            name: name.to_string(),
            aligned,
        }
    }

    /// Residues that are not gaps.
    pub fn residue_count(&self) -> usize {
        self.aligned.iter().filter(|&&c| c != b'-').count()
    }

    pub fn width(&self) -> usize {
        self.aligned.len()
    }
}
