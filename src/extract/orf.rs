// src/extract/orf.rs

use crate::sequence::{is_stop_codon, translate};

/// Default minimum ORF length in nucleotides.
pub const DEFAULT_MIN_ORF_LENGTH: usize = 96;

/// An open reading frame on the oriented sequence; `start..end` is 0-based
/// half open and excludes the terminating stop codon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrfSpan {
    pub phase: u8,
    pub start: usize,
    pub end: usize,
    pub protein: Vec<u8>,
}

impl OrfSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Overlap with a 1-based inclusive span.
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start - 1 < self.end
    }
}

/// Stop-to-stop open frames in one phase. Frames running off either end of
/// the sequence are kept, since reads are usually partial genes.
pub fn find_orfs(seq: &[u8], phase: u8) -> Vec<(usize, usize)> {
    let mut orfs = Vec::new();
    let mut open_start = phase as usize;
    let mut pos = phase as usize;
    while pos + 3 <= seq.len() {
        if is_stop_codon(&seq[pos..pos + 3]) {
            if pos > open_start {
                orfs.push((open_start, pos));
            }
            open_start = pos + 3;
        }
        pos += 3;
    }
    if pos > open_start {
        orfs.push((open_start, pos));
    }
    orfs
}

/// Calls the ORFs of `seq` (already in the hit's orientation) that overlap
/// a hit in the same phase and are at least `min_orf_length` bases long.
///
/// `hits` holds `(start, end, phase)` with 1-based inclusive coordinates on
/// `seq`. A hit interrupted by a stop codon or a frame shift yields several
/// ORFs, returned left to right.
pub fn call_orfs(seq: &[u8], hits: &[(usize, usize, u8)], min_orf_length: usize) -> Vec<OrfSpan> {
    let mut phases: Vec<u8> = hits.iter().map(|&(_, _, p)| p).collect();
    phases.sort_unstable();
    phases.dedup();

    let mut called = Vec::new();
    for phase in phases {
        for (start, end) in find_orfs(seq, phase) {
            let orf = OrfSpan {
                phase,
                start,
                end,
                protein: Vec::new(),
            };
            if orf.len() < min_orf_length {
                continue;
            }
            let supported = hits
                .iter()
                .any(|&(s, e, p)| p == phase && orf.overlaps(s, e));
            if supported {
                called.push(OrfSpan {
                    protein: translate(&seq[start..end], 0),
                    ..orf
                });
            }
        }
    }
    called.sort_by_key(|o| (o.start, o.phase));
    called
}
