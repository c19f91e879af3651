//src/sequence.rs

use crate::types::{Read, SequenceType, Strand};

/// Separator between a read id and its frame tag in six-frame translations.
pub const FRAME_TAG: &str = "__frame_";

/// Complement lookup; IUPAC codes map to their complements, anything else
/// passes through unchanged.
const COMPLEMENT_TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    let pairs: [(u8, u8); 12] = [
        (b'A', b'T'),
        (b'C', b'G'),
        (b'U', b'A'),
        (b'R', b'Y'),
        (b'K', b'M'),
        (b'B', b'V'),
        (b'D', b'H'),
        (b'N', b'N'),
        (b'S', b'S'),
        (b'W', b'W'),
        (b'X', b'X'),
        (b'-', b'-'),
    ];
    let mut p = 0;
    while p < pairs.len() {
        let (a, b) = pairs[p];
        table[a as usize] = b;
        table[a.to_ascii_lowercase() as usize] = b.to_ascii_lowercase();
        if a != b'U' {
            table[b as usize] = a;
            table[b.to_ascii_lowercase() as usize] = a.to_ascii_lowercase();
        }
        p += 1;
    }
    table
};

pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&base| COMPLEMENT_TABLE[base as usize])
        .collect()
}

#[inline]
fn encode_base(b: u8) -> Option<usize> {
    match b {
        b'T' | b't' | b'U' | b'u' => Some(0),
        b'C' | b'c' => Some(1),
        b'A' | b'a' => Some(2),
        b'G' | b'g' => Some(3),
        _ => None,
    }
}

/// Standard genetic code indexed by `16*first + 4*second + third` with
/// bases ordered T, C, A, G.
const GENETIC_CODE: &[u8; 64] =
    b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

/// Translates one codon; codons with ambiguous bases become `X`.
#[inline]
pub fn translate_codon(codon: &[u8]) -> u8 {
    match (
        encode_base(codon[0]),
        encode_base(codon[1]),
        encode_base(codon[2]),
    ) {
        (Some(a), Some(b), Some(c)) => GENETIC_CODE[16 * a + 4 * b + c],
        _ => b'X',
    }
}

pub fn is_stop_codon(codon: &[u8]) -> bool {
    translate_codon(codon) == b'*'
}

/// Translates from offset `phase`, ignoring a trailing partial codon.
pub fn translate(seq: &[u8], phase: usize) -> Vec<u8> {
    if phase >= seq.len() {
        return Vec::new();
    }
    seq[phase..].chunks_exact(3).map(translate_codon).collect()
}

/// Frame label used in translated record names: +1..+3 forward, -1..-3 reverse.
pub fn frame_label(strand: Strand, phase: u8) -> String {
    match strand {
        Strand::Forward => format!("+{}", phase + 1),
        Strand::Reverse => format!("-{}", phase + 1),
    }
}

/// Parses a label written by [`frame_label`].
pub fn parse_frame_label(label: &str) -> Option<(Strand, u8)> {
    let (strand, digit) = match label.as_bytes() {
        [b'+', d] => (Strand::Forward, *d),
        [b'-', d] => (Strand::Reverse, *d),
        _ => return None,
    };
    match digit {
        b'1'..=b'3' => Some((strand, digit - b'1')),
        _ => None,
    }
}

/// Splits `read__frame_+2` into the read id and its frame.
pub fn split_frame_tag(name: &str) -> Option<(&str, Strand, u8)> {
    let idx = name.rfind(FRAME_TAG)?;
    let (strand, phase) = parse_frame_label(&name[idx + FRAME_TAG.len()..])?;
    Some((&name[..idx], strand, phase))
}

/// All six translations of a read, named `<id>__frame_<label>`.
pub fn six_frame_translate(read: &Read) -> Vec<(String, Vec<u8>)> {
    let rc = reverse_complement(&read.seq);
    let mut frames = Vec::with_capacity(6);
    for (strand, seq) in [(Strand::Forward, &read.seq), (Strand::Reverse, &rc)] {
        for phase in 0..3u8 {
            let protein = translate(seq, phase as usize);
            if protein.is_empty() {
                continue;
            }
            frames.push((
                format!("{}{}{}", read.id, FRAME_TAG, frame_label(strand, phase)),
                protein,
            ));
        }
    }
    frames
}

/// Maps a 1-based inclusive residue span of a translated frame back to the
/// read, returning engine-style coordinates (descending for the reverse
/// strand).
pub fn protein_span_to_read(
    strand: Strand,
    phase: u8,
    aa_from: usize,
    aa_to: usize,
    read_len: usize,
) -> (usize, usize) {
    let (lo, hi) = (aa_from.min(aa_to), aa_from.max(aa_to));
    let start = phase as usize + (lo - 1) * 3 + 1;
    let end = (phase as usize + hi * 3).min(read_len);
    match strand {
        Strand::Forward => (start, end),
        Strand::Reverse => (read_len - start + 1, read_len - end + 1),
    }
}

/// Guesses the alphabet from the first reads: nucleotide when at least 90%
/// of residues are A, C, G, T, U or N.
pub fn guess_sequence_type(reads: &[Read]) -> SequenceType {
    let mut total = 0usize;
    let mut nucleotide = 0usize;
    for read in reads.iter().take(100) {
        for &b in &read.seq {
            if b == b'-' || b == b'.' || b == b'*' {
                continue;
            }
            total += 1;
            if matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'U' | b'N') {
                nucleotide += 1;
            }
        }
    }
    if total == 0 || nucleotide * 10 >= total * 9 {
        SequenceType::Nucleotide
    } else {
        SequenceType::Protein
    }
}
