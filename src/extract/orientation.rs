// src/extract/orientation.rs

use std::borrow::Cow;
use std::cmp::Ordering;

use crate::sequence::reverse_complement;
use crate::types::{HitInterval, Strand};

/// Chosen strand and reading frame for one hit region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub strand: Strand,
    /// Codon phase in the oriented sequence, for translated regions.
    pub frame: Option<u8>,
    /// Summed score of the hits supporting this orientation.
    pub score: f64,
}

/// Picks the strand/frame combination whose hits score highest. Ties go to
/// the forward strand, then to the lowest frame, so the choice never depends
/// on hit order.
pub fn resolve_orientation(hits: &[HitInterval]) -> Orientation {
    let mut combos: Vec<Orientation> = Vec::with_capacity(6);
    for hit in hits {
        match combos
            .iter_mut()
            .find(|o| o.strand == hit.strand && o.frame == hit.frame)
        {
            Some(o) => o.score += hit.score,
            None => combos.push(Orientation {
                strand: hit.strand,
                frame: hit.frame,
                score: hit.score,
            }),
        }
    }

    combos
        .into_iter()
        .min_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.strand.cmp(&b.strand))
                .then(a.frame.cmp(&b.frame))
        })
        .unwrap_or(Orientation {
            strand: Strand::Forward,
            frame: None,
            score: 0.0,
        })
}

/// The read in the given orientation.
pub fn orient(seq: &[u8], strand: Strand) -> Cow<'_, [u8]> {
    match strand {
        Strand::Forward => Cow::Borrowed(seq),
        Strand::Reverse => Cow::Owned(reverse_complement(seq)),
    }
}

/// Converts a 1-based inclusive read span to the oriented sequence.
pub fn to_oriented_span(start: usize, end: usize, strand: Strand, len: usize) -> (usize, usize) {
    match strand {
        Strand::Forward => (start, end),
        Strand::Reverse => (len - end + 1, len - start + 1),
    }
}

/// Inverse of [`to_oriented_span`]; the mapping is its own inverse.
pub fn to_read_span(start: usize, end: usize, strand: Strand, len: usize) -> (usize, usize) {
    to_oriented_span(start, end, strand, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(strand: Strand, frame: Option<u8>, score: f64) -> HitInterval {
        let (from, to) = match strand {
            Strand::Forward => (1, 30),
            Strand::Reverse => (30, 1),
        };
        let mut h = HitInterval::from_raw("r", from, to, score, 1e-10);
        h.frame = frame;
        h
    }

    #[test]
    fn best_summed_score_wins() {
        let hits = vec![
            hit(Strand::Forward, Some(0), 30.0),
            hit(Strand::Reverse, Some(2), 20.0),
            hit(Strand::Reverse, Some(2), 15.0),
        ];
        let o = resolve_orientation(&hits);
        assert_eq!((o.strand, o.frame, o.score), (Strand::Reverse, Some(2), 35.0));
    }

    #[test]
    fn ties_prefer_forward_then_lowest_frame() {
        let hits = vec![
            hit(Strand::Reverse, Some(0), 30.0),
            hit(Strand::Forward, Some(2), 30.0),
            hit(Strand::Forward, Some(1), 30.0),
        ];
        let o = resolve_orientation(&hits);
        assert_eq!((o.strand, o.frame), (Strand::Forward, Some(1)));

        let mut reversed = hits.clone();
        reversed.reverse();
        assert_eq!(resolve_orientation(&reversed), o);
    }

    #[test]
    fn spans_mirror_on_reverse_strand() {
        assert_eq!(to_oriented_span(11, 16, Strand::Reverse, 20), (5, 10));
        assert_eq!(to_read_span(5, 10, Strand::Reverse, 20), (11, 16));
        assert_eq!(to_oriented_span(3, 9, Strand::Forward, 20), (3, 9));
    }
}
