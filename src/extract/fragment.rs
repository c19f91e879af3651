// src/extract/fragment.rs

use ahash::AHashSet;

use super::orf::{call_orfs, DEFAULT_MIN_ORF_LENGTH};
use super::orientation::{orient, resolve_orientation, to_oriented_span, to_read_span};
use crate::hit_table::HitTable;
use crate::types::{Fragment, FragmentProvenance, HitInterval, Read, Strand};

/// Hits closer than this many bases are one feature.
pub const DEFAULT_MERGE_DISTANCE: usize = 50;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Bases past this limit are ignored, and hits clipped to it.
    pub max_read_length: Option<usize>,
    pub merge_distance: usize,
    pub min_fragment_length: usize,
    /// Call ORFs and translate, for protein packages searched with nucleotide reads.
    pub translate: bool,
    pub min_orf_length: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            max_read_length: None,
            merge_distance: DEFAULT_MERGE_DISTANCE,
            min_fragment_length: 0,
            translate: false,
            min_orf_length: DEFAULT_MIN_ORF_LENGTH,
        }
    }
}

/// Counters for everything the extractor drops on purpose.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ExtractionStats {
    pub reads_with_hits: usize,
    pub regions: usize,
    pub fragments: usize,
    pub too_short: usize,
    pub regions_without_orf: usize,
    pub orfs_found: usize,
}

impl ExtractionStats {
    /// Translation was needed somewhere but not one ORF passed the threshold.
    pub fn no_passing_orfs(&self) -> bool {
        self.regions > 0 && self.orfs_found == 0
    }

    pub fn merge(&mut self, other: &ExtractionStats) {
        self.reads_with_hits += other.reads_with_hits;
        self.regions += other.regions;
        self.fragments += other.fragments;
        self.too_short += other.too_short;
        self.regions_without_orf += other.regions_without_orf;
        self.orfs_found += other.orfs_found;
    }
}

/// A run of hits on one read close enough to be one feature.
#[derive(Debug, Clone)]
pub struct HitRegion {
    pub start: usize,
    pub end: usize,
    pub hits: Vec<HitInterval>,
}

/// Groups hits into regions. Hits whose gap is at most `merge_distance`
/// bases merge into one region spanning their union.
pub fn cluster_regions(mut hits: Vec<HitInterval>, merge_distance: usize) -> Vec<HitRegion> {
    hits.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
    let mut regions: Vec<HitRegion> = Vec::new();
    for hit in hits {
        match regions.last_mut() {
            Some(region) if hit.start <= region.end + merge_distance + 1 => {
                region.end = region.end.max(hit.end);
                region.hits.push(hit);
            }
            _ => regions.push(HitRegion {
                start: hit.start,
                end: hit.end,
                hits: vec![hit],
            }),
        }
    }
    regions
}

/// A fragment before it is named.
struct Candidate {
    bases: Vec<u8>,
    protein: Option<Vec<u8>>,
    strand: Strand,
    read_start: usize,
    read_end: usize,
    score: f64,
}

/// Extracts every fragment of one read.
pub fn extract_read(
    read: &Read,
    hits: &[HitInterval],
    opts: &ExtractOptions,
    stats: &mut ExtractionStats,
) -> Vec<Fragment> {
    // 1. Restrict the read length, clipping hits accordingly
    let limit = opts.max_read_length.unwrap_or(usize::MAX).min(read.len());
    let seq = &read.seq[..limit];
    let clipped: Vec<HitInterval> = hits
        .iter()
        .filter_map(|h| h.clipped_to(limit))
        .map(|mut h| {
            if opts.translate && h.frame.is_none() {
                h.frame = Some(h.phase_on(limit));
            }
            h
        })
        .collect();
    if clipped.is_empty() {
        return Vec::new();
    }
    stats.reads_with_hits += 1;

    // 2. Split or merge into regions, 3. resolve and extract each region
    let regions = cluster_regions(clipped, opts.merge_distance);
    let mut seen_orfs: AHashSet<(Strand, u8, usize)> = AHashSet::new();
    let mut kept: Vec<Vec<Candidate>> = Vec::with_capacity(regions.len());
    for region in &regions {
        stats.regions += 1;
        let candidates = if opts.translate {
            orf_candidates(seq, region, opts, stats, &mut seen_orfs)
        } else {
            vec![region_candidate(seq, region)]
        };

        // 4. Minimum length filter
        let before = candidates.len();
        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.bases.len() >= opts.min_fragment_length)
            .collect();
        stats.too_short += before - candidates.len();
        if !candidates.is_empty() {
            kept.push(candidates);
        }
    }

    // 5. Name survivors: split index left to right, ORF index within the
    //    split, total over the read
    let total: usize = kept.iter().map(Vec::len).sum();
    stats.fragments += total;
    let mut fragments = Vec::with_capacity(total);
    for (split_idx, candidates) in kept.into_iter().enumerate() {
        for (orf_idx, c) in candidates.into_iter().enumerate() {
            fragments.push(Fragment {
                provenance: FragmentProvenance {
                    read_id: read.id.clone(),
                    split_index: split_idx + 1,
                    orf_index: orf_idx + 1,
                    total,
                },
                bases: c.bases,
                protein: c.protein,
                strand: c.strand,
                read_start: c.read_start,
                read_end: c.read_end,
                score: c.score,
                role: read.role,
            });
        }
    }
    fragments
}

fn region_candidate(seq: &[u8], region: &HitRegion) -> Candidate {
    let orientation = resolve_orientation(&region.hits);
    let span = &seq[region.start - 1..region.end];
    Candidate {
        bases: orient(span, orientation.strand).into_owned(),
        protein: None,
        strand: orientation.strand,
        read_start: region.start,
        read_end: region.end,
        score: orientation.score,
    }
}

fn orf_candidates(
    seq: &[u8],
    region: &HitRegion,
    opts: &ExtractOptions,
    stats: &mut ExtractionStats,
    seen: &mut AHashSet<(Strand, u8, usize)>,
) -> Vec<Candidate> {
    let orientation = resolve_orientation(&region.hits);
    let strand = orientation.strand;
    let oriented = orient(seq, strand);
    let len = seq.len();

    // Hits on the chosen strand, in oriented coordinates; other frames on
    // that strand stay in so frame shifts are followed.
    let hits: Vec<(usize, usize, u8)> = region
        .hits
        .iter()
        .filter(|h| h.strand == strand)
        .map(|h| {
            let (s, e) = to_oriented_span(h.start, h.end, strand, len);
            (s, e, h.frame.unwrap_or(0))
        })
        .collect();

    let orfs = call_orfs(&oriented, &hits, opts.min_orf_length);
    if orfs.is_empty() {
        stats.regions_without_orf += 1;
        return Vec::new();
    }
    stats.orfs_found += orfs.len();

    orfs.into_iter()
        .filter(|orf| seen.insert((strand, orf.phase, orf.start)))
        .map(|orf| {
            let (read_start, read_end) = to_read_span(orf.start + 1, orf.end, strand, len);
            Candidate {
                bases: oriented[orf.start..orf.end].to_vec(),
                protein: Some(orf.protein),
                strand,
                read_start,
                read_end,
                score: orientation.score,
            }
        })
        .collect()
}

/// Runs the extractor over every read with hits, in read order.
pub fn extract_fragments(
    reads: &[Read],
    table: &HitTable,
    opts: &ExtractOptions,
) -> (Vec<Fragment>, ExtractionStats) {
    let mut stats = ExtractionStats::default();
    let mut fragments = Vec::new();
    for read in reads {
        if let Some(hits) = table.hits_for(&read.id) {
            fragments.extend(extract_read(read, hits, opts, &mut stats));
        }
    }
    log::debug!(
        "Extracted {} fragments from {} reads ({} too short, {} regions without ORF)",
        stats.fragments,
        stats.reads_with_hits,
        stats.too_short,
        stats.regions_without_orf
    );
    (fragments, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit_table::HitFilter;
    use crate::sequence::reverse_complement;

    fn filler(n: usize) -> Vec<u8> {
        b"ACGTTGCA".iter().copied().cycle().take(n).collect()
    }

    #[test]
    fn distant_hits_split_into_non_overlapping_fragments() {
        let read = Read::new("1000", &filler(600));
        let hits = vec![
            HitInterval::from_raw("1000", 20, 200, 150.0, 1e-40),
            HitInterval::from_raw("1000", 400, 580, 140.0, 1e-38),
        ];
        let mut stats = ExtractionStats::default();
        let fragments = extract_read(&read, &hits, &ExtractOptions::default(), &mut stats);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].name(), "1000_1_1_2");
        assert_eq!(fragments[1].name(), "1000_2_1_2");
        assert!(fragments[0].read_end < fragments[1].read_start);
        assert_eq!(fragments[0].bases, read.seq[19..200].to_vec());
    }

    #[test]
    fn nearby_hits_merge_into_their_union() {
        let read = Read::new("r", &filler(300));
        let hits = vec![
            HitInterval::from_raw("r", 10, 100, 50.0, 1e-10),
            HitInterval::from_raw("r", 130, 200, 40.0, 1e-10),
        ];
        let mut stats = ExtractionStats::default();
        let fragments = extract_read(&read, &hits, &ExtractOptions::default(), &mut stats);
        assert_eq!(fragments.len(), 1);
        assert_eq!((fragments[0].read_start, fragments[0].read_end), (10, 200));
        assert_eq!(fragments[0].score, 90.0);
        assert_eq!(fragments[0].name(), "r_1_1_1");
    }

    #[test]
    fn reverse_complement_reads_extract_identical_bases() {
        let forward = filler(150);
        let mut read_seq = vec![b'N'; 100];
        read_seq.extend_from_slice(&forward);
        let read = Read::new("fwd", &read_seq);
        let rc_read = Read::new("rev", &reverse_complement(&read_seq));

        let hits = vec![HitInterval::from_raw("fwd", 101, 250, 120.0, 1e-30)];
        // On the reverse complement the same hit sits on bases 1..150,
        // reported descending by the engine.
        let rc_hits = vec![HitInterval::from_raw("rev", 150, 1, 120.0, 1e-30)];

        let mut stats = ExtractionStats::default();
        let opts = ExtractOptions::default();
        let a = extract_read(&read, &hits, &opts, &mut stats);
        let b = extract_read(&rc_read, &rc_hits, &opts, &mut stats);
        assert_eq!(a[0].bases, forward);
        assert_eq!(a[0].bases, b[0].bases);
        assert_eq!(b[0].strand, Strand::Reverse);
    }

    #[test]
    fn reverse_hit_is_recovered_from_a_mostly_ambiguous_read() {
        let gene = filler(90);
        let mut read_seq = vec![b'N'; 300];
        read_seq.extend(reverse_complement(&gene));
        read_seq.extend(vec![b'N'; 210]);
        let read = Read::new("noisy", &read_seq);
        assert!(read_seq.iter().filter(|&&b| b == b'N').count() > 5 * gene.len());

        // Strong reverse hit on the marker, weak forward noise over it
        let hits = vec![
            HitInterval::from_raw("noisy", 390, 301, 100.0, 1e-25),
            HitInterval::from_raw("noisy", 301, 390, 20.0, 1e-3),
        ];
        let orientation = resolve_orientation(
            &hits
                .iter()
                .cloned()
                .map(|mut h| {
                    h.frame = Some(h.phase_on(read_seq.len()));
                    h
                })
                .collect::<Vec<_>>(),
        );
        assert_eq!((orientation.strand, orientation.frame), (Strand::Reverse, Some(0)));

        let mut stats = ExtractionStats::default();
        let fragments = extract_read(&read, &hits, &ExtractOptions::default(), &mut stats);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].strand, Strand::Reverse);
        assert_eq!(fragments[0].bases, gene);
        assert_eq!((fragments[0].read_start, fragments[0].read_end), (301, 390));
    }

    #[test]
    fn restricted_reads_clip_hits_and_short_fragments_are_counted() {
        let read = Read::new("long", &filler(400));
        let hits = vec![
            HitInterval::from_raw("long", 50, 150, 80.0, 1e-20),
            HitInterval::from_raw("long", 300, 390, 80.0, 1e-20),
        ];
        let opts = ExtractOptions {
            max_read_length: Some(102),
            min_fragment_length: 60,
            ..ExtractOptions::default()
        };
        let mut stats = ExtractionStats::default();
        let fragments = extract_read(&read, &hits, &opts, &mut stats);
        // The second hit lies past the limit, the first is clipped to 50..102
        // which is shorter than 60 bases.
        assert!(fragments.is_empty());
        assert_eq!(stats.too_short, 1);
        assert_eq!(stats.regions, 1);
    }

    #[test]
    fn translated_region_split_by_stop_gets_orf_ordinals() {
        let mut seq = b"GCT".repeat(40);
        seq.extend_from_slice(b"TAA");
        seq.extend(b"GGT".repeat(40));
        let read = Read::new("contig", &seq);
        let hits = vec![HitInterval::from_raw("contig", 1, seq.len(), 200.0, 1e-50)];
        let table = HitTable::from_hits(hits, &HitFilter::default());
        let opts = ExtractOptions {
            translate: true,
            ..ExtractOptions::default()
        };
        let (fragments, stats) = extract_fragments(&[read], &table, &opts);
        let names: Vec<String> = fragments.iter().map(Fragment::name).collect();
        assert_eq!(names, ["contig_1_1_2", "contig_1_2_2"]);
        assert_eq!(fragments[1].protein.as_deref(), Some(&b"G".repeat(40)[..]));
        assert_eq!((fragments[1].read_start, fragments[1].read_end), (124, 243));
        assert!(!stats.no_passing_orfs());
    }

    #[test]
    fn too_long_orf_threshold_is_reported() {
        let seq = b"GCT".repeat(50);
        let read = Read::new("short", &seq);
        let hits = vec![HitInterval::from_raw("short", 1, 150, 90.0, 1e-20)];
        let table = HitTable::from_hits(hits, &HitFilter::default());
        let opts = ExtractOptions {
            translate: true,
            min_orf_length: 900,
            ..ExtractOptions::default()
        };
        let (fragments, stats) = extract_fragments(&[read], &table, &opts);
        assert!(fragments.is_empty());
        assert!(stats.no_passing_orfs());
    }
}
