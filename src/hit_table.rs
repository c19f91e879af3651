// src/hit_table.rs
//
// Normalizes the tabular output of the search engines into one row per
// (read, start, end, score, strand), 1-based inclusive with start <= end.
// Reads BLAST/DIAMOND `outfmt 6`, `nhmmer --tblout` and
// `hmmsearch --domtblout`.

use std::io::BufRead;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::error::{GraftError, Result};
use crate::sequence::{protein_span_to_read, split_frame_tag};
use crate::types::HitInterval;

/// Default e-value ceiling, matching the search engines' usual cut-off.
pub const DEFAULT_EVALUE: f64 = 1e-5;

/// Thresholds applied while building the table.
#[derive(Debug, Clone, Copy)]
pub struct HitFilter {
    pub max_evalue: f64,
    pub min_score: Option<f64>,
}

impl Default for HitFilter {
    fn default() -> Self {
        HitFilter {
            max_evalue: DEFAULT_EVALUE,
            min_score: None,
        }
    }
}

impl HitFilter {
    pub fn passes(&self, hit: &HitInterval) -> bool {
        hit.evalue <= self.max_evalue && self.min_score.map_or(true, |min| hit.score >= min)
    }
}

fn data_lines<R: BufRead>(reader: R) -> impl Iterator<Item = (usize, std::io::Result<String>)> {
    reader
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| match l {
            Ok(line) => !line.trim().is_empty() && !line.starts_with('#'),
            Err(_) => true,
        })
}

fn parse_field<T: std::str::FromStr>(
    fields: &[&str],
    idx: usize,
    format: &'static str,
    line: usize,
    name: &str,
) -> Result<T> {
    fields
        .get(idx)
        .ok_or_else(|| GraftError::parse(format, line, format!("missing {name} column")))?
        .parse()
        .map_err(|_| GraftError::parse(format, line, format!("invalid {name}: {}", fields[idx])))
}

/// A 1-based sequence coordinate; zero is rejected.
fn parse_position(fields: &[&str], idx: usize, format: &'static str, line: usize, name: &str) -> Result<usize> {
    match parse_field(fields, idx, format, line, name)? {
        0 => Err(GraftError::parse(format, line, format!("{name} is 0, coordinates are 1-based"))),
        pos => Ok(pos),
    }
}

/// Best score per read over `hits`.
fn best_scores(hits: &[HitInterval]) -> AHashMap<&str, f64> {
    let mut best: AHashMap<&str, f64> = AHashMap::new();
    for hit in hits {
        let score = best.entry(hit.read_id.as_str()).or_insert(f64::NEG_INFINITY);
        *score = score.max(hit.score);
    }
    best
}

/// Parses BLAST/DIAMOND `outfmt 6`. For translated searches `qstart > qend`
/// marks a reverse-strand hit.
pub fn parse_blast_tabular<R: BufRead>(reader: R) -> Result<Vec<HitInterval>> {
    const FORMAT: &str = "BLAST tabular";
    let mut hits = Vec::new();
    for (line_no, line) in data_lines(reader) {
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            return Err(GraftError::parse(FORMAT, line_no, "fewer than 12 fields"));
        }
        let qstart = parse_position(&fields, 6, FORMAT, line_no, "qstart")?;
        let qend = parse_position(&fields, 7, FORMAT, line_no, "qend")?;
        let evalue: f64 = parse_field(&fields, 10, FORMAT, line_no, "evalue")?;
        let bitscore: f64 = parse_field(&fields, 11, FORMAT, line_no, "bitscore")?;
        hits.push(HitInterval::from_raw(fields[0], qstart, qend, bitscore, evalue));
    }
    Ok(hits)
}

/// Parses `nhmmer --tblout`. Columns are whitespace separated; ali from/to
/// are 7 and 8, strand 12, e-value 13 and score 14.
pub fn parse_nhmmer_tblout<R: BufRead>(reader: R) -> Result<Vec<HitInterval>> {
    const FORMAT: &str = "nhmmer tblout";
    let mut hits = Vec::new();
    for (line_no, line) in data_lines(reader) {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 15 {
            return Err(GraftError::parse(FORMAT, line_no, "fewer than 15 fields"));
        }
        let ali_from = parse_position(&fields, 6, FORMAT, line_no, "ali from")?;
        let ali_to = parse_position(&fields, 7, FORMAT, line_no, "ali to")?;
        let evalue: f64 = parse_field(&fields, 12, FORMAT, line_no, "E-value")?;
        let score: f64 = parse_field(&fields, 13, FORMAT, line_no, "score")?;
        let hit = HitInterval::from_raw(fields[0], ali_from, ali_to, score, evalue);
        // nhmmer reports reverse hits with descending coordinates, the strand
        // column must agree
        if (fields[11] == "-") != (hit.strand == crate::types::Strand::Reverse) {
            return Err(GraftError::parse(FORMAT, line_no, "strand disagrees with coordinates"));
        }
        hits.push(hit);
    }
    Ok(hits)
}

/// One domain row of `hmmsearch --domtblout`, in the coordinates of the
/// searched (possibly translated) sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainRow {
    pub target: String,
    pub ali_from: usize,
    pub ali_to: usize,
    /// Full-sequence e-value
    pub evalue: f64,
    /// Domain score
    pub score: f64,
}

/// Parses `hmmsearch --domtblout`. The full-sequence e-value is kept, so a
/// sequence whose domains are individually weak still passes when the
/// sequence as a whole is significant.
pub fn parse_domtblout<R: BufRead>(reader: R) -> Result<Vec<DomainRow>> {
    const FORMAT: &str = "hmmsearch domtblout";
    let mut rows = Vec::new();
    for (line_no, line) in data_lines(reader) {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 22 {
            return Err(GraftError::parse(FORMAT, line_no, "fewer than 22 fields"));
        }
        rows.push(DomainRow {
            target: fields[0].to_string(),
            evalue: parse_field(&fields, 6, FORMAT, line_no, "full E-value")?,
            score: parse_field(&fields, 13, FORMAT, line_no, "domain score")?,
            ali_from: parse_position(&fields, 17, FORMAT, line_no, "ali from")?,
            ali_to: parse_position(&fields, 18, FORMAT, line_no, "ali to")?,
        });
    }
    Ok(rows)
}

/// Converts domain rows to read hits. Rows on six-frame translations are
/// mapped back to nucleotide read coordinates using `read_lengths`.
pub fn domain_rows_to_hits(
    rows: Vec<DomainRow>,
    read_lengths: &AHashMap<String, usize>,
) -> Vec<HitInterval> {
    rows.into_iter()
        .filter_map(|row| match split_frame_tag(&row.target) {
            Some((read_id, strand, phase)) => {
                let read_len = *read_lengths.get(read_id)?;
                let (from, to) = protein_span_to_read(strand, phase, row.ali_from, row.ali_to, read_len);
                let mut hit = HitInterval::from_raw(read_id, from, to, row.score, row.evalue);
                hit.frame = Some(phase);
                Some(hit)
            }
            None => Some(HitInterval::from_raw(
                &row.target,
                row.ali_from,
                row.ali_to,
                row.score,
                row.evalue,
            )),
        })
        .collect()
}

/// Normalized hits grouped by read, in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct HitTable {
    by_read: IndexMap<String, Vec<HitInterval>>,
}

impl HitTable {
    /// Builds the table, dropping hits that fail `filter`. Reads left with
    /// no hits are simply absent.
    pub fn from_hits(hits: Vec<HitInterval>, filter: &HitFilter) -> Self {
        let total = hits.len();
        let mut by_read: IndexMap<String, Vec<HitInterval>> = IndexMap::new();
        for hit in hits {
            if !filter.passes(&hit) {
                continue;
            }
            by_read.entry(hit.read_id.clone()).or_default().push(hit);
        }
        let table = HitTable { by_read };
        log::debug!(
            "Kept {} of {} hits across {} reads",
            table.hit_count(),
            total,
            table.len()
        );
        table
    }

    pub fn len(&self) -> usize {
        self.by_read.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_read.is_empty()
    }

    pub fn hit_count(&self) -> usize {
        self.by_read.values().map(Vec::len).sum()
    }

    pub fn hits_for(&self, read_id: &str) -> Option<&[HitInterval]> {
        self.by_read.get(read_id).map(Vec::as_slice)
    }

    pub fn read_ids(&self) -> impl Iterator<Item = &str> {
        self.by_read.keys().map(String::as_str)
    }

    /// Decoy precedence: removes every read whose best decoy score is at
    /// least its best score against the target database. Both hit lists
    /// must come from the same engine so their scores compare. A read with
    /// a decoy hit but no target hit is removed. Returns the number of
    /// reads removed.
    pub fn apply_decoy(&mut self, target_hits: &[HitInterval], decoy_hits: &[HitInterval]) -> usize {
        let target = best_scores(target_hits);
        let decoy = best_scores(decoy_hits);
        let removed = self.drop_reads(|read_id, _| {
            let Some(&d) = decoy.get(read_id) else {
                return false;
            };
            let t = target.get(read_id).copied().unwrap_or(f64::NEG_INFINITY);
            if d >= t {
                log::debug!("Read {read_id} matches the decoy ({d}) at least as well as the target ({t})");
            }
            d >= t
        });
        if removed > 0 {
            log::info!("Removed {removed} reads that matched the decoy database better");
        }
        removed
    }

    /// Removes every read scoring strictly higher against the eukaryote
    /// profile than against the package profiles. `euk_hits` come from the
    /// engine that built this table.
    pub fn apply_euk_check(&mut self, euk_hits: &[HitInterval]) -> usize {
        let euk = best_scores(euk_hits);
        let removed = self.drop_reads(|read_id, target| match euk.get(read_id) {
            Some(&e) if e > target => {
                log::debug!("Read {read_id} looks eukaryotic ({e} against {target})");
                true
            }
            _ => false,
        });
        if removed > 0 {
            log::info!("Removed {removed} reads that looked eukaryotic");
        }
        removed
    }

    /// Drops reads for which `remove(read_id, best_score)` holds.
    fn drop_reads<F: Fn(&str, f64) -> bool>(&mut self, remove: F) -> usize {
        let before = self.by_read.len();
        self.by_read.retain(|read_id, hits| {
            let best = hits.iter().map(|h| h.score).fold(f64::NEG_INFINITY, f64::max);
            !remove(read_id, best)
        });
        before - self.by_read.len()
    }

    /// Marks every hit as codon phased, computing its frame from its
    /// coordinates on reads of the given lengths.
    pub fn assign_frames(&mut self, read_lengths: &AHashMap<String, usize>) {
        for (read_id, hits) in self.by_read.iter_mut() {
            let Some(&len) = read_lengths.get(read_id) else {
                continue;
            };
            for hit in hits.iter_mut() {
                hit.frame = Some(hit.phase_on(len));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strand;
    use std::io::Cursor;

    #[test]
    fn parses_blastx_reverse_hits() {
        let text = "read1\tmcrA_ref\t88.5\t50\t5\t0\t151\t2\t1\t50\t3.1e-20\t95.1\n\
                    # comment\n\
                    read2\tmcrA_ref\t70.0\t40\t12\t0\t10\t129\t5\t44\t1e-3\t30.0\n";
        let hits = parse_blast_tabular(Cursor::new(text)).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!((hits[0].start, hits[0].end, hits[0].strand), (2, 151, Strand::Reverse));
        assert_eq!(hits[1].strand, Strand::Forward);

        let table = HitTable::from_hits(hits, &HitFilter::default());
        assert_eq!(table.len(), 1);
        assert!(table.hits_for("read2").is_none());
    }

    #[test]
    fn parses_nhmmer_strands() {
        let text = "#header\n\
        NS500333:16:H16F3BGXX:1:11101:25587:3521 - 61_otus - 1 150 150 2 150 2 151 - 2.1e-40 140.2 0.1 -\n";
        let hits = parse_nhmmer_tblout(Cursor::new(text)).unwrap();
        assert_eq!(hits[0].start, 2);
        assert_eq!(hits[0].end, 150);
        assert_eq!(hits[0].strand, Strand::Reverse);
    }

    #[test]
    fn maps_translated_domains_to_reads() {
        let row = "r1__frame_-2 - 50 mcrA - 557 1e-10 40.0 0.1 1 1 1e-9 1e-9 38.5 0.1 10 20 2 3 1 4 0.9 -\n";
        let rows = parse_domtblout(Cursor::new(row)).unwrap();
        let mut lengths = AHashMap::new();
        lengths.insert("r1".to_string(), 20usize);
        let hits = domain_rows_to_hits(rows, &lengths);
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].start, hits[0].end, hits[0].strand), (11, 16, Strand::Reverse));
        assert_eq!(hits[0].frame, Some(1));
        assert_eq!(hits[0].score, 38.5);
    }

    #[test]
    fn decoy_at_least_as_good_as_target_database_removes_read() {
        let profile = vec![
            HitInterval::from_raw("keep", 1, 90, 40.0, 1e-20),
            HitInterval::from_raw("tie", 1, 90, 40.0, 1e-20),
            HitInterval::from_raw("lose", 1, 90, 40.0, 1e-20),
            HitInterval::from_raw("orphan", 1, 90, 40.0, 1e-20),
            HitInterval::from_raw("clean", 1, 90, 40.0, 1e-20),
        ];
        // profile scores are lower than every decoy score, only the
        // target database scores decide
        let target = vec![
            HitInterval::from_raw("keep", 1, 90, 200.0, 1e-50),
            HitInterval::from_raw("tie", 1, 90, 60.0, 1e-20),
            HitInterval::from_raw("lose", 1, 90, 50.0, 1e-20),
            HitInterval::from_raw("lose", 100, 190, 55.0, 1e-20),
        ];
        let decoy = vec![
            HitInterval::from_raw("keep", 1, 90, 45.0, 1e-20),
            HitInterval::from_raw("tie", 1, 90, 60.0, 1e-20),
            HitInterval::from_raw("lose", 1, 90, 90.0, 1e-30),
            HitInterval::from_raw("orphan", 1, 90, 45.0, 1e-20),
        ];
        let mut table = HitTable::from_hits(profile, &HitFilter::default());
        assert_eq!(table.apply_decoy(&target, &decoy), 3);
        assert_eq!(table.read_ids().collect::<Vec<_>>(), ["keep", "clean"]);
    }

    #[test]
    fn euk_check_removes_only_strictly_better_eukaryote_hits() {
        let hits = vec![
            HitInterval::from_raw("bac1", 1, 100, 80.0, 1e-20),
            HitInterval::from_raw("euk1", 1, 100, 30.0, 1e-8),
            HitInterval::from_raw("even", 1, 100, 50.0, 1e-10),
        ];
        let euk = vec![
            HitInterval::from_raw("bac1", 1, 100, 20.0, 1e-3),
            HitInterval::from_raw("euk1", 1, 100, 120.0, 1e-30),
            HitInterval::from_raw("even", 1, 100, 50.0, 1e-10),
        ];
        let mut table = HitTable::from_hits(hits, &HitFilter::default());
        assert_eq!(table.apply_euk_check(&euk), 1);
        assert_eq!(table.read_ids().collect::<Vec<_>>(), ["bac1", "even"]);
    }

    #[test]
    fn zero_coordinates_are_parse_errors() {
        let blast = "r1\tref\t90.0\t20\t1\t0\t0\t20\t1\t20\t1e-10\t40.0\n";
        assert!(matches!(
            parse_blast_tabular(Cursor::new(blast)),
            Err(GraftError::Parse { .. })
        ));
        let nhmmer = "r1 - 16S - 1 150 0 149 0 149 151 + 1e-40 140.2 0.1 -\n";
        assert!(parse_nhmmer_tblout(Cursor::new(nhmmer)).is_err());
        let domtbl = "r1 - 50 mcrA - 557 1e-10 40.0 0.1 1 1 1e-9 1e-9 38.5 0.1 10 20 0 3 1 4 0.9 -\n";
        assert!(parse_domtblout(Cursor::new(domtbl)).is_err());
    }

    #[test]
    fn score_floor_drops_weak_hits() {
        let filter = HitFilter {
            max_evalue: 10.0,
            min_score: Some(25.0),
        };
        let hits = vec![
            HitInterval::from_raw("a", 1, 10, 24.9, 1.0),
            HitInterval::from_raw("a", 20, 40, 25.0, 1.0),
        ];
        let table = HitTable::from_hits(hits, &filter);
        assert_eq!(table.hits_for("a").unwrap().len(), 1);
    }
}
