//src/rollup.rs

use indexmap::IndexMap;

use crate::placement::PlacedRead;
use crate::taxonomy::{Lineage, Taxonomy};

/// Per-sample counts keyed by lineage, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineageCounts {
    pub sample: String,
    pub counts: IndexMap<Lineage, u64>,
}

impl LineageCounts {
    pub fn new(sample: &str) -> Self {
        LineageCounts {
            sample: sample.to_string(),
            counts: IndexMap::new(),
        }
    }

    pub fn add(&mut self, lineage: Lineage, count: u64) {
        *self.counts.entry(lineage).or_insert(0) += count;
    }

    pub fn get(&self, lineage: &Lineage) -> u64 {
        self.counts.get(lineage).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// If several candidates tie at the top, collapse them to their deepest
/// shared lineage prefix. Returns `None` for an empty candidate set.
fn break_ties<I: IntoIterator<Item = Lineage>>(tied: I) -> Option<Lineage> {
    let mut iter = tied.into_iter();
    let mut candidate = iter.next()?;
    for lineage in iter {
        candidate = candidate.common_prefix(&lineage);
    }
    Some(candidate)
}

/// Lineage of one placed record: its single best candidate, or the common
/// ancestor of every candidate tied at the best support. Candidates the
/// taxonomy cannot resolve are skipped.
pub fn resolve_lineage(placed: &PlacedRead, taxonomy: &Taxonomy) -> Option<Lineage> {
    let lineages = placed.top_candidates().into_iter().filter_map(|c| {
        let lineage = taxonomy.lineage_of(&c.classification);
        if lineage.is_none() {
            log::warn!(
                "Classification {} of {} is not in the taxonomy",
                c.classification,
                placed.name
            );
        }
        lineage
    });
    break_ties(lineages)
}

/// Counts final placements per resolved lineage. Each record adds its
/// weight; records that resolve to nothing are left out.
pub fn rollup(sample: &str, placed: &[PlacedRead], taxonomy: &Taxonomy) -> LineageCounts {
    let mut counts = LineageCounts::new(sample);
    let mut unresolved = 0usize;
    for record in placed {
        match resolve_lineage(record, taxonomy) {
            Some(lineage) => counts.add(lineage, u64::from(record.weight)),
            None => unresolved += 1,
        }
    }
    if unresolved > 0 {
        log::warn!("{unresolved} placements in {sample} could not be assigned a lineage");
    }
    log::info!(
        "Sample {}: {} sequences over {} lineages",
        sample,
        counts.total(),
        counts.counts.len()
    );
    counts
}
