//src/mates.rs

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::placement::{Candidate, PlacedRead, TIE_EPSILON};
use crate::types::base_read_id;

/// Higher support first, then the smaller name. Symmetric in its inputs,
/// so swapping the mate files never changes the pick.
fn better<'a>(a: &'a PlacedRead, b: &'a PlacedRead) -> &'a PlacedRead {
    let (sa, sb) = (a.support(), b.support());
    if sa - sb > TIE_EPSILON {
        a
    } else if sb - sa > TIE_EPSILON {
        b
    } else if a.name.cmp(&b.name) != Ordering::Greater {
        a
    } else {
        b
    }
}

/// Best placement per base read id for one mate file.
fn representatives(placed: Vec<PlacedRead>) -> BTreeMap<String, PlacedRead> {
    let mut reps: BTreeMap<String, PlacedRead> = BTreeMap::new();
    for p in placed {
        let key = base_read_id(&p.read_id).to_string();
        let replace = match reps.get(&key) {
            Some(current) => better(current, &p).name != current.name,
            None => true,
        };
        if replace {
            reps.insert(key, p);
        }
    }
    reps
}

/// The pair record keeps the representing fragment's name, so the
/// placement file still says which split and ORF was placed.
fn as_pair(base: &str, name: &str, candidates: Vec<Candidate>) -> PlacedRead {
    PlacedRead {
        name: name.to_string(),
        read_id: base.to_string(),
        candidates,
        weight: 1,
    }
}

/// Reconciles forward and reverse placements into one record per read pair.
///
/// Both mates agreeing on their top taxa give one record of weight 1. When
/// they disagree the strictly better supported mate wins; equally supported
/// disagreeing mates keep both taxa as tied candidates, which the rollup
/// collapses to their common ancestor; the smaller fragment name labels
/// them. A mate without any placement defers to the other. Output is
/// ordered by read id.
pub fn reconcile_mates(forward: Vec<PlacedRead>, reverse: Vec<PlacedRead>) -> Vec<PlacedRead> {
    let mut fwd = representatives(forward);
    let mut rev = representatives(reverse);

    let mut keys: Vec<String> = fwd.keys().chain(rev.keys()).cloned().collect();
    keys.sort();
    keys.dedup();

    let mut reconciled = Vec::with_capacity(keys.len());
    for key in keys {
        let record = match (fwd.remove(&key), rev.remove(&key)) {
            (Some(a), Some(b)) => {
                let agree = a.top_classifications() == b.top_classifications();
                if agree || (a.support() - b.support()).abs() > TIE_EPSILON {
                    let winner = better(&a, &b);
                    as_pair(&key, &winner.name, winner.candidates.clone())
                } else {
                    let support = a.support();
                    let mut tied: Vec<Candidate> = a
                        .top_candidates()
                        .into_iter()
                        .chain(b.top_candidates())
                        .map(|c| Candidate {
                            like_weight_ratio: support,
                            ..c.clone()
                        })
                        .collect();
                    tied.sort_by(|x, y| x.classification.cmp(&y.classification));
                    tied.dedup_by(|x, y| x.classification == y.classification);
                    log::debug!("Mates of {key} disagree with equal support, keeping both");
                    as_pair(&key, &better(&a, &b).name, tied)
                }
            }
            (Some(only), None) | (None, Some(only)) => as_pair(&key, &only.name, only.candidates),
            (None, None) => continue,
        };
        reconciled.push(record);
    }
    reconciled
}
