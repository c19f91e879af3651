//src/cluster.rs

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::placement::Placement;
use crate::types::AlignedFragment;

/// Representative name -> every member name (representative first).
#[derive(Debug, Clone, Default)]
pub struct ClusterMap {
    members: AHashMap<String, Vec<String>>,
}

impl ClusterMap {
    pub fn members_of(&self, representative: &str) -> Option<&[String]> {
        self.members.get(representative).map(Vec::as_slice)
    }

    pub fn cluster_count(&self) -> usize {
        self.members.len()
    }

    /// Rewrites each placement's name list so every member of a placed
    /// representative is listed with weight 1.
    pub fn expand(&self, placements: &mut [Placement]) {
        for placement in placements.iter_mut() {
            let mut names = Vec::with_capacity(placement.names.len());
            for (name, _) in &placement.names {
                match self.members.get(name) {
                    Some(members) => names.extend(members.iter().map(|m| (m.clone(), 1.0))),
                    None => names.push((name.clone(), 1.0)),
                }
            }
            placement.names = names;
        }
    }
}

/// Collapses aligned fragments with identical aligned sequences. The
/// first fragment of each group represents it; order is preserved.
pub fn cluster_identical(aligned: Vec<AlignedFragment>) -> (Vec<AlignedFragment>, ClusterMap) {
    let total = aligned.len();
    let mut groups: IndexMap<Vec<u8>, (AlignedFragment, Vec<String>)> = IndexMap::new();
    for fragment in aligned {
        match groups.get_mut(&fragment.aligned) {
            Some((_, members)) => members.push(fragment.name),
            None => {
                let name = fragment.name.clone();
                groups.insert(fragment.aligned.clone(), (fragment, vec![name]));
            }
        }
    }

    let mut representatives = Vec::with_capacity(groups.len());
    let mut members = AHashMap::with_capacity(groups.len());
    for (_, (rep, names)) in groups {
        members.insert(rep.name.clone(), names);
        representatives.push(rep);
    }
    log::debug!("Clustered {} aligned sequences into {}", total, representatives.len());
    (representatives, ClusterMap { members })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::Candidate;

    fn aligned(name: &str, seq: &str) -> AlignedFragment {
        AlignedFragment {
            name: name.to_string(),
            aligned: seq.as_bytes().to_vec(),
        }
    }

    #[test]
    fn identical_alignments_share_a_representative() {
        let (reps, map) = cluster_identical(vec![
            aligned("a_1_1_1", "AC-GT"),
            aligned("b_1_1_1", "TTTTT"),
            aligned("c_1_1_1", "AC-GT"),
        ]);
        let names: Vec<&str> = reps.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a_1_1_1", "b_1_1_1"]);
        assert_eq!(map.members_of("a_1_1_1").unwrap(), ["a_1_1_1", "c_1_1_1"]);
        assert_eq!(map.cluster_count(), 2);
    }

    #[test]
    fn expansion_lists_every_member_once() {
        let (_, map) = cluster_identical(vec![aligned("a", "AAA"), aligned("b", "AAA")]);
        let mut placements = vec![Placement {
            candidates: vec![Candidate::new("k__Bacteria", 1.0)],
            names: vec![("a".to_string(), 1.0)],
        }];
        map.expand(&mut placements);
        assert_eq!(
            placements[0].names,
            vec![("a".to_string(), 1.0), ("b".to_string(), 1.0)]
        );
    }
}
