// src/pipeline.rs

use std::fs;
use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;

use crate::aggregate::{ConsensusTable, COMBINED_COUNT_TABLE};
use crate::backend::{Backends, SearchBackend};
use crate::cluster::cluster_identical;
use crate::config::{FailurePolicy, GraftConfig};
use crate::error::{GraftError, Result};
use crate::extract::{extract_fragments, ExtractOptions, ExtractionStats};
use crate::hit_table::{HitFilter, HitTable};
use crate::mates::reconcile_mates;
use crate::placement::{placed_reads, placements_from_reads, write_jplace, Jplace, PlacedRead};
use crate::rollup::{rollup, LineageCounts};
use crate::seqio::{read_sequences, sample_name, split_interleaved, write_fasta};
use crate::sequence::guess_sequence_type;
use crate::taxonomy::Taxonomy;
use crate::types::{AlignedFragment, Fragment, MateRole, Read, SequenceType};
use crate::GraftResults;

pub const PLACEMENTS_FILE: &str = "placements.jplace";
pub const EXPAND_SEARCH_PROFILE: &str = "expand_search.hmm";
pub const KRONA_FILE: &str = "krona.html";

/// Where one sample's reads come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePlan {
    pub name: String,
    pub forward: PathBuf,
    pub reverse: Option<PathBuf>,
    pub interleaved: bool,
}

impl SamplePlan {
    pub fn is_paired(&self) -> bool {
        self.reverse.is_some() || self.interleaved
    }
}

/// Groups the input files into samples, in input order. Forward files pair
/// with reverse files by position; interleaved files follow.
pub fn plan_samples(config: &GraftConfig) -> Result<Vec<SamplePlan>> {
    let mut plans = Vec::with_capacity(config.forward.len() + config.interleaved.len());
    for (i, forward) in config.forward.iter().enumerate() {
        plans.push(SamplePlan {
            name: sample_name(forward),
            forward: forward.clone(),
            reverse: config.reverse.get(i).cloned(),
            interleaved: false,
        });
    }
    for path in &config.interleaved {
        plans.push(SamplePlan {
            name: sample_name(path),
            forward: path.clone(),
            reverse: None,
            interleaved: true,
        });
    }

    let mut seen = AHashSet::new();
    for plan in &plans {
        if !seen.insert(plan.name.as_str()) {
            return Err(GraftError::Config(format!(
                "two inputs share the sample name {}",
                plan.name
            )));
        }
    }
    Ok(plans)
}

/// What one sample produced.
#[derive(Debug, Clone, Default)]
pub struct SampleOutcome {
    pub sample: String,
    pub reads: usize,
    pub fragments: usize,
    pub stats: ExtractionStats,
    /// Absent in search-and-align-only runs.
    pub counts: Option<LineageCounts>,
}

/// Fragments of one mate file and the reads they came from.
struct MateExtraction {
    dir: PathBuf,
    fragments: Vec<Fragment>,
    stats: ExtractionStats,
}

pub struct Pipeline<'a> {
    config: &'a GraftConfig,
    backends: Backends,
    taxonomy: Taxonomy,
    expanded: Option<Box<dyn SearchBackend>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a GraftConfig, backends: Backends, taxonomy: Taxonomy) -> Self {
        Pipeline {
            config,
            backends,
            taxonomy,
            expanded: None,
        }
    }

    /// Runs every sample (in parallel) and builds the combined table from
    /// the ones that succeeded.
    pub fn run(&mut self) -> Result<GraftResults> {
        // 1. Output directory and sample layout
        self.config.prepare_output_directory()?;
        let plans = plan_samples(self.config)?;
        log::info!("Processing {} samples", plans.len());

        // 2. Optional secondary profile from contigs
        if let Some(contigs) = &self.config.expand_search_contigs {
            self.expanded = Some(self.expand_search(contigs)?);
        }

        // 3. Samples are independent until aggregation
        let this = &*self;
        let results: Vec<(String, Result<SampleOutcome>)> = plans
            .par_iter()
            .map(|plan| (plan.name.clone(), this.run_sample(plan)))
            .collect();

        let mut outcomes = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for (sample, result) in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => match self.config.failure_policy {
                    FailurePolicy::AbortRun => return Err(e.in_sample(&sample)),
                    FailurePolicy::SkipSample => {
                        log::warn!("Skipping sample {sample}: {e}");
                        failed.push((sample, e));
                    }
                },
            }
        }

        // 4. Search-only runs stop before the table
        if self.config.search_and_align_only {
            log::info!("Stopping after alignment as requested");
            return Ok(GraftResults {
                samples: outcomes,
                failed,
                table: None,
            });
        }

        // 5. Cross-sample aggregation, in input order
        let per_sample: Vec<LineageCounts> = outcomes.iter().filter_map(|o| o.counts.clone()).collect();
        let table = ConsensusTable::aggregate(&per_sample);
        table.write_tsv_file(self.config.output_directory.join(COMBINED_COUNT_TABLE))?;
        log::info!("Wrote {} lineages over {} samples", table.rows.len(), table.samples.len());

        // 6. Krona chart, unless there are too many samples
        self.render_krona(&table);

        Ok(GraftResults {
            samples: outcomes,
            failed,
            table: Some(table),
        })
    }

    fn render_krona(&self, table: &ConsensusTable) {
        let Some(krona) = &self.backends.krona else {
            return;
        };
        if table.samples.len() > self.config.max_samples_for_krona {
            log::info!(
                "Not creating a krona chart: {} samples is more than the limit of {}",
                table.samples.len(),
                self.config.max_samples_for_krona
            );
            return;
        }
        if let Err(e) = krona.render(table, &self.config.output_directory.join(KRONA_FILE)) {
            log::warn!("Krona chart was not created: {e}");
        }
    }

    /// Runs one sample from reads to lineage counts.
    pub fn run_sample(&self, plan: &SamplePlan) -> Result<SampleOutcome> {
        let sample_dir = self.config.output_directory.join(&plan.name);
        fs::create_dir_all(&sample_dir)?;

        // 1. Load reads, splitting pairs into mates
        let mates: Vec<(PathBuf, Vec<Read>)> = match (&plan.reverse, plan.interleaved) {
            (Some(reverse), _) => vec![
                (sample_dir.join("forward"), read_sequences(&plan.forward, MateRole::Forward)?),
                (sample_dir.join("reverse"), read_sequences(reverse, MateRole::Reverse)?),
            ],
            (None, true) => {
                let (fwd, rev) = split_interleaved(read_sequences(&plan.forward, MateRole::Single)?)?;
                vec![(sample_dir.join("forward"), fwd), (sample_dir.join("reverse"), rev)]
            }
            (None, false) => vec![(sample_dir.clone(), read_sequences(&plan.forward, MateRole::Single)?)],
        };
        let read_count: usize = mates.iter().map(|(_, r)| r.len()).sum();
        log::info!("Sample {}: {} reads", plan.name, read_count);

        let read_type = self.read_type(&mates[0].1)?;
        let translate =
            self.config.package.sequence_type == SequenceType::Protein && read_type == SequenceType::Nucleotide;

        // 2. Search and extract every mate
        let mut extractions = Vec::with_capacity(mates.len());
        let mut stats = ExtractionStats::default();
        for (dir, reads) in &mates {
            fs::create_dir_all(dir)?;
            let extraction = self.extract_mate(&plan.name, dir, reads, read_type, translate)?;
            stats.merge(&extraction.stats);
            extractions.push(extraction);
        }
        let fragment_count: usize = extractions.iter().map(|e| e.fragments.len()).sum();

        // 3. A threshold no read can pass is a misconfiguration
        if translate && stats.no_passing_orfs() {
            return Err(GraftError::NoOrfsFound {
                sample: plan.name.clone(),
                min_orf_length: self.config.min_orf_length,
            });
        }

        // 4. Align, place and reconcile
        let mut placed_per_mate = Vec::with_capacity(extractions.len());
        for extraction in &extractions {
            let write_placements = !plan.is_paired();
            placed_per_mate.push(self.align_and_place(&plan.name, extraction, write_placements)?);
        }

        let counts = if self.config.search_and_align_only {
            None
        } else {
            let placed = if plan.is_paired() {
                let mut mates = placed_per_mate.into_iter();
                let forward = mates.next().unwrap_or_default();
                let reverse = mates.next().unwrap_or_default();
                let reconciled = reconcile_mates(forward, reverse);
                let jplace = Jplace {
                    placements: placements_from_reads(&reconciled),
                    ..Jplace::default()
                };
                write_jplace(sample_dir.join(PLACEMENTS_FILE), &jplace)?;
                reconciled
            } else {
                placed_per_mate.into_iter().next().unwrap_or_default()
            };

            // 5. Roll up
            Some(rollup(&plan.name, &placed, &self.taxonomy))
        };

        Ok(SampleOutcome {
            sample: plan.name.clone(),
            reads: read_count,
            fragments: fragment_count,
            stats,
            counts,
        })
    }

    fn read_type(&self, reads: &[Read]) -> Result<SequenceType> {
        let read_type = self
            .config
            .input_sequence_type
            .unwrap_or_else(|| guess_sequence_type(reads));
        if read_type == SequenceType::Protein && self.config.package.sequence_type == SequenceType::Nucleotide {
            return Err(GraftError::Config(
                "protein reads cannot be searched against a nucleotide package".to_string(),
            ));
        }
        Ok(read_type)
    }

    fn extract_options(&self, translate: bool) -> ExtractOptions {
        ExtractOptions {
            max_read_length: self.config.restrict_read_length,
            merge_distance: self.config.merge_distance,
            min_fragment_length: self.config.min_fragment_length,
            translate,
            min_orf_length: self.config.min_orf_length,
        }
    }

    /// Searches one mate's reads, applies the decoy and extracts fragments.
    fn extract_mate(
        &self,
        sample: &str,
        dir: &Path,
        reads: &[Read],
        read_type: SequenceType,
        translate: bool,
    ) -> Result<MateExtraction> {
        let mut hits = self.backends.search.search(reads, read_type, dir)?;
        if let Some(expanded) = &self.expanded {
            hits.extend(expanded.search(reads, read_type, dir)?);
        }
        let filter = HitFilter {
            max_evalue: self.config.evalue,
            min_score: None,
        };
        let mut table = HitTable::from_hits(hits, &filter);

        // Screens compare each read's best hit against a competing search
        if !table.is_empty() && (self.backends.euk_check.is_some() || self.backends.decoy.is_some()) {
            let ids: AHashSet<&str> = table.read_ids().collect();
            let candidates: Vec<Read> = reads.iter().filter(|r| ids.contains(r.id.as_str())).cloned().collect();
            if let Some(euk) = &self.backends.euk_check {
                let euk_hits = euk.search(&candidates, read_type, dir)?;
                table.apply_euk_check(&euk_hits);
            }
            if let Some(screen) = &self.backends.decoy {
                let target_hits = screen.target.search(&candidates, read_type, dir)?;
                let decoy_hits = screen.decoy.search(&candidates, read_type, dir)?;
                table.apply_decoy(&target_hits, &decoy_hits);
            }
        }

        if translate {
            let lengths: AHashMap<String, usize> = reads.iter().map(|r| (r.id.clone(), r.len())).collect();
            table.assign_frames(&lengths);
        }
        let (fragments, stats) = extract_fragments(reads, &table, &self.extract_options(translate));
        log::info!(
            "Sample {}: {} reads with hits, {} fragments",
            sample,
            table.len(),
            fragments.len()
        );

        if !fragments.is_empty() {
            write_fasta(
                dir.join(format!("{sample}_hits.fa")),
                fragments
                    .iter()
                    .map(|f| (format!("{} {}", f.name(), f.provenance.read_id), f.bases.as_slice())),
            )?;
        }
        if translate {
            write_fasta(
                dir.join(format!("{sample}_orf.fa")),
                fragments
                    .iter()
                    .filter_map(|f| f.protein.as_deref().map(|p| (f.name(), p))),
            )?;
        }

        Ok(MateExtraction {
            dir: dir.to_path_buf(),
            fragments,
            stats,
        })
    }

    /// Aligns fragments and, unless stopping after alignment, places them.
    fn align_and_place(
        &self,
        sample: &str,
        extraction: &MateExtraction,
        write_placements: bool,
    ) -> Result<Vec<PlacedRead>> {
        let dir = &extraction.dir;
        let sequences: Vec<(String, Vec<u8>)> = extraction
            .fragments
            .iter()
            .map(|f| (f.name(), f.search_sequence().to_vec()))
            .collect();
        let mut aligned = self.backends.align.align(&sequences, dir)?;

        if let Some(min) = self.config.filter_minimum {
            let before = aligned.len();
            aligned.retain(|a| a.residue_count() >= min);
            log::debug!("Dropped {} alignments with fewer than {} residues", before - aligned.len(), min);
        }
        write_aligned(&dir.join(format!("{sample}_hits.aln.fa")), &aligned)?;

        if self.config.search_and_align_only {
            return Ok(Vec::new());
        }

        let (representatives, clusters) = cluster_identical(aligned);
        let mut jplace = if representatives.is_empty() {
            Jplace::default()
        } else {
            self.backends.place.place(&representatives, dir)?
        };
        clusters.expand(&mut jplace.placements);
        if write_placements {
            write_jplace(dir.join(PLACEMENTS_FILE), &jplace)?;
        }

        let read_of: AHashMap<String, String> = extraction
            .fragments
            .iter()
            .map(|f| (f.name(), f.provenance.read_id.clone()))
            .collect();
        Ok(placed_reads(&jplace, &read_of))
    }

    /// Finds the marker in contigs and builds a secondary profile from it.
    fn expand_search(&self, contigs: &Path) -> Result<Box<dyn SearchBackend>> {
        let builder = self.backends.profile_builder.as_ref().ok_or_else(|| {
            GraftError::Config("expanded search needs a profile builder".to_string())
        })?;
        let work_dir = self.config.output_directory.join("expand_search");
        fs::create_dir_all(&work_dir)?;

        let reads = read_sequences(contigs, MateRole::Single)?;
        let read_type = self.read_type(&reads)?;
        let translate =
            self.config.package.sequence_type == SequenceType::Protein && read_type == SequenceType::Nucleotide;
        let extraction = self.extract_mate("expand_search", &work_dir, &reads, read_type, translate)?;
        let sequences: Vec<(String, Vec<u8>)> = extraction
            .fragments
            .iter()
            .map(|f| (f.name(), f.search_sequence().to_vec()))
            .collect();
        let aligned = self.backends.align.align(&sequences, &work_dir)?;
        if aligned.is_empty() {
            return Err(GraftError::Config(format!(
                "no hits found in expand search contigs {}",
                contigs.display()
            )));
        }
        log::info!("Expanding the search with {} contig fragments", aligned.len());
        builder.build(&aligned, &self.config.output_directory.join(EXPAND_SEARCH_PROFILE))
    }
}

fn write_aligned(path: &Path, aligned: &[AlignedFragment]) -> Result<()> {
    write_fasta(path, aligned.iter().map(|a| (a.name.as_str(), a.aligned.as_slice())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AlignBackend, DecoyScreen, PlacementBackend, ProfileBuilder};
    use crate::config::ReferencePackage;
    use crate::error::NO_ORFS_EXIT_CODE;
    use crate::placement::{read_jplace_file, Candidate, Placement};
    use crate::taxonomy::Lineage;
    use crate::types::HitInterval;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Reports a fixed hit for every read whose id is listed.
    struct MockSearch {
        hits: Vec<(&'static str, usize, usize, f64)>,
        fail_on: Option<&'static str>,
    }

    impl SearchBackend for MockSearch {
        fn name(&self) -> &str {
            "mock"
        }

        fn search(&self, reads: &[Read], _: SequenceType, _: &Path) -> Result<Vec<HitInterval>> {
            if let Some(bad) = self.fail_on {
                if reads.iter().any(|r| r.id == bad) {
                    return Err(GraftError::ExternalTool {
                        tool: "mock".to_string(),
                        status: Some(5),
                        stderr: "crashed".to_string(),
                    });
                }
            }
            Ok(reads
                .iter()
                .flat_map(|r| {
                    self.hits
                        .iter()
                        .filter(move |(id, ..)| *id == r.id)
                        .map(|&(id, from, to, score)| HitInterval::from_raw(id, from, to, score, 1e-30))
                })
                .collect())
        }
    }

    /// Aligns by upper-casing; every row keeps its own width.
    struct MockAlign;

    impl AlignBackend for MockAlign {
        fn align(&self, sequences: &[(String, Vec<u8>)], _: &Path) -> Result<Vec<AlignedFragment>> {
            Ok(sequences
                .iter()
                .map(|(n, s)| AlignedFragment::from_aligner_row(n, &s.to_ascii_uppercase()))
                .collect())
        }
    }

    /// Places by fragment name prefix and records how many sequences it saw.
    struct MockPlace {
        rules: Vec<(&'static str, Vec<(&'static str, f64)>)>,
        seen: Arc<Mutex<usize>>,
    }

    impl MockPlace {
        fn new(rules: Vec<(&'static str, Vec<(&'static str, f64)>)>) -> Self {
            MockPlace {
                rules,
                seen: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl PlacementBackend for MockPlace {
        fn place(&self, aligned: &[AlignedFragment], _: &Path) -> Result<Jplace> {
            *self.seen.lock().unwrap() += aligned.len();
            let placements = aligned
                .iter()
                .filter_map(|a| {
                    let (_, candidates) = self.rules.iter().find(|(p, _)| a.name.starts_with(p))?;
                    Some(Placement {
                        candidates: candidates.iter().map(|&(c, w)| Candidate::new(c, w)).collect(),
                        names: vec![(a.name.clone(), 1.0)],
                    })
                })
                .collect();
            Ok(Jplace {
                placements,
                ..Jplace::default()
            })
        }
    }

    struct MockBuilder;

    impl ProfileBuilder for MockBuilder {
        fn build(&self, _: &[AlignedFragment], path: &Path) -> Result<Box<dyn SearchBackend>> {
            fs::write(path, "HMMER3/f\n")?;
            Ok(Box::new(MockSearch {
                hits: vec![("novel", 1, 240, 90.0)],
                fail_on: None,
            }))
        }
    }

    fn bases(n: usize) -> Vec<u8> {
        b"ACGGTCATTGCA".iter().copied().cycle().take(n).collect()
    }

    fn write_reads(path: &Path, ids: &[&str]) {
        let seq = bases(300);
        write_fasta(path, ids.iter().map(|id| (*id, seq.as_slice()))).unwrap();
    }

    fn package(sequence_type: SequenceType) -> ReferencePackage {
        ReferencePackage {
            search_hmms: vec![PathBuf::from("marker.hmm")],
            aln_hmm: None,
            taxonomy: Some(PathBuf::from("taxonomy.tsv")),
            refpkg: Some(PathBuf::from("marker.refpkg")),
            diamond_database: None,
            sequence_type,
        }
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_lineages([
            ("bact", Lineage::parse("k__Bacteria")),
            (
                "msarcina",
                Lineage::parse("mcrA; Euryarchaeota_mcrA; Methanomicrobia; Methanosarcinales; Methanosarcina"),
            ),
            (
                "msaeta",
                Lineage::parse("mcrA; Euryarchaeota_mcrA; Methanomicrobia; Methanosarcinales; Methanosaeta"),
            ),
        ])
    }

    fn backends(search: MockSearch, place: MockPlace) -> Backends {
        Backends {
            search: Box::new(search),
            decoy: None,
            euk_check: None,
            align: Box::new(MockAlign),
            place: Box::new(place),
            profile_builder: None,
            krona: None,
        }
    }

    fn table_text(dir: &Path) -> String {
        fs::read_to_string(dir.join(COMBINED_COUNT_TABLE)).unwrap()
    }

    #[test]
    fn single_read_single_lineage() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("16S_1.fa");
        write_reads(&input, &["read1"]);

        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![input];
        let search = MockSearch {
            hits: vec![("read1", 20, 260, 150.0)],
            fail_on: None,
        };
        let place = MockPlace::new(vec![("read1", vec![("bact", 1.0)])]);
        let results = Pipeline::new(&config, backends(search, place), taxonomy()).run().unwrap();

        assert_eq!(
            table_text(&config.output_directory),
            "#ID\t16S_1\tConsensusLineage\n1\t1\tRoot; k__Bacteria\n"
        );
        let sample_dir = config.output_directory.join("16S_1");
        let hits = fs::read_to_string(sample_dir.join("16S_1_hits.fa")).unwrap();
        assert!(hits.starts_with(">read1_1_1_1 read1\n"));
        assert!(sample_dir.join("16S_1_hits.aln.fa").exists());
        let jplace = read_jplace_file(sample_dir.join(PLACEMENTS_FILE)).unwrap();
        assert_eq!(jplace.placements[0].names, vec![("read1_1_1_1".to_string(), 1.0)]);
        assert_eq!(results.samples[0].fragments, 1);
    }

    #[test]
    fn two_samples_share_one_row() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("mcrA_1.fa");
        let b = tmp.path().join("mcrA_2.fa");
        write_reads(&a, &["a1", "a2"]);
        write_reads(&b, &["b1", "b2", "b3"]);

        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![a, b];
        let search = MockSearch {
            hits: ["a1", "a2", "b1", "b2", "b3"].iter().map(|&id| (id, 1, 240, 80.0)).collect(),
            fail_on: None,
        };
        let place = MockPlace::new(vec![("a", vec![("msarcina", 1.0)]), ("b", vec![("msarcina", 1.0)])]);
        let results = Pipeline::new(&config, backends(search, place), taxonomy()).run().unwrap();

        assert_eq!(
            table_text(&config.output_directory),
            "#ID\tmcrA_1\tmcrA_2\tConsensusLineage\n\
             1\t2\t3\tRoot; mcrA; Euryarchaeota_mcrA; Methanomicrobia; Methanosarcinales; Methanosarcina\n"
        );
        assert_eq!(results.table.unwrap().rows.len(), 1);
    }

    #[test]
    fn unreachable_orf_length_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("mcrA.fa");
        write_reads(&input, &["contig"]);

        let mut config = GraftConfig::new(package(SequenceType::Protein), tmp.path().join("out"));
        config.forward = vec![input];
        config.min_orf_length = 10_000;
        let search = MockSearch {
            hits: vec![("contig", 1, 300, 200.0)],
            fail_on: None,
        };
        let place = MockPlace::new(vec![("contig", vec![("msarcina", 1.0)])]);
        let err = Pipeline::new(&config, backends(search, place), taxonomy()).run().unwrap_err();
        assert_eq!(err.exit_code(), NO_ORFS_EXIT_CODE);
        assert!(!config.output_directory.join(COMBINED_COUNT_TABLE).exists());
    }

    fn paired_counts(forward: &str, reverse: &str, rules: Vec<(&'static str, Vec<(&'static str, f64)>)>) -> Vec<(String, u64)> {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join(format!("{forward}.fa"));
        let r = tmp.path().join(format!("{reverse}.fa"));
        let mate = if forward == "mates_a" { "1" } else { "2" };
        let other = if mate == "1" { "2" } else { "1" };
        write_reads(&f, &[format!("pair/{mate}").as_str()]);
        write_reads(&r, &[format!("pair/{other}").as_str()]);

        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![f];
        config.reverse = vec![r];
        let search = MockSearch {
            hits: vec![("pair/1", 10, 250, 100.0), ("pair/2", 10, 250, 100.0)],
            fail_on: None,
        };
        let place = MockPlace::new(rules);
        let results = Pipeline::new(&config, backends(search, place), taxonomy()).run().unwrap();
        let sample_dir = config.output_directory.join(forward);
        assert!(sample_dir.join("forward").join(format!("{forward}_hits.fa")).exists());
        assert!(sample_dir.join(PLACEMENTS_FILE).exists());
        results.samples[0]
            .counts
            .as_ref()
            .unwrap()
            .counts
            .iter()
            .map(|(l, &n)| (l.to_string(), n))
            .collect()
    }

    #[test]
    fn identical_mates_count_once() {
        let counts = paired_counts(
            "mates_a",
            "mates_b",
            vec![("pair", vec![("bact", 1.0)])],
        );
        assert_eq!(counts, vec![("Root; k__Bacteria".to_string(), 1)]);
    }

    #[test]
    fn mate_reconciliation_ignores_file_labels() {
        let rules = || {
            vec![
                ("pair/1", vec![("msarcina", 0.9), ("msaeta", 0.1)]),
                ("pair/2", vec![("msaeta", 0.6), ("bact", 0.4)]),
            ]
        };
        let ab = paired_counts("mates_a", "mates_b", rules());
        let ba = paired_counts("mates_b", "mates_a", rules());
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 1);
        assert!(ab[0].0.ends_with("Methanosarcina"));
    }

    #[test]
    fn search_only_runs_write_no_table() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("s.fa");
        write_reads(&input, &["r1"]);
        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![input];
        config.search_and_align_only = true;
        let search = MockSearch {
            hits: vec![("r1", 1, 200, 50.0)],
            fail_on: None,
        };
        let place = MockPlace::new(Vec::new());
        let results = Pipeline::new(&config, backends(search, place), taxonomy()).run().unwrap();
        assert!(results.table.is_none());
        assert!(config.output_directory.join("s").join("s_hits.aln.fa").exists());
        assert!(!config.output_directory.join(COMBINED_COUNT_TABLE).exists());
    }

    #[test]
    fn failure_policy_decides_between_abort_and_skip() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.fa");
        let bad = tmp.path().join("bad.fa");
        write_reads(&good, &["g1"]);
        write_reads(&bad, &["boom"]);
        let search = || MockSearch {
            hits: vec![("g1", 1, 200, 50.0)],
            fail_on: Some("boom"),
        };
        let place = || MockPlace::new(vec![("g1", vec![("bact", 1.0)])]);

        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![good, bad];
        let err = Pipeline::new(&config, backends(search(), place()), taxonomy()).run().unwrap_err();
        assert_eq!(err.exit_code(), 5);

        config.force = true;
        config.failure_policy = FailurePolicy::SkipSample;
        let results = Pipeline::new(&config, backends(search(), place()), taxonomy()).run().unwrap();
        assert_eq!(results.failed.len(), 1);
        assert_eq!(
            table_text(&config.output_directory),
            "#ID\tgood\tConsensusLineage\n1\t1\tRoot; k__Bacteria\n"
        );
    }

    #[test]
    fn duplicate_fragments_are_placed_once() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("dups.fa");
        write_reads(&input, &["d1", "d2"]);
        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![input];
        let search = MockSearch {
            hits: vec![("d1", 5, 205, 60.0), ("d2", 5, 205, 60.0)],
            fail_on: None,
        };
        let place = MockPlace::new(vec![("d", vec![("bact", 1.0)])]);
        let seen = Arc::clone(&place.seen);
        Pipeline::new(&config, backends(search, place), taxonomy()).run().unwrap();

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(
            table_text(&config.output_directory),
            "#ID\tdups\tConsensusLineage\n1\t2\tRoot; k__Bacteria\n"
        );
        let jplace = read_jplace_file(config.output_directory.join("dups").join(PLACEMENTS_FILE)).unwrap();
        assert_eq!(jplace.placements[0].names.len(), 2);
    }

    #[test]
    fn decoy_is_weighed_against_the_target_database() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("decoyed.fa");
        write_reads(&input, &["keep", "drop"]);
        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![input];
        // profile scores sit below both decoy scores
        let search = MockSearch {
            hits: vec![("keep", 1, 200, 40.0), ("drop", 1, 200, 40.0)],
            fail_on: None,
        };
        let mut b = backends(search, MockPlace::new(vec![("keep", vec![("bact", 1.0)]), ("drop", vec![("msaeta", 1.0)])]));
        b.decoy = Some(DecoyScreen {
            target: Box::new(MockSearch {
                hits: vec![("keep", 1, 200, 200.0), ("drop", 1, 200, 30.0)],
                fail_on: None,
            }),
            decoy: Box::new(MockSearch {
                hits: vec![("keep", 1, 200, 45.0), ("drop", 1, 200, 45.0)],
                fail_on: None,
            }),
        });
        let results = Pipeline::new(&config, b, taxonomy()).run().unwrap();
        assert_eq!(results.samples[0].fragments, 1);
        assert_eq!(
            table_text(&config.output_directory),
            "#ID\tdecoyed\tConsensusLineage\n1\t1\tRoot; k__Bacteria\n"
        );
    }

    #[test]
    fn euk_check_drops_reads_that_look_eukaryotic() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("mixed.fa");
        write_reads(&input, &["euk1", "euk2", "bac1", "bac2"]);
        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![input];
        let search = MockSearch {
            hits: ["euk1", "euk2", "bac1", "bac2"].iter().map(|&id| (id, 1, 250, 60.0)).collect(),
            fail_on: None,
        };
        let mut b = backends(search, MockPlace::new(vec![("euk", vec![("msaeta", 1.0)]), ("bac", vec![("bact", 1.0)])]));
        b.euk_check = Some(Box::new(MockSearch {
            hits: vec![("euk1", 1, 250, 150.0), ("euk2", 1, 250, 90.0), ("bac1", 1, 250, 20.0)],
            fail_on: None,
        }));
        let results = Pipeline::new(&config, b, taxonomy()).run().unwrap();
        assert_eq!(results.samples[0].stats.reads_with_hits, 2);
        assert_eq!(
            table_text(&config.output_directory),
            "#ID\tmixed\tConsensusLineage\n1\t2\tRoot; k__Bacteria\n"
        );
    }

    #[test]
    fn paired_placements_name_the_placed_fragment() {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join("pe_1.fa");
        let r = tmp.path().join("pe_2.fa");
        write_reads(&f, &["mcra/1"]);
        write_reads(&r, &["mcra/2"]);
        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![f];
        config.reverse = vec![r];
        let search = MockSearch {
            hits: vec![("mcra/1", 10, 250, 100.0)],
            fail_on: None,
        };
        let place = MockPlace::new(vec![("mcra", vec![("bact", 1.0)])]);
        Pipeline::new(&config, backends(search, place), taxonomy()).run().unwrap();
        let jplace = read_jplace_file(config.output_directory.join("pe_1").join(PLACEMENTS_FILE)).unwrap();
        assert_eq!(jplace.placements[0].names, vec![("mcra/1_1_1_1".to_string(), 1.0)]);
    }

    #[test]
    fn expanded_search_adds_hits_from_the_built_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let contigs = tmp.path().join("contigs.fa");
        let input = tmp.path().join("reads.fa");
        write_reads(&contigs, &["c1"]);
        write_reads(&input, &["known", "novel"]);
        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), tmp.path().join("out"));
        config.forward = vec![input];
        config.expand_search_contigs = Some(contigs);
        let search = MockSearch {
            hits: vec![("c1", 1, 250, 70.0), ("known", 1, 250, 70.0)],
            fail_on: None,
        };
        let mut b = backends(
            search,
            MockPlace::new(vec![("known", vec![("bact", 1.0)]), ("novel", vec![("bact", 1.0)])]),
        );
        b.profile_builder = Some(Box::new(MockBuilder));
        Pipeline::new(&config, b, taxonomy()).run().unwrap();
        assert!(config.output_directory.join(EXPAND_SEARCH_PROFILE).exists());
        assert_eq!(
            table_text(&config.output_directory),
            "#ID\treads\tConsensusLineage\n1\t2\tRoot; k__Bacteria\n"
        );
    }

    #[test]
    fn samples_are_planned_in_input_order() {
        let mut config = GraftConfig::new(package(SequenceType::Nucleotide), PathBuf::from("out"));
        config.forward = vec![PathBuf::from("x/b.fq.gz"), PathBuf::from("a.fa")];
        config.reverse = vec![PathBuf::from("x/b_R2.fq.gz"), PathBuf::from("a_R2.fa")];
        config.interleaved = vec![PathBuf::from("c.fa")];
        let plans = plan_samples(&config).unwrap();
        let names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["b", "a", "c"]);
        assert!(plans.iter().all(SamplePlan::is_paired));

        config.interleaved = vec![PathBuf::from("other/a.fa")];
        assert!(plan_samples(&config).is_err());
    }
}
