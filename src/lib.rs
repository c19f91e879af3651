// src/lib.rs
pub mod aggregate;
pub mod backend;
pub mod cluster;
pub mod config;
pub mod error;
pub mod extract;
pub mod hit_table;
pub mod mates;
pub mod pipeline;
pub mod placement;
pub mod rollup;
pub mod seqio;
pub mod sequence;
pub mod taxonomy;
pub mod types;

use std::fmt::Write as FmtWrite;

use crate::aggregate::ConsensusTable;
use crate::backend::Backends;
use crate::config::GraftConfig;
use crate::error::{GraftError, Result};
use crate::pipeline::{Pipeline, SampleOutcome};
use crate::taxonomy::Taxonomy;

/// Results of one run. Structured data only; text is generated on demand.
#[derive(Debug)]
pub struct GraftResults {
    /// One entry per sample that completed, in input order
    pub samples: Vec<SampleOutcome>,

    /// Samples skipped under `FailurePolicy::SkipSample`, with their error
    pub failed: Vec<(String, GraftError)>,

    /// The combined table, absent when the run stopped after alignment
    pub table: Option<ConsensusTable>,
}

impl GraftResults {
    /// Combined count table text, if one was built
    pub fn count_table_text(&self) -> Option<String> {
        self.table.as_ref().and_then(|t| t.to_tsv_string().ok())
    }

    /// Per-sample summary, one tab-separated line per sample
    pub fn summary_text(&self) -> String {
        let mut output = String::new();
        output.push_str("sample\treads\treads_with_hits\tfragments\ttoo_short\tassigned\n");
        for s in &self.samples {
            let assigned = s.counts.as_ref().map(|c| c.total()).unwrap_or(0);
            let _ = writeln!(
                output,
                "{}\t{}\t{}\t{}\t{}\t{}",
                s.sample, s.reads, s.stats.reads_with_hits, s.fragments, s.stats.too_short, assigned
            );
        }
        for (sample, err) in &self.failed {
            let _ = writeln!(output, "{sample}\tFAILED: {err}");
        }
        output
    }
}

/// Runs `graft` end to end with the process-backed engines.
pub fn run_graft(config: &GraftConfig) -> Result<GraftResults> {
    // 1. Reject bad configurations before touching any input
    config.validate()?;

    // 2. Taxonomy, only needed once placements are rolled up
    let taxonomy = match (&config.package.taxonomy, config.search_and_align_only) {
        (Some(path), false) => Taxonomy::from_file(path)?,
        _ => Taxonomy::default(),
    };

    // 3. Engines, then the pipeline
    let backends = Backends::from_config(config)?;
    Pipeline::new(config, backends, taxonomy).run()
}
