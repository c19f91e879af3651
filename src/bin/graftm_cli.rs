use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

use graftm_rs::config::{
    hmm_alphabet, AssignmentMethod, FailurePolicy, GraftConfig, ReferencePackage, SearchMethod,
    DEFAULT_MAX_SAMPLES_FOR_KRONA,
};
use graftm_rs::error::{GraftError, Result};
use graftm_rs::extract::{DEFAULT_MERGE_DISTANCE, DEFAULT_MIN_ORF_LENGTH};
use graftm_rs::hit_table::DEFAULT_EVALUE;
use graftm_rs::run_graft;
use graftm_rs::types::SequenceType;

#[derive(Parser)]
#[command(
    name = "graftm-rs",
    version,
    about = "Find, place and count marker gene reads in metagenomes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search reads for a marker and build a per-sample lineage count table
    Graft(GraftArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchArg {
    Hmmsearch,
    Diamond,
}

#[derive(Clone, Copy, ValueEnum)]
enum AssignmentArg {
    Pplacer,
    Diamond,
}

#[derive(Clone, Copy, ValueEnum)]
enum SequenceTypeArg {
    Nucleotide,
    Aminoacid,
}

#[derive(Args)]
struct GraftArgs {
    /// Forward (or single-ended) read files, one sample each
    #[arg(long = "forward", num_args = 1.., required_unless_present = "interleaved")]
    forward: Vec<PathBuf>,

    /// Reverse read files, paired with --forward by position
    #[arg(long = "reverse", num_args = 1..)]
    reverse: Vec<PathBuf>,

    /// Interleaved paired read files
    #[arg(long = "interleaved", num_args = 1..)]
    interleaved: Vec<PathBuf>,

    /// Package directory holding CONTENTS.json
    #[arg(long = "graftm_package")]
    graftm_package: Option<PathBuf>,

    /// Search profiles, replacing the package's
    #[arg(long = "search_hmm_files", num_args = 1..)]
    search_hmm_files: Vec<PathBuf>,

    /// File listing search profiles, one per line
    #[arg(long = "search_hmm_list_file")]
    search_hmm_list_file: Option<PathBuf>,

    /// Profile used for alignment
    #[arg(long = "aln_hmm_file")]
    aln_hmm_file: Option<PathBuf>,

    /// Taxonomy file, replacing the package's
    #[arg(long = "taxonomy")]
    taxonomy: Option<PathBuf>,

    /// Placement reference package directory, replacing the package's
    #[arg(long = "refpkg")]
    refpkg: Option<PathBuf>,

    /// DIAMOND database, replacing the package's
    #[arg(long = "diamond_database")]
    diamond_database: Option<PathBuf>,

    #[arg(long = "output_directory")]
    output_directory: PathBuf,

    /// Overwrite the output directory if it exists
    #[arg(long)]
    force: bool,

    #[arg(long = "input_sequence_type", value_enum)]
    input_sequence_type: Option<SequenceTypeArg>,

    #[arg(long = "search_method", value_enum, default_value = "hmmsearch")]
    search_method: SearchArg,

    #[arg(long = "assignment_method", value_enum, default_value = "pplacer")]
    assignment_method: AssignmentArg,

    #[arg(long, default_value_t = DEFAULT_EVALUE)]
    evalue: f64,

    /// Minimum ORF length in nucleotides
    #[arg(long = "min_orf_length", default_value_t = DEFAULT_MIN_ORF_LENGTH)]
    min_orf_length: usize,

    /// Only use the first N bases of every read
    #[arg(long = "restrict_read_length")]
    restrict_read_length: Option<usize>,

    /// Hits closer than this many bases are merged
    #[arg(long = "merge_distance", default_value_t = DEFAULT_MERGE_DISTANCE)]
    merge_distance: usize,

    /// Drop extracted fragments shorter than this
    #[arg(long = "min_fragment_length", default_value_t = 0)]
    min_fragment_length: usize,

    /// Drop aligned sequences with fewer residues than this
    #[arg(long = "filter_minimum")]
    filter_minimum: Option<usize>,

    /// Reads matching this DIAMOND database at least as well are removed
    #[arg(long = "decoy_database")]
    decoy_database: Option<PathBuf>,

    /// Drop reads that score higher against a eukaryote profile
    #[arg(long = "euk_check", requires = "euk_hmm_file")]
    euk_check: bool,

    /// Nucleotide profile used by --euk_check
    #[arg(long = "euk_hmm_file")]
    euk_hmm_file: Option<PathBuf>,

    /// Stop after aligning the hits
    #[arg(long = "search_and_align_only")]
    search_and_align_only: bool,

    /// Build a secondary profile from hits in these contigs
    #[arg(long = "expand_search_contigs")]
    expand_search_contigs: Option<PathBuf>,

    #[arg(long = "max_samples_for_krona", default_value_t = DEFAULT_MAX_SAMPLES_FOR_KRONA)]
    max_samples_for_krona: usize,

    /// Keep going when a sample fails
    #[arg(long = "skip_failed_samples")]
    skip_failed_samples: bool,

    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// 1-2 errors, 3 warnings, 4 info, 5 debug
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=5))]
    verbosity: u8,
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        1 | 2 => LevelFilter::Error,
        3 => LevelFilter::Warn,
        4 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    // RUST_LOG wins when set
    builder.parse_env("RUST_LOG");
    builder.init();
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&format!("{{spinner:.{color}}} {{msg}}"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn load_package(args: &GraftArgs) -> Result<ReferencePackage> {
    let mut package = match &args.graftm_package {
        Some(dir) => ReferencePackage::load(dir)?,
        None => ReferencePackage {
            search_hmms: Vec::new(),
            aln_hmm: None,
            taxonomy: None,
            refpkg: None,
            diamond_database: None,
            sequence_type: SequenceType::Nucleotide,
        },
    };

    let mut search_hmms = args.search_hmm_files.clone();
    if let Some(list) = &args.search_hmm_list_file {
        search_hmms.extend(
            fs::read_to_string(list)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from),
        );
    }
    if !search_hmms.is_empty() {
        package.search_hmms = search_hmms;
    }
    if args.aln_hmm_file.is_some() {
        package.aln_hmm = args.aln_hmm_file.clone();
    }
    if args.taxonomy.is_some() {
        package.taxonomy = args.taxonomy.clone();
    }
    if args.refpkg.is_some() {
        package.refpkg = args.refpkg.clone();
    }
    if args.diamond_database.is_some() {
        package.diamond_database = args.diamond_database.clone();
    }

    // Without a package manifest the alphabet comes from the profiles
    if args.graftm_package.is_none() {
        let profile = package
            .aln_hmm
            .as_ref()
            .or(package.search_hmms.first())
            .ok_or_else(|| {
                GraftError::Config("give --graftm_package or --search_hmm_files".to_string())
            })?;
        package.sequence_type = hmm_alphabet(profile)?;
    }
    Ok(package)
}

fn build_config(args: GraftArgs) -> Result<GraftConfig> {
    let package = load_package(&args)?;
    let mut config = GraftConfig::new(package, args.output_directory);
    config.forward = args.forward;
    config.reverse = args.reverse;
    config.interleaved = args.interleaved;
    config.force = args.force;
    config.input_sequence_type = args.input_sequence_type.map(|t| match t {
        SequenceTypeArg::Nucleotide => SequenceType::Nucleotide,
        SequenceTypeArg::Aminoacid => SequenceType::Protein,
    });
    config.search_method = match args.search_method {
        SearchArg::Hmmsearch => SearchMethod::Hmmsearch,
        SearchArg::Diamond => SearchMethod::Diamond,
    };
    config.assignment_method = match args.assignment_method {
        AssignmentArg::Pplacer => AssignmentMethod::Pplacer,
        AssignmentArg::Diamond => AssignmentMethod::Diamond,
    };
    config.evalue = args.evalue;
    config.min_orf_length = args.min_orf_length;
    config.restrict_read_length = args.restrict_read_length;
    config.merge_distance = args.merge_distance;
    config.min_fragment_length = args.min_fragment_length;
    config.filter_minimum = args.filter_minimum;
    config.decoy_database = args.decoy_database;
    config.euk_hmm = args.euk_hmm_file.filter(|_| args.euk_check);
    config.search_and_align_only = args.search_and_align_only;
    config.expand_search_contigs = args.expand_search_contigs;
    config.max_samples_for_krona = args.max_samples_for_krona;
    config.failure_policy = if args.skip_failed_samples {
        FailurePolicy::SkipSample
    } else {
        FailurePolicy::AbortRun
    };
    config.threads = args.threads.max(1);
    Ok(config)
}

fn graft(args: GraftArgs) -> Result<()> {
    // 1. Configuration
    let config = build_config(args)?;
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
    {
        log::debug!("Keeping the existing thread pool: {e}");
    }

    // 2. Run
    let spinner = spinner("green", "Grafting reads...");
    let results = run_graft(&config);
    spinner.finish_and_clear();
    let results = results?;

    // 3. Report
    print!("{}", results.summary_text());
    match results.table {
        Some(_) => log::info!(
            "Count table written to {}",
            config
                .output_directory
                .join(graftm_rs::aggregate::COMBINED_COUNT_TABLE)
                .display()
        ),
        None => log::info!("No count table written"),
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let Commands::Graft(args) = cli.command;
    init_logger(args.verbosity);

    if let Err(e) = graft(args) {
        log::error!("{e}");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}
