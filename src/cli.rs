
use clap::Parser;
use chrono::Datelike;
use flate2::bufread::MultiGzDecoder;
use lazy_static::lazy_static;
use log::{error, info, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

lazy_static! {
    /// Stores the full version string we plan to use.
    pub static ref FULL_VERSION: String = env!("CARGO_PKG_VERSION").to_string();
}

#[derive(Clone, Parser)]
#[clap(author,
    version = &**FULL_VERSION,
    about,
    after_help = format!("Copyright (C) 2004-{}     Pacific Biosciences of California, Inc.
This program comes with ABSOLUTELY NO WARRANTY; it is intended for
Research Use Only and not for use in diagnostic procedures.", chrono::Utc::now().year()))]
pub struct Settings {
    /// Input variation graph in JSON format (.json or .json.gz).
    #[clap(required = true)]
    #[clap(short = 'g')]
    #[clap(long = "graph")]
    #[clap(value_name = "GRAPH")]
    #[clap(help_heading = Some("Input/Output"))]
    pub graph_filename: PathBuf,

    /// Input read alignments in JSON-lines format (.json or .json.gz), threaded through the graph.
    #[clap(required = true)]
    #[clap(short = 'a')]
    #[clap(long = "alignments")]
    #[clap(value_name = "READS")]
    #[clap(help_heading = Some("Input/Output"))]
    pub alignment_filename: PathBuf,

    /// Output file (default: stdout).
    #[clap(short = 'o')]
    #[clap(long = "output")]
    #[clap(value_name = "FILE")]
    #[clap(help_heading = Some("Input/Output"))]
    pub output_filename: Option<PathBuf>,

    /// Emit loci as JSON, one record per line
    #[clap(short = 'j')]
    #[clap(long = "json")]
    #[clap(conflicts_with = "output_vcf")]
    #[clap(help_heading = Some("Input/Output"))]
    pub output_json: bool,

    /// Emit VCF records against the reference path
    #[clap(short = 'v')]
    #[clap(long = "vcf")]
    #[clap(help_heading = Some("Input/Output"))]
    pub output_vcf: bool,

    /// Name of the embedded reference path (default: the only path, else "ref")
    #[clap(long = "ref-path")]
    #[clap(value_name = "NAME")]
    #[clap(help_heading = Some("Reference"))]
    pub ref_path_name: Option<String>,

    /// Sample name for the output genotype column
    #[clap(short = 's')]
    #[clap(long = "sample")]
    #[clap(value_name = "SAMPLE")]
    #[clap(default_value = "SAMPLE")]
    #[clap(help_heading = Some("Reference"))]
    pub sample_name: String,

    /// Contig name to report instead of the reference path name
    #[clap(long = "contig")]
    #[clap(value_name = "NAME")]
    #[clap(help_heading = Some("Reference"))]
    pub contig_name: Option<String>,

    /// Offset added to all reported variant positions
    #[clap(long = "variant-offset")]
    #[clap(value_name = "OFFSET")]
    #[clap(default_value = "0")]
    #[clap(help_heading = Some("Reference"))]
    pub variant_offset: i64,

    /// Maximum reversed-sequence length to replicate while unfolding the graph
    #[clap(long = "unfold-max-length")]
    #[clap(value_name = "LENGTH")]
    #[clap(default_value = "200")]
    #[clap(help_heading = Some("Site Finding"))]
    pub unfold_max_length: usize,

    /// Number of cycle-unroll steps when converting the graph to a DAG
    #[clap(long = "dagify-steps")]
    #[clap(value_name = "STEPS")]
    #[clap(default_value = "1")]
    #[clap(help_heading = Some("Site Finding"))]
    pub dagify_steps: usize,

    /// Use the cactus bubble tree site finder instead of plain superbubbles
    #[clap(long = "cactus")]
    #[clap(help_heading = Some("Site Finding"))]
    pub use_cactus: bool,

    /// Maximum embedded-path steps to walk when enumerating site alleles
    #[clap(long = "max-path-search-steps")]
    #[clap(value_name = "STEPS")]
    #[clap(default_value = "100")]
    #[clap(help_heading = Some("Genotyping"))]
    pub max_path_search_steps: usize,

    /// Minimum distinct observations required to keep an allele
    #[clap(long = "min-recurrence")]
    #[clap(value_name = "COUNT")]
    #[clap(default_value = "2")]
    #[clap(help_heading = Some("Genotyping"))]
    pub min_recurrence: usize,

    /// Per-site prior probability of a heterozygous genotype
    #[clap(long = "het-prior")]
    #[clap(value_name = "PROB")]
    #[clap(default_value = "0.001")]
    #[clap(help_heading = Some("Genotyping"))]
    pub het_prior: f64,

    /// Phred base quality assumed for reads without quality strings
    #[clap(long = "default-base-quality")]
    #[clap(value_name = "QUAL")]
    #[clap(default_value = "15")]
    #[clap(help_heading = Some("Genotyping"))]
    pub default_base_quality: u8,

    /// Fold mapping quality into the probability that a read is wrong
    #[clap(long = "use-mapq")]
    #[clap(help_heading = Some("Genotyping"))]
    pub use_mapq: bool,

    /// Score reads against alleles by realignment identity instead of the fast rules
    #[clap(long = "realign")]
    #[clap(help_heading = Some("Genotyping"))]
    pub realign: bool,

    /// Number of threads to use for genotyping.
    #[clap(short = 't')]
    #[clap(long = "threads")]
    #[clap(value_name = "THREADS")]
    #[clap(default_value = "1")]
    pub threads: usize,

    /// Enable verbose output.
    #[clap(long = "verbose")]
    #[clap(action = clap::ArgAction::Count)]
    pub verbosity: u8
}

/// Checks if a file exists and will otherwise exit
/// # Arguments
/// * `filename` - the file path to check for
/// * `label` - the label to use for error messages
fn check_required_filename(filename: &Path, label: &str) {
    if !filename.exists() {
        error!("{} does not exist: \"{}\"", label, filename.display());
        std::process::exit(exitcode::NOINPUT);
    } else {
        info!("{}: \"{}\"", label, filename.display());
    }
}

/// Checks that a .gz input really is gzipped by reading a little bit of it,
/// exiting on failure.
/// # Arguments
/// * `filename` - the input file path to check
fn check_gzip_readable(filename: &Path) {
    if filename.extension().unwrap_or_default() != "gz" {
        return;
    }
    let file: File = File::open(filename).unwrap();
    let file_reader = BufReader::new(file);
    let mut gz_decoder = MultiGzDecoder::new(file_reader);
    let mut small_buffer: [u8; 10] = [0; 10];
    if let Err(e) = gz_decoder.read(&mut small_buffer) {
        error!("Error while checking {filename:?}: {e}");
        std::process::exit(exitcode::IOERR);
    }
}

pub fn get_raw_settings() -> Settings {
    Settings::parse()
}

/// Do some additional checks here, we may increase these as we go.
/// Also can modify settings if needed since we're passing it around.
/// # Arguments
/// * `settings` - the raw settings, nothing has been checked other than what clap does for us.
pub fn check_settings(mut settings: Settings) -> Settings {
    // check for our required files
    check_required_filename(&settings.graph_filename, "Graph file");
    check_required_filename(&settings.alignment_filename, "Alignment file");
    check_gzip_readable(&settings.graph_filename);
    check_gzip_readable(&settings.alignment_filename);

    if !(settings.het_prior > 0.0 && settings.het_prior < 1.0) {
        error!("Heterozygous prior must be strictly between 0 and 1, got {}", settings.het_prior);
        std::process::exit(exitcode::USAGE);
    }

    // 0 doesn't make sense, so lets just error proof these up to 1
    if settings.min_recurrence == 0 {
        settings.min_recurrence = 1;
    }
    if settings.threads == 0 {
        settings.threads = 1;
    }

    // dump stuff to the logger
    info!("Output mode: {}", if settings.output_vcf {
        "VCF"
    } else if settings.output_json {
        "JSON loci"
    } else {
        "framed binary loci"
    });
    info!("Site finder: {}", if settings.use_cactus { "cactus bubble tree" } else { "superbubbles" });
    info!("Unfold max length: {}", settings.unfold_max_length);
    info!("Dagify steps: {}", settings.dagify_steps);
    info!("Max path search steps: {}", settings.max_path_search_steps);
    info!("Minimum allele recurrence: {}", settings.min_recurrence);
    info!("Heterozygous prior: {}", settings.het_prior);
    info!("Default base quality: {}", settings.default_base_quality);
    info!("Mapping quality: {}", if settings.use_mapq { "ENABLED" } else { "DISABLED" });
    info!("Affinity scoring: {}", if settings.realign { "realignment identity" } else { "fast consistency" });
    if settings.realign && settings.use_mapq {
        warn!("Realignment scoring with mapping qualities has not been tested.");
    }
    info!("Processing threads: {}", settings.threads);

    // send the settings back
    settings
}
