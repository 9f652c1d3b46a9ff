//! Command-line argument definitions for the gambit CLI.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::kmers::DEFAULT_K;

#[derive(Parser)]
#[command(name = "gambit")]
#[command(version)]
#[command(about = "Rapid taxonomic identification of microbial pathogens from genome assemblies")]
#[command(
    long_about = "Gambit: taxonomic identification of bacterial genome assemblies by comparing \
compact k-mer signatures against a curated reference database.

WORKFLOW:
  1. Obtain a reference database (a directory with one .gdb and one .gs file)
  2. Identify assemblies:   gambit query -d db/ genome1.fasta genome2.fasta

INPUT FORMATS:
  FASTA (.fa, .fasta, .fna), optionally gzipped (.gz). A pre-computed
  signature file (.gs) can be queried directly with --sigfile.

OUTPUT FORMAT (query):
  One row/record per query. CSV columns: query, predicted.{name,rank,ncbi_id,
  threshold}, closest.{distance,description}, next.{name,rank,ncbi_id,
  threshold}. The predicted taxon is empty when no reference was close
  enough for a confident call."
)]
#[command(after_help = "EXAMPLES:
  # Identify assemblies against a database, CSV to stdout
  gambit query -d refs-db/ sample1.fasta sample2.fasta.gz

  # Database from the environment, JSON to a file
  export GAMBIT_DB_PATH=refs-db/
  gambit query -f json -o results.json sample.fasta

  # Query a pre-computed signature file
  gambit query -d refs-db/ -s queries.gs

  # Compute signatures once, reuse for many queries
  gambit signatures create -o queries.gs -k 11 -p ATGAC sample1.fasta sample2.fasta")]
pub struct Cli {
    /// Increase verbosity (-v progress, -vv debug); output goes to stderr
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict taxonomy of genome assemblies
    Query(QueryArgs),

    /// Signature file operations
    #[command(subcommand)]
    Signatures(SignaturesCommands),
}

#[derive(clap::Args)]
pub struct QueryArgs {
    /// Query genome files (FASTA, optionally gzipped)
    pub genomes: Vec<PathBuf>,

    /// File listing paths of query genomes, one per line
    #[arg(short = 'l', long)]
    pub listfile: Option<PathBuf>,

    /// Signature file to query in place of genome files
    #[arg(short = 's', long)]
    pub sigfile: Option<PathBuf>,

    /// Reference database directory (defaults to $GAMBIT_DB_PATH)
    #[arg(short = 'd', long)]
    pub db: Option<PathBuf>,

    /// Output file; stdout if omitted. A .gz suffix enables gzip
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Csv)]
    pub outfmt: OutputFormat,

    /// Reconcile all significant reference matches instead of only the
    /// closest one
    #[arg(long, hide = true)]
    pub strict: bool,

    /// Number of worker threads (default: all hardware threads)
    #[arg(short = 'c', long)]
    pub cores: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

#[derive(Subcommand)]
pub enum SignaturesCommands {
    /// Compute signatures of genome files and write a signature file
    #[command(after_help = "EXAMPLES:
  # Standard parameters, ids from file stems
  gambit signatures create -o out.gs genome1.fasta genome2.fasta

  # Custom k-mer spec and attached metadata
  gambit signatures create -o out.gs -k 13 -p ATG -m meta.json -l genomes.txt")]
    Create {
        /// Output signature file path
        #[arg(short, long)]
        output: PathBuf,

        /// Genome files to compute signatures of
        genomes: Vec<PathBuf>,

        /// File listing paths of genome files, one per line
        #[arg(short = 'l', long)]
        listfile: Option<PathBuf>,

        /// K-mer length (1-32)
        #[arg(short = 'k', long, default_value_t = DEFAULT_K)]
        k: usize,

        /// Anchoring prefix (ACGT)
        #[arg(short = 'p', long, default_value = "ATGAC")]
        prefix: String,

        /// JSON file with metadata to embed in the signature file
        #[arg(short = 'm', long)]
        meta: Option<PathBuf>,

        /// Store values zstd-compressed
        #[arg(long)]
        compress: bool,

        /// Number of worker threads (default: all hardware threads)
        #[arg(short = 'c', long)]
        cores: Option<usize>,
    },
}
