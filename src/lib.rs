//! Gambit: rapid taxonomic identification of microbial genome assemblies.
//!
//! A query genome is reduced to a compact k-mer signature (the sorted set of
//! distinct prefix-anchored k-mer indices), compared against every reference
//! signature under the Jaccard distance, and the resulting distance vector is
//! classified against a curated taxonomy with per-taxon thresholds. The
//! policy throughout is conservative: prefer no prediction over a wrong one.
//!
//! Pipeline: FASTA → [`signatures::calc`] (using [`kmers`]) → query
//! signature → [`metric`] against a [`signatures::file`]-backed reference set
//! → distance vector → [`classify`] (using [`db`]) → prediction.

pub mod cancel;
pub mod classify;
pub mod commands;
pub mod db;
pub mod error;
pub mod kmers;
pub mod logging;
pub mod metric;
pub mod parallel;
pub mod query;
pub mod results;
pub mod signatures;
pub mod taxonomy;

pub use cancel::CancellationToken;
pub use classify::{classify, ClassifierResult, ClassifierWarning, GenomeMatch};
pub use db::ReferenceDatabase;
pub use error::{GambitError, Result};
pub use kmers::{IndexWidth, KmerSpec};
pub use metric::{jaccard_distance, jaccard_distances};
pub use query::{query, query_parse, QueryParams, QueryResults};
pub use signatures::calc::{calc_file_signature, calc_file_signatures, calc_signature};
pub use signatures::file::SignatureFile;
pub use signatures::{AnySignatureArray, Signature, SignatureArray};
