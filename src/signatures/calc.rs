//! Signature calculation: scanning nucleotide sequences for prefix-anchored
//! k-mers.
//!
//! Both strands are searched in a single pass: a forward hit is an exact
//! occurrence of the spec's prefix followed by k encodable bases, a reverse
//! hit is an occurrence of the prefix's reverse complement preceded by k
//! bases (encoded as their reverse complement). Matching is case-insensitive
//! and a candidate containing an ambiguity code is dropped silently, so one
//! stray `N` never aborts a batch.

use std::io;
use std::path::{Path, PathBuf};

use needletail::parse_fastx_file;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::cancel::CancellationToken;
use crate::error::{GambitError, Result};
use crate::kmers::{encode, encode_revcomp, revcomp, KmerSpec};
use crate::signatures::Signature;

/// Case-insensitive match of the upper-case `pattern` at `seq[p..]`.
/// Clearing bit 5 maps lower-case nucleotide codes onto upper case and maps
/// no other byte onto `ACGT`.
#[inline(always)]
fn matches_at(seq: &[u8], p: usize, pattern: &[u8]) -> bool {
    debug_assert!(p + pattern.len() <= seq.len());
    pattern
        .iter()
        .zip(&seq[p..])
        .all(|(&pat, &b)| (b & 0xDF) == pat)
}

/// Scan one sequence, appending every extracted k-mer index to `out`.
///
/// Overlapping prefix occurrences are all considered independently;
/// duplicates collapse when the accumulated indices are deduplicated.
fn scan_sequence(spec: &KmerSpec, rc_prefix: &[u8], seq: &[u8], out: &mut Vec<u64>) {
    let prefix = spec.prefix();
    let plen = prefix.len();
    let k = spec.k();
    if seq.len() < plen + k {
        return;
    }

    for p in 0..=(seq.len() - plen) {
        if matches_at(seq, p, prefix) && p + plen + k <= seq.len() {
            if let Ok(index) = encode(&seq[p + plen..p + plen + k]) {
                out.push(index);
            }
        }
        if matches_at(seq, p, rc_prefix) && p >= k {
            if let Ok(index) = encode_revcomp(&seq[p - k..p]) {
                out.push(index);
            }
        }
    }
}

/// Sort, deduplicate and narrow accumulated indices into a [`Signature`].
fn finish(spec: &KmerSpec, mut indices: Vec<u64>) -> Signature {
    indices.sort_unstable();
    indices.dedup();
    Signature::from_sorted_indices(&indices, spec.index_width())
}

/// Calculate the k-mer signature of a genome given as an iterable of
/// nucleotide sequences (e.g. the contigs of one assembly).
///
/// The result is a strictly sorted set of k-mer indices in the spec's index
/// width. Sequences with no prefix occurrences contribute nothing; an empty
/// input yields an empty (valid) signature.
pub fn calc_signature<'s, I>(spec: &KmerSpec, sequences: I) -> Signature
where
    I: IntoIterator<Item = &'s [u8]>,
{
    let rc_prefix = revcomp(spec.prefix());
    let mut indices = Vec::new();
    for seq in sequences {
        scan_sequence(spec, &rc_prefix, seq, &mut indices);
    }
    finish(spec, indices)
}

/// Calculate the signature of one FASTA file (optionally gzipped).
///
/// All records in the file are pooled into a single signature.
pub fn calc_file_signature(spec: &KmerSpec, path: &Path) -> Result<Signature> {
    let rc_prefix = revcomp(spec.prefix());
    let mut indices = Vec::new();

    let mut reader = parse_fastx_file(path).map_err(|e| parse_error(path, e))?;
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| parse_error(path, e))?;
        scan_sequence(spec, &rc_prefix, &record.seq(), &mut indices);
    }

    Ok(finish(spec, indices))
}

/// Calculate signatures for many FASTA files in parallel.
///
/// Fans the files out over `pool`; each worker keeps its own index
/// accumulator. The token is polled before each file and a fired token
/// discards all partial output.
pub fn calc_file_signatures(
    spec: &KmerSpec,
    files: &[PathBuf],
    pool: &ThreadPool,
    cancel: &CancellationToken,
) -> Result<Vec<Signature>> {
    pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                cancel.check()?;
                calc_file_signature(spec, path)
            })
            .collect()
    })
}

fn parse_error(path: &Path, err: needletail::errors::ParseError) -> GambitError {
    GambitError::io(
        path,
        "parse",
        io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmers::decode;

    fn spec3() -> KmerSpec {
        KmerSpec::new(b"ATGAC", 3).unwrap()
    }

    fn indices(spec: &KmerSpec, seq: &[u8]) -> Vec<u64> {
        calc_signature(spec, [seq]).to_u64_vec()
    }

    #[test]
    fn test_single_forward_hit() {
        // Prefix at 0, suffix AAA -> index 0
        assert_eq!(indices(&spec3(), b"ATGACAAA"), vec![0]);
    }

    #[test]
    fn test_single_reverse_hit() {
        // Reverse complement of ATGACAAA; the GTCAT occurrence yields index 0
        assert_eq!(indices(&spec3(), b"TTTGTCAT"), vec![0]);
    }

    #[test]
    fn test_two_forward_hits_sorted() {
        // AAA -> 0, CCC -> 21
        assert_eq!(indices(&spec3(), b"ATGACAAAATGACCCC"), vec![0, 21]);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(indices(&spec3(), b"atgacaaa"), vec![0]);
        assert_eq!(indices(&spec3(), b"AtGaCcCc"), vec![21]);
    }

    #[test]
    fn test_ambiguous_suffix_dropped() {
        // N inside the k-mer body: candidate silently discarded
        assert_eq!(indices(&spec3(), b"ATGACANA"), Vec::<u64>::new());
        // Second, clean hit still comes through
        assert_eq!(indices(&spec3(), b"ATGACANAATGACCCC"), vec![21]);
    }

    #[test]
    fn test_empty_and_short_inputs() {
        assert_eq!(indices(&spec3(), b""), Vec::<u64>::new());
        assert_eq!(indices(&spec3(), b"ATGAC"), Vec::<u64>::new());
        assert_eq!(indices(&spec3(), b"ATGACAA"), Vec::<u64>::new());
        assert!(calc_signature::<[&[u8]; 0]>(&spec3(), []).is_empty());
    }

    #[test]
    fn test_multiple_sequences_pooled() {
        let seqs: [&[u8]; 2] = [b"ATGACAAA", b"ATGACCCC"];
        assert_eq!(calc_signature(&spec3(), seqs).to_u64_vec(), vec![0, 21]);
    }

    #[test]
    fn test_duplicate_kmers_collapse() {
        assert_eq!(indices(&spec3(), b"ATGACAAAATGACAAA"), vec![0]);
    }

    #[test]
    fn test_hits_at_sequence_bounds() {
        // Background with no C/G so the prefix only matches where planted
        let spec = KmerSpec::new(b"CCGGG", 3).unwrap();
        let mut seq = b"ATN".repeat(30);
        let total = spec.total_len();

        // Plant prefix + k-mer 0 at the very beginning
        seq[..spec.prefix_len()].copy_from_slice(spec.prefix());
        seq[spec.prefix_len()..total].copy_from_slice(&decode(0, 3));

        // Plant prefix + k-mer 1 flush against the end
        let n = seq.len();
        seq[n - total..n - 3].copy_from_slice(spec.prefix());
        seq[n - 3..].copy_from_slice(&decode(1, 3));

        assert_eq!(indices(&spec, &seq), vec![0, 1]);
    }

    #[test]
    fn test_overlapping_matches() {
        // Hand-designed sequence with overlapping forward and reverse
        // matches, including a backward match too close to the start to use.
        let spec = KmerSpec::new(b"GCCGG", 11).unwrap();
        let seq = b"ATATGCCGGCCGGATTATATAGCCGGCATTACATCCGATAGGATCCGGCAATAA";

        let mut expected: Vec<u64> = [
            encode(b"CCGGATTATAT").unwrap(),
            encode(b"ATTATATAGCC").unwrap(),
            encode(b"CATTACATCCG").unwrap(),
            encode(&revcomp(b"GGATTATATAG")).unwrap(),
            encode(&revcomp(b"TCCGATAGGAT")).unwrap(),
        ]
        .to_vec();
        expected.sort_unstable();

        assert_eq!(indices(&spec, seq), expected);
        // The signature of the reverse complement is identical
        assert_eq!(indices(&spec, &revcomp(seq)), expected);
    }

    #[test]
    fn test_revcomp_symmetry() {
        let seq = b"ATGACAAAATGACCCCTTTGTCATGGGG";
        assert_eq!(indices(&spec3(), seq), indices(&spec3(), &revcomp(seq)));
    }

    #[test]
    fn test_self_concat_idempotent() {
        // No new prefix hits emerge at the join, so doubling the sequence
        // leaves the signature unchanged
        let seq = b"ATGACAAAATGACCCC";
        let doubled = [&seq[..], &seq[..]].concat();
        assert_eq!(indices(&spec3(), seq), indices(&spec3(), &doubled));
    }

    #[test]
    fn test_file_signature() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("genome.fa");
        std::fs::write(&path, ">contig1\nATGACAAA\n>contig2\nATGACCCC\n")?;

        let sig = calc_file_signature(&spec3(), &path)?;
        assert_eq!(sig.to_u64_vec(), vec![0, 21]);
        Ok(())
    }

    #[test]
    fn test_file_signatures_parallel_and_cancel() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut files = Vec::new();
        for i in 0..4 {
            let path = dir.path().join(format!("g{}.fa", i));
            std::fs::write(&path, ">s\nATGACAAA\n")?;
            files.push(path);
        }

        let pool = crate::parallel::build_pool(Some(2))?;
        let cancel = CancellationToken::new();
        let sigs = calc_file_signatures(&spec3(), &files, &pool, &cancel)?;
        assert_eq!(sigs.len(), 4);
        assert!(sigs.iter().all(|s| s.to_u64_vec() == vec![0]));

        cancel.cancel();
        assert!(matches!(
            calc_file_signatures(&spec3(), &files, &pool, &cancel),
            Err(GambitError::Cancelled)
        ));
        Ok(())
    }
}
