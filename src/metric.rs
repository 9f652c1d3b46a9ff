//! Jaccard distance over sorted k-mer index sets.
//!
//! The pairwise kernel is a two-cursor merge over strictly sorted arrays that
//! counts the union as it goes; intersection size falls out of the cursor
//! arithmetic, so no per-element branching on membership is needed. The
//! one-vs-many entry point fans independent pair computations out over a
//! work-stealing pool, writing each result slot exactly once.

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::cancel::CancellationToken;
use crate::error::{GambitError, Result};
use crate::kmers::Coord;
use crate::signatures::{AnySignatureArray, Signature, SignatureArray};

/// Jaccard distance `1 - |A∩B| / |A∪B|` between two strictly sorted arrays.
///
/// The element widths may differ; comparison happens after widening to u64.
/// Contract: result in `[0, 1]`, bit-exact symmetry, `d(a, a) == 0`, empty
/// vs empty is `0.0`, empty vs non-empty is `1.0`.
pub fn jaccard_distance<A: Coord, B: Coord>(a: &[A], b: &[B]) -> f32 {
    let n1 = a.len();
    let n2 = b.len();
    let mut i = 0usize;
    let mut j = 0usize;
    let mut union = 0u64;

    while i < n1 && j < n2 {
        union += 1;
        let x = a[i].to_u64();
        let y = b[j].to_u64();
        // Advancing both cursors on equality counts shared elements once
        if x <= y {
            i += 1;
        }
        if y <= x {
            j += 1;
        }
    }
    union += (n1 - i) as u64 + (n2 - j) as u64;

    if union == 0 {
        return 0.0;
    }
    // 2u - n1 - n2 == u - |A∩B|
    (2 * union - n1 as u64 - n2 as u64) as f32 / union as f32
}

/// Jaccard index `|A∩B| / |A∪B|`; `1.0` for two empty sets.
pub fn jaccard_index<A: Coord, B: Coord>(a: &[A], b: &[B]) -> f32 {
    1.0 - jaccard_distance(a, b)
}

/// Batch of reference signatures handled between two cancellation polls.
pub const DEFAULT_CHUNKSIZE: usize = 1000;

/// Distances from one query to every signature in `refs`.
///
/// Slot `i` of the output equals `jaccard_distance(query, refs.get(i))`
/// regardless of worker count. References are streamed in chunks; each chunk
/// fans out over the pool and the token is polled between chunks, so a fired
/// token discards all partial output promptly.
pub fn jaccard_distances<Q: Coord, C: Coord>(
    query: &[Q],
    refs: &SignatureArray<C>,
    pool: &ThreadPool,
    cancel: &CancellationToken,
) -> Result<Vec<f32>> {
    jaccard_distances_chunked(query, refs, DEFAULT_CHUNKSIZE, pool, cancel)
}

/// [`jaccard_distances`] with an explicit chunk size.
pub fn jaccard_distances_chunked<Q: Coord, C: Coord>(
    query: &[Q],
    refs: &SignatureArray<C>,
    chunksize: usize,
    pool: &ThreadPool,
    cancel: &CancellationToken,
) -> Result<Vec<f32>> {
    let mut out = vec![0.0f32; refs.len()];
    for chunk in refs.iter_chunks(chunksize) {
        cancel.check()?;
        let slots = &mut out[chunk.start()..chunk.start() + chunk.len()];
        pool.install(|| {
            slots.par_iter_mut().enumerate().for_each(|(i, slot)| {
                *slot = jaccard_distance(query, chunk.get(i));
            })
        });
    }
    Ok(out)
}

/// Width-dispatched variant of [`jaccard_distances_chunked`].
///
/// The query and reference widths always agree when both were built under
/// the same [`KmerSpec`]; a disagreement is reported as `DimensionMismatch`.
pub fn jaccard_distances_any(
    query: &Signature,
    refs: &AnySignatureArray,
    chunksize: usize,
    pool: &ThreadPool,
    cancel: &CancellationToken,
) -> Result<Vec<f32>> {
    match (query, refs) {
        (Signature::U16(q), AnySignatureArray::U16(r)) => {
            jaccard_distances_chunked(q, r, chunksize, pool, cancel)
        }
        (Signature::U32(q), AnySignatureArray::U32(r)) => {
            jaccard_distances_chunked(q, r, chunksize, pool, cancel)
        }
        (Signature::U64(q), AnySignatureArray::U64(r)) => {
            jaccard_distances_chunked(q, r, chunksize, pool, cancel)
        }
        _ => Err(GambitError::DimensionMismatch {
            query: query.width().to_string(),
            reference: refs.width().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmers::KmerSpec;
    use crate::parallel::build_pool;

    const EPS: f32 = 1e-6;

    #[test]
    fn test_known_distance() {
        // Union 4, intersection 1 -> distance 0.75
        let a: Vec<u16> = vec![0, 3];
        let b: Vec<u16> = vec![1, 2, 3];
        assert!((jaccard_distance(&a, &b) - 0.75).abs() < EPS);
        assert!((jaccard_index(&a, &b) - 0.25).abs() < EPS);
    }

    #[test]
    fn test_empty_sets() {
        let empty: Vec<u32> = vec![];
        let nonempty: Vec<u32> = vec![0];
        assert_eq!(jaccard_distance(&empty, &empty), 0.0);
        assert_eq!(jaccard_distance(&empty, &nonempty), 1.0);
        assert_eq!(jaccard_distance(&nonempty, &empty), 1.0);
    }

    #[test]
    fn test_identity_and_disjoint() {
        let a: Vec<u64> = vec![1, 5, 9, 100, 10_000];
        assert_eq!(jaccard_distance(&a, &a), 0.0);

        let b: Vec<u64> = vec![2, 6, 10];
        assert_eq!(jaccard_distance(&a, &b), 1.0);
    }

    #[test]
    fn test_symmetry_bit_exact() {
        let cases: Vec<(Vec<u32>, Vec<u32>)> = vec![
            (vec![0, 3], vec![1, 2, 3]),
            (vec![1, 2, 3, 4, 5, 6, 7], vec![5, 6, 7, 8]),
            (vec![], vec![9]),
            (vec![10, 20, 30], vec![10, 20, 30, 40, 50, 60, 70]),
        ];
        for (a, b) in cases {
            let d1 = jaccard_distance(&a, &b);
            let d2 = jaccard_distance(&b, &a);
            assert_eq!(d1.to_bits(), d2.to_bits());
            assert!((0.0..=1.0).contains(&d1));
        }
    }

    #[test]
    fn test_mixed_widths() {
        let a: Vec<u16> = vec![0, 3, 7];
        let b: Vec<u64> = vec![3, 7, 9];
        // Union 4, intersection 2
        assert!((jaccard_distance(&a, &b) - 0.5).abs() < EPS);
    }

    #[test]
    fn test_parallel_matches_sequential() -> anyhow::Result<()> {
        let spec = KmerSpec::new(b"ATGAC", 3).unwrap();
        let sigs: Vec<Vec<u16>> = (0..50)
            .map(|i| (0..(i % 7)).map(|j| (i + j * 3) as u16 % 64).collect::<Vec<_>>())
            .map(|mut v: Vec<u16>| {
                v.sort_unstable();
                v.dedup();
                v
            })
            .collect();
        let refs = SignatureArray::<u16>::from_signatures(
            spec,
            sigs.iter().map(|v| v.as_slice()),
        );
        let query: Vec<u16> = vec![1, 4, 9, 16, 25];

        let cancel = CancellationToken::new();
        for workers in [1, 4] {
            for chunksize in [7, DEFAULT_CHUNKSIZE] {
                let pool = build_pool(Some(workers))?;
                let out = jaccard_distances_chunked(&query, &refs, chunksize, &pool, &cancel)?;
                assert_eq!(out.len(), refs.len());
                for (i, &d) in out.iter().enumerate() {
                    let expected = jaccard_distance(&query, refs.get(i));
                    assert_eq!(d.to_bits(), expected.to_bits());
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_cancelled_scan() -> anyhow::Result<()> {
        let spec = KmerSpec::new(b"ATGAC", 3).unwrap();
        let refs = SignatureArray::<u16>::from_signatures(
            spec,
            std::iter::repeat(&[1u16, 2, 3][..]).take(100),
        );
        let pool = build_pool(Some(2))?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            jaccard_distances(&[1u16, 2], &refs, &pool, &cancel),
            Err(GambitError::Cancelled)
        ));
        Ok(())
    }

    #[test]
    fn test_any_dispatch_mismatch() -> anyhow::Result<()> {
        let spec = KmerSpec::new(b"ATGAC", 3).unwrap(); // u16
        let refs = AnySignatureArray::from_signatures(
            spec,
            &[Signature::U16(vec![0, 1])],
        )?;
        let pool = build_pool(Some(1))?;
        let cancel = CancellationToken::new();

        let ok = jaccard_distances_any(&Signature::U16(vec![0]), &refs, DEFAULT_CHUNKSIZE, &pool, &cancel)?;
        assert_eq!(ok.len(), 1);

        assert!(matches!(
            jaccard_distances_any(&Signature::U32(vec![0]), &refs, DEFAULT_CHUNKSIZE, &pool, &cancel),
            Err(GambitError::DimensionMismatch { .. })
        ));
        Ok(())
    }
}
