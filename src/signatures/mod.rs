//! K-mer signature containers.
//!
//! A signature is the sorted set of distinct k-mer indices extracted from one
//! genome under a [`KmerSpec`]. Collections of signatures are stored in
//! concatenated form: one flat `values` array plus a `bounds` array of
//! element offsets, so signature `i` is `values[bounds[i]..bounds[i + 1]]`.
//! This layout maps the whole reference set onto a single read-only buffer,
//! which is what lets the distance engine scan it without pointer chasing and
//! lets the on-disk format be memory-mapped directly.
//!
//! # Invariants
//! - `bounds[0] == 0`, `bounds` monotone non-decreasing, `bounds[n] == values.len()`
//! - each signature slice is strictly increasing
//! - every value is `< 4^k` for the spec's `k`

pub mod calc;
pub mod file;

use std::marker::PhantomData;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{GambitError, Result};
use crate::kmers::{Coord, IndexWidth, KmerSpec};

/// A single k-mer signature, tagged with its storage width.
///
/// The width is determined by the spec the signature was built under
/// ([`KmerSpec::index_width`]); values are always strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl Signature {
    /// Build from sorted, deduplicated indices, narrowing to `width`.
    ///
    /// Callers guarantee every index fits the width; the signature builder
    /// upholds this through the `index < 4^k` invariant.
    pub fn from_sorted_indices(indices: &[u64], width: IndexWidth) -> Signature {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        match width {
            IndexWidth::U16 => {
                Signature::U16(indices.iter().map(|&v| u16::from_u64(v)).collect())
            }
            IndexWidth::U32 => {
                Signature::U32(indices.iter().map(|&v| u32::from_u64(v)).collect())
            }
            IndexWidth::U64 => Signature::U64(indices.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Signature::U16(v) => v.len(),
            Signature::U32(v) => v.len(),
            Signature::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> IndexWidth {
        match self {
            Signature::U16(_) => IndexWidth::U16,
            Signature::U32(_) => IndexWidth::U32,
            Signature::U64(_) => IndexWidth::U64,
        }
    }

    /// Widen all values to u64, mainly for comparisons in tests.
    pub fn to_u64_vec(&self) -> Vec<u64> {
        match self {
            Signature::U16(v) => v.iter().map(|&x| x as u64).collect(),
            Signature::U32(v) => v.iter().map(|&x| x as u64).collect(),
            Signature::U64(v) => v.clone(),
        }
    }
}

/// Backing storage for the concatenated values array.
enum Values<C: Coord> {
    Owned(Vec<C>),
    /// View into a shared memory map. `byte_offset` is aligned to the element
    /// size (the file format pads the values section to 8 bytes) and
    /// `byte_offset + len * size_of::<C>()` lies within the map; both are
    /// verified when the file is opened.
    Mapped {
        map: Arc<Mmap>,
        byte_offset: usize,
        len: usize,
        _coord: PhantomData<C>,
    },
}

impl<C: Coord> Values<C> {
    fn as_slice(&self) -> &[C] {
        match self {
            Values::Owned(v) => v,
            Values::Mapped {
                map,
                byte_offset,
                len,
                ..
            } => {
                // Safety: offset/length bounds and alignment are validated at
                // open time, C is a plain little-endian integer type, and the
                // map is read-only for the lifetime of self.
                unsafe {
                    let ptr = map.as_ptr().add(*byte_offset) as *const C;
                    std::slice::from_raw_parts(ptr, *len)
                }
            }
        }
    }
}

impl<C: Coord> std::fmt::Debug for Values<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Values::Owned(v) => write!(f, "Owned({} values)", v.len()),
            Values::Mapped { len, .. } => write!(f, "Mapped({} values)", len),
        }
    }
}

/// A collection of signatures sharing one [`KmerSpec`], stored concatenated.
///
/// The values array is either owned (built in memory, or decompressed from a
/// compressed file) or a zero-copy view into a memory-mapped file.
#[derive(Debug)]
pub struct SignatureArray<C: Coord> {
    spec: KmerSpec,
    bounds: Vec<u64>,
    values: Values<C>,
}

impl<C: Coord> SignatureArray<C> {
    /// Build from individual signature slices, concatenating them.
    pub fn from_signatures<'a, I>(spec: KmerSpec, signatures: I) -> SignatureArray<C>
    where
        I: IntoIterator<Item = &'a [C]>,
    {
        let mut bounds = vec![0u64];
        let mut values = Vec::new();
        for sig in signatures {
            values.extend_from_slice(sig);
            bounds.push(values.len() as u64);
        }
        SignatureArray {
            spec,
            bounds,
            values: Values::Owned(values),
        }
    }

    /// Assemble from already-concatenated parts, checking the bounds
    /// invariants.
    pub fn from_owned_parts(
        spec: KmerSpec,
        values: Vec<C>,
        bounds: Vec<u64>,
    ) -> Result<SignatureArray<C>> {
        check_bounds(&bounds, values.len() as u64).map_err(GambitError::Validation)?;
        Ok(SignatureArray {
            spec,
            bounds,
            values: Values::Owned(values),
        })
    }

    /// Assemble over a shared memory map. Used by the file reader, which
    /// validates `byte_offset` alignment and the map extent first.
    pub(crate) fn from_mapped_parts(
        spec: KmerSpec,
        map: Arc<Mmap>,
        byte_offset: usize,
        len: usize,
        bounds: Vec<u64>,
    ) -> SignatureArray<C> {
        debug_assert_eq!(byte_offset % std::mem::align_of::<C>(), 0);
        debug_assert!(byte_offset + len * std::mem::size_of::<C>() <= map.len());
        SignatureArray {
            spec,
            bounds,
            values: Values::Mapped {
                map,
                byte_offset,
                len,
                _coord: PhantomData,
            },
        }
    }

    /// Number of signatures.
    pub fn len(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spec(&self) -> &KmerSpec {
        &self.spec
    }

    /// The `i`th signature as a read-only slice of the shared buffer.
    pub fn get(&self, i: usize) -> &[C] {
        let lo = self.bounds[i] as usize;
        let hi = self.bounds[i + 1] as usize;
        &self.values.as_slice()[lo..hi]
    }

    /// Length of the `i`th signature without touching its values.
    pub fn sizeof(&self, i: usize) -> usize {
        (self.bounds[i + 1] - self.bounds[i]) as usize
    }

    pub fn values(&self) -> &[C] {
        self.values.as_slice()
    }

    pub fn bounds(&self) -> &[u64] {
        &self.bounds
    }

    pub fn iter(&self) -> impl Iterator<Item = &[C]> {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Iterate in batches of at most `batch` signatures, for streaming scans
    /// that want cancellation points without loading everything at once.
    pub fn iter_chunks(&self, batch: usize) -> impl Iterator<Item = SignatureChunk<'_, C>> {
        let n = self.len();
        let batch = batch.max(1);
        (0..n).step_by(batch).map(move |start| SignatureChunk {
            array: self,
            start,
            len: batch.min(n - start),
        })
    }

    /// Verify every signature is strictly sorted with all values `< 4^k`.
    ///
    /// O(total values); run once by the reference database loader so queries
    /// operate on checked data.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let max = self.spec.max_index();
        for i in 0..self.len() {
            let sig = self.get(i);
            for w in sig.windows(2) {
                if w[0] >= w[1] {
                    return Err(format!("signature {} is not strictly sorted", i));
                }
            }
            if let Some(&last) = sig.last() {
                if last.to_u64() > max {
                    return Err(format!(
                        "signature {} contains index {} >= 4^{}",
                        i,
                        last.to_u64(),
                        self.spec.k()
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A contiguous run of signatures yielded by [`SignatureArray::iter_chunks`].
pub struct SignatureChunk<'a, C: Coord> {
    array: &'a SignatureArray<C>,
    start: usize,
    len: usize,
}

impl<'a, C: Coord> SignatureChunk<'a, C> {
    /// Global index of the first signature in this chunk.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, local: usize) -> &'a [C] {
        debug_assert!(local < self.len);
        self.array.get(self.start + local)
    }
}

/// Check the shared bounds invariants; returns a human-readable reason on
/// failure so callers can wrap it in their own error type.
pub(crate) fn check_bounds(bounds: &[u64], values_len: u64) -> std::result::Result<(), String> {
    if bounds.is_empty() {
        return Err("bounds array is empty".to_string());
    }
    if bounds[0] != 0 {
        return Err(format!("bounds[0] must be 0, got {}", bounds[0]));
    }
    for i in 1..bounds.len() {
        if bounds[i] < bounds[i - 1] {
            return Err(format!(
                "bounds must be monotone non-decreasing (bounds[{}]={} < bounds[{}]={})",
                i,
                bounds[i],
                i - 1,
                bounds[i - 1]
            ));
        }
    }
    let last = *bounds.last().unwrap();
    if last != values_len {
        return Err(format!(
            "final bound {} does not match values length {}",
            last, values_len
        ));
    }
    Ok(())
}

/// Width-dispatched signature collection.
///
/// The width is fixed per file by the [`KmerSpec`]; matching on this enum
/// once selects the monomorphized code path for everything downstream.
#[derive(Debug)]
pub enum AnySignatureArray {
    U16(SignatureArray<u16>),
    U32(SignatureArray<u32>),
    U64(SignatureArray<u64>),
}

macro_rules! dispatch {
    ($self:expr, $arr:ident => $body:expr) => {
        match $self {
            AnySignatureArray::U16($arr) => $body,
            AnySignatureArray::U32($arr) => $body,
            AnySignatureArray::U64($arr) => $body,
        }
    };
}

/// Extract same-width slices from owned signatures or fail with
/// `DimensionMismatch`.
macro_rules! collect_width {
    ($signatures:expr, $variant:path, $width:expr) => {{
        let mut slices = Vec::with_capacity($signatures.len());
        for sig in $signatures {
            match sig {
                $variant(v) => slices.push(v.as_slice()),
                other => {
                    return Err(GambitError::DimensionMismatch {
                        query: other.width().to_string(),
                        reference: $width.to_string(),
                    })
                }
            }
        }
        slices
    }};
}

impl AnySignatureArray {
    /// Build an in-memory array from owned signatures, dispatching on the
    /// spec's index width. Signatures must all carry that width.
    pub fn from_signatures(spec: KmerSpec, signatures: &[Signature]) -> Result<AnySignatureArray> {
        let width = spec.index_width();
        match width {
            IndexWidth::U16 => {
                let slices = collect_width!(signatures, Signature::U16, width);
                Ok(AnySignatureArray::U16(SignatureArray::from_signatures(
                    spec,
                    slices.into_iter(),
                )))
            }
            IndexWidth::U32 => {
                let slices = collect_width!(signatures, Signature::U32, width);
                Ok(AnySignatureArray::U32(SignatureArray::from_signatures(
                    spec,
                    slices.into_iter(),
                )))
            }
            IndexWidth::U64 => {
                let slices = collect_width!(signatures, Signature::U64, width);
                Ok(AnySignatureArray::U64(SignatureArray::from_signatures(
                    spec,
                    slices.into_iter(),
                )))
            }
        }
    }

    pub fn len(&self) -> usize {
        dispatch!(self, arr => arr.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spec(&self) -> &KmerSpec {
        dispatch!(self, arr => arr.spec())
    }

    pub fn width(&self) -> IndexWidth {
        match self {
            AnySignatureArray::U16(_) => IndexWidth::U16,
            AnySignatureArray::U32(_) => IndexWidth::U32,
            AnySignatureArray::U64(_) => IndexWidth::U64,
        }
    }

    pub fn sizeof(&self, i: usize) -> usize {
        dispatch!(self, arr => arr.sizeof(i))
    }

    /// The `i`th signature as an owned [`Signature`].
    pub fn signature(&self, i: usize) -> Signature {
        match self {
            AnySignatureArray::U16(arr) => Signature::U16(arr.get(i).to_vec()),
            AnySignatureArray::U32(arr) => Signature::U32(arr.get(i).to_vec()),
            AnySignatureArray::U64(arr) => Signature::U64(arr.get(i).to_vec()),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        dispatch!(self, arr => arr.validate())
    }
}
