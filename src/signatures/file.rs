//! The `.gs` signature file format.
//!
//! A durable, random-access container for a signature collection plus
//! metadata. Little-endian throughout:
//!
//! ```text
//! magic      [8]  "GAMBITSG"
//! version    u32  = 1
//! flags      u32  bit0 ids, bit1 metadata, bit2 compressed values
//! prefix_len u8
//! prefix     [prefix_len]
//! k          u8
//! n          u64
//! bounds     (n+1) x u64     element offsets into values
//! --- only when bit2 set:
//! block_size u64             uncompressed bytes per block (last may be short)
//! nblocks    u64
//! blocks     (nblocks+1) x u64  compressed byte offsets relative to values
//! --- otherwise:
//! pad        0-7 zero bytes so values starts 8-byte aligned
//! ---
//! values     bounds[n] elements, raw little-endian or zstd blocks
//! ids        n x (u64 len + UTF-8)       when bit0
//! metadata   u64 len + UTF-8 JSON        when bit1
//! ```
//!
//! Uncompressed values are served zero-copy from a shared memory map (the
//! alignment pad makes the typed reinterpretation sound). Compressed values
//! are decompressed block-wise on open; every reader API behaves identically
//! either way. The block index layout is independent of the codec so future
//! codecs can reuse it without a version bump.
//!
//! `create` writes to a temporary file in the destination directory, fsyncs,
//! and renames into place. Published files are never mutated.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{GambitError, Result};
use crate::kmers::{Coord, IndexWidth, KmerSpec, MAX_K};
use crate::signatures::{check_bounds, AnySignatureArray, Signature, SignatureArray};

pub const MAGIC: [u8; 8] = *b"GAMBITSG";
pub const FORMAT_VERSION: u32 = 1;

const FLAG_IDS: u32 = 1 << 0;
const FLAG_METADATA: u32 = 1 << 1;
const FLAG_COMPRESSED: u32 = 1 << 2;
const KNOWN_FLAGS: u32 = FLAG_IDS | FLAG_METADATA | FLAG_COMPRESSED;

/// Uncompressed bytes of values per compression block.
pub const DEFAULT_BLOCK_SIZE: u64 = 1 << 20;

const ZSTD_LEVEL: i32 = 3;

// Sanity caps applied when reading untrusted files
const MAX_SIGNATURES: u64 = 100_000_000;
const MAX_ID_LENGTH: u64 = 4_096;
const MAX_METADATA_LENGTH: u64 = 256 * 1024 * 1024;
const MAX_BLOCKS: u64 = 10_000_000;

/// Options for [`SignatureFile::create_with`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Store values as zstd-compressed blocks.
    pub compress: bool,
    /// Uncompressed bytes per block when compressing.
    pub block_size: u64,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            compress: false,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// An opened `.gs` file: signatures plus optional ids and metadata.
#[derive(Debug)]
pub struct SignatureFile {
    path: PathBuf,
    signatures: AnySignatureArray,
    ids: Option<Vec<String>>,
    metadata: Option<serde_json::Value>,
}

impl SignatureFile {
    /// Open and structurally validate a signature file.
    ///
    /// Constant-time in the signature data for uncompressed files (the values
    /// region is memory-mapped, not read). Structural problems surface as
    /// [`GambitError::CorruptSignatureFile`].
    pub fn open(path: &Path) -> Result<SignatureFile> {
        let file = File::open(path).map_err(|e| GambitError::io(path, "open", e))?;
        // Safety: the map is read-only and the format is append-never; a
        // concurrent writer replaces the file via rename rather than mutating it.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| GambitError::io(path, "mmap", e))?;

        let mut r = Reader {
            buf: &map,
            pos: 0,
            path,
        };

        if r.bytes(8)? != MAGIC {
            return Err(r.corrupt("bad magic bytes"));
        }
        let version = r.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(r.corrupt(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        let flags = r.read_u32()?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(r.corrupt(format!("unknown flag bits 0x{:x}", flags & !KNOWN_FLAGS)));
        }

        let prefix_len = r.read_u8()? as usize;
        let prefix = r.bytes(prefix_len)?.to_vec();
        let k = r.read_u8()? as usize;
        if k > MAX_K {
            return Err(r.corrupt(format!("k = {} out of range", k)));
        }
        let spec = KmerSpec::new(&prefix, k)
            .map_err(|e| GambitError::corrupt(path, format!("invalid k-mer spec: {}", e)))?;
        let width = spec.index_width();

        let n = r.read_u64()?;
        if n > MAX_SIGNATURES {
            return Err(r.corrupt(format!("{} signatures exceeds limit {}", n, MAX_SIGNATURES)));
        }
        let n = n as usize;

        let mut bounds = Vec::with_capacity(n + 1);
        for _ in 0..=n {
            bounds.push(r.read_u64()?);
        }
        let nvalues = *bounds.last().unwrap();
        check_bounds(&bounds, nvalues).map_err(|detail| GambitError::corrupt(path, detail))?;
        let nvalues = nvalues as usize;
        let value_bytes = nvalues
            .checked_mul(width.bytes())
            .ok_or_else(|| r.corrupt("values length overflow"))?;

        // Values region: either decompress now (owned) or note the mapped
        // extent and build the zero-copy view once the reader borrow ends.
        let mut owned_raw: Option<Vec<u8>> = None;
        let mut mapped_offset: Option<usize> = None;
        if flags & FLAG_COMPRESSED != 0 {
            owned_raw = Some(read_compressed_values(&mut r, value_bytes)?);
        } else {
            let pad = (8 - r.pos % 8) % 8;
            r.bytes(pad)?;
            mapped_offset = Some(r.pos);
            r.bytes(value_bytes)?;
        }

        let ids = if flags & FLAG_IDS != 0 {
            let mut ids = Vec::with_capacity(n);
            let mut seen = HashSet::with_capacity(n);
            for i in 0..n {
                let len = r.read_u64()?;
                if len > MAX_ID_LENGTH {
                    return Err(r.corrupt(format!("id {} length {} exceeds limit", i, len)));
                }
                let raw = r.bytes(len as usize)?;
                let id = std::str::from_utf8(raw)
                    .map_err(|_| GambitError::corrupt(path, format!("id {} is not UTF-8", i)))?
                    .to_string();
                if !seen.insert(id.clone()) {
                    return Err(GambitError::corrupt(path, format!("duplicate id '{}'", id)));
                }
                ids.push(id);
            }
            Some(ids)
        } else {
            None
        };

        let metadata = if flags & FLAG_METADATA != 0 {
            let len = r.read_u64()?;
            if len > MAX_METADATA_LENGTH {
                return Err(r.corrupt(format!("metadata length {} exceeds limit", len)));
            }
            let raw = r.bytes(len as usize)?;
            Some(
                serde_json::from_slice(raw)
                    .map_err(|e| GambitError::corrupt(path, format!("invalid metadata JSON: {}", e)))?,
            )
        } else {
            None
        };

        if r.pos != r.buf.len() {
            return Err(r.corrupt(format!(
                "{} trailing bytes after metadata section",
                r.buf.len() - r.pos
            )));
        }
        drop(r);

        let signatures = match (owned_raw, mapped_offset) {
            (Some(raw), _) => build_owned(spec, width, &raw, bounds, path)?,
            (None, Some(byte_offset)) => {
                build_mapped(spec, width, Arc::new(map), byte_offset, nvalues, bounds)
            }
            (None, None) => unreachable!(),
        };

        Ok(SignatureFile {
            path: path.to_path_buf(),
            signatures,
            ids,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of signatures in the file.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn spec(&self) -> &KmerSpec {
        self.signatures.spec()
    }

    /// Per-signature string ids, when the file carries them.
    pub fn ids(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    /// Free-form JSON metadata, when the file carries it.
    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn signatures(&self) -> &AnySignatureArray {
        &self.signatures
    }

    /// The `i`th signature as an owned value.
    pub fn get(&self, i: usize) -> Signature {
        self.signatures.signature(i)
    }

    /// Run the full per-element validation (strictly sorted, `< 4^k`).
    pub fn validate(&self) -> Result<()> {
        self.signatures
            .validate()
            .map_err(|detail| GambitError::corrupt(&self.path, detail))
    }

    /// Write a new signature file with default options (uncompressed).
    pub fn create<I>(
        path: &Path,
        spec: &KmerSpec,
        signatures: I,
        ids: Option<&[String]>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Signature>,
    {
        Self::create_with(path, spec, signatures, ids, metadata, &CreateOptions::default())
    }

    /// Write a new signature file atomically.
    ///
    /// Signatures are consumed from an iterator; values are spooled to a
    /// scratch file so only `bounds` is buffered in memory. The finished file
    /// is assembled in a temporary sibling, fsynced, and renamed over `path`.
    pub fn create_with<I>(
        path: &Path,
        spec: &KmerSpec,
        signatures: I,
        ids: Option<&[String]>,
        metadata: Option<&serde_json::Value>,
        options: &CreateOptions,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Signature>,
    {
        let width = spec.index_width();
        let io_err = |op: &'static str, e: io::Error| GambitError::io(path, op, e);

        let spool_file = tempfile::tempfile().map_err(|e| io_err("create spool", e))?;
        let mut spool = BufWriter::new(spool_file);

        let mut bounds: Vec<u64> = vec![0];
        let mut sig_bytes: Vec<u8> = Vec::new();

        // Compression state: block offsets are cumulative compressed bytes
        let block_size = options.block_size.max(1) as usize;
        let mut block_buf: Vec<u8> = Vec::new();
        let mut block_offsets: Vec<u64> = vec![0];

        for sig in signatures {
            if sig.width() != width {
                return Err(GambitError::DimensionMismatch {
                    query: sig.width().to_string(),
                    reference: width.to_string(),
                });
            }
            sig_bytes.clear();
            let elems = encode_values(&sig, &mut sig_bytes);
            bounds.push(bounds.last().unwrap() + elems as u64);

            if options.compress {
                block_buf.extend_from_slice(&sig_bytes);
                while block_buf.len() >= block_size {
                    let rest = block_buf.split_off(block_size);
                    flush_block(&mut spool, &block_buf, &mut block_offsets, path)?;
                    block_buf = rest;
                }
            } else {
                spool.write_all(&sig_bytes).map_err(|e| io_err("write spool", e))?;
            }
        }
        if options.compress && !block_buf.is_empty() {
            flush_block(&mut spool, &block_buf, &mut block_offsets, path)?;
        }

        if let Some(ids) = ids {
            let n = bounds.len() - 1;
            if ids.len() != n {
                return Err(GambitError::Validation(format!(
                    "{} ids supplied for {} signatures",
                    ids.len(),
                    n
                )));
            }
            let unique: HashSet<&String> = ids.iter().collect();
            if unique.len() != ids.len() {
                return Err(GambitError::Validation(
                    "signature ids are not unique".to_string(),
                ));
            }
        }

        let mut spool_file = spool
            .into_inner()
            .map_err(|e| io_err("flush spool", e.into_error()))?;
        spool_file
            .seek(SeekFrom::Start(0))
            .map_err(|e| io_err("seek spool", e))?;

        // Assemble the final file next to the destination so the rename is
        // atomic on the same filesystem.
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| io_err("create temp", e))?;
        let mut out = BufWriter::new(temp);

        let n = bounds.len() - 1;
        let mut flags = 0u32;
        if ids.is_some() {
            flags |= FLAG_IDS;
        }
        if metadata.is_some() {
            flags |= FLAG_METADATA;
        }
        if options.compress {
            flags |= FLAG_COMPRESSED;
        }

        let w = |out: &mut BufWriter<tempfile::NamedTempFile>, bytes: &[u8]| {
            out.write_all(bytes).map_err(|e| io_err("write", e))
        };

        w(&mut out, &MAGIC)?;
        w(&mut out, &FORMAT_VERSION.to_le_bytes())?;
        w(&mut out, &flags.to_le_bytes())?;
        w(&mut out, &[spec.prefix_len() as u8])?;
        w(&mut out, spec.prefix())?;
        w(&mut out, &[spec.k() as u8])?;
        w(&mut out, &(n as u64).to_le_bytes())?;
        for &b in &bounds {
            w(&mut out, &b.to_le_bytes())?;
        }

        if options.compress {
            let nblocks = block_offsets.len() - 1;
            w(&mut out, &(block_size as u64).to_le_bytes())?;
            w(&mut out, &(nblocks as u64).to_le_bytes())?;
            for &off in &block_offsets {
                w(&mut out, &off.to_le_bytes())?;
            }
        } else {
            let pos = 8 + 4 + 4 + 1 + spec.prefix_len() + 1 + 8 + (n + 1) * 8;
            let pad = (8 - pos % 8) % 8;
            w(&mut out, &vec![0u8; pad])?;
        }

        io::copy(&mut spool_file, &mut out).map_err(|e| io_err("copy values", e))?;

        if let Some(ids) = ids {
            for id in ids {
                w(&mut out, &(id.len() as u64).to_le_bytes())?;
                w(&mut out, id.as_bytes())?;
            }
        }
        if let Some(metadata) = metadata {
            let raw = serde_json::to_vec(metadata)
                .map_err(|e| GambitError::Validation(format!("metadata not serializable: {}", e)))?;
            w(&mut out, &(raw.len() as u64).to_le_bytes())?;
            w(&mut out, &raw)?;
        }

        let temp = out
            .into_inner()
            .map_err(|e| io_err("flush", e.into_error()))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| io_err("fsync", e))?;
        temp.persist(path)
            .map_err(|e| io_err("rename", e.error))?;
        Ok(())
    }
}

/// Append one signature's values as little-endian bytes; returns the element
/// count.
fn encode_values(sig: &Signature, out: &mut Vec<u8>) -> usize {
    match sig {
        Signature::U16(v) => {
            for &x in v {
                x.write_le(out);
            }
            v.len()
        }
        Signature::U32(v) => {
            for &x in v {
                x.write_le(out);
            }
            v.len()
        }
        Signature::U64(v) => {
            for &x in v {
                x.write_le(out);
            }
            v.len()
        }
    }
}

fn flush_block(
    spool: &mut BufWriter<File>,
    block: &[u8],
    offsets: &mut Vec<u64>,
    path: &Path,
) -> Result<()> {
    let compressed = zstd::bulk::compress(block, ZSTD_LEVEL)
        .map_err(|e| GambitError::io(path, "compress", e))?;
    spool
        .write_all(&compressed)
        .map_err(|e| GambitError::io(path, "write spool", e))?;
    offsets.push(offsets.last().unwrap() + compressed.len() as u64);
    Ok(())
}

fn read_compressed_values(r: &mut Reader<'_>, value_bytes: usize) -> Result<Vec<u8>> {
    let block_size = r.read_u64()?;
    if block_size == 0 {
        return Err(r.corrupt("block size is zero"));
    }
    let nblocks = r.read_u64()?;
    if nblocks > MAX_BLOCKS {
        return Err(r.corrupt(format!("{} blocks exceeds limit {}", nblocks, MAX_BLOCKS)));
    }
    let mut offsets = Vec::with_capacity(nblocks as usize + 1);
    for _ in 0..=nblocks {
        offsets.push(r.read_u64()?);
    }
    if offsets[0] != 0 {
        return Err(r.corrupt("first block offset must be 0"));
    }
    for i in 1..offsets.len() {
        if offsets[i] < offsets[i - 1] {
            return Err(r.corrupt("block offsets are not monotone"));
        }
    }

    let data = r.bytes(offsets[nblocks as usize] as usize)?;

    let mut raw = Vec::with_capacity(value_bytes);
    for b in 0..nblocks as usize {
        let chunk = &data[offsets[b] as usize..offsets[b + 1] as usize];
        let expected = block_size.min((value_bytes - raw.len()) as u64) as usize;
        let block = zstd::bulk::decompress(chunk, expected)
            .map_err(|e| GambitError::corrupt(r.path, format!("block {}: {}", b, e)))?;
        if block.len() != expected {
            return Err(GambitError::corrupt(
                r.path,
                format!("block {} decompressed to {} bytes, expected {}", b, block.len(), expected),
            ));
        }
        raw.extend_from_slice(&block);
    }
    if raw.len() != value_bytes {
        return Err(GambitError::corrupt(
            r.path,
            format!("decompressed values are {} bytes, expected {}", raw.len(), value_bytes),
        ));
    }
    Ok(raw)
}

fn build_owned(
    spec: KmerSpec,
    width: IndexWidth,
    raw: &[u8],
    bounds: Vec<u64>,
    path: &Path,
) -> Result<AnySignatureArray> {
    fn decode_vec<C: Coord>(raw: &[u8]) -> Vec<C> {
        raw.chunks_exact(C::WIDTH.bytes()).map(C::read_le).collect()
    }
    let wrap = |detail: String| GambitError::corrupt(path, detail);
    Ok(match width {
        IndexWidth::U16 => AnySignatureArray::U16(
            SignatureArray::from_owned_parts(spec, decode_vec::<u16>(raw), bounds)
                .map_err(|e| wrap(e.to_string()))?,
        ),
        IndexWidth::U32 => AnySignatureArray::U32(
            SignatureArray::from_owned_parts(spec, decode_vec::<u32>(raw), bounds)
                .map_err(|e| wrap(e.to_string()))?,
        ),
        IndexWidth::U64 => AnySignatureArray::U64(
            SignatureArray::from_owned_parts(spec, decode_vec::<u64>(raw), bounds)
                .map_err(|e| wrap(e.to_string()))?,
        ),
    })
}

fn build_mapped(
    spec: KmerSpec,
    width: IndexWidth,
    map: Arc<Mmap>,
    byte_offset: usize,
    nvalues: usize,
    bounds: Vec<u64>,
) -> AnySignatureArray {
    match width {
        IndexWidth::U16 => AnySignatureArray::U16(SignatureArray::from_mapped_parts(
            spec, map, byte_offset, nvalues, bounds,
        )),
        IndexWidth::U32 => AnySignatureArray::U32(SignatureArray::from_mapped_parts(
            spec, map, byte_offset, nvalues, bounds,
        )),
        IndexWidth::U64 => AnySignatureArray::U64(SignatureArray::from_mapped_parts(
            spec, map, byte_offset, nvalues, bounds,
        )),
    }
}

/// Cursor over the mapped file with bounds-checked reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn corrupt(&self, detail: impl Into<String>) -> GambitError {
        GambitError::corrupt(self.path, detail)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(self.corrupt(format!(
                "truncated file: needed {} bytes at offset {}",
                n, self.pos
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }
}
