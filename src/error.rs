//! Unified error type for the gambit library.
//!
//! Library code returns `GambitError` so callers can match on failure modes;
//! CLI code wraps everything in `anyhow::Result` for convenience.
//!
//! # Error Categories
//!
//! - **Io**: File system operations (open, read, write) with path context
//! - **InvalidNucleotide**: Non-ACGT byte encountered while encoding a k-mer
//! - **InvalidKmerSpec**: K-mer spec parameters out of range
//! - **CorruptSignatureFile**: Structural problem in a `.gs` file
//! - **Database**: Structural problem in a `.gdb` metadata document
//! - **ReferenceMismatch**: Signature IDs and genome metadata disagree
//! - **DimensionMismatch**: Query and reference k-mer specs differ
//! - **Cancelled**: A cancellation token fired mid-operation

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum GambitError {
    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
    },

    /// Non-ACGT byte in a k-mer body during encoding.
    InvalidNucleotide { byte: u8 },

    /// K out of range, empty prefix, or non-ACGT prefix.
    InvalidKmerSpec(String),

    /// Invalid parameters or data handed to a constructor or writer.
    Validation(String),

    /// Bad magic, unknown version, non-monotone bounds, out-of-range index.
    CorruptSignatureFile { path: PathBuf, detail: String },

    /// Structural problem in the genome metadata document.
    Database { path: PathBuf, detail: String },

    /// Signature IDs and metadata genomes disagree.
    ReferenceMismatch(String),

    /// Query KmerSpec differs from the reference KmerSpec.
    DimensionMismatch { query: String, reference: String },

    /// A cancellation token fired; partial state has been discarded.
    Cancelled,
}

impl fmt::Display for GambitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GambitError::Io {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "I/O error during {} on '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            GambitError::InvalidNucleotide { byte } => {
                if byte.is_ascii_graphic() {
                    write!(f, "Invalid nucleotide code: '{}'", *byte as char)
                } else {
                    write!(f, "Invalid nucleotide code: 0x{:02x}", byte)
                }
            }
            GambitError::InvalidKmerSpec(msg) => write!(f, "Invalid k-mer spec: {}", msg),
            GambitError::Validation(msg) => write!(f, "Validation error: {}", msg),
            GambitError::CorruptSignatureFile { path, detail } => {
                write!(f, "Corrupt signature file '{}': {}", path.display(), detail)
            }
            GambitError::Database { path, detail } => {
                write!(f, "Invalid database '{}': {}", path.display(), detail)
            }
            GambitError::ReferenceMismatch(msg) => {
                write!(f, "Signature IDs do not match genome metadata: {}", msg)
            }
            GambitError::DimensionMismatch { query, reference } => {
                write!(
                    f,
                    "Query k-mer spec {} does not match reference k-mer spec {}",
                    query, reference
                )
            }
            GambitError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for GambitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GambitError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using GambitError.
pub type Result<T> = std::result::Result<T, GambitError>;

impl GambitError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        GambitError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Create a corrupt-signature-file error.
    pub fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        GambitError::CorruptSignatureFile {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a database error.
    pub fn database(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        GambitError::Database {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = GambitError::io(
            "/path/to/refs.gs",
            "read",
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/path/to/refs.gs"));
        assert!(msg.contains("read"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn test_invalid_nucleotide_display() {
        assert_eq!(
            GambitError::InvalidNucleotide { byte: b'N' }.to_string(),
            "Invalid nucleotide code: 'N'"
        );
        assert_eq!(
            GambitError::InvalidNucleotide { byte: 0x07 }.to_string(),
            "Invalid nucleotide code: 0x07"
        );
    }

    #[test]
    fn test_corrupt_file_display() {
        let err = GambitError::corrupt("/db/refs.gs", "invalid magic bytes");
        let msg = err.to_string();
        assert!(msg.contains("/db/refs.gs"));
        assert!(msg.contains("invalid magic bytes"));
    }

    #[test]
    fn test_error_source_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = GambitError::io("/path", "open", io_err);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = GambitError::DimensionMismatch {
            query: "ATGAC/11".to_string(),
            reference: "ATGAC/13".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ATGAC/11"));
        assert!(msg.contains("ATGAC/13"));
    }
}
