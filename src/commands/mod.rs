//! Command-line interface definitions and helpers for the gambit CLI.

pub mod args;
pub mod query;
pub mod signatures;

use std::env;
use std::fs;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

/// Environment variable supplying the default database directory.
pub const DB_PATH_ENV: &str = "GAMBIT_DB_PATH";

/// Resolve the database directory from the CLI flag or the environment.
pub fn resolve_db_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    let path = match flag {
        Some(path) => path,
        None => env::var_os(DB_PATH_ENV)
            .map(PathBuf::from)
            .ok_or_else(|| {
                anyhow!(
                    "No database specified; pass --db or set the {} environment variable",
                    DB_PATH_ENV
                )
            })?,
    };
    if !path.is_dir() {
        return Err(anyhow!(
            "Database path '{}' is not a directory",
            path.display()
        ));
    }
    Ok(path)
}

/// Combine positional genome paths with the contents of an optional list
/// file (one path per line, blank lines ignored).
pub fn collect_genome_inputs(
    genomes: Vec<PathBuf>,
    listfile: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let mut inputs = genomes;

    if let Some(listfile) = listfile {
        let file = File::open(listfile)
            .with_context(|| format!("Failed to open list file '{}'", listfile.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read list file")?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                inputs.push(PathBuf::from(trimmed));
            }
        }
    }

    for input in &inputs {
        if !input.is_file() {
            return Err(anyhow!("Input file not found: {}", input.display()));
        }
    }
    Ok(inputs)
}

/// Open the output destination: stdout when `None` or `-`, a plain file
/// otherwise, gzip-compressed when the name ends in `.gz`.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
        Some(p) if p.as_os_str() == "-" => Ok(Box::new(BufWriter::new(io::stdout()))),
        Some(p) => {
            let file = File::create(p)
                .with_context(|| format!("Failed to create output file '{}'", p.display()))?;
            if p.extension().is_some_and(|e| e == "gz") {
                Ok(Box::new(BufWriter::new(GzEncoder::new(
                    file,
                    Compression::default(),
                ))))
            } else {
                Ok(Box::new(BufWriter::new(file)))
            }
        }
    }
}

/// Read an optional JSON metadata file.
pub fn read_metadata_file(path: Option<&Path>) -> Result<Option<serde_json::Value>> {
    match path {
        None => Ok(None),
        Some(p) => {
            let raw = fs::read(p)
                .with_context(|| format!("Failed to read metadata file '{}'", p.display()))?;
            let value = serde_json::from_slice(&raw)
                .with_context(|| format!("Metadata file '{}' is not valid JSON", p.display()))?;
            Ok(Some(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_collect_inputs_with_listfile() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a.fa");
        let b = dir.path().join("b.fa");
        fs::write(&a, ">s\nA\n")?;
        fs::write(&b, ">s\nA\n")?;

        let listfile = dir.path().join("inputs.txt");
        fs::write(&listfile, format!("{}\n\n", b.display()))?;

        let inputs = collect_genome_inputs(vec![a.clone()], Some(&listfile))?;
        assert_eq!(inputs, vec![a, b]);
        Ok(())
    }

    #[test]
    fn test_collect_inputs_missing_file() {
        let result = collect_genome_inputs(vec![PathBuf::from("/no/such/file.fa")], None);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_db_path_flag_wins() -> Result<()> {
        let dir = tempdir()?;
        let resolved = resolve_db_path(Some(dir.path().to_path_buf()))?;
        assert_eq!(resolved, dir.path());
        Ok(())
    }

    #[test]
    fn test_resolve_db_path_rejects_file() -> Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "x")?;
        assert!(resolve_db_path(Some(file)).is_err());
        Ok(())
    }
}
