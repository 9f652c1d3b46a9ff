//! The `signatures create` command: compute and store query signatures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::info;

use crate::cancel::CancellationToken;
use crate::kmers::KmerSpec;
use crate::parallel::build_pool;
use crate::signatures::calc::calc_file_signatures;
use crate::signatures::file::{CreateOptions, SignatureFile};

use super::{collect_genome_inputs, read_metadata_file};

#[allow(clippy::too_many_arguments)]
pub fn run_create(
    output: PathBuf,
    genomes: Vec<PathBuf>,
    listfile: Option<PathBuf>,
    k: usize,
    prefix: String,
    meta: Option<PathBuf>,
    compress: bool,
    cores: Option<usize>,
) -> Result<()> {
    let spec = KmerSpec::new(prefix.as_bytes(), k)?;
    let inputs = collect_genome_inputs(genomes, listfile.as_deref())?;
    if inputs.is_empty() {
        return Err(anyhow!("No input genome files given"));
    }

    let ids = file_ids(&inputs)?;
    let metadata = read_metadata_file(meta.as_deref())?;

    let pool = build_pool(cores)?;
    let cancel = CancellationToken::new();
    info!("Computing {} signature(s) under spec {}", inputs.len(), spec);
    let sigs = calc_file_signatures(&spec, &inputs, &pool, &cancel)?;

    let options = CreateOptions {
        compress,
        ..CreateOptions::default()
    };
    SignatureFile::create_with(&output, &spec, sigs, Some(&ids), metadata.as_ref(), &options)?;
    info!("Wrote {}", output.display());
    Ok(())
}

/// Derive unique signature ids from input file stems.
fn file_ids(inputs: &[PathBuf]) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(inputs.len());
    let mut seen = HashSet::new();
    for input in inputs {
        let id = file_stem(input);
        if !seen.insert(id.clone()) {
            return Err(anyhow!(
                "Duplicate signature id '{}'; input file names must be unique",
                id
            ));
        }
        ids.push(id);
    }
    Ok(ids)
}

/// File name without a trailing `.gz` and one format extension.
fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("/data/sample1.fasta")), "sample1");
        assert_eq!(file_stem(Path::new("sample2.fa.gz")), "sample2");
        assert_eq!(file_stem(Path::new("noext")), "noext");
        assert_eq!(file_stem(Path::new(".hidden")), ".hidden");
    }

    #[test]
    fn test_file_ids_unique() {
        let inputs = vec![PathBuf::from("a/x.fa"), PathBuf::from("b/x.fasta")];
        assert!(file_ids(&inputs).is_err());

        let inputs = vec![PathBuf::from("a/x.fa"), PathBuf::from("b/y.fa")];
        assert_eq!(file_ids(&inputs).unwrap(), vec!["x", "y"]);
    }
}
